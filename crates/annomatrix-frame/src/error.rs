use crate::types::ColumnType;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("unknown row label: {0}")]
    UnknownRowLabel(u32),

    #[error("duplicate row label: {0}")]
    DuplicateRowLabel(u32),

    #[error("column length mismatch for {column}: expected {expected} rows, got {actual}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("row count mismatch: expected {expected} rows, got {actual}")]
    RowCountMismatch { expected: usize, actual: usize },

    #[error("type mismatch for {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("row offset {offset} out of range for {rows} rows")]
    RowOutOfRange { offset: usize, rows: usize },

    #[error("unsupported arrow type for {column}: {data_type}")]
    UnsupportedArrowType { column: String, data_type: String },

    #[error("arrow error: {0}")]
    Arrow(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
