use crate::field::Field;
use annomatrix_frame::FrameError;
use thiserror::Error;

/// Errors surfaced by the matrix proxy.
///
/// Every variant names the offending field, column or query so callers can present an
/// actionable message. The proxy never retries on its own; see [`MatrixError::is_retryable`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MatrixError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("unknown column {field}[{column}]")]
    UnknownColumn { field: Field, column: String },

    #[error("column {field}[{column}] is not writable: {reason}")]
    UnwritableColumn {
        field: Field,
        column: String,
        reason: String,
    },

    #[error("invalid category {category:?} for {field}[{column}]: {reason}")]
    InvalidCategory {
        field: Field,
        column: String,
        category: String,
        reason: String,
    },

    #[error("invalid query against {field}: {reason}")]
    InvalidQuery { field: Field, reason: String },

    #[error("load of {field} query {query} returned no usable columns")]
    EmptyLoadResult { field: Field, query: String },

    #[error("{field} columns for {queries} were evicted before they could be read")]
    Evicted { field: Field, queries: String },

    #[error("unknown row label: {label}")]
    UnknownRowLabel { label: u32 },

    #[error("column {field}[{column}] already exists")]
    NameCollision { field: Field, column: String },

    #[error("load of {field} query {query} failed: {message}")]
    Load {
        field: Field,
        query: String,
        message: String,
        retryable: bool,
    },

    #[error("frame error: {0}")]
    Frame(FrameError),
}

impl MatrixError {
    /// Whether repeating the same call could plausibly succeed.
    ///
    /// Shape and schema errors are deterministic; load failures may be transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            MatrixError::Load { retryable, .. } => *retryable,
            MatrixError::EmptyLoadResult { .. } | MatrixError::Evicted { .. } => true,
            _ => false,
        }
    }
}

impl From<FrameError> for MatrixError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::UnknownRowLabel(label) => MatrixError::UnknownRowLabel { label },
            other => MatrixError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MatrixError>;
