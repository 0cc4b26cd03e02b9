use std::fmt;
use std::sync::Arc;

/// Physical element type of a [`crate::Column`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColumnType {
    #[default]
    Float32,
    Int32,
    Boolean,
    String,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Float32 => "float32",
            ColumnType::Int32 => "int32",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single scalar read from (or broadcast into) a column.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Float32(f32),
    Int32(i32),
    Boolean(bool),
    String(Arc<str>),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Float32(_) => ColumnType::Float32,
            Value::Int32(_) => ColumnType::Int32,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::String(_) => ColumnType::String,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float32(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float32(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Arc::from(value))
    }
}
