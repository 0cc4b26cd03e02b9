use crate::error::{FrameError, Result};
use crate::types::{ColumnType, Value};
use std::sync::Arc;

/// An immutable column payload.
///
/// Payloads are reference counted: cloning a column (or a frame holding it) never copies the
/// underlying values. Writes produce a fresh payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Float32(Arc<[f32]>),
    Int32(Arc<[i32]>),
    Boolean(Arc<[bool]>),
    String(Arc<[Arc<str>]>),
}

impl Column {
    /// Broadcast `value` across `len` rows.
    pub fn filled(value: &Value, len: usize) -> Self {
        match value {
            Value::Float32(v) => Column::Float32(vec![*v; len].into()),
            Value::Int32(v) => Column::Int32(vec![*v; len].into()),
            Value::Boolean(v) => Column::Boolean(vec![*v; len].into()),
            Value::String(v) => Column::String(vec![v.clone(); len].into()),
        }
    }

    pub fn from_strings<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Column::String(
            values
                .into_iter()
                .map(|s| Arc::<str>::from(s.as_ref()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Float32(v) => v.len(),
            Column::Int32(v) => v.len(),
            Column::Boolean(v) => v.len(),
            Column::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Column::Float32(_) => ColumnType::Float32,
            Column::Int32(_) => ColumnType::Int32,
            Column::Boolean(_) => ColumnType::Boolean,
            Column::String(_) => ColumnType::String,
        }
    }

    pub fn get(&self, offset: usize) -> Option<Value> {
        match self {
            Column::Float32(v) => v.get(offset).copied().map(Value::Float32),
            Column::Int32(v) => v.get(offset).copied().map(Value::Int32),
            Column::Boolean(v) => v.get(offset).copied().map(Value::Boolean),
            Column::String(v) => v.get(offset).cloned().map(Value::String),
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Column::Float32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            Column::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            Column::Boolean(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[Arc<str>]> {
        match self {
            Column::String(v) => Some(v),
            _ => None,
        }
    }

    /// Gather the rows at `offsets`, in order.
    pub fn take(&self, offsets: &[usize]) -> Result<Self> {
        let rows = self.len();
        if let Some(&offset) = offsets.iter().find(|&&o| o >= rows) {
            return Err(FrameError::RowOutOfRange { offset, rows });
        }
        Ok(match self {
            Column::Float32(v) => Column::Float32(offsets.iter().map(|&o| v[o]).collect()),
            Column::Int32(v) => Column::Int32(offsets.iter().map(|&o| v[o]).collect()),
            Column::Boolean(v) => Column::Boolean(offsets.iter().map(|&o| v[o]).collect()),
            Column::String(v) => Column::String(offsets.iter().map(|&o| v[o].clone()).collect()),
        })
    }

    /// Copy of this column with every row in `offsets` set to `value`.
    pub fn with_values_at(&self, label: &str, offsets: &[usize], value: &Value) -> Result<Self> {
        self.check_type(label, value)?;
        let rows = self.len();
        if let Some(&offset) = offsets.iter().find(|&&o| o >= rows) {
            return Err(FrameError::RowOutOfRange { offset, rows });
        }
        Ok(match (self, value) {
            (Column::Float32(v), Value::Float32(x)) => {
                let mut out = v.to_vec();
                offsets.iter().for_each(|&o| out[o] = *x);
                Column::Float32(out.into())
            }
            (Column::Int32(v), Value::Int32(x)) => {
                let mut out = v.to_vec();
                offsets.iter().for_each(|&o| out[o] = *x);
                Column::Int32(out.into())
            }
            (Column::Boolean(v), Value::Boolean(x)) => {
                let mut out = v.to_vec();
                offsets.iter().for_each(|&o| out[o] = *x);
                Column::Boolean(out.into())
            }
            (Column::String(v), Value::String(x)) => {
                let mut out = v.to_vec();
                offsets.iter().for_each(|&o| out[o] = x.clone());
                Column::String(out.into())
            }
            _ => unreachable!("type checked above"),
        })
    }

    /// Copy of this column with every row equal to `old` replaced by `new`.
    pub fn replace_value(&self, label: &str, old: &Value, new: &Value) -> Result<Self> {
        self.check_type(label, old)?;
        self.check_type(label, new)?;
        let offsets: Vec<usize> = (0..self.len())
            .filter(|&o| self.get(o).as_ref() == Some(old))
            .collect();
        if offsets.is_empty() {
            return Ok(self.clone());
        }
        self.with_values_at(label, &offsets, new)
    }

    /// Apply `f` to every value of a float column; other column types are returned unchanged.
    pub fn map_f32(&self, f: impl Fn(f32) -> f32) -> Self {
        match self {
            Column::Float32(v) => Column::Float32(v.iter().map(|&x| f(x)).collect()),
            other => other.clone(),
        }
    }

    /// Nearest-rank quantile over the non-NaN values of a float column.
    pub fn quantile(&self, q: f64) -> Option<f32> {
        let values = self.as_f32()?;
        let mut sorted: Vec<f32> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        let q = q.clamp(0.0, 1.0);
        let rank = (q * (sorted.len() - 1) as f64).round() as usize;
        sorted.get(rank).copied()
    }

    fn check_type(&self, label: &str, value: &Value) -> Result<()> {
        if self.column_type() != value.column_type() {
            return Err(FrameError::TypeMismatch {
                column: label.to_owned(),
                expected: self.column_type(),
                actual: value.column_type(),
            });
        }
        Ok(())
    }
}

impl From<Vec<f32>> for Column {
    fn from(values: Vec<f32>) -> Self {
        Column::Float32(values.into())
    }
}

impl From<Vec<i32>> for Column {
    fn from(values: Vec<i32>) -> Self {
        Column::Int32(values.into())
    }
}

impl From<Vec<bool>> for Column {
    fn from(values: Vec<bool>) -> Self {
        Column::Boolean(values.into())
    }
}
