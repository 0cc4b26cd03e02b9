use crate::error::MatrixError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four fixed partitions of the dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    /// Row (cell) annotations.
    #[serde(rename = "obs")]
    Obs,
    /// Column (gene) annotations.
    #[serde(rename = "var")]
    Var,
    /// The 2-D numeric main matrix, one column per var.
    #[serde(rename = "X")]
    X,
    /// Named low-dimensional embeddings of the rows.
    #[serde(rename = "emb")]
    Emb,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Obs, Field::Var, Field::X, Field::Emb];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Obs => "obs",
            Field::Var => "var",
            Field::X => "X",
            Field::Emb => "emb",
        }
    }

    /// Annotation fields carry per-column schema entries and may hold writable columns.
    pub fn is_annotation(self) -> bool {
        matches!(self, Field::Obs | Field::Var)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "obs" => Ok(Field::Obs),
            "var" => Ok(Field::Var),
            "X" => Ok(Field::X),
            "emb" => Ok(Field::Emb),
            other => Err(MatrixError::UnknownField(other.to_owned())),
        }
    }
}

/// One value per [`Field`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerField<T> {
    pub obs: T,
    pub var: T,
    pub x: T,
    pub emb: T,
}

impl<T> PerField<T> {
    pub fn from_fn(mut f: impl FnMut(Field) -> T) -> Self {
        Self {
            obs: f(Field::Obs),
            var: f(Field::Var),
            x: f(Field::X),
            emb: f(Field::Emb),
        }
    }

    pub fn get(&self, field: Field) -> &T {
        match field {
            Field::Obs => &self.obs,
            Field::Var => &self.var,
            Field::X => &self.x,
            Field::Emb => &self.emb,
        }
    }

    pub fn get_mut(&mut self, field: Field) -> &mut T {
        match field {
            Field::Obs => &mut self.obs,
            Field::Var => &mut self.var,
            Field::X => &mut self.x,
            Field::Emb => &mut self.emb,
        }
    }
}
