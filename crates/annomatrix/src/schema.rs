//! Dataset schema document and the by-name indexes built over it.
//!
//! The schema held by a proxy is always the full schema of the base dataset. It is never
//! mutated in place: adding, renaming or dropping a column (or a category) rebuilds a new
//! [`IndexedSchema`].

use crate::error::{MatrixError, Result};
use crate::field::Field;
use annomatrix_frame::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationType {
    Float32,
    Int32,
    Boolean,
    String,
    Categorical,
}

impl AnnotationType {
    /// The physical column type values of this annotation type are stored as.
    pub fn backing_type(self) -> ColumnType {
        match self {
            AnnotationType::Float32 => ColumnType::Float32,
            AnnotationType::Int32 => ColumnType::Int32,
            AnnotationType::Boolean => ColumnType::Boolean,
            AnnotationType::String | AnnotationType::Categorical => ColumnType::String,
        }
    }

    /// Continuous data may be lossily digitized in transit.
    pub fn is_continuous(self) -> bool {
        matches!(self, AnnotationType::Float32)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: AnnotationType,
    #[serde(default)]
    pub writable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: AnnotationType) -> Self {
        Self {
            name: name.into(),
            column_type,
            writable: false,
            categories: None,
        }
    }

    /// A writable categorical column, the shape user-authored annotations take.
    pub fn writable_categorical<I, S>(name: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            column_type: AnnotationType::Categorical,
            writable: true,
            categories: Some(categories.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_categorical(&self) -> bool {
        self.column_type == AnnotationType::Categorical
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSchema {
    pub index: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnotationsSchema {
    pub obs: AnnotationSchema,
    pub var: AnnotationSchema,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataframeSchema {
    pub n_obs: usize,
    pub n_var: usize,
    #[serde(rename = "type")]
    pub data_type: AnnotationType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: AnnotationType,
    pub dims: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutSchema {
    pub obs: Vec<EmbeddingSchema>,
}

/// The raw, nested schema document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub dataframe: DataframeSchema,
    pub annotations: AnnotationsSchema,
    #[serde(default)]
    pub layout: LayoutSchema,
}

impl Schema {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| MatrixError::InvalidSchema(err.to_string()))
    }
}

/// A [`Schema`] plus O(1) by-name lookup tables.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedSchema {
    schema: Schema,
    obs_by_name: HashMap<String, usize>,
    var_by_name: HashMap<String, usize>,
    emb_by_name: HashMap<String, usize>,
}

impl IndexedSchema {
    pub fn new(schema: Schema) -> Result<Self> {
        let obs_by_name = index_columns(Field::Obs, &schema.annotations.obs.columns)?;
        let var_by_name = index_columns(Field::Var, &schema.annotations.var.columns)?;
        let mut emb_by_name = HashMap::with_capacity(schema.layout.obs.len());
        for (idx, emb) in schema.layout.obs.iter().enumerate() {
            if emb_by_name.insert(emb.name.clone(), idx).is_some() {
                return Err(MatrixError::NameCollision {
                    field: Field::Emb,
                    column: emb.name.clone(),
                });
            }
        }
        Ok(Self {
            schema,
            obs_by_name,
            var_by_name,
            emb_by_name,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn n_obs(&self) -> usize {
        self.schema.dataframe.n_obs
    }

    pub fn n_var(&self) -> usize {
        self.schema.dataframe.n_var
    }

    /// Element type of the main matrix.
    pub fn matrix_type(&self) -> AnnotationType {
        self.schema.dataframe.data_type
    }

    pub fn annotations(&self, field: Field) -> Option<&AnnotationSchema> {
        match field {
            Field::Obs => Some(&self.schema.annotations.obs),
            Field::Var => Some(&self.schema.annotations.var),
            Field::X | Field::Emb => None,
        }
    }

    pub fn annotation(&self, field: Field, name: &str) -> Option<&ColumnSchema> {
        let (by_name, annotations) = match field {
            Field::Obs => (&self.obs_by_name, &self.schema.annotations.obs),
            Field::Var => (&self.var_by_name, &self.schema.annotations.var),
            Field::X | Field::Emb => return None,
        };
        annotations.columns.get(*by_name.get(name)?)
    }

    pub fn embedding(&self, name: &str) -> Option<&EmbeddingSchema> {
        self.schema.layout.obs.get(*self.emb_by_name.get(name)?)
    }

    pub fn is_writable(&self, field: Field, name: &str) -> bool {
        self.annotation(field, name).is_some_and(|col| col.writable)
    }

    /// Whether a concrete column label may legally appear in `field`'s cache.
    ///
    /// Main-matrix labels are not enumerated by the schema (var offsets and summary labels),
    /// so any label is accepted there.
    pub fn has_label(&self, field: Field, label: &str) -> bool {
        match field {
            Field::Obs | Field::Var => self.annotation(field, label).is_some(),
            Field::X => true,
            Field::Emb => self
                .schema
                .layout
                .obs
                .iter()
                .any(|emb| emb.dims.iter().any(|dim| dim == label)),
        }
    }

    pub fn with_column_added(&self, field: Field, column: ColumnSchema) -> Result<Self> {
        if self.annotation(field, &column.name).is_some() {
            return Err(MatrixError::NameCollision {
                field,
                column: column.name,
            });
        }
        self.rebuild(field, |annotations| {
            annotations.columns.push(column);
            Ok(())
        })
    }

    pub fn with_column_dropped(&self, field: Field, name: &str) -> Result<Self> {
        self.require(field, name)?;
        self.rebuild(field, |annotations| {
            annotations.columns.retain(|col| col.name != name);
            Ok(())
        })
    }

    pub fn with_column_renamed(&self, field: Field, old: &str, new: &str) -> Result<Self> {
        self.require(field, old)?;
        if self.annotation(field, new).is_some() {
            return Err(MatrixError::NameCollision {
                field,
                column: new.to_owned(),
            });
        }
        self.rebuild(field, |annotations| {
            if let Some(col) = annotations.columns.iter_mut().find(|col| col.name == old) {
                col.name = new.to_owned();
            }
            Ok(())
        })
    }

    pub fn with_category_added(&self, field: Field, column: &str, category: &str) -> Result<Self> {
        let categories = self.categories(field, column, category)?;
        if categories.iter().any(|c| c == category) {
            return Err(invalid_category(field, column, category, "category already exists"));
        }
        self.rebuild(field, |annotations| {
            with_categories(annotations, column, |cats| cats.push(category.to_owned()));
            Ok(())
        })
    }

    pub fn with_category_removed(
        &self,
        field: Field,
        column: &str,
        category: &str,
    ) -> Result<Self> {
        let categories = self.categories(field, column, category)?;
        if !categories.iter().any(|c| c == category) {
            return Err(invalid_category(field, column, category, "no such category"));
        }
        self.rebuild(field, |annotations| {
            with_categories(annotations, column, |cats| cats.retain(|c| c != category));
            Ok(())
        })
    }

    /// The category list of a categorical annotation column.
    pub fn categories(&self, field: Field, column: &str, category: &str) -> Result<&[String]> {
        let col = self.require(field, column)?;
        match (&col.categories, col.is_categorical()) {
            (Some(categories), true) => Ok(categories),
            _ => Err(invalid_category(field, column, category, "column is not categorical")),
        }
    }

    pub(crate) fn require(&self, field: Field, name: &str) -> Result<&ColumnSchema> {
        self.annotation(field, name)
            .ok_or_else(|| MatrixError::UnknownColumn {
                field,
                column: name.to_owned(),
            })
    }

    fn rebuild(
        &self,
        field: Field,
        edit: impl FnOnce(&mut AnnotationSchema) -> Result<()>,
    ) -> Result<Self> {
        let mut schema = self.schema.clone();
        let annotations = match field {
            Field::Obs => &mut schema.annotations.obs,
            Field::Var => &mut schema.annotations.var,
            Field::X | Field::Emb => {
                return Err(MatrixError::UnwritableColumn {
                    field,
                    column: String::new(),
                    reason: "field has no annotation schema".to_owned(),
                })
            }
        };
        edit(annotations)?;
        IndexedSchema::new(schema)
    }
}

fn index_columns(field: Field, columns: &[ColumnSchema]) -> Result<HashMap<String, usize>> {
    let mut by_name = HashMap::with_capacity(columns.len());
    for (idx, col) in columns.iter().enumerate() {
        if by_name.insert(col.name.clone(), idx).is_some() {
            return Err(MatrixError::NameCollision {
                field,
                column: col.name.clone(),
            });
        }
    }
    Ok(by_name)
}

fn with_categories(
    annotations: &mut AnnotationSchema,
    column: &str,
    edit: impl FnOnce(&mut Vec<String>),
) {
    if let Some(categories) = annotations
        .columns
        .iter_mut()
        .find(|col| col.name == column)
        .and_then(|col| col.categories.as_mut())
    {
        edit(categories);
    }
}

pub(crate) fn invalid_category(
    field: Field,
    column: &str,
    category: &str,
    reason: &str,
) -> MatrixError {
    MatrixError::InvalidCategory {
        field,
        column: column.to_owned(),
        category: category.to_owned(),
        reason: reason.to_owned(),
    }
}
