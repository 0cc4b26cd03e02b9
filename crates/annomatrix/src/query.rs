//! Query model and normalization.
//!
//! A query names one column (an annotation, a var offset of the main matrix or an embedding
//! layout), or joins the main matrix through the var annotations by value. Normalizing a query
//! validates its shape against a field and assigns it a stable [`QueryKey`].

use crate::error::{MatrixError, Result};
use crate::field::Field;
use crate::schema::IndexedSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMethod {
    Mean,
}

impl SummaryMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryMethod::Mean => "mean",
        }
    }
}

/// `{ "where": { field, column, value } }`: every main-matrix column whose `field` annotation
/// `column` equals `value`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WherePredicate {
    pub field: Field,
    pub column: String,
    pub value: String,
}

/// `{ "summarize": { method, field, column, values } }`: one synthetic main-matrix column
/// aggregating every var whose `column` annotation is in `values`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SummarizePredicate {
    pub method: SummaryMethod,
    pub field: Field,
    pub column: String,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Query {
    Column(String),
    Where {
        #[serde(rename = "where")]
        predicate: WherePredicate,
    },
    Summarize {
        summarize: SummarizePredicate,
    },
}

impl Query {
    pub fn column(name: impl Into<String>) -> Self {
        Query::Column(name.into())
    }

    /// A main-matrix column addressed by var offset.
    pub fn var_offset(offset: usize) -> Self {
        Query::Column(offset.to_string())
    }

    pub fn where_eq(
        field: Field,
        column: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Query::Where {
            predicate: WherePredicate {
                field,
                column: column.into(),
                value: value.into(),
            },
        }
    }

    pub fn summarize_mean<I, S>(field: Field, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::Summarize {
            summarize: SummarizePredicate {
                method: SummaryMethod::Mean,
                field,
                column: column.into(),
                values: values.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, Query::Column(_))
    }
}

impl From<&str> for Query {
    fn from(name: &str) -> Self {
        Query::column(name)
    }
}

impl From<String> for Query {
    fn from(name: String) -> Self {
        Query::Column(name)
    }
}

/// Canonical JSON encoding of a query, used to deduplicate loads and index the where-cache.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn raw(key: &str) -> Self {
        QueryKey(key.to_owned())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A query validated against a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub field: Field,
    pub query: Query,
    pub key: QueryKey,
}

impl NormalizedQuery {
    pub fn new(field: Field, query: Query, schema: &IndexedSchema) -> Result<Self> {
        validate(field, &query, schema)?;
        let key = serde_json::to_string(&query).map_err(|err| MatrixError::InvalidQuery {
            field,
            reason: err.to_string(),
        })?;
        Ok(Self {
            field,
            query,
            key: QueryKey(key),
        })
    }

    /// Labels this query resolves to without consulting the where-cache, if knowable.
    ///
    /// Join and summarize queries only learn their labels from a completed load.
    pub fn static_labels(&self, schema: &IndexedSchema) -> Option<Vec<String>> {
        let Query::Column(name) = &self.query else {
            return None;
        };
        match self.field {
            Field::Emb => schema.embedding(name).map(|emb| emb.dims.clone()),
            Field::Obs | Field::Var | Field::X => Some(vec![name.clone()]),
        }
    }
}

fn validate(field: Field, query: &Query, schema: &IndexedSchema) -> Result<()> {
    let unknown = |column: &str| MatrixError::UnknownColumn {
        field,
        column: column.to_owned(),
    };
    let invalid = |reason: String| MatrixError::InvalidQuery { field, reason };

    match query {
        Query::Column(name) if name.is_empty() => Err(invalid("empty column name".to_owned())),
        Query::Column(name) => match field {
            Field::Obs | Field::Var => schema
                .annotation(field, name)
                .map(|_| ())
                .ok_or_else(|| unknown(name)),
            Field::Emb => schema.embedding(name).map(|_| ()).ok_or_else(|| unknown(name)),
            Field::X => match name.parse::<usize>() {
                Ok(offset) if offset < schema.n_var() => Ok(()),
                Ok(_) => Err(unknown(name)),
                Err(_) => Err(invalid(format!("{name:?} is not a var offset"))),
            },
        },
        Query::Where { predicate } => {
            validate_join(field, predicate.field, &predicate.column, schema)
        }
        Query::Summarize { summarize } => {
            if summarize.values.is_empty() {
                return Err(invalid("summarize query names no values".to_owned()));
            }
            validate_join(field, summarize.field, &summarize.column, schema)
        }
    }
}

fn validate_join(field: Field, join: Field, column: &str, schema: &IndexedSchema) -> Result<()> {
    if field != Field::X {
        return Err(MatrixError::InvalidQuery {
            field,
            reason: format!("value-join queries are only supported on {}", Field::X),
        });
    }
    if join != Field::Var {
        return Err(MatrixError::InvalidQuery {
            field,
            reason: format!("value-join must go through {}, not {join}", Field::Var),
        });
    }
    if schema.annotation(Field::Var, column).is_none() {
        return Err(MatrixError::UnknownColumn {
            field: Field::Var,
            column: column.to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        AnnotationSchema, AnnotationType, AnnotationsSchema, ColumnSchema, DataframeSchema,
        EmbeddingSchema, LayoutSchema, Schema,
    };

    fn schema() -> IndexedSchema {
        IndexedSchema::new(Schema {
            dataframe: DataframeSchema {
                n_obs: 4,
                n_var: 3,
                data_type: AnnotationType::Float32,
            },
            annotations: AnnotationsSchema {
                obs: AnnotationSchema {
                    index: "cell".to_string(),
                    columns: vec![ColumnSchema::new("cell", AnnotationType::String)],
                },
                var: AnnotationSchema {
                    index: "gene".to_string(),
                    columns: vec![ColumnSchema::new("gene", AnnotationType::String)],
                },
            },
            layout: LayoutSchema {
                obs: vec![EmbeddingSchema {
                    name: "pca".to_string(),
                    data_type: AnnotationType::Float32,
                    dims: vec!["pca_0".to_string(), "pca_1".to_string()],
                }],
            },
        })
        .unwrap()
    }

    #[test]
    fn keys_are_canonical_json() {
        let schema = schema();
        let simple = NormalizedQuery::new(Field::Obs, Query::column("cell"), &schema).unwrap();
        assert_eq!(simple.key.as_str(), r#""cell""#);

        let join = NormalizedQuery::new(
            Field::X,
            Query::where_eq(Field::Var, "gene", "CD3E"),
            &schema,
        )
        .unwrap();
        assert_eq!(
            join.key.as_str(),
            r#"{"where":{"field":"var","column":"gene","value":"CD3E"}}"#
        );
        let again = NormalizedQuery::new(
            Field::X,
            Query::where_eq(Field::Var, "gene", "CD3E"),
            &schema,
        )
        .unwrap();
        assert_eq!(join.key, again.key);
    }

    #[test]
    fn join_queries_only_target_the_matrix_through_var() {
        let schema = schema();
        let on_obs =
            NormalizedQuery::new(Field::Obs, Query::where_eq(Field::Var, "gene", "A"), &schema);
        assert!(matches!(on_obs, Err(MatrixError::InvalidQuery { field: Field::Obs, .. })));

        let through_obs =
            NormalizedQuery::new(Field::X, Query::where_eq(Field::Obs, "cell", "A"), &schema);
        assert!(matches!(through_obs, Err(MatrixError::InvalidQuery { .. })));

        let unknown =
            NormalizedQuery::new(Field::X, Query::where_eq(Field::Var, "nope", "A"), &schema);
        assert!(matches!(unknown, Err(MatrixError::UnknownColumn { field: Field::Var, .. })));

        let empty = NormalizedQuery::new(
            Field::X,
            Query::summarize_mean(Field::Var, "gene", Vec::<String>::new()),
            &schema,
        );
        assert!(matches!(empty, Err(MatrixError::InvalidQuery { .. })));
    }

    #[test]
    fn simple_queries_resolve_statically() {
        let schema = schema();
        let emb = NormalizedQuery::new(Field::Emb, Query::column("pca"), &schema).unwrap();
        assert_eq!(
            emb.static_labels(&schema),
            Some(vec!["pca_0".to_string(), "pca_1".to_string()])
        );
        let x = NormalizedQuery::new(Field::X, Query::var_offset(2), &schema).unwrap();
        assert_eq!(x.static_labels(&schema), Some(vec!["2".to_string()]));

        assert!(matches!(
            NormalizedQuery::new(Field::X, Query::var_offset(3), &schema),
            Err(MatrixError::UnknownColumn { .. })
        ));
        assert!(matches!(
            NormalizedQuery::new(Field::X, Query::column("CD3E"), &schema),
            Err(MatrixError::InvalidQuery { .. })
        ));
    }
}
