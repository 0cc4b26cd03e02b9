//! The mutation family.
//!
//! Every mutation validates first, then returns a new proxy; `self` is never touched. Only
//! writable annotation columns (obs and var) can be edited. On a view the mutation is applied
//! to the parent and the view is re-derived on top of the result.

use crate::error::{MatrixError, Result};
use crate::field::Field;
use crate::proxy::{AnnoMatrix, ProxyKind};
use crate::query::Query;
use crate::schema::{invalid_category, ColumnSchema, IndexedSchema};
use annomatrix_frame::{Column, Value};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::Arc;

/// Initial contents of a new column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnInit {
    /// One value per row, of the column's backing type.
    Values(Column),
    /// A scalar broadcast across every row.
    Fill(Value),
}

impl AnnoMatrix {
    pub fn add_column(
        self: &Arc<Self>,
        field: Field,
        column: ColumnSchema,
        init: ColumnInit,
    ) -> Result<Arc<AnnoMatrix>> {
        if let ProxyKind::View { parent, .. } = &self.kind {
            let parent = parent.add_column(field, column, init)?;
            return self.rebase(parent, field, &[]);
        }

        if !field.is_annotation() {
            return Err(unwritable(field, &column.name, "field does not accept new columns"));
        }
        if !column.writable {
            return Err(unwritable(field, &column.name, "new columns must be writable"));
        }
        if column.is_categorical() && column.categories.is_none() {
            return Err(invalid_category(
                field,
                &column.name,
                "",
                "categorical column declares no categories",
            ));
        }
        let schema = self.schema.with_column_added(field, column.clone())?;

        let rows = self.rows(field).len();
        let data = match init {
            ColumnInit::Fill(value) => {
                check_value(field, &column, &value)?;
                Column::filled(&value, rows)
            }
            ColumnInit::Values(values) => {
                check_values(field, &column, &values)?;
                values
            }
        };
        self.publish(Some(schema), field, &column.name, Some(data))
    }

    pub fn drop_column(self: &Arc<Self>, field: Field, column: &str) -> Result<Arc<AnnoMatrix>> {
        if let ProxyKind::View { parent, .. } = &self.kind {
            let parent = parent.drop_column(field, column)?;
            return self.rebase(parent, field, &[column]);
        }

        self.writable_column(field, column)?;
        let schema = self.schema.with_column_dropped(field, column)?;
        self.publish(Some(schema), field, column, None)
    }

    /// Rename a writable column. The column is read first, so its data moves with the name
    /// even when it was never fetched.
    pub fn rename_column(
        self: &Arc<Self>,
        field: Field,
        old: &str,
        new: &str,
    ) -> BoxFuture<'static, Result<Arc<AnnoMatrix>>> {
        let this = Arc::clone(self);
        let old = old.to_owned();
        let new = new.to_owned();
        async move {
            if let ProxyKind::View { parent, .. } = &this.kind {
                let parent = parent.rename_column(field, &old, &new).await?;
                return this.rebase(parent, field, &[old.as_str()]);
            }

            this.writable_column(field, &old)?;
            let schema = this.schema.with_column_renamed(field, &old, &new)?;

            let current = this.read_column(field, &old).await?;
            let clone = this.clone_with_schema(schema);
            {
                let mut state = clone.lock_state();
                let cache = state.cache.get(field);
                let renamed = if cache.has_column(&old) {
                    cache.rename_column(&old, &new)?
                } else {
                    cache.with_column(&new, current)?
                };
                *state.cache.get_mut(field) = renamed;
                state.where_cache.forget_label(field, &old);
            }
            Ok(Arc::new(clone))
        }
        .boxed()
    }

    pub fn add_category(
        self: &Arc<Self>,
        field: Field,
        column: &str,
        category: &str,
    ) -> Result<Arc<AnnoMatrix>> {
        if let ProxyKind::View { parent, .. } = &self.kind {
            let parent = parent.add_category(field, column, category)?;
            return self.rebase(parent, field, &[]);
        }

        self.writable_column(field, column)?;
        let schema = self.schema.with_category_added(field, column, category)?;
        Ok(Arc::new(self.clone_with_schema(schema)))
    }

    /// Remove `category`, relabeling every row that carried it to `fallback`.
    pub fn remove_category(
        self: &Arc<Self>,
        field: Field,
        column: &str,
        category: &str,
        fallback: &str,
    ) -> BoxFuture<'static, Result<Arc<AnnoMatrix>>> {
        let this = Arc::clone(self);
        let column = column.to_owned();
        let category = category.to_owned();
        let fallback = fallback.to_owned();
        async move {
            if let ProxyKind::View { parent, .. } = &this.kind {
                let parent = parent
                    .remove_category(field, &column, &category, &fallback)
                    .await?;
                return this.rebase(parent, field, &[column.as_str()]);
            }

            this.writable_column(field, &column)?;
            let categories = this.schema.categories(field, &column, &category)?;
            if !categories.contains(&category) {
                return Err(invalid_category(field, &column, &category, "no such category"));
            }
            if fallback == category || !categories.contains(&fallback) {
                return Err(invalid_category(
                    field,
                    &column,
                    &fallback,
                    "fallback must be another existing category",
                ));
            }
            let schema = this.schema.with_category_removed(field, &column, &category)?;

            let current = this.read_column(field, &column).await?;
            let relabeled = current.replace_value(
                &column,
                &Value::from(category.as_str()),
                &Value::from(fallback.as_str()),
            )?;
            this.publish(Some(schema), field, &column, Some(relabeled))
        }
        .boxed()
    }

    /// Set `value` on every row labeled in `labels` (base-dataset row labels).
    pub fn set_column_values(
        self: &Arc<Self>,
        field: Field,
        column: &str,
        labels: &[u32],
        value: Value,
    ) -> BoxFuture<'static, Result<Arc<AnnoMatrix>>> {
        let this = Arc::clone(self);
        let column = column.to_owned();
        let labels = labels.to_vec();
        async move {
            let rows = this.rows(field);
            if let Some(&label) = labels.iter().find(|&&label| !rows.contains(label)) {
                return Err(MatrixError::UnknownRowLabel { label });
            }
            if let ProxyKind::View { parent, .. } = &this.kind {
                let parent = parent
                    .set_column_values(field, &column, &labels, value)
                    .await?;
                return this.rebase(parent, field, &[column.as_str()]);
            }

            let schema = this.writable_column(field, &column)?;
            check_value(field, schema, &value)?;

            let current = this.read_column(field, &column).await?;
            let offsets = rows.offsets_for(&labels)?;
            let updated = current.with_values_at(&column, &offsets, &value)?;
            this.publish(None, field, &column, Some(updated))
        }
        .boxed()
    }

    /// Replace every occurrence of `old` in the column with `new`.
    pub fn reset_column_values(
        self: &Arc<Self>,
        field: Field,
        column: &str,
        old: Value,
        new: Value,
    ) -> BoxFuture<'static, Result<Arc<AnnoMatrix>>> {
        let this = Arc::clone(self);
        let column = column.to_owned();
        async move {
            if let ProxyKind::View { parent, .. } = &this.kind {
                let parent = parent
                    .reset_column_values(field, &column, old, new)
                    .await?;
                return this.rebase(parent, field, &[column.as_str()]);
            }

            let schema = this.writable_column(field, &column)?;
            check_type(field, schema, &old)?;
            check_value(field, schema, &new)?;

            let current = this.read_column(field, &column).await?;
            let updated = current.replace_value(&column, &old, &new)?;
            this.publish(None, field, &column, Some(updated))
        }
        .boxed()
    }

    /// The schema entry of a column the mutation family may edit.
    fn writable_column(&self, field: Field, column: &str) -> Result<&ColumnSchema> {
        if !field.is_annotation() {
            return Err(unwritable(field, column, "field is read-only"));
        }
        let schema = self.schema.require(field, column)?;
        if !schema.writable {
            return Err(unwritable(field, column, "column is read-only"));
        }
        Ok(schema)
    }

    async fn read_column(&self, field: Field, column: &str) -> Result<Column> {
        let frame = self
            .fetch(field, &[Query::column(column)], None)
            .await?;
        frame
            .column(column)
            .cloned()
            .ok_or_else(|| MatrixError::UnknownColumn {
                field,
                column: column.to_owned(),
            })
    }

    /// Clone, swap in `schema` if given, then replace (or drop, with `None`) one cached column.
    fn publish(
        &self,
        schema: Option<IndexedSchema>,
        field: Field,
        label: &str,
        data: Option<Column>,
    ) -> Result<Arc<AnnoMatrix>> {
        let clone = match schema {
            Some(schema) => self.clone_with_schema(schema),
            None => self.clone_proxy(),
        };
        {
            let mut state = clone.lock_state();
            let updated = match data {
                Some(data) => state.cache.get(field).with_column(label, data)?,
                None => {
                    state.where_cache.forget_label(field, label);
                    state.cache.get(field).drop_columns(&[label])
                }
            };
            *state.cache.get_mut(field) = updated;
        }
        Ok(Arc::new(clone))
    }
}

fn unwritable(field: Field, column: &str, reason: &str) -> MatrixError {
    MatrixError::UnwritableColumn {
        field,
        column: column.to_owned(),
        reason: reason.to_owned(),
    }
}

fn check_type(field: Field, schema: &ColumnSchema, value: &Value) -> Result<()> {
    let expected = schema.column_type.backing_type();
    if value.column_type() != expected {
        return Err(unwritable(
            field,
            &schema.name,
            &format!("expected {expected} values, got {}", value.column_type()),
        ));
    }
    Ok(())
}

fn check_value(field: Field, schema: &ColumnSchema, value: &Value) -> Result<()> {
    check_type(field, schema, value)?;
    if let (Some(categories), Some(category)) = (&schema.categories, value.as_str()) {
        if schema.is_categorical() && !categories.iter().any(|c| c == category) {
            return Err(invalid_category(
                field,
                &schema.name,
                category,
                "not a declared category",
            ));
        }
    }
    Ok(())
}

fn check_values(field: Field, schema: &ColumnSchema, values: &Column) -> Result<()> {
    let expected = schema.column_type.backing_type();
    if values.column_type() != expected {
        return Err(unwritable(
            field,
            &schema.name,
            &format!("expected {expected} values, got {}", values.column_type()),
        ));
    }
    if let (true, Some(categories), Some(strings)) = (
        schema.is_categorical(),
        &schema.categories,
        values.as_strings(),
    ) {
        if let Some(stray) = strings
            .iter()
            .find(|value| !categories.iter().any(|c| c.as_str() == value.as_ref()))
        {
            return Err(invalid_category(
                field,
                &schema.name,
                stray,
                "not a declared category",
            ));
        }
    }
    Ok(())
}
