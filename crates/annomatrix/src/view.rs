//! Derived proxies.
//!
//! A view holds the full schema of the base dataset, its own dimensionality and its own
//! caches. Its loads go through the parent's `fetch` and are then transformed.

use crate::error::{MatrixError, Result};
use crate::field::Field;
use crate::proxy::{AnnoMatrix, ProxyKind};
use annomatrix_frame::{Column, Dataframe, RowIndex};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum ViewTransform {
    /// Restrict rows to the given base-dataset row labels, in order.
    RowSubset { rows: RowIndex },
    /// Blank main-matrix values outside each column's `[lower, upper]` quantile range.
    Clip { lower: f64, upper: f64 },
}

impl ViewTransform {
    /// Turn a frame fetched from the parent into this view's frame.
    pub fn apply(&self, field: Field, frame: &Dataframe) -> Result<Dataframe> {
        match self {
            ViewTransform::RowSubset { rows } => match field {
                Field::Var => Ok(frame.clone()),
                Field::Obs | Field::X | Field::Emb => Ok(frame.take_rows(rows)?),
            },
            ViewTransform::Clip { lower, upper } => match field {
                Field::X => Ok(frame.map_columns(|_, column| clip_column(column, *lower, *upper))),
                Field::Obs | Field::Var | Field::Emb => Ok(frame.clone()),
            },
        }
    }
}

fn clip_column(column: &Column, lower: f64, upper: f64) -> Column {
    let (Some(lo), Some(hi)) = (column.quantile(lower), column.quantile(upper)) else {
        return column.clone();
    };
    column.map_f32(|value| if value < lo || value > hi { f32::NAN } else { value })
}

impl AnnoMatrix {
    /// A view restricted to `rows`, given as base-dataset row labels.
    pub fn subset(self: &Arc<Self>, rows: &[u32]) -> Result<Arc<AnnoMatrix>> {
        if let Some(&label) = rows.iter().find(|&&label| !self.obs_index.contains(label)) {
            return Err(MatrixError::UnknownRowLabel { label });
        }
        let index = RowIndex::from_labels(rows.to_vec())?;
        Ok(Arc::new(AnnoMatrix::new_view(
            self,
            ViewTransform::RowSubset {
                rows: index.clone(),
            },
            index,
        )))
    }

    /// A view whose main-matrix values outside the per-column quantile range read as NaN.
    pub fn clip(self: &Arc<Self>, lower: f64, upper: f64) -> Result<Arc<AnnoMatrix>> {
        if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower >= upper {
            return Err(MatrixError::InvalidQuery {
                field: Field::X,
                reason: format!("invalid clip range [{lower}, {upper}]"),
            });
        }
        Ok(Arc::new(AnnoMatrix::new_view(
            self,
            ViewTransform::Clip { lower, upper },
            self.obs_index.clone(),
        )))
    }

    /// Re-derive this view on top of `parent`, which carries a mutation of the old parent.
    ///
    /// Cached columns named in `stale` are dropped from `field` so they are re-read through
    /// the new parent.
    pub(crate) fn rebase(
        &self,
        parent: Arc<AnnoMatrix>,
        field: Field,
        stale: &[&str],
    ) -> Result<Arc<AnnoMatrix>> {
        let ProxyKind::View { transform, .. } = &self.kind else {
            return Err(MatrixError::InvalidQuery {
                field,
                reason: "only views can be rebased".to_owned(),
            });
        };
        let mut view = self.clone_with_schema(parent.schema().clone());
        view.kind = ProxyKind::View {
            parent,
            transform: transform.clone(),
        };
        {
            let mut state = view.lock_state();
            let pruned = state.cache.get(field).drop_columns(stale);
            *state.cache.get_mut(field) = pruned;
            for label in stale {
                state.where_cache.forget_label(field, label);
            }
        }
        Ok(Arc::new(view))
    }
}
