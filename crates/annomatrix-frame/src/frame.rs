use crate::column::Column;
use crate::error::{FrameError, Result};
use crate::index::RowIndex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// An immutable, label-addressed columnar container.
///
/// Every update returns a new frame that shares the untouched column payloads with its source.
/// Each frame carries a process-unique [`Dataframe::id`], which callers can use as a memo key
/// for derived sub-selections.
#[derive(Clone)]
pub struct Dataframe {
    inner: Arc<FrameInner>,
}

struct FrameInner {
    id: u64,
    index: RowIndex,
    labels: Vec<String>,
    columns: Vec<Column>,
    by_label: HashMap<String, usize>,
}

impl Dataframe {
    /// A frame with no columns over `index`.
    pub fn empty(index: RowIndex) -> Self {
        Self::build(index, Vec::new(), Vec::new())
    }

    pub fn from_columns<I, S>(index: RowIndex, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut labels = Vec::new();
        let mut data = Vec::new();
        let mut seen = HashMap::new();
        for (label, column) in columns {
            let label = label.into();
            check_len(&label, &column, index.len())?;
            if seen.insert(label.clone(), ()).is_some() {
                return Err(FrameError::DuplicateColumn(label));
            }
            labels.push(label);
            data.push(column);
        }
        Ok(Self::build(index, labels, data))
    }

    fn build(index: RowIndex, labels: Vec<String>, columns: Vec<Column>) -> Self {
        let by_label = labels
            .iter()
            .enumerate()
            .map(|(idx, label)| (label.clone(), idx))
            .collect();
        Self {
            inner: Arc::new(FrameInner {
                id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
                index,
                labels,
                columns,
                by_label,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether both handles point at the same frame instance.
    pub fn ptr_eq(&self, other: &Dataframe) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn row_index(&self) -> &RowIndex {
        &self.inner.index
    }

    pub fn row_count(&self) -> usize {
        self.inner.index.len()
    }

    pub fn column_count(&self) -> usize {
        self.inner.columns.len()
    }

    /// A frame is empty when it holds no columns.
    pub fn is_empty(&self) -> bool {
        self.inner.columns.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.inner.labels
    }

    pub fn has_column(&self, label: &str) -> bool {
        self.inner.by_label.contains_key(label)
    }

    pub fn column(&self, label: &str) -> Option<&Column> {
        let idx = *self.inner.by_label.get(label)?;
        self.inner.columns.get(idx)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.inner
            .labels
            .iter()
            .map(String::as_str)
            .zip(self.inner.columns.iter())
    }

    /// Add `column` under `label`, replacing any existing column with that label.
    pub fn with_column(&self, label: impl Into<String>, column: Column) -> Result<Self> {
        let label = label.into();
        check_len(&label, &column, self.row_count())?;
        let mut labels = self.inner.labels.clone();
        let mut columns = self.inner.columns.clone();
        match self.inner.by_label.get(&label) {
            Some(&idx) => columns[idx] = column,
            None => {
                labels.push(label);
                columns.push(column);
            }
        }
        Ok(Self::build(self.inner.index.clone(), labels, columns))
    }

    /// Merge every column of `other` into this frame. Columns already present are replaced.
    pub fn with_columns_from(&self, other: &Dataframe) -> Result<Self> {
        if other.row_count() != self.row_count() {
            return Err(FrameError::RowCountMismatch {
                expected: self.row_count(),
                actual: other.row_count(),
            });
        }
        let mut labels = self.inner.labels.clone();
        let mut columns = self.inner.columns.clone();
        let mut by_label = self.inner.by_label.clone();
        for (label, column) in other.columns() {
            match by_label.get(label) {
                Some(&idx) => columns[idx] = column.clone(),
                None => {
                    by_label.insert(label.to_owned(), labels.len());
                    labels.push(label.to_owned());
                    columns.push(column.clone());
                }
            }
        }
        Ok(Self::build(self.inner.index.clone(), labels, columns))
    }

    pub fn drop_column(&self, label: &str) -> Result<Self> {
        if !self.has_column(label) {
            return Err(FrameError::UnknownColumn(label.to_owned()));
        }
        Ok(self.drop_columns(&[label]))
    }

    /// Drop every listed column that is present; missing labels are ignored.
    pub fn drop_columns<S: AsRef<str>>(&self, drop: &[S]) -> Self {
        let (labels, columns): (Vec<String>, Vec<Column>) = self
            .columns()
            .filter(|(label, _)| !drop.iter().any(|d| d.as_ref() == *label))
            .map(|(label, column)| (label.to_owned(), column.clone()))
            .unzip();
        Self::build(self.inner.index.clone(), labels, columns)
    }

    pub fn rename_column(&self, old: &str, new: &str) -> Result<Self> {
        let Some(&idx) = self.inner.by_label.get(old) else {
            return Err(FrameError::UnknownColumn(old.to_owned()));
        };
        if old != new && self.has_column(new) {
            return Err(FrameError::DuplicateColumn(new.to_owned()));
        }
        let mut labels = self.inner.labels.clone();
        labels[idx] = new.to_owned();
        Ok(Self::build(
            self.inner.index.clone(),
            labels,
            self.inner.columns.clone(),
        ))
    }

    /// Sub-select exactly `labels`, in the given order.
    pub fn select<S: AsRef<str>>(&self, labels: &[S]) -> Result<Self> {
        let mut out_labels = Vec::with_capacity(labels.len());
        let mut out_columns = Vec::with_capacity(labels.len());
        for label in labels {
            let label = label.as_ref();
            let column = self
                .column(label)
                .ok_or_else(|| FrameError::UnknownColumn(label.to_owned()))?;
            out_labels.push(label.to_owned());
            out_columns.push(column.clone());
        }
        Ok(Self::build(self.inner.index.clone(), out_labels, out_columns))
    }

    /// Restrict the frame to the rows labeled in `index`, in that order.
    pub fn take_rows(&self, index: &RowIndex) -> Result<Self> {
        let labels: Vec<u32> = index.labels().collect();
        let offsets = self.inner.index.offsets_for(&labels)?;
        let columns = self
            .inner
            .columns
            .iter()
            .map(|column| column.take(&offsets))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::build(index.clone(), self.inner.labels.clone(), columns))
    }

    /// Rebuild every column through `f`, keeping labels and row index.
    pub fn map_columns(&self, f: impl Fn(&str, &Column) -> Column) -> Self {
        let columns = self.columns().map(|(label, column)| f(label, column)).collect();
        Self::build(self.inner.index.clone(), self.inner.labels.clone(), columns)
    }
}

fn check_len(label: &str, column: &Column, rows: usize) -> Result<()> {
    if column.len() != rows {
        return Err(FrameError::LengthMismatch {
            column: label.to_owned(),
            expected: rows,
            actual: column.len(),
        });
    }
    Ok(())
}

impl PartialEq for Dataframe {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.inner.index == other.inner.index
                && self.inner.labels == other.inner.labels
                && self.inner.columns == other.inner.columns)
    }
}

impl fmt::Debug for Dataframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataframe")
            .field("id", &self.inner.id)
            .field("rows", &self.row_count())
            .field("labels", &self.inner.labels)
            .finish()
    }
}
