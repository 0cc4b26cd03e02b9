use crate::error::{FrameError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps row labels (base-dataset row numbers) to row offsets within a frame.
///
/// Root frames use [`RowIndex::Identity`], where label and offset coincide. Row-subset views
/// carry an explicit label list.
#[derive(Clone, Debug)]
pub enum RowIndex {
    Identity(usize),
    Labels {
        labels: Arc<[u32]>,
        offsets: Arc<HashMap<u32, usize>>,
    },
}

impl RowIndex {
    pub fn identity(rows: usize) -> Self {
        RowIndex::Identity(rows)
    }

    pub fn from_labels(labels: Vec<u32>) -> Result<Self> {
        let mut offsets = HashMap::with_capacity(labels.len());
        for (offset, &label) in labels.iter().enumerate() {
            if offsets.insert(label, offset).is_some() {
                return Err(FrameError::DuplicateRowLabel(label));
            }
        }
        Ok(RowIndex::Labels {
            labels: labels.into(),
            offsets: Arc::new(offsets),
        })
    }

    pub fn len(&self) -> usize {
        match self {
            RowIndex::Identity(rows) => *rows,
            RowIndex::Labels { labels, .. } => labels.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, label: u32) -> bool {
        self.offset_of(label).is_some()
    }

    pub fn offset_of(&self, label: u32) -> Option<usize> {
        match self {
            RowIndex::Identity(rows) => {
                let offset = label as usize;
                (offset < *rows).then_some(offset)
            }
            RowIndex::Labels { offsets, .. } => offsets.get(&label).copied(),
        }
    }

    pub fn label_at(&self, offset: usize) -> Option<u32> {
        match self {
            RowIndex::Identity(rows) => (offset < *rows).then(|| offset as u32),
            RowIndex::Labels { labels, .. } => labels.get(offset).copied(),
        }
    }

    /// Resolve every label to its offset, failing on the first label not in the index.
    pub fn offsets_for(&self, labels: &[u32]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|&label| {
                self.offset_of(label)
                    .ok_or(FrameError::UnknownRowLabel(label))
            })
            .collect()
    }

    pub fn labels(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).filter_map(move |offset| self.label_at(offset))
    }
}

impl PartialEq for RowIndex {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RowIndex::Identity(a), RowIndex::Identity(b)) => a == b,
            _ => self.len() == other.len() && self.labels().eq(other.labels()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_and_label_indexes_compare_by_labels() {
        let labels = RowIndex::from_labels(vec![0, 1, 2]).unwrap();
        assert_eq!(labels, RowIndex::identity(3));
        assert_ne!(RowIndex::from_labels(vec![2, 1, 0]).unwrap(), RowIndex::identity(3));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        assert_eq!(
            RowIndex::from_labels(vec![4, 7, 4]).unwrap_err(),
            FrameError::DuplicateRowLabel(4)
        );
    }

    #[test]
    fn offsets_for_reports_first_unknown_label() {
        let index = RowIndex::from_labels(vec![10, 20, 30]).unwrap();
        assert_eq!(index.offsets_for(&[30, 10]).unwrap(), vec![2, 0]);
        assert_eq!(
            index.offsets_for(&[10, 11, 12]).unwrap_err(),
            FrameError::UnknownRowLabel(11)
        );
    }
}
