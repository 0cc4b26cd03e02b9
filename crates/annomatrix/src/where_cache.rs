use crate::field::{Field, PerField};
use crate::query::{NormalizedQuery, QueryKey};
use crate::schema::IndexedSchema;
use std::collections::HashMap;

/// Per-field memo of query key to the concrete column labels it resolved to.
///
/// Advisory only: dropping an entry costs at most a repeated load.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WhereCache {
    fields: PerField<HashMap<QueryKey, Vec<String>>>,
}

impl WhereCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The contribution of one completed load.
    pub fn for_result(query: &NormalizedQuery, labels: Vec<String>) -> Self {
        let mut cache = Self::new();
        cache.insert(query.field, query.key.clone(), labels);
        cache
    }

    pub fn get(&self, field: Field, key: &QueryKey) -> Option<&[String]> {
        self.fields.get(field).get(key).map(Vec::as_slice)
    }

    pub fn insert(&mut self, field: Field, key: QueryKey, labels: Vec<String>) {
        self.fields.get_mut(field).insert(key, labels);
    }

    /// Resolve `query` to concrete labels, or `None` while it is still unresolved.
    ///
    /// Never performs I/O.
    pub fn resolve(&self, query: &NormalizedQuery, schema: &IndexedSchema) -> Option<Vec<String>> {
        match self.get(query.field, &query.key) {
            Some(labels) => Some(labels.to_vec()),
            None => query.static_labels(schema),
        }
    }

    /// Union `other` into this cache. Labels for a shared key are unioned in order.
    pub fn merge_from(&mut self, other: &WhereCache) {
        for field in Field::ALL {
            let ours = self.fields.get_mut(field);
            for (key, labels) in other.fields.get(field) {
                let entry = ours.entry(key.clone()).or_default();
                for label in labels {
                    if !entry.contains(label) {
                        entry.push(label.clone());
                    }
                }
            }
        }
    }

    pub fn merged(&self, other: &WhereCache) -> Self {
        let mut out = self.clone();
        out.merge_from(other);
        out
    }

    /// Forget every entry of `field` that resolved to `label`.
    pub fn forget_label(&mut self, field: Field, label: &str) {
        self.fields
            .get_mut(field)
            .retain(|_, labels| !labels.iter().any(|l| l == label));
    }

    pub fn len(&self, field: Field) -> usize {
        self.fields.get(field).len()
    }

    pub fn is_empty(&self) -> bool {
        Field::ALL.iter().all(|&field| self.len(field) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_is_a_non_destructive_union() {
        let mut left = WhereCache::new();
        left.insert(Field::X, QueryKey::raw("a"), labels(&["1", "2"]));
        let mut right = WhereCache::new();
        right.insert(Field::X, QueryKey::raw("a"), labels(&["2", "3"]));
        right.insert(Field::X, QueryKey::raw("b"), labels(&["7"]));

        let merged = left.merged(&right);
        assert_eq!(merged.get(Field::X, &QueryKey::raw("a")), Some(&labels(&["1", "2", "3"])[..]));
        assert_eq!(merged.get(Field::X, &QueryKey::raw("b")), Some(&labels(&["7"])[..]));
        assert_eq!(left.len(Field::X), 1);
        assert_eq!(merged.len(Field::Obs), 0);
    }

    #[test]
    fn forgetting_a_label_drops_every_entry_that_used_it() {
        let mut cache = WhereCache::new();
        cache.insert(Field::X, QueryKey::raw("a"), labels(&["1", "2"]));
        cache.insert(Field::X, QueryKey::raw("b"), labels(&["3"]));
        cache.forget_label(Field::X, "2");
        assert_eq!(cache.get(Field::X, &QueryKey::raw("a")), None);
        assert!(cache.get(Field::X, &QueryKey::raw("b")).is_some());
        assert!(!cache.is_empty());
    }
}
