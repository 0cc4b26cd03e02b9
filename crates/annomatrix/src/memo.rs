use crate::error::Result;
use annomatrix_frame::Dataframe;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Bounded memo of column sub-selections keyed by (source frame id, selected labels).
///
/// Repeating an identical sub-selection of the same cache frame returns the same
/// [`Dataframe`] instance, so callers can compare results with [`Dataframe::ptr_eq`].
#[derive(Debug)]
pub struct SubsetMemo {
    inner: Mutex<MemoInner>,
}

#[derive(Debug)]
struct MemoInner {
    entries: LruCache<(u64, Vec<String>), Dataframe>,
    stats: MemoStats,
}

impl SubsetMemo {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("memo capacity is non-zero");
        Self {
            inner: Mutex::new(MemoInner {
                entries: LruCache::new(cap),
                stats: MemoStats::default(),
            }),
        }
    }

    pub fn select(&self, source: &Dataframe, labels: &[String]) -> Result<Dataframe> {
        let key = (source.id(), labels.to_vec());
        let mut inner = self.inner.lock().expect("subset memo mutex poisoned");
        if let Some(hit) = inner.entries.get(&key).cloned() {
            inner.stats.hits += 1;
            return Ok(hit);
        }
        let selected = source.select(labels)?;
        inner.stats.misses += 1;
        inner.entries.put(key, selected.clone());
        Ok(selected)
    }

    pub fn stats(&self) -> MemoStats {
        let inner = self.inner.lock().expect("subset memo mutex poisoned");
        MemoStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }
}
