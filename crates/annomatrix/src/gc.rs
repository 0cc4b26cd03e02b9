//! Recency-based eviction policy.
//!
//! The policy itself is pure: given the resident labels of one field, a cap, a protection
//! predicate and the last-access table, [`select_victims`] names the columns to drop. The proxy
//! applies the result under its state lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcHints {
    /// The live proxy only sweeps the main matrix, with the larger caps.
    pub is_hot: bool,
}

impl GcHints {
    pub fn hot() -> Self {
        Self { is_hot: true }
    }

    pub fn cold() -> Self {
        Self { is_hot: false }
    }
}

/// Monotonic logical clock for access bookkeeping, shared by a proxy and its clones.
#[derive(Debug, Default)]
pub struct AccessClock {
    ticks: AtomicU64,
}

impl AccessClock {
    pub fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Pick the least-recently-used unprotected labels beyond `cap`.
///
/// Labels with no recorded access sort first. Ties keep resident order.
pub fn select_victims<'a, I>(
    resident: I,
    cap: usize,
    is_protected: impl Fn(&str) -> bool,
    last_access: &HashMap<String, u64>,
) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidates: Vec<(u64, &str)> = resident
        .into_iter()
        .filter(|label| !is_protected(label))
        .map(|label| (last_access.get(label).copied().unwrap_or(0), label))
        .collect();
    if candidates.len() <= cap {
        return Vec::new();
    }
    candidates.sort_by_key(|(tick, _)| *tick);
    let excess = candidates.len() - cap;
    candidates
        .into_iter()
        .take(excess)
        .map(|(_, label)| label.to_owned())
        .collect()
}
