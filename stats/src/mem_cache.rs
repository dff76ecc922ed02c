use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::IntoEnumIterator;

/// Activity counters of the coherence directory.
#[derive(
    Debug,
    strum::EnumIter,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum Counter {
    CYCLES = 0,
    READ,
    READ_MISS,
    WRITE,
    WRITE_MISS,
    /// Number of words written by write bursts
    WRITE_CELLS,
    /// Dirty victims written back to external memory
    WRITE_DIRTY,
    UPDATE,
    /// Sum of update targets
    UPDATE_MULT,
    INVAL,
    /// Sum of invalidate targets
    INVAL_MULT,
    INVAL_BRDCAST,
    CLEANUP,
    LL,
    SC,
    SC_FAIL,
}

pub type MemCacheCsvRow = (Counter, u64);

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemCache {
    pub counters: HashMap<Counter, u64>,
}

impl Default for MemCache {
    fn default() -> Self {
        let counters = Counter::iter().map(|counter| (counter, 0)).collect();
        Self { counters }
    }
}

impl std::fmt::Debug for MemCache {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut counters: Vec<_> = self
            .counters
            .iter()
            .filter(|(_, &count)| count > 0)
            .collect();
        counters.sort_by_key(|(counter, _)| **counter);

        let mut out = f.debug_struct("MemCacheStats");
        for (counter, count) in counters {
            out.field(&format!("{counter:?}"), count);
        }
        out.finish_non_exhaustive()
    }
}

impl std::ops::AddAssign for MemCache {
    fn add_assign(&mut self, other: Self) {
        for (k, v) in other.counters {
            *self.counters.entry(k).or_insert(0) += v;
        }
    }
}

impl MemCache {
    #[inline]
    pub fn inc(&mut self, counter: Counter, count: u64) {
        *self.counters.entry(counter).or_insert(0) += count;
    }

    #[inline]
    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn flatten(self) -> Vec<MemCacheCsvRow> {
        let mut flattened: Vec<_> = self.counters.into_iter().collect();
        flattened.sort_by_key(|(counter, _)| *counter);
        flattened
    }

    /// Fraction of reads that required an external memory fetch.
    #[must_use]
    pub fn read_miss_rate(&self) -> Option<f64> {
        let reads = self.get(Counter::READ);
        if reads == 0 {
            return None;
        }
        Some(self.get(Counter::READ_MISS) as f64 / reads as f64)
    }

    /// Average number of copies targeted per multicast update.
    #[must_use]
    pub fn mean_update_targets(&self) -> Option<f64> {
        let updates = self.get(Counter::UPDATE);
        if updates == 0 {
            return None;
        }
        Some(self.get(Counter::UPDATE_MULT) as f64 / updates as f64)
    }
}
