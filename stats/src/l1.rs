use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::IntoEnumIterator;

/// Activity counters of a coherent L1 cache controller.
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
    READ = 0,
    WRITE,
    DATA_MISS,
    INS_MISS,
    UNC_READ,
    WRITE_CACHED,
    /// Cycles in which the processor waited on a request
    FROZEN_CYCLES,
    COST_WRITE_FRZ,
    COST_DATA_MISS_FRZ,
    COST_UNC_READ_FRZ,
    COST_INS_MISS_FRZ,
    IMISS_TRANSACTION,
    DMISS_TRANSACTION,
    UNC_TRANSACTION,
    WRITE_TRANSACTION,
    /// Cumulated number of words over all write transactions
    WRITE_TRANSACTION_LENGTH,
    CC_UPDATE,
    CC_INVAL,
    CLEANUP,
    WRITE_BERR,
}

pub type L1CsvRow = (Counter, u64);

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1 {
    pub counters: HashMap<Counter, u64>,
}

impl Default for L1 {
    fn default() -> Self {
        let counters = Counter::iter().map(|counter| (counter, 0)).collect();
        Self { counters }
    }
}

impl std::fmt::Debug for L1 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut counters: Vec<_> = self
            .counters
            .iter()
            .filter(|(_, &count)| count > 0)
            .collect();
        counters.sort_by_key(|(counter, _)| **counter);

        let mut out = f.debug_struct("L1Stats");
        for (counter, count) in counters {
            out.field(&format!("{counter:?}"), count);
        }
        out.finish_non_exhaustive()
    }
}

impl std::ops::AddAssign for L1 {
    fn add_assign(&mut self, other: Self) {
        for (k, v) in other.counters {
            *self.counters.entry(k).or_insert(0) += v;
        }
    }
}

impl L1 {
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
    pub fn flatten(self) -> Vec<L1CsvRow> {
        let mut flattened: Vec<_> = self.counters.into_iter().collect();
        flattened.sort_by_key(|(counter, _)| *counter);
        flattened
    }

    /// Average length in words of the write bursts.
    #[must_use]
    pub fn mean_write_length(&self) -> Option<f64> {
        let transactions = self.get(Counter::WRITE_TRANSACTION);
        if transactions == 0 {
            return None;
        }
        Some(self.get(Counter::WRITE_TRANSACTION_LENGTH) as f64 / transactions as f64)
    }
}

pub type PerL1CsvRow = (usize, L1CsvRow);

#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerL1(pub Vec<L1>);

impl PerL1 {
    #[must_use]
    pub fn new(num_procs: usize) -> Self {
        Self(vec![L1::default(); num_procs])
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<L1> {
        self.0
    }

    #[must_use]
    pub fn flatten(self) -> Vec<PerL1CsvRow> {
        self.into_inner()
            .into_iter()
            .enumerate()
            .flat_map(|(id, l1)| l1.flatten().into_iter().map(move |row| (id, row)))
            .collect()
    }

    #[must_use]
    pub fn reduce(&self) -> L1 {
        let mut out = L1::default();
        for stats in &self.0 {
            out += stats.clone();
        }
        out
    }
}

impl std::ops::Deref for PerL1 {
    type Target = Vec<L1>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for PerL1 {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
