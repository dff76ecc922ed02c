#![allow(non_camel_case_types, clippy::upper_case_acronyms)]

pub mod l1;
pub mod mem_cache;
pub mod sim;

pub use l1::{PerL1, L1};
pub use mem_cache::MemCache;
pub use sim::Sim;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub sim: Sim,
    pub l1: PerL1,
    pub mem_cache: MemCache,
}

/// A single row of the flattened statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvRow {
    pub component: String,
    pub id: Option<usize>,
    pub counter: String,
    pub value: u64,
}

impl Stats {
    #[must_use]
    pub fn new(num_procs: usize) -> Self {
        Self {
            sim: Sim::default(),
            l1: PerL1::new(num_procs),
            mem_cache: MemCache::default(),
        }
    }

    #[must_use]
    pub fn flatten(self) -> Vec<CsvRow> {
        let Self { sim, l1, mem_cache } = self;
        let mut rows = vec![
            CsvRow {
                component: "sim".to_string(),
                id: None,
                counter: "cycles".to_string(),
                value: sim.cycles,
            },
            CsvRow {
                component: "sim".to_string(),
                id: None,
                counter: "retired".to_string(),
                value: sim.retired,
            },
            CsvRow {
                component: "sim".to_string(),
                id: None,
                counter: "idle_cycles".to_string(),
                value: sim.idle_cycles,
            },
        ];
        rows.extend(l1.flatten().into_iter().map(|(id, (counter, value))| CsvRow {
            component: "l1".to_string(),
            id: Some(id),
            counter: format!("{counter:?}"),
            value,
        }));
        rows.extend(
            mem_cache
                .flatten()
                .into_iter()
                .map(|(counter, value)| CsvRow {
                    component: "mem_cache".to_string(),
                    id: None,
                    counter: format!("{counter:?}"),
                    value,
                }),
        );
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::{l1, mem_cache, Stats};
    use color_eyre::eyre;
    use pretty_assertions_sorted as diff;

    #[test]
    fn test_per_l1_reduce_sums_counters() {
        let mut stats = Stats::new(2);
        stats.l1[0].inc(l1::Counter::READ, 3);
        stats.l1[1].inc(l1::Counter::READ, 4);
        stats.l1[1].inc(l1::Counter::CC_INVAL, 1);
        let total = stats.l1.reduce();
        assert_eq!(total.get(l1::Counter::READ), 7);
        assert_eq!(total.get(l1::Counter::CC_INVAL), 1);
        assert_eq!(total.get(l1::Counter::WRITE), 0);
    }

    #[test]
    fn test_flatten_is_sorted_per_component() {
        let mut stats = Stats::new(1);
        stats.sim.cycles = 10;
        stats.mem_cache.inc(mem_cache::Counter::SC_FAIL, 2);
        let rows = stats.flatten();
        assert_eq!(rows[0].counter, "cycles");
        assert_eq!(rows[0].value, 10);
        let sc_fail = rows
            .iter()
            .find(|row| row.component == "mem_cache" && row.counter == "SC_FAIL")
            .unwrap();
        assert_eq!(sc_fail.value, 2);
        let l1_rows: Vec<_> = rows.iter().filter(|row| row.component == "l1").collect();
        assert!(l1_rows.iter().all(|row| row.id == Some(0)));
        assert_eq!(l1_rows[0].counter, "READ");
    }

    #[test]
    fn test_stats_serde() -> eyre::Result<()> {
        let mut stats = Stats::new(2);
        stats.mem_cache.inc(mem_cache::Counter::UPDATE, 1);
        stats.mem_cache.inc(mem_cache::Counter::UPDATE_MULT, 3);
        let json = serde_json::to_string(&stats)?;
        let decoded: Stats = serde_json::from_str(&json)?;
        diff::assert_eq!(decoded, stats);
        assert_eq!(decoded.mem_cache.mean_update_targets(), Some(3.0));
        Ok(())
    }
}
