/// Pending multicast update or invalidation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateEntry {
    pub valid: bool,
    /// Update (true) or invalidation (false)
    pub update: bool,
    pub brdcast: bool,
    /// Whether the writer waits for an acknowledge once every L1 answered
    pub rsp: bool,
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    pub nline: u64,
    /// Number of coherence responses still expected
    pub count: usize,
}

impl std::fmt::Display for UpdateEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.valid {
            return write!(f, "-");
        }
        write!(
            f,
            "{}{}(nline={:#x},count={})",
            if self.update { "UPDT" } else { "INVAL" },
            if self.brdcast { ",brdcast" } else { "" },
            self.nline,
            self.count
        )
    }
}

/// Update table (UPT) counting the coherence responses of each
/// outstanding multicast.
#[derive(Debug, Clone)]
pub struct UpdateTab {
    entries: Vec<UpdateEntry>,
}

impl UpdateTab {
    #[must_use]
    pub fn new(lines: usize) -> Self {
        Self {
            entries: vec![UpdateEntry::default(); lines],
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Registers a multicast in the first free entry.
    pub fn set(&mut self, entry: UpdateEntry) -> Option<usize> {
        let index = self.entries.iter().position(|entry| !entry.valid)?;
        self.entries[index] = UpdateEntry {
            valid: true,
            ..entry
        };
        Some(index)
    }

    /// Counts one response, returning how many are still expected.
    ///
    /// Returns `None` for a free entry.
    pub fn decrement(&mut self, index: usize) -> Option<usize> {
        let entry = self.entries.get_mut(index)?;
        if !entry.valid {
            return None;
        }
        assert!(
            entry.count > 0,
            "update table: entry {index} received more responses than expected"
        );
        entry.count -= 1;
        Some(entry.count)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.iter().all(|entry| entry.valid)
    }

    #[must_use]
    pub fn need_rsp(&self, index: usize) -> bool {
        self.entries[index].rsp
    }

    /// Index of a pending invalidation of `nline`.
    #[must_use]
    pub fn search_inval(&self, nline: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.valid && !entry.update && entry.nline == nline)
    }

    /// Whether any multicast on `nline` is pending.
    #[must_use]
    pub fn search(&self, nline: u64) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.valid && entry.nline == nline)
    }

    #[must_use]
    pub fn read_nline(&self, index: usize) -> u64 {
        self.entries[index].nline
    }

    #[must_use]
    pub fn get(&self, index: usize) -> &UpdateEntry {
        &self.entries[index]
    }

    pub fn clear(&mut self, index: usize) {
        self.entries[index].valid = false;
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpdateEntry> + '_ {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{UpdateEntry, UpdateTab};

    fn inval(nline: u64, count: usize) -> UpdateEntry {
        UpdateEntry {
            update: false,
            nline,
            count,
            ..UpdateEntry::default()
        }
    }

    #[test]
    fn test_count_down_to_zero() {
        let mut upt = UpdateTab::new(2);
        let index = upt.set(inval(0x40, 2)).unwrap();
        assert_eq!(upt.decrement(index), Some(1));
        assert_eq!(upt.decrement(index), Some(0));
        upt.clear(index);
        assert_eq!(upt.decrement(index), None);
    }

    #[test]
    fn test_full_table_rejects() {
        let mut upt = UpdateTab::new(1);
        assert!(upt.set(inval(1, 1)).is_some());
        assert!(upt.is_full());
        assert_eq!(upt.set(inval(2, 1)), None);
    }

    #[test]
    fn test_search_inval_ignores_updates() {
        let mut upt = UpdateTab::new(2);
        upt.set(UpdateEntry {
            update: true,
            ..inval(0x40, 1)
        });
        assert_eq!(upt.search_inval(0x40), None);
        assert!(upt.search(0x40));
        let index = upt.set(inval(0x40, 1));
        assert_eq!(upt.search_inval(0x40), index);
        assert_eq!(upt.read_nline(1), 0x40);
    }

    #[test]
    #[should_panic(expected = "more responses than expected")]
    fn test_extra_response_panics() {
        let mut upt = UpdateTab::new(1);
        let index = upt.set(inval(1, 0)).unwrap();
        upt.decrement(index);
    }
}
