use crate::vci;

/// Pending transaction with the external memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionEntry {
    pub valid: bool,
    /// Line fetch (true) or write back (false)
    pub xram_read: bool,
    pub nline: u64,
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    /// Whether a processor read waits for the line
    pub proc_read: bool,
    pub cached: bool,
    pub instruction: bool,
    pub read_length: usize,
    pub word_index: usize,
    pub data: Vec<u32>,
    pub be: Vec<u8>,
    /// The external memory answered with an error
    pub error: bool,
}

impl TransactionEntry {
    fn new(words: usize) -> Self {
        Self {
            data: vec![0; words],
            be: vec![0; words],
            ..Self::default()
        }
    }

    /// Whether any word was written by a processor while the line was fetched.
    #[must_use]
    pub fn has_writes(&self) -> bool {
        self.be.iter().any(|&be| be != 0)
    }
}

impl std::fmt::Display for TransactionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.valid {
            return write!(f, "-");
        }
        write!(
            f,
            "{}(nline={:#x}{})",
            if self.xram_read { "GET" } else { "PUT" },
            self.nline,
            if self.proc_read {
                format!(",src={}", self.srcid)
            } else {
                String::new()
            }
        )
    }
}

/// Parameters of a new transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction<'a> {
    pub xram_read: bool,
    pub nline: u64,
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    pub proc_read: bool,
    pub cached: bool,
    pub instruction: bool,
    pub read_length: usize,
    pub word_index: usize,
    /// Initial line content, zero if empty
    pub data: &'a [u32],
    pub be: &'a [u8],
}

/// Transaction table (TRT) of the external memory interface.
///
/// A fetch carries the processor writes that hit the line while it
/// was in flight, merged under their byte enables.
#[derive(Debug, Clone)]
pub struct TransactionTab {
    entries: Vec<TransactionEntry>,
    words: usize,
}

impl TransactionTab {
    #[must_use]
    pub fn new(lines: usize, words: usize) -> Self {
        Self {
            entries: (0..lines).map(|_| TransactionEntry::new(words)).collect(),
            words,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Index of the first free entry, `None` when the table is full.
    #[must_use]
    pub fn free_index(&self) -> Option<usize> {
        self.entries.iter().position(|entry| !entry.valid)
    }

    /// Index of a pending fetch of `nline`.
    #[must_use]
    pub fn hit_read(&self, nline: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.valid && entry.xram_read && entry.nline == nline)
    }

    /// Whether a write back of `nline` is pending.
    #[must_use]
    pub fn hit_write(&self, nline: u64) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.valid && !entry.xram_read && entry.nline == nline)
    }

    /// Whether any transaction on `nline` is pending.
    #[must_use]
    pub fn hit(&self, nline: u64) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.valid && entry.nline == nline)
    }

    pub fn set(&mut self, index: usize, new: &NewTransaction<'_>) {
        let words = self.words;
        let entry = &mut self.entries[index];
        entry.valid = true;
        entry.xram_read = new.xram_read;
        entry.nline = new.nline;
        entry.srcid = new.srcid;
        entry.trdid = new.trdid;
        entry.pktid = new.pktid;
        entry.proc_read = new.proc_read;
        entry.cached = new.cached;
        entry.instruction = new.instruction;
        entry.read_length = new.read_length;
        entry.word_index = new.word_index;
        entry.error = false;
        for word in 0..words {
            entry.data[word] = new.data.get(word).copied().unwrap_or(0);
            entry.be[word] = new.be.get(word).copied().unwrap_or(0);
        }
    }

    /// Merges a processor write into a pending fetch.
    ///
    /// Byte enables accumulate and written bytes replace older ones.
    pub fn write_data_mask(&mut self, index: usize, be: &[u8], data: &[u32]) {
        let entry = &mut self.entries[index];
        assert!(entry.valid, "transaction table: write into free entry {index}");
        for (word, (&be, &data)) in be.iter().zip(data).enumerate() {
            entry.be[word] |= be;
            entry.data[word] = vci::merge_bytes(entry.data[word], data, be);
        }
    }

    /// Stores the fetched line, keeping the bytes written by processors.
    pub fn write_rsp(&mut self, index: usize, data: &[u32], error: bool) {
        let entry = &mut self.entries[index];
        assert!(
            entry.valid && entry.xram_read,
            "transaction table: response for entry {index} without a pending fetch"
        );
        for (word, &rdata) in data.iter().enumerate() {
            let mask = vci::be_to_mask(entry.be[word]);
            entry.data[word] = (entry.data[word] & mask) | (rdata & !mask);
        }
        entry.error |= error;
    }

    pub fn erase(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        entry.valid = false;
        entry.error = false;
        entry.be.fill(0);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> &TransactionEntry {
        &self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionEntry> + '_ {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{NewTransaction, TransactionTab};
    use color_eyre::eyre;
    use pretty_assertions_sorted as diff;

    fn fetch(nline: u64) -> NewTransaction<'static> {
        NewTransaction {
            xram_read: true,
            nline,
            srcid: 1,
            trdid: 0,
            pktid: 0,
            proc_read: true,
            cached: true,
            instruction: false,
            read_length: 4,
            word_index: 0,
            data: &[],
            be: &[],
        }
    }

    #[test]
    fn test_processor_writes_win_over_fetched_data() -> eyre::Result<()> {
        let mut trt = TransactionTab::new(2, 4);
        let index = trt.free_index().unwrap();
        trt.set(index, &fetch(0x10));
        trt.write_data_mask(index, &[0, 0b0011, 0, 0], &[0, 0x0000_BEEF, 0, 0]);
        trt.write_data_mask(index, &[0, 0b0001, 0, 0], &[0, 0x0000_00AA, 0, 0]);
        trt.write_rsp(index, &[1, 0x1234_5678, 3, 4], false);
        let entry = trt.get(index);
        diff::assert_eq!(entry.data, vec![1, 0x1234_BEAA, 3, 4]);
        diff::assert_eq!(entry.be, vec![0, 0b0011, 0, 0]);
        assert!(entry.has_writes());
        Ok(())
    }

    #[test]
    fn test_hit_read_and_hit_write() {
        let mut trt = TransactionTab::new(2, 4);
        trt.set(0, &fetch(0x10));
        trt.set(
            1,
            &NewTransaction {
                xram_read: false,
                proc_read: false,
                ..fetch(0x20)
            },
        );
        assert_eq!(trt.hit_read(0x10), Some(0));
        assert_eq!(trt.hit_read(0x20), None);
        assert!(trt.hit_write(0x20));
        assert!(!trt.hit_write(0x10));
        assert_eq!(trt.free_index(), None);

        trt.erase(0);
        assert_eq!(trt.free_index(), Some(0));
        assert!(!trt.hit(0x10));
    }

    #[test]
    fn test_error_flag_is_sticky_until_erase() {
        let mut trt = TransactionTab::new(1, 2);
        trt.set(0, &fetch(0x1));
        trt.write_rsp(0, &[0, 0], true);
        assert!(trt.get(0).error);
        trt.erase(0);
        trt.set(0, &fetch(0x1));
        assert!(!trt.get(0).error);
    }

    #[test]
    #[should_panic(expected = "without a pending fetch")]
    fn test_response_for_free_entry_panics() {
        let mut trt = TransactionTab::new(1, 2);
        trt.write_rsp(0, &[0, 0], false);
    }
}
