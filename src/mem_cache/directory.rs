use crate::{address, logb2};
use bitvec::vec::BitVec;

/// The L1 caches holding a copy of a line.
///
/// Copies are tracked exactly as two bitmasks (one bit per processor
/// for the data and the instruction caches) until their number reaches
/// the copies limit. From then on only their number is known and an
/// update of the line has to be broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Copies {
    Exact { d_copies: u64, i_copies: u64 },
    Counter,
}

impl Default for Copies {
    fn default() -> Self {
        Self::Exact {
            d_copies: 0,
            i_copies: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectoryEntry {
    pub valid: bool,
    pub dirty: bool,
    /// Set by LL/SC hits, only a replacement hint
    pub lock: bool,
    pub tag: u64,
    pub copies: Copies,
    /// Number of copies, authoritative in both modes
    pub count: usize,
}

impl DirectoryEntry {
    #[must_use]
    pub fn is_cnt(&self) -> bool {
        matches!(self.copies, Copies::Counter)
    }

    #[must_use]
    pub fn d_copies(&self) -> u64 {
        match self.copies {
            Copies::Exact { d_copies, .. } => d_copies,
            Copies::Counter => 0,
        }
    }

    #[must_use]
    pub fn i_copies(&self) -> u64 {
        match self.copies {
            Copies::Exact { i_copies, .. } => i_copies,
            Copies::Counter => 0,
        }
    }

    /// Whether `srcid` may still hold a copy.
    ///
    /// In counter mode this is only known to be false once no copy is left.
    #[must_use]
    pub fn has_copy(&self, srcid: usize, instruction: bool) -> bool {
        match self.copies {
            Copies::Exact { d_copies, i_copies } => {
                let copies = if instruction { i_copies } else { d_copies };
                copies & (1 << srcid) != 0
            }
            Copies::Counter => self.count > 0,
        }
    }

    /// Registers a new copy, switching to counter mode once `count`
    /// has reached `copies_limit`.
    pub fn add_copy(&mut self, srcid: usize, instruction: bool, copies_limit: usize) {
        if self.count >= copies_limit {
            self.copies = Copies::Counter;
        }
        match &mut self.copies {
            Copies::Exact { d_copies, i_copies } => {
                let copies = if instruction { i_copies } else { d_copies };
                assert!(
                    *copies & (1 << srcid) == 0,
                    "directory: {} copy of {srcid} is already registered",
                    if instruction { "instruction" } else { "data" }
                );
                *copies |= 1 << srcid;
            }
            Copies::Counter => {}
        }
        self.count += 1;
    }

    pub fn remove_copy(&mut self, srcid: usize, instruction: bool) {
        assert!(
            self.count > 0,
            "directory: remove copy of {srcid} from a line without copies"
        );
        match &mut self.copies {
            Copies::Exact { d_copies, i_copies } => {
                let copies = if instruction { i_copies } else { d_copies };
                assert!(
                    *copies & (1 << srcid) != 0,
                    "directory: {} copy of {srcid} is not registered",
                    if instruction { "instruction" } else { "data" }
                );
                *copies &= !(1 << srcid);
            }
            Copies::Counter => {}
        }
        self.count -= 1;
    }

    /// Whether the exact copy masks agree with the copy count.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.copies {
            Copies::Exact { d_copies, i_copies } => {
                // an L1 holding both an instruction and a data copy counts twice
                (d_copies.count_ones() + i_copies.count_ones()) as usize == self.count
            }
            Copies::Counter => true,
        }
    }
}

impl std::fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.valid {
            return write!(f, "INVALID");
        }
        write!(
            f,
            "tag={:#x}{}{} count={}",
            self.tag,
            if self.dirty { " dirty" } else { "" },
            if self.lock { " lock" } else { "" },
            self.count,
        )?;
        match self.copies {
            Copies::Exact { d_copies, i_copies } => {
                write!(f, " d={d_copies:#b} i={i_copies:#b}")
            }
            Copies::Counter => write!(f, " counter"),
        }
    }
}

/// Directory and data store of the L2 cache.
#[derive(Clone)]
pub struct Directory {
    ways: usize,
    sets: usize,
    words: usize,
    set_shift: u32,
    tag_shift: u32,
    entries: Vec<DirectoryEntry>,
    recent: BitVec,
    data: Vec<u32>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("ways", &self.ways)
            .field("sets", &self.sets)
            .field("words", &self.words)
            .field(
                "valid",
                &self.entries.iter().filter(|entry| entry.valid).count(),
            )
            .finish()
    }
}

impl Directory {
    #[must_use]
    pub fn new(ways: usize, sets: usize, words: usize) -> Self {
        assert!(ways.is_power_of_two() && sets.is_power_of_two() && words.is_power_of_two());
        let set_shift = logb2(words) + 2;
        Self {
            ways,
            sets,
            words,
            set_shift,
            tag_shift: set_shift + logb2(sets),
            entries: vec![DirectoryEntry::default(); ways * sets],
            recent: BitVec::repeat(false, ways * sets),
            data: vec![0; ways * sets * words],
        }
    }

    #[must_use]
    pub fn ways(&self) -> usize {
        self.ways
    }

    #[must_use]
    pub fn sets(&self) -> usize {
        self.sets
    }

    #[must_use]
    pub fn words(&self) -> usize {
        self.words
    }

    #[inline]
    #[must_use]
    pub fn x(&self, addr: address) -> usize {
        ((addr >> 2) as usize) & (self.words - 1)
    }

    #[inline]
    #[must_use]
    pub fn y(&self, addr: address) -> usize {
        ((addr >> self.set_shift) as usize) & (self.sets - 1)
    }

    #[inline]
    #[must_use]
    pub fn z(&self, addr: address) -> u64 {
        addr >> self.tag_shift
    }

    #[inline]
    #[must_use]
    pub fn nline(&self, addr: address) -> u64 {
        addr >> self.set_shift
    }

    #[inline]
    #[must_use]
    pub fn line_address(&self, nline: u64) -> address {
        nline << self.set_shift
    }

    #[inline]
    fn idx(&self, set: usize, way: usize) -> usize {
        set * self.ways + way
    }

    /// Looks up `addr`, marking the way recent on a hit.
    ///
    /// Returns an invalid entry on a miss.
    pub fn read(&mut self, addr: address) -> (DirectoryEntry, usize) {
        let set = self.y(addr);
        let tag = self.z(addr);
        let hit = (0..self.ways).find(|&way| {
            let entry = &self.entries[self.idx(set, way)];
            entry.valid && entry.tag == tag
        });
        match hit {
            Some(way) => {
                let idx = self.idx(set, way);
                self.recent.set(idx, true);
                (self.entries[idx], way)
            }
            None => (DirectoryEntry::default(), 0),
        }
    }

    /// Looks up `addr` without touching the replacement state.
    #[must_use]
    pub fn peek(&self, addr: address) -> Option<(DirectoryEntry, usize)> {
        let set = self.y(addr);
        let tag = self.z(addr);
        (0..self.ways)
            .map(|way| (self.entries[self.idx(set, way)], way))
            .find(|(entry, _)| entry.valid && entry.tag == tag)
    }

    pub fn write(&mut self, set: usize, way: usize, entry: DirectoryEntry) {
        let idx = self.idx(set, way);
        self.entries[idx] = entry;
        let all_recent = (0..self.ways)
            .filter(|&other| other != way)
            .all(|other| self.recent[self.idx(set, other)]);
        if all_recent {
            for other in 0..self.ways {
                let idx = self.idx(set, other);
                self.recent.set(idx, false);
            }
        } else {
            self.recent.set(idx, true);
        }
    }

    pub fn inval(&mut self, set: usize, way: usize) {
        self.write(set, way, DirectoryEntry::default());
    }

    /// Picks the way of `set` to replace.
    #[must_use]
    pub fn select(&self, set: usize) -> (DirectoryEntry, usize) {
        let entry = |way: usize| &self.entries[self.idx(set, way)];
        let recent = |way: usize| self.recent[self.idx(set, way)];
        let way = (0..self.ways)
            .find(|&way| !entry(way).valid)
            .or_else(|| (0..self.ways).find(|&way| !recent(way) && !entry(way).lock))
            .or_else(|| (0..self.ways).find(|&way| !recent(way) && entry(way).lock))
            .or_else(|| (0..self.ways).find(|&way| recent(way) && !entry(way).lock))
            .unwrap_or(0);
        (*entry(way), way)
    }

    #[must_use]
    pub fn line(&self, set: usize, way: usize) -> &[u32] {
        let start = self.idx(set, way) * self.words;
        &self.data[start..start + self.words]
    }

    pub fn line_mut(&mut self, set: usize, way: usize) -> &mut [u32] {
        let start = self.idx(set, way) * self.words;
        &mut self.data[start..start + self.words]
    }

    /// Line number of the entry stored at `(set, way)`.
    #[must_use]
    pub fn entry_nline(&self, set: usize, way: usize) -> u64 {
        self.entries[self.idx(set, way)].tag * self.sets as u64 + set as u64
    }

    /// All valid entries with their line numbers.
    pub fn iter_valid(&self) -> impl Iterator<Item = (u64, &DirectoryEntry)> + '_ {
        (0..self.sets).flat_map(move |set| {
            (0..self.ways).filter_map(move |way| {
                let entry = &self.entries[self.idx(set, way)];
                entry
                    .valid
                    .then(|| (self.entry_nline(set, way), entry))
            })
        })
    }

    #[must_use]
    pub fn is_recent(&self, set: usize, way: usize) -> bool {
        self.recent[self.idx(set, way)]
    }
}

#[cfg(test)]
mod tests {
    use super::{Copies, Directory, DirectoryEntry};
    use color_eyre::eyre;
    use pretty_assertions_sorted as diff;

    #[test]
    fn test_fourth_copy_switches_to_counter_mode() -> eyre::Result<()> {
        let copies_limit = 3;
        let mut entry = DirectoryEntry {
            valid: true,
            ..DirectoryEntry::default()
        };
        for srcid in 0..3 {
            entry.add_copy(srcid, false, copies_limit);
            assert!(entry.is_consistent());
        }
        diff::assert_eq!(
            entry.copies,
            Copies::Exact {
                d_copies: 0b111,
                i_copies: 0
            }
        );
        entry.add_copy(3, false, copies_limit);
        assert!(entry.is_cnt());
        assert_eq!(entry.d_copies(), 0);
        assert_eq!(entry.count, 4);

        // counter mode is sticky
        entry.remove_copy(0, false);
        entry.remove_copy(1, false);
        assert!(entry.is_cnt());
        assert_eq!(entry.count, 2);
        Ok(())
    }

    #[test]
    fn test_instruction_and_data_copies_are_distinct() {
        let mut entry = DirectoryEntry::default();
        entry.add_copy(2, false, 8);
        entry.add_copy(2, true, 8);
        assert_eq!(entry.count, 2);
        assert!(entry.has_copy(2, true));
        assert!(entry.is_consistent());
        entry.remove_copy(2, false);
        assert!(!entry.has_copy(2, false));
        assert!(entry.has_copy(2, true));
        assert!(entry.is_consistent());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_add_present_copy_panics() {
        let mut entry = DirectoryEntry::default();
        entry.add_copy(1, false, 8);
        entry.add_copy(1, false, 8);
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn test_remove_absent_copy_panics() {
        let mut entry = DirectoryEntry::default();
        entry.add_copy(1, false, 8);
        entry.remove_copy(2, false);
    }

    #[test]
    fn test_select_prefers_invalid_then_old_unlocked() {
        let mut dir = Directory::new(4, 4, 4);
        let valid = |tag| DirectoryEntry {
            valid: true,
            tag,
            ..DirectoryEntry::default()
        };
        dir.write(0, 0, valid(1));
        assert_eq!(dir.select(0).1, 1);

        dir.write(0, 1, valid(2));
        dir.write(0, 2, DirectoryEntry {
            lock: true,
            ..valid(3)
        });
        // writing the last way ages the whole set
        dir.write(0, 3, valid(4));
        assert!((0..4).all(|way| !dir.is_recent(0, way)));

        // ways 0 and 1 become recent, way 2 is locked
        let line_bytes = 4 * 4;
        let sets = 4;
        dir.read(1 * sets * line_bytes);
        dir.read(2 * sets * line_bytes);
        assert_eq!(dir.select(0).1, 3);
    }

    #[test]
    fn test_read_miss_returns_invalid_entry() {
        let mut dir = Directory::new(2, 4, 4);
        let (entry, _) = dir.read(0x40);
        assert!(!entry.valid);
        assert!(dir.peek(0x40).is_none());
    }

    #[test]
    fn test_entry_nline() {
        let mut dir = Directory::new(2, 4, 4);
        let addr = 0x1234 & !0xF;
        let set = dir.y(addr);
        let entry = DirectoryEntry {
            valid: true,
            tag: dir.z(addr),
            ..DirectoryEntry::default()
        };
        dir.write(set, 1, entry);
        assert_eq!(dir.entry_nline(set, 1), dir.nline(addr));
        assert_eq!(dir.peek(addr).map(|(_, way)| way), Some(1));
        assert_eq!(dir.iter_valid().count(), 1);
    }
}
