use crate::{address, config, logb2};
use bitvec::vec::BitVec;

/// Location of a line within the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub way: usize,
    pub set: usize,
}

/// Result of a victim selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Victim {
    pub slot: Slot,
    /// Line number of the valid line occupying the slot
    pub nline: Option<u64>,
}

/// Set-associative cache with one pseudo-LRU bit per way.
///
/// Touching a way marks it recent. When every way of a set becomes
/// recent, the whole set ages, so a set never has all LRU bits set.
#[derive(Clone)]
pub struct GenericCache {
    name: String,
    ways: usize,
    sets: usize,
    words: usize,
    set_shift: u32,
    tag_shift: u32,
    data: Vec<u32>,
    tag: Vec<u64>,
    val: BitVec,
    lru: BitVec,
}

impl std::fmt::Debug for GenericCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericCache")
            .field("name", &self.name)
            .field("ways", &self.ways)
            .field("sets", &self.sets)
            .field("words", &self.words)
            .field("valid", &self.val.count_ones())
            .finish()
    }
}

impl GenericCache {
    #[must_use]
    pub fn new(name: impl Into<String>, ways: usize, sets: usize, words: usize) -> Self {
        assert!(ways.is_power_of_two() && ways <= config::MAX_WAYS);
        assert!(sets.is_power_of_two() && sets <= config::MAX_SETS);
        assert!(words.is_power_of_two() && words <= config::MAX_WORDS);
        let set_shift = logb2(words) + 2;
        Self {
            name: name.into(),
            ways,
            sets,
            words,
            set_shift,
            tag_shift: set_shift + logb2(sets),
            data: vec![0; ways * sets * words],
            tag: vec![0; ways * sets],
            val: BitVec::repeat(false, ways * sets),
            lru: BitVec::repeat(false, ways * sets),
        }
    }

    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &config::Cache) -> Self {
        Self::new(name, config.ways, config.sets, config.words)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn words(&self) -> usize {
        self.words
    }

    #[must_use]
    pub fn ways(&self) -> usize {
        self.ways
    }

    #[must_use]
    pub fn sets(&self) -> usize {
        self.sets
    }

    /// Word index within the line.
    #[inline]
    #[must_use]
    pub fn x(&self, addr: address) -> usize {
        ((addr >> 2) as usize) & (self.words - 1)
    }

    /// Set index.
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

    /// Address of the first byte of line `nline`.
    #[inline]
    #[must_use]
    pub fn line_address(&self, nline: u64) -> address {
        nline << self.set_shift
    }

    #[inline]
    fn idx(&self, way: usize, set: usize) -> usize {
        way * self.sets + set
    }

    #[inline]
    fn data_idx(&self, way: usize, set: usize, word: usize) -> usize {
        (way * self.sets + set) * self.words + word
    }

    fn touch(&mut self, way: usize, set: usize) {
        let idx = self.idx(way, set);
        self.lru.set(idx, true);
        if (0..self.ways).all(|w| self.lru[self.idx(w, set)]) {
            for w in 0..self.ways {
                let idx = self.idx(w, set);
                self.lru.set(idx, false);
            }
        }
    }

    /// Finds the slot holding `addr` without touching the LRU bits.
    #[must_use]
    pub fn locate(&self, addr: address) -> Option<Slot> {
        let tag = self.z(addr);
        let set = self.y(addr);
        (0..self.ways)
            .find(|&way| {
                let idx = self.idx(way, set);
                self.val[idx] && self.tag[idx] == tag
            })
            .map(|way| Slot { way, set })
    }

    pub fn read(&mut self, addr: address) -> Option<u32> {
        let Slot { way, set } = self.locate(addr)?;
        self.touch(way, set);
        Some(self.data[self.data_idx(way, set, self.x(addr))])
    }

    pub fn write(&mut self, addr: address, data: u32) -> bool {
        let Some(Slot { way, set }) = self.locate(addr) else {
            return false;
        };
        let idx = self.data_idx(way, set, self.x(addr));
        self.data[idx] = data;
        self.touch(way, set);
        true
    }

    pub fn inval(&mut self, addr: address) -> bool {
        let Some(Slot { way, set }) = self.locate(addr) else {
            return false;
        };
        self.inval_slot(Slot { way, set });
        true
    }

    pub fn inval_slot(&mut self, slot: Slot) {
        let idx = self.idx(slot.way, slot.set);
        self.val.set(idx, false);
        self.lru.set(idx, false);
    }

    /// Picks a victim slot for `addr`, never choosing a way in `busy`.
    ///
    /// Prefers an invalid way, then an old one. When every candidate is
    /// recent the first non-busy way is taken.
    #[must_use]
    pub fn select(&self, addr: address, busy: u64) -> Victim {
        let set = self.y(addr);
        let free = |way: &usize| busy & (1 << *way) == 0;
        let way = (0..self.ways)
            .filter(free)
            .find(|&way| !self.val[self.idx(way, set)])
            .or_else(|| {
                (0..self.ways)
                    .filter(free)
                    .find(|&way| !self.lru[self.idx(way, set)])
            })
            .or_else(|| (0..self.ways).find(free));
        let Some(way) = way else {
            panic!("{}: every way of set {set} is busy", self.name);
        };
        let idx = self.idx(way, set);
        let nline = self.val[idx].then(|| self.tag[idx] * self.sets as u64 + set as u64);
        Victim {
            slot: Slot { way, set },
            nline,
        }
    }

    /// Installs a line into a slot chosen by `select`.
    pub fn update_slot(&mut self, addr: address, slot: Slot, line: &[u32]) {
        debug_assert_eq!(line.len(), self.words);
        debug_assert_eq!(slot.set, self.y(addr));
        let idx = self.idx(slot.way, slot.set);
        self.tag[idx] = self.z(addr);
        self.val.set(idx, true);
        let start = self.data_idx(slot.way, slot.set, 0);
        self.data[start..start + self.words].copy_from_slice(line);
        self.touch(slot.way, slot.set);
    }

    /// Installs a line, returning the line number of a valid victim.
    pub fn update(&mut self, addr: address, line: &[u32]) -> Option<u64> {
        let victim = self.select(addr, 0);
        self.update_slot(addr, victim.slot, line);
        victim.nline
    }

    #[must_use]
    pub fn valid(&self, slot: Slot) -> bool {
        self.val[self.idx(slot.way, slot.set)]
    }

    #[must_use]
    pub fn lru(&self, slot: Slot) -> bool {
        self.lru[self.idx(slot.way, slot.set)]
    }

    /// Reads a whole line without touching the LRU bits.
    #[must_use]
    pub fn peek_line(&self, addr: address) -> Option<&[u32]> {
        let Slot { way, set } = self.locate(addr)?;
        let start = self.data_idx(way, set, 0);
        Some(&self.data[start..start + self.words])
    }

    pub fn reset(&mut self) {
        self.val.fill(false);
        self.lru.fill(false);
    }
}

#[cfg(test)]
mod tests {
    use super::{GenericCache, Slot};
    use color_eyre::eyre;

    fn line(words: usize, base: u32) -> Vec<u32> {
        (0..words as u32).map(|w| base + w).collect()
    }

    #[test]
    fn test_address_decomposition() {
        let cache = GenericCache::new("dcache", 2, 4, 4);
        let addr = 0b1101_01_10_00;
        assert_eq!(cache.x(addr), 0b10);
        assert_eq!(cache.y(addr), 0b01);
        assert_eq!(cache.z(addr), 0b1101);
        assert_eq!(cache.nline(addr), 0b1101_01);
        assert_eq!(cache.line_address(cache.nline(addr)), 0b1101_01_00_00);
    }

    #[test]
    fn test_read_write_inval() -> eyre::Result<()> {
        let mut cache = GenericCache::new("dcache", 2, 4, 4);
        assert_eq!(cache.read(0x40), None);
        assert!(!cache.write(0x40, 1));
        assert_eq!(cache.update(0x40, &line(4, 100)), None);
        assert_eq!(cache.read(0x48), Some(102));
        assert!(cache.write(0x48, 7));
        assert_eq!(cache.read(0x48), Some(7));
        assert!(cache.inval(0x44));
        assert_eq!(cache.read(0x48), None);
        assert!(!cache.inval(0x44));
        Ok(())
    }

    #[test]
    fn test_pseudo_lru_evicts_untouched_way() -> eyre::Result<()> {
        let ways = 4;
        let sets = 4;
        let words = 4;
        let stride = (sets * words * 4) as u64;
        let mut cache = GenericCache::new("dcache", ways, sets, words);
        for way in 0..ways as u64 {
            assert_eq!(cache.update(way * stride, &line(words, 0)), None);
        }
        // the fill of the last way aged the whole set
        let set = cache.y(0);
        assert!((0..ways).all(|way| !cache.lru(Slot { way, set })));

        for way in [0, 1, 3] {
            assert!(cache.read(way * stride).is_some());
        }
        let victim = cache.select(4 * stride, 0);
        assert_eq!(victim.slot.way, 2);
        assert_eq!(victim.nline, Some(cache.nline(2 * stride)));
        Ok(())
    }

    #[test]
    fn test_lru_bits_never_all_set() {
        let ways = 4;
        let stride = (4 * 4 * 4) as u64;
        let mut cache = GenericCache::new("icache", ways, 4, 4);
        for way in 0..ways as u64 {
            cache.update(way * stride, &line(4, 0));
        }
        let set = cache.y(0);
        for i in 0..100u64 {
            cache.read((i * 7 % ways as u64) * stride);
            assert!((0..ways).any(|way| !cache.lru(Slot { way, set })));
        }
    }

    #[test]
    fn test_select_skips_busy_ways() {
        let mut cache = GenericCache::new("dcache", 2, 4, 4);
        let victim = cache.select(0, 0b01);
        assert_eq!(victim.slot.way, 1);
        cache.update_slot(0, victim.slot, &line(4, 0));
        assert!(cache.valid(victim.slot));
        assert_eq!(cache.locate(0), Some(victim.slot));
    }

    #[test]
    #[should_panic(expected = "busy")]
    fn test_select_with_all_ways_busy_panics() {
        let cache = GenericCache::new("dcache", 2, 4, 4);
        let _ = cache.select(0, 0b11);
    }

    #[test]
    #[should_panic]
    fn test_rejects_too_many_ways() {
        let _ = GenericCache::new("dcache", 32, 4, 4);
    }
}
