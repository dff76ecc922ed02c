use crate::{address, config, vci};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum SlotState {
    EMPTY,
    /// Accepting writes to its line
    OPEN,
    /// Waiting to be sent
    LOCKED,
    /// Waiting for the write acknowledge
    SENT,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    state: SlotState,
    address: address,
    timeout: usize,
    min: usize,
    max: usize,
    data: Vec<u32>,
    be: Vec<u8>,
}

impl Slot {
    fn new(words: usize) -> Self {
        Self {
            state: SlotState::EMPTY,
            address: 0,
            timeout: 0,
            min: words - 1,
            max: 0,
            data: vec![0; words],
            be: vec![0; words],
        }
    }

    fn clear(&mut self) {
        let words = self.data.len();
        self.state = SlotState::EMPTY;
        self.min = words - 1;
        self.max = 0;
        self.be.fill(0);
    }

    fn pending(&self) -> bool {
        matches!(self.state, SlotState::LOCKED | SlotState::SENT)
    }
}

/// A locked slot ready to be sent as one write burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Burst {
    pub index: usize,
    /// Address of the first word of the burst
    pub address: address,
    pub be: vci::ByteEnables,
    pub data: vci::Words,
}

/// Coalescing write buffer with one slot per line.
///
/// Writes to the same line merge into a single slot until the slot
/// times out or is flushed. At most one transaction per line is in
/// flight at any time.
#[derive(Debug, Clone)]
pub struct MultiWriteBuffer {
    slots: Vec<Slot>,
    words: usize,
    timeout: usize,
    mask: address,
    /// Next slot considered for draining
    ptr: usize,
}

impl MultiWriteBuffer {
    #[must_use]
    pub fn new(lines: usize, words: usize, timeout: usize) -> Self {
        assert!(words.is_power_of_two());
        assert!(lines > 0);
        Self {
            slots: (0..lines).map(|_| Slot::new(words)).collect(),
            words,
            timeout,
            mask: (words as address * 4) - 1,
            ptr: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &config::WriteBuffer) -> Self {
        Self::new(config.lines, config.words, config.timeout)
    }

    fn line(&self, addr: address) -> address {
        addr & !self.mask
    }

    fn word(&self, addr: address) -> usize {
        ((addr & self.mask) >> 2) as usize
    }

    fn open_slot(&self, line: address) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.state == SlotState::OPEN && slot.address == line)
    }

    fn empty_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.state == SlotState::EMPTY)
    }

    /// Whether a write to `addr` would be accepted.
    #[must_use]
    pub fn wok(&self, addr: address) -> bool {
        self.open_slot(self.line(addr)).is_some() || self.empty_slot().is_some()
    }

    /// Posts a write, returning whether it was accepted.
    pub fn write(&mut self, addr: address, be: u8, data: u32) -> bool {
        let line = self.line(addr);
        let word = self.word(addr);
        let Some(index) = self.open_slot(line).or_else(|| self.empty_slot()) else {
            return false;
        };
        let timeout = self.timeout;
        let slot = &mut self.slots[index];
        if slot.state == SlotState::EMPTY {
            slot.state = SlotState::OPEN;
            slot.address = line;
        }
        slot.timeout = timeout;
        slot.be[word] |= be;
        slot.data[word] = vci::merge_bytes(slot.data[word], data, be);
        slot.min = slot.min.min(word);
        slot.max = slot.max.max(word);
        log::trace!(
            "write buffer: write {data:#010x} (be={be:#06b}) to {addr:#010x} into slot {index}"
        );
        true
    }

    /// Advances the slot timeouts by one cycle.
    ///
    /// Locks at most one expired (or flushed) open slot, and only if
    /// no other slot of the same line is locked or sent.
    pub fn update(&mut self, flush: bool) {
        for slot in &mut self.slots {
            if slot.state == SlotState::OPEN {
                slot.timeout = slot.timeout.saturating_sub(1);
            }
        }
        let candidate = self.slots.iter().position(|slot| {
            slot.state == SlotState::OPEN
                && (flush || slot.timeout == 0)
                && !self
                    .slots
                    .iter()
                    .any(|other| other.pending() && other.address == slot.address)
        });
        if let Some(index) = candidate {
            log::trace!("write buffer: lock slot {index} (flush={flush})");
            self.slots[index].state = SlotState::LOCKED;
        }
    }

    fn locked(&self) -> Option<usize> {
        let n = self.slots.len();
        (0..n)
            .map(|i| (self.ptr + i) % n)
            .find(|&index| self.slots[index].state == SlotState::LOCKED)
    }

    /// Whether a locked slot is waiting to be sent.
    #[must_use]
    pub fn rok(&self) -> bool {
        self.locked().is_some()
    }

    /// The next locked slot as a write burst from its lowest to its highest written word.
    #[must_use]
    pub fn burst(&self) -> Option<Burst> {
        let index = self.locked()?;
        let slot = &self.slots[index];
        Some(Burst {
            index,
            address: slot.address + (slot.min as address) * 4,
            be: slot.be[slot.min..=slot.max].iter().copied().collect(),
            data: slot.data[slot.min..=slot.max].iter().copied().collect(),
        })
    }

    /// Marks slot `index` as sent.
    pub fn sent(&mut self, index: usize) {
        assert_eq!(
            self.slots[index].state,
            SlotState::LOCKED,
            "write buffer: illegal sent for slot {index}"
        );
        self.slots[index].state = SlotState::SENT;
        self.ptr = (index + 1) % self.slots.len();
    }

    /// Releases slot `index` once its write has been acknowledged.
    pub fn completed(&mut self, index: usize) {
        assert!(
            index < self.slots.len() && self.slots[index].state == SlotState::SENT,
            "write buffer: illegal completed for slot {index}"
        );
        log::trace!("write buffer: slot {index} completed");
        self.slots[index].clear();
    }

    /// Whether no slot holds a write to the line of `addr`.
    #[must_use]
    pub fn miss(&self, addr: address) -> bool {
        let line = self.line(addr);
        !self
            .slots
            .iter()
            .any(|slot| slot.state != SlotState::EMPTY && slot.address == line)
    }

    #[must_use]
    pub fn empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.state == SlotState::EMPTY)
    }

    #[must_use]
    pub fn state(&self, index: usize) -> SlotState {
        self.slots[index].state
    }

    #[must_use]
    pub fn words(&self) -> usize {
        self.words
    }

    #[must_use]
    pub fn lines(&self) -> usize {
        self.slots.len()
    }
}

impl std::fmt::Display for MultiWriteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let states: Vec<String> = self
            .slots
            .iter()
            .map(|slot| match slot.state {
                SlotState::EMPTY => "EMPTY".to_string(),
                state => format!("{state}@{:#x}", slot.address),
            })
            .collect();
        write!(f, "WriteBuffer[{}]", states.join(", "))
    }
}
