//! Logical VCI packets exchanged between the L1 wrappers, the
//! coherence directory and the external memory.
//!
//! Packets are modelled as whole messages rather than flits: a
//! multi-cell burst travels as a single packet carrying all its cells.

use crate::address;
use smallvec::SmallVec;

/// Up to one cache line of words.
pub type Words = SmallVec<[u32; 16]>;

/// Per-word byte enables (4 bits each).
pub type ByteEnables = SmallVec<[u8; 16]>;

/// Coherence commands sent to this address reach every L1 cache.
pub const BROADCAST_ADDR: address = 3;

/// Offsets within the 16 byte coherence segment of an L1 cache.
pub const INVAL_DATA_OFFSET: address = 0;
pub const UPDT_DATA_OFFSET: address = 4;
pub const INVAL_INST_OFFSET: address = 8;
pub const UPDT_INST_OFFSET: address = 12;

/// Response data of a successful store conditional.
pub const SC_SUCCESS: u32 = 0;
/// Response data of a failed store conditional.
pub const SC_FAILURE: u32 = 1;

/// Read transaction types of an L1 cache, encoded in the pktid.
///
/// Read types are even while write pktids are odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum TransactionType {
    DATA_MISS = 0,
    DATA_UNC = 2,
    INS_MISS = 4,
    INS_UNC = 6,
}

impl TransactionType {
    #[must_use]
    pub fn pktid(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn from_pktid(pktid: u32) -> Option<Self> {
        match pktid {
            0 => Some(Self::DATA_MISS),
            2 => Some(Self::DATA_UNC),
            4 => Some(Self::INS_MISS),
            6 => Some(Self::INS_UNC),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_instruction(self) -> bool {
        matches!(self, Self::INS_MISS | Self::INS_UNC)
    }

    #[must_use]
    pub fn is_miss(self) -> bool {
        matches!(self, Self::DATA_MISS | Self::INS_MISS)
    }
}

/// The pktid of a write burst drained from write buffer slot `slot`.
#[must_use]
pub fn write_pktid(slot: usize) -> u32 {
    ((slot as u32) << 1) + 1
}

#[must_use]
pub fn is_write_pktid(pktid: u32) -> bool {
    pktid % 2 == 1
}

/// Expands a 4 bit byte enable into a 32 bit mask.
#[must_use]
pub fn be_to_mask(be: u8) -> u32 {
    (0..4)
        .filter(|byte| be & (1 << byte) != 0)
        .fold(0, |mask, byte| mask | (0xFF << (byte * 8)))
}

/// Merges `wdata` into `old` under byte enable `be`.
#[must_use]
pub fn merge_bytes(old: u32, wdata: u32, be: u8) -> u32 {
    let mask = be_to_mask(be);
    (old & !mask) | (wdata & mask)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandKind {
    READ { cached: bool, instruction: bool },
    /// A burst of consecutive words within one cache line
    WRITE { be: ByteEnables, data: Words },
    LOCKED_READ,
    STORE_COND { data: u32 },
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::READ {
                cached,
                instruction,
            } => write!(
                f,
                "READ({}{})",
                if *cached { "cached" } else { "uncached" },
                if *instruction { ",ins" } else { "" }
            ),
            Self::WRITE { data, .. } => write!(f, "WRITE({} cells)", data.len()),
            Self::LOCKED_READ => write!(f, "LL"),
            Self::STORE_COND { data } => write!(f, "SC({data:#x})"),
        }
    }
}

/// Command on the direct network, from an L1 cache to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    pub address: address,
    /// Length in bytes
    pub plen: usize,
    pub kind: CommandKind,
}

impl Command {
    #[must_use]
    pub fn read(
        srcid: usize,
        address: address,
        plen: usize,
        kind: TransactionType,
        cached: bool,
    ) -> Self {
        Self {
            srcid,
            trdid: 0,
            pktid: kind.pktid(),
            address,
            plen,
            kind: CommandKind::READ {
                cached,
                instruction: kind.is_instruction(),
            },
        }
    }

    #[must_use]
    pub fn write(srcid: usize, slot: usize, address: address, be: ByteEnables, data: Words) -> Self {
        debug_assert_eq!(be.len(), data.len());
        Self {
            srcid,
            trdid: 0,
            pktid: write_pktid(slot),
            address,
            plen: data.len() * 4,
            kind: CommandKind::WRITE { be, data },
        }
    }

    #[must_use]
    pub fn locked_read(srcid: usize, address: address) -> Self {
        Self {
            srcid,
            trdid: 0,
            pktid: TransactionType::DATA_UNC.pktid(),
            address,
            plen: 4,
            kind: CommandKind::LOCKED_READ,
        }
    }

    #[must_use]
    pub fn store_cond(srcid: usize, address: address, data: u32) -> Self {
        Self {
            srcid,
            trdid: 0,
            pktid: TransactionType::DATA_UNC.pktid(),
            address,
            plen: 4,
            kind: CommandKind::STORE_COND { data },
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{:#010x}[src={},pkt={}]",
            self.kind, self.address, self.srcid, self.pktid
        )
    }
}

/// Response on the direct network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Response {
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    pub data: Words,
    pub error: bool,
}

impl Response {
    #[must_use]
    pub fn new(srcid: usize, trdid: usize, pktid: u32, data: Words) -> Self {
        Self {
            srcid,
            trdid,
            pktid,
            data,
            error: false,
        }
    }

    /// A single-cell acknowledge.
    #[must_use]
    pub fn ack(srcid: usize, trdid: usize, pktid: u32) -> Self {
        Self::new(srcid, trdid, pktid, smallvec::smallvec![0])
    }

    #[must_use]
    pub fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RSP[src={},pkt={},cells={}{}]",
            self.srcid,
            self.pktid,
            self.data.len(),
            if self.error { ",error" } else { "" }
        )
    }
}

/// Update or invalidate request from the directory to one L1 cache,
/// or to all of them when sent to `BROADCAST_ADDR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoherenceCommand {
    pub srcid: usize,
    /// Index of the entry in the update table
    pub trdid: usize,
    pub pktid: u32,
    pub address: address,
    pub nline: u64,
    /// First word of an update
    pub index: usize,
    pub data: Words,
    /// Word enables of an update
    pub we: SmallVec<[bool; 16]>,
}

impl CoherenceCommand {
    #[must_use]
    pub fn inval(address: address, trdid: usize, nline: u64) -> Self {
        Self {
            srcid: 0,
            trdid,
            pktid: 0,
            address,
            nline,
            index: 0,
            data: Words::new(),
            we: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn update(
        address: address,
        trdid: usize,
        nline: u64,
        index: usize,
        data: Words,
        we: SmallVec<[bool; 16]>,
    ) -> Self {
        debug_assert_eq!(data.len(), we.len());
        Self {
            srcid: 0,
            trdid,
            pktid: 0,
            address,
            nline,
            index,
            data,
            we,
        }
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.address == BROADCAST_ADDR
    }
}

impl std::fmt::Display for CoherenceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_broadcast() {
            write!(f, "BROADCAST[nline={:#x},upt={}]", self.nline, self.trdid)
        } else if self.data.is_empty() {
            write!(
                f,
                "INVAL@{:#010x}[nline={:#x},upt={}]",
                self.address, self.nline, self.trdid
            )
        } else {
            write!(
                f,
                "UPDT@{:#010x}[nline={:#x},upt={},words={}..{}]",
                self.address,
                self.nline,
                self.trdid,
                self.index,
                self.index + self.data.len()
            )
        }
    }
}

/// Acknowledge of a coherence command, sent by an L1 cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoherenceResponse {
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    pub error: bool,
}

impl std::fmt::Display for CoherenceResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CC_RSP[src={},upt={}]", self.srcid, self.trdid)
    }
}

/// Notification that an L1 cache evicted a line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CleanupCommand {
    pub srcid: usize,
    /// 0 for the data cache, 1 for the instruction cache
    pub trdid: usize,
    pub pktid: u32,
    pub nline: u64,
}

impl std::fmt::Display for CleanupCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CLEANUP[src={},{},nline={:#x}]",
            self.srcid,
            if self.trdid == 0 { "data" } else { "ins" },
            self.nline
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CleanupResponse {
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    pub error: bool,
}

impl std::fmt::Display for CleanupResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CLEANUP_RSP[src={},trd={}]", self.srcid, self.trdid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum XramCommandKind {
    READ,
    WRITE { data: Words },
}

/// Full line transaction towards the external memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XramCommand {
    /// Index of the transaction table entry
    pub trdid: usize,
    pub nline: u64,
    pub kind: XramCommandKind,
}

impl std::fmt::Display for XramCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            XramCommandKind::READ => {
                write!(f, "XRAM_READ[nline={:#x},trt={}]", self.nline, self.trdid)
            }
            XramCommandKind::WRITE { .. } => {
                write!(f, "XRAM_WRITE[nline={:#x},trt={}]", self.nline, self.trdid)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XramResponse {
    pub trdid: usize,
    /// Whether this acknowledges a write
    pub write: bool,
    pub data: Words,
    pub error: bool,
}

impl std::fmt::Display for XramResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "XRAM_RSP[trt={},{}{}]",
            self.trdid,
            if self.write { "write" } else { "read" },
            if self.error { ",error" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{is_write_pktid, merge_bytes, write_pktid, TransactionType};
    use strum::IntoEnumIterator;

    #[test]
    fn test_read_and_write_pktids_are_disjoint() {
        for kind in TransactionType::iter() {
            assert!(!is_write_pktid(kind.pktid()));
            assert_eq!(TransactionType::from_pktid(kind.pktid()), Some(kind));
        }
        for slot in 0..8 {
            assert!(is_write_pktid(write_pktid(slot)));
            assert_eq!(write_pktid(slot) >> 1, slot as u32);
        }
    }

    #[test]
    fn test_merge_bytes() {
        assert_eq!(merge_bytes(0x1122_3344, 0xAABB_CCDD, 0b0000), 0x1122_3344);
        assert_eq!(merge_bytes(0x1122_3344, 0xAABB_CCDD, 0b1111), 0xAABB_CCDD);
        assert_eq!(merge_bytes(0x1122_3344, 0xAABB_CCDD, 0b0001), 0x1122_33DD);
        assert_eq!(merge_bytes(0x1122_3344, 0xAABB_CCDD, 0b1010), 0xAA22_CC44);
    }
}
