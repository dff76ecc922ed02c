use super::{
    alloc::{Allocator, DirClient, TrtClient, UptClient},
    directory::{Copies, DirectoryEntry},
    transaction_tab::NewTransaction,
    update_tab::UpdateEntry,
    MemCache, Registers, UpdateRequest,
};
use crate::{address, vci};
use stats::mem_cache::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum WriteState {
    IDLE,
    DIR_LOCK,
    DIR_HIT_READ,
    DIR_HIT,
    DIR_HIT_RSP,
    UPT_LOCK,
    WAIT_UPT,
    UPDATE,
    RSP,
    TRT_LOCK,
    TRT_DATA,
    TRT_SET,
    WAIT_TRT,
    XRAM_REQ,
    TRT_WRITE_LOCK,
    INVAL_LOCK,
    DIR_INVAL,
    INVAL,
    XRAM_SEND,
}

/// The write burst being processed, expanded to a full line.
#[derive(Debug, Clone)]
pub(super) struct Local {
    srcid: usize,
    trdid: usize,
    pktid: u32,
    address: address,
    word_index: usize,
    word_count: usize,
    be: Vec<u8>,
    data: Vec<u32>,
    /// Some word is only partially written
    byte: bool,
    entry: DirectoryEntry,
    way: usize,
    /// Copies to update, the writer excluded
    d_copies: u64,
    count: usize,
    trt_index: usize,
    upt_index: usize,
}

impl Local {
    pub(super) fn new(words: usize) -> Self {
        Self {
            srcid: 0,
            trdid: 0,
            pktid: 0,
            address: 0,
            word_index: 0,
            word_count: 0,
            be: vec![0; words],
            data: vec![0; words],
            byte: false,
            entry: DirectoryEntry::default(),
            way: 0,
            d_copies: 0,
            count: 0,
            trt_index: 0,
            upt_index: 0,
        }
    }

    fn owner(&self) -> bool {
        self.entry.d_copies() & (1 << self.srcid) != 0
    }

    /// Whether the written line has copies that cannot be updated.
    fn needs_inval(&self) -> bool {
        (self.entry.is_cnt() && self.entry.count > 0) || self.entry.i_copies() != 0
    }

    /// Whether the writer holds the only copy, if any.
    fn no_update(&self) -> bool {
        (self.owner() && self.entry.count == 1) || self.entry.count == 0
    }

    fn hit_state(&self) -> WriteState {
        if self.no_update() {
            WriteState::DIR_HIT_RSP
        } else {
            WriteState::DIR_HIT
        }
    }
}

impl MemCache {
    /// Writes the burst into the line, marking it dirty.
    fn write_to_line(&mut self) {
        let regs = &self.write_regs;
        let set = self.dir.y(regs.address);
        let copies = match regs.entry.copies {
            Copies::Exact { d_copies, .. } => Copies::Exact {
                d_copies,
                i_copies: 0,
            },
            Copies::Counter => Copies::Counter,
        };
        let entry = DirectoryEntry {
            dirty: true,
            copies,
            ..regs.entry
        };
        let way = regs.way;
        self.dir.write(set, way, entry);
        let line = self.dir.line_mut(set, way);
        for (word, (&be, &data)) in regs.be.iter().zip(&regs.data).enumerate() {
            if be != 0 {
                line[word] = data;
            }
        }
    }

    fn write_ack(&self) -> vci::Response {
        let regs = &self.write_regs;
        vci::Response::ack(regs.srcid, regs.trdid, regs.pktid)
    }

    pub(super) fn write_fsm(&mut self, r: &Registers) {
        let nline = self.dir.nline(self.write_regs.address);
        match r.write {
            WriteState::IDLE => {
                let Some(req) = self.write_fifo.dequeue() else {
                    return;
                };
                log::debug!("{}: {req}", self.name);
                let regs = &mut self.write_regs;
                let index = self.dir.x(req.address);
                regs.srcid = req.srcid;
                regs.trdid = req.trdid;
                regs.pktid = req.pktid;
                regs.address = req.address;
                regs.word_index = index;
                regs.word_count = req.data.len();
                regs.be.fill(0);
                regs.data.fill(0);
                regs.byte = false;
                for (i, (&be, &data)) in req.be.iter().zip(&req.data).enumerate() {
                    regs.be[index + i] = be;
                    regs.data[index + i] = data;
                    regs.byte |= be != 0 && be != 0xF;
                }
                self.inc(Counter::WRITE, 1);
                self.inc(Counter::WRITE_CELLS, req.data.len() as u64);
                self.r.write = WriteState::DIR_LOCK;
            }
            WriteState::DIR_LOCK => {
                if r.alloc_dir.granted() != DirClient::WRITE {
                    return;
                }
                let line_address = self.dir.line_address(nline);
                for (word, &be) in self.write_regs.be.iter().enumerate() {
                    if be != 0 {
                        self.atomic.reset(line_address + word as address * 4);
                    }
                }
                let (entry, way) = self.dir.read(self.write_regs.address);
                let regs = &mut self.write_regs;
                regs.entry = entry;
                regs.way = way;
                self.r.write = if !entry.valid {
                    WriteState::TRT_LOCK
                } else if regs.needs_inval() || regs.byte {
                    WriteState::DIR_HIT_READ
                } else {
                    regs.hit_state()
                };
            }
            WriteState::DIR_HIT_READ => {
                let set = self.dir.y(self.write_regs.address);
                let regs = &mut self.write_regs;
                let line = self.dir.line(set, regs.way);
                let needs_inval = regs.needs_inval();
                for (word, data) in regs.data.iter_mut().enumerate() {
                    let be = regs.be[word];
                    if be != 0 || needs_inval {
                        let mask = vci::be_to_mask(be);
                        *data = (*data & mask) | (line[word] & !mask);
                    }
                }
                self.r.write = if needs_inval {
                    WriteState::TRT_WRITE_LOCK
                } else {
                    regs.hit_state()
                };
            }
            WriteState::DIR_HIT => {
                self.write_to_line();
                let regs = &mut self.write_regs;
                let owner = regs.owner();
                regs.d_copies = regs.entry.d_copies() & !(1 << regs.srcid);
                regs.count = regs.entry.count - usize::from(owner);
                self.r.write = WriteState::UPT_LOCK;
            }
            WriteState::DIR_HIT_RSP => {
                self.write_to_line();
                if r.write_to_tgt_rsp.is_none() {
                    self.r.write_to_tgt_rsp = Some(self.write_ack());
                    self.r.write = WriteState::IDLE;
                } else {
                    self.r.write = WriteState::RSP;
                }
            }
            WriteState::UPT_LOCK => {
                if r.alloc_upt.granted() != UptClient::WRITE {
                    return;
                }
                let regs = &self.write_regs;
                let index = self.upt.set(UpdateEntry {
                    update: true,
                    brdcast: false,
                    rsp: true,
                    srcid: regs.srcid,
                    trdid: regs.trdid,
                    pktid: regs.pktid,
                    nline,
                    count: regs.count,
                    ..UpdateEntry::default()
                });
                match index {
                    Some(index) => {
                        self.write_regs.upt_index = index;
                        self.r.write = WriteState::UPDATE;
                    }
                    None => self.r.write = WriteState::WAIT_UPT,
                }
            }
            WriteState::WAIT_UPT => {
                self.r.write = WriteState::UPT_LOCK;
            }
            WriteState::UPDATE => {
                if r.write_to_init_cmd.is_some() {
                    return;
                }
                let regs = &self.write_regs;
                let words = regs.word_index..regs.word_index + regs.word_count;
                self.r.write_to_init_cmd = Some(UpdateRequest {
                    brdcast: false,
                    trdid: regs.upt_index,
                    nline,
                    index: regs.word_index,
                    data: regs.data[words.clone()].iter().copied().collect(),
                    we: regs.be[words].iter().map(|&be| be != 0).collect(),
                    d_copies: regs.d_copies,
                });
                // acknowledged once every copy answered
                self.r.write = WriteState::IDLE;
            }
            WriteState::RSP => {
                if r.write_to_tgt_rsp.is_none() {
                    self.r.write_to_tgt_rsp = Some(self.write_ack());
                    self.r.write = WriteState::IDLE;
                }
            }
            WriteState::TRT_LOCK => {
                if r.alloc_trt.granted() != TrtClient::WRITE {
                    return;
                }
                if let Some(index) = self.trt.hit_read(nline) {
                    self.write_regs.trt_index = index;
                    self.r.write = WriteState::TRT_DATA;
                } else {
                    match self.trt.free_index() {
                        Some(index) if !self.trt.hit_write(nline) => {
                            self.write_regs.trt_index = index;
                            self.r.write = WriteState::TRT_SET;
                        }
                        _ => self.r.write = WriteState::WAIT_TRT,
                    }
                }
            }
            WriteState::WAIT_TRT => {
                self.r.write = WriteState::DIR_LOCK;
            }
            WriteState::TRT_SET => {
                let regs = &self.write_regs;
                self.trt.set(
                    regs.trt_index,
                    &NewTransaction {
                        xram_read: true,
                        nline,
                        srcid: regs.srcid,
                        trdid: regs.trdid,
                        pktid: regs.pktid,
                        proc_read: false,
                        cached: false,
                        instruction: false,
                        read_length: 0,
                        word_index: 0,
                        data: &regs.data,
                        be: &regs.be,
                    },
                );
                self.inc(Counter::WRITE_MISS, 1);
                self.r.write = WriteState::XRAM_REQ;
            }
            WriteState::TRT_DATA => {
                let regs = &self.write_regs;
                self.trt.write_data_mask(regs.trt_index, &regs.be, &regs.data);
                self.inc(Counter::WRITE_MISS, 1);
                self.r.write = WriteState::RSP;
            }
            WriteState::XRAM_REQ => {
                if r.write_to_ixr_cmd.is_none() {
                    self.r.write_to_ixr_cmd = Some(vci::XramCommand {
                        trdid: self.write_regs.trt_index,
                        nline,
                        kind: vci::XramCommandKind::READ,
                    });
                    self.r.write = WriteState::RSP;
                }
            }
            WriteState::TRT_WRITE_LOCK => {
                if r.alloc_trt.granted() != TrtClient::WRITE {
                    return;
                }
                match self.trt.free_index() {
                    Some(index) => {
                        self.write_regs.trt_index = index;
                        self.r.write = WriteState::INVAL_LOCK;
                    }
                    None => self.r.write = WriteState::WAIT_TRT,
                }
            }
            WriteState::INVAL_LOCK => {
                if r.alloc_upt.granted() != UptClient::WRITE {
                    return;
                }
                let regs = &self.write_regs;
                let index = self.upt.set(UpdateEntry {
                    update: false,
                    brdcast: true,
                    rsp: true,
                    srcid: regs.srcid,
                    trdid: regs.trdid,
                    pktid: regs.pktid,
                    nline,
                    count: regs.entry.count,
                    ..UpdateEntry::default()
                });
                match index {
                    Some(index) => {
                        self.write_regs.upt_index = index;
                        self.r.write = WriteState::DIR_INVAL;
                    }
                    None => self.r.write = WriteState::WAIT_TRT,
                }
            }
            WriteState::DIR_INVAL => {
                assert!(
                    r.alloc_trt.granted() == TrtClient::WRITE
                        && r.alloc_upt.granted() == UptClient::WRITE,
                    "{}: WRITE invalidates a line without owning the transaction and update tables",
                    self.name
                );
                let regs = &self.write_regs;
                self.trt.set(
                    regs.trt_index,
                    &NewTransaction {
                        xram_read: false,
                        nline,
                        srcid: 0,
                        trdid: 0,
                        pktid: 0,
                        proc_read: false,
                        cached: false,
                        instruction: false,
                        read_length: 0,
                        word_index: 0,
                        data: &[],
                        be: &[],
                    },
                );
                let set = self.dir.y(regs.address);
                self.dir.inval(set, regs.way);
                self.r.write = WriteState::INVAL;
            }
            WriteState::INVAL => {
                if r.write_to_init_cmd.is_some() {
                    return;
                }
                self.r.write_to_init_cmd = Some(UpdateRequest {
                    brdcast: true,
                    trdid: self.write_regs.upt_index,
                    nline,
                    index: 0,
                    data: vci::Words::new(),
                    we: smallvec::SmallVec::new(),
                    d_copies: 0,
                });
                self.r.write = WriteState::XRAM_SEND;
            }
            WriteState::XRAM_SEND => {
                if r.write_to_ixr_cmd.is_some() {
                    return;
                }
                let regs = &self.write_regs;
                self.r.write_to_ixr_cmd = Some(vci::XramCommand {
                    trdid: regs.trt_index,
                    nline,
                    kind: vci::XramCommandKind::WRITE {
                        data: regs.data.iter().copied().collect(),
                    },
                });
                // acknowledged once every copy is invalidated
                self.r.write = WriteState::IDLE;
            }
        }
    }
}
