use super::{
    alloc::{Allocator, DirClient, TrtClient, UptClient},
    directory::DirectoryEntry,
    transaction_tab::NewTransaction,
    update_tab::UpdateEntry,
    LlscRequest, MemCache, Registers, UpdateRequest,
};
use crate::vci;
use smallvec::smallvec;
use stats::mem_cache::Counter;

pub use crate::vci::{SC_FAILURE, SC_SUCCESS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum LlscState {
    IDLE,
    LL_DIR_LOCK,
    LL_DIR_HIT,
    LL_RSP,
    SC_DIR_LOCK,
    SC_DIR_HIT,
    SC_UPT_LOCK,
    SC_WAIT_UPT,
    SC_UPDATE,
    SC_TRT_LOCK,
    SC_INVAL_LOCK,
    SC_DIR_INVAL,
    SC_INVAL,
    SC_XRAM_SEND,
    SC_RSP_FALSE,
    SC_RSP_TRUE,
    LLSC_TRT_LOCK,
    LLSC_TRT_SET,
    LLSC_XRAM_REQ,
}

#[derive(Debug, Default, Clone)]
pub(super) struct Local {
    entry: DirectoryEntry,
    way: usize,
    /// Word returned by a LL
    data: u32,
    /// Line written back by a SC on a line with uncountable copies
    line: vci::Words,
    trt_index: usize,
    upt_index: usize,
}

impl MemCache {
    fn llsc_respond(&mut self, req: &LlscRequest, data: u32) {
        self.r.llsc_to_tgt_rsp = Some(vci::Response::new(
            req.srcid,
            req.trdid,
            req.pktid,
            smallvec![data],
        ));
        self.llsc_fifo.dequeue();
    }

    pub(super) fn llsc_fsm(&mut self, r: &Registers) {
        let Some(req) = self.llsc_fifo.first().cloned() else {
            return;
        };
        let set = self.dir.y(req.address);
        let x = self.dir.x(req.address);
        let nline = self.dir.nline(req.address);
        let wdata = req.sc.unwrap_or(0);

        match r.llsc {
            LlscState::IDLE => {
                self.r.llsc = if req.sc.is_some() {
                    LlscState::SC_DIR_LOCK
                } else {
                    LlscState::LL_DIR_LOCK
                };
            }
            LlscState::LL_DIR_LOCK => {
                if r.alloc_dir.granted() != DirClient::LLSC {
                    return;
                }
                let (entry, way) = self.dir.read(req.address);
                self.llsc_regs.entry = entry;
                self.llsc_regs.way = way;
                self.atomic.set(req.srcid, req.address);
                self.r.llsc = if entry.valid {
                    LlscState::LL_DIR_HIT
                } else {
                    LlscState::LLSC_TRT_LOCK
                };
            }
            LlscState::LL_DIR_HIT => {
                let way = self.llsc_regs.way;
                self.dir.write(
                    set,
                    way,
                    DirectoryEntry {
                        lock: true,
                        ..self.llsc_regs.entry
                    },
                );
                self.llsc_regs.data = self.dir.line(set, way)[x];
                self.r.llsc = LlscState::LL_RSP;
            }
            LlscState::LL_RSP => {
                if r.llsc_to_tgt_rsp.is_none() {
                    self.llsc_respond(&req, self.llsc_regs.data);
                    self.inc(Counter::LL, 1);
                    self.r.llsc = LlscState::IDLE;
                }
            }
            LlscState::SC_DIR_LOCK => {
                if r.alloc_dir.granted() != DirClient::LLSC {
                    return;
                }
                let (entry, way) = self.dir.read(req.address);
                let reserved = self.atomic.is_atomic(req.srcid, req.address);
                self.r.llsc = if !reserved {
                    LlscState::SC_RSP_FALSE
                } else if self.sc_failure.fail() {
                    log::debug!("{}: forced failure of {req}", self.name);
                    LlscState::SC_RSP_FALSE
                } else {
                    self.llsc_regs.entry = entry;
                    self.llsc_regs.way = way;
                    if !entry.valid {
                        LlscState::LLSC_TRT_LOCK
                    } else if (entry.is_cnt() && entry.count > 0) || entry.i_copies() != 0 {
                        LlscState::SC_TRT_LOCK
                    } else {
                        LlscState::SC_DIR_HIT
                    }
                };
            }
            LlscState::SC_DIR_HIT => {
                let entry = DirectoryEntry {
                    dirty: true,
                    lock: true,
                    ..self.llsc_regs.entry
                };
                let way = self.llsc_regs.way;
                self.dir.write(set, way, entry);
                self.dir.line_mut(set, way)[x] = wdata;
                self.atomic.reset(req.address);
                self.r.llsc = if entry.count > 0 {
                    LlscState::SC_UPT_LOCK
                } else {
                    LlscState::SC_RSP_TRUE
                };
            }
            LlscState::SC_UPT_LOCK => {
                if r.alloc_upt.granted() != UptClient::LLSC {
                    return;
                }
                let index = self.upt.set(UpdateEntry {
                    update: true,
                    brdcast: false,
                    rsp: true,
                    srcid: req.srcid,
                    trdid: req.trdid,
                    pktid: req.pktid,
                    nline,
                    count: self.llsc_regs.entry.count,
                    ..UpdateEntry::default()
                });
                match index {
                    Some(index) => {
                        self.llsc_regs.upt_index = index;
                        self.r.llsc = LlscState::SC_UPDATE;
                    }
                    None => self.r.llsc = LlscState::SC_WAIT_UPT,
                }
            }
            LlscState::SC_WAIT_UPT => {
                self.r.llsc = LlscState::SC_UPT_LOCK;
            }
            LlscState::SC_UPDATE => {
                if r.llsc_to_init_cmd.is_some() {
                    return;
                }
                self.r.llsc_to_init_cmd = Some(UpdateRequest {
                    brdcast: false,
                    trdid: self.llsc_regs.upt_index,
                    nline,
                    index: x,
                    data: smallvec![wdata],
                    we: smallvec![true],
                    d_copies: self.llsc_regs.entry.d_copies(),
                });
                self.llsc_fifo.dequeue();
                self.inc(Counter::SC, 1);
                // answered once every copy is updated
                self.r.llsc = LlscState::IDLE;
            }
            LlscState::SC_TRT_LOCK => {
                if r.alloc_trt.granted() != TrtClient::LLSC {
                    return;
                }
                if r.llsc_to_ixr_cmd.is_some() {
                    self.r.llsc = LlscState::IDLE;
                    return;
                }
                let mut line: vci::Words = self
                    .dir
                    .line(set, self.llsc_regs.way)
                    .iter()
                    .copied()
                    .collect();
                line[x] = wdata;
                self.llsc_regs.line = line;
                match self.trt.free_index() {
                    Some(index) => {
                        self.llsc_regs.trt_index = index;
                        self.r.llsc = LlscState::SC_INVAL_LOCK;
                    }
                    None => self.r.llsc = LlscState::IDLE,
                }
            }
            LlscState::SC_INVAL_LOCK => {
                if r.alloc_upt.granted() != UptClient::LLSC {
                    return;
                }
                let index = self.upt.set(UpdateEntry {
                    update: false,
                    brdcast: true,
                    rsp: true,
                    srcid: req.srcid,
                    trdid: req.trdid,
                    pktid: req.pktid,
                    nline,
                    count: self.llsc_regs.entry.count,
                    ..UpdateEntry::default()
                });
                match index {
                    Some(index) => {
                        self.llsc_regs.upt_index = index;
                        self.r.llsc = LlscState::SC_DIR_INVAL;
                    }
                    None => self.r.llsc = LlscState::IDLE,
                }
            }
            LlscState::SC_DIR_INVAL => {
                assert!(
                    r.alloc_trt.granted() == TrtClient::LLSC
                        && r.alloc_upt.granted() == UptClient::LLSC,
                    "{}: LLSC invalidates a line without owning the transaction and update tables",
                    self.name
                );
                self.trt.set(
                    self.llsc_regs.trt_index,
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
                self.atomic.reset(req.address);
                self.dir.inval(set, self.llsc_regs.way);
                self.r.llsc = LlscState::SC_INVAL;
            }
            LlscState::SC_INVAL => {
                if r.llsc_to_init_cmd.is_some() {
                    return;
                }
                self.r.llsc_to_init_cmd = Some(UpdateRequest {
                    brdcast: true,
                    trdid: self.llsc_regs.upt_index,
                    nline,
                    index: 0,
                    data: vci::Words::new(),
                    we: smallvec::SmallVec::new(),
                    d_copies: 0,
                });
                self.r.llsc = LlscState::SC_XRAM_SEND;
            }
            LlscState::SC_XRAM_SEND => {
                // the mailbox was checked in SC_TRT_LOCK and only LLSC fills it
                assert!(
                    r.llsc_to_ixr_cmd.is_none(),
                    "{}: LLSC write back requested twice",
                    self.name
                );
                self.r.llsc_to_ixr_cmd = Some(vci::XramCommand {
                    trdid: self.llsc_regs.trt_index,
                    nline,
                    kind: vci::XramCommandKind::WRITE {
                        data: std::mem::take(&mut self.llsc_regs.line),
                    },
                });
                self.llsc_fifo.dequeue();
                self.inc(Counter::SC, 1);
                self.r.llsc = LlscState::IDLE;
            }
            LlscState::SC_RSP_FALSE => {
                if r.llsc_to_tgt_rsp.is_none() {
                    self.llsc_respond(&req, SC_FAILURE);
                    self.inc(Counter::SC, 1);
                    self.inc(Counter::SC_FAIL, 1);
                    self.r.llsc = LlscState::IDLE;
                }
            }
            LlscState::SC_RSP_TRUE => {
                if r.llsc_to_tgt_rsp.is_none() {
                    self.llsc_respond(&req, SC_SUCCESS);
                    self.inc(Counter::SC, 1);
                    self.r.llsc = LlscState::IDLE;
                }
            }
            LlscState::LLSC_TRT_LOCK => {
                if r.alloc_trt.granted() != TrtClient::LLSC {
                    return;
                }
                match self.trt.free_index() {
                    Some(index) if self.trt.hit_read(nline).is_none() && !self.trt.hit_write(nline) => {
                        self.llsc_regs.trt_index = index;
                        self.r.llsc = LlscState::LLSC_TRT_SET;
                    }
                    _ => self.r.llsc = LlscState::IDLE,
                }
            }
            LlscState::LLSC_TRT_SET => {
                let index = self.llsc_regs.trt_index;
                match req.sc {
                    None => self.trt.set(
                        index,
                        &NewTransaction {
                            xram_read: true,
                            nline,
                            srcid: req.srcid,
                            trdid: req.trdid,
                            pktid: req.pktid,
                            proc_read: true,
                            cached: false,
                            instruction: false,
                            read_length: 1,
                            word_index: x,
                            data: &[],
                            be: &[],
                        },
                    ),
                    Some(wdata) => {
                        self.atomic.reset(req.address);
                        let mut be = vec![0; self.words];
                        let mut data = vec![0; self.words];
                        be[x] = 0xF;
                        data[x] = wdata;
                        self.trt.set(
                            index,
                            &NewTransaction {
                                xram_read: true,
                                nline,
                                srcid: req.srcid,
                                trdid: req.trdid,
                                pktid: req.pktid,
                                proc_read: false,
                                cached: false,
                                instruction: false,
                                read_length: 0,
                                word_index: 0,
                                data: &data,
                                be: &be,
                            },
                        );
                    }
                }
                self.r.llsc = LlscState::LLSC_XRAM_REQ;
            }
            LlscState::LLSC_XRAM_REQ => {
                if r.llsc_to_ixr_cmd.is_some() {
                    return;
                }
                self.r.llsc_to_ixr_cmd = Some(vci::XramCommand {
                    trdid: self.llsc_regs.trt_index,
                    nline,
                    kind: vci::XramCommandKind::READ,
                });
                if req.sc.is_some() {
                    self.r.llsc = LlscState::SC_RSP_TRUE;
                } else {
                    self.llsc_fifo.dequeue();
                    self.inc(Counter::LL, 1);
                    self.r.llsc = LlscState::IDLE;
                }
            }
        }
    }
}
