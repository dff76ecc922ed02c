use super::{
    alloc::{Allocator, DirClient, TrtClient},
    directory::DirectoryEntry,
    transaction_tab::NewTransaction,
    MemCache, Registers,
};
use crate::vci;
use stats::mem_cache::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ReadState {
    IDLE,
    DIR_LOCK,
    DIR_HIT,
    RSP,
    TRT_LOCK,
    TRT_SET,
    XRAM_REQ,
}

#[derive(Debug, Default, Clone)]
pub(super) struct Local {
    entry: DirectoryEntry,
    way: usize,
    data: vci::Words,
    trt_index: usize,
}

impl MemCache {
    pub(super) fn read_fsm(&mut self, r: &Registers) {
        let Some(req) = self.read_fifo.first().cloned() else {
            return;
        };
        let set = self.dir.y(req.address);
        let x = self.dir.x(req.address);
        let nline = self.dir.nline(req.address);

        match r.read {
            ReadState::IDLE => {
                self.r.read = ReadState::DIR_LOCK;
            }
            ReadState::DIR_LOCK => {
                if r.alloc_dir.granted() != DirClient::READ {
                    return;
                }
                let (entry, way) = self.dir.read(req.address);
                log::debug!("{}: READ {req} dir={entry}", self.name);
                self.read_regs.entry = entry;
                self.read_regs.way = way;
                self.r.read = if entry.valid {
                    ReadState::DIR_HIT
                } else {
                    ReadState::TRT_LOCK
                };
            }
            ReadState::DIR_HIT => {
                let mut entry = self.read_regs.entry;
                let way = self.read_regs.way;
                if req.cached {
                    entry.add_copy(req.srcid, req.instruction, self.copies_limit);
                }
                self.dir.write(set, way, entry);
                self.read_regs.data = self.dir.line(set, way)[x..x + req.length]
                    .iter()
                    .copied()
                    .collect();
                self.r.read = ReadState::RSP;
            }
            ReadState::RSP => {
                if r.read_to_tgt_rsp.is_some() {
                    return;
                }
                self.r.read_to_tgt_rsp = Some(vci::Response::new(
                    req.srcid,
                    req.trdid,
                    req.pktid,
                    std::mem::take(&mut self.read_regs.data),
                ));
                self.read_fifo.dequeue();
                self.inc(Counter::READ, 1);
                self.r.read = ReadState::IDLE;
            }
            ReadState::TRT_LOCK => {
                if r.alloc_trt.granted() != TrtClient::READ {
                    return;
                }
                match self.trt.free_index() {
                    Some(index) if self.trt.hit_read(nline).is_none() && !self.trt.hit_write(nline) => {
                        self.read_regs.trt_index = index;
                        self.r.read = ReadState::TRT_SET;
                    }
                    _ => {
                        // retried once the pending transaction retires
                        self.r.read = ReadState::IDLE;
                    }
                }
            }
            ReadState::TRT_SET => {
                self.trt.set(
                    self.read_regs.trt_index,
                    &NewTransaction {
                        xram_read: true,
                        nline,
                        srcid: req.srcid,
                        trdid: req.trdid,
                        pktid: req.pktid,
                        proc_read: true,
                        cached: req.cached,
                        instruction: req.instruction,
                        read_length: req.length,
                        word_index: x,
                        data: &[],
                        be: &[],
                    },
                );
                self.inc(Counter::READ_MISS, 1);
                self.r.read = ReadState::XRAM_REQ;
            }
            ReadState::XRAM_REQ => {
                if r.read_to_ixr_cmd.is_some() {
                    return;
                }
                self.r.read_to_ixr_cmd = Some(vci::XramCommand {
                    trdid: self.read_regs.trt_index,
                    nline,
                    kind: vci::XramCommandKind::READ,
                });
                self.read_fifo.dequeue();
                self.inc(Counter::READ, 1);
                self.r.read = ReadState::IDLE;
            }
        }
    }
}
