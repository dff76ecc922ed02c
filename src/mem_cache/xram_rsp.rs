use super::{
    alloc::{Allocator, DirClient, TrtClient, UptClient},
    directory::DirectoryEntry,
    transaction_tab::{NewTransaction, TransactionEntry},
    update_tab::UpdateEntry,
    InvalRequest, MemCache, Registers,
};
use crate::vci;
use stats::mem_cache::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum XramRspState {
    IDLE,
    DIR_LOCK,
    TRT_COPY,
    INVAL_LOCK,
    INVAL_WAIT,
    DIR_UPDT,
    TRT_DIRTY,
    DIR_RSP,
    INVAL,
    WRITE_DIRTY,
    ERROR,
}

#[derive(Debug, Default, Clone)]
pub(super) struct Local {
    trt_index: usize,
    trt_buf: TransactionEntry,
    victim: DirectoryEntry,
    victim_set: usize,
    victim_way: usize,
    victim_nline: u64,
    victim_data: vci::Words,
    /// The victim has copies to invalidate
    victim_inval: bool,
    upt_index: usize,
}

impl Local {
    fn after_dir_rsp(&self) -> XramRspState {
        if self.victim_inval {
            XramRspState::INVAL
        } else if self.victim.dirty {
            XramRspState::WRITE_DIRTY
        } else {
            XramRspState::IDLE
        }
    }
}

impl MemCache {
    fn xram_rsp_response(&self) -> vci::Response {
        let buf = &self.xram_rsp_regs.trt_buf;
        let words = buf.word_index..buf.word_index + buf.read_length;
        vci::Response::new(
            buf.srcid,
            buf.trdid,
            buf.pktid,
            buf.data[words].iter().copied().collect(),
        )
        .with_error(buf.error)
    }

    /// Installs fetched lines, evicting a victim line.
    pub(super) fn xram_rsp_fsm(&mut self, r: &Registers) {
        match r.xram_rsp {
            XramRspState::IDLE => {
                let lines = r.ixr_rsp_to_xram_rsp_rok.len();
                let ptr = self.xram_rsp_regs.trt_index;
                let ready = (1..=lines)
                    .map(|i| (ptr + i) % lines)
                    .find(|&index| r.ixr_rsp_to_xram_rsp_rok[index]);
                if let Some(index) = ready {
                    self.r.ixr_rsp_to_xram_rsp_rok[index] = false;
                    self.xram_rsp_regs.trt_index = index;
                    self.r.xram_rsp = XramRspState::DIR_LOCK;
                }
            }
            XramRspState::DIR_LOCK => {
                if r.alloc_dir.granted() == DirClient::XRAM_RSP {
                    self.r.xram_rsp = XramRspState::TRT_COPY;
                }
            }
            XramRspState::TRT_COPY => {
                if r.alloc_trt.granted() != TrtClient::XRAM_RSP {
                    return;
                }
                let index = self.xram_rsp_regs.trt_index;
                let buf = self.trt.get(index).clone();
                if buf.error {
                    self.trt.erase(index);
                    self.xram_rsp_regs.trt_buf = buf;
                    self.r.xram_rsp = XramRspState::ERROR;
                    return;
                }
                let set = self.dir.y(self.dir.line_address(buf.nline));
                let (victim, way) = self.dir.select(set);
                let regs = &mut self.xram_rsp_regs;
                regs.victim_data = self.dir.line(set, way).iter().copied().collect();
                regs.victim_inval = victim.valid && victim.count > 0;
                regs.victim_nline = self.dir.entry_nline(set, way);
                regs.victim = victim;
                regs.victim_set = set;
                regs.victim_way = way;
                regs.trt_buf = buf;
                self.r.xram_rsp = XramRspState::INVAL_LOCK;
            }
            XramRspState::INVAL_LOCK => {
                if r.alloc_upt.granted() != UptClient::XRAM_RSP {
                    return;
                }
                let regs = &self.xram_rsp_regs;
                let pending = self.upt.search_inval(regs.trt_buf.nline).is_some();
                self.r.xram_rsp = if pending || (self.upt.is_full() && regs.victim_inval) {
                    XramRspState::INVAL_WAIT
                } else {
                    XramRspState::DIR_UPDT
                };
            }
            XramRspState::INVAL_WAIT => {
                self.r.xram_rsp = XramRspState::DIR_LOCK;
            }
            XramRspState::DIR_UPDT => {
                let regs = &self.xram_rsp_regs;
                let buf = &regs.trt_buf;
                let (set, way) = (regs.victim_set, regs.victim_way);
                self.dir.line_mut(set, way).copy_from_slice(&buf.data);
                let mut entry = DirectoryEntry {
                    valid: true,
                    dirty: buf.has_writes(),
                    tag: buf.nline / self.dir.sets() as u64,
                    ..DirectoryEntry::default()
                };
                if buf.proc_read && buf.cached {
                    entry.add_copy(buf.srcid, buf.instruction, self.copies_limit);
                }
                self.dir.write(set, way, entry);
                log::debug!(
                    "{}: install line {:#x} in way {way}, evict {:#x} ({})",
                    self.name,
                    buf.nline,
                    regs.victim_nline,
                    regs.victim
                );

                if regs.victim_inval {
                    let index = self
                        .upt
                        .set(UpdateEntry {
                            update: false,
                            brdcast: regs.victim.is_cnt(),
                            rsp: false,
                            nline: regs.victim_nline,
                            count: regs.victim.count,
                            ..UpdateEntry::default()
                        })
                        .expect("update table has a free entry after INVAL_LOCK");
                    self.xram_rsp_regs.upt_index = index;
                }
                let regs = &self.xram_rsp_regs;
                if !regs.victim.dirty {
                    self.trt.erase(regs.trt_index);
                }
                self.r.xram_rsp = if regs.victim.dirty {
                    XramRspState::TRT_DIRTY
                } else if regs.trt_buf.proc_read {
                    XramRspState::DIR_RSP
                } else if regs.victim_inval {
                    XramRspState::INVAL
                } else {
                    XramRspState::IDLE
                };
            }
            XramRspState::TRT_DIRTY => {
                if r.alloc_trt.granted() != TrtClient::XRAM_RSP {
                    return;
                }
                let regs = &self.xram_rsp_regs;
                self.trt.set(
                    regs.trt_index,
                    &NewTransaction {
                        xram_read: false,
                        nline: regs.victim_nline,
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
                self.r.xram_rsp = if regs.trt_buf.proc_read {
                    XramRspState::DIR_RSP
                } else if regs.victim_inval {
                    XramRspState::INVAL
                } else {
                    XramRspState::WRITE_DIRTY
                };
            }
            XramRspState::DIR_RSP => {
                if r.xram_rsp_to_tgt_rsp.is_none() {
                    self.r.xram_rsp_to_tgt_rsp = Some(self.xram_rsp_response());
                    self.r.xram_rsp = self.xram_rsp_regs.after_dir_rsp();
                }
            }
            XramRspState::INVAL => {
                if r.xram_rsp_to_init_cmd.is_some() {
                    return;
                }
                let regs = &self.xram_rsp_regs;
                self.r.xram_rsp_to_init_cmd = Some(InvalRequest {
                    brdcast: regs.victim.is_cnt(),
                    trdid: regs.upt_index,
                    nline: regs.victim_nline,
                    d_copies: regs.victim.d_copies(),
                    i_copies: regs.victim.i_copies(),
                });
                self.r.xram_rsp = if regs.victim.dirty {
                    XramRspState::WRITE_DIRTY
                } else {
                    XramRspState::IDLE
                };
            }
            XramRspState::WRITE_DIRTY => {
                if r.xram_rsp_to_ixr_cmd.is_some() {
                    return;
                }
                let regs = &mut self.xram_rsp_regs;
                self.r.xram_rsp_to_ixr_cmd = Some(vci::XramCommand {
                    trdid: regs.trt_index,
                    nline: regs.victim_nline,
                    kind: vci::XramCommandKind::WRITE {
                        data: std::mem::take(&mut regs.victim_data),
                    },
                });
                self.inc(Counter::WRITE_DIRTY, 1);
                self.r.xram_rsp = XramRspState::IDLE;
            }
            XramRspState::ERROR => {
                let buf = &self.xram_rsp_regs.trt_buf;
                if !buf.proc_read {
                    log::warn!(
                        "{}: fetch of line {:#x} failed, {} merged writes are lost",
                        self.name,
                        buf.nline,
                        buf.be.iter().filter(|&&be| be != 0).count()
                    );
                    self.r.xram_rsp = XramRspState::IDLE;
                } else if r.xram_rsp_to_tgt_rsp.is_none() {
                    self.r.xram_rsp_to_tgt_rsp = Some(self.xram_rsp_response());
                    self.r.xram_rsp = XramRspState::IDLE;
                }
            }
        }
    }
}
