use super::{
    alloc::{Allocator, DirClient, UptClient},
    directory::DirectoryEntry,
    MemCache, Registers,
};
use crate::{
    interconn::{Interconnect, Network},
    vci, Error,
};
use stats::mem_cache::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CleanupState {
    IDLE,
    DIR_LOCK,
    DIR_WRITE,
    UPT_LOCK,
    UPT_WRITE,
    WRITE_RSP,
    RSP,
}

#[derive(Debug, Default, Clone)]
pub(super) struct Local {
    srcid: usize,
    trdid: usize,
    pktid: u32,
    nline: u64,
    entry: DirectoryEntry,
    way: usize,
    upt_index: usize,
    /// Deferred response released by the last cleanup of an invalidation
    upt_rsp: Option<vci::Response>,
}

impl Local {
    fn instruction(&self) -> bool {
        self.trdid == 1
    }
}

impl MemCache {
    /// Unregisters the copies evicted by the L1 caches.
    ///
    /// A cleanup for a line whose copies are no longer in the directory
    /// answers a pending invalidation instead.
    pub(super) fn cleanup_fsm(
        &mut self,
        r: &Registers,
        cmd: &mut Network<vci::CleanupCommand>,
        rsp: &mut Network<vci::CleanupResponse>,
    ) -> Result<(), Error> {
        match r.cleanup {
            CleanupState::IDLE => {
                let Some(cleanup) = cmd.pop(0) else {
                    return Ok(());
                };
                if cleanup.srcid >= self.num_procs {
                    return Err(Error::illegal(&self.name, &cleanup));
                }
                if cleanup.trdid > 1 {
                    return Err(Error::malformed(
                        &self.name,
                        format!("cleanup with unknown cache type: {cleanup}"),
                    ));
                }
                let address = self.dir.line_address(cleanup.nline);
                if !self.mapping.contains(address) {
                    return Err(Error::OutOfSegment {
                        component: self.name.clone(),
                        address,
                    });
                }
                let regs = &mut self.cleanup_regs;
                regs.srcid = cleanup.srcid;
                regs.trdid = cleanup.trdid;
                regs.pktid = cleanup.pktid;
                regs.nline = cleanup.nline;
                self.inc(Counter::CLEANUP, 1);
                self.r.cleanup = CleanupState::DIR_LOCK;
            }
            CleanupState::DIR_LOCK => {
                if r.alloc_dir.granted() != DirClient::CLEANUP {
                    return Ok(());
                }
                let address = self.dir.line_address(self.cleanup_regs.nline);
                let (entry, way) = self.dir.read(address);
                let regs = &mut self.cleanup_regs;
                regs.entry = entry;
                regs.way = way;
                self.r.cleanup = if entry.valid && entry.has_copy(regs.srcid, regs.instruction()) {
                    CleanupState::DIR_WRITE
                } else {
                    CleanupState::UPT_LOCK
                };
            }
            CleanupState::DIR_WRITE => {
                let regs = &mut self.cleanup_regs;
                regs.entry.remove_copy(regs.srcid, regs.instruction());
                let set = self.dir.y(self.dir.line_address(regs.nline));
                self.dir.write(set, regs.way, regs.entry);
                self.r.cleanup = CleanupState::RSP;
            }
            CleanupState::UPT_LOCK => {
                if r.alloc_upt.granted() != UptClient::CLEANUP {
                    return Ok(());
                }
                let nline = self.cleanup_regs.nline;
                match self.upt.search_inval(nline) {
                    Some(index) => {
                        self.cleanup_regs.upt_index = index;
                        self.r.cleanup = CleanupState::UPT_WRITE;
                    }
                    None => {
                        log::warn!(
                            "{}: cleanup of line {nline:#x} from {} matches no copy",
                            self.name,
                            self.cleanup_regs.srcid
                        );
                        self.r.cleanup = CleanupState::RSP;
                    }
                }
            }
            CleanupState::UPT_WRITE => {
                let index = self.cleanup_regs.upt_index;
                let remaining = self.upt.decrement(index).ok_or_else(|| {
                    Error::malformed(&self.name, format!("cleanup for free update entry {index}"))
                })?;
                if remaining > 0 {
                    self.r.cleanup = CleanupState::RSP;
                    return Ok(());
                }
                let entry = *self.upt.get(index);
                self.upt.clear(index);
                if entry.rsp {
                    self.cleanup_regs.upt_rsp =
                        Some(vci::Response::ack(entry.srcid, entry.trdid, entry.pktid));
                    self.r.cleanup = CleanupState::WRITE_RSP;
                } else {
                    self.r.cleanup = CleanupState::RSP;
                }
            }
            CleanupState::WRITE_RSP => {
                if r.cleanup_to_tgt_rsp.is_none() {
                    self.r.cleanup_to_tgt_rsp = self.cleanup_regs.upt_rsp.take();
                    self.r.cleanup = CleanupState::RSP;
                }
            }
            CleanupState::RSP => {
                let regs = &self.cleanup_regs;
                if rsp.has_buffer(regs.srcid) {
                    rsp.push(
                        0,
                        regs.srcid,
                        vci::CleanupResponse {
                            srcid: regs.srcid,
                            trdid: regs.trdid,
                            pktid: regs.pktid,
                            error: false,
                        },
                    );
                    self.r.cleanup = CleanupState::IDLE;
                }
            }
        }
        Ok(())
    }
}
