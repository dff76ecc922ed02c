use super::{Registers, XCache};
use crate::{
    interconn::{Interconnect, Network},
    iss::{DataRequestKind, Iss},
    vci::{self, TransactionType},
};
use stats::l1::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CmdState {
    IDLE,
    DATA_MISS,
    DATA_UNC,
    INS_MISS,
    INS_UNC,
    DATA_WRITE,
}

impl<I> XCache<I>
where
    I: Iss,
{
    /// Sends reads and write bursts to the directory.
    ///
    /// Reads take priority over writes, but a read is held back while
    /// a write to the same line sits in the write buffer.
    pub(super) fn cmd_fsm(&mut self, r: &Registers, net: &mut Network<vci::Command>) {
        use CmdState as S;
        let srcid = self.srcid;
        let line_bytes = self.words * 4;
        match r.cmd {
            S::IDLE => {
                if r.dcache_miss_req && self.wbuf.miss(r.dcache_addr_save) {
                    self.r.dcache_miss_req = false;
                    self.inc(Counter::DMISS_TRANSACTION, 1);
                    self.r.cmd = S::DATA_MISS;
                } else if r.dcache_unc_req && self.wbuf.miss(r.dcache_addr_save) {
                    self.r.dcache_unc_req = false;
                    self.inc(Counter::UNC_TRANSACTION, 1);
                    self.r.cmd = S::DATA_UNC;
                } else if r.icache_miss_req && self.wbuf.miss(r.icache_addr_save) {
                    self.r.icache_miss_req = false;
                    self.inc(Counter::IMISS_TRANSACTION, 1);
                    self.r.cmd = S::INS_MISS;
                } else if r.icache_unc_req && self.wbuf.miss(r.icache_addr_save) {
                    self.r.icache_unc_req = false;
                    self.inc(Counter::UNC_TRANSACTION, 1);
                    self.r.cmd = S::INS_UNC;
                } else if self.wbuf.rok() {
                    self.r.cmd = S::DATA_WRITE;
                }
            }
            S::DATA_MISS | S::INS_MISS => {
                if !net.has_buffer(0) {
                    return;
                }
                let (addr, kind) = if r.cmd == S::DATA_MISS {
                    (r.dcache_addr_save, TransactionType::DATA_MISS)
                } else {
                    (r.icache_addr_save, TransactionType::INS_MISS)
                };
                let mask = self.line_mask();
                net.push(
                    srcid,
                    0,
                    vci::Command::read(srcid, addr & mask, line_bytes, kind, true),
                );
                self.r.cmd = S::IDLE;
            }
            S::DATA_UNC => {
                if !net.has_buffer(0) {
                    return;
                }
                let addr = r.dcache_addr_save & !3;
                let cmd = match r.dcache_kind_save {
                    DataRequestKind::LL => vci::Command::locked_read(srcid, addr),
                    DataRequestKind::SC => {
                        vci::Command::store_cond(srcid, addr, r.dcache_wdata_save)
                    }
                    _ => vci::Command::read(srcid, addr, 4, TransactionType::DATA_UNC, false),
                };
                net.push(srcid, 0, cmd);
                self.r.cmd = S::IDLE;
            }
            S::INS_UNC => {
                if !net.has_buffer(0) {
                    return;
                }
                let addr = r.icache_addr_save & !3;
                net.push(
                    srcid,
                    0,
                    vci::Command::read(srcid, addr, 4, TransactionType::INS_UNC, false),
                );
                self.r.cmd = S::IDLE;
            }
            S::DATA_WRITE => {
                if !net.has_buffer(0) {
                    return;
                }
                if let Some(burst) = self.wbuf.burst() {
                    self.inc(Counter::WRITE_TRANSACTION, 1);
                    self.inc(Counter::WRITE_TRANSACTION_LENGTH, burst.data.len() as u64);
                    self.wbuf.sent(burst.index);
                    net.push(
                        srcid,
                        0,
                        vci::Command::write(srcid, burst.index, burst.address, burst.be, burst.data),
                    );
                }
                self.r.cmd = S::IDLE;
            }
        }
        if self.r.cmd != r.cmd {
            log::trace!("{}::cmd: {} -> {}", self.name, r.cmd, self.r.cmd);
        }
    }
}
