use super::{Registers, XCache};
use crate::{
    interconn::{Interconnect, Networks},
    iss::Iss,
    vci, Error,
};
use stats::l1::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CleanupState {
    CMD,
    DCACHE_RSP,
    ICACHE_RSP,
}

/// Transaction id of instruction cache cleanups.
const ICACHE_TRDID: usize = 1;
const DCACHE_TRDID: usize = 0;

impl<I> XCache<I>
where
    I: Iss,
{
    /// Reports evicted lines to the directory, one at a time.
    pub(super) fn cleanup_fsm(&mut self, r: &Registers, net: &mut Networks) -> Result<(), Error> {
        use CleanupState as S;
        match r.cleanup {
            S::CMD => {
                let (nline, trdid, next) = if r.dcache_cleanup_req {
                    (r.dcache_cleanup_line, DCACHE_TRDID, S::DCACHE_RSP)
                } else if r.icache_cleanup_req {
                    (r.icache_cleanup_line, ICACHE_TRDID, S::ICACHE_RSP)
                } else {
                    return Ok(());
                };
                if !net.cleanup_cmd.has_buffer(0) {
                    return Ok(());
                }
                self.inc(Counter::CLEANUP, 1);
                net.cleanup_cmd.push(
                    self.srcid,
                    0,
                    vci::CleanupCommand {
                        srcid: self.srcid,
                        trdid,
                        pktid: 0,
                        nline,
                    },
                );
                self.r.cleanup = next;
            }
            S::DCACHE_RSP | S::ICACHE_RSP => {
                let Some(rsp) = net.cleanup_rsp.pop(self.srcid) else {
                    return Ok(());
                };
                let expected = if r.cleanup == S::DCACHE_RSP {
                    DCACHE_TRDID
                } else {
                    ICACHE_TRDID
                };
                if rsp.trdid != expected || rsp.error {
                    return Err(Error::malformed(
                        &self.name,
                        format!("unexpected cleanup acknowledge {rsp} in {}", r.cleanup),
                    ));
                }
                if r.cleanup == S::DCACHE_RSP {
                    self.r.dcache_cleanup_req = false;
                } else {
                    self.r.icache_cleanup_req = false;
                }
                self.r.cleanup = S::CMD;
            }
        }
        if self.r.cleanup != r.cleanup {
            log::trace!("{}::cleanup: {} -> {}", self.name, r.cleanup, self.r.cleanup);
        }
        Ok(())
    }
}
