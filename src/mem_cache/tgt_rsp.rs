use super::{MemCache, Registers};
use crate::{
    interconn::{Interconnect, Network},
    vci,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TgtRspState {
    READ_IDLE,
    WRITE_IDLE,
    LLSC_IDLE,
    XRAM_IDLE,
    INIT_IDLE,
    CLEANUP_IDLE,
    READ,
    WRITE,
    LLSC,
    XRAM,
    INIT,
    CLEANUP,
}

type Mailbox = fn(&mut Registers) -> &mut Option<vci::Response>;

impl MemCache {
    /// Sends the responses of all FSMs on the direct network.
    ///
    /// Sources are served round-robin, starting after the last one.
    pub(super) fn tgt_rsp_fsm(&mut self, r: &Registers, net: &mut Network<vci::Response>) {
        use TgtRspState as S;
        let pending = [
            (r.read_to_tgt_rsp.is_some(), S::READ),
            (r.write_to_tgt_rsp.is_some(), S::WRITE),
            (r.llsc_to_tgt_rsp.is_some(), S::LLSC),
            (r.xram_rsp_to_tgt_rsp.is_some(), S::XRAM),
            (r.init_rsp_to_tgt_rsp.is_some(), S::INIT),
            (r.cleanup_to_tgt_rsp.is_some(), S::CLEANUP),
        ];
        let (mailbox, idle): (Mailbox, S) = match r.tgt_rsp {
            S::READ => (|r| &mut r.read_to_tgt_rsp, S::READ_IDLE),
            S::WRITE => (|r| &mut r.write_to_tgt_rsp, S::WRITE_IDLE),
            S::LLSC => (|r| &mut r.llsc_to_tgt_rsp, S::LLSC_IDLE),
            S::XRAM => (|r| &mut r.xram_rsp_to_tgt_rsp, S::XRAM_IDLE),
            S::INIT => (|r| &mut r.init_rsp_to_tgt_rsp, S::INIT_IDLE),
            S::CLEANUP => (|r| &mut r.cleanup_to_tgt_rsp, S::CLEANUP_IDLE),
            idle => {
                let last = match idle {
                    S::READ_IDLE => 0,
                    S::WRITE_IDLE => 1,
                    S::LLSC_IDLE => 2,
                    S::XRAM_IDLE => 3,
                    S::INIT_IDLE => 4,
                    _ => 5,
                };
                if let Some((_, next)) = (1..=pending.len())
                    .map(|i| pending[(last + i) % pending.len()])
                    .find(|(requested, _)| *requested)
                {
                    self.r.tgt_rsp = next;
                }
                return;
            }
        };

        let Some(srcid) = mailbox(&mut self.r).as_ref().map(|rsp| rsp.srcid) else {
            self.r.tgt_rsp = idle;
            return;
        };
        if !net.has_buffer(srcid) {
            return;
        }
        if let Some(rsp) = mailbox(&mut self.r).take() {
            log::trace!("{}: respond {rsp}", self.name);
            net.push(0, srcid, rsp);
        }
        self.r.tgt_rsp = idle;
    }
}
