use super::{Registers, XCache};
use crate::{
    interconn::{Interconnect, Networks},
    iss::Iss,
    vci, Error,
};
use stats::l1::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TgtState {
    IDLE,
    UPDT_WORD,
    UPDT_DATA,
    REQ_BROADCAST,
    REQ_ICACHE,
    REQ_DCACHE,
    RSP_BROADCAST,
    RSP_ICACHE,
    RSP_DCACHE,
}

/// Coherence command being served.
#[derive(Debug, Default, Clone)]
pub(super) struct Local {
    trdid: usize,
    pktid: u32,
    index: usize,
    instruction: bool,
    data: vci::Words,
    we: smallvec::SmallVec<[bool; 16]>,
}

impl<I> XCache<I>
where
    I: Iss,
{
    fn tgt_respond(&mut self, net: &mut Networks) -> bool {
        if !net.coherence_rsp.has_buffer(0) {
            return false;
        }
        net.coherence_rsp.push(
            self.srcid,
            0,
            vci::CoherenceResponse {
                srcid: self.srcid,
                trdid: self.tgt_regs.trdid,
                pktid: self.tgt_regs.pktid,
                error: false,
            },
        );
        true
    }

    /// Receives update and invalidation requests from the directory and
    /// hands them to the cache state machines.
    ///
    /// A cache that does not hold the line only acknowledges updates.
    /// Invalidations of evicted lines are answered by the cleanup.
    pub(super) fn tgt_fsm(&mut self, r: &Registers, net: &mut Networks) -> Result<(), Error> {
        use TgtState as S;
        match r.tgt {
            S::IDLE => {
                let Some(cmd) = net.coherence_cmd.pop(self.srcid) else {
                    return Ok(());
                };
                let line = self.words as u64 * 4;
                self.r.tgt_addr = cmd.nline * line;
                self.tgt_regs.trdid = cmd.trdid;
                self.tgt_regs.pktid = cmd.pktid;
                if cmd.is_broadcast() {
                    self.inc(Counter::CC_INVAL, 1);
                    self.r.tgt_update = false;
                    self.r.tgt_data = true;
                    self.r.tgt = S::REQ_BROADCAST;
                    return Ok(());
                }
                if !self.segment.contains(cmd.address) {
                    return Err(Error::OutOfSegment {
                        component: self.name.clone(),
                        address: cmd.address,
                    });
                }
                match cmd.address - self.segment.base {
                    vci::INVAL_DATA_OFFSET => {
                        self.inc(Counter::CC_INVAL, 1);
                        self.r.tgt_update = false;
                        self.r.tgt_data = true;
                        self.r.tgt = S::REQ_DCACHE;
                    }
                    vci::INVAL_INST_OFFSET => {
                        self.inc(Counter::CC_INVAL, 1);
                        self.r.tgt_update = false;
                        self.r.tgt_data = false;
                        self.r.tgt = S::REQ_ICACHE;
                    }
                    offset @ (vci::UPDT_DATA_OFFSET | vci::UPDT_INST_OFFSET) => {
                        self.inc(Counter::CC_UPDATE, 1);
                        let instruction = offset == vci::UPDT_INST_OFFSET;
                        self.r.tgt_update = true;
                        self.r.tgt_data = !instruction;
                        self.tgt_regs.instruction = instruction;
                        self.tgt_regs.index = cmd.index;
                        self.tgt_regs.data = cmd.data;
                        self.tgt_regs.we = cmd.we;
                        self.r.tgt = S::UPDT_WORD;
                    }
                    _ => return Err(Error::illegal(&self.name, &cmd)),
                }
            }
            S::UPDT_WORD => {
                if self.tgt_regs.index >= self.words {
                    return Err(Error::malformed(
                        &self.name,
                        format!("update starts at word {}", self.tgt_regs.index),
                    ));
                }
                self.r.tgt_val.fill(false);
                self.r.tgt = S::UPDT_DATA;
            }
            S::UPDT_DATA => {
                let Local {
                    index, data, we, ..
                } = &self.tgt_regs;
                if index + data.len() > self.words || data.len() != we.len() {
                    return Err(Error::malformed(
                        &self.name,
                        format!(
                            "update of {} words at word {index} in a line of {}",
                            data.len(),
                            self.words
                        ),
                    ));
                }
                for (i, (&word, &enabled)) in data.iter().zip(we.iter()).enumerate() {
                    self.r.tgt_buf[index + i] = word;
                    self.r.tgt_val[index + i] = enabled;
                }
                self.r.tgt = if self.tgt_regs.instruction {
                    S::REQ_ICACHE
                } else {
                    S::REQ_DCACHE
                };
            }
            S::REQ_BROADCAST => {
                if !r.tgt_icache_req && !r.tgt_dcache_req {
                    self.r.tgt_icache_req = true;
                    self.r.tgt_dcache_req = true;
                    self.r.tgt = S::RSP_BROADCAST;
                }
            }
            S::REQ_ICACHE => {
                if !r.tgt_icache_req {
                    self.r.tgt_icache_req = true;
                    self.r.tgt = S::RSP_ICACHE;
                }
            }
            S::REQ_DCACHE => {
                if !r.tgt_dcache_req {
                    self.r.tgt_dcache_req = true;
                    self.r.tgt = S::RSP_DCACHE;
                }
            }
            S::RSP_BROADCAST => {
                if r.tgt_icache_req || r.tgt_dcache_req {
                    return Ok(());
                }
                match (r.tgt_icache_rsp, r.tgt_dcache_rsp) {
                    (true, true) => {
                        if self.tgt_respond(net) {
                            self.r.tgt_icache_rsp = false;
                        }
                    }
                    (false, false) => self.r.tgt = S::IDLE,
                    _ => {
                        if self.tgt_respond(net) {
                            self.r.tgt_icache_rsp = false;
                            self.r.tgt_dcache_rsp = false;
                            self.r.tgt = S::IDLE;
                        }
                    }
                }
            }
            S::RSP_ICACHE => {
                if r.tgt_icache_req {
                    return Ok(());
                }
                if !r.tgt_icache_rsp {
                    self.r.tgt = S::IDLE;
                } else if self.tgt_respond(net) {
                    self.r.tgt_icache_rsp = false;
                    self.r.tgt = S::IDLE;
                }
            }
            S::RSP_DCACHE => {
                if r.tgt_dcache_req {
                    return Ok(());
                }
                if !r.tgt_dcache_rsp {
                    self.r.tgt = S::IDLE;
                } else if self.tgt_respond(net) {
                    self.r.tgt_dcache_rsp = false;
                    self.r.tgt = S::IDLE;
                }
            }
        }
        if self.r.tgt != r.tgt {
            log::trace!("{}::tgt: {} -> {}", self.name, r.tgt, self.r.tgt);
        }
        Ok(())
    }
}
