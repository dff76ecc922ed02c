use super::{Registers, XCache};
use crate::iss::{InstructionRequest, InstructionResponse, Iss};
use stats::l1::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum IcacheState {
    IDLE,
    MISS_SELECT,
    MISS_CLEANUP,
    MISS_WAIT,
    MISS_UPDT,
    UNC_WAIT,
    ERROR,
    CC_CHECK,
    CC_INVAL,
    CC_UPDT,
}

impl IcacheState {
    /// States in which a cached miss is outstanding.
    pub(super) fn is_miss(self) -> bool {
        matches!(self, Self::MISS_SELECT | Self::MISS_CLEANUP | Self::MISS_WAIT)
    }
}

impl<I> XCache<I>
where
    I: Iss,
{
    fn icache_preempt(&mut self, current: IcacheState) {
        self.r.icache_save = current;
        self.r.icache = IcacheState::CC_CHECK;
    }

    pub(super) fn icache_fsm(
        &mut self,
        r: &Registers,
        ireq: &InstructionRequest,
    ) -> InstructionResponse {
        use IcacheState as S;
        let mut irsp = InstructionResponse::default();
        match r.icache {
            S::IDLE => {
                if r.tgt_icache_req {
                    self.icache_preempt(S::IDLE);
                    return irsp;
                }
                if !ireq.valid {
                    return irsp;
                }
                if self.mapping.is_cacheable(ireq.addr) {
                    if let Some(instruction) = self.icache.read(ireq.addr) {
                        irsp.valid = true;
                        irsp.instruction = instruction;
                        return irsp;
                    }
                    self.inc(Counter::INS_MISS, 1);
                    self.inc(Counter::COST_INS_MISS_FRZ, 1);
                    if r.icache_cleanup_req && r.icache_cleanup_line == self.nline(ireq.addr) {
                        // wait for the cleanup of this very line
                        return irsp;
                    }
                    self.r.icache_addr_save = ireq.addr;
                    self.r.icache_miss_req = true;
                    self.r.rsp_ins_ok = false;
                    self.r.icache = S::MISS_SELECT;
                } else if r.rsp_ins_ok && ireq.addr == r.icache_addr_save {
                    irsp.valid = true;
                    irsp.instruction = r.icache_miss_buf[0];
                    self.r.rsp_ins_ok = false;
                } else {
                    self.inc(Counter::COST_INS_MISS_FRZ, 1);
                    self.r.icache_addr_save = ireq.addr;
                    self.r.icache_unc_req = true;
                    self.r.rsp_ins_ok = false;
                    self.r.icache = S::UNC_WAIT;
                }
            }
            S::MISS_SELECT => {
                self.inc(Counter::COST_INS_MISS_FRZ, 1);
                let victim = self.icache.select(r.icache_addr_save, 0);
                self.r.icache_victim = victim.slot;
                match victim.nline {
                    Some(nline) => {
                        self.icache.inval_slot(victim.slot);
                        self.r.icache_cleanup_save = nline;
                        self.r.icache = S::MISS_CLEANUP;
                    }
                    None => self.r.icache = S::MISS_WAIT,
                }
            }
            S::MISS_CLEANUP => {
                self.inc(Counter::COST_INS_MISS_FRZ, 1);
                if r.tgt_icache_req {
                    self.icache_preempt(S::MISS_CLEANUP);
                } else if !r.icache_cleanup_req {
                    self.r.icache_cleanup_req = true;
                    self.r.icache_cleanup_line = r.icache_cleanup_save;
                    self.r.icache = S::MISS_WAIT;
                }
            }
            S::MISS_WAIT => {
                self.inc(Counter::COST_INS_MISS_FRZ, 1);
                if r.tgt_icache_req {
                    self.icache_preempt(S::MISS_WAIT);
                    return irsp;
                }
                if !r.rsp_ins_ok {
                    return irsp;
                }
                if r.rsp_ins_error {
                    self.r.icache = S::ERROR;
                } else if !r.icache_inval_pending {
                    self.r.icache = S::MISS_UPDT;
                } else if r.icache_cleanup_req {
                    return irsp;
                } else {
                    // the line was invalidated while missing: drop it
                    self.r.icache_cleanup_req = true;
                    self.r.icache_cleanup_line = self.nline(r.icache_addr_save);
                    self.r.icache_inval_pending = false;
                    self.r.icache = S::IDLE;
                }
                self.r.rsp_ins_ok = false;
            }
            S::MISS_UPDT => {
                self.inc(Counter::COST_INS_MISS_FRZ, 1);
                self.icache
                    .update_slot(r.icache_addr_save, r.icache_victim, &r.icache_miss_buf);
                self.r.icache = S::IDLE;
            }
            S::UNC_WAIT => {
                if ireq.valid {
                    self.inc(Counter::COST_INS_MISS_FRZ, 1);
                }
                if r.tgt_icache_req {
                    self.icache_preempt(S::UNC_WAIT);
                } else if r.rsp_ins_ok {
                    self.r.icache = if r.rsp_ins_error { S::ERROR } else { S::IDLE };
                }
            }
            S::ERROR => {
                irsp.valid = true;
                irsp.error = true;
                self.r.rsp_ins_error = false;
                self.r.rsp_ins_ok = false;
                self.r.icache_inval_pending = false;
                self.r.icache = S::IDLE;
            }
            S::CC_CHECK => {
                let mask = self.line_mask();
                if r.icache_save.is_miss()
                    && (r.icache_addr_save & mask) == (r.tgt_addr & mask)
                {
                    self.r.icache_inval_pending = true;
                    self.r.tgt_icache_req = false;
                    self.r.tgt_icache_rsp = r.tgt_update;
                    self.r.icache = r.icache_save;
                } else if self.icache.locate(r.tgt_addr).is_some() {
                    self.r.icache = if r.tgt_update { S::CC_UPDT } else { S::CC_INVAL };
                } else {
                    self.r.tgt_icache_req = false;
                    self.r.tgt_icache_rsp = r.tgt_update;
                    self.r.icache = r.icache_save;
                }
            }
            S::CC_UPDT => {
                for (word, (&data, &valid)) in r.tgt_buf.iter().zip(&r.tgt_val).enumerate() {
                    if valid {
                        self.icache.write(r.tgt_addr + word as u64 * 4, data);
                    }
                }
                self.r.tgt_icache_rsp = true;
                self.r.tgt_icache_req = false;
                self.r.icache = r.icache_save;
            }
            S::CC_INVAL => {
                self.icache.inval(r.tgt_addr);
                self.r.tgt_icache_rsp = true;
                self.r.tgt_icache_req = false;
                self.r.icache = r.icache_save;
            }
        }
        if self.r.icache != r.icache {
            log::trace!("{}::icache: {} -> {}", self.name, r.icache, self.r.icache);
        }
        irsp
    }
}
