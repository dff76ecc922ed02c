use super::{Registers, XCache};
use crate::{
    address,
    iss::{self, DataRequest, DataRequestKind, DataResponse, Iss},
    vci,
};
use stats::l1::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum DcacheState {
    IDLE,
    WRITE_UPDT,
    WRITE_REQ,
    MISS_SELECT,
    MISS_CLEANUP,
    MISS_WAIT,
    MISS_UPDT,
    UNC_WAIT,
    INVAL,
    SYNC,
    ERROR,
    CC_CHECK,
    CC_INVAL,
    CC_UPDT,
}

impl DcacheState {
    /// States in which a cached miss is outstanding.
    pub(super) fn is_miss(self) -> bool {
        matches!(self, Self::MISS_SELECT | Self::MISS_CLEANUP | Self::MISS_WAIT)
    }
}

impl<I> XCache<I>
where
    I: Iss,
{
    fn dcache_preempt(&mut self, current: DcacheState) {
        self.r.dcache_save = current;
        self.r.dcache = DcacheState::CC_CHECK;
    }

    /// Serves a processor data request from the IDLE state.
    ///
    /// LL, SC and extended accesses are never cached. An uncached
    /// access hits when the response it waited for has arrived.
    fn dcache_idle(&mut self, r: &Registers, dreq: &DataRequest) -> DataResponse {
        use DataRequestKind as K;
        use DcacheState as S;
        self.r.dcache = S::IDLE;
        if !dreq.valid {
            return DataResponse::default();
        }
        let cached = match dreq.kind {
            K::LL | K::SC | K::XTN_READ | K::XTN_WRITE => false,
            K::READ | K::WRITE => self.mapping.is_cacheable(dreq.addr),
        };
        let (hit, rdata) = if cached {
            match self.dcache.read(dreq.addr) {
                Some(data) => (true, data),
                None => (false, 0),
            }
        } else {
            (
                r.rsp_data_ok && dreq.addr == r.dcache_addr_save,
                r.dcache_miss_buf[0],
            )
        };

        let mut drsp = DataResponse::default();
        match dreq.kind {
            K::READ | K::LL | K::SC => {
                self.inc(Counter::READ, 1);
                if hit {
                    drsp = DataResponse::data(rdata);
                    self.r.rsp_data_ok = false;
                } else if cached {
                    self.inc(Counter::DATA_MISS, 1);
                    self.inc(Counter::COST_DATA_MISS_FRZ, 1);
                    if r.dcache_cleanup_req && r.dcache_cleanup_line == self.nline(dreq.addr) {
                        // wait for the cleanup of this very line
                        return drsp;
                    }
                    self.r.dcache_miss_req = true;
                    self.r.rsp_data_ok = false;
                    self.r.dcache = S::MISS_SELECT;
                } else {
                    self.inc(Counter::UNC_READ, 1);
                    self.inc(Counter::COST_UNC_READ_FRZ, 1);
                    self.r.dcache_unc_req = true;
                    self.r.rsp_data_ok = false;
                    self.r.dcache = S::UNC_WAIT;
                }
            }
            K::XTN_READ | K::XTN_WRITE => {
                match dreq.addr / 4 {
                    iss::XTN_DCACHE_INVAL => {
                        self.r.dcache_inval_addr = address::from(dreq.wdata);
                        self.r.dcache = S::INVAL;
                    }
                    iss::XTN_SYNC => self.r.dcache = S::SYNC,
                    other => log::warn!(
                        "{}: unsupported extended access {other}, only DCACHE_INVAL and SYNC are",
                        self.name
                    ),
                }
                drsp = DataResponse::data(0);
            }
            K::WRITE => {
                self.inc(Counter::WRITE, 1);
                if hit && cached {
                    self.inc(Counter::WRITE_CACHED, 1);
                    self.r.dcache = S::WRITE_UPDT;
                } else {
                    self.r.dcache = S::WRITE_REQ;
                }
                drsp = DataResponse::data(0);
            }
        }
        self.r.dcache_addr_save = dreq.addr;
        self.r.dcache_kind_save = dreq.kind;
        self.r.dcache_wdata_save = dreq.wdata;
        self.r.dcache_be_save = dreq.be;
        self.r.dcache_rdata_save = rdata;
        drsp
    }

    pub(super) fn dcache_fsm(&mut self, r: &Registers, dreq: &DataRequest) -> DataResponse {
        use DcacheState as S;
        let mut drsp = DataResponse::default();
        match r.dcache {
            S::WRITE_REQ => {
                if r.tgt_dcache_req {
                    self.dcache_preempt(S::WRITE_REQ);
                } else if !self.wbuf.wok(r.dcache_addr_save) {
                    self.inc(Counter::COST_WRITE_FRZ, 1);
                } else {
                    self.wbuf
                        .write(r.dcache_addr_save, r.dcache_be_save, r.dcache_wdata_save);
                    drsp = self.dcache_idle(r, dreq);
                }
            }
            S::IDLE => {
                if r.tgt_dcache_req {
                    self.dcache_preempt(S::IDLE);
                } else {
                    drsp = self.dcache_idle(r, dreq);
                }
            }
            S::WRITE_UPDT => {
                let wdata = vci::merge_bytes(
                    r.dcache_rdata_save,
                    r.dcache_wdata_save,
                    r.dcache_be_save,
                );
                self.dcache.write(r.dcache_addr_save, wdata);
                self.r.dcache = S::WRITE_REQ;
            }
            S::MISS_SELECT => {
                self.inc(Counter::COST_DATA_MISS_FRZ, 1);
                let victim = self.dcache.select(r.dcache_addr_save, 0);
                self.r.dcache_victim = victim.slot;
                match victim.nline {
                    Some(nline) => {
                        self.dcache.inval_slot(victim.slot);
                        self.r.dcache_cleanup_save = nline;
                        self.r.dcache = S::MISS_CLEANUP;
                    }
                    None => self.r.dcache = S::MISS_WAIT,
                }
            }
            S::MISS_CLEANUP => {
                self.inc(Counter::COST_DATA_MISS_FRZ, 1);
                if r.tgt_dcache_req {
                    self.dcache_preempt(S::MISS_CLEANUP);
                } else if !r.dcache_cleanup_req {
                    self.r.dcache_cleanup_req = true;
                    self.r.dcache_cleanup_line = r.dcache_cleanup_save;
                    self.r.dcache = S::MISS_WAIT;
                }
            }
            S::MISS_WAIT => {
                self.inc(Counter::COST_DATA_MISS_FRZ, 1);
                if r.tgt_dcache_req {
                    self.dcache_preempt(S::MISS_WAIT);
                    return drsp;
                }
                if !r.rsp_data_ok {
                    return drsp;
                }
                if r.rsp_data_error {
                    self.r.dcache = S::ERROR;
                } else if !r.dcache_inval_pending {
                    self.r.dcache = S::MISS_UPDT;
                } else if r.dcache_cleanup_req {
                    return drsp;
                } else {
                    // the line was invalidated while missing: drop it
                    self.r.dcache_cleanup_req = true;
                    self.r.dcache_cleanup_line = self.nline(r.dcache_addr_save);
                    self.r.dcache_inval_pending = false;
                    self.r.dcache = S::IDLE;
                }
                self.r.rsp_data_ok = false;
            }
            S::MISS_UPDT => {
                self.inc(Counter::COST_DATA_MISS_FRZ, 1);
                self.dcache
                    .update_slot(r.dcache_addr_save, r.dcache_victim, &r.dcache_miss_buf);
                self.r.dcache = S::IDLE;
            }
            S::UNC_WAIT => {
                if dreq.valid {
                    self.inc(Counter::COST_UNC_READ_FRZ, 1);
                }
                if r.tgt_dcache_req {
                    self.dcache_preempt(S::UNC_WAIT);
                } else if r.rsp_data_ok {
                    if r.rsp_data_error {
                        self.r.dcache = S::ERROR;
                    } else if r.dcache_kind_save == DataRequestKind::SC {
                        // later accesses to the line must see the stored value
                        self.r.dcache_inval_addr = r.dcache_addr_save;
                        self.r.dcache = S::INVAL;
                    } else {
                        self.r.dcache = S::IDLE;
                    }
                }
            }
            S::ERROR => {
                drsp = DataResponse::error();
                self.r.rsp_data_error = false;
                self.r.rsp_data_ok = false;
                self.r.dcache_inval_pending = false;
                self.r.dcache = S::IDLE;
            }
            S::INVAL => {
                if r.tgt_dcache_req {
                    self.dcache_preempt(S::INVAL);
                } else if !r.dcache_cleanup_req {
                    let addr = r.dcache_inval_addr;
                    if self.dcache.inval(addr) {
                        self.r.dcache_cleanup_req = true;
                        self.r.dcache_cleanup_line = self.nline(addr);
                    }
                    self.r.dcache = S::IDLE;
                }
            }
            S::SYNC => {
                if r.tgt_dcache_req {
                    self.dcache_preempt(S::SYNC);
                } else if self.wbuf.empty() {
                    self.r.dcache = S::IDLE;
                }
            }
            S::CC_CHECK => {
                let mask = self.line_mask();
                if r.dcache_save.is_miss()
                    && (r.dcache_addr_save & mask) == (r.tgt_addr & mask)
                {
                    self.r.dcache_inval_pending = true;
                    self.r.tgt_dcache_req = false;
                    self.r.tgt_dcache_rsp = r.tgt_update;
                    self.r.dcache = r.dcache_save;
                } else if self.dcache.locate(r.tgt_addr).is_some() {
                    self.r.dcache = if r.tgt_update { S::CC_UPDT } else { S::CC_INVAL };
                } else {
                    self.r.tgt_dcache_req = false;
                    self.r.tgt_dcache_rsp = r.tgt_update;
                    self.r.dcache = r.dcache_save;
                }
            }
            S::CC_UPDT => {
                for (word, (&data, &valid)) in r.tgt_buf.iter().zip(&r.tgt_val).enumerate() {
                    if valid {
                        self.dcache.write(r.tgt_addr + word as u64 * 4, data);
                    }
                }
                self.r.tgt_dcache_rsp = true;
                self.r.tgt_dcache_req = false;
                self.r.dcache = r.dcache_save;
            }
            S::CC_INVAL => {
                self.dcache.inval(r.tgt_addr);
                self.r.tgt_dcache_rsp = true;
                self.r.tgt_dcache_req = false;
                self.r.dcache = r.dcache_save;
            }
        }
        if self.r.dcache != r.dcache {
            log::trace!("{}::dcache: {} -> {}", self.name, r.dcache, self.r.dcache);
        }
        drsp
    }
}
