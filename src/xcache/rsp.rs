use super::{Registers, XCache};
use crate::{
    interconn::{Interconnect, Network},
    iss::Iss,
    vci::{self, TransactionType},
    write_buffer::SlotState,
    Error,
};
use stats::l1::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum RspState {
    IDLE,
    DATA_WRITE,
    DATA_MISS,
    DATA_UNC,
    INS_MISS,
    INS_UNC,
}

#[derive(Debug, Default, Clone)]
pub(super) struct Local {
    rsp: Option<vci::Response>,
}

impl<I> XCache<I>
where
    I: Iss,
{
    /// Dispatches the responses of the direct network.
    ///
    /// Read responses fill the miss buffers and raise the `ok` flag of
    /// the waiting cache. Write acknowledges release write buffer slots.
    pub(super) fn rsp_fsm(
        &mut self,
        r: &Registers,
        net: &mut Network<vci::Response>,
    ) -> Result<(), Error> {
        use RspState as S;
        if r.rsp == S::IDLE {
            let Some(rsp) = net.pop(self.srcid) else {
                return Ok(());
            };
            self.r.rsp = if vci::is_write_pktid(rsp.pktid) {
                S::DATA_WRITE
            } else {
                match TransactionType::from_pktid(rsp.pktid) {
                    Some(TransactionType::DATA_MISS) => S::DATA_MISS,
                    Some(TransactionType::DATA_UNC) => S::DATA_UNC,
                    Some(TransactionType::INS_MISS) => S::INS_MISS,
                    Some(TransactionType::INS_UNC) => S::INS_UNC,
                    None => {
                        return Err(Error::malformed(
                            &self.name,
                            format!("unknown packet id in {rsp}"),
                        ))
                    }
                }
            };
            self.rsp_regs.rsp = Some(rsp);
            log::trace!("{}::rsp: IDLE -> {}", self.name, self.r.rsp);
            return Ok(());
        }

        let Some(rsp) = self.rsp_regs.rsp.take() else {
            self.r.rsp = S::IDLE;
            return Ok(());
        };
        match r.rsp {
            S::IDLE => unreachable!(),
            S::DATA_WRITE => {
                let index = (rsp.pktid >> 1) as usize;
                if index >= self.wbuf.lines() || self.wbuf.state(index) != SlotState::SENT {
                    return Err(Error::malformed(
                        &self.name,
                        format!("write acknowledge for slot {index} without a pending write"),
                    ));
                }
                self.wbuf.completed(index);
                if rsp.error {
                    log::warn!("{}: write bus error for slot {index}", self.name);
                    self.inc(Counter::WRITE_BERR, 1);
                    self.iss.set_write_berr();
                }
            }
            S::DATA_MISS | S::INS_MISS => {
                if !rsp.error && rsp.data.len() != self.words {
                    return Err(Error::malformed(
                        &self.name,
                        format!("line of {} words, expected {}", rsp.data.len(), self.words),
                    ));
                }
                if r.rsp == S::DATA_MISS {
                    if !rsp.error {
                        self.r.dcache_miss_buf.copy_from_slice(&rsp.data);
                    }
                    self.r.rsp_data_ok = true;
                    self.r.rsp_data_error = rsp.error;
                } else {
                    if !rsp.error {
                        self.r.icache_miss_buf.copy_from_slice(&rsp.data);
                    }
                    self.r.rsp_ins_ok = true;
                    self.r.rsp_ins_error = rsp.error;
                }
            }
            S::DATA_UNC | S::INS_UNC => {
                let word = rsp.data.first().copied().unwrap_or_default();
                if r.rsp == S::DATA_UNC {
                    self.r.dcache_miss_buf[0] = word;
                    self.r.rsp_data_ok = true;
                    self.r.rsp_data_error = rsp.error;
                } else {
                    self.r.icache_miss_buf[0] = word;
                    self.r.rsp_ins_ok = true;
                    self.r.rsp_ins_error = rsp.error;
                }
            }
        }
        log::trace!("{}::rsp: {} -> IDLE", self.name, r.rsp);
        self.r.rsp = S::IDLE;
        Ok(())
    }
}
