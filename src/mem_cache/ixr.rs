use super::{
    alloc::{Allocator, TrtClient},
    MemCache, Registers,
};
use crate::{
    interconn::{Interconnect, Network},
    vci, Error,
};

/// Round-robin over the four XRAM command sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum IxrCmdState {
    READ_IDLE,
    WRITE_IDLE,
    LLSC_IDLE,
    XRAM_IDLE,
    READ_NLINE,
    WRITE_NLINE,
    LLSC_NLINE,
    XRAM_DATA,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum IxrRspState {
    IDLE,
    ACK,
    TRT_ERASE,
    TRT_READ,
}

#[derive(Debug, Default, Clone)]
pub(super) struct RspLocal {
    trt_index: usize,
    data: vci::Words,
    error: bool,
}

impl MemCache {
    pub(super) fn ixr_cmd_fsm(&mut self, r: &Registers, net: &mut Network<vci::XramCommand>) {
        use IxrCmdState as S;
        let pending = [
            (r.read_to_ixr_cmd.is_some(), S::READ_NLINE),
            (r.write_to_ixr_cmd.is_some(), S::WRITE_NLINE),
            (r.llsc_to_ixr_cmd.is_some(), S::LLSC_NLINE),
            (r.xram_rsp_to_ixr_cmd.is_some(), S::XRAM_DATA),
        ];
        let last = match r.ixr_cmd {
            S::READ_IDLE => 0,
            S::WRITE_IDLE => 1,
            S::LLSC_IDLE => 2,
            S::XRAM_IDLE => 3,
            S::READ_NLINE => {
                return self.ixr_cmd_send(net, |r| &mut r.read_to_ixr_cmd, S::READ_IDLE);
            }
            S::WRITE_NLINE => {
                return self.ixr_cmd_send(net, |r| &mut r.write_to_ixr_cmd, S::WRITE_IDLE);
            }
            S::LLSC_NLINE => {
                return self.ixr_cmd_send(net, |r| &mut r.llsc_to_ixr_cmd, S::LLSC_IDLE);
            }
            S::XRAM_DATA => {
                return self.ixr_cmd_send(net, |r| &mut r.xram_rsp_to_ixr_cmd, S::XRAM_IDLE);
            }
        };
        if let Some((_, next)) = (1..=pending.len())
            .map(|i| pending[(last + i) % pending.len()])
            .find(|(requested, _)| *requested)
        {
            self.r.ixr_cmd = next;
        }
    }

    /// Sends the command of a mailbox that was full at the start of the cycle.
    ///
    /// Producers only fill an empty mailbox, so the live copy still holds it.
    fn ixr_cmd_send(
        &mut self,
        net: &mut Network<vci::XramCommand>,
        mailbox: fn(&mut Registers) -> &mut Option<vci::XramCommand>,
        idle: IxrCmdState,
    ) {
        if !net.has_buffer(0) {
            return;
        }
        if let Some(cmd) = mailbox(&mut self.r).take() {
            net.push(0, 0, cmd);
        }
        self.r.ixr_cmd = idle;
    }

    pub(super) fn ixr_rsp_fsm(
        &mut self,
        r: &Registers,
        net: &mut Network<vci::XramResponse>,
    ) -> Result<(), Error> {
        match r.ixr_rsp {
            IxrRspState::IDLE => {
                let Some(rsp) = net.pop(0) else {
                    return Ok(());
                };
                if rsp.trdid >= self.trt.size() {
                    return Err(Error::malformed(
                        &self.name,
                        format!("response for unknown transaction: {rsp}"),
                    ));
                }
                let entry = self.trt.get(rsp.trdid);
                if rsp.write {
                    if !entry.valid || entry.xram_read {
                        return Err(Error::malformed(
                            &self.name,
                            format!("write acknowledge without a pending write back: {rsp}"),
                        ));
                    }
                    self.r.ixr_rsp = IxrRspState::ACK;
                } else {
                    if !entry.valid || !entry.xram_read {
                        return Err(Error::malformed(
                            &self.name,
                            format!("line without a pending fetch: {rsp}"),
                        ));
                    }
                    if !rsp.error && rsp.data.len() != self.words {
                        return Err(Error::malformed(
                            &self.name,
                            format!("line of {} words: {rsp}", rsp.data.len()),
                        ));
                    }
                    self.r.ixr_rsp = IxrRspState::TRT_READ;
                }
                self.ixr_rsp_regs = RspLocal {
                    trt_index: rsp.trdid,
                    data: rsp.data,
                    error: rsp.error,
                };
            }
            IxrRspState::ACK => {
                self.r.ixr_rsp = IxrRspState::TRT_ERASE;
            }
            IxrRspState::TRT_ERASE => {
                if r.alloc_trt.granted() != TrtClient::IXR_RSP {
                    return Ok(());
                }
                let index = self.ixr_rsp_regs.trt_index;
                if self.ixr_rsp_regs.error {
                    log::warn!(
                        "{}: write back of line {:#x} failed",
                        self.name,
                        self.trt.get(index).nline
                    );
                }
                self.trt.erase(index);
                self.r.ixr_rsp = IxrRspState::IDLE;
            }
            IxrRspState::TRT_READ => {
                if r.alloc_trt.granted() != TrtClient::IXR_RSP {
                    return Ok(());
                }
                let regs = &self.ixr_rsp_regs;
                self.trt.write_rsp(regs.trt_index, &regs.data, regs.error);
                self.r.ixr_rsp_to_xram_rsp_rok[regs.trt_index] = true;
                self.r.ixr_rsp = IxrRspState::IDLE;
            }
        }
        Ok(())
    }
}
