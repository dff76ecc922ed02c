use super::{
    alloc::{Allocator, UptClient},
    MemCache, Registers, UpdateRequest,
};
use crate::{
    interconn::{Interconnect, Network},
    vci, Error,
};
use stats::mem_cache::Counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum InitCmdState {
    INVAL_IDLE,
    INVAL_SEL,
    INVAL_NLINE,
    UPDT_IDLE,
    UPDT_SEL,
    UPDT_NLINE,
    BRDCAST,
    SC_UPDT_IDLE,
    SC_UPDT_SEL,
    SC_UPDT_NLINE,
    SC_BRDCAST,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum InitRspState {
    IDLE,
    UPT_LOCK,
    UPT_CLEAR,
    END,
}

#[derive(Debug, Default, Clone)]
pub(super) struct CmdLocal {
    target: usize,
    instruction: bool,
}

#[derive(Debug, Default, Clone)]
pub(super) struct RspLocal {
    upt_index: usize,
    rsp: Option<vci::Response>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    XramRsp,
    Write,
    Llsc,
}

/// Lowest set bit of a non empty copy mask.
fn first_target(copies: u64) -> usize {
    copies.trailing_zeros() as usize
}

impl MemCache {
    fn init_cmd_start(&self, r: &Registers, order: [Source; 3]) -> Option<InitCmdState> {
        use InitCmdState as S;
        order.into_iter().find_map(|source| match source {
            Source::XramRsp => r.xram_rsp_to_init_cmd.as_ref().map(|_| {
                self.inc(Counter::INVAL, 1);
                S::INVAL_SEL
            }),
            Source::Write => r.write_to_init_cmd.as_ref().map(|req| {
                self.init_cmd_count(req);
                if req.brdcast {
                    S::BRDCAST
                } else {
                    S::UPDT_SEL
                }
            }),
            Source::Llsc => r.llsc_to_init_cmd.as_ref().map(|req| {
                self.init_cmd_count(req);
                if req.brdcast {
                    S::SC_BRDCAST
                } else {
                    S::SC_UPDT_SEL
                }
            }),
        })
    }

    fn init_cmd_count(&self, req: &UpdateRequest) {
        if req.brdcast {
            self.inc(Counter::INVAL, 1);
            self.inc(Counter::INVAL_BRDCAST, 1);
        } else {
            self.inc(Counter::UPDATE, 1);
        }
    }

    /// Sends an invalidation of `nline` to every L1 cache.
    ///
    /// Returns false while some destination is full.
    fn init_cmd_broadcast(
        net: &mut Network<vci::CoherenceCommand>,
        trdid: usize,
        nline: u64,
    ) -> bool {
        let dests = net.num_destinations;
        if !(0..dests).all(|dest| net.has_buffer(dest)) {
            return false;
        }
        for dest in 0..dests {
            net.push(
                0,
                dest,
                vci::CoherenceCommand::inval(vci::BROADCAST_ADDR, trdid, nline),
            );
        }
        true
    }

    /// Picks the next copy of an update and clears it from the request.
    fn init_cmd_select(
        &mut self,
        mailbox: fn(&mut Registers) -> &mut Option<UpdateRequest>,
        idle: InitCmdState,
        send: InitCmdState,
    ) {
        let Some(req) = mailbox(&mut self.r).as_mut() else {
            return;
        };
        if req.d_copies == 0 {
            *mailbox(&mut self.r) = None;
            self.r.init_cmd = idle;
            return;
        }
        let target = first_target(req.d_copies);
        req.d_copies &= !(1 << target);
        self.init_cmd_regs.target = target;
        self.init_cmd_regs.instruction = false;
        self.inc(Counter::UPDATE_MULT, 1);
        self.r.init_cmd = send;
    }

    fn init_cmd_update(
        &mut self,
        req: Option<&UpdateRequest>,
        net: &mut Network<vci::CoherenceCommand>,
        next: InitCmdState,
    ) {
        let target = self.init_cmd_regs.target;
        let Some(req) = req else {
            return;
        };
        if !net.has_buffer(target) {
            return;
        }
        let address = self.coherence_address(target, vci::UPDT_DATA_OFFSET);
        net.push(
            0,
            target,
            vci::CoherenceCommand::update(
                address,
                req.trdid,
                req.nline,
                req.index,
                req.data.clone(),
                req.we.clone(),
            ),
        );
        self.r.init_cmd = next;
    }

    /// Sends the update and invalidation requests to the L1 caches.
    pub(super) fn init_cmd_fsm(&mut self, r: &Registers, net: &mut Network<vci::CoherenceCommand>) {
        use InitCmdState as S;
        use Source::{Llsc, Write, XramRsp};
        match r.init_cmd {
            S::UPDT_IDLE => {
                if let Some(next) = self.init_cmd_start(r, [XramRsp, Write, Llsc]) {
                    self.r.init_cmd = next;
                }
            }
            S::INVAL_IDLE => {
                if let Some(next) = self.init_cmd_start(r, [Write, Llsc, XramRsp]) {
                    self.r.init_cmd = next;
                }
            }
            S::SC_UPDT_IDLE => {
                if let Some(next) = self.init_cmd_start(r, [Llsc, XramRsp, Write]) {
                    self.r.init_cmd = next;
                }
            }
            S::INVAL_SEL => {
                let Some(req) = self.r.xram_rsp_to_init_cmd.as_mut() else {
                    return;
                };
                if req.brdcast {
                    self.inc(Counter::INVAL_BRDCAST, 1);
                    self.r.init_cmd = S::INVAL_NLINE;
                    return;
                }
                if req.d_copies == 0 && req.i_copies == 0 {
                    self.r.xram_rsp_to_init_cmd = None;
                    self.r.init_cmd = S::INVAL_IDLE;
                    return;
                }
                let instruction = req.i_copies != 0;
                let copies = if instruction {
                    &mut req.i_copies
                } else {
                    &mut req.d_copies
                };
                let target = first_target(*copies);
                *copies &= !(1 << target);
                self.init_cmd_regs.target = target;
                self.init_cmd_regs.instruction = instruction;
                self.inc(Counter::INVAL_MULT, 1);
                self.r.init_cmd = S::INVAL_NLINE;
            }
            S::INVAL_NLINE => {
                let Some(req) = &r.xram_rsp_to_init_cmd else {
                    return;
                };
                if req.brdcast {
                    if Self::init_cmd_broadcast(net, req.trdid, req.nline) {
                        self.r.xram_rsp_to_init_cmd = None;
                        self.r.init_cmd = S::INVAL_IDLE;
                    }
                    return;
                }
                let CmdLocal {
                    target,
                    instruction,
                } = self.init_cmd_regs;
                if net.has_buffer(target) {
                    let offset = if instruction {
                        vci::INVAL_INST_OFFSET
                    } else {
                        vci::INVAL_DATA_OFFSET
                    };
                    let address = self.coherence_address(target, offset);
                    net.push(
                        0,
                        target,
                        vci::CoherenceCommand::inval(address, req.trdid, req.nline),
                    );
                    self.r.init_cmd = S::INVAL_SEL;
                }
            }
            S::UPDT_SEL => {
                self.init_cmd_select(|r| &mut r.write_to_init_cmd, S::UPDT_IDLE, S::UPDT_NLINE);
            }
            S::UPDT_NLINE => {
                self.init_cmd_update(r.write_to_init_cmd.as_ref(), net, S::UPDT_SEL);
            }
            S::BRDCAST => {
                let Some(req) = &r.write_to_init_cmd else {
                    return;
                };
                if Self::init_cmd_broadcast(net, req.trdid, req.nline) {
                    self.r.write_to_init_cmd = None;
                    self.r.init_cmd = S::UPDT_IDLE;
                }
            }
            S::SC_UPDT_SEL => {
                self.init_cmd_select(|r| &mut r.llsc_to_init_cmd, S::SC_UPDT_IDLE, S::SC_UPDT_NLINE);
            }
            S::SC_UPDT_NLINE => {
                self.init_cmd_update(r.llsc_to_init_cmd.as_ref(), net, S::SC_UPDT_SEL);
            }
            S::SC_BRDCAST => {
                let Some(req) = &r.llsc_to_init_cmd else {
                    return;
                };
                if Self::init_cmd_broadcast(net, req.trdid, req.nline) {
                    self.r.llsc_to_init_cmd = None;
                    self.r.init_cmd = S::SC_UPDT_IDLE;
                }
            }
        }
    }

    /// Counts the coherence responses of the L1 caches.
    pub(super) fn init_rsp_fsm(
        &mut self,
        r: &Registers,
        net: &mut Network<vci::CoherenceResponse>,
    ) -> Result<(), Error> {
        match r.init_rsp {
            InitRspState::IDLE => {
                let Some(rsp) = net.pop(0) else {
                    return Ok(());
                };
                if rsp.trdid >= self.upt.size() {
                    return Err(Error::malformed(
                        &self.name,
                        format!("response for unknown update table entry: {rsp}"),
                    ));
                }
                self.init_rsp_regs.upt_index = rsp.trdid;
                self.r.init_rsp = InitRspState::UPT_LOCK;
            }
            InitRspState::UPT_LOCK => {
                if r.alloc_upt.granted() != UptClient::INIT_RSP {
                    return Ok(());
                }
                let index = self.init_rsp_regs.upt_index;
                let remaining = self.upt.decrement(index).ok_or_else(|| {
                    Error::malformed(
                        &self.name,
                        format!("response for inactive update table entry {index}"),
                    )
                })?;
                self.r.init_rsp = if remaining == 0 {
                    InitRspState::UPT_CLEAR
                } else {
                    InitRspState::IDLE
                };
            }
            InitRspState::UPT_CLEAR => {
                if r.alloc_upt.granted() != UptClient::INIT_RSP {
                    return Ok(());
                }
                let index = self.init_rsp_regs.upt_index;
                let entry = *self.upt.get(index);
                self.upt.clear(index);
                if entry.rsp {
                    self.init_rsp_regs.rsp =
                        Some(vci::Response::ack(entry.srcid, entry.trdid, entry.pktid));
                    self.r.init_rsp = InitRspState::END;
                } else {
                    self.r.init_rsp = InitRspState::IDLE;
                }
            }
            InitRspState::END => {
                if r.init_rsp_to_tgt_rsp.is_none() {
                    self.r.init_rsp_to_tgt_rsp = self.init_rsp_regs.rsp.take();
                    self.r.init_rsp = InitRspState::IDLE;
                }
            }
        }
        Ok(())
    }
}
