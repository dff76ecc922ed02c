use super::{LlscRequest, MemCache, ReadRequest, Registers, WriteRequest};
use crate::{
    interconn::{Interconnect, Network},
    vci::{self, CommandKind},
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TgtCmdState {
    IDLE,
    READ,
    WRITE,
    ATOMIC,
}

/// A decoded command, enqueued at the end of the cycle.
#[derive(Debug, Clone)]
pub(super) enum Put {
    Read(ReadRequest),
    Write(WriteRequest),
    Llsc(LlscRequest),
}

impl MemCache {
    /// Decodes direct network commands into the READ, WRITE and LLSC FIFOs.
    ///
    /// Returns the command to enqueue once it was accepted. The caller
    /// then consumes it from the network.
    pub(super) fn tgt_cmd_fsm(
        &mut self,
        r: &Registers,
        net: &Network<vci::Command>,
    ) -> Result<Option<Put>, Error> {
        let Some(cmd) = net.first(0) else {
            return Ok(None);
        };
        match r.tgt_cmd {
            TgtCmdState::IDLE => {
                if cmd.srcid >= self.num_procs {
                    return Err(Error::illegal(&self.name, cmd));
                }
                if !self.mapping.contains(cmd.address) {
                    return Err(Error::OutOfSegment {
                        component: self.name.clone(),
                        address: cmd.address,
                    });
                }
                self.r.tgt_cmd = match cmd.kind {
                    CommandKind::READ { .. } => TgtCmdState::READ,
                    CommandKind::WRITE { .. } => TgtCmdState::WRITE,
                    CommandKind::LOCKED_READ | CommandKind::STORE_COND { .. } => {
                        TgtCmdState::ATOMIC
                    }
                };
                Ok(None)
            }
            TgtCmdState::READ => {
                let CommandKind::READ {
                    cached,
                    instruction,
                } = cmd.kind
                else {
                    return Err(Error::malformed(&self.name, format!("expected read: {cmd}")));
                };
                let length = cmd.plen / 4;
                if cmd.plen == 0
                    || cmd.plen % 4 != 0
                    || self.dir.x(cmd.address) + length > self.words
                {
                    return Err(Error::malformed(
                        &self.name,
                        format!("read of {} bytes crosses a line: {cmd}", cmd.plen),
                    ));
                }
                if self.read_fifo.full() {
                    return Ok(None);
                }
                self.r.tgt_cmd = TgtCmdState::IDLE;
                Ok(Some(Put::Read(ReadRequest {
                    srcid: cmd.srcid,
                    trdid: cmd.trdid,
                    pktid: cmd.pktid,
                    address: cmd.address,
                    length,
                    cached,
                    instruction,
                })))
            }
            TgtCmdState::WRITE => {
                let CommandKind::WRITE { ref be, ref data } = cmd.kind else {
                    return Err(Error::malformed(&self.name, format!("expected write: {cmd}")));
                };
                if data.is_empty()
                    || be.len() != data.len()
                    || self.dir.x(cmd.address) + data.len() > self.words
                {
                    return Err(Error::malformed(
                        &self.name,
                        format!("write burst of {} cells crosses a line: {cmd}", data.len()),
                    ));
                }
                if self.write_fifo.full() {
                    return Ok(None);
                }
                self.r.tgt_cmd = TgtCmdState::IDLE;
                Ok(Some(Put::Write(WriteRequest {
                    srcid: cmd.srcid,
                    trdid: cmd.trdid,
                    pktid: cmd.pktid,
                    address: cmd.address,
                    be: be.clone(),
                    data: data.clone(),
                })))
            }
            TgtCmdState::ATOMIC => {
                let sc = match cmd.kind {
                    CommandKind::LOCKED_READ => None,
                    CommandKind::STORE_COND { data } => Some(data),
                    _ => {
                        return Err(Error::malformed(
                            &self.name,
                            format!("expected LL or SC: {cmd}"),
                        ))
                    }
                };
                if cmd.plen != 4 {
                    return Err(Error::malformed(
                        &self.name,
                        format!("LL/SC must access a single word: {cmd}"),
                    ));
                }
                if self.llsc_fifo.full() {
                    return Ok(None);
                }
                self.r.tgt_cmd = TgtCmdState::IDLE;
                Ok(Some(Put::Llsc(LlscRequest {
                    srcid: cmd.srcid,
                    trdid: cmd.trdid,
                    pktid: cmd.pktid,
                    address: cmd.address,
                    sc,
                })))
            }
        }
    }
}
