//! Processor interface of the L1 caches.
//!
//! Every cycle the cache asks the processor for its pending
//! instruction and data requests, serves them, and hands back the
//! responses. A request without a valid response is presented again
//! in the next cycle.

use crate::{address, trace::Op, vci};

/// Extended access numbers, the request address is `4 * number`.
pub const XTN_DCACHE_INVAL: address = 7;
pub const XTN_SYNC: address = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum DataRequestKind {
    READ,
    WRITE,
    LL,
    SC,
    XTN_READ,
    XTN_WRITE,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstructionRequest {
    pub valid: bool,
    pub addr: address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRequest {
    pub valid: bool,
    pub kind: DataRequestKind,
    pub addr: address,
    pub wdata: u32,
    pub be: u8,
}

impl Default for DataRequest {
    fn default() -> Self {
        Self {
            valid: false,
            kind: DataRequestKind::READ,
            addr: 0,
            wdata: 0,
            be: 0,
        }
    }
}

impl DataRequest {
    #[must_use]
    pub fn new(kind: DataRequestKind, addr: address, wdata: u32, be: u8) -> Self {
        Self {
            valid: true,
            kind,
            addr,
            wdata,
            be,
        }
    }
}

impl std::fmt::Display for DataRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.valid {
            return write!(f, "NONE");
        }
        write!(f, "{}@{:#010x}", self.kind, self.addr)?;
        if matches!(self.kind, DataRequestKind::WRITE | DataRequestKind::SC) {
            write!(f, "[{:#x},be={:#06b}]", self.wdata, self.be)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstructionResponse {
    pub valid: bool,
    pub error: bool,
    pub instruction: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataResponse {
    pub valid: bool,
    pub error: bool,
    pub rdata: u32,
}

impl DataResponse {
    #[must_use]
    pub fn data(rdata: u32) -> Self {
        Self {
            valid: true,
            error: false,
            rdata,
        }
    }

    #[must_use]
    pub fn error() -> Self {
        Self {
            valid: true,
            error: true,
            rdata: 0,
        }
    }
}

/// An instruction set simulator attached to an L1 cache.
pub trait Iss: std::fmt::Debug + Send {
    fn requests(&self) -> (InstructionRequest, DataRequest);

    /// Advances the processor by one cycle.
    fn execute(&mut self, irsp: &InstructionResponse, drsp: &DataResponse);

    /// Reports an asynchronous write bus error.
    fn set_write_berr(&mut self);

    fn is_done(&self) -> bool;

    /// Number of completed operations.
    fn retired(&self) -> u64;
}

/// A value returned to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Observation {
    /// Index of the operation in the program
    pub index: usize,
    pub addr: address,
    pub value: u32,
    pub error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Step {
    Issue,
    /// Store conditional of an increment whose linked load returned `value`
    IncrementSc { value: u32 },
}

/// Replays a scripted program.
#[derive(Debug, Clone)]
pub struct TraceIss {
    id: usize,
    ops: Vec<Op>,
    pc: usize,
    step: Step,
    idle_left: Option<u64>,
    retired: u64,
    pub observed: Vec<Observation>,
    pub sc_outcomes: Vec<bool>,
    /// Values replaced by successful atomic increments
    pub increments: Vec<u32>,
    pub write_berrs: usize,
}

impl TraceIss {
    #[must_use]
    pub fn new(id: usize, ops: Vec<Op>) -> Self {
        Self {
            id,
            ops,
            pc: 0,
            step: Step::Issue,
            idle_left: None,
            retired: 0,
            observed: Vec::new(),
            sc_outcomes: Vec::new(),
            increments: Vec::new(),
            write_berrs: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Values returned by the reads of `addr`, in program order.
    #[must_use]
    pub fn reads_of(&self, addr: address) -> Vec<u32> {
        self.observed
            .iter()
            .filter(|obs| obs.addr == addr)
            .map(|obs| obs.value)
            .collect()
    }

    fn current(&self) -> Option<&Op> {
        self.ops.get(self.pc)
    }

    fn retire(&mut self) {
        if let Some(op) = self.current() {
            log::trace!("iss {}: retire {op}", self.id);
        }
        self.pc += 1;
        self.step = Step::Issue;
        self.retired += 1;
    }

    fn observe(&mut self, addr: address, value: u32, error: bool) {
        self.observed.push(Observation {
            index: self.pc,
            addr,
            value,
            error,
        });
    }
}

impl Iss for TraceIss {
    fn requests(&self) -> (InstructionRequest, DataRequest) {
        use DataRequestKind as K;
        let none = (InstructionRequest::default(), DataRequest::default());
        let Some(op) = self.current() else {
            return none;
        };
        let dreq = match *op {
            Op::Fetch { addr } => {
                return (
                    InstructionRequest { valid: true, addr },
                    DataRequest::default(),
                )
            }
            Op::Read { addr } => DataRequest::new(K::READ, addr, 0, 0xF),
            Op::Write { addr, value, be } => DataRequest::new(K::WRITE, addr, value, be),
            Op::Ll { addr } => DataRequest::new(K::LL, addr, 0, 0xF),
            Op::Sc { addr, value } => DataRequest::new(K::SC, addr, value, 0xF),
            Op::AtomicIncrement { addr } => match self.step {
                Step::Issue => DataRequest::new(K::LL, addr, 0, 0xF),
                Step::IncrementSc { value } => {
                    DataRequest::new(K::SC, addr, value.wrapping_add(1), 0xF)
                }
            },
            Op::Sync => DataRequest::new(K::XTN_WRITE, XTN_SYNC * 4, 0, 0xF),
            Op::DcacheInval { addr } => {
                DataRequest::new(K::XTN_WRITE, XTN_DCACHE_INVAL * 4, addr as u32, 0xF)
            }
            Op::Idle { .. } => return none,
        };
        (InstructionRequest::default(), dreq)
    }

    fn execute(&mut self, irsp: &InstructionResponse, drsp: &DataResponse) {
        let Some(op) = self.current().cloned() else {
            return;
        };
        match op {
            Op::Idle { cycles } => {
                let left = self.idle_left.unwrap_or(cycles).saturating_sub(1);
                if left == 0 {
                    self.idle_left = None;
                    self.retire();
                } else {
                    self.idle_left = Some(left);
                }
            }
            Op::Fetch { addr } => {
                if irsp.valid {
                    self.observe(addr, irsp.instruction, irsp.error);
                    self.retire();
                }
            }
            _ if !drsp.valid => {}
            Op::Read { addr } | Op::Ll { addr } => {
                self.observe(addr, drsp.rdata, drsp.error);
                self.retire();
            }
            Op::Sc { .. } => {
                self.sc_outcomes
                    .push(!drsp.error && drsp.rdata == vci::SC_SUCCESS);
                self.retire();
            }
            Op::AtomicIncrement { addr } => match self.step {
                _ if drsp.error => {
                    self.observe(addr, drsp.rdata, true);
                    self.retire();
                }
                Step::Issue => self.step = Step::IncrementSc { value: drsp.rdata },
                Step::IncrementSc { value } => {
                    let success = drsp.rdata == vci::SC_SUCCESS;
                    self.sc_outcomes.push(success);
                    if success {
                        self.increments.push(value);
                        self.retire();
                    } else {
                        self.step = Step::Issue;
                    }
                }
            },
            Op::Write { .. } | Op::Sync | Op::DcacheInval { .. } => self.retire(),
        }
    }

    fn set_write_berr(&mut self) {
        log::warn!("iss {}: write bus error", self.id);
        self.write_berrs += 1;
    }

    fn is_done(&self) -> bool {
        self.pc >= self.ops.len()
    }

    fn retired(&self) -> u64 {
        self.retired
    }
}

#[cfg(test)]
mod tests {
    use super::{DataRequestKind, DataResponse, InstructionResponse, Iss, TraceIss};
    use crate::{trace::Op, vci};

    #[test]
    fn test_atomic_increment_retries_failed_sc() {
        let mut iss = TraceIss::new(0, vec![Op::AtomicIncrement { addr: 0x40 }]);
        let none = InstructionResponse::default();

        let (_, dreq) = iss.requests();
        assert_eq!(dreq.kind, DataRequestKind::LL);
        iss.execute(&none, &DataResponse::data(5));

        let (_, dreq) = iss.requests();
        assert_eq!(dreq.kind, DataRequestKind::SC);
        assert_eq!(dreq.wdata, 6);
        iss.execute(&none, &DataResponse::data(vci::SC_FAILURE));

        let (_, dreq) = iss.requests();
        assert_eq!(dreq.kind, DataRequestKind::LL);
        iss.execute(&none, &DataResponse::data(7));
        iss.execute(&none, &DataResponse::data(vci::SC_SUCCESS));

        assert!(iss.is_done());
        assert_eq!(iss.increments, vec![7]);
        assert_eq!(iss.sc_outcomes, vec![false, true]);
        assert_eq!(iss.retired(), 1);
    }

    #[test]
    fn test_pending_request_is_presented_again() {
        let mut iss = TraceIss::new(0, vec![Op::Read { addr: 0x10 }, Op::Idle { cycles: 2 }]);
        let none = InstructionResponse::default();
        iss.execute(&none, &DataResponse::default());
        assert_eq!(iss.requests().1.addr, 0x10);
        iss.execute(&none, &DataResponse::data(3));
        assert_eq!(iss.reads_of(0x10), vec![3]);

        assert!(!iss.requests().1.valid);
        iss.execute(&none, &DataResponse::default());
        assert!(!iss.is_done());
        iss.execute(&none, &DataResponse::default());
        assert!(iss.is_done());
    }
}
