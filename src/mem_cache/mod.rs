//! The L2 coherence directory.
//!
//! A set of state machines sharing the directory, the transaction
//! table (TRT), the update table (UPT) and the LL/SC reservations.
//! All FSMs step once per cycle. Shared registers (FSM states,
//! allocator grants and the request mailboxes between FSMs) are read
//! from the snapshot taken at the start of the cycle and written to
//! the live copy, so a value written in cycle `t` is seen in `t + 1`.
//! The tables themselves are updated immediately by their current
//! owner.

pub mod alloc;
pub mod atomic_tab;
pub mod directory;
pub mod transaction_tab;
pub mod update_tab;

mod cleanup;
mod init;
mod ixr;
mod llsc;
mod read;
mod tgt_cmd;
mod tgt_rsp;
mod write;
mod xram_rsp;

pub use cleanup::CleanupState;
pub use init::{InitCmdState, InitRspState};
pub use ixr::{IxrCmdState, IxrRspState};
pub use llsc::LlscState;
pub use read::ReadState;
pub use tgt_cmd::TgtCmdState;
pub use tgt_rsp::TgtRspState;
pub use write::WriteState;
pub use xram_rsp::XramRspState;

use crate::{
    address, config,
    fifo::Fifo,
    interconn::{Interconnect, Networks},
    lfsr::ScFailure,
    mapping::MappingTable,
    sync::{Arc, Mutex},
    vci, Error,
};
use alloc::{Allocator, DirClient, RoundRobin, TrtClient, UptClient};
use atomic_tab::AtomicTab;
use directory::Directory;
use smallvec::SmallVec;
use stats::mem_cache::Counter;
use transaction_tab::TransactionTab;
use update_tab::UpdateTab;

/// A read waiting in the read FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    pub address: address,
    /// Number of words
    pub length: usize,
    pub cached: bool,
    pub instruction: bool,
}

impl std::fmt::Display for ReadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "READ@{:#010x}[src={},len={}]",
            self.address, self.srcid, self.length
        )
    }
}

/// A write burst waiting in the write FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    /// Address of the first word of the burst
    pub address: address,
    pub be: vci::ByteEnables,
    pub data: vci::Words,
}

impl std::fmt::Display for WriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WRITE@{:#010x}[src={},cells={}]",
            self.address,
            self.srcid,
            self.data.len()
        )
    }
}

/// A LL or SC waiting in the LLSC FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlscRequest {
    pub srcid: usize,
    pub trdid: usize,
    pub pktid: u32,
    pub address: address,
    /// Data of a store conditional, `None` for a linked load
    pub sc: Option<u32>,
}

impl std::fmt::Display for LlscRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sc {
            Some(data) => write!(
                f,
                "SC@{:#010x}[src={},data={data:#x}]",
                self.address, self.srcid
            ),
            None => write!(f, "LL@{:#010x}[src={}]", self.address, self.srcid),
        }
    }
}

/// Invalidation request from XRAM_RSP to INIT_CMD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalRequest {
    pub brdcast: bool,
    /// UPT index
    pub trdid: usize,
    pub nline: u64,
    pub d_copies: u64,
    pub i_copies: u64,
}

/// Update (or broadcast invalidation) request from WRITE or LLSC to INIT_CMD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub brdcast: bool,
    /// UPT index
    pub trdid: usize,
    pub nline: u64,
    /// First updated word
    pub index: usize,
    pub data: vci::Words,
    pub we: SmallVec<[bool; 16]>,
    pub d_copies: u64,
}

/// Registers shared between the state machines.
#[derive(Debug, Clone)]
pub struct Registers {
    pub tgt_cmd: TgtCmdState,
    pub read: ReadState,
    pub write: WriteState,
    pub llsc: LlscState,
    pub cleanup: CleanupState,
    pub xram_rsp: XramRspState,
    pub ixr_cmd: IxrCmdState,
    pub ixr_rsp: IxrRspState,
    pub init_cmd: InitCmdState,
    pub init_rsp: InitRspState,
    pub tgt_rsp: TgtRspState,

    pub alloc_dir: RoundRobin<DirClient>,
    pub alloc_trt: RoundRobin<TrtClient>,
    pub alloc_upt: RoundRobin<UptClient>,

    pub read_to_tgt_rsp: Option<vci::Response>,
    pub write_to_tgt_rsp: Option<vci::Response>,
    pub llsc_to_tgt_rsp: Option<vci::Response>,
    pub xram_rsp_to_tgt_rsp: Option<vci::Response>,
    pub init_rsp_to_tgt_rsp: Option<vci::Response>,
    pub cleanup_to_tgt_rsp: Option<vci::Response>,

    pub read_to_ixr_cmd: Option<vci::XramCommand>,
    pub write_to_ixr_cmd: Option<vci::XramCommand>,
    pub llsc_to_ixr_cmd: Option<vci::XramCommand>,
    pub xram_rsp_to_ixr_cmd: Option<vci::XramCommand>,

    pub xram_rsp_to_init_cmd: Option<InvalRequest>,
    pub write_to_init_cmd: Option<UpdateRequest>,
    pub llsc_to_init_cmd: Option<UpdateRequest>,

    /// Fetched lines ready for XRAM_RSP, per TRT entry
    pub ixr_rsp_to_xram_rsp_rok: Vec<bool>,
}

impl Registers {
    fn new(trt_lines: usize) -> Self {
        Self {
            tgt_cmd: TgtCmdState::IDLE,
            read: ReadState::IDLE,
            write: WriteState::IDLE,
            llsc: LlscState::IDLE,
            cleanup: CleanupState::IDLE,
            xram_rsp: XramRspState::IDLE,
            ixr_cmd: IxrCmdState::READ_IDLE,
            ixr_rsp: IxrRspState::IDLE,
            init_cmd: InitCmdState::INVAL_IDLE,
            init_rsp: InitRspState::IDLE,
            tgt_rsp: TgtRspState::READ_IDLE,
            alloc_dir: RoundRobin::new(),
            alloc_trt: RoundRobin::new(),
            alloc_upt: RoundRobin::new(),
            read_to_tgt_rsp: None,
            write_to_tgt_rsp: None,
            llsc_to_tgt_rsp: None,
            xram_rsp_to_tgt_rsp: None,
            init_rsp_to_tgt_rsp: None,
            cleanup_to_tgt_rsp: None,
            read_to_ixr_cmd: None,
            write_to_ixr_cmd: None,
            llsc_to_ixr_cmd: None,
            xram_rsp_to_ixr_cmd: None,
            xram_rsp_to_init_cmd: None,
            write_to_init_cmd: None,
            llsc_to_init_cmd: None,
            ixr_rsp_to_xram_rsp_rok: vec![false; trt_lines],
        }
    }

    /// Names of all FSM states and grants, for state dumps.
    #[must_use]
    pub fn states(&self) -> Vec<String> {
        vec![
            format!("TGT_CMD_{}", self.tgt_cmd),
            format!("READ_{}", self.read),
            format!("WRITE_{}", self.write),
            format!("LLSC_{}", self.llsc),
            format!("CLEANUP_{}", self.cleanup),
            format!("XRAM_RSP_{}", self.xram_rsp),
            format!("IXR_CMD_{}", self.ixr_cmd),
            format!("IXR_RSP_{}", self.ixr_rsp),
            format!("INIT_CMD_{}", self.init_cmd),
            format!("INIT_RSP_{}", self.init_rsp),
            format!("TGT_RSP_{}", self.tgt_rsp),
            format!("ALLOC_DIR_{}", self.alloc_dir.granted()),
            format!("ALLOC_TRT_{}", self.alloc_trt.granted()),
            format!("ALLOC_UPT_{}", self.alloc_upt.granted()),
        ]
    }
}

/// The coherence directory and last level cache.
pub struct MemCache {
    name: String,
    num_procs: usize,
    words: usize,
    copies_limit: usize,
    coherence_base: address,
    mapping: MappingTable,

    dir: Directory,
    trt: TransactionTab,
    upt: UpdateTab,
    atomic: AtomicTab,
    sc_failure: Box<dyn ScFailure>,

    read_fifo: Fifo<ReadRequest>,
    write_fifo: Fifo<WriteRequest>,
    llsc_fifo: Fifo<LlscRequest>,

    r: Registers,
    read_regs: read::Local,
    write_regs: write::Local,
    llsc_regs: llsc::Local,
    cleanup_regs: cleanup::Local,
    xram_rsp_regs: xram_rsp::Local,
    ixr_rsp_regs: ixr::RspLocal,
    init_cmd_regs: init::CmdLocal,
    init_rsp_regs: init::RspLocal,

    stats: Arc<Mutex<stats::Stats>>,
}

impl std::fmt::Debug for MemCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemCache")
            .field("name", &self.name)
            .field("states", &self.r.states())
            .field("dir", &self.dir)
            .field("trt", &self.trt)
            .field("upt", &self.upt)
            .finish_non_exhaustive()
    }
}

impl MemCache {
    #[must_use]
    pub fn new(
        config: &config::Config,
        mapping: MappingTable,
        sc_failure: Box<dyn ScFailure>,
        stats: Arc<Mutex<stats::Stats>>,
    ) -> Self {
        let mc = &config.mem_cache;
        Self {
            name: "mem_cache".to_string(),
            num_procs: config.num_procs,
            words: mc.words,
            copies_limit: mc.copies_limit,
            coherence_base: config.coherence_base,
            mapping,
            dir: Directory::new(mc.ways, mc.sets, mc.words),
            trt: TransactionTab::new(mc.trt_lines, mc.words),
            upt: UpdateTab::new(mc.upt_lines),
            atomic: AtomicTab::new(config.num_procs),
            sc_failure,
            read_fifo: Fifo::new(Some(mc.fifo_depth)),
            write_fifo: Fifo::new(Some(mc.fifo_depth)),
            llsc_fifo: Fifo::new(Some(mc.fifo_depth)),
            r: Registers::new(mc.trt_lines),
            read_regs: read::Local::default(),
            write_regs: write::Local::new(mc.words),
            llsc_regs: llsc::Local::default(),
            cleanup_regs: cleanup::Local::default(),
            xram_rsp_regs: xram_rsp::Local::default(),
            ixr_rsp_regs: ixr::RspLocal::default(),
            init_cmd_regs: init::CmdLocal::default(),
            init_rsp_regs: init::RspLocal::default(),
            stats,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.r
    }

    #[must_use]
    pub fn directory(&self) -> &Directory {
        &self.dir
    }

    #[must_use]
    pub fn transaction_tab(&self) -> &TransactionTab {
        &self.trt
    }

    #[must_use]
    pub fn update_tab(&self) -> &UpdateTab {
        &self.upt
    }

    #[must_use]
    pub fn atomic_tab(&self) -> &AtomicTab {
        &self.atomic
    }

    /// Current value of the word at `addr` if its line is cached here.
    #[must_use]
    pub fn peek_word(&self, addr: address) -> Option<u32> {
        let (_, way) = self.dir.peek(addr)?;
        Some(self.dir.line(self.dir.y(addr), way)[self.dir.x(addr)])
    }

    /// Whether every FSM is idle and no transaction is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let r = &self.r;
        self.read_fifo.is_empty()
            && self.write_fifo.is_empty()
            && self.llsc_fifo.is_empty()
            && r.tgt_cmd == TgtCmdState::IDLE
            && r.read == ReadState::IDLE
            && r.write == WriteState::IDLE
            && r.llsc == LlscState::IDLE
            && r.cleanup == CleanupState::IDLE
            && r.xram_rsp == XramRspState::IDLE
            && r.ixr_rsp == IxrRspState::IDLE
            && r.init_rsp == InitRspState::IDLE
            && self.trt.iter().all(|entry| !entry.valid)
            && self.upt.iter().all(|entry| !entry.valid)
            && r.read_to_tgt_rsp.is_none()
            && r.write_to_tgt_rsp.is_none()
            && r.llsc_to_tgt_rsp.is_none()
            && r.xram_rsp_to_tgt_rsp.is_none()
            && r.init_rsp_to_tgt_rsp.is_none()
            && r.cleanup_to_tgt_rsp.is_none()
            && r.read_to_ixr_cmd.is_none()
            && r.write_to_ixr_cmd.is_none()
            && r.llsc_to_ixr_cmd.is_none()
            && r.xram_rsp_to_ixr_cmd.is_none()
            && r.xram_rsp_to_init_cmd.is_none()
            && r.write_to_init_cmd.is_none()
            && r.llsc_to_init_cmd.is_none()
    }

    fn inc(&self, counter: Counter, count: u64) {
        self.stats.lock().mem_cache.inc(counter, count);
    }

    /// Address of the coherence segment register of L1 `srcid`.
    fn coherence_address(&self, srcid: usize, offset: address) -> address {
        self.coherence_base + srcid as address * 16 + offset
    }

    #[tracing::instrument(name = "mem_cache_cycle", skip_all)]
    pub fn cycle(&mut self, cycle: u64, net: &mut Networks) -> Result<(), Error> {
        let r = self.r.clone();

        let put = self.tgt_cmd_fsm(&r, &net.direct_cmd)?;
        if put.is_some() {
            net.direct_cmd.pop(0);
        }
        self.init_rsp_fsm(&r, &mut net.coherence_rsp)?;
        self.read_fsm(&r);
        self.write_fsm(&r);
        self.ixr_cmd_fsm(&r, &mut net.xram_cmd);
        self.ixr_rsp_fsm(&r, &mut net.xram_rsp)?;
        self.xram_rsp_fsm(&r);
        self.cleanup_fsm(&r, &mut net.cleanup_cmd, &mut net.cleanup_rsp)?;
        self.llsc_fsm(&r);
        self.init_cmd_fsm(&r, &mut net.coherence_cmd);
        self.tgt_rsp_fsm(&r, &mut net.direct_rsp);

        self.alloc_upt(&r);
        self.alloc_dir(&r);
        self.alloc_trt(&r);

        // commands decoded this cycle become visible in the next one
        match put {
            Some(tgt_cmd::Put::Read(req)) => self.read_fifo.enqueue(req),
            Some(tgt_cmd::Put::Write(req)) => self.write_fifo.enqueue(req),
            Some(tgt_cmd::Put::Llsc(req)) => self.llsc_fifo.enqueue(req),
            None => {}
        }

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{} @ {cycle}: {:?}", self.name, self.r.states());
        }
        self.inc(Counter::CYCLES, 1);
        Ok(())
    }

    fn alloc_dir(&mut self, r: &Registers) {
        use DirClient as C;
        let trt = r.alloc_trt.granted();
        let holding = |client: C| match client {
            C::READ => {
                r.read == ReadState::DIR_LOCK
                    || (r.read == ReadState::TRT_LOCK && trt != TrtClient::READ)
            }
            C::WRITE => {
                matches!(
                    r.write,
                    WriteState::DIR_LOCK
                        | WriteState::DIR_HIT_READ
                        | WriteState::TRT_WRITE_LOCK
                        | WriteState::INVAL_LOCK
                ) || (r.write == WriteState::TRT_LOCK && trt != TrtClient::WRITE)
            }
            C::LLSC => {
                matches!(
                    r.llsc,
                    LlscState::LL_DIR_LOCK
                        | LlscState::LL_DIR_HIT
                        | LlscState::SC_DIR_LOCK
                        | LlscState::SC_DIR_HIT
                        | LlscState::SC_TRT_LOCK
                        | LlscState::SC_INVAL_LOCK
                ) || (r.llsc == LlscState::LLSC_TRT_LOCK && trt != TrtClient::LLSC)
            }
            C::CLEANUP => matches!(r.cleanup, CleanupState::DIR_LOCK | CleanupState::DIR_WRITE),
            C::XRAM_RSP => matches!(
                r.xram_rsp,
                XramRspState::DIR_LOCK | XramRspState::TRT_COPY | XramRspState::INVAL_LOCK
            ),
        };
        let requesting = |client: C| match client {
            C::READ => r.read == ReadState::DIR_LOCK,
            C::WRITE => r.write == WriteState::DIR_LOCK,
            C::LLSC => matches!(r.llsc, LlscState::LL_DIR_LOCK | LlscState::SC_DIR_LOCK),
            C::CLEANUP => r.cleanup == CleanupState::DIR_LOCK,
            C::XRAM_RSP => r.xram_rsp == XramRspState::DIR_LOCK,
        };
        self.r.alloc_dir.update(holding, requesting);
    }

    fn alloc_trt(&mut self, r: &Registers) {
        use TrtClient as C;
        let holding = |client: C| match client {
            C::READ => r.read == ReadState::TRT_LOCK,
            C::WRITE => matches!(
                r.write,
                WriteState::TRT_LOCK | WriteState::TRT_WRITE_LOCK | WriteState::INVAL_LOCK
            ),
            C::LLSC => matches!(
                r.llsc,
                LlscState::LLSC_TRT_LOCK | LlscState::SC_TRT_LOCK | LlscState::SC_INVAL_LOCK
            ),
            C::XRAM_RSP => matches!(
                r.xram_rsp,
                XramRspState::TRT_COPY | XramRspState::DIR_UPDT | XramRspState::INVAL_LOCK
            ),
            C::IXR_RSP => matches!(r.ixr_rsp, IxrRspState::TRT_ERASE | IxrRspState::TRT_READ),
        };
        let requesting = |client: C| match client {
            C::READ => r.read == ReadState::TRT_LOCK,
            C::WRITE => matches!(r.write, WriteState::TRT_LOCK | WriteState::TRT_WRITE_LOCK),
            C::LLSC => matches!(r.llsc, LlscState::LLSC_TRT_LOCK | LlscState::SC_TRT_LOCK),
            C::XRAM_RSP => r.xram_rsp == XramRspState::TRT_COPY,
            C::IXR_RSP => matches!(r.ixr_rsp, IxrRspState::TRT_ERASE | IxrRspState::TRT_READ),
        };
        self.r.alloc_trt.update(holding, requesting);
    }

    fn alloc_upt(&mut self, r: &Registers) {
        use UptClient as C;
        let holding = |client: C| match client {
            C::WRITE => matches!(r.write, WriteState::UPT_LOCK | WriteState::INVAL_LOCK),
            C::XRAM_RSP => r.xram_rsp == XramRspState::INVAL_LOCK,
            C::INIT_RSP => matches!(r.init_rsp, InitRspState::UPT_LOCK | InitRspState::UPT_CLEAR),
            C::CLEANUP => r.cleanup == CleanupState::UPT_LOCK,
            C::LLSC => matches!(r.llsc, LlscState::SC_UPT_LOCK | LlscState::SC_INVAL_LOCK),
        };
        let requesting = |client: C| match client {
            C::WRITE => matches!(r.write, WriteState::UPT_LOCK | WriteState::INVAL_LOCK),
            C::XRAM_RSP => r.xram_rsp == XramRspState::INVAL_LOCK,
            C::INIT_RSP => r.init_rsp == InitRspState::UPT_LOCK,
            C::CLEANUP => r.cleanup == CleanupState::UPT_LOCK,
            C::LLSC => matches!(r.llsc, LlscState::SC_UPT_LOCK | LlscState::SC_INVAL_LOCK),
        };
        self.r.alloc_upt.update(holding, requesting);
    }

    /// Checks the structural invariants of the directory and its tables.
    pub fn check_invariants(&self) -> Result<(), Error> {
        for (nline, entry) in self.dir.iter_valid() {
            if !entry.is_consistent() {
                return Err(Error::invariant(
                    &self.name,
                    format!("copies of line {nline:#x} disagree with count: {entry}"),
                ));
            }
            if !entry.is_cnt() && entry.count > 2 * self.num_procs {
                return Err(Error::invariant(
                    &self.name,
                    format!("line {nline:#x} has more copies than caches: {entry}"),
                ));
            }
        }
        let pending: Vec<u64> = self
            .trt
            .iter()
            .filter(|entry| entry.valid)
            .map(|entry| entry.nline)
            .collect();
        if let Some(nline) = pending
            .iter()
            .enumerate()
            .find_map(|(i, nline)| pending[i + 1..].contains(nline).then_some(nline))
        {
            return Err(Error::invariant(
                &self.name,
                format!("several transactions pending on line {nline:#x}"),
            ));
        }
        for (index, entry) in self.upt.iter().enumerate() {
            if entry.valid && entry.count == 0 {
                return Err(Error::invariant(
                    &self.name,
                    format!("update table entry {index} completed but still valid: {entry}"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
