//! Coherent L1 cache controller of one processor.
//!
//! Instruction and data caches share a write buffer and three network
//! ports: the direct network for reads and writes, the coherence
//! network on which the directory sends updates and invalidations,
//! and the cleanup network on which evicted lines are reported.
//!
//! Like the directory, the state machines read the registers from the
//! snapshot taken at the start of the cycle and write the live copy.
//! The caches and the write buffer are updated immediately.

mod cleanup;
mod cmd;
mod dcache;
mod icache;
mod rsp;
mod tgt;

pub use cleanup::CleanupState;
pub use cmd::CmdState;
pub use dcache::DcacheState;
pub use icache::IcacheState;
pub use rsp::RspState;
pub use tgt::TgtState;

use crate::{
    address, config,
    generic_cache::{GenericCache, Slot},
    interconn::Networks,
    iss::{DataResponse, InstructionResponse, Iss},
    mapping::{MappingTable, Segment},
    sync::{Arc, Mutex},
    vci,
    write_buffer::MultiWriteBuffer,
    Error,
};
use smallvec::smallvec;
use stats::l1::Counter;

/// Registers shared between the state machines.
#[derive(Debug, Clone)]
pub struct Registers {
    pub icache: IcacheState,
    /// State preempted by a coherence request
    pub icache_save: IcacheState,
    pub dcache: DcacheState,
    pub dcache_save: DcacheState,
    pub cmd: CmdState,
    pub rsp: RspState,
    pub tgt: TgtState,
    pub cleanup: CleanupState,

    pub icache_addr_save: address,
    pub icache_victim: Slot,
    pub icache_cleanup_save: u64,
    pub icache_miss_req: bool,
    pub icache_unc_req: bool,
    pub icache_cleanup_req: bool,
    pub icache_cleanup_line: u64,
    pub icache_inval_pending: bool,

    pub dcache_addr_save: address,
    pub dcache_kind_save: crate::iss::DataRequestKind,
    pub dcache_wdata_save: u32,
    pub dcache_be_save: u8,
    pub dcache_rdata_save: u32,
    /// Line invalidated by the INVAL state
    pub dcache_inval_addr: address,
    pub dcache_victim: Slot,
    pub dcache_cleanup_save: u64,
    pub dcache_miss_req: bool,
    pub dcache_unc_req: bool,
    pub dcache_cleanup_req: bool,
    pub dcache_cleanup_line: u64,
    pub dcache_inval_pending: bool,

    pub rsp_ins_ok: bool,
    pub rsp_ins_error: bool,
    pub rsp_data_ok: bool,
    pub rsp_data_error: bool,
    pub icache_miss_buf: vci::Words,
    pub dcache_miss_buf: vci::Words,

    pub tgt_icache_req: bool,
    pub tgt_dcache_req: bool,
    pub tgt_icache_rsp: bool,
    pub tgt_dcache_rsp: bool,
    /// Address of the line targeted by the coherence request
    pub tgt_addr: address,
    pub tgt_update: bool,
    pub tgt_data: bool,
    pub tgt_buf: vci::Words,
    pub tgt_val: smallvec::SmallVec<[bool; 16]>,
}

impl Registers {
    fn new(words: usize) -> Self {
        let slot = Slot { way: 0, set: 0 };
        Self {
            icache: IcacheState::IDLE,
            icache_save: IcacheState::IDLE,
            dcache: DcacheState::IDLE,
            dcache_save: DcacheState::IDLE,
            cmd: CmdState::IDLE,
            rsp: RspState::IDLE,
            tgt: TgtState::IDLE,
            cleanup: CleanupState::CMD,
            icache_addr_save: 0,
            icache_victim: slot,
            icache_cleanup_save: 0,
            icache_miss_req: false,
            icache_unc_req: false,
            icache_cleanup_req: false,
            icache_cleanup_line: 0,
            icache_inval_pending: false,
            dcache_addr_save: 0,
            dcache_kind_save: crate::iss::DataRequestKind::READ,
            dcache_wdata_save: 0,
            dcache_be_save: 0,
            dcache_rdata_save: 0,
            dcache_inval_addr: 0,
            dcache_victim: slot,
            dcache_cleanup_save: 0,
            dcache_miss_req: false,
            dcache_unc_req: false,
            dcache_cleanup_req: false,
            dcache_cleanup_line: 0,
            dcache_inval_pending: false,
            rsp_ins_ok: false,
            rsp_ins_error: false,
            rsp_data_ok: false,
            rsp_data_error: false,
            icache_miss_buf: smallvec![0; words],
            dcache_miss_buf: smallvec![0; words],
            tgt_icache_req: false,
            tgt_dcache_req: false,
            tgt_icache_rsp: false,
            tgt_dcache_rsp: false,
            tgt_addr: 0,
            tgt_update: false,
            tgt_data: false,
            tgt_buf: smallvec![0; words],
            tgt_val: smallvec![false; words],
        }
    }

    /// Names of all FSM states, for state dumps.
    #[must_use]
    pub fn states(&self) -> Vec<String> {
        vec![
            format!("ICACHE_{}", self.icache),
            format!("DCACHE_{}", self.dcache),
            format!("CMD_{}", self.cmd),
            format!("RSP_{}", self.rsp),
            format!("TGT_{}", self.tgt),
            format!("CLEANUP_{}", self.cleanup),
        ]
    }
}

/// L1 instruction and data caches with their coherence controller.
pub struct XCache<I> {
    name: String,
    srcid: usize,
    words: usize,
    mapping: MappingTable,
    /// The 16 byte segment addressed by coherence commands
    segment: Segment,

    icache: GenericCache,
    dcache: GenericCache,
    wbuf: MultiWriteBuffer,
    iss: I,

    r: Registers,
    rsp_regs: rsp::Local,
    tgt_regs: tgt::Local,

    stats: Arc<Mutex<stats::Stats>>,
}

impl<I> std::fmt::Debug for XCache<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XCache")
            .field("name", &self.name)
            .field("states", &self.r.states())
            .field("wbuf", &self.wbuf.to_string())
            .finish_non_exhaustive()
    }
}

impl<I> XCache<I>
where
    I: Iss,
{
    #[must_use]
    pub fn new(
        srcid: usize,
        config: &config::Config,
        mapping: MappingTable,
        iss: I,
        stats: Arc<Mutex<stats::Stats>>,
    ) -> Self {
        let name = format!("xcache{srcid}");
        let words = config.dcache.words;
        let segment = Segment::new(
            format!("{name}_coherence"),
            config.coherence_segment(srcid),
            16,
            false,
        );
        Self {
            icache: GenericCache::from_config(format!("{name}_icache"), &config.icache),
            dcache: GenericCache::from_config(format!("{name}_dcache"), &config.dcache),
            wbuf: MultiWriteBuffer::from_config(&config.write_buffer),
            name,
            srcid,
            words,
            mapping,
            segment,
            iss,
            r: Registers::new(words),
            rsp_regs: rsp::Local::default(),
            tgt_regs: tgt::Local::default(),
            stats,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn srcid(&self) -> usize {
        self.srcid
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.r
    }

    #[must_use]
    pub fn iss(&self) -> &I {
        &self.iss
    }

    #[must_use]
    pub fn icache(&self) -> &GenericCache {
        &self.icache
    }

    #[must_use]
    pub fn dcache(&self) -> &GenericCache {
        &self.dcache
    }

    #[must_use]
    pub fn write_buffer(&self) -> &MultiWriteBuffer {
        &self.wbuf
    }

    /// Whether the processor finished and nothing is left in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let r = &self.r;
        self.iss.is_done()
            && self.wbuf.empty()
            && r.icache == IcacheState::IDLE
            && r.dcache == DcacheState::IDLE
            && r.cmd == CmdState::IDLE
            && r.rsp == RspState::IDLE
            && r.tgt == TgtState::IDLE
            && r.cleanup == CleanupState::CMD
            && !r.icache_miss_req
            && !r.icache_unc_req
            && !r.dcache_miss_req
            && !r.dcache_unc_req
            && !r.icache_cleanup_req
            && !r.dcache_cleanup_req
            && !r.tgt_icache_req
            && !r.tgt_dcache_req
    }

    fn inc(&self, counter: Counter, count: u64) {
        self.stats.lock().l1[self.srcid].inc(counter, count);
    }

    fn line_mask(&self) -> address {
        !((self.words as address * 4) - 1)
    }

    fn nline(&self, addr: address) -> u64 {
        addr / (self.words as u64 * 4)
    }

    #[tracing::instrument(name = "xcache_cycle", skip_all, fields(srcid = self.srcid))]
    pub fn cycle(&mut self, cycle: u64, net: &mut Networks) -> Result<(), Error> {
        let r = self.r.clone();

        self.tgt_fsm(&r, net)?;

        let (ireq, dreq) = self.iss.requests();
        let irsp: InstructionResponse = self.icache_fsm(&r, &ireq);
        let drsp: DataResponse = self.dcache_fsm(&r, &dreq);
        self.update_write_buffer(&r);

        if (ireq.valid && !irsp.valid) || (dreq.valid && !drsp.valid) {
            self.inc(Counter::FROZEN_CYCLES, 1);
        }
        if drsp.valid {
            log::trace!("{}: {dreq} -> {:#x}", self.name, drsp.rdata);
        }
        self.iss.execute(&irsp, &drsp);

        self.cleanup_fsm(&r, net)?;
        self.cmd_fsm(&r, &mut net.direct_cmd);
        self.rsp_fsm(&r, &mut net.direct_rsp)?;

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{} @ {cycle}: {:?}", self.name, self.r.states());
        }
        Ok(())
    }

    /// Ages the write buffer, flushing it when a request depends on it.
    fn update_write_buffer(&mut self, r: &Registers) {
        let blocked_read = |req: bool, addr: address| req && !self.wbuf.miss(addr);
        let flush = self.r.dcache == DcacheState::SYNC
            || blocked_read(r.dcache_miss_req || r.dcache_unc_req, r.dcache_addr_save)
            || blocked_read(r.icache_miss_req || r.icache_unc_req, r.icache_addr_save)
            || (self.r.dcache == DcacheState::WRITE_REQ && !self.wbuf.wok(self.r.dcache_addr_save));
        self.wbuf.update(flush);
    }

    /// Checks the coherence bookkeeping of the controller.
    pub fn check_invariants(&self) -> Result<(), Error> {
        let r = &self.r;
        if r.dcache_inval_pending
            && !matches!(
                r.dcache,
                DcacheState::MISS_SELECT
                    | DcacheState::MISS_CLEANUP
                    | DcacheState::MISS_WAIT
                    | DcacheState::CC_CHECK
                    | DcacheState::CC_UPDT
                    | DcacheState::CC_INVAL
            )
        {
            return Err(Error::invariant(
                &self.name,
                format!("pending invalidation without a data miss in {}", r.dcache),
            ));
        }
        if r.icache_inval_pending
            && !matches!(
                r.icache,
                IcacheState::MISS_SELECT
                    | IcacheState::MISS_CLEANUP
                    | IcacheState::MISS_WAIT
                    | IcacheState::CC_CHECK
                    | IcacheState::CC_UPDT
                    | IcacheState::CC_INVAL
            )
        {
            return Err(Error::invariant(
                &self.name,
                format!("pending invalidation without an instruction miss in {}", r.icache),
            ));
        }
        Ok(())
    }
}
