use super::{llsc, MemCache};
use crate::{
    address, config,
    interconn::{Interconnect, Networks},
    lfsr::{AlwaysFail, NeverFail, ScFailure},
    sync::{Arc, Mutex},
    testing, vci,
    xram::Xram,
    Error,
};
use color_eyre::eyre;
use pretty_assertions_sorted as diff;
use stats::mem_cache::Counter;

const MAX_CYCLES: u64 = 1_000;

/// Drives the directory and the external memory with scripted L1 caches.
///
/// Every coherence command is acknowledged by its destination, except
/// broadcasts which are only acknowledged by the listed sharers.
/// A sharer that is also listed as evicting answers a broadcast with
/// a cleanup of the line instead.
struct Bench {
    mem_cache: MemCache,
    xram: Xram,
    net: Networks,
    stats: Arc<Mutex<stats::Stats>>,
    cycle: u64,
    sharers: Vec<bool>,
    evicting: Vec<bool>,
    coherence: Vec<(usize, vci::CoherenceCommand)>,
    cleanup_acks: Vec<vci::CleanupResponse>,
    /// Direct responses collected while draining
    late: Vec<vci::Response>,
}

impl Bench {
    fn new(config: &config::Config, sc_failure: Box<dyn ScFailure>) -> eyre::Result<Self> {
        testing::init_logging();
        config.validate()?;
        let stats = Arc::new(Mutex::new(stats::Stats::new(config.num_procs)));
        let mem_cache = MemCache::new(config, config.mapping_table()?, sc_failure, stats.clone());
        Ok(Self {
            mem_cache,
            xram: Xram::new(&config.xram, config.mem_cache.words),
            net: Networks::new(config.num_procs, config.network_buffer),
            stats,
            cycle: 0,
            sharers: vec![false; config.num_procs],
            evicting: vec![false; config.num_procs],
            coherence: Vec::new(),
            cleanup_acks: Vec::new(),
            late: Vec::new(),
        })
    }

    fn step(&mut self) -> Result<(), Error> {
        self.mem_cache.cycle(self.cycle, &mut self.net)?;
        self.xram
            .cycle(self.cycle, &mut self.net.xram_cmd, &mut self.net.xram_rsp);
        for proc in 0..self.sharers.len() {
            while let Some(cmd) = self.net.coherence_cmd.pop(proc) {
                if cmd.is_broadcast() && self.sharers[proc] && self.evicting[proc] {
                    self.sharers[proc] = false;
                    self.net.cleanup_cmd.push(
                        proc,
                        0,
                        vci::CleanupCommand {
                            srcid: proc,
                            trdid: 0,
                            pktid: 0,
                            nline: cmd.nline,
                        },
                    );
                } else if !cmd.is_broadcast() || self.sharers[proc] {
                    self.net.coherence_rsp.push(
                        proc,
                        0,
                        vci::CoherenceResponse {
                            srcid: proc,
                            trdid: cmd.trdid,
                            pktid: 0,
                            error: false,
                        },
                    );
                }
                self.coherence.push((proc, cmd));
            }
            while let Some(ack) = self.net.cleanup_rsp.pop(proc) {
                self.cleanup_acks.push(ack);
            }
        }
        self.net.transfer();
        self.cycle += 1;
        if let Err(violation) = self.mem_cache.check_invariants() {
            panic!("cycle {}: {violation}", self.cycle);
        }
        Ok(())
    }

    fn send(&mut self, cmd: vci::Command) {
        self.net.direct_cmd.push(cmd.srcid, 0, cmd);
    }

    fn response(&mut self, srcid: usize) -> eyre::Result<vci::Response> {
        for _ in 0..MAX_CYCLES {
            self.step()?;
            if let Some(rsp) = self.net.direct_rsp.pop(srcid) {
                return Ok(rsp);
            }
        }
        eyre::bail!("no response for {srcid} after {MAX_CYCLES} cycles");
    }

    fn drain(&mut self) -> eyre::Result<()> {
        for _ in 0..MAX_CYCLES {
            self.step()?;
            for proc in 0..self.sharers.len() {
                while let Some(rsp) = self.net.direct_rsp.pop(proc) {
                    self.late.push(rsp);
                }
            }
            if self.mem_cache.is_idle() && self.xram.is_idle() && !self.net.busy() {
                return Ok(());
            }
        }
        eyre::bail!("directory still busy after {MAX_CYCLES} cycles");
    }

    fn read(&mut self, srcid: usize, addr: address) -> eyre::Result<vci::Response> {
        let words = self.mem_cache.words;
        self.send(vci::Command::read(
            srcid,
            addr,
            words * 4,
            vci::TransactionType::DATA_MISS,
            true,
        ));
        self.response(srcid)
    }

    fn write(&mut self, srcid: usize, addr: address, data: u32) -> eyre::Result<vci::Response> {
        self.send(vci::Command::write(
            srcid,
            0,
            addr,
            smallvec::smallvec![0xF],
            smallvec::smallvec![data],
        ));
        self.response(srcid)
    }

    fn counter(&self, counter: Counter) -> u64 {
        self.stats.lock().mem_cache.get(counter)
    }
}

fn small_config() -> config::Config {
    config::Config {
        num_procs: 4,
        ..config::Config::default()
    }
}

#[test]
fn test_read_miss_fetches_line_from_xram() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(NeverFail))?;
    bench.xram.write_word(0x44, 0xdead);

    let rsp = bench.read(0, 0x40)?;
    assert!(!rsp.error);
    assert_eq!(rsp.pktid, vci::TransactionType::DATA_MISS.pktid());
    assert_eq!(rsp.data.len(), 8);
    assert_eq!(rsp.data[1], 0xdead);
    assert_eq!(bench.counter(Counter::READ_MISS), 1);

    let rsp = bench.read(1, 0x40)?;
    assert_eq!(rsp.data[1], 0xdead);
    bench.drain()?;
    assert_eq!(bench.counter(Counter::READ), 2);
    assert_eq!(bench.counter(Counter::READ_MISS), 1);

    let (entry, _) = bench.mem_cache.directory().peek(0x40).expect("line cached");
    assert!(entry.has_copy(0, false));
    assert!(entry.has_copy(1, false));
    assert_eq!(entry.count, 2);
    assert!(!entry.dirty);
    Ok(())
}

#[test]
fn test_write_updates_other_copies() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(NeverFail))?;
    bench.read(0, 0x100)?;
    bench.read(1, 0x100)?;
    bench.read(2, 0x100)?;

    let rsp = bench.write(0, 0x108, 42)?;
    assert_eq!(rsp.pktid, vci::write_pktid(0));
    bench.drain()?;

    // the writer keeps its copy up to date itself
    let updates: Vec<_> = bench
        .coherence
        .iter()
        .map(|(proc, cmd)| (*proc, cmd.index, cmd.data.to_vec()))
        .collect();
    diff::assert_eq!(updates, vec![(1, 2, vec![42]), (2, 2, vec![42])]);
    let address = bench.coherence[0].1.address;
    assert_eq!(address, small_config().coherence_segment(1) + vci::UPDT_DATA_OFFSET);

    assert_eq!(bench.mem_cache.peek_word(0x108), Some(42));
    assert_eq!(bench.counter(Counter::UPDATE), 1);
    assert_eq!(bench.counter(Counter::UPDATE_MULT), 2);
    let (entry, _) = bench.mem_cache.directory().peek(0x100).expect("line cached");
    assert!(entry.dirty);
    assert_eq!(entry.count, 3);
    Ok(())
}

#[test]
fn test_write_without_other_copies_is_answered_at_once() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(NeverFail))?;
    bench.read(3, 0x200)?;
    bench.write(3, 0x200, 7)?;
    bench.drain()?;
    assert!(bench.coherence.is_empty());
    assert_eq!(bench.counter(Counter::UPDATE), 0);
    assert_eq!(bench.mem_cache.peek_word(0x200), Some(7));
    Ok(())
}

#[test]
fn test_write_miss_merges_into_fetched_line() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(NeverFail))?;
    bench.xram.write_word(0x300, 1);
    bench.xram.write_word(0x304, 2);
    bench.write(2, 0x304, 20)?;
    bench.drain()?;
    assert_eq!(bench.counter(Counter::WRITE_MISS), 1);
    assert_eq!(bench.mem_cache.peek_word(0x300), Some(1));
    assert_eq!(bench.mem_cache.peek_word(0x304), Some(20));
    let (entry, _) = bench.mem_cache.directory().peek(0x300).expect("line cached");
    assert!(entry.dirty);
    assert_eq!(entry.count, 0);
    Ok(())
}

#[test]
fn test_counter_mode_write_broadcasts_invalidation() -> eyre::Result<()> {
    let mut config = small_config();
    config.mem_cache.copies_limit = 2;
    let mut bench = Bench::new(&config, Box::new(NeverFail))?;
    for proc in 0..3 {
        bench.read(proc, 0x400)?;
        bench.sharers[proc] = true;
    }
    let (entry, _) = bench.mem_cache.directory().peek(0x400).expect("line cached");
    assert!(entry.is_cnt());
    assert_eq!(entry.count, 3);

    bench.write(3, 0x404, 99)?;
    bench.drain()?;

    assert!(bench.mem_cache.directory().peek(0x400).is_none());
    assert_eq!(bench.coherence.len(), 4);
    assert!(bench.coherence.iter().all(|(_, cmd)| cmd.is_broadcast()));
    assert_eq!(bench.counter(Counter::INVAL_BRDCAST), 1);
    // the written line went back to memory with the new word
    assert_eq!(bench.xram.read_word(0x404), 99);
    Ok(())
}

#[test]
fn test_cleanup_completes_broadcast_invalidation() -> eyre::Result<()> {
    let mut config = small_config();
    config.mem_cache.copies_limit = 2;
    let mut bench = Bench::new(&config, Box::new(NeverFail))?;
    for proc in 0..3 {
        bench.read(proc, 0x480)?;
        bench.sharers[proc] = true;
    }
    // L1 1 evicted its copy while the invalidation was in flight
    bench.evicting[1] = true;

    let rsp = bench.write(3, 0x484, 17)?;
    assert_eq!(rsp.pktid, vci::write_pktid(0));
    assert!(!rsp.error);
    bench.drain()?;

    assert!(bench.late.is_empty(), "one write response only: {:?}", bench.late);
    diff::assert_eq!(
        bench
            .cleanup_acks
            .iter()
            .map(|ack| (ack.srcid, ack.trdid))
            .collect::<Vec<_>>(),
        vec![(1, 0)]
    );
    assert!(bench.mem_cache.update_tab().iter().all(|entry| !entry.valid));
    assert!(bench.mem_cache.directory().peek(0x480).is_none());
    assert_eq!(bench.counter(Counter::CLEANUP), 1);
    assert_eq!(bench.counter(Counter::INVAL_BRDCAST), 1);
    assert_eq!(bench.xram.read_word(0x484), 17);
    Ok(())
}

#[test]
fn test_cleanup_without_copy_is_acknowledged() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(NeverFail))?;
    bench.net.cleanup_cmd.push(
        2,
        0,
        vci::CleanupCommand {
            srcid: 2,
            trdid: 1,
            pktid: 0,
            nline: 0x800 / 32,
        },
    );
    bench.drain()?;

    assert_eq!(bench.cleanup_acks.len(), 1);
    assert_eq!(bench.cleanup_acks[0].srcid, 2);
    assert_eq!(bench.cleanup_acks[0].trdid, 1);
    assert!(bench.late.is_empty());
    assert!(bench.mem_cache.directory().peek(0x800).is_none());
    assert!(bench.mem_cache.update_tab().iter().all(|entry| !entry.valid));
    assert_eq!(bench.counter(Counter::CLEANUP), 1);
    Ok(())
}

#[test]
fn test_linked_load_and_store_conditional() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(NeverFail))?;
    bench.xram.write_word(0x500, 5);

    bench.send(vci::Command::locked_read(0, 0x500));
    assert_eq!(bench.response(0)?.data[0], 5);
    bench.send(vci::Command::locked_read(1, 0x500));
    assert_eq!(bench.response(1)?.data[0], 5);

    bench.send(vci::Command::store_cond(0, 0x500, 6));
    assert_eq!(bench.response(0)?.data[0], llsc::SC_SUCCESS);
    // the first SC broke the other reservation
    bench.send(vci::Command::store_cond(1, 0x500, 7));
    assert_eq!(bench.response(1)?.data[0], llsc::SC_FAILURE);
    bench.drain()?;

    assert_eq!(bench.mem_cache.peek_word(0x500), Some(6));
    assert_eq!(bench.counter(Counter::LL), 2);
    assert_eq!(bench.counter(Counter::SC), 2);
    assert_eq!(bench.counter(Counter::SC_FAIL), 1);
    Ok(())
}

#[test]
fn test_forced_sc_failure() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(AlwaysFail))?;
    bench.send(vci::Command::locked_read(2, 0x600));
    bench.response(2)?;
    bench.send(vci::Command::store_cond(2, 0x600, 1));
    assert_eq!(bench.response(2)?.data[0], llsc::SC_FAILURE);
    bench.drain()?;
    assert_eq!(bench.mem_cache.peek_word(0x600), Some(0));
    assert_eq!(
        bench.mem_cache.atomic_tab().reservation(2),
        Some(0x600),
        "a forced failure keeps the reservation"
    );
    Ok(())
}

#[test]
fn test_sc_updates_cached_copies() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(NeverFail))?;
    bench.read(1, 0x700)?;
    bench.send(vci::Command::locked_read(0, 0x704));
    bench.response(0)?;
    bench.send(vci::Command::store_cond(0, 0x704, 3));
    assert_eq!(bench.response(0)?.data[0], llsc::SC_SUCCESS);
    bench.drain()?;
    assert_eq!(bench.coherence.len(), 1);
    let (proc, update) = &bench.coherence[0];
    assert_eq!(*proc, 1);
    assert_eq!(update.index, 1);
    assert_eq!(update.data.to_vec(), vec![3]);
    Ok(())
}

#[test]
fn test_eviction_invalidates_and_writes_back_victim() -> eyre::Result<()> {
    let mut config = small_config();
    config.mem_cache.ways = 1;
    config.mem_cache.sets = 4;
    let mut bench = Bench::new(&config, Box::new(NeverFail))?;
    let line_bytes = config.line_bytes() as address;
    let stride = line_bytes * 4;

    bench.read(1, 0)?;
    bench.write(2, 4, 11)?;
    // same set, evicts the dirty line with a copy in L1 1
    bench.read(0, stride)?;
    bench.drain()?;

    let invals: Vec<_> = bench
        .coherence
        .iter()
        .filter(|(_, cmd)| cmd.data.is_empty())
        .collect();
    assert_eq!(invals.len(), 1);
    assert_eq!(invals[0].0, 1);
    assert_eq!(invals[0].1.nline, 0);
    assert_eq!(bench.xram.read_word(4), 11);
    assert_eq!(bench.counter(Counter::WRITE_DIRTY), 1);
    assert_eq!(bench.counter(Counter::INVAL), 1);
    assert!(bench.mem_cache.directory().peek(0).is_none());
    Ok(())
}

#[test]
fn test_out_of_segment_address_is_fatal() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(NeverFail))?;
    bench.send(vci::Command::read(
        0,
        0x0800_0000,
        4,
        vci::TransactionType::DATA_UNC,
        false,
    ));
    let err = bench.response(0).unwrap_err();
    let err = err.downcast_ref::<Error>().expect("simulation error");
    assert!(matches!(err, Error::OutOfSegment { address: 0x0800_0000, .. }));
    Ok(())
}

#[test]
fn test_read_crossing_a_line_is_malformed() -> eyre::Result<()> {
    let mut bench = Bench::new(&small_config(), Box::new(NeverFail))?;
    bench.send(vci::Command::read(
        0,
        0x1C,
        8,
        vci::TransactionType::DATA_UNC,
        false,
    ));
    let err = bench.response(0).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::MalformedPacket { .. })
    ));
    Ok(())
}

#[test]
fn test_xram_bus_error_reaches_the_reader() -> eyre::Result<()> {
    let mut config = small_config();
    config.xram.size = 0x0008_0000;
    config.mapping = vec![crate::mapping::Segment::new("ram", 0, 0x0010_0000, true)];
    let stats = Arc::new(Mutex::new(stats::Stats::new(config.num_procs)));
    // the mapping exceeds the memory, which validation would reject
    let mem_cache = MemCache::new(
        &config,
        config.mapping_table()?,
        Box::new(NeverFail),
        stats.clone(),
    );
    let mut bench = Bench {
        mem_cache,
        xram: Xram::new(&config.xram, config.mem_cache.words),
        net: Networks::new(config.num_procs, config.network_buffer),
        stats,
        cycle: 0,
        sharers: vec![false; config.num_procs],
        evicting: vec![false; config.num_procs],
        coherence: Vec::new(),
        cleanup_acks: Vec::new(),
        late: Vec::new(),
    };
    let rsp = bench.read(0, 0x000C_0000)?;
    assert!(rsp.error);
    bench.drain()?;
    assert!(bench.mem_cache.directory().peek(0x000C_0000).is_none());
    Ok(())
}
