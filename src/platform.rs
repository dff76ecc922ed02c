//! A complete shared memory platform.
//!
//! `num_procs` processors with their coherent L1 caches share one
//! directory based L2 cache in front of the external memory.
//! All components are stepped once per cycle, after which every
//! network delivers the packets pushed during that cycle.

use crate::{
    address, config, deadlock,
    interconn::Networks,
    iss::{Iss, TraceIss},
    lfsr::{Lfsr, ScFailure},
    mem_cache::MemCache,
    sync::{Arc, Mutex},
    trace::{Program, Trace},
    xcache::XCache,
    xram::Xram,
    Error,
};

pub struct Platform<I = TraceIss> {
    config: config::Config,
    pub(crate) xcaches: Vec<XCache<I>>,
    pub(crate) mem_cache: MemCache,
    pub(crate) xram: Xram,
    pub(crate) net: Networks,
    stats: Arc<Mutex<stats::Stats>>,
    cycle: u64,
    log_after_cycle: Option<u64>,
}

impl<I> std::fmt::Debug for Platform<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("num_procs", &self.config.num_procs)
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

impl Platform<TraceIss> {
    /// Builds a platform replaying one program per processor.
    ///
    /// Forced store conditional failures are drawn from an LFSR
    /// seeded with `seed`.
    pub fn new(config: config::Config, programs: Vec<Program>, seed: u32) -> Result<Self, Error> {
        let programs = Trace { programs }.into_programs(config.num_procs)?;
        let processors = programs
            .iter()
            .enumerate()
            .map(|(id, program)| TraceIss::new(id, program.unroll()))
            .collect();
        Self::with_processors(config, processors, Box::new(Lfsr::new(seed)))
    }
}

impl<I> Platform<I>
where
    I: Iss,
{
    pub fn with_processors(
        config: config::Config,
        processors: Vec<I>,
        sc_failure: Box<dyn ScFailure>,
    ) -> Result<Self, Error> {
        config.validate()?;
        if processors.len() != config.num_procs {
            return Err(Error::InvalidConfig(format!(
                "{} processors for a platform of {}",
                processors.len(),
                config.num_procs
            )));
        }
        let mapping = config.mapping_table()?;
        let stats = Arc::new(Mutex::new(stats::Stats::new(config.num_procs)));
        let xcaches = processors
            .into_iter()
            .enumerate()
            .map(|(srcid, iss)| XCache::new(srcid, &config, mapping.clone(), iss, stats.clone()))
            .collect();
        let mem_cache = MemCache::new(&config, mapping, sc_failure, stats.clone());
        log::debug!(
            "platform: {} processors, l1 {} / {}, mem_cache {}",
            config.num_procs,
            config.icache,
            config.dcache,
            config.mem_cache
        );
        Ok(Self {
            xram: Xram::new(&config.xram, config.mem_cache.words),
            net: Networks::new(config.num_procs, config.network_buffer),
            log_after_cycle: config.log_after_cycle,
            config,
            xcaches,
            mem_cache,
            stats,
            cycle: 0,
        })
    }

    #[must_use]
    pub fn config(&self) -> &config::Config {
        &self.config
    }

    #[must_use]
    pub fn current_cycle(&self) -> u64 {
        self.cycle
    }

    #[must_use]
    pub fn iss(&self, id: usize) -> &I {
        self.xcaches[id].iss()
    }

    #[must_use]
    pub fn xcache(&self, id: usize) -> &XCache<I> {
        &self.xcaches[id]
    }

    #[must_use]
    pub fn mem_cache(&self) -> &MemCache {
        &self.mem_cache
    }

    /// Initializes a word of the external memory.
    pub fn write_word(&mut self, addr: address, value: u32) {
        self.xram.write_word(addr, value);
    }

    /// Current value of a word, as seen by the directory.
    #[must_use]
    pub fn read_word(&self, addr: address) -> u32 {
        self.mem_cache
            .peek_word(addr)
            .unwrap_or_else(|| self.xram.read_word(addr))
    }

    #[must_use]
    pub fn stats(&self) -> stats::Stats {
        let mut stats = self.stats.lock().clone();
        stats.sim.cycles = self.cycle;
        stats.sim.retired = self.xcaches.iter().map(|xcache| xcache.iss().retired()).sum();
        stats
    }

    /// Whether every processor finished and nothing is in flight.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.xcaches.iter().all(XCache::is_idle)
            && self.mem_cache.is_idle()
            && self.xram.is_idle()
            && !self.net.busy()
    }

    pub fn cycle(&mut self) -> Result<(), Error> {
        match self.log_after_cycle {
            Some(log_after_cycle) if self.cycle >= log_after_cycle => {
                eprintln!("initializing logging after cycle {}", self.cycle);
                crate::init_late_logging();
                self.log_after_cycle.take();
            }
            _ => {}
        }
        log::debug!("======== cycle {} ========", self.cycle);

        for xcache in &mut self.xcaches {
            xcache.cycle(self.cycle, &mut self.net)?;
        }
        self.mem_cache.cycle(self.cycle, &mut self.net)?;
        self.xram
            .cycle(self.cycle, &mut self.net.xram_cmd, &mut self.net.xram_rsp);
        self.net.transfer();
        self.cycle += 1;
        Ok(())
    }

    /// Checks the coherence invariants of every component.
    pub fn check_invariants(&self) -> Result<(), Error> {
        for xcache in &self.xcaches {
            xcache.check_invariants()?;
        }
        self.mem_cache.check_invariants()
    }

    /// Whether some processor is busy without waiting on its caches.
    fn computing(&self) -> bool {
        self.xcaches.iter().any(|xcache| {
            let iss = xcache.iss();
            let (ireq, dreq) = iss.requests();
            !iss.is_done() && !ireq.valid && !dreq.valid
        })
    }

    /// Runs until every processor is done and the platform has drained.
    ///
    /// Returns the number of simulated cycles.
    #[tracing::instrument(name = "platform_run", skip(self))]
    pub fn run(&mut self, max_cycles: u64) -> Result<u64, Error> {
        let mut last_state_change: Option<(deadlock::State, u64)> = None;

        while !self.is_done() {
            if self.cycle >= max_cycles {
                return Err(Error::Timeout(max_cycles));
            }
            self.cycle()?;

            let Some(threshold) = self.config.deadlock_threshold else {
                continue;
            };
            let state = self.gather_state();
            let update_cycle = match &last_state_change {
                Some((last_state, update_cycle)) if *last_state == state && !self.computing() => {
                    *update_cycle
                }
                _ => {
                    last_state_change = Some((state, self.cycle));
                    continue;
                }
            };
            self.stats.lock().sim.idle_cycles += 1;
            if self.cycle - update_cycle >= threshold {
                return Err(Error::Deadlock {
                    cycle: self.cycle,
                    last_progress: update_cycle,
                    state: Box::new(state),
                });
            }
        }
        if let Some(log_after_cycle) = self.log_after_cycle {
            log::warn!(
                "log after {log_after_cycle} cycles but simulation ended after {} cycles",
                self.cycle
            );
        }
        log::info!("exit after {} cycles", self.cycle);
        Ok(self.cycle)
    }
}

/// Runs the same programs once per seed and collects the statistics.
///
/// Runs are independent and execute in parallel with the `parallel` feature.
pub fn run_many(
    config: &config::Config,
    programs: &[Program],
    seeds: &[u32],
    max_cycles: u64,
) -> Vec<Result<stats::Stats, Error>> {
    let run = |seed: &u32| -> Result<stats::Stats, Error> {
        let mut platform = Platform::new(config.clone(), programs.to_vec(), *seed)?;
        platform.run(max_cycles)?;
        Ok(platform.stats())
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        seeds.par_iter().map(run).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        seeds.iter().map(run).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{run_many, Platform};
    use crate::{
        config,
        iss::{Iss, TraceIss},
        lfsr::{AlwaysFail, NeverFail, ScFailure},
        testing,
        trace::{Op, Program},
        Error,
    };
    use color_eyre::eyre;
    use pretty_assertions_sorted as diff;
    use stats::mem_cache::Counter;

    const MAX_CYCLES: u64 = 50_000;

    /// Runs to completion, checking the invariants after every cycle.
    fn run_checked<I: Iss>(platform: &mut Platform<I>) -> eyre::Result<u64> {
        while !platform.is_done() {
            if platform.current_cycle() >= MAX_CYCLES {
                eyre::bail!("not done after {MAX_CYCLES} cycles");
            }
            platform.cycle()?;
            if let Err(violation) = platform.check_invariants() {
                eyre::bail!("cycle {}: {violation}", platform.current_cycle());
            }
        }
        Ok(platform.current_cycle())
    }

    fn platform(num_procs: usize, programs: Vec<Vec<Op>>) -> eyre::Result<Platform> {
        testing::init_logging();
        let config = config::Config {
            num_procs,
            ..config::Config::default()
        };
        let programs = programs.into_iter().map(Program::new).collect();
        Ok(Platform::new(config, programs, 1)?)
    }

    fn with_sc_failure(
        ops: Vec<Op>,
        sc_failure: Box<dyn ScFailure>,
    ) -> eyre::Result<Platform<TraceIss>> {
        testing::init_logging();
        let config = config::Config {
            num_procs: 1,
            ..config::Config::default()
        };
        Ok(Platform::with_processors(
            config,
            vec![TraceIss::new(0, ops)],
            sc_failure,
        )?)
    }

    #[test]
    fn test_atomic_increments_are_not_lost() -> eyre::Result<()> {
        let counter = 0x80;
        let program = Program::new([Op::AtomicIncrement { addr: counter }]).repeated(5);
        let num_procs = 4;
        let config = config::Config {
            num_procs,
            ..config::Config::default()
        };
        testing::init_logging();
        let mut platform = Platform::new(config, vec![program; num_procs], 42)?;
        run_checked(&mut platform)?;

        assert_eq!(platform.read_word(counter), 20);
        let mut increments: Vec<u32> = (0..num_procs)
            .flat_map(|id| platform.iss(id).increments.clone())
            .collect();
        increments.sort_unstable();
        diff::assert_eq!(increments, (0..20).collect::<Vec<u32>>());
        Ok(())
    }

    #[test]
    fn test_write_becomes_visible_to_sharer() -> eyre::Result<()> {
        let addr = 0x100;
        let mut platform = platform(
            2,
            vec![
                vec![
                    Op::Idle { cycles: 50 },
                    Op::Write {
                        addr,
                        value: 42,
                        be: 0xF,
                    },
                    Op::Sync,
                ],
                vec![
                    Op::Read { addr },
                    Op::Idle { cycles: 300 },
                    Op::Read { addr },
                ],
            ],
        )?;
        run_checked(&mut platform)?;

        diff::assert_eq!(platform.iss(1).reads_of(addr), vec![0, 42]);
        assert_eq!(platform.read_word(addr), 42);
        assert!(platform.stats().mem_cache.get(Counter::UPDATE) >= 1);
        Ok(())
    }

    #[test]
    fn test_counter_mode_write_invalidates_all_copies() -> eyre::Result<()> {
        let addr = 0x200;
        let reader = |delay| {
            vec![
                Op::Idle { cycles: delay },
                Op::Read { addr },
                Op::Idle { cycles: 400 },
                Op::Read { addr },
            ]
        };
        let mut programs: Vec<Vec<Op>> = (1..4).map(|id| reader(id * 40)).collect();
        programs.insert(
            0,
            vec![
                Op::Read { addr },
                Op::Idle { cycles: 200 },
                Op::Write {
                    addr,
                    value: 7,
                    be: 0xF,
                },
                Op::Sync,
            ],
        );
        let mut platform = platform(4, programs)?;
        run_checked(&mut platform)?;

        for id in 1..4 {
            diff::assert_eq!(platform.iss(id).reads_of(addr), vec![0, 7]);
        }
        assert_eq!(platform.stats().mem_cache.get(Counter::INVAL_BRDCAST), 1);
        assert_eq!(platform.read_word(addr), 7);
        Ok(())
    }

    #[test]
    fn test_store_conditional_outcomes() -> eyre::Result<()> {
        let ops = vec![
            Op::Ll { addr: 0x40 },
            Op::Sc {
                addr: 0x40,
                value: 5,
            },
        ];

        let mut platform = with_sc_failure(ops.clone(), Box::new(NeverFail))?;
        run_checked(&mut platform)?;
        diff::assert_eq!(platform.iss(0).sc_outcomes, vec![true]);
        assert_eq!(platform.read_word(0x40), 5);

        let mut platform = with_sc_failure(ops, Box::new(AlwaysFail))?;
        run_checked(&mut platform)?;
        diff::assert_eq!(platform.iss(0).sc_outcomes, vec![false]);
        assert_eq!(platform.read_word(0x40), 0);
        assert_eq!(platform.stats().mem_cache.get(Counter::SC_FAIL), 1);
        Ok(())
    }

    #[test]
    fn test_sc_without_reservation_fails() -> eyre::Result<()> {
        let ops = vec![Op::Sc {
            addr: 0x40,
            value: 5,
        }];
        let mut platform = with_sc_failure(ops, Box::new(NeverFail))?;
        run_checked(&mut platform)?;
        diff::assert_eq!(platform.iss(0).sc_outcomes, vec![false]);
        Ok(())
    }

    #[test]
    fn test_read_after_write_sees_buffered_value() -> eyre::Result<()> {
        let mut platform = platform(
            1,
            vec![vec![
                Op::Write {
                    addr: 0x304,
                    value: 9,
                    be: 0xF,
                },
                Op::Read { addr: 0x300 },
                Op::Read { addr: 0x304 },
            ]],
        )?;
        platform.write_word(0x300, 5);
        run_checked(&mut platform)?;

        diff::assert_eq!(platform.iss(0).reads_of(0x300), vec![5]);
        diff::assert_eq!(platform.iss(0).reads_of(0x304), vec![9]);
        Ok(())
    }

    #[test]
    fn test_same_seed_same_run() -> eyre::Result<()> {
        let config = config::Config::default();
        let programs = vec![Program::new([Op::AtomicIncrement { addr: 0x1000 }]).repeated(8); 4];
        let seeds = [7, 7, 11];
        let results = run_many(&config, &programs, &seeds, MAX_CYCLES)
            .into_iter()
            .collect::<Result<Vec<_>, Error>>()?;

        diff::assert_eq!(results[0], results[1]);
        assert!(results.iter().all(|stats| stats.sim.retired == 32));
        Ok(())
    }

    #[test]
    fn test_timeout() -> eyre::Result<()> {
        let mut platform = platform(1, vec![vec![Op::Read { addr: 0x40 }]])?;
        let err = platform.run(3).unwrap_err();
        assert!(matches!(err, Error::Timeout(3)));
        Ok(())
    }

    #[test]
    fn test_run_drains_everything() -> eyre::Result<()> {
        let mut platform = platform(
            2,
            vec![
                vec![Op::Fetch { addr: 0x1000 }, Op::Read { addr: 0x20 }],
                vec![Op::Write {
                    addr: 0x20,
                    value: 3,
                    be: 0xF,
                }],
            ],
        )?;
        let cycles = platform.run(MAX_CYCLES)?;
        assert!(platform.is_done());
        assert_eq!(platform.stats().sim.cycles, cycles);
        assert_eq!(platform.stats().sim.retired, 3);
        assert_eq!(platform.read_word(0x20), 3);
        Ok(())
    }
}
