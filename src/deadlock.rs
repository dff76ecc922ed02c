use crate::{iss::Iss, platform::Platform};
use itertools::Itertools;

/// Snapshot of everything that changes when the platform makes progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    /// FSM states of every L1 cache
    pub l1: Vec<Vec<String>>,
    pub write_buffers: Vec<String>,
    pub mem_cache: Vec<String>,
    /// Queued packets per network
    pub networks: Vec<(String, usize)>,
    pub xram_busy: bool,
    /// Retired operations per processor
    pub retired: Vec<u64>,
}

impl State {
    #[must_use]
    pub fn new(num_procs: usize) -> Self {
        Self {
            l1: vec![vec![]; num_procs],
            write_buffers: vec![String::new(); num_procs],
            mem_cache: vec![],
            networks: vec![],
            xram_busy: false,
            retired: vec![0; num_procs],
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (id, (states, wbuf)) in self.l1.iter().zip(&self.write_buffers).enumerate() {
            writeln!(
                f,
                "xcache{id}: {} wbuf={wbuf} retired={}",
                states.join(" "),
                self.retired[id]
            )?;
        }
        writeln!(f, "mem_cache: {}", self.mem_cache.join(" "))?;
        let queued = self
            .networks
            .iter()
            .filter(|(_, queued)| *queued > 0)
            .map(|(name, queued)| format!("{name}={queued}"))
            .join(", ");
        write!(f, "networks: [{queued}] xram busy={}", self.xram_busy)
    }
}

impl<I> Platform<I>
where
    I: Iss,
{
    #[must_use]
    pub fn gather_state(&self) -> State {
        let mut state = State::new(self.xcaches.len());
        for (id, xcache) in self.xcaches.iter().enumerate() {
            state.l1[id] = xcache.registers().states();
            state.write_buffers[id] = xcache.write_buffer().to_string();
            state.retired[id] = xcache.iss().retired();
        }
        state.mem_cache = self.mem_cache.registers().states();
        state.networks = self.net.occupancy();
        state.xram_busy = !self.xram.is_idle();
        state
    }
}
