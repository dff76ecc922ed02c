use crate::vci;
use console::style;
use std::collections::VecDeque;

/// A packet network between components.
///
/// Packets pushed during a cycle only become visible at their
/// destination after the next call to `transfer`.
pub trait Interconnect<P> {
    /// Whether any packet is still in the network.
    fn busy(&self) -> bool;

    /// Whether `dest` can accept another packet this cycle.
    fn has_buffer(&self, dest: usize) -> bool;

    fn push(&mut self, src: usize, dest: usize, packet: P);

    fn first(&self, dest: usize) -> Option<&P>;

    fn pop(&mut self, dest: usize) -> Option<P>;

    /// Advance the network by one cycle.
    fn transfer(&mut self);
}

/// Latency-one network with a bounded queue per destination.
///
/// Packets injected in the same cycle are delivered to a destination
/// in round-robin order over the sources.
#[derive(Debug, Clone)]
pub struct Network<P> {
    name: String,
    pub num_sources: usize,
    pub num_destinations: usize,
    capacity: usize,
    round_robin_turn: Vec<usize>,
    /// Packets pushed in the current cycle, per destination and source
    input_queue: Vec<Vec<VecDeque<P>>>,
    /// Packets visible to the destination
    output_queue: Vec<VecDeque<P>>,
}

impl<P> Network<P> {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        num_sources: usize,
        num_destinations: usize,
        capacity: usize,
    ) -> Self {
        let input_queue = (0..num_destinations)
            .map(|_| (0..num_sources).map(|_| VecDeque::new()).collect())
            .collect();
        let output_queue = (0..num_destinations).map(|_| VecDeque::new()).collect();
        Self {
            name: name.into(),
            num_sources,
            num_destinations,
            capacity,
            round_robin_turn: vec![0; num_destinations],
            input_queue,
            output_queue,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn occupancy(&self, dest: usize) -> usize {
        let in_flight: usize = self.input_queue[dest].iter().map(VecDeque::len).sum();
        in_flight + self.output_queue[dest].len()
    }

    /// All packets currently queued for `dest`.
    pub fn queued(&self, dest: usize) -> impl Iterator<Item = &P> + '_ {
        self.output_queue[dest]
            .iter()
            .chain(self.input_queue[dest].iter().flatten())
    }
}

impl<P> Interconnect<P> for Network<P>
where
    P: std::fmt::Display,
{
    fn busy(&self) -> bool {
        self.output_queue.iter().any(|queue| !queue.is_empty())
            || self
                .input_queue
                .iter()
                .flatten()
                .any(|queue| !queue.is_empty())
    }

    fn has_buffer(&self, dest: usize) -> bool {
        self.occupancy(dest) < self.capacity
    }

    fn push(&mut self, src: usize, dest: usize, packet: P) {
        assert!(
            self.has_buffer(dest),
            "{}: push to full destination {dest}",
            self.name
        );
        log::debug!(
            "{}: from {src} to {dest}",
            style(format!("{} PUSH {packet}", self.name)).bold(),
        );
        self.input_queue[dest][src].push_back(packet);
    }

    fn first(&self, dest: usize) -> Option<&P> {
        self.output_queue[dest].front()
    }

    fn pop(&mut self, dest: usize) -> Option<P> {
        let packet = self.output_queue[dest].pop_front();
        if let Some(ref packet) = packet {
            log::debug!(
                "{}: at {dest}",
                style(format!("{} POP {packet}", self.name)).bold(),
            );
        }
        packet
    }

    fn transfer(&mut self) {
        for dest in 0..self.num_destinations {
            let turn = self.round_robin_turn[dest];
            let mut delivered = false;
            for i in 0..self.num_sources {
                let src = (turn + i) % self.num_sources;
                let queue = &mut self.input_queue[dest][src];
                delivered |= !queue.is_empty();
                self.output_queue[dest].extend(queue.drain(..));
            }
            if delivered {
                self.round_robin_turn[dest] = (turn + 1) % self.num_sources;
            }
        }
    }
}

/// All networks of a platform.
///
/// The directory and the external memory are endpoint 0 of their
/// networks, L1 cache `i` is endpoint `i`.
#[derive(Debug, Clone)]
pub struct Networks {
    pub direct_cmd: Network<vci::Command>,
    pub direct_rsp: Network<vci::Response>,
    pub coherence_cmd: Network<vci::CoherenceCommand>,
    pub coherence_rsp: Network<vci::CoherenceResponse>,
    pub cleanup_cmd: Network<vci::CleanupCommand>,
    pub cleanup_rsp: Network<vci::CleanupResponse>,
    pub xram_cmd: Network<vci::XramCommand>,
    pub xram_rsp: Network<vci::XramResponse>,
}

impl Networks {
    #[must_use]
    pub fn new(num_procs: usize, capacity: usize) -> Self {
        Self {
            direct_cmd: Network::new("DIRECT_CMD", num_procs, 1, capacity),
            direct_rsp: Network::new("DIRECT_RSP", 1, num_procs, capacity),
            coherence_cmd: Network::new("COHERENCE_CMD", 1, num_procs, capacity),
            coherence_rsp: Network::new("COHERENCE_RSP", num_procs, 1, capacity),
            cleanup_cmd: Network::new("CLEANUP_CMD", num_procs, 1, capacity),
            cleanup_rsp: Network::new("CLEANUP_RSP", 1, num_procs, capacity),
            xram_cmd: Network::new("XRAM_CMD", 1, 1, capacity),
            xram_rsp: Network::new("XRAM_RSP", 1, 1, capacity),
        }
    }

    pub fn transfer(&mut self) {
        self.direct_cmd.transfer();
        self.direct_rsp.transfer();
        self.coherence_cmd.transfer();
        self.coherence_rsp.transfer();
        self.cleanup_cmd.transfer();
        self.cleanup_rsp.transfer();
        self.xram_cmd.transfer();
        self.xram_rsp.transfer();
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        self.direct_cmd.busy()
            || self.direct_rsp.busy()
            || self.coherence_cmd.busy()
            || self.coherence_rsp.busy()
            || self.cleanup_cmd.busy()
            || self.cleanup_rsp.busy()
            || self.xram_cmd.busy()
            || self.xram_rsp.busy()
    }

    /// Number of queued packets per network.
    #[must_use]
    pub fn occupancy(&self) -> Vec<(String, usize)> {
        fn total<P>(net: &Network<P>) -> (String, usize) {
            let queued = (0..net.num_destinations)
                .map(|dest| net.occupancy(dest))
                .sum();
            (net.name().to_string(), queued)
        }
        vec![
            total(&self.direct_cmd),
            total(&self.direct_rsp),
            total(&self.coherence_cmd),
            total(&self.coherence_rsp),
            total(&self.cleanup_cmd),
            total(&self.cleanup_rsp),
            total(&self.xram_cmd),
            total(&self.xram_rsp),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::{Interconnect, Network};
    use color_eyre::eyre;

    #[test]
    fn test_latency_one() -> eyre::Result<()> {
        let mut net: Network<u32> = Network::new("net", 2, 1, 4);
        net.push(0, 0, 42);
        assert!(net.busy());
        assert_eq!(net.first(0), None);
        net.transfer();
        assert_eq!(net.pop(0), Some(42));
        assert!(!net.busy());
        Ok(())
    }

    #[test]
    fn test_round_robin_over_sources() -> eyre::Result<()> {
        let mut net: Network<u32> = Network::new("net", 2, 1, 8);
        net.push(1, 0, 10);
        net.push(0, 0, 20);
        net.transfer();
        assert_eq!(net.pop(0), Some(20));
        assert_eq!(net.pop(0), Some(10));

        // source 1 goes first on the next delivery
        net.push(0, 0, 30);
        net.push(1, 0, 40);
        net.transfer();
        assert_eq!(net.pop(0), Some(40));
        assert_eq!(net.pop(0), Some(30));
        Ok(())
    }

    #[test]
    fn test_bounded_capacity() {
        let mut net: Network<u32> = Network::new("net", 1, 2, 1);
        net.push(0, 1, 1);
        assert!(!net.has_buffer(1));
        assert!(net.has_buffer(0));
        net.transfer();
        assert!(!net.has_buffer(1));
        net.pop(1);
        assert!(net.has_buffer(1));
    }
}
