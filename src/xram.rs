use crate::{
    address, config,
    interconn::{Interconnect, Network},
    vci,
};
use console::style;
use std::collections::{HashMap, VecDeque};

/// External memory behind the directory.
///
/// Lines are stored sparsely and read as zero until written.
/// Every command is answered after a fixed latency, one command is
/// accepted per cycle.
#[derive(Debug, Clone)]
pub struct Xram {
    name: String,
    latency: u64,
    words: usize,
    size: u64,
    lines: HashMap<u64, vci::Words>,
    /// Responses with the cycle they become ready
    latency_queue: VecDeque<(u64, vci::XramResponse)>,
}

impl Xram {
    #[must_use]
    pub fn new(config: &config::Xram, words: usize) -> Self {
        Self {
            name: "xram".to_string(),
            latency: config.latency,
            words,
            size: config.size,
            lines: HashMap::new(),
            latency_queue: VecDeque::new(),
        }
    }

    fn line_bytes(&self) -> u64 {
        self.words as u64 * 4
    }

    fn contains_line(&self, nline: u64) -> bool {
        (nline + 1) * self.line_bytes() <= self.size
    }

    fn split(&self, addr: address) -> (u64, usize) {
        let nline = addr / self.line_bytes();
        let word = (addr % self.line_bytes()) / 4;
        (nline, word as usize)
    }

    #[must_use]
    pub fn read_word(&self, addr: address) -> u32 {
        let (nline, word) = self.split(addr);
        self.lines.get(&nline).map_or(0, |line| line[word])
    }

    /// Initializes memory contents before the simulation starts.
    pub fn write_word(&mut self, addr: address, value: u32) {
        let (nline, word) = self.split(addr);
        let words = self.words;
        let line = self
            .lines
            .entry(nline)
            .or_insert_with(|| smallvec::smallvec![0; words]);
        line[word] = value;
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.latency_queue.is_empty()
    }

    fn access(&mut self, cmd: vci::XramCommand) -> vci::XramResponse {
        if !self.contains_line(cmd.nline) {
            log::warn!(
                "{}: line {:#x} beyond memory size {}",
                self.name,
                cmd.nline,
                self.size
            );
            return vci::XramResponse {
                trdid: cmd.trdid,
                write: matches!(cmd.kind, vci::XramCommandKind::WRITE { .. }),
                data: smallvec::smallvec![0],
                error: true,
            };
        }
        match cmd.kind {
            vci::XramCommandKind::READ => vci::XramResponse {
                trdid: cmd.trdid,
                write: false,
                data: self
                    .lines
                    .get(&cmd.nline)
                    .cloned()
                    .unwrap_or_else(|| smallvec::smallvec![0; self.words]),
                error: false,
            },
            vci::XramCommandKind::WRITE { data } => {
                debug_assert_eq!(data.len(), self.words);
                self.lines.insert(cmd.nline, data);
                vci::XramResponse {
                    trdid: cmd.trdid,
                    write: true,
                    data: smallvec::smallvec![0],
                    error: false,
                }
            }
        }
    }

    #[tracing::instrument(name = "xram_cycle", skip_all)]
    pub fn cycle(
        &mut self,
        cycle: u64,
        cmd: &mut Network<vci::XramCommand>,
        rsp: &mut Network<vci::XramResponse>,
    ) {
        match self.latency_queue.front() {
            Some((ready_cycle, _)) if cycle >= *ready_cycle && rsp.has_buffer(0) => {
                if let Some((_, response)) = self.latency_queue.pop_front() {
                    rsp.push(0, 0, response);
                }
            }
            _ => {}
        }

        // one command per cycle
        if let Some(command) = cmd.pop(0) {
            log::debug!("{}: {}", self.name, style(&command).cyan());
            let response = self.access(command);
            self.latency_queue
                .push_back((cycle + self.latency, response));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Xram;
    use crate::{
        config,
        interconn::{Interconnect, Network},
        vci,
    };
    use color_eyre::eyre;

    fn xram() -> Xram {
        let config = config::Xram {
            latency: 2,
            size: 1024,
        };
        Xram::new(&config, 8)
    }

    #[test]
    fn test_read_after_latency() -> eyre::Result<()> {
        let mut mem = xram();
        mem.write_word(0x24, 7);
        let mut cmd = Network::new("cmd", 1, 1, 4);
        let mut rsp = Network::new("rsp", 1, 1, 4);
        cmd.push(
            0,
            0,
            vci::XramCommand {
                trdid: 3,
                nline: 1,
                kind: vci::XramCommandKind::READ,
            },
        );
        cmd.transfer();

        let mut received = None;
        for cycle in 0..10 {
            mem.cycle(cycle, &mut cmd, &mut rsp);
            rsp.transfer();
            if let Some(response) = rsp.pop(0) {
                received = Some((cycle, response));
                break;
            }
        }
        let (cycle, response) = received.expect("response");
        assert_eq!(cycle, 2);
        assert_eq!(response.trdid, 3);
        assert!(!response.write);
        assert_eq!(response.data.len(), 8);
        assert_eq!(response.data[1], 7);
        assert!(mem.is_idle());
        Ok(())
    }

    #[test]
    fn test_out_of_range_line_is_a_bus_error() {
        let mut mem = xram();
        let response = mem.access(vci::XramCommand {
            trdid: 0,
            nline: 32,
            kind: vci::XramCommandKind::READ,
        });
        assert!(response.error);
        let response = mem.access(vci::XramCommand {
            trdid: 0,
            nline: 31,
            kind: vci::XramCommandKind::READ,
        });
        assert!(!response.error);
    }

    #[test]
    fn test_write_then_read_word() {
        let mut mem = xram();
        let data = (0..8).collect();
        let response = mem.access(vci::XramCommand {
            trdid: 1,
            nline: 2,
            kind: vci::XramCommandKind::WRITE { data },
        });
        assert!(response.write);
        assert_eq!(mem.read_word(2 * 32 + 12), 3);
        assert_eq!(mem.read_word(0), 0);
    }
}
