//! Scripted processor programs.
//!
//! A trace lists one program per processor. Programs are plain
//! sequences of memory operations that a [`crate::iss::TraceIss`]
//! replays against its L1 cache.

use crate::{address, Error};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn full_word() -> u8 {
    0xF
}

fn once() -> usize {
    1
}

/// A single processor operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Instruction fetch
    Fetch { addr: address },
    Read { addr: address },
    Write {
        addr: address,
        value: u32,
        #[serde(default = "full_word")]
        be: u8,
    },
    Ll { addr: address },
    Sc { addr: address, value: u32 },
    /// LL/SC loop adding one to the word at `addr`
    AtomicIncrement { addr: address },
    /// Waits until all buffered writes are acknowledged
    Sync,
    /// Invalidates the line of `addr` in the data cache
    DcacheInval { addr: address },
    Idle { cycles: u64 },
}

impl Op {
    /// Address accessed by the operation, if any.
    #[must_use]
    pub fn address(&self) -> Option<address> {
        match *self {
            Self::Fetch { addr }
            | Self::Read { addr }
            | Self::Write { addr, .. }
            | Self::Ll { addr }
            | Self::Sc { addr, .. }
            | Self::AtomicIncrement { addr }
            | Self::DcacheInval { addr } => Some(addr),
            Self::Sync | Self::Idle { .. } => None,
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch { addr } => write!(f, "fetch {addr:#010x}"),
            Self::Read { addr } => write!(f, "read {addr:#010x}"),
            Self::Write { addr, value, be } => {
                write!(f, "write {value:#x} to {addr:#010x} (be={be:#06b})")
            }
            Self::Ll { addr } => write!(f, "ll {addr:#010x}"),
            Self::Sc { addr, value } => write!(f, "sc {value:#x} to {addr:#010x}"),
            Self::AtomicIncrement { addr } => write!(f, "increment {addr:#010x}"),
            Self::Sync => write!(f, "sync"),
            Self::DcacheInval { addr } => write!(f, "dcache inval {addr:#010x}"),
            Self::Idle { cycles } => write!(f, "idle {cycles}"),
        }
    }
}

/// Program of one processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub ops: Vec<Op>,
    /// Number of times the operations are replayed
    #[serde(default = "once")]
    pub repeat: usize,
}

impl Program {
    #[must_use]
    pub fn new(ops: impl IntoIterator<Item = Op>) -> Self {
        Self {
            ops: ops.into_iter().collect(),
            repeat: 1,
        }
    }

    #[must_use]
    pub fn repeated(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    /// All operations in execution order.
    #[must_use]
    pub fn unroll(&self) -> Vec<Op> {
        (0..self.repeat).flat_map(|_| self.ops.iter().cloned()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub programs: Vec<Program>,
}

impl Trace {
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a trace file, JSON if the extension says so and YAML otherwise.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = utils::fs::read_to_string(path)?;
        match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// One program per processor, idle processors get an empty one.
    pub fn into_programs(self, num_procs: usize) -> Result<Vec<Program>, Error> {
        let mut programs = self.programs;
        if programs.len() > num_procs {
            return Err(Error::InvalidConfig(format!(
                "trace has {} programs but the platform only {num_procs} processors",
                programs.len()
            )));
        }
        programs.resize_with(num_procs, Program::default);
        Ok(programs)
    }
}

#[cfg(test)]
mod tests {
    use super::{Op, Program, Trace};
    use color_eyre::eyre;
    use pretty_assertions_sorted as diff;

    #[test]
    fn test_parse_yaml() -> eyre::Result<()> {
        let yaml = r"
programs:
  - ops:
      - { op: write, addr: 0x100, value: 7 }
      - { op: read, addr: 0x100 }
      - { op: sync }
  - repeat: 3
    ops:
      - { op: atomic_increment, addr: 0x80000 }
      - { op: idle, cycles: 2 }
";
        let trace = Trace::from_yaml(yaml)?;
        diff::assert_eq!(
            trace.programs[0].ops,
            vec![
                Op::Write {
                    addr: 0x100,
                    value: 7,
                    be: 0xF
                },
                Op::Read { addr: 0x100 },
                Op::Sync,
            ]
        );
        assert_eq!(trace.programs[0].repeat, 1);
        assert_eq!(trace.programs[1].unroll().len(), 6);
        Ok(())
    }

    #[test]
    fn test_programs_are_padded_to_processors() -> eyre::Result<()> {
        let trace = Trace {
            programs: vec![Program::new([Op::Sync])],
        };
        let programs = trace.clone().into_programs(3)?;
        assert_eq!(programs.len(), 3);
        assert!(programs[2].ops.is_empty());
        assert!(trace.into_programs(0).is_err());
        Ok(())
    }
}
