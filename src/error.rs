use crate::{address, deadlock};

/// Fatal simulation and configuration errors.
///
/// Transient resource exhaustion never surfaces here: the affected
/// state machine simply stalls until capacity frees up.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("segment {first:?} overlaps segment {second:?}")]
    OverlappingSegments { first: String, second: String },

    #[error("{component}: address {address:#010x} is not mapped to any segment")]
    OutOfSegment {
        component: String,
        address: address,
    },

    #[error("{component}: illegal command {command}")]
    IllegalCommand { component: String, command: String },

    #[error("{component}: malformed packet: {reason}")]
    MalformedPacket { component: String, reason: String },

    #[error("{component}: broken invariant: {reason}")]
    Invariant { component: String, reason: String },

    #[error("deadlock: no progress since cycle {last_progress} (now at cycle {cycle})")]
    Deadlock {
        cycle: u64,
        last_progress: u64,
        state: Box<deadlock::State>,
    },

    #[error("simulation did not finish within {0} cycles")]
    Timeout(u64),

    #[error(transparent)]
    Io(#[from] utils::fs::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            component: component.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn illegal(component: impl Into<String>, command: impl std::fmt::Display) -> Self {
        Self::IllegalCommand {
            component: component.into(),
            command: command.to_string(),
        }
    }

    pub(crate) fn invariant(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invariant {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a protocol violation detected by a component.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::OutOfSegment { .. } | Self::IllegalCommand { .. } | Self::MalformedPacket { .. }
        )
    }
}
