//! Protocol error types

use std::time::Duration;

use thiserror::Error;

use crate::transport::{ConfigError, LinkError};

use super::types::DeviceKind;

/// Protocol errors
///
/// Every variant is recoverable: the orchestrator reports it to the caller,
/// who keeps the previous snapshot and re-issues on the next control tick.
#[derive(Error, Debug)]
pub enum Error {
    /// Transmitted checksum does not match the payload
    #[error("checksum mismatch: expected {expected:#06x}, got {found:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the received payload
        expected: u16,
        /// Checksum carried on the wire
        found: u16,
    },

    /// Bad start marker, terminator placement or frame size
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// What was wrong with the frame
        reason: &'static str,
    },

    /// No complete frame within the receive deadline
    #[error("timed out after {waited:?} with {received} bytes buffered")]
    Timeout {
        /// Time spent waiting
        waited: Duration,
        /// Bytes that had arrived (and were discarded) when the deadline hit
        received: usize,
    },

    /// Payload needs a frame form the link does not carry
    #[error("unsupported payload length: {len} bytes (max {max})")]
    UnsupportedLength {
        /// Payload size
        len: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Decoder has no rule for the opcode
    #[error("unknown {family} opcode: {opcode}")]
    UnknownOpcode {
        /// Device family whose opcode space was consulted
        family: DeviceKind,
        /// Raw opcode byte
        opcode: u8,
    },

    /// CAN fill segment would write past the staging buffer
    #[error("reassembly overflow: offset {offset} + {len} bytes exceeds buffer")]
    ReassemblyOverflow {
        /// Segment byte offset
        offset: usize,
        /// Segment length
        len: usize,
    },

    /// Payload ended before the decoder finished
    #[error("payload truncated: need {needed} bytes, got {got}")]
    Truncated {
        /// Needed size
        needed: usize,
        /// Actual size
        got: usize,
    },

    /// CAN frame does not belong to the active reassembly session
    #[error("frame rejected by reassembly session: {reason}")]
    SessionMismatch {
        /// Why the frame was rejected
        reason: &'static str,
    },

    /// Link configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Physical link failure
    #[error("link error: {0}")]
    Link(#[from] LinkError),
}

impl Error {
    /// Whether the failure came from the wire contents rather than the link
    /// itself or the local configuration.
    #[must_use]
    pub const fn is_protocol_fault(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Link(_) | Self::Timeout { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
