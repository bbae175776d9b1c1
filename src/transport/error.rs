//! Link- and configuration-level error types.

use core::fmt;
use std::io;

/// Failure of the physical link underneath the protocol.
#[derive(Debug)]
pub enum LinkError {
    /// Underlying I/O failure (port, socket, driver).
    Io(io::Error),
    /// The peer side of the link has gone away.
    Closed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "i/o error: {err}"),
            Self::Closed => write!(f, "link closed"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Closed => None,
        }
    }
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Rejected link configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// CAN bit rate outside the supported set.
    UnsupportedBitrate(u32),
    /// Host and controller share a CAN node id.
    AddressClash(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedBitrate(rate) => write!(f, "unsupported CAN bit rate: {rate} bit/s"),
            Self::AddressClash(id) => {
                write!(f, "own node id {id} equals the controller node id")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Result of a raw link operation
pub type LinkResult<T> = std::result::Result<T, LinkError>;
