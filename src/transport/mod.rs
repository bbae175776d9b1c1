//! Transport layer
//!
//! Moves whole payloads between host and controller over either a serial
//! byte link or a CAN bus.
//!
//! # Architecture
//!
//! - [`serial`]: deadline-bounded frame receiver and framed transport
//! - [`can`]: identifiers, segmentation and the CAN transport
//! - [`reassembly`]: per-request staging of multi-frame CAN replies
//! - [`link`]: the [`Link`] seam the orchestrator talks to
//! - [`loopback`]: in-memory links for tests and demos

pub mod can;
mod config;
mod error;
pub mod link;
pub mod loopback;
#[cfg(feature = "serial")]
pub mod port;
pub mod reassembly;
pub mod serial;

pub use can::{CanBus, CanFrame, CanId, CanPacketKind, CanTransport, segment};
pub use config::{CanBitrate, LinkConfig, TransportKind};
pub use error::{ConfigError, LinkError, LinkResult};
pub use link::Link;
pub use loopback::{LoopbackBus, LoopbackCanPort, LoopbackSerial};
#[cfg(feature = "serial")]
pub use port::PortLink;
pub use reassembly::{ReassemblySession, SessionToken};
pub use serial::{SerialLink, SerialReceiver, SerialTransport};
