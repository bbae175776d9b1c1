//! vesc-link - host-side command and telemetry link to VESC-style motor controllers
//!
//! Encodes setpoints and telemetry queries, carries them over a UART or a CAN
//! bus, and decodes the replies into snapshots the host's control loop reads.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use vesc_link::transport::{LoopbackSerial, SerialLink, SerialTransport};
//! use vesc_link::{Controller, FieldMask, protocol};
//!
//! let (host, mut device) = LoopbackSerial::pair();
//! let mut controller = Controller::new(SerialTransport::new(host, Duration::from_millis(100)));
//!
//! // the controller answers a two-field selective query
//! let reply = [50, 0, 0, 0, 0x03, 0x01, 0x2C, 0x01, 0x90];
//! device.write_all(&protocol::encode(&reply)?)?;
//!
//! let mask = FieldMask::NONE.with(FieldMask::TEMP_FET).with(FieldMask::TEMP_MOTOR);
//! let telemetry = controller.get_values_selective(mask)?;
//! assert_eq!(telemetry.temp_fet, 30.0);
//! assert_eq!(telemetry.temp_motor, 40.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Features
//!
//! - **Serial framing** - short/long envelopes with CRC-16/XMODEM checksums
//! - **CAN transport** - short, fill and process packets with per-request reassembly
//! - **Selective telemetry** - bitmask-driven decoding that never tears a snapshot
//! - **Bus forwarding** - relayed throttle and battery-management queries
//! - `serde` - serialize configuration and snapshots
//! - `serial` - open host serial ports via `serialport`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod client;
pub mod protocol;
pub mod ride;
pub mod transport;

pub use client::Controller;
pub use protocol::{
    Command, Error, FieldMask, LocalProfile, MAX_PAYLOAD_SIZE, NunchuckCommand, Result,
    SubordinateDeviceSnapshot, TelemetrySnapshot,
};
pub use ride::{RideMetrics, VehicleGeometry};
pub use transport::{Link, LinkConfig, TransportKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
