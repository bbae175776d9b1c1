//! Protocol core
//!
//! Wire formats, opcode spaces, command encoding and reply decoding shared by
//! the serial and CAN transports.

mod checksum;
mod command;
mod error;
pub mod frame;
pub(crate) mod metrics;
pub mod scalar;
pub mod telemetry;
mod types;

pub use checksum::checksum;
pub use command::{Command, LocalProfile, NunchuckCommand};
pub use error::{Error, Result};
pub use frame::{Frame, FrameForm, decode, encode};
pub use metrics::{MetricsSnapshot, snapshot as metrics_snapshot};
pub use telemetry::{
    BatteryManagementFamily, DeviceFamily, FirmwareVersion, MotorControllerFamily, Reading,
    SubordinateDeviceSnapshot, SubordinateUpdate, TelemetrySnapshot, TelemetryUpdate, Update,
};
pub use types::{BmsOpcode, DeviceKind, FieldMask, Opcode};

/// Largest payload either transport carries (serial long form, CAN staging buffer)
pub const MAX_PAYLOAD_SIZE: usize = 256;
