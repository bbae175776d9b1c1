//! Outgoing commands and their payload encoding

use bytes::{BufMut, Bytes, BytesMut};

use super::scalar::{put_f32_auto, put_scaled_i32};
use super::{BmsOpcode, DeviceKind, FieldMask, Opcode};

/// Current setpoints travel in milliamps.
const CURRENT_SCALE: f64 = 1_000.0;

/// Duty setpoints travel in units of 1e-5.
const DUTY_SCALE: f64 = 100_000.0;

/// Accelerometer bytes trailing a joystick push; unused by the controller.
const CHUCK_RESERVED_LEN: usize = 6;

/// Paired-joystick state pushed every control cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NunchuckCommand {
    /// Horizontal axis (127 = centre)
    pub x: u8,
    /// Vertical axis, drives throttle and brake (127 = centre)
    pub y: u8,
    /// Lower (Z) button
    pub lower_button: bool,
    /// Upper (C) button
    pub upper_button: bool,
}

impl NunchuckCommand {
    /// Axis centre value
    pub const CENTER: u8 = 127;

    /// Centered stick with the given vertical axis
    #[must_use]
    pub const fn throttle(y: u8) -> Self {
        Self {
            x: Self::CENTER,
            y,
            lower_button: false,
            upper_button: false,
        }
    }
}

impl Default for NunchuckCommand {
    fn default() -> Self {
        Self::throttle(Self::CENTER)
    }
}

/// Temporary motor profile; not persisted unless `store` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalProfile {
    /// Persist in controller flash
    pub store: bool,
    /// Forward to the other controllers on the bus
    pub forward_can: bool,
    /// Ask for an acknowledgement
    pub ack: bool,
    /// Split the watt limits across controllers
    pub divide_by_controllers: bool,
    /// Multiplier on the configured minimum current
    pub current_min_rel: f32,
    /// Multiplier on the configured maximum current
    pub current_max_rel: f32,
    /// Reverse speed limit in m/s (negative)
    pub speed_max_reverse: f32,
    /// Forward speed limit in m/s
    pub speed_max: f32,
    /// Minimum duty cycle
    pub duty_min: f32,
    /// Maximum duty cycle
    pub duty_max: f32,
    /// Minimum (regen) power in watts
    pub watt_min: f32,
    /// Maximum power in watts
    pub watt_max: f32,
}

impl Default for LocalProfile {
    fn default() -> Self {
        Self {
            store: false,
            forward_can: true,
            ack: false,
            divide_by_controllers: false,
            current_min_rel: 1.0,
            current_max_rel: 1.0,
            speed_max_reverse: -15.0,
            speed_max: 15.0,
            duty_min: 0.005,
            duty_max: 1.0,
            watt_min: -1_500_000.0,
            watt_max: 1_500_000.0,
        }
    }
}

/// A request or setpoint for the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Firmware version query
    FwVersion,
    /// Full telemetry query (implicit all-ones mask)
    GetValues,
    /// Telemetry query for the fields in the mask
    GetValuesSelective(FieldMask),
    /// Setup telemetry query for the fields in the mask
    GetValuesSetupSelective(FieldMask),
    /// Decoded PPM throttle query
    GetDecodedPpm,
    /// Decoded joystick throttle query
    GetDecodedChuk,
    /// Push joystick state
    SetChuckData(NunchuckCommand),
    /// Motor current in amps
    SetCurrent(f32),
    /// Brake current in amps
    SetCurrentBrake(f32),
    /// Electrical RPM
    SetRpm(i32),
    /// Duty cycle, -1.0..=1.0
    SetDuty(f32),
    /// Temporary profile push
    SetProfile(LocalProfile),
    /// Battery-management query; only meaningful inside [`Command::Forward`]
    Bms(BmsOpcode),
    /// Relay `inner` to node `target` on the CAN bus
    Forward {
        /// Destination node id
        target: u8,
        /// Relayed command
        inner: Box<Command>,
    },
}

impl Command {
    /// Wrap a command for relay to another bus node
    #[must_use]
    pub fn forward(target: u8, inner: Command) -> Self {
        Self::Forward {
            target,
            inner: Box::new(inner),
        }
    }

    /// Leading opcode byte on the wire
    #[must_use]
    pub fn opcode_byte(&self) -> u8 {
        match self {
            Self::FwVersion => Opcode::FwVersion.as_u8(),
            Self::GetValues => Opcode::GetValues.as_u8(),
            Self::GetValuesSelective(_) => Opcode::GetValuesSelective.as_u8(),
            Self::GetValuesSetupSelective(_) => Opcode::GetValuesSetupSelective.as_u8(),
            Self::GetDecodedPpm => Opcode::GetDecodedPpm.as_u8(),
            Self::GetDecodedChuk => Opcode::GetDecodedChuk.as_u8(),
            Self::SetChuckData(_) => Opcode::SetChuckData.as_u8(),
            Self::SetCurrent(_) => Opcode::SetCurrent.as_u8(),
            Self::SetCurrentBrake(_) => Opcode::SetCurrentBrake.as_u8(),
            Self::SetRpm(_) => Opcode::SetRpm.as_u8(),
            Self::SetDuty(_) => Opcode::SetDuty.as_u8(),
            Self::SetProfile(_) => Opcode::SetMcconfTempSetup.as_u8(),
            Self::Bms(opcode) => opcode.as_u8(),
            Self::Forward { .. } => Opcode::ForwardCan.as_u8(),
        }
    }

    /// Device family expected to answer, or `None` for fire-and-forget commands
    #[must_use]
    pub fn reply_family(&self) -> Option<DeviceKind> {
        match self {
            Self::Forward { inner, .. } => inner.reply_family(),
            Self::Bms(_) => Some(DeviceKind::BatteryManagement),
            other => Opcode::from_u8(other.opcode_byte())
                .filter(|opcode| opcode.expects_reply())
                .map(|_| DeviceKind::MotorController),
        }
    }

    /// Encode to an opcode-tagged payload
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out.freeze()
    }

    /// Append the encoded payload to `out`
    pub fn encode_into(&self, out: &mut BytesMut) {
        out.put_u8(self.opcode_byte());

        match self {
            Self::FwVersion
            | Self::GetValues
            | Self::GetDecodedPpm
            | Self::GetDecodedChuk
            | Self::Bms(_) => {}
            Self::GetValuesSelective(mask) | Self::GetValuesSetupSelective(mask) => {
                out.put_u32(mask.bits());
            }
            Self::SetChuckData(chuck) => {
                out.put_u8(chuck.x);
                out.put_u8(chuck.y);
                out.put_u8(u8::from(chuck.lower_button));
                out.put_u8(u8::from(chuck.upper_button));
                out.put_bytes(0, CHUCK_RESERVED_LEN);
            }
            Self::SetCurrent(amps) | Self::SetCurrentBrake(amps) => {
                put_scaled_i32(out, *amps, CURRENT_SCALE);
            }
            Self::SetRpm(rpm) => out.put_i32(*rpm),
            Self::SetDuty(duty) => put_scaled_i32(out, *duty, DUTY_SCALE),
            Self::SetProfile(profile) => {
                out.put_u8(u8::from(profile.store));
                out.put_u8(u8::from(profile.forward_can));
                out.put_u8(u8::from(profile.ack));
                out.put_u8(u8::from(profile.divide_by_controllers));
                for value in [
                    profile.current_min_rel,
                    profile.current_max_rel,
                    profile.speed_max_reverse,
                    profile.speed_max,
                    profile.duty_min,
                    profile.duty_max,
                    profile.watt_min,
                    profile.watt_max,
                ] {
                    put_f32_auto(out, value);
                }
            }
            Self::Forward { target, inner } => {
                out.put_u8(*target);
                inner.encode_into(out);
            }
        }
    }

    /// Size of the encoded payload in bytes
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::FwVersion
            | Self::GetValues
            | Self::GetDecodedPpm
            | Self::GetDecodedChuk
            | Self::Bms(_) => 0,
            Self::GetValuesSelective(_)
            | Self::GetValuesSetupSelective(_)
            | Self::SetCurrent(_)
            | Self::SetCurrentBrake(_)
            | Self::SetRpm(_)
            | Self::SetDuty(_) => 4,
            Self::SetChuckData(_) => 4 + CHUCK_RESERVED_LEN,
            Self::SetProfile(_) => 4 + 8 * 4,
            Self::Forward { inner, .. } => 1 + inner.encoded_len(),
        }
    }
}
