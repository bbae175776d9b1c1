//! Reply decoding for both device families.
//!
//! Decoding is two-phase: a [`DeviceFamily`] turns a reply payload into an
//! [`Update`] without touching any state, and only a fully decoded update is
//! applied to a snapshot. A truncated or unknown reply therefore never leaves
//! a snapshot half-written.

use super::scalar::PayloadReader;
use super::{BmsOpcode, DeviceKind, Error, FieldMask, Opcode, Result};

/// Byte offset of the operational-state byte in a pack values reply,
/// counted after the opcode.
pub const BMS_STATE_OFFSET: usize = 45;

/// Most cell readings a cell report carries
pub const MAX_CELLS: usize = 12;

/// Controller firmware version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
}

/// Latest scaled telemetry from the motor controller
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetrySnapshot {
    /// MOSFET temperature, °C
    pub temp_fet: f32,
    /// Motor temperature, °C
    pub temp_motor: f32,
    /// Average motor current, A
    pub avg_motor_current: f32,
    /// Average input current, A
    pub avg_input_current: f32,
    /// Average d-axis current, A
    pub avg_id: f32,
    /// Average q-axis current, A
    pub avg_iq: f32,
    /// Duty cycle, -1.0..=1.0
    pub duty_cycle: f32,
    /// Electrical RPM
    pub rpm: i32,
    /// Input voltage, V
    pub input_voltage: f32,
    /// Consumed charge, Ah
    pub amp_hours: f32,
    /// Regenerated charge, Ah
    pub amp_hours_charged: f32,
    /// Consumed energy, Wh
    pub watt_hours: f32,
    /// Regenerated energy, Wh
    pub watt_hours_charged: f32,
    /// Tachometer counts
    pub tachometer: i32,
    /// Absolute tachometer counts
    pub tachometer_abs: i32,
    /// Fault code
    pub fault: u8,
    /// Decoded throttle fraction (PPM or joystick)
    pub throttle: f32,
    /// Firmware version, once queried
    pub firmware: Option<FirmwareVersion>,
}

/// One decoded value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// MOSFET temperature
    TempFet(f32),
    /// Motor temperature
    TempMotor(f32),
    /// Average motor current
    AvgMotorCurrent(f32),
    /// Average input current
    AvgInputCurrent(f32),
    /// Average d-axis current
    AvgId(f32),
    /// Average q-axis current
    AvgIq(f32),
    /// Duty cycle
    DutyCycle(f32),
    /// Electrical RPM
    Rpm(i32),
    /// Input voltage
    InputVoltage(f32),
    /// Consumed charge
    AmpHours(f32),
    /// Regenerated charge
    AmpHoursCharged(f32),
    /// Consumed energy
    WattHours(f32),
    /// Regenerated energy
    WattHoursCharged(f32),
    /// Tachometer
    Tachometer(i32),
    /// Absolute tachometer
    TachometerAbs(i32),
    /// Fault code
    Fault(u8),
    /// Decoded throttle fraction
    Throttle(f32),
    /// Firmware version
    Firmware(FirmwareVersion),
}

impl TelemetrySnapshot {
    /// Write one reading
    pub fn apply_reading(&mut self, reading: Reading) {
        match reading {
            Reading::TempFet(v) => self.temp_fet = v,
            Reading::TempMotor(v) => self.temp_motor = v,
            Reading::AvgMotorCurrent(v) => self.avg_motor_current = v,
            Reading::AvgInputCurrent(v) => self.avg_input_current = v,
            Reading::AvgId(v) => self.avg_id = v,
            Reading::AvgIq(v) => self.avg_iq = v,
            Reading::DutyCycle(v) => self.duty_cycle = v,
            Reading::Rpm(v) => self.rpm = v,
            Reading::InputVoltage(v) => self.input_voltage = v,
            Reading::AmpHours(v) => self.amp_hours = v,
            Reading::AmpHoursCharged(v) => self.amp_hours_charged = v,
            Reading::WattHours(v) => self.watt_hours = v,
            Reading::WattHoursCharged(v) => self.watt_hours_charged = v,
            Reading::Tachometer(v) => self.tachometer = v,
            Reading::TachometerAbs(v) => self.tachometer_abs = v,
            Reading::Fault(v) => self.fault = v,
            Reading::Throttle(v) => self.throttle = v,
            Reading::Firmware(v) => self.firmware = Some(v),
        }
    }

    /// Write every reading of a decoded update
    pub fn apply(&mut self, update: &TelemetryUpdate) {
        for reading in &update.readings {
            self.apply_reading(*reading);
        }
    }
}

/// Readings decoded from one motor-controller reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryUpdate {
    /// Decoded values, in wire order
    pub readings: Vec<Reading>,
}

/// State of a bus-attached battery-management unit
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubordinateDeviceSnapshot {
    /// Operational state byte
    pub operational_state: u8,
    /// Cell count reported by the unit
    pub cell_count: u8,
    /// Cell voltages in volts, at most [`MAX_CELLS`]
    pub cell_voltages: Vec<f32>,
}

/// Values decoded from one battery-management reply
#[derive(Debug, Clone, PartialEq)]
pub enum SubordinateUpdate {
    /// Pack values reply; only the operational state is kept
    OperationalState(u8),
    /// Cell voltage report
    Cells {
        /// Cell count as reported
        count: u8,
        /// Decoded voltages, at most [`MAX_CELLS`]
        voltages: Vec<f32>,
    },
}

impl SubordinateDeviceSnapshot {
    /// Write a decoded update
    pub fn apply(&mut self, update: &SubordinateUpdate) {
        match update {
            SubordinateUpdate::OperationalState(state) => self.operational_state = *state,
            SubordinateUpdate::Cells { count, voltages } => {
                self.cell_count = *count;
                self.cell_voltages.clone_from(voltages);
            }
        }
    }
}

/// Outcome of decoding a reply payload
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Motor-controller telemetry
    Telemetry(TelemetryUpdate),
    /// Battery-management values
    Subordinate(SubordinateUpdate),
}

/// Reply decoder for one opcode space
pub trait DeviceFamily {
    /// Opcode space this decoder understands
    fn kind(&self) -> DeviceKind;

    /// Decode an opcode-tagged reply payload without side effects
    fn decode(&self, payload: &[u8]) -> Result<Update>;
}

/// Decoder for the primary motor controller
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorControllerFamily;

/// Decoder for battery-management units reached by forwarding
#[derive(Debug, Clone, Copy, Default)]
pub struct BatteryManagementFamily;

/// Decoder for the given family
#[must_use]
pub fn family(kind: DeviceKind) -> &'static dyn DeviceFamily {
    match kind {
        DeviceKind::MotorController => &MotorControllerFamily,
        DeviceKind::BatteryManagement => &BatteryManagementFamily,
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    TempFet,
    TempMotor,
    AvgMotorCurrent,
    AvgInputCurrent,
    AvgId,
    AvgIq,
    DutyCycle,
    Rpm,
    InputVoltage,
    AmpHours,
    AmpHoursCharged,
    WattHours,
    WattHoursCharged,
    Tachometer,
    TachometerAbs,
    Fault,
}

impl Field {
    fn read(self, reader: &mut PayloadReader<'_>) -> Result<Reading> {
        Ok(match self {
            Self::TempFet => Reading::TempFet(reader.scaled_i16(10.0)?),
            Self::TempMotor => Reading::TempMotor(reader.scaled_i16(10.0)?),
            Self::AvgMotorCurrent => Reading::AvgMotorCurrent(reader.scaled_i32(100.0)?),
            Self::AvgInputCurrent => Reading::AvgInputCurrent(reader.scaled_i32(100.0)?),
            Self::AvgId => Reading::AvgId(reader.scaled_i32(100.0)?),
            Self::AvgIq => Reading::AvgIq(reader.scaled_i32(100.0)?),
            Self::DutyCycle => Reading::DutyCycle(reader.scaled_i16(1000.0)?),
            Self::Rpm => Reading::Rpm(reader.i32()?),
            Self::InputVoltage => Reading::InputVoltage(reader.scaled_i16(10.0)?),
            Self::AmpHours => Reading::AmpHours(reader.scaled_i32(10_000.0)?),
            Self::AmpHoursCharged => Reading::AmpHoursCharged(reader.scaled_i32(10_000.0)?),
            Self::WattHours => Reading::WattHours(reader.scaled_i32(10_000.0)?),
            Self::WattHoursCharged => Reading::WattHoursCharged(reader.scaled_i32(10_000.0)?),
            Self::Tachometer => Reading::Tachometer(reader.i32()?),
            Self::TachometerAbs => Reading::TachometerAbs(reader.i32()?),
            Self::Fault => Reading::Fault(reader.u8()?),
        })
    }
}

/// Field order of the values reply; bit `i` selects entry `i`.
const VALUES_LAYOUT: [Option<Field>; 16] = [
    Some(Field::TempFet),
    Some(Field::TempMotor),
    Some(Field::AvgMotorCurrent),
    Some(Field::AvgInputCurrent),
    Some(Field::AvgId),
    Some(Field::AvgIq),
    Some(Field::DutyCycle),
    Some(Field::Rpm),
    Some(Field::InputVoltage),
    Some(Field::AmpHours),
    Some(Field::AmpHoursCharged),
    Some(Field::WattHours),
    Some(Field::WattHoursCharged),
    Some(Field::Tachometer),
    Some(Field::TachometerAbs),
    Some(Field::Fault),
];

/// Field order of the setup values reply. `None` entries (speed, battery
/// level, distance, absolute distance, PID position) are reserved: a set bit
/// there consumes no payload and changes nothing.
const SETUP_LAYOUT: [Option<Field>; 17] = [
    Some(Field::TempFet),
    Some(Field::TempMotor),
    Some(Field::AvgMotorCurrent),
    Some(Field::AvgInputCurrent),
    Some(Field::DutyCycle),
    Some(Field::Rpm),
    None,
    Some(Field::InputVoltage),
    None,
    Some(Field::AmpHours),
    Some(Field::AmpHoursCharged),
    Some(Field::WattHours),
    Some(Field::WattHoursCharged),
    None,
    None,
    None,
    Some(Field::Fault),
];

fn decode_masked(
    reader: &mut PayloadReader<'_>,
    mask: FieldMask,
    layout: &[Option<Field>],
) -> Result<TelemetryUpdate> {
    let mut readings = Vec::with_capacity(mask.count().min(17) as usize);
    for (bit, field) in (0u32..).zip(layout) {
        if !mask.has_bit(bit) {
            continue;
        }
        if let Some(field) = field {
            readings.push(field.read(reader)?);
        }
    }
    Ok(TelemetryUpdate { readings })
}

fn split_opcode(payload: &[u8]) -> Result<(u8, PayloadReader<'_>)> {
    match payload.split_first() {
        Some((&opcode, rest)) => Ok((opcode, PayloadReader::new(rest))),
        None => Err(Error::Truncated { needed: 1, got: 0 }),
    }
}

impl DeviceFamily for MotorControllerFamily {
    fn kind(&self) -> DeviceKind {
        DeviceKind::MotorController
    }

    fn decode(&self, payload: &[u8]) -> Result<Update> {
        let (byte, mut reader) = split_opcode(payload)?;
        let opcode = Opcode::from_u8(byte).ok_or(Error::UnknownOpcode {
            family: self.kind(),
            opcode: byte,
        })?;

        let update = match opcode {
            Opcode::FwVersion => {
                let major = reader.u8()?;
                let minor = reader.u8()?;
                TelemetryUpdate {
                    readings: vec![Reading::Firmware(FirmwareVersion { major, minor })],
                }
            }
            Opcode::GetValues => decode_masked(&mut reader, FieldMask::ALL, &VALUES_LAYOUT)?,
            Opcode::GetValuesSelective => {
                let mask = FieldMask::from_bits(reader.u32()?);
                decode_masked(&mut reader, mask, &VALUES_LAYOUT)?
            }
            Opcode::GetValuesSetupSelective => {
                let mask = FieldMask::from_bits(reader.u32()?);
                decode_masked(&mut reader, mask, &SETUP_LAYOUT)?
            }
            Opcode::GetDecodedPpm | Opcode::GetDecodedChuk => TelemetryUpdate {
                readings: vec![Reading::Throttle(reader.scaled_i32(10_000.0)?)],
            },
            Opcode::SetDuty
            | Opcode::SetCurrent
            | Opcode::SetCurrentBrake
            | Opcode::SetRpm
            | Opcode::ForwardCan
            | Opcode::SetChuckData
            | Opcode::SetMcconfTempSetup => {
                return Err(Error::UnknownOpcode {
                    family: self.kind(),
                    opcode: byte,
                });
            }
        };

        Ok(Update::Telemetry(update))
    }
}

impl DeviceFamily for BatteryManagementFamily {
    fn kind(&self) -> DeviceKind {
        DeviceKind::BatteryManagement
    }

    fn decode(&self, payload: &[u8]) -> Result<Update> {
        let (byte, mut reader) = split_opcode(payload)?;
        let opcode = BmsOpcode::from_u8(byte).ok_or(Error::UnknownOpcode {
            family: self.kind(),
            opcode: byte,
        })?;

        let update = match opcode {
            BmsOpcode::GetValues => {
                reader.skip(BMS_STATE_OFFSET)?;
                SubordinateUpdate::OperationalState(reader.u8()?)
            }
            BmsOpcode::GetCells => {
                let count = reader.u8()?;
                let voltages = (0..usize::from(count).min(MAX_CELLS))
                    .map(|_| reader.scaled_i16(1000.0))
                    .collect::<Result<Vec<_>>>()?;
                SubordinateUpdate::Cells { count, voltages }
            }
        };

        Ok(Update::Subordinate(update))
    }
}
