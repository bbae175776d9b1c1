//! Opcode spaces, device families and telemetry field masks

use std::fmt;

/// Opcodes understood by the primary motor controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Firmware version query
    FwVersion = 0,
    /// Full telemetry query
    GetValues = 4,
    /// Duty cycle setpoint
    SetDuty = 5,
    /// Motor current setpoint
    SetCurrent = 6,
    /// Brake current setpoint
    SetCurrentBrake = 7,
    /// Electrical RPM setpoint
    SetRpm = 8,
    /// Decoded PPM throttle query
    GetDecodedPpm = 31,
    /// Decoded paired-joystick (nunchuck) throttle query
    GetDecodedChuk = 33,
    /// Relay the inner command to another node on the CAN bus
    ForwardCan = 34,
    /// Push joystick state
    SetChuckData = 35,
    /// Temporary motor profile with speed limits
    SetMcconfTempSetup = 49,
    /// Mask-selected telemetry query
    GetValuesSelective = 50,
    /// Mask-selected setup telemetry query
    GetValuesSetupSelective = 51,
}

impl Opcode {
    /// Convert from byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::FwVersion),
            4 => Some(Self::GetValues),
            5 => Some(Self::SetDuty),
            6 => Some(Self::SetCurrent),
            7 => Some(Self::SetCurrentBrake),
            8 => Some(Self::SetRpm),
            31 => Some(Self::GetDecodedPpm),
            33 => Some(Self::GetDecodedChuk),
            34 => Some(Self::ForwardCan),
            35 => Some(Self::SetChuckData),
            49 => Some(Self::SetMcconfTempSetup),
            50 => Some(Self::GetValuesSelective),
            51 => Some(Self::GetValuesSetupSelective),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the controller answers this opcode
    #[must_use]
    pub const fn expects_reply(self) -> bool {
        matches!(
            self,
            Self::FwVersion
                | Self::GetValues
                | Self::GetDecodedPpm
                | Self::GetDecodedChuk
                | Self::GetValuesSelective
                | Self::GetValuesSetupSelective
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FwVersion => "FwVersion",
            Self::GetValues => "GetValues",
            Self::SetDuty => "SetDuty",
            Self::SetCurrent => "SetCurrent",
            Self::SetCurrentBrake => "SetCurrentBrake",
            Self::SetRpm => "SetRpm",
            Self::GetDecodedPpm => "GetDecodedPpm",
            Self::GetDecodedChuk => "GetDecodedChuk",
            Self::ForwardCan => "ForwardCan",
            Self::SetChuckData => "SetChuckData",
            Self::SetMcconfTempSetup => "SetMcconfTempSetup",
            Self::GetValuesSelective => "GetValuesSelective",
            Self::GetValuesSetupSelective => "GetValuesSetupSelective",
        };
        write!(f, "{name}")
    }
}

/// Opcodes of the subordinate battery-management family.
///
/// Numbered independently of [`Opcode`]; the same byte means different
/// things depending on which device answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BmsOpcode {
    /// Pack values query
    GetValues = 4,
    /// Cell voltage report query
    GetCells = 51,
}

impl BmsOpcode {
    /// Convert from byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            4 => Some(Self::GetValues),
            51 => Some(Self::GetCells),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Which opcode space a payload belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// Primary motor controller
    MotorController,
    /// Bus-attached battery-management unit
    BatteryManagement,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MotorController => write!(f, "motor-controller"),
            Self::BatteryManagement => write!(f, "battery-management"),
        }
    }
}

/// Telemetry field selection; bit `i` set means field `i` is on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldMask(u32);

impl FieldMask {
    /// Every field
    pub const ALL: Self = Self(u32::MAX);
    /// No fields
    pub const NONE: Self = Self(0);

    /// FET temperature
    pub const TEMP_FET: u32 = 1 << 0;
    /// Motor temperature
    pub const TEMP_MOTOR: u32 = 1 << 1;
    /// Average motor current
    pub const AVG_MOTOR_CURRENT: u32 = 1 << 2;
    /// Average input current
    pub const AVG_INPUT_CURRENT: u32 = 1 << 3;
    /// Average d-axis current
    pub const AVG_ID: u32 = 1 << 4;
    /// Average q-axis current
    pub const AVG_IQ: u32 = 1 << 5;
    /// Duty cycle
    pub const DUTY_CYCLE: u32 = 1 << 6;
    /// Electrical RPM
    pub const RPM: u32 = 1 << 7;
    /// Input voltage
    pub const INPUT_VOLTAGE: u32 = 1 << 8;
    /// Consumed amp-hours
    pub const AMP_HOURS: u32 = 1 << 9;
    /// Regenerated amp-hours
    pub const AMP_HOURS_CHARGED: u32 = 1 << 10;
    /// Consumed watt-hours
    pub const WATT_HOURS: u32 = 1 << 11;
    /// Regenerated watt-hours
    pub const WATT_HOURS_CHARGED: u32 = 1 << 12;
    /// Tachometer
    pub const TACHOMETER: u32 = 1 << 13;
    /// Absolute tachometer
    pub const TACHOMETER_ABS: u32 = 1 << 14;
    /// Fault code
    pub const FAULT: u32 = 1 << 15;

    /// Create from raw bits
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Return the underlying bit representation
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Set a field bit
    #[must_use]
    pub const fn with(mut self, field: u32) -> Self {
        self.0 |= field;
        self
    }

    /// Check if bit `index` is set
    #[must_use]
    pub const fn has_bit(self, index: u32) -> bool {
        index < 32 && (self.0 >> index) & 1 == 1
    }

    /// Check if a field bit is set
    #[must_use]
    pub const fn has(self, field: u32) -> bool {
        (self.0 & field) != 0
    }

    /// Number of selected fields
    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }
}

impl Default for FieldMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        let opcodes = [
            Opcode::FwVersion,
            Opcode::GetValuesSelective,
            Opcode::SetChuckData,
            Opcode::ForwardCan,
        ];

        for opcode in opcodes {
            assert_eq!(Opcode::from_u8(opcode.as_u8()), Some(opcode));
        }
        assert_eq!(Opcode::from_u8(200), None);
    }

    #[test]
    fn test_bms_opcode_space_is_separate() {
        assert_eq!(BmsOpcode::from_u8(51), Some(BmsOpcode::GetCells));
        assert_eq!(Opcode::from_u8(51), Some(Opcode::GetValuesSetupSelective));
        assert_eq!(BmsOpcode::from_u8(0), None);
    }

    #[test]
    fn test_field_mask() {
        let mask = FieldMask::NONE
            .with(FieldMask::TEMP_FET)
            .with(FieldMask::TEMP_MOTOR);

        assert_eq!(mask.bits(), 0x0000_0003);
        assert!(mask.has(FieldMask::TEMP_MOTOR));
        assert!(!mask.has(FieldMask::RPM));
        assert!(mask.has_bit(1));
        assert!(!mask.has_bit(40));
        assert_eq!(mask.count(), 2);
        assert_eq!(FieldMask::default(), FieldMask::ALL);
    }
}
