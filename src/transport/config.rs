//! Link configuration consumed from the host application.

use std::time::Duration;

use super::error::ConfigError;

/// Physical transport carrying the command set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// Point-to-point UART
    #[default]
    Serial,
    /// Shared CAN bus, 29-bit identifiers
    Can,
}

/// Supported CAN bit rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CanBitrate {
    /// 125 kbit/s
    Kbit125,
    /// 250 kbit/s
    #[default]
    Kbit250,
    /// 500 kbit/s
    Kbit500,
    /// 1 Mbit/s
    Mbit1,
}

impl CanBitrate {
    /// Rate in bits per second
    #[must_use]
    pub const fn bits_per_second(self) -> u32 {
        match self {
            Self::Kbit125 => 125_000,
            Self::Kbit250 => 250_000,
            Self::Kbit500 => 500_000,
            Self::Mbit1 => 1_000_000,
        }
    }
}

impl TryFrom<u32> for CanBitrate {
    type Error = ConfigError;

    fn try_from(rate: u32) -> Result<Self, Self::Error> {
        match rate {
            125_000 => Ok(Self::Kbit125),
            250_000 => Ok(Self::Kbit250),
            500_000 => Ok(Self::Kbit500),
            1_000_000 => Ok(Self::Mbit1),
            other => Err(ConfigError::UnsupportedBitrate(other)),
        }
    }
}

/// Addressing and timing for one controller link.
///
/// Immutable once a link is built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkConfig {
    /// Transport selection
    pub transport: TransportKind,
    /// This host's CAN node id
    pub own_id: u8,
    /// The primary controller's CAN node id
    pub controller_id: u8,
    /// CAN bit rate class
    pub can_bitrate: CanBitrate,
    /// Deadline for one serial reply
    pub serial_timeout: Duration,
    /// How long a CAN fill sequence may sit idle before it is stale
    pub reassembly_timeout: Duration,
    /// How long a CAN receive waits for the first frame; zero drains once
    pub can_reply_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Serial,
            own_id: 2,
            controller_id: 1,
            can_bitrate: CanBitrate::Kbit250,
            serial_timeout: Duration::from_millis(100),
            reassembly_timeout: Duration::from_millis(500),
            can_reply_timeout: Duration::ZERO,
        }
    }
}

impl LinkConfig {
    /// Serial link with default timing
    #[must_use]
    pub fn serial() -> Self {
        Self::default()
    }

    /// CAN link between `own_id` and `controller_id`
    #[must_use]
    pub fn can(own_id: u8, controller_id: u8) -> Self {
        Self {
            transport: TransportKind::Can,
            own_id,
            controller_id,
            ..Self::default()
        }
    }

    /// Set the CAN bit rate
    #[must_use]
    pub fn with_bitrate(mut self, bitrate: CanBitrate) -> Self {
        self.can_bitrate = bitrate;
        self
    }

    /// Set the serial reply deadline
    #[must_use]
    pub fn with_serial_timeout(mut self, timeout: Duration) -> Self {
        self.serial_timeout = timeout;
        self
    }

    /// Set the CAN fill staleness limit
    #[must_use]
    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout = timeout;
        self
    }

    /// Set how long a CAN receive waits for its first frame
    #[must_use]
    pub fn with_can_reply_timeout(mut self, timeout: Duration) -> Self {
        self.can_reply_timeout = timeout;
        self
    }

    /// Check addressing consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport == TransportKind::Can && self.own_id == self.controller_id {
            return Err(ConfigError::AddressClash(self.own_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.transport, TransportKind::Serial);
        assert_eq!(config.serial_timeout, Duration::from_millis(100));
        assert_eq!(config.reassembly_timeout, Duration::from_millis(500));
        assert_eq!(config.can_bitrate.bits_per_second(), 250_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bitrate_parsing() {
        assert_eq!(CanBitrate::try_from(500_000), Ok(CanBitrate::Kbit500));
        assert_eq!(
            CanBitrate::try_from(33_333),
            Err(ConfigError::UnsupportedBitrate(33_333))
        );
    }

    #[test]
    fn test_can_address_clash() {
        assert_eq!(
            LinkConfig::can(7, 7).validate(),
            Err(ConfigError::AddressClash(7))
        );
        assert!(LinkConfig::can(3, 7).with_bitrate(CanBitrate::Mbit1).validate().is_ok());
    }
}
