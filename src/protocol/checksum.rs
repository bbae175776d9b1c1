//! 16-bit packet checksum shared by both transports.

use crc::{CRC_16_XMODEM, Crc};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-16/XMODEM (poly 0x1021, init 0, unreflected) over `bytes`.
///
/// The same value protects a payload on the serial frame and in the CAN
/// process-buffer message, so an integrity token never depends on the link.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}
