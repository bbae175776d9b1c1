//! Fixed-point and compact float packing.
//!
//! All multi-byte values are big-endian. "float16" and "float32" fields are
//! really `i16`/`i32` carrying `value * scale` where `scale` is a power of ten.

use bytes::{Buf, BufMut};

use super::{Error, Result};

/// Values below this magnitude are flushed to zero by [`put_f32_auto`].
const AUTO_SUBNORMAL_LIMIT: f32 = 1.5e-38;

/// Append `value * scale` as a big-endian `i32`, truncating toward zero.
pub fn put_scaled_i32(out: &mut impl BufMut, value: f32, scale: f64) {
    out.put_i32(scale_to_i32(value, scale));
}

/// `value * scale` truncated toward zero and saturated to `i32`.
#[must_use]
pub fn scale_to_i32(value: f32, scale: f64) -> i32 {
    // float -> int `as` casts saturate and map NaN to 0
    (f64::from(value) * scale) as i32
}

/// Append a float using the self-describing 32-bit layout
/// `sign | exponent (8) | significand (23)`.
///
/// Subnormals are not representable and become zero.
pub fn put_f32_auto(out: &mut impl BufMut, value: f32) {
    out.put_u32(f32_auto_bits(value));
}

/// Bit pattern produced by [`put_f32_auto`].
#[must_use]
pub fn f32_auto_bits(value: f32) -> u32 {
    if value.abs() < AUTO_SUBNORMAL_LIMIT {
        return 0;
    }
    // For normal numbers frexp's (significand, exponent) pair maps exactly
    // onto the IEEE-754 fields, so the layout is the native bit pattern.
    value.to_bits()
}

/// Inverse of [`f32_auto_bits`].
#[must_use]
pub fn f32_from_auto_bits(bits: u32) -> f32 {
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let significand = bits & 0x7F_FFFF;
    let negative = bits & (1 << 31) != 0;

    if exponent == 0 && significand == 0 {
        return 0.0;
    }

    let sig = f64::from(significand) / (8_388_608.0 * 2.0) + 0.5;
    let magnitude = sig * 2f64.powi(exponent - 126);
    let value = if negative { -magnitude } else { magnitude };
    value as f32
}

/// Bounds-checked big-endian reader over a reply payload.
///
/// Every accessor checks the remaining length first, so a short payload turns
/// into [`Error::Truncated`] instead of a panic inside [`bytes::Buf`].
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> PayloadReader<'a> {
    /// Start reading at the beginning of `buf`
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, consumed: 0 }
    }

    /// Bytes not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Bytes consumed so far
    #[must_use]
    pub fn position(&self) -> usize {
        self.consumed
    }

    fn need(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(Error::Truncated {
                needed: self.consumed + len,
                got: self.consumed + self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Skip `len` bytes
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.need(len)?;
        self.buf.advance(len);
        self.consumed += len;
        Ok(())
    }

    /// Read one byte
    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        self.consumed += 1;
        Ok(self.buf.get_u8())
    }

    /// Read a big-endian `u32`
    pub fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        self.consumed += 4;
        Ok(self.buf.get_u32())
    }

    /// Read a big-endian `i32`
    pub fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        self.consumed += 4;
        Ok(self.buf.get_i32())
    }

    /// Read an `i16` and divide by `scale`
    pub fn scaled_i16(&mut self, scale: f32) -> Result<f32> {
        self.need(2)?;
        self.consumed += 2;
        Ok(f32::from(self.buf.get_i16()) / scale)
    }

    /// Read an `i32` and divide by `scale`
    pub fn scaled_i32(&mut self, scale: f64) -> Result<f32> {
        let raw = self.i32()?;
        Ok((f64::from(raw) / scale) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_scale_truncates_toward_zero() {
        assert_eq!(scale_to_i32(12.345_6, 1000.0), 12_345);
        assert_eq!(scale_to_i32(-2.5, 1000.0), -2_500);
        assert_eq!(scale_to_i32(0.5, 100_000.0), 50_000);
        assert_eq!(scale_to_i32(f32::NAN, 1000.0), 0);
        assert_eq!(scale_to_i32(1e30, 1000.0), i32::MAX);
    }

    #[test]
    fn test_f32_auto_known_values() {
        assert_eq!(f32_auto_bits(1.0), 0x3F80_0000);
        assert_eq!(f32_auto_bits(-15.0), 0xC170_0000);
        assert_eq!(f32_auto_bits(0.0), 0);
        assert_eq!(f32_auto_bits(-0.0), 0);
        assert_eq!(f32_auto_bits(1.2e-38), 0);
    }

    #[test]
    fn test_f32_auto_roundtrip() {
        for value in [1.0_f32, -15.0, 15.0, 0.005, 1_500_000.0, -1_500_000.0, 0.0] {
            assert_eq!(f32_from_auto_bits(f32_auto_bits(value)), value);
        }
    }

    #[test]
    fn test_reader_truncation() {
        let mut reader = PayloadReader::new(&[0x00, 0xFA, 0x01]);
        assert_eq!(reader.scaled_i16(10.0).unwrap(), 25.0);
        let err = reader.i32().unwrap_err();
        assert!(matches!(err, Error::Truncated { needed: 6, got: 3 }));
        // failed reads consume nothing
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.u8().unwrap(), 0x01);
    }

    #[test]
    fn test_put_scaled_i32_big_endian() {
        let mut out = BytesMut::new();
        put_scaled_i32(&mut out, 1.5, 1000.0);
        assert_eq!(out.as_ref(), &[0x00, 0x00, 0x05, 0xDC]);
    }
}
