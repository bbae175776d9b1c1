//! Serial packet codec (encode/decode)
//!
//! # Format
//!
//! ```text
//! short: [0x02] [len u8]        [payload] [crc hi] [crc lo] [0x03]
//! long:  [0x03] [len hi] [len lo] [payload] [crc hi] [crc lo] [0x03]
//! ```
//!
//! The checksum covers the payload only and is big-endian.

use bytes::{BufMut, Bytes, BytesMut};

use super::checksum::checksum;
use super::{Error, MAX_PAYLOAD_SIZE, Result};

/// Start marker for payloads up to 255 bytes
pub const START_SHORT: u8 = 0x02;

/// Start marker for payloads carrying a 16-bit length
pub const START_LONG: u8 = 0x03;

/// Terminator byte closing every frame
pub const FRAME_END: u8 = 0x03;

/// Largest payload the short form can describe
pub const MAX_SHORT_PAYLOAD: usize = u8::MAX as usize;

/// Checksum plus terminator
const TRAILER_SIZE: usize = 3;

/// Frame envelope variant, selected by payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameForm {
    /// One length byte
    Short,
    /// Two length bytes, big-endian
    Long,
}

impl FrameForm {
    /// Pick the form able to describe `len` payload bytes
    #[must_use]
    pub const fn for_len(len: usize) -> Self {
        if len <= MAX_SHORT_PAYLOAD {
            Self::Short
        } else {
            Self::Long
        }
    }

    /// Parse a start marker
    #[must_use]
    pub const fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            START_SHORT => Some(Self::Short),
            START_LONG => Some(Self::Long),
            _ => None,
        }
    }

    /// Start marker on the wire
    #[must_use]
    pub const fn marker(self) -> u8 {
        match self {
            Self::Short => START_SHORT,
            Self::Long => START_LONG,
        }
    }

    /// Marker plus length bytes
    #[must_use]
    pub const fn header_len(self) -> usize {
        match self {
            Self::Short => 2,
            Self::Long => 3,
        }
    }

    /// Total frame size for a payload of `payload_len` bytes
    #[must_use]
    pub const fn frame_len(self, payload_len: usize) -> usize {
        self.header_len() + payload_len + TRAILER_SIZE
    }
}

/// One complete serial frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    form: FrameForm,
    payload: Bytes,
    checksum: u16,
}

impl Frame {
    /// Wrap a payload, computing its checksum
    pub fn new(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::UnsupportedLength {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            form: FrameForm::for_len(payload.len()),
            checksum: checksum(&payload),
            payload,
        })
    }

    /// Envelope variant
    #[must_use]
    pub const fn form(&self) -> FrameForm {
        self.form
    }

    /// Payload bytes
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload checksum
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Serialize to wire bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.form.frame_len(self.payload.len()));

        out.put_u8(self.form.marker());
        match self.form {
            FrameForm::Short => out.put_u8(self.payload.len() as u8),
            FrameForm::Long => out.put_u16(self.payload.len() as u16),
        }
        out.extend_from_slice(&self.payload);
        out.put_u16(self.checksum);
        out.put_u8(FRAME_END);

        out.freeze()
    }
}

/// Parse the payload length out of a frame header.
///
/// `header` must hold at least [`FrameForm::header_len`] bytes for the form
/// named by its first byte.
pub fn declared_len(header: &[u8]) -> Result<(FrameForm, usize)> {
    let Some(&marker) = header.first() else {
        return Err(Error::MalformedFrame {
            reason: "empty frame",
        });
    };
    let form = FrameForm::from_marker(marker).ok_or(Error::MalformedFrame {
        reason: "invalid start marker",
    })?;

    if header.len() < form.header_len() {
        return Err(Error::MalformedFrame {
            reason: "truncated length field",
        });
    }

    let len = match form {
        FrameForm::Short => usize::from(header[1]),
        FrameForm::Long => usize::from(u16::from_be_bytes([header[1], header[2]])),
    };
    Ok((form, len))
}

/// Encode a payload to wire bytes
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    Ok(Frame::new(Bytes::copy_from_slice(payload))?.to_bytes())
}

/// Decode one complete frame and return its payload
///
/// # Errors
///
/// Returns an error if:
/// - The start marker is not a known form
/// - The terminator is not where the declared length puts it
/// - The buffer holds more or fewer bytes than the frame declares
/// - The declared length exceeds [`MAX_PAYLOAD_SIZE`]
/// - The checksum doesn't match
pub fn decode(raw: &[u8]) -> Result<Bytes> {
    let (form, payload_len) = declared_len(raw)?;

    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(Error::UnsupportedLength {
            len: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let total = form.frame_len(payload_len);
    if raw.len() < total {
        return Err(Error::MalformedFrame {
            reason: "frame shorter than declared length",
        });
    }
    if raw[total - 1] != FRAME_END {
        return Err(Error::MalformedFrame {
            reason: "terminator not at declared position",
        });
    }
    if raw.len() > total {
        return Err(Error::MalformedFrame {
            reason: "trailing bytes after terminator",
        });
    }

    let start = form.header_len();
    let payload = &raw[start..start + payload_len];
    let found = u16::from_be_bytes([raw[total - 3], raw[total - 2]]);
    let expected = checksum(payload);

    if found != expected {
        return Err(Error::ChecksumMismatch { expected, found });
    }

    Ok(Bytes::copy_from_slice(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_values_request_bytes() {
        let encoded = encode(&[0x04]).unwrap();
        assert_eq!(encoded.as_ref(), &[0x02, 0x01, 0x04, 0x40, 0x84, 0x03]);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = b"telemetry";
        let encoded = encode(payload).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), payload);
    }

    #[test]
    fn test_long_form_for_256_bytes() {
        let payload = vec![0xA5; 256];
        let frame = Frame::new(payload.clone()).unwrap();
        assert_eq!(frame.form(), FrameForm::Long);

        let encoded = frame.to_bytes();
        assert_eq!(&encoded[..3], &[START_LONG, 0x01, 0x00]);
        assert_eq!(encoded.len(), 256 + 6);
        assert_eq!(decode(&encoded).unwrap().as_ref(), payload.as_slice());
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let result = encode(&[0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            result,
            Err(Error::UnsupportedLength { len: 257, .. })
        ));
    }

    #[test]
    fn test_decode_invalid_marker() {
        let mut encoded = encode(b"abc").unwrap().to_vec();
        encoded[0] = 0x07;
        assert!(matches!(
            decode(&encoded),
            Err(Error::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_decode_misplaced_terminator() {
        let mut encoded = encode(b"abc").unwrap().to_vec();
        let last = encoded.len() - 1;
        encoded[last] = 0x00;
        assert!(matches!(
            decode(&encoded),
            Err(Error::MalformedFrame {
                reason: "terminator not at declared position"
            })
        ));
    }

    #[test]
    fn test_decode_short_buffer() {
        let encoded = encode(b"abc").unwrap();
        assert!(matches!(
            decode(&encoded[..encoded.len() - 1]),
            Err(Error::MalformedFrame { .. })
        ));
        assert!(matches!(decode(&[]), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut encoded = encode(b"abc").unwrap().to_vec();
        encoded[2] ^= 0x01;
        assert!(matches!(
            decode(&encoded),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_declared_len() {
        assert_eq!(declared_len(&[START_SHORT, 9]).unwrap(), (FrameForm::Short, 9));
        assert_eq!(
            declared_len(&[START_LONG, 0x01, 0x02]).unwrap(),
            (FrameForm::Long, 0x0102)
        );
        assert!(declared_len(&[START_LONG, 0x01]).is_err());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
            prop::collection::vec(any::<u8>(), 0..=MAX_SHORT_PAYLOAD)
        }

        proptest! {
            /// Property: every short-form payload survives encode then decode
            #[test]
            fn prop_roundtrip_preserves_payload(payload in payload_strategy()) {
                let encoded = encode(&payload).unwrap();
                prop_assert_eq!(encoded[0], START_SHORT);
                let decoded = decode(&encoded).unwrap();
                prop_assert_eq!(decoded.as_ref(), payload.as_slice());
            }

            /// Property: a single flipped bit in payload or checksum is caught
            #[test]
            fn prop_single_bit_flip_detected(
                payload in payload_strategy(),
                position in any::<prop::sample::Index>(),
                bit in 0u8..8,
            ) {
                let mut encoded = encode(&payload).unwrap().to_vec();
                // payload and checksum bytes sit between the 2-byte header and the terminator
                let span = payload.len() + 2;
                let offset = 2 + position.index(span);
                encoded[offset] ^= 1 << bit;

                let result = decode(&encoded);
                prop_assert!(
                    matches!(result, Err(Error::ChecksumMismatch { .. })),
                    "corruption at {} not reported as checksum mismatch",
                    offset
                );
            }
        }
    }
}
