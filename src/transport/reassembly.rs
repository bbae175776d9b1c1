//! Receive-side CAN reassembly.
//!
//! A [`ReassemblySession`] is opened for each request that expects a
//! multi-frame reply. It owns the staging buffer and accepts fill segments
//! and the closing process frame only while open, and only from the peer it
//! was opened for.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::protocol::{Error, MAX_PAYLOAD_SIZE, Result, checksum};

/// Bytes in a process frame: sender, flag, length (2), checksum (2)
const PROCESS_FRAME_LEN: usize = 6;

/// Identifies one reassembly session; strictly increasing per reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    /// Raw sequence number
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

#[derive(Debug)]
struct OpenSession {
    token: SessionToken,
    peer: u8,
    last_activity: Instant,
}

/// Staging buffer and bookkeeping for multi-frame CAN replies
pub struct ReassemblySession {
    buffer: [u8; MAX_PAYLOAD_SIZE],
    high_water: usize,
    stale_after: Duration,
    next_token: u64,
    open: Option<OpenSession>,
}

impl ReassemblySession {
    /// Closed session whose fills go stale after `stale_after` of silence
    #[must_use]
    pub const fn new(stale_after: Duration) -> Self {
        Self {
            buffer: [0; MAX_PAYLOAD_SIZE],
            high_water: 0,
            stale_after,
            next_token: 0,
            open: None,
        }
    }

    /// Open a fresh session expecting frames from `peer`.
    ///
    /// Any session still open is abandoned along with its staged bytes.
    pub fn begin(&mut self, peer: u8, now: Instant) -> SessionToken {
        if let Some(previous) = self.open.take() {
            trace!(token = %previous.token, "abandoning open reassembly session");
        }
        self.next_token += 1;
        let token = SessionToken(self.next_token);
        self.reset_buffer();
        self.open = Some(OpenSession {
            token,
            peer,
            last_activity: now,
        });
        trace!(%token, peer, "reassembly session opened");
        token
    }

    /// Token of the open session
    #[must_use]
    pub fn token(&self) -> Option<SessionToken> {
        self.open.as_ref().map(|s| s.token)
    }

    /// Whether a session is open
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Node the open session expects frames from
    #[must_use]
    pub fn peer(&self) -> Option<u8> {
        self.open.as_ref().map(|s| s.peer)
    }

    /// Bytes staged so far (one past the furthest written offset)
    #[must_use]
    pub const fn high_water(&self) -> usize {
        self.high_water
    }

    /// Close without producing a payload
    pub fn close(&mut self) {
        if let Some(session) = self.open.take() {
            trace!(token = %session.token, "reassembly session closed");
        }
        self.reset_buffer();
    }

    /// Stage one fill segment: `[offset, bytes...]`.
    ///
    /// A segment arriving after the session went stale restarts staging
    /// from an empty buffer.
    pub fn fill(&mut self, data: &[u8], now: Instant) -> Result<()> {
        let Some((&offset, chunk)) = data.split_first() else {
            return Err(Error::MalformedFrame {
                reason: "fill frame without offset",
            });
        };
        let stale_after = self.stale_after;
        let session = self.open.as_mut().ok_or(Error::SessionMismatch {
            reason: "fill frame without open session",
        })?;

        let stale = now.saturating_duration_since(session.last_activity) > stale_after;
        session.last_activity = now;
        if stale {
            debug!(token = %session.token, "stale fill sequence, restarting");
            self.reset_buffer();
        }

        let offset = usize::from(offset);
        let end = offset + chunk.len();
        if end > MAX_PAYLOAD_SIZE {
            debug!(offset, len = chunk.len(), "fill segment overflows staging buffer");
            return Err(Error::ReassemblyOverflow {
                offset,
                len: chunk.len(),
            });
        }

        self.buffer[offset..end].copy_from_slice(chunk);
        self.high_water = self.high_water.max(end);
        Ok(())
    }

    /// Validate the staged bytes against a process frame and close.
    ///
    /// `data` is `[sender, flag, len hi, len lo, crc hi, crc lo]`. A process
    /// frame from another sender is rejected and leaves the session open;
    /// every other outcome closes it.
    pub fn process(&mut self, data: &[u8], now: Instant) -> Result<Bytes> {
        if data.len() < PROCESS_FRAME_LEN {
            return Err(Error::MalformedFrame {
                reason: "process frame too short",
            });
        }
        let session = self.open.as_ref().ok_or(Error::SessionMismatch {
            reason: "process frame without open session",
        })?;
        if data[0] != session.peer {
            return Err(Error::SessionMismatch {
                reason: "process frame from unexpected sender",
            });
        }
        let stale = now.saturating_duration_since(session.last_activity) > self.stale_after;
        let token = session.token;

        let result = self.validate(data, stale);
        self.close();
        if result.is_ok() {
            trace!(%token, "reassembled payload");
        }
        result
    }

    fn validate(&self, data: &[u8], stale: bool) -> Result<Bytes> {
        if stale {
            return Err(Error::SessionMismatch {
                reason: "fill sequence went stale",
            });
        }

        let len = usize::from(u16::from_be_bytes([data[2], data[3]]));
        if len > MAX_PAYLOAD_SIZE {
            return Err(Error::ReassemblyOverflow { offset: 0, len });
        }
        if len > self.high_water {
            return Err(Error::Truncated {
                needed: len,
                got: self.high_water,
            });
        }

        let payload = &self.buffer[..len];
        let found = u16::from_be_bytes([data[4], data[5]]);
        let expected = checksum(payload);
        if found != expected {
            debug!(expected, found, "reassembled payload failed checksum");
            return Err(Error::ChecksumMismatch { expected, found });
        }

        Ok(Bytes::copy_from_slice(payload))
    }

    fn reset_buffer(&mut self) {
        self.buffer[..self.high_water].fill(0);
        self.high_water = 0;
    }
}

impl fmt::Debug for ReassemblySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReassemblySession")
            .field("open", &self.open)
            .field("high_water", &self.high_water)
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}
