//! Serial transport: deadline-bounded frame receiver over a byte link.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, instrument, trace, warn};

use super::config::LinkConfig;
use super::error::LinkResult;
use crate::protocol::frame::{self, FrameForm, MAX_SHORT_PAYLOAD};
use crate::protocol::{Error, Result};

/// Bytes read before the payload length is known
const HEADER_PROBE: usize = 2;

/// Largest read issued to the link in one call
const READ_CHUNK: usize = 64;

/// Quiet gap that ends a resync drain
const DRAIN_IDLE: Duration = Duration::from_millis(2);

/// Byte-oriented link to a controller (UART, USB CDC, pipe).
pub trait SerialLink {
    /// Write every byte or fail.
    fn write_all(&mut self, bytes: &[u8]) -> LinkResult<()>;

    /// Read up to `buf.len()` bytes, blocking no later than `deadline`.
    ///
    /// Returns `Ok(0)` once the deadline has passed with nothing available.
    /// Must never return more bytes than `buf` holds, so callers that size
    /// `buf` exactly never pull bytes belonging to the next frame.
    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> LinkResult<usize>;
}

impl<L: SerialLink + ?Sized> SerialLink for &mut L {
    fn write_all(&mut self, bytes: &[u8]) -> LinkResult<()> {
        (**self).write_all(bytes)
    }

    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> LinkResult<usize> {
        (**self).read(buf, deadline)
    }
}

/// Assembles one reply frame from a [`SerialLink`] under a fixed deadline.
#[derive(Debug, Clone, Copy)]
pub struct SerialReceiver {
    timeout: Duration,
}

impl SerialReceiver {
    /// Receiver giving each reply `timeout` to arrive in full
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Reply deadline
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read one frame and return its validated payload.
    ///
    /// Reads exactly the bytes the header declares and stops, leaving any
    /// further queued bytes on the link. On any failure the partially read
    /// bytes are dropped. A bad marker, a misplaced terminator or a long-form
    /// header also drains the link until it goes quiet, so the next call
    /// starts on a frame boundary.
    #[instrument(level = "trace", skip(self, link))]
    pub fn receive<L: SerialLink + ?Sized>(&self, link: &mut L) -> Result<Bytes> {
        let started = Instant::now();
        let deadline = started + self.timeout;

        let result = read_frame(link, started, deadline);
        if let Err(Error::MalformedFrame { .. } | Error::UnsupportedLength { .. }) = &result {
            let dropped = drain(link, deadline)?;
            debug!(dropped, "drained link after unusable frame");
        }
        result
    }
}

fn read_frame<L: SerialLink + ?Sized>(
    link: &mut L,
    started: Instant,
    deadline: Instant,
) -> Result<Bytes> {
    let mut raw = BytesMut::with_capacity(FrameForm::Short.frame_len(MAX_SHORT_PAYLOAD));

    fill_to(link, &mut raw, HEADER_PROBE, started, deadline)?;

    let form = FrameForm::from_marker(raw[0]).ok_or_else(|| {
        warn!(marker = raw[0], "discarding frame with invalid start marker");
        Error::MalformedFrame {
            reason: "invalid start marker",
        }
    })?;

    if form == FrameForm::Long {
        fill_to(link, &mut raw, form.header_len(), started, deadline)?;
        let (_, len) = frame::declared_len(&raw)?;
        warn!(len, "long-form reply is not supported on this link");
        return Err(Error::UnsupportedLength {
            len,
            max: MAX_SHORT_PAYLOAD,
        });
    }

    let (_, payload_len) = frame::declared_len(&raw)?;
    let total = form.frame_len(payload_len);
    trace!(payload_len, total, "frame header parsed");
    fill_to(link, &mut raw, total, started, deadline)?;

    frame::decode(&raw)
}

/// Discard queued bytes until the link is quiet for [`DRAIN_IDLE`] or
/// `deadline` passes. Returns the number of bytes dropped.
fn drain<L: SerialLink + ?Sized>(link: &mut L, deadline: Instant) -> Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    let mut dropped = 0;
    loop {
        let quiet_by = (Instant::now() + DRAIN_IDLE).min(deadline);
        let n = link.read(&mut chunk, quiet_by)?;
        dropped += n;
        if n == 0 || Instant::now() >= deadline {
            return Ok(dropped);
        }
    }
}

/// Grow `raw` to exactly `target` bytes or time out.
fn fill_to<L: SerialLink + ?Sized>(
    link: &mut L,
    raw: &mut BytesMut,
    target: usize,
    started: Instant,
    deadline: Instant,
) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK];
    while raw.len() < target {
        let want = (target - raw.len()).min(READ_CHUNK);
        let n = link.read(&mut chunk[..want], deadline)?;
        if n == 0 {
            debug!(received = raw.len(), expected = target, "serial reply deadline passed");
            return Err(Error::Timeout {
                waited: started.elapsed(),
                received: raw.len(),
            });
        }
        raw.extend_from_slice(&chunk[..n.min(want)]);
    }
    Ok(())
}

/// Framed request/reply transport over a [`SerialLink`].
#[derive(Debug)]
pub struct SerialTransport<L> {
    link: L,
    receiver: SerialReceiver,
}

impl<L: SerialLink> SerialTransport<L> {
    /// Wrap `link`, giving each reply `timeout` to arrive
    pub fn new(link: L, timeout: Duration) -> Self {
        Self {
            link,
            receiver: SerialReceiver::new(timeout),
        }
    }

    /// Build from a configuration, taking its serial deadline
    pub fn from_config(link: L, config: &LinkConfig) -> Self {
        Self::new(link, config.serial_timeout)
    }

    /// Frame and write one payload
    #[instrument(level = "trace", skip(self, payload), fields(len = payload.len()))]
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let wire = frame::encode(payload)?;
        self.link.write_all(&wire)?;
        Ok(())
    }

    /// Receive one payload under the configured deadline
    pub fn receive(&mut self) -> Result<Bytes> {
        self.receiver.receive(&mut self.link)
    }

    /// Underlying link
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Unwrap the underlying link
    pub fn into_inner(self) -> L {
        self.link
    }
}
