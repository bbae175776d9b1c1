//! CAN framing: extended identifiers, payload segmentation and the
//! frame-level bus abstraction.
//!
//! # Identifier layout
//!
//! ```text
//! bits 28..8  packet kind
//! bits  7..0  destination node id
//! ```
//!
//! Payloads of up to six bytes travel in one `ProcessShortBuffer` frame.
//! Longer payloads are split into seven-byte `FillRxBuffer` segments followed
//! by one `ProcessRxBuffer` frame carrying the total length and checksum.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use super::config::LinkConfig;
use super::error::LinkResult;
use super::reassembly::ReassemblySession;
use crate::protocol::metrics::Metrics;
use crate::protocol::{Error, MAX_PAYLOAD_SIZE, Result, checksum};

/// Largest data field of a classic CAN frame
pub const CAN_MAX_DATA: usize = 8;

/// Payload bytes carried by a `ProcessShortBuffer` frame
pub const MAX_SHORT_BUFFER: usize = 6;

/// Payload bytes carried by one `FillRxBuffer` frame
pub const FILL_CHUNK_LEN: usize = 7;

/// Identifier of the periodic keep-alive frame
pub const KEEP_ALIVE_ID: u32 = 0x0B57_ED1F;

/// Mask of a 29-bit extended identifier
const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Packet kinds this host sends and reassembles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CanPacketKind {
    /// Write a segment into the receiver's staging buffer
    FillRxBuffer = 5,
    /// Validate and hand over the staged buffer
    ProcessRxBuffer = 7,
    /// Self-contained payload of up to six bytes
    ProcessShortBuffer = 8,
}

impl CanPacketKind {
    /// Parse the kind byte of an identifier
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            5 => Some(Self::FillRxBuffer),
            7 => Some(Self::ProcessRxBuffer),
            8 => Some(Self::ProcessShortBuffer),
            _ => None,
        }
    }
}

/// 29-bit extended identifier: packet kind over destination node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanId(u32);

impl CanId {
    /// Compose an identifier addressed to `node`
    #[must_use]
    pub const fn new(kind: CanPacketKind, node: u8) -> Self {
        Self(((kind as u32) << 8) | node as u32)
    }

    /// Wrap a raw identifier; `None` if it does not fit 29 bits
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw & !EXTENDED_ID_MASK == 0 {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Raw identifier value
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Destination node id (low byte)
    #[must_use]
    pub const fn node(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Kind byte (bits above the node id, truncated to one byte)
    #[must_use]
    pub const fn kind_byte(self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    /// Known packet kind, if any
    #[must_use]
    pub fn kind(self) -> Option<CanPacketKind> {
        if self.0 >> 16 != 0 {
            return None;
        }
        CanPacketKind::from_u8(self.kind_byte())
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// One extended-id CAN frame with up to eight data bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: CanId,
    len: u8,
    data: [u8; CAN_MAX_DATA],
}

impl CanFrame {
    /// Build a frame; fails if `data` exceeds eight bytes
    pub fn new(id: CanId, data: &[u8]) -> Result<Self> {
        if data.len() > CAN_MAX_DATA {
            return Err(Error::UnsupportedLength {
                len: data.len(),
                max: CAN_MAX_DATA,
            });
        }
        let mut buf = [0u8; CAN_MAX_DATA];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            len: data.len() as u8,
            data: buf,
        })
    }

    /// The fixed keep-alive frame
    #[must_use]
    pub const fn keep_alive() -> Self {
        Self {
            id: CanId(KEEP_ALIVE_ID),
            len: CAN_MAX_DATA as u8,
            data: [0; CAN_MAX_DATA],
        }
    }

    /// Identifier
    #[must_use]
    pub const fn id(&self) -> CanId {
        self.id
    }

    /// Data field
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &format_args!("{}", self.id))
            .field("data", &self.data())
            .finish()
    }
}

/// Frame-level access to a CAN controller.
pub trait CanBus {
    /// Queue one frame for transmission.
    fn transmit(&mut self, frame: &CanFrame) -> LinkResult<()>;

    /// Next received frame, waiting no later than `deadline`.
    ///
    /// A deadline already in the past makes this a non-blocking poll.
    /// `Ok(None)` means nothing arrived in time.
    fn receive(&mut self, deadline: Instant) -> LinkResult<Option<CanFrame>>;
}

impl<B: CanBus + ?Sized> CanBus for &mut B {
    fn transmit(&mut self, frame: &CanFrame) -> LinkResult<()> {
        (**self).transmit(frame)
    }

    fn receive(&mut self, deadline: Instant) -> LinkResult<Option<CanFrame>> {
        (**self).receive(deadline)
    }
}

/// Split `payload` into the frames that carry it from `own_id` to `target`.
///
/// # Errors
///
/// [`Error::UnsupportedLength`] when the payload exceeds the receiver's
/// 256-byte staging buffer, [`Error::MalformedFrame`] when it is empty.
pub fn segment(payload: &[u8], own_id: u8, target: u8) -> Result<Vec<CanFrame>> {
    if payload.is_empty() {
        return Err(Error::MalformedFrame {
            reason: "empty payload",
        });
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::UnsupportedLength {
            len: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    if payload.len() <= MAX_SHORT_BUFFER {
        let mut data = Vec::with_capacity(2 + payload.len());
        data.extend_from_slice(&[own_id, 0]);
        data.extend_from_slice(payload);
        let frame = CanFrame::new(CanId::new(CanPacketKind::ProcessShortBuffer, target), &data)?;
        trace!(len = payload.len(), target, "single short-buffer frame");
        return Ok(vec![frame]);
    }

    let fill_id = CanId::new(CanPacketKind::FillRxBuffer, target);
    let mut frames = Vec::with_capacity(payload.len().div_ceil(FILL_CHUNK_LEN) + 1);
    for (index, chunk) in payload.chunks(FILL_CHUNK_LEN).enumerate() {
        let mut data = [0u8; CAN_MAX_DATA];
        // offsets stay below 256 because the payload does
        data[0] = (index * FILL_CHUNK_LEN) as u8;
        data[1..=chunk.len()].copy_from_slice(chunk);
        frames.push(CanFrame::new(fill_id, &data[..=chunk.len()])?);
    }

    let len = (payload.len() as u16).to_be_bytes();
    let crc = checksum(payload).to_be_bytes();
    frames.push(CanFrame::new(
        CanId::new(CanPacketKind::ProcessRxBuffer, target),
        &[own_id, 0, len[0], len[1], crc[0], crc[1]],
    )?);

    trace!(len = payload.len(), frames = frames.len(), target, "segmented payload");
    Ok(frames)
}

/// Payload of a `ProcessShortBuffer` frame (data after sender and flag bytes).
///
/// `None` when the frame carries no payload bytes.
#[must_use]
pub fn short_buffer_payload(frame: &CanFrame) -> Option<Bytes> {
    frame
        .data()
        .get(2..)
        .filter(|payload| !payload.is_empty())
        .map(Bytes::copy_from_slice)
}

/// Request/reply transport over a [`CanBus`], addressed to one controller.
#[derive(Debug)]
pub struct CanTransport<B> {
    bus: B,
    own_id: u8,
    controller_id: u8,
    reply_timeout: Duration,
    session: ReassemblySession,
}

impl<B: CanBus> CanTransport<B> {
    /// Build from a validated configuration
    pub fn new(bus: B, config: &LinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            bus,
            own_id: config.own_id,
            controller_id: config.controller_id,
            reply_timeout: config.can_reply_timeout,
            session: ReassemblySession::new(config.reassembly_timeout),
        })
    }

    /// This host's node id
    #[must_use]
    pub const fn own_id(&self) -> u8 {
        self.own_id
    }

    /// Controller node id requests are addressed to
    #[must_use]
    pub const fn controller_id(&self) -> u8 {
        self.controller_id
    }

    /// Segment and transmit one payload, opening a reply session
    #[instrument(level = "trace", skip(self, payload), fields(len = payload.len()))]
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let frames = segment(payload, self.own_id, self.controller_id)?;
        self.session.begin(self.controller_id, Instant::now());
        for frame in &frames {
            self.bus.transmit(frame)?;
        }
        Ok(())
    }

    /// Transmit the keep-alive frame
    pub fn send_keep_alive(&mut self) -> Result<()> {
        self.bus.transmit(&CanFrame::keep_alive())?;
        Ok(())
    }

    /// Drain inbound frames until a reply payload completes.
    ///
    /// Frames addressed to other nodes are skipped. With a zero reply
    /// timeout only the frames already queued are examined. The session is
    /// closed on return whatever the outcome.
    #[instrument(level = "trace", skip(self))]
    pub fn receive(&mut self) -> Result<Bytes> {
        let started = Instant::now();
        let deadline = started + self.reply_timeout;
        let mut last_error = None;

        while let Some(frame) = self.bus.receive(deadline)? {
            let id = frame.id();
            if id.node() != self.own_id {
                trace!(%id, "frame for another node");
                Metrics::record_ignored_frame();
                continue;
            }

            match id.kind() {
                Some(CanPacketKind::ProcessShortBuffer) => {
                    let from_peer = frame.data().first().copied() == self.session.peer();
                    match short_buffer_payload(&frame) {
                        Some(payload) if from_peer => {
                            self.session.close();
                            return Ok(payload);
                        }
                        _ => {
                            trace!(%id, "short buffer outside the reply session");
                            Metrics::record_ignored_frame();
                        }
                    }
                }
                Some(CanPacketKind::FillRxBuffer) => {
                    if let Err(err) = self.session.fill(frame.data(), Instant::now()) {
                        debug!(error = %err, "fill segment rejected");
                        last_error = Some(err);
                    }
                }
                Some(CanPacketKind::ProcessRxBuffer) => {
                    match self.session.process(frame.data(), Instant::now()) {
                        Ok(payload) => return Ok(payload),
                        Err(err) => {
                            debug!(error = %err, "process frame rejected");
                            last_error = Some(err);
                        }
                    }
                }
                None => {
                    trace!(%id, "unhandled packet kind");
                    Metrics::record_ignored_frame();
                }
            }
        }

        let received = self.session.high_water();
        self.session.close();
        Err(last_error.unwrap_or(Error::Timeout {
            waited: started.elapsed(),
            received,
        }))
    }

    /// Underlying bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::{LoopbackBus, LoopbackCanPort};

    fn can_pair() -> (CanTransport<LoopbackCanPort>, LoopbackCanPort, LoopbackCanPort) {
        let bus = LoopbackBus::new();
        let host = CanTransport::new(bus.attach(), &LinkConfig::can(2, 1)).unwrap();
        (host, bus.attach(), bus.attach())
    }

    #[test]
    fn test_transport_rejects_address_clash() {
        let bus = LoopbackBus::new();
        let result = CanTransport::new(bus.attach(), &LinkConfig::can(4, 4));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_transport_reassembles_reply() {
        let (mut host, mut controller, _) = can_pair();
        host.send(&[0x04]).unwrap();
        assert!(controller.receive(Instant::now()).unwrap().is_some());

        let reply: Vec<u8> = (0..38).collect();
        for frame in segment(&reply, 1, 2).unwrap() {
            controller.transmit(&frame).unwrap();
        }
        assert_eq!(host.receive().unwrap().as_ref(), &reply[..]);
    }

    #[test]
    fn test_transport_ignores_foreign_node() {
        let (mut host, _, mut other) = can_pair();
        host.send(&[0x04]).unwrap();
        for frame in segment(&[0x04, 1, 2, 3, 4, 5, 6, 7], 1, 9).unwrap() {
            other.transmit(&frame).unwrap();
        }
        assert!(matches!(host.receive(), Err(Error::Timeout { received: 0, .. })));
    }

    #[test]
    fn test_transport_short_reply() {
        let (mut host, mut controller, _) = can_pair();
        host.send(&[0x00]).unwrap();
        controller.transmit(&segment(&[0x00, 5, 2], 1, 2).unwrap()[0]).unwrap();
        assert_eq!(host.receive().unwrap().as_ref(), &[0x00, 5, 2]);
    }

    #[test]
    fn test_transport_bare_short_buffer_is_not_a_reply() {
        let (mut host, mut controller, _) = can_pair();
        host.send(&[0x00]).unwrap();
        let id = CanId::new(CanPacketKind::ProcessShortBuffer, 2);
        controller.transmit(&CanFrame::new(id, &[1, 0]).unwrap()).unwrap();
        assert!(matches!(host.receive(), Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_transport_corrupted_reply() {
        let (mut host, mut controller, _) = can_pair();
        host.send(&[0x04]).unwrap();
        let mut frames = segment(&[0xAB; 30], 1, 2).unwrap();
        let last = frames.len() - 1;
        let mut data = frames[last].data().to_vec();
        data[4] ^= 0x80;
        frames[last] = CanFrame::new(frames[last].id(), &data).unwrap();
        for frame in &frames {
            controller.transmit(frame).unwrap();
        }
        assert!(matches!(host.receive(), Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_identifier_layout() {
        let id = CanId::new(CanPacketKind::ProcessRxBuffer, 0x2A);
        assert_eq!(id.raw(), 0x072A);
        assert_eq!(id.node(), 0x2A);
        assert_eq!(id.kind(), Some(CanPacketKind::ProcessRxBuffer));
        assert!(CanId::from_raw(0x2000_0000).is_none());
    }

    #[test]
    fn test_short_payload_single_frame() {
        let frames = segment(&[0x04], 2, 1).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id().raw(), 0x0801);
        assert_eq!(frames[0].data(), &[2, 0, 0x04]);
    }

    #[test]
    fn test_six_bytes_still_short() {
        let frames = segment(&[1, 2, 3, 4, 5, 6], 2, 1).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data().len(), 8);
    }

    #[test]
    fn test_thirty_eight_byte_payload_layout() {
        let payload: Vec<u8> = (0..38).collect();
        let frames = segment(&payload, 2, 1).unwrap();

        // six fill frames at offsets 0,7,...,35 then one process frame
        assert_eq!(frames.len(), 7);
        for (index, frame) in frames[..6].iter().enumerate() {
            assert_eq!(frame.id().kind(), Some(CanPacketKind::FillRxBuffer));
            assert_eq!(usize::from(frame.data()[0]), index * FILL_CHUNK_LEN);
        }
        assert_eq!(frames[5].data(), &[35, 35, 36, 37]);

        let process = frames[6];
        assert_eq!(process.id().raw(), 0x0701);
        let crc = checksum(&payload).to_be_bytes();
        assert_eq!(process.data(), &[2, 0, 0, 38, crc[0], crc[1]]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        assert!(matches!(
            segment(&[0u8; 257], 2, 1),
            Err(Error::UnsupportedLength { len: 257, .. })
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(
            segment(&[], 2, 1),
            Err(Error::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_bare_short_buffer_has_no_payload() {
        let id = CanId::new(CanPacketKind::ProcessShortBuffer, 2);
        let frame = CanFrame::new(id, &[1, 0]).unwrap();
        assert_eq!(short_buffer_payload(&frame), None);

        let frame = CanFrame::new(id, &[1, 0, 0x04]).unwrap();
        assert_eq!(short_buffer_payload(&frame).unwrap().as_ref(), &[0x04]);
    }

    #[test]
    fn test_keep_alive_frame() {
        let frame = CanFrame::keep_alive();
        assert_eq!(frame.id().raw(), 0x0B57_ED1F);
        assert_eq!(frame.data(), &[0u8; 8]);
        assert_eq!(frame.id().kind(), None);
    }

    #[test]
    fn test_frame_rejects_nine_bytes() {
        let id = CanId::new(CanPacketKind::FillRxBuffer, 1);
        assert!(CanFrame::new(id, &[0u8; 9]).is_err());
    }
}
