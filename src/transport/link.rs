//! Transport-neutral request/reply seam used by the orchestrator.

use bytes::Bytes;

use super::can::{CanBus, CanTransport};
use super::config::TransportKind;
use super::serial::{SerialLink, SerialTransport};
use crate::protocol::Result;

/// Carries whole payloads to and from one controller.
///
/// At most one request is in flight: callers send, then receive once.
pub trait Link {
    /// Transport underneath
    fn kind(&self) -> TransportKind;

    /// Deliver one payload
    fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Wait for the reply to the last payload sent
    fn receive(&mut self) -> Result<Bytes>;

    /// Emit the bus keep-alive, where the transport has one
    fn send_keep_alive(&mut self) -> Result<()>;
}

impl<L: SerialLink> Link for SerialTransport<L> {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        SerialTransport::send(self, payload)
    }

    fn receive(&mut self) -> Result<Bytes> {
        SerialTransport::receive(self)
    }

    fn send_keep_alive(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: CanBus> Link for CanTransport<B> {
    fn kind(&self) -> TransportKind {
        TransportKind::Can
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        CanTransport::send(self, payload)
    }

    fn receive(&mut self) -> Result<Bytes> {
        CanTransport::receive(self)
    }

    fn send_keep_alive(&mut self) -> Result<()> {
        CanTransport::send_keep_alive(self)
    }
}

impl<T: Link + ?Sized> Link for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        (**self).send(payload)
    }

    fn receive(&mut self) -> Result<Bytes> {
        (**self).receive()
    }

    fn send_keep_alive(&mut self) -> Result<()> {
        (**self).send_keep_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::config::LinkConfig;
    use crate::transport::loopback::{LoopbackBus, LoopbackSerial};
    use std::time::{Duration, Instant};

    #[test]
    fn test_serial_keep_alive_is_silent() {
        let (host, device) = LoopbackSerial::pair();
        let transport = SerialTransport::new(host, Duration::from_millis(5));
        let mut link: Box<dyn Link> = Box::new(transport);
        link.send_keep_alive().unwrap();
        assert_eq!(link.kind(), TransportKind::Serial);
        assert_eq!(device.pending(), 0);
    }

    #[test]
    fn test_can_keep_alive_transmits() {
        let bus = LoopbackBus::new();
        let mut link = CanTransport::new(bus.attach(), &LinkConfig::can(2, 1)).unwrap();
        let mut listener = bus.attach();
        Link::send_keep_alive(&mut link).unwrap();
        let frame = listener.receive(Instant::now()).unwrap().unwrap();
        assert_eq!(frame.id().raw(), crate::transport::can::KEEP_ALIVE_ID);
    }
}
