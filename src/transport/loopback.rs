//! In-memory links for tests, benches and demos.
//!
//! [`LoopbackSerial::pair`] returns two connected byte-stream ends;
//! [`LoopbackBus`] is a broadcast CAN segment that any number of ports can
//! attach to.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::can::{CanBus, CanFrame};
use super::error::{LinkError, LinkResult};
use super::serial::SerialLink;

#[derive(Debug, Default)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    ready: Condvar,
}

impl Pipe {
    fn lock(&self) -> LinkResult<MutexGuard<'_, VecDeque<u8>>> {
        self.bytes.lock().map_err(|_| LinkError::Closed)
    }
}

/// One end of an in-memory serial line
#[derive(Debug, Clone)]
pub struct LoopbackSerial {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
}

impl LoopbackSerial {
    /// Two connected ends: bytes written to one are read from the other
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Pipe::default());
        let b = Arc::new(Pipe::default());
        (
            Self {
                inbound: Arc::clone(&a),
                outbound: Arc::clone(&b),
            },
            Self {
                inbound: b,
                outbound: a,
            },
        )
    }

    /// Bytes waiting to be read on this end
    pub fn pending(&self) -> usize {
        self.inbound.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl SerialLink for LoopbackSerial {
    fn write_all(&mut self, bytes: &[u8]) -> LinkResult<()> {
        let mut queue = self.outbound.lock()?;
        queue.extend(bytes);
        self.outbound.ready.notify_all();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> LinkResult<usize> {
        let mut queue = self.inbound.lock()?;
        loop {
            if !queue.is_empty() {
                let n = buf.len().min(queue.len());
                for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            queue = self
                .inbound
                .ready
                .wait_timeout(queue, deadline - now)
                .map_err(|_| LinkError::Closed)?
                .0;
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    inboxes: Vec<VecDeque<CanFrame>>,
}

/// Shared broadcast CAN segment
#[derive(Debug, Clone, Default)]
pub struct LoopbackBus {
    state: Arc<(Mutex<BusState>, Condvar)>,
}

impl LoopbackBus {
    /// Empty bus with no ports
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a port; it receives every frame other ports transmit
    pub fn attach(&self) -> LoopbackCanPort {
        let (lock, _) = &*self.state;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.inboxes.push(VecDeque::new());
        let index = state.inboxes.len() - 1;
        drop(state);
        LoopbackCanPort {
            bus: self.clone(),
            index,
        }
    }
}

/// One node's view of a [`LoopbackBus`]
#[derive(Debug, Clone)]
pub struct LoopbackCanPort {
    bus: LoopbackBus,
    index: usize,
}

impl LoopbackCanPort {
    fn state(&self) -> LinkResult<MutexGuard<'_, BusState>> {
        self.bus.state.0.lock().map_err(|_| LinkError::Closed)
    }

    /// Frames waiting in this port's inbox
    pub fn pending(&self) -> usize {
        self.state()
            .map(|state| state.inboxes[self.index].len())
            .unwrap_or(0)
    }
}

impl CanBus for LoopbackCanPort {
    fn transmit(&mut self, frame: &CanFrame) -> LinkResult<()> {
        let mut state = self.state()?;
        for (index, inbox) in state.inboxes.iter_mut().enumerate() {
            if index != self.index {
                inbox.push_back(*frame);
            }
        }
        self.bus.state.1.notify_all();
        Ok(())
    }

    fn receive(&mut self, deadline: Instant) -> LinkResult<Option<CanFrame>> {
        let (lock, ready) = &*self.bus.state;
        let mut state = lock.lock().map_err(|_| LinkError::Closed)?;
        loop {
            if let Some(frame) = state.inboxes[self.index].pop_front() {
                return Ok(Some(frame));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = ready
                .wait_timeout(state, deadline - now)
                .map_err(|_| LinkError::Closed)?
                .0;
        }
    }
}
