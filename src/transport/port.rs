//! [`SerialLink`] over a host serial port.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::info;

use super::error::LinkResult;
use super::serial::SerialLink;

/// Serial port opened 8N1
pub struct PortLink {
    port: Box<dyn SerialPort>,
}

impl PortLink {
    /// Open `path` at `baud_rate`
    pub fn open(path: &str, baud_rate: u32) -> LinkResult<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(io::Error::from)?;
        info!(path, baud_rate, "serial port opened");
        Ok(Self { port })
    }

    /// Wrap an already configured port
    #[must_use]
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl SerialLink for PortLink {
    fn write_all(&mut self, bytes: &[u8]) -> LinkResult<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> LinkResult<usize> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(0);
        }
        self.port.set_timeout(remaining).map_err(io::Error::from)?;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for PortLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortLink")
            .field("name", &self.port.name())
            .finish()
    }
}
