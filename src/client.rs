//! Request/response orchestration.
//!
//! One call is one encode, one transmit, one bounded wait and one decode.
//! A failed call leaves both snapshots exactly as they were; the caller
//! re-issues on its next control tick.

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, instrument, trace, warn};

use crate::protocol::metrics::Metrics;
use crate::protocol::telemetry::family;
use crate::protocol::{
    BmsOpcode, Command, Error, FieldMask, FirmwareVersion, LocalProfile, NunchuckCommand, Reading,
    Result, SubordinateDeviceSnapshot, TelemetrySnapshot, Update,
};
use crate::transport::Link;

/// Half-duplex session with one motor controller and whatever sits behind it
/// on the CAN bus.
#[derive(Debug)]
pub struct Controller<L> {
    link: L,
    telemetry: TelemetrySnapshot,
    subordinate: SubordinateDeviceSnapshot,
}

impl<L: Link> Controller<L> {
    /// Drive the controller reachable over `link`
    pub fn new(link: L) -> Self {
        Self {
            link,
            telemetry: TelemetrySnapshot::default(),
            subordinate: SubordinateDeviceSnapshot::default(),
        }
    }

    /// Latest motor-controller telemetry
    #[must_use]
    pub fn telemetry(&self) -> &TelemetrySnapshot {
        &self.telemetry
    }

    /// Latest battery-management state
    #[must_use]
    pub fn subordinate(&self) -> &SubordinateDeviceSnapshot {
        &self.subordinate
    }

    /// Underlying link
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Release the link
    pub fn into_inner(self) -> L {
        self.link
    }

    /// Transmit a command that has no reply
    #[instrument(level = "debug", skip(self), fields(opcode = command.opcode_byte()))]
    pub fn send(&mut self, command: &Command) -> Result<()> {
        let payload = command.encode();
        trace!(payload = ?payload, "sending command");
        self.link.send(&payload).inspect_err(Metrics::record_error)?;
        Metrics::record_request();
        Ok(())
    }

    /// Transmit a query, wait for its reply and fold it into the snapshots.
    ///
    /// Commands without a reply are sent and yield an empty update.
    #[instrument(level = "debug", skip(self), fields(opcode = command.opcode_byte()))]
    pub fn request(&mut self, command: &Command) -> Result<Update> {
        let Some(kind) = command.reply_family() else {
            self.send(command)?;
            return Ok(Update::Telemetry(Default::default()));
        };

        let started = Instant::now();
        self.send(command)?;
        let update = self
            .receive_reply(command)
            .and_then(|payload| family(kind).decode(&payload))
            .inspect_err(|err| {
                if err.is_protocol_fault() {
                    warn!(error = %err, "reply rejected");
                } else {
                    debug!(error = %err, "request failed");
                }
                Metrics::record_error(err);
            })?;

        match &update {
            Update::Telemetry(telemetry) => self.telemetry.apply(telemetry),
            Update::Subordinate(subordinate) => self.subordinate.apply(subordinate),
        }
        Metrics::record_reply(started.elapsed());
        Ok(update)
    }

    fn receive_reply(&mut self, command: &Command) -> Result<Bytes> {
        let payload = self.link.receive()?;
        trace!(payload = ?payload, "reply received");
        let expected = reply_opcode(command);
        match payload.first() {
            Some(&opcode) if opcode == expected => Ok(payload),
            Some(_) => Err(Error::MalformedFrame {
                reason: "reply opcode does not answer the request",
            }),
            None => Err(Error::Truncated { needed: 1, got: 0 }),
        }
    }

    /// Firmware major/minor
    pub fn get_fw_version(&mut self) -> Result<FirmwareVersion> {
        match self.request(&Command::FwVersion)? {
            Update::Telemetry(update) => update
                .readings
                .iter()
                .find_map(|reading| match reading {
                    Reading::Firmware(version) => Some(*version),
                    _ => None,
                })
                .ok_or(Error::Truncated { needed: 2, got: 0 }),
            Update::Subordinate(_) => Err(Error::MalformedFrame {
                reason: "firmware reply decoded as battery data",
            }),
        }
    }

    /// Full telemetry refresh
    pub fn get_values(&mut self) -> Result<&TelemetrySnapshot> {
        self.request(&Command::GetValues)?;
        Ok(&self.telemetry)
    }

    /// Refresh only the fields in `mask`
    pub fn get_values_selective(&mut self, mask: FieldMask) -> Result<&TelemetrySnapshot> {
        self.request(&Command::GetValuesSelective(mask))?;
        Ok(&self.telemetry)
    }

    /// Refresh only the setup fields in `mask`
    pub fn get_values_setup_selective(&mut self, mask: FieldMask) -> Result<&TelemetrySnapshot> {
        self.request(&Command::GetValuesSetupSelective(mask))?;
        Ok(&self.telemetry)
    }

    /// Decoded PPM throttle, locally or from bus node `target`
    pub fn get_decoded_ppm(&mut self, target: Option<u8>) -> Result<f32> {
        self.request(&routed(target, Command::GetDecodedPpm))?;
        Ok(self.telemetry.throttle)
    }

    /// Decoded joystick throttle, locally or from bus node `target`
    pub fn get_decoded_chuk(&mut self, target: Option<u8>) -> Result<f32> {
        self.request(&routed(target, Command::GetDecodedChuk))?;
        Ok(self.telemetry.throttle)
    }

    /// Operational state of the battery-management unit at `bms_id`
    pub fn get_bms_values(&mut self, bms_id: u8) -> Result<&SubordinateDeviceSnapshot> {
        self.request(&Command::forward(bms_id, Command::Bms(BmsOpcode::GetValues)))?;
        Ok(&self.subordinate)
    }

    /// Cell voltages of the battery-management unit at `bms_id`
    pub fn get_bms_cells(&mut self, bms_id: u8) -> Result<&SubordinateDeviceSnapshot> {
        self.request(&Command::forward(bms_id, Command::Bms(BmsOpcode::GetCells)))?;
        Ok(&self.subordinate)
    }

    /// Push joystick state
    pub fn set_chuck_data(&mut self, chuck: &NunchuckCommand) -> Result<()> {
        self.send(&Command::SetChuckData(*chuck))
    }

    /// Motor current setpoint, amps
    pub fn set_current(&mut self, amps: f32) -> Result<()> {
        self.send(&Command::SetCurrent(amps))
    }

    /// Brake current setpoint, amps
    pub fn set_brake_current(&mut self, amps: f32) -> Result<()> {
        self.send(&Command::SetCurrentBrake(amps))
    }

    /// Electrical RPM setpoint
    pub fn set_rpm(&mut self, rpm: i32) -> Result<()> {
        self.send(&Command::SetRpm(rpm))
    }

    /// Duty-cycle setpoint, -1.0..=1.0
    pub fn set_duty(&mut self, duty: f32) -> Result<()> {
        self.send(&Command::SetDuty(duty))
    }

    /// Push a temporary profile
    pub fn set_local_profile(&mut self, profile: &LocalProfile) -> Result<()> {
        self.send(&Command::SetProfile(*profile))
    }

    /// Keep bus-attached battery management awake; no-op on serial
    pub fn send_keep_alive(&mut self) -> Result<()> {
        self.link.send_keep_alive()
    }
}

fn routed(target: Option<u8>, command: Command) -> Command {
    match target {
        Some(node) => Command::forward(node, command),
        None => command,
    }
}

/// Opcode a reply to `command` leads with: forwarded replies carry the
/// relayed command's opcode.
fn reply_opcode(command: &Command) -> u8 {
    match command {
        Command::Forward { inner, .. } => reply_opcode(inner),
        other => other.opcode_byte(),
    }
}
