use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use proptest::prelude::*;
use vesc_link::protocol::{Command, checksum};
use vesc_link::transport::can::{
    CanBus, CanPacketKind, KEEP_ALIVE_ID, segment, short_buffer_payload,
};
use vesc_link::transport::{
    CanFrame, CanTransport, LinkConfig, LoopbackBus, LoopbackCanPort, ReassemblySession,
};
use vesc_link::{Controller, Error, FieldMask, LocalProfile};

const HOST: u8 = 2;
const CONTROLLER: u8 = 1;
const STALE: Duration = Duration::from_millis(500);

/// Minimal controller node: reassembles one request addressed to it.
struct FakeController {
    port: LoopbackCanPort,
    session: ReassemblySession,
}

impl FakeController {
    fn new(port: LoopbackCanPort) -> Self {
        Self {
            port,
            session: ReassemblySession::new(STALE),
        }
    }

    fn next_request(&mut self, wait: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + wait;
        self.session.begin(HOST, Instant::now());
        while let Some(frame) = self.port.receive(deadline).unwrap() {
            if frame.id().node() != CONTROLLER {
                continue;
            }
            match frame.id().kind() {
                Some(CanPacketKind::ProcessShortBuffer) => return short_buffer_payload(&frame),
                Some(CanPacketKind::FillRxBuffer) => {
                    self.session.fill(frame.data(), Instant::now()).unwrap();
                }
                Some(CanPacketKind::ProcessRxBuffer) => {
                    return self.session.process(frame.data(), Instant::now()).ok();
                }
                None => {}
            }
        }
        None
    }

    fn reply(&mut self, payload: &[u8]) {
        for frame in segment(payload, CONTROLLER, HOST).unwrap() {
            self.port.transmit(&frame).unwrap();
        }
    }
}

type HostController = Controller<CanTransport<LoopbackCanPort>>;

fn network(reply_timeout: Duration) -> (HostController, FakeController, LoopbackCanPort) {
    let bus = LoopbackBus::new();
    let config = LinkConfig::can(HOST, CONTROLLER).with_can_reply_timeout(reply_timeout);
    let host = CanTransport::new(bus.attach(), &config).unwrap();
    let controller = FakeController::new(bus.attach());
    (Controller::new(host), controller, bus.attach())
}

fn values_reply() -> Vec<u8> {
    let mut reply = vec![4u8];
    reply.extend_from_slice(&321i16.to_be_bytes());
    reply.extend_from_slice(&400i16.to_be_bytes());
    reply.extend_from_slice(&[0u8; 16]);
    reply.extend_from_slice(&(-250i16).to_be_bytes());
    reply.extend_from_slice(&9_000i32.to_be_bytes());
    reply.extend_from_slice(&480i16.to_be_bytes());
    reply.extend_from_slice(&[0u8; 24]);
    reply.push(0);
    reply
}

#[test]
fn test_values_round_trip_with_live_controller() {
    let (mut host, mut controller, _) = network(Duration::from_millis(500));

    let node = thread::spawn(move || {
        let request = controller.next_request(Duration::from_secs(1)).unwrap();
        assert_eq!(request.as_ref(), &[4]);
        controller.reply(&values_reply());
    });

    let telemetry = *host.get_values().unwrap();
    node.join().unwrap();

    assert!((telemetry.temp_fet - 32.1).abs() < 1e-4);
    assert!((telemetry.duty_cycle + 0.25).abs() < 1e-4);
    assert_eq!(telemetry.rpm, 9_000);
    assert!((telemetry.input_voltage - 48.0).abs() < 1e-4);
}

#[test]
fn test_profile_push_reassembles_on_controller() {
    let (mut host, mut controller, _) = network(Duration::ZERO);
    let profile = LocalProfile::default();
    host.set_local_profile(&profile).unwrap();

    let received = controller.next_request(Duration::from_millis(10)).unwrap();
    assert_eq!(received, Command::SetProfile(profile).encode());
}

#[test]
fn test_reply_for_other_node_is_ignored() {
    let (mut host, _, mut stranger) = network(Duration::ZERO);
    for frame in segment(&values_reply(), 9, 5).unwrap() {
        stranger.transmit(&frame).unwrap();
    }
    let result = host.get_values();
    assert!(matches!(result, Err(Error::Timeout { received: 0, .. })));
}

#[test]
fn test_reply_from_wrong_sender_rejected() {
    let (mut host, _, mut stranger) = network(Duration::ZERO);
    // addressed to the host but sent by node 9 instead of the controller
    for frame in segment(&values_reply(), 9, HOST).unwrap() {
        stranger.transmit(&frame).unwrap();
    }
    let result = host.get_values();
    assert!(matches!(result, Err(Error::SessionMismatch { .. })));
    assert_eq!(host.telemetry().rpm, 0);
}

#[test]
fn test_corrupted_process_frame_yields_no_data() {
    let (mut host, mut controller, _) = network(Duration::ZERO);
    let reply = values_reply();
    let mut frames = segment(&reply, CONTROLLER, HOST).unwrap();
    let last = frames.len() - 1;
    let mut data = frames[last].data().to_vec();
    data[5] = data[5].wrapping_add(1);
    frames[last] = CanFrame::new(frames[last].id(), &data).unwrap();
    for frame in &frames {
        controller.port.transmit(frame).unwrap();
    }

    let result = host.get_values();
    assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    assert_eq!(host.telemetry().rpm, 0);
}

#[test]
fn test_short_selective_reply() {
    let (mut host, mut controller, _) = network(Duration::ZERO);
    // mask 0x80 selects rpm only: 1 + 4 + 4 bytes, needs fill frames
    let mut reply = vec![50, 0, 0, 0, 0x80];
    reply.extend_from_slice(&(-1200i32).to_be_bytes());
    controller.reply(&reply);

    let telemetry = host.get_values_selective(FieldMask::from_bits(0x80)).unwrap();
    assert_eq!(telemetry.rpm, -1200);
}

#[test]
fn test_fw_version_short_buffer() {
    let (mut host, mut controller, _) = network(Duration::ZERO);
    controller.reply(&[0, 6, 2]);
    let version = host.get_fw_version().unwrap();
    assert_eq!((version.major, version.minor), (6, 2));
}

#[test]
fn test_keep_alive_on_bus() {
    let (mut host, _, mut listener) = network(Duration::ZERO);
    host.send_keep_alive().unwrap();
    let frame = listener.receive(Instant::now()).unwrap().unwrap();
    assert_eq!(frame.id().raw(), KEEP_ALIVE_ID);
    assert_eq!(frame.data(), &[0u8; 8]);
}

proptest! {
    #[test]
    fn prop_segmentation_round_trip(payload in prop::collection::vec(any::<u8>(), 1..=256)) {
        let frames = segment(&payload, CONTROLLER, HOST).unwrap();
        let mut session = ReassemblySession::new(STALE);
        let now = Instant::now();
        session.begin(CONTROLLER, now);

        let mut out = None;
        for frame in &frames {
            match frame.id().kind() {
                Some(CanPacketKind::ProcessShortBuffer) => out = short_buffer_payload(frame),
                Some(CanPacketKind::FillRxBuffer) => session.fill(frame.data(), now).unwrap(),
                Some(CanPacketKind::ProcessRxBuffer) => {
                    out = Some(session.process(frame.data(), now).unwrap());
                }
                None => prop_assert!(false, "unexpected frame kind"),
            }
        }
        let out = out.unwrap();
        prop_assert_eq!(out.as_ref(), payload.as_slice());
    }

    #[test]
    fn prop_fill_offsets_cover_payload(len in 7usize..=256) {
        let payload = vec![0xA5u8; len];
        let frames = segment(&payload, CONTROLLER, HOST).unwrap();
        let (process, fills) = frames.split_last().unwrap();

        let mut expected_offset = 0usize;
        for fill in fills {
            prop_assert_eq!(usize::from(fill.data()[0]), expected_offset);
            expected_offset += fill.data().len() - 1;
        }
        prop_assert_eq!(expected_offset, len);

        let crc = checksum(&payload).to_be_bytes();
        prop_assert_eq!(&process.data()[4..6], &crc[..]);
    }
}
