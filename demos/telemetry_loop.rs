//! Control loop against a simulated controller on an in-memory serial line.
//!
//! Run with `cargo run --example telemetry_loop` (optionally set
//! `VESC_DEMO_TICKS` to control the number of control ticks).

use std::env;
use std::thread;
use std::time::Duration;

use vesc_link::protocol::{self, Opcode};
use vesc_link::transport::{LoopbackSerial, SerialLink, SerialReceiver, SerialTransport};
use vesc_link::{Controller, FieldMask, LinkConfig, NunchuckCommand, VehicleGeometry};

const DEFAULT_TICKS: u32 = 10;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ticks = ticks_from_env();
    println!("vesc-link telemetry loop, ticks: {ticks}");
    println!("-----------------------------------------------------------------");

    let (host, device) = LoopbackSerial::pair();
    let simulator = thread::spawn(move || simulate_controller(device, ticks));

    let config = LinkConfig::serial();
    let mut controller = Controller::new(SerialTransport::from_config(host, &config));
    let geometry = VehicleGeometry::default();
    let mask = FieldMask::NONE
        .with(FieldMask::TEMP_FET)
        .with(FieldMask::RPM)
        .with(FieldMask::INPUT_VOLTAGE)
        .with(FieldMask::TACHOMETER);

    let version = controller.get_fw_version()?;
    println!("firmware {}.{}", version.major, version.minor);

    for tick in 0..ticks {
        let throttle = 127 + u8::try_from(tick * 10).unwrap_or(128).min(128);
        controller.set_chuck_data(&NunchuckCommand::throttle(throttle))?;

        match controller.get_values_selective(mask) {
            Ok(telemetry) => {
                let ride = geometry.derive(telemetry);
                println!(
                    "tick {tick:>3}: {:>6.1} km/h  {:>5.2} km  battery {:>3}%  fet {:>4.1} C",
                    ride.speed_kmh, ride.trip_km, ride.battery_percent, telemetry.temp_fet
                );
            }
            Err(err) => println!("tick {tick:>3}: no data ({err})"),
        }
    }

    simulator
        .join()
        .map_err(|_| "simulated controller panicked")??;

    let metrics = protocol::metrics_snapshot();
    println!("-----------------------------------------------------------------");
    println!(
        "requests {}  replies {}  failures {}  avg round trip {:?} us",
        metrics.requests_sent,
        metrics.replies_decoded,
        metrics.total_failures(),
        metrics.avg_round_trip_us()
    );
    Ok(())
}

fn ticks_from_env() -> u32 {
    env::var("VESC_DEMO_TICKS")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|ticks| *ticks > 0)
        .unwrap_or(DEFAULT_TICKS)
}

/// Answer the firmware query, then one joystick push and one selective query
/// per tick.
fn simulate_controller(mut link: LoopbackSerial, ticks: u32) -> Result<(), protocol::Error> {
    let receiver = SerialReceiver::new(Duration::from_secs(1));
    let mut erpm = 0i32;
    let mut tacho = 0i32;
    let mut voltage = 502i16;

    let mut answered = 0;
    while answered <= ticks {
        let request = receiver.receive(&mut link)?;
        let Some(&opcode) = request.first() else {
            continue;
        };

        match Opcode::from_u8(opcode) {
            Some(Opcode::FwVersion) => {
                link.write_all(&protocol::encode(&[opcode, 6, 2])?)?;
                answered += 1;
            }
            Some(Opcode::SetChuckData) => {
                let y = i32::from(request.get(2).copied().unwrap_or(127));
                erpm = (y - 127) * 150;
            }
            Some(Opcode::GetValuesSelective) => {
                tacho += erpm / 60;
                voltage -= 1;
                let mut reply = vec![opcode];
                reply.extend_from_slice(&request[1..5]);
                reply.extend_from_slice(&285i16.to_be_bytes());
                reply.extend_from_slice(&erpm.to_be_bytes());
                reply.extend_from_slice(&voltage.to_be_bytes());
                reply.extend_from_slice(&tacho.to_be_bytes());
                link.write_all(&protocol::encode(&reply)?)?;
                answered += 1;
            }
            _ => {}
        }
    }
    Ok(())
}
