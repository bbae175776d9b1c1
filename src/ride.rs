//! Ride figures derived from telemetry and the vehicle's geometry.

use crate::protocol::TelemetrySnapshot;

/// Per-cell Li-ion open-circuit voltage at 0 %, 10 %, ... 100 % charge.
const LIION_DISCHARGE: [f32; 11] = [
    3.00, 3.30, 3.45, 3.58, 3.68, 3.75, 3.82, 3.89, 3.96, 4.03, 4.10,
];

/// mm/min to km/h
const MM_PER_MIN_TO_KMH: f32 = 0.000_06;

/// Drivetrain and pack constants needed to turn raw telemetry into ride units
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleGeometry {
    /// Tyre diameter in millimetres
    pub wheel_diameter_mm: f32,
    /// Motor pole pairs
    pub motor_pole_pairs: u16,
    /// Multiplier correcting tachometer distance against a reference
    pub tacho_compensation: f32,
    /// Cells in series in the battery pack
    pub series_cells: u8,
}

impl Default for VehicleGeometry {
    fn default() -> Self {
        Self {
            wheel_diameter_mm: 240.0,
            motor_pole_pairs: 20,
            tacho_compensation: 1.0,
            series_cells: 12,
        }
    }
}

/// Derived ride state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RideMetrics {
    /// Mechanical motor RPM
    pub motor_rpm: f32,
    /// Ground speed, km/h; never negative
    pub speed_kmh: f32,
    /// Distance covered, km
    pub trip_km: f32,
    /// Estimated pack charge, 0..=100
    pub battery_percent: u8,
}

impl VehicleGeometry {
    /// Mechanical RPM for an electrical RPM
    #[must_use]
    pub fn motor_rpm(&self, erpm: i32) -> f32 {
        if self.motor_pole_pairs == 0 {
            return 0.0;
        }
        erpm as f32 / f32::from(self.motor_pole_pairs)
    }

    /// Ground speed in km/h for an electrical RPM, clamped at zero
    #[must_use]
    pub fn speed_kmh(&self, erpm: i32) -> f32 {
        let circumference_mm = self.wheel_diameter_mm * std::f32::consts::PI;
        (self.motor_rpm(erpm) * circumference_mm * MM_PER_MIN_TO_KMH).max(0.0)
    }

    /// Trip distance in km for a tachometer reading
    #[must_use]
    pub fn trip_km(&self, tachometer: i32) -> f32 {
        if self.wheel_diameter_mm <= 0.0 {
            return 0.0;
        }
        tachometer as f32 / self.wheel_diameter_mm / 1000.0 * self.tacho_compensation
    }

    /// Everything derivable from one snapshot
    #[must_use]
    pub fn derive(&self, telemetry: &TelemetrySnapshot) -> RideMetrics {
        RideMetrics {
            motor_rpm: self.motor_rpm(telemetry.rpm),
            speed_kmh: self.speed_kmh(telemetry.rpm),
            trip_km: self.trip_km(telemetry.tachometer),
            battery_percent: battery_percent(telemetry.input_voltage, self.series_cells),
        }
    }
}

/// Charge estimate for a pack of `cells` Li-ion cells in series at `pack_voltage`.
///
/// Linear between the table points, clamped to 0 and 100.
#[must_use]
pub fn battery_percent(pack_voltage: f32, cells: u8) -> u8 {
    if cells == 0 || !pack_voltage.is_finite() {
        return 0;
    }
    let cell = pack_voltage / f32::from(cells);

    let last = LIION_DISCHARGE.len() - 1;
    if cell <= LIION_DISCHARGE[0] {
        return 0;
    }
    if cell >= LIION_DISCHARGE[last] {
        return 100;
    }

    let upper = LIION_DISCHARGE
        .iter()
        .position(|&v| v > cell)
        .unwrap_or(last);
    let (lo, hi) = (LIION_DISCHARGE[upper - 1], LIION_DISCHARGE[upper]);
    let fraction = (upper - 1) as f32 + (cell - lo) / (hi - lo);
    (fraction * 10.0).round().clamp(0.0, 100.0) as u8
}
