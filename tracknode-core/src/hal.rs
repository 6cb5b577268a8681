//! Hardware abstraction traits
//!
//! The core never touches a bus or a pin directly; board glue implements
//! these traits over the real drivers, and tests implement them over scripted
//! fakes. All polarity/inversion quirks (the ignition input is active-high,
//! the SOS button active-low) are resolved by the implementation - the core
//! only ever sees decoded logical values.

use crate::errors::SensorError;
use crate::time::UtcDateTime;

/// Three-axis accelerometer with an on-die temperature sensor.
pub trait Accelerometer {
    /// One raw acceleration sample, per-axis, in g.
    fn acceleration(&mut self) -> Result<[f32; 3], SensorError>;

    /// Die temperature in degrees Celsius.
    fn temperature(&mut self) -> Result<f32, SensorError>;
}

/// Backup battery charger state, as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerStatus {
    /// Charger idle (no charge in progress).
    Idle,
    /// Charge in progress.
    Charging,
    /// Charge complete.
    Complete,
}

impl ChargerStatus {
    /// Wire encoding used in the telemetry frame.
    pub fn code(self) -> i64 {
        match self {
            ChargerStatus::Idle => 0,
            ChargerStatus::Charging => 1,
            ChargerStatus::Complete => 2,
        }
    }
}

/// Digital inputs and power rails of the vehicle board.
pub trait VehicleIo {
    /// Ignition switch state.
    fn ignition(&mut self) -> bool;

    /// Emergency (SOS) button state.
    fn sos(&mut self) -> bool;

    /// True while running from the backup battery instead of main power.
    fn battery_backup(&mut self) -> bool;

    /// Main supply voltage in volts.
    fn main_voltage(&mut self) -> f64;

    /// Backup battery voltage in volts.
    fn backup_voltage(&mut self) -> f64;

    /// Backup battery charger state.
    fn charger_status(&mut self) -> ChargerStatus;
}

/// One GNSS position fix.
#[derive(Debug, Clone, PartialEq)]
pub struct GnssFix {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Altitude above mean sea level, meters.
    pub altitude: f64,
    /// Ground speed, km/h.
    pub speed: f64,
    /// Course over ground, degrees.
    pub course: f64,
    /// Number of satellites used in the fix.
    pub satellites: u32,
    /// Horizontal dilution of precision; lower is better.
    pub hdop: f64,
    /// UTC time of the fix, when the receiver reported one.
    pub timestamp: Option<UtcDateTime>,
}

/// GNSS receiver.
pub trait GnssReceiver {
    /// The current fix, or `None` while the receiver has none.
    fn fix(&mut self) -> Option<GnssFix>;
}

/// The modem's battery-backed real-time clock.
///
/// Until the modem has synced with the network this clock reports a default
/// date in the past; the scheduler filters those out by year.
pub trait ModemClock {
    /// Current UTC time, or `None` when the modem cannot be read.
    fn rtc(&mut self) -> Option<UtcDateTime>;
}
