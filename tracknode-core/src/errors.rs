//! Error types for the firmware core
//!
//! The error design follows the device's recovery model rather than a single
//! catch-all enum:
//!
//! 1. **Transient sensor errors** ([`SensorError`]) are counted and swallowed
//!    inside the motion filter; one bad sample never stops the tick loop.
//! 2. **Transport errors** never cross the [`crate::client::DeviceClient`]
//!    boundary as errors at all - they surface as `false`/`None` results and
//!    a log line, because the caller's only move is to try again later.
//! 3. **Fatal conditions** ([`FatalError`]) propagate out of the scheduler;
//!    the only handler is a full power-cycle, performed by the board glue.

use thiserror::Error;

/// A single failed interaction with a sensor.
///
/// Kept `Copy` and payload-free: these are produced in the filter's hot path
/// and usually only ever incremented into a fault counter.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The bus transaction itself failed (SPI/I2C level).
    #[error("sensor bus transaction failed")]
    Bus,
    /// The sensor had no fresh sample ready.
    #[error("sensor data not ready")]
    NotReady,
}

/// Unrecoverable conditions that end the telemetry loop.
///
/// Whoever called [`crate::scheduler::TelemetryScheduler::run`] is expected
/// to reset the device; there is no in-process recovery from these.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// The cloud link stayed down past the grace deadline.
    #[error("cloud link down for {offline_ms} ms, past the grace deadline")]
    OfflineTimeout {
        /// How long the link had been observed down when the deadline fired.
        offline_ms: u64,
    },
}

/// Failures decoding or encoding the persisted settings document.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// No newline sentinel inside the flash block; the block was never
    /// written or was erased.
    #[error("settings block has no terminator")]
    MissingTerminator,
    /// The bytes before the sentinel are not valid UTF-8.
    #[error("settings block is not valid UTF-8")]
    NotUtf8,
    /// The document is not the expected JSON shape.
    #[error("settings document malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failures of the cloud registration handshake.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionError {
    /// The device dropped offline while registering.
    #[error("device went offline during registration")]
    Offline,
    /// Registration did not complete within the retry window.
    #[error("registration not confirmed within the retry window")]
    Timeout,
}
