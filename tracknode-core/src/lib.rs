//! Firmware core for the Tracknode cellular/GNSS tracker
//!
//! Fuses accelerometer samples into orientation and vibration metrics,
//! abstracts the cloud device session behind one client contract, and drives
//! the adaptive telemetry loop that decides when and what to transmit.
//!
//! The crate deliberately stops at the hardware boundary: sensors, the modem,
//! the GNSS receiver and flash storage are reached through the traits in
//! [`hal`], so the core runs unchanged on the bench against scripted fakes.
//!
//! ```no_run
//! use tracknode_core::motion::MotionFilter;
//! use tracknode_core::scheduler::{SchedulerConfig, TelemetryScheduler};
//! # fn demo<A, C, B, G, R>(accel: A, client: C, io: B, gnss: G, modem: R)
//! # where
//! #     A: tracknode_core::hal::Accelerometer + Send + 'static,
//! #     C: tracknode_core::client::DeviceClient,
//! #     B: tracknode_core::hal::VehicleIo,
//! #     G: tracknode_core::hal::GnssReceiver,
//! #     R: tracknode_core::hal::ModemClock,
//! # {
//! let filter = MotionFilter::new(accel);
//! filter.start();
//!
//! let mut scheduler = TelemetryScheduler::new(
//!     client,
//!     filter.clone(),
//!     io,
//!     gnss,
//!     modem,
//!     tracknode_core::time::MonotonicClock::new(),
//!     SchedulerConfig::default(),
//! );
//! // Returns only on a fatal condition; the caller power-cycles the board.
//! let fatal = scheduler.run();
//! # let _ = fatal;
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod errors;
pub mod hal;
pub mod motion;
pub mod provision;
pub mod scheduler;
pub mod settings;
pub mod telemetry;
pub mod time;

// Public API
pub use client::{AttributeSet, DeviceClient, RpcRequest};
pub use errors::{FatalError, SensorError};
pub use motion::MotionFilter;
pub use scheduler::{SchedulerConfig, TelemetryScheduler};
pub use telemetry::TelemetryFrame;

/// Crate version, reported in the device attributes at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
