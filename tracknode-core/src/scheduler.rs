//! Adaptive telemetry scheduler
//!
//! ## Overview
//!
//! The scheduler is the device's main loop. Each poll tick it reads the
//! ignition and SOS inputs, watches the cloud link, and decides between
//! staying idle, forcing an out-of-band send, or performing a scheduled
//! send. Frames are assembled from the motion filter, the GNSS fix and the
//! power rails, then published best-effort: a failed publish drops the
//! frame, it is never re-queued.
//!
//! ## Cadence policy
//!
//! Three interacting periods govern scheduled sends:
//!
//! - **Short period** (`gps_period`, 10 s): position and speed while the
//!   ignition is on.
//! - **Long period** (`update_factor` × short, 60 s): adds environment and
//!   power fields - battery, backup voltage, temperature, sigma, pitch,
//!   roll, and the fix-quality extras.
//! - **Dormant period** (`no_ignition_period`, 5 min): replaces both while
//!   the ignition is off; dormant sends always carry the long field set.
//!
//! An edge on ignition or SOS overrides every timer and forces an immediate
//! send carrying the changed field(s). Forced sends also carry the long
//! field set.
//!
//! ## Link watchdog
//!
//! On an observed disconnect the scheduler arms a grace deadline
//! (`offline_grace`, 60 s). Recovery before the deadline clears it; expiry
//! is fatal and [`TelemetryScheduler::run`] returns the error - restarting
//! the device is the caller's job, there is no in-process recovery.
//!
//! The decision logic lives in [`TelemetryScheduler::step`], which takes an
//! explicit "now" so tests can replay whole scenarios on a fixed clock.

use std::mem;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::client::DeviceClient;
use crate::errors::FatalError;
use crate::hal::{GnssReceiver, ModemClock, VehicleIo};
use crate::motion::MotionSource;
use crate::telemetry::TelemetryFrame;
use crate::time::{TimeSource, Timestamp};

/// Tuning knobs of the telemetry loop.
///
/// Defaults replicate the production firmware constants; setters follow the
/// builder style for bench overrides.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Input poll tick.
    pub poll_interval: Duration,
    /// Short reporting period (position/speed) while the ignition is on.
    pub gps_period: Duration,
    /// Long period as a multiple of the short one.
    pub update_factor: u32,
    /// Reporting period while the ignition is off.
    pub no_ignition_period: Duration,
    /// How long a dead link is tolerated before the condition is fatal.
    pub offline_grace: Duration,
    /// Fixes with HDOP at or above this never contribute a position.
    pub hdop_limit: f64,
    /// Modem RTC years below this mean "clock never set"; such timestamps
    /// are discarded rather than sent.
    pub min_clock_year: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            gps_period: Duration::from_secs(10),
            update_factor: 6,
            no_ignition_period: Duration::from_secs(300),
            offline_grace: Duration::from_secs(60),
            hdop_limit: 2.5,
            min_clock_year: 2019,
        }
    }
}

impl SchedulerConfig {
    /// Set the short reporting period.
    pub fn gps_period(mut self, period: Duration) -> Self {
        self.gps_period = period;
        self
    }

    /// Set the dormant (ignition off) reporting period.
    pub fn no_ignition_period(mut self, period: Duration) -> Self {
        self.no_ignition_period = period;
        self
    }

    /// Set the disconnect grace window.
    pub fn offline_grace(mut self, grace: Duration) -> Self {
        self.offline_grace = grace;
        self
    }

    /// Set the input poll tick.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// What a single `step` did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// No cadence boundary, no edge: nothing sent.
    Idle,
    /// A frame was assembled and a publish attempted.
    Sent(SendReport),
}

/// Details of one send attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReport {
    /// The send was forced by an edge or the dormant cadence, not the
    /// short-period timer.
    pub forced: bool,
    /// The frame carried the long-period field set.
    pub long_cycle: bool,
    /// Whether the transport accepted the frame.
    pub published: bool,
    /// Timestamp stamped on the frame, epoch milliseconds.
    pub ts: Option<Timestamp>,
    /// Number of fields in the published frame.
    pub fields: usize,
}

/// The free-running telemetry control loop.
pub struct TelemetryScheduler<C, M, B, G, R, T> {
    config: SchedulerConfig,
    client: C,
    motion: M,
    io: B,
    gnss: G,
    modem: R,
    clock: T,
    frame: TelemetryFrame,
    counter: u64,
    last_send: Option<Timestamp>,
    ignition: Option<bool>,
    sos: Option<bool>,
    connected: bool,
    offline_deadline: Option<Timestamp>,
}

impl<C, M, B, G, R, T> TelemetryScheduler<C, M, B, G, R, T>
where
    C: DeviceClient,
    M: MotionSource,
    B: VehicleIo,
    G: GnssReceiver,
    R: ModemClock,
    T: TimeSource,
{
    /// Assemble the loop around its collaborators. The client is assumed
    /// connected; the first step always sends (both inputs register an edge
    /// against the unknown initial state).
    pub fn new(client: C, motion: M, io: B, gnss: G, modem: R, clock: T, config: SchedulerConfig) -> Self {
        Self {
            config,
            client,
            motion,
            io,
            gnss,
            modem,
            clock,
            frame: TelemetryFrame::new(),
            counter: 0,
            last_send: None,
            ignition: None,
            sos: None,
            connected: true,
            offline_deadline: None,
        }
    }

    /// The underlying device client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run forever, or until a fatal condition ends the loop.
    pub fn run(&mut self) -> Result<(), FatalError> {
        // Drop vibration accumulated before the loop existed, so the first
        // frame reports the first real interval.
        self.motion.sigma();

        loop {
            thread::sleep(self.config.poll_interval);
            let now = self.clock.now();
            self.step(now)?;
        }
    }

    /// One decision tick at time `now` (milliseconds).
    pub fn step(&mut self, now: Timestamp) -> Result<StepOutcome, FatalError> {
        let ignition = self.io.ignition();
        let sos = self.io.sos();
        let mut forced = false;

        // Edges override every timer; the changed field is staged right
        // away so it is present even on an otherwise short frame.
        if self.sos != Some(sos) {
            self.frame.set_flag("sos", sos);
            forced = true;
        }
        if self.ignition != Some(ignition) {
            self.frame.set_flag("ignition", ignition);
            forced = true;
        }
        self.sos = Some(sos);
        self.ignition = Some(ignition);

        self.watch_link(now)?;

        if !forced {
            let period = if ignition {
                self.config.gps_period
            } else {
                self.config.no_ignition_period
            };
            if !self.cadence_due(now, period) {
                return Ok(StepOutcome::Idle);
            }
            // Dormant sends happen rarely; give them the full field set.
            if !ignition {
                forced = true;
            }
        }

        let long_cycle = forced || self.counter % u64::from(self.config.update_factor) == 0;
        let ts = self.assemble(ignition, sos, long_cycle);

        self.counter += 1;
        self.last_send = Some(now);

        let frame = mem::take(&mut self.frame);
        info!(
            "publishing frame #{} ({} fields, ts {:?})",
            self.counter,
            frame.len(),
            ts
        );
        let published = self.client.publish_telemetry(&frame, ts);
        if !published {
            // Best-effort by design: the frame is dropped, not re-queued.
            warn!("telemetry publish failed, dropping {} fields", frame.len());
        }

        Ok(StepOutcome::Sent(SendReport {
            forced,
            long_cycle,
            published,
            ts,
            fields: frame.len(),
        }))
    }

    /// Track the link and enforce the grace deadline.
    fn watch_link(&mut self, now: Timestamp) -> Result<(), FatalError> {
        let online = self.client.is_connected();
        if self.connected && !online {
            self.connected = false;
            self.offline_deadline = Some(now + self.config.offline_grace.as_millis() as u64);
            warn!("cloud link lost, grace deadline armed");
        } else if !self.connected && online {
            self.connected = true;
            self.offline_deadline = None;
            info!("cloud link recovered");
        }

        if !self.connected {
            if let Some(deadline) = self.offline_deadline {
                if now > deadline {
                    let grace = self.config.offline_grace.as_millis() as u64;
                    return Err(FatalError::OfflineTimeout {
                        offline_ms: grace + (now - deadline),
                    });
                }
            }
        }
        Ok(())
    }

    fn cadence_due(&self, now: Timestamp, period: Duration) -> bool {
        let Some(last) = self.last_send else {
            return true; // never sent: due immediately
        };
        let period_ms = period.as_millis() as u64;
        let poll_ms = self.config.poll_interval.as_millis() as u64;
        // The poll tick is subtracted so a boundary is never missed by one
        // tick of sleep jitter.
        now.saturating_sub(last) >= period_ms.saturating_sub(poll_ms)
    }

    /// Fill the frame for this send and pick the timestamp to stamp it with.
    fn assemble(&mut self, ignition: bool, sos: bool, long_cycle: bool) -> Option<Timestamp> {
        self.frame.set_flag("ignition", ignition);
        self.frame.set_flag("sos", sos);

        if long_cycle {
            if self.io.battery_backup() {
                // Sentinel: charger state is unknowable on backup power,
                // and main battery voltage would be meaningless.
                self.frame.set_int("charger", -1);
            } else {
                self.frame.set("battery", self.io.main_voltage(), 3);
                self.frame
                    .set_int("charger", self.io.charger_status().code());
            }
            self.frame.set("backup", self.io.backup_voltage(), 3);
            match self.motion.temperature() {
                Ok(t) => self.frame.set("temperature", f64::from(t), 2),
                Err(e) => debug!("temperature read failed: {e}"),
            }
            self.frame.set("sigma", f64::from(self.motion.sigma()), 3);
            let (pitch, roll) = self.motion.pitch_roll();
            self.frame.set("pitch", f64::from(pitch), 1);
            self.frame.set("roll", f64::from(roll), 1);
        }

        let mut ts = self.modem.rtc();
        let mut fix_ts = false;

        if let Some(fix) = self.gnss.fix() {
            // Positions are only worth transmitting when accurate.
            if fix.hdop < self.config.hdop_limit {
                self.frame.set("latitude", fix.latitude, 6);
                self.frame.set("longitude", fix.longitude, 6);
                self.frame.set("speed", fix.speed, 1);
                if long_cycle {
                    self.frame.set("altitude", fix.altitude, 1);
                    self.frame.set("COG", fix.course, 1);
                }
            }
            if long_cycle {
                self.frame.set_int("nsat", i64::from(fix.satellites));
                self.frame.set("HDOP", fix.hdop, 2);
            }
            if let Some(t) = fix.timestamp {
                ts = Some(t);
                fix_ts = true;
            }
        }

        // Without a fix timestamp, a modem clock that was never set (it
        // boots in the past) must not stamp the frame at all.
        if !fix_ts {
            if let Some(t) = &ts {
                if t.year < self.config.min_clock_year {
                    ts = None;
                }
            }
        }

        ts.map(|t| t.to_unix_ms())
    }
}
