//! Accelerometer low-pass filter and shock detector
//!
//! A background task samples the accelerometer on a fixed cadence and keeps
//! two derived quantities:
//!
//! - an exponentially smoothed gravity estimate per axis, from which pitch
//!   and roll are derived on demand;
//! - the peak squared deviation of the raw sample from the smoothed estimate
//!   since the last read ("sigma" once square-rooted), a crude vibration and
//!   mechanical-shock indicator.
//!
//! All access - the periodic tick and every reader - serializes through one
//! mutex. The lock is only ever held for a single sample or read, never
//! across the inter-tick sleep. Read errors inside a tick are counted and
//! swallowed; one bad sample must not stop the loop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, error};

use crate::errors::SensorError;
use crate::hal::Accelerometer;

/// Smoothing coefficient of the per-axis exponential moving average.
pub const SMOOTHING_ALPHA: f32 = 0.25;

/// Steady-state sampling period.
pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Raw samples discarded after start while the sensor's internal filters
/// settle.
pub const WARMUP_SAMPLES: u32 = 15;

/// Smoothed orientation estimate plus the pending shock peak.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct OrientationState {
    x: f32,
    y: f32,
    z: f32,
    peak: f32,
}

struct Inner<A> {
    accel: A,
    state: OrientationState,
    faults: u32,
    started: bool,
}

impl<A: Accelerometer> Inner<A> {
    /// One filter update: read a raw sample, fold it into the EMA, and grow
    /// the peak squared deviation. Sensor errors only bump the fault count.
    fn tick(&mut self) {
        match self.accel.acceleration() {
            Ok([x, y, z]) => {
                let s = &mut self.state;
                s.x = SMOOTHING_ALPHA * x + (1.0 - SMOOTHING_ALPHA) * s.x;
                s.y = SMOOTHING_ALPHA * y + (1.0 - SMOOTHING_ALPHA) * s.y;
                s.z = SMOOTHING_ALPHA * z + (1.0 - SMOOTHING_ALPHA) * s.z;

                let dx = x - s.x;
                let dy = y - s.y;
                let dz = z - s.z;
                let deviation = dx * dx + dy * dy + dz * dz;
                if deviation > s.peak {
                    s.peak = deviation;
                }
            }
            Err(e) => {
                self.faults += 1;
                debug!("accelerometer read failed: {e}");
            }
        }
    }
}

/// Shared handle to the filter state.
///
/// Cheap to clone; every clone reads and writes the same state, so the
/// scheduler can keep one handle while the background task owns another.
pub struct MotionFilter<A> {
    shared: Arc<Mutex<Inner<A>>>,
}

impl<A> Clone for MotionFilter<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: Accelerometer> MotionFilter<A> {
    /// Wrap a raw accelerometer. Nothing is sampled until
    /// [`MotionFilter::start`] (or, in tests, [`MotionFilter::tick_once`]).
    pub fn new(accel: A) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Inner {
                accel,
                state: OrientationState::default(),
                faults: 0,
                started: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<A>> {
        // A poisoned lock means a reader panicked mid-read; the state itself
        // is still a valid snapshot, so keep serving it.
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one filter update on the caller's thread.
    ///
    /// Exists for tests and simulations that drive the filter without the
    /// background task.
    pub fn tick_once(&self) {
        self.lock().tick();
    }

    /// Pitch and roll in degrees, derived from the smoothed gravity vector
    /// (z is the gravity axis): pitch = atan2(-x, sqrt(y² + z²)),
    /// roll = atan2(y, z).
    pub fn pitch_roll(&self) -> (f32, f32) {
        let inner = self.lock();
        let s = &inner.state;
        let pitch = (-s.x).atan2((s.y * s.y + s.z * s.z).sqrt()).to_degrees();
        let roll = s.y.atan2(s.z).to_degrees();
        (pitch, roll)
    }

    /// Die temperature, read under the same lock as the filter state.
    pub fn temperature(&self) -> Result<f32, SensorError> {
        self.lock().accel.temperature()
    }

    /// Root of the peak squared deviation since the previous call, and reset
    /// the peak - consume-on-read. Calling twice without an intervening tick
    /// therefore returns 0 the second time. Callers must read it at most
    /// once per reporting interval or they will under-report.
    pub fn sigma(&self) -> f32 {
        let mut inner = self.lock();
        let sigma = inner.state.peak.sqrt();
        inner.state.peak = 0.0;
        sigma
    }

    /// Number of sensor read failures swallowed by the tick loop.
    pub fn fault_count(&self) -> u32 {
        self.lock().faults
    }
}

impl<A: Accelerometer + Send + 'static> MotionFilter<A> {
    /// Seed the smoothed state from one raw sample and spawn the periodic
    /// sampling task. A second call is a no-op.
    pub fn start(&self) {
        {
            let mut inner = self.lock();
            if inner.started {
                return;
            }
            inner.started = true;
            if let Ok([x, y, z]) = inner.accel.acceleration() {
                inner.state.x = x;
                inner.state.y = y;
                inner.state.z = z;
            }
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("motion-filter".into())
            .spawn(move || {
                // Warm-up: burn the first samples while the sensor settles,
                // then drop whatever peak they produced. Readers block on
                // the lock for the duration, which is the point - nothing
                // should report orientation from an unsettled filter.
                {
                    let mut inner = shared.lock().unwrap_or_else(|e| e.into_inner());
                    for _ in 0..WARMUP_SAMPLES {
                        thread::sleep(TICK_INTERVAL);
                        let _ = inner.accel.acceleration();
                    }
                    inner.state.peak = 0.0;
                }

                loop {
                    shared.lock().unwrap_or_else(|e| e.into_inner()).tick();
                    thread::sleep(TICK_INTERVAL);
                }
            });
        if let Err(e) = spawned {
            error!("failed to spawn motion filter task: {e}");
        }
    }
}

/// Read-side view of the motion filter, as consumed by the scheduler.
///
/// Split out as a trait so scheduler tests can substitute canned readings.
pub trait MotionSource {
    /// See [`MotionFilter::sigma`]; consume-on-read.
    fn sigma(&self) -> f32;
    /// See [`MotionFilter::pitch_roll`].
    fn pitch_roll(&self) -> (f32, f32);
    /// See [`MotionFilter::temperature`].
    fn temperature(&self) -> Result<f32, SensorError>;
}

impl<A: Accelerometer> MotionSource for MotionFilter<A> {
    fn sigma(&self) -> f32 {
        MotionFilter::sigma(self)
    }

    fn pitch_roll(&self) -> (f32, f32) {
        MotionFilter::pitch_roll(self)
    }

    fn temperature(&self) -> Result<f32, SensorError> {
        MotionFilter::temperature(self)
    }
}
