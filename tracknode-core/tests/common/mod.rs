//! Shared fakes for integration tests
//!
//! Every fake hands out `Clone` handles over shared interior state, so a
//! test can keep one handle for control/inspection while the scheduler owns
//! another.

#![allow(dead_code)] // each integration binary uses a subset

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use tracknode_core::client::{AttributeSet, DeviceClient, RpcHandler};
use tracknode_core::errors::SensorError;
use tracknode_core::hal::{ChargerStatus, GnssFix, GnssReceiver, ModemClock, VehicleIo};
use tracknode_core::motion::MotionSource;
use tracknode_core::telemetry::TelemetryFrame;
use tracknode_core::time::{Timestamp, UtcDateTime};

/// Recorded publish: the frame and the timestamp it was stamped with.
pub type PublishedFrame = (TelemetryFrame, Option<Timestamp>);

#[derive(Default)]
struct ClientState {
    connected: AtomicBool,
    publish_ok: AtomicBool,
    published: Mutex<Vec<PublishedFrame>>,
    attributes: Mutex<Option<AttributeSet>>,
    rpc_reply: Mutex<Option<Value>>,
    rpc_calls: Mutex<Vec<(String, Option<Value>)>>,
}

/// In-memory device client recording everything the scheduler publishes.
#[derive(Clone)]
pub struct FakeClient(Arc<ClientState>);

impl FakeClient {
    pub fn new() -> Self {
        let state = ClientState::default();
        state.connected.store(true, Ordering::SeqCst);
        state.publish_ok.store(true, Ordering::SeqCst);
        Self(Arc::new(state))
    }

    pub fn set_connected(&self, connected: bool) {
        self.0.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_publish_ok(&self, ok: bool) {
        self.0.publish_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_attributes(&self, attributes: Option<AttributeSet>) {
        *self.0.attributes.lock().unwrap() = attributes;
    }

    pub fn set_rpc_reply(&self, reply: Option<Value>) {
        *self.0.rpc_reply.lock().unwrap() = reply;
    }

    pub fn published(&self) -> Vec<PublishedFrame> {
        self.0.published.lock().unwrap().clone()
    }

    pub fn last_published(&self) -> PublishedFrame {
        self.0
            .published
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("nothing published")
    }

    pub fn rpc_calls(&self) -> Vec<(String, Option<Value>)> {
        self.0.rpc_calls.lock().unwrap().clone()
    }
}

impl DeviceClient for FakeClient {
    fn connect(&mut self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }

    fn run(&mut self) {}

    fn set_rpc_handler(&mut self, _handler: RpcHandler) {}

    fn publish_telemetry(&self, frame: &TelemetryFrame, ts: Option<Timestamp>) -> bool {
        self.0.published.lock().unwrap().push((frame.clone(), ts));
        self.0.publish_ok.load(Ordering::SeqCst)
    }

    fn publish_attributes(&self, _attributes: &Value) -> bool {
        self.0.publish_ok.load(Ordering::SeqCst)
    }

    fn get_attributes(
        &self,
        _client_keys: Option<&str>,
        _shared_keys: Option<&str>,
        _timeout: Duration,
    ) -> Option<AttributeSet> {
        self.0.attributes.lock().unwrap().clone()
    }

    fn send_rpc_reply(&self, _id: u64, _result: &Value) -> bool {
        self.0.publish_ok.load(Ordering::SeqCst)
    }

    fn do_rpc_request(
        &self,
        method: &str,
        params: Option<Value>,
        _timeout: Duration,
    ) -> Option<Value> {
        self.0
            .rpc_calls
            .lock()
            .unwrap()
            .push((method.to_owned(), params));
        self.0.rpc_reply.lock().unwrap().clone()
    }
}

struct IoState {
    ignition: AtomicBool,
    sos: AtomicBool,
    backup: AtomicBool,
    main_voltage: Mutex<f64>,
    backup_voltage: Mutex<f64>,
    charger: Mutex<ChargerStatus>,
}

/// Scripted vehicle inputs and power rails.
#[derive(Clone)]
pub struct FakeIo(Arc<IoState>);

impl FakeIo {
    pub fn new() -> Self {
        let state = IoState {
            ignition: AtomicBool::new(false),
            sos: AtomicBool::new(false),
            backup: AtomicBool::new(false),
            main_voltage: Mutex::new(12.6),
            backup_voltage: Mutex::new(3.9),
            charger: Mutex::new(ChargerStatus::Idle),
        };
        Self(Arc::new(state))
    }

    pub fn set_ignition(&self, on: bool) {
        self.0.ignition.store(on, Ordering::SeqCst);
    }

    pub fn set_sos(&self, on: bool) {
        self.0.sos.store(on, Ordering::SeqCst);
    }

    pub fn set_battery_backup(&self, on: bool) {
        self.0.backup.store(on, Ordering::SeqCst);
    }

    pub fn set_charger(&self, status: ChargerStatus) {
        *self.0.charger.lock().unwrap() = status;
    }
}

impl VehicleIo for FakeIo {
    fn ignition(&mut self) -> bool {
        self.0.ignition.load(Ordering::SeqCst)
    }

    fn sos(&mut self) -> bool {
        self.0.sos.load(Ordering::SeqCst)
    }

    fn battery_backup(&mut self) -> bool {
        self.0.backup.load(Ordering::SeqCst)
    }

    fn main_voltage(&mut self) -> f64 {
        *self.0.main_voltage.lock().unwrap()
    }

    fn backup_voltage(&mut self) -> f64 {
        *self.0.backup_voltage.lock().unwrap()
    }

    fn charger_status(&mut self) -> ChargerStatus {
        *self.0.charger.lock().unwrap()
    }
}

/// GNSS receiver serving a settable fix.
#[derive(Clone)]
pub struct FakeGnss(Arc<Mutex<Option<GnssFix>>>);

impl FakeGnss {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub fn set_fix(&self, fix: Option<GnssFix>) {
        *self.0.lock().unwrap() = fix;
    }
}

impl GnssReceiver for FakeGnss {
    fn fix(&mut self) -> Option<GnssFix> {
        self.0.lock().unwrap().clone()
    }
}

/// Modem RTC serving a settable date-time.
#[derive(Clone)]
pub struct FakeModem(Arc<Mutex<Option<UtcDateTime>>>);

impl FakeModem {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub fn set_rtc(&self, dt: Option<UtcDateTime>) {
        *self.0.lock().unwrap() = dt;
    }
}

impl ModemClock for FakeModem {
    fn rtc(&mut self) -> Option<UtcDateTime> {
        *self.0.lock().unwrap()
    }
}

/// Motion source with canned readings.
#[derive(Clone)]
pub struct FakeMotion {
    pub sigma: f32,
    pub pitch: f32,
    pub roll: f32,
    pub temperature: Result<f32, SensorError>,
}

impl FakeMotion {
    pub fn steady() -> Self {
        Self {
            sigma: 0.042,
            pitch: 1.5,
            roll: -0.5,
            temperature: Ok(23.5),
        }
    }
}

impl MotionSource for FakeMotion {
    fn sigma(&self) -> f32 {
        self.sigma
    }

    fn pitch_roll(&self) -> (f32, f32) {
        (self.pitch, self.roll)
    }

    fn temperature(&self) -> Result<f32, SensorError> {
        self.temperature
    }
}

/// A fix good enough to transmit, with no embedded timestamp.
pub fn good_fix() -> GnssFix {
    GnssFix {
        latitude: 45.4642049,
        longitude: 9.189982,
        altitude: 122.3,
        speed: 48.27,
        course: 181.44,
        satellites: 9,
        hdop: 0.9,
        timestamp: None,
    }
}
