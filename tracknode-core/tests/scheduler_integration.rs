//! Scenario tests for the telemetry scheduler
//!
//! Each test replays a timeline on a fixed clock and asserts on the frames
//! the fake client recorded. Times are in milliseconds; the default policy
//! constants apply (poll 200 ms, GPS period 10 s, long cycle 60 s, dormant
//! 300 s, grace 60 s).

mod common;

use common::{good_fix, FakeClient, FakeGnss, FakeIo, FakeModem, FakeMotion};

use tracknode_core::errors::FatalError;
use tracknode_core::scheduler::{SchedulerConfig, StepOutcome, TelemetryScheduler};
use tracknode_core::time::{FixedClock, TimeSource, UtcDateTime};

type Scheduler =
    TelemetryScheduler<FakeClient, FakeMotion, FakeIo, FakeGnss, FakeModem, FixedClock>;

struct Bench {
    client: FakeClient,
    io: FakeIo,
    gnss: FakeGnss,
    modem: FakeModem,
    clock: FixedClock,
    scheduler: Scheduler,
}

fn bench() -> Bench {
    let client = FakeClient::new();
    let io = FakeIo::new();
    let gnss = FakeGnss::new();
    let modem = FakeModem::new();
    let clock = FixedClock::new(0);
    let scheduler = TelemetryScheduler::new(
        client.clone(),
        FakeMotion::steady(),
        io.clone(),
        gnss.clone(),
        modem.clone(),
        clock.clone(),
        SchedulerConfig::default(),
    );
    Bench {
        client,
        io,
        gnss,
        modem,
        clock,
        scheduler,
    }
}

impl Bench {
    /// Step once at the clock's current time.
    fn step(&mut self) -> StepOutcome {
        self.scheduler.step(self.clock.now()).expect("unexpected fatal")
    }

    /// Advance the clock and step.
    fn step_at(&mut self, ms: u64) -> StepOutcome {
        self.clock.set(ms);
        self.step()
    }
}

fn sent(outcome: &StepOutcome) -> &tracknode_core::scheduler::SendReport {
    match outcome {
        StepOutcome::Sent(report) => report,
        StepOutcome::Idle => panic!("expected a send, got Idle"),
    }
}

#[test]
fn first_step_sends_a_full_frame() {
    let mut bench = bench();
    let outcome = bench.step();
    let report = sent(&outcome);
    assert!(report.forced, "unknown initial inputs must register as edges");
    assert!(report.long_cycle);
    assert!(report.published);

    let (frame, ts) = bench.client.last_published();
    assert_eq!(frame.get("ignition").unwrap().as_i64(), Some(0));
    assert_eq!(frame.get("sos").unwrap().as_i64(), Some(0));
    assert!(frame.contains("battery"));
    assert!(frame.contains("backup"));
    assert!(frame.contains("temperature"));
    assert!(frame.contains("sigma"));
    assert!(frame.contains("pitch"));
    assert!(frame.contains("roll"));
    assert_eq!(ts, None, "no modem clock, no fix: frame is unstamped");
}

#[test]
fn idle_between_cadence_boundaries() {
    let mut bench = bench();
    bench.io.set_ignition(true);
    bench.step(); // initial forced send
    assert_eq!(bench.step_at(200), StepOutcome::Idle);
    assert_eq!(bench.step_at(5_000), StepOutcome::Idle);
    // Boundary is reached one poll tick early by design.
    let outcome = bench.step_at(9_800);
    let report = sent(&outcome);
    assert!(!report.forced);
    assert_eq!(bench.client.published().len(), 2);
}

#[test]
fn ignition_edge_forces_out_of_band_send() {
    let mut bench = bench();
    bench.step(); // initial send at t=0
    assert_eq!(bench.step_at(200), StepOutcome::Idle);

    bench.io.set_ignition(true);
    let outcome = bench.step_at(400);
    let report = sent(&outcome);
    assert!(report.forced);
    let (frame, _) = bench.client.last_published();
    assert_eq!(frame.get("ignition").unwrap().as_i64(), Some(1));
}

#[test]
fn sos_edge_forces_send_with_sos_field() {
    let mut bench = bench();
    bench.io.set_ignition(true);
    bench.step();

    bench.io.set_sos(true);
    let outcome = bench.step_at(600);
    assert!(sent(&outcome).forced);
    let (frame, _) = bench.client.last_published();
    assert_eq!(frame.get("sos").unwrap().as_i64(), Some(1));

    // Releasing the button is an edge too.
    bench.io.set_sos(false);
    let outcome = bench.step_at(1_200);
    assert!(sent(&outcome).forced);
    let (frame, _) = bench.client.last_published();
    assert_eq!(frame.get("sos").unwrap().as_i64(), Some(0));
}

#[test]
fn long_cycle_every_sixth_scheduled_send() {
    let mut bench = bench();
    bench.io.set_ignition(true);
    let mut cycles = Vec::new();
    let mut t = 0;
    for _ in 0..8 {
        let outcome = bench.step_at(t);
        cycles.push(sent(&outcome).long_cycle);
        t += 10_000;
    }
    // Send 0 is the forced initial send; sends 1-5 are short; send 6 wraps
    // the counter back to the long set.
    assert_eq!(cycles, vec![true, false, false, false, false, false, true, false]);

    let (short_frame, _) = bench.client.published()[3].clone();
    assert!(!short_frame.contains("battery"));
    assert!(!short_frame.contains("sigma"));
    assert_eq!(short_frame.get("ignition").unwrap().as_i64(), Some(1));
}

#[test]
fn dormant_cadence_while_ignition_off() {
    let mut bench = bench();
    bench.step(); // initial send, ignition off
    assert_eq!(bench.step_at(10_000), StepOutcome::Idle);
    assert_eq!(bench.step_at(150_000), StepOutcome::Idle);

    let outcome = bench.step_at(299_800);
    let report = sent(&outcome);
    assert!(report.forced, "dormant sends carry the full field set");
    assert!(report.long_cycle);
}

#[test]
fn battery_backup_reports_charger_sentinel() {
    let mut bench = bench();
    bench.io.set_battery_backup(true);
    bench.step();

    let (frame, _) = bench.client.last_published();
    assert_eq!(frame.get("charger").unwrap().as_i64(), Some(-1));
    assert!(
        !frame.contains("battery"),
        "main battery voltage is meaningless on backup power"
    );
    assert!(frame.contains("backup"));
}

#[test]
fn poor_fix_withholds_position() {
    let mut bench = bench();
    let mut fix = good_fix();
    fix.hdop = 2.5; // at the limit: still rejected
    bench.gnss.set_fix(Some(fix));
    bench.step();

    let (frame, _) = bench.client.last_published();
    for field in ["latitude", "longitude", "speed", "altitude", "COG"] {
        assert!(!frame.contains(field), "{field} must not be sent");
    }
    // Fix quality itself is still reported on long cycles.
    assert_eq!(frame.get("nsat").unwrap().as_i64(), Some(9));
    assert_eq!(frame.get("HDOP").unwrap().as_f64(), Some(2.5));
}

#[test]
fn good_fix_adds_position_and_extras() {
    let mut bench = bench();
    bench.gnss.set_fix(Some(good_fix()));
    bench.step();

    let (frame, _) = bench.client.last_published();
    assert_eq!(frame.get("latitude").unwrap().as_f64(), Some(45.464205));
    assert_eq!(frame.get("longitude").unwrap().as_f64(), Some(9.189982));
    assert_eq!(frame.get("speed").unwrap().as_f64(), Some(48.3));
    assert_eq!(frame.get("altitude").unwrap().as_f64(), Some(122.3));
    assert_eq!(frame.get("COG").unwrap().as_f64(), Some(181.4));
}

#[test]
fn short_sends_omit_fix_extras() {
    let mut bench = bench();
    bench.io.set_ignition(true);
    bench.gnss.set_fix(Some(good_fix()));
    bench.step(); // forced long send
    let outcome = bench.step_at(10_000); // scheduled short send
    assert!(!sent(&outcome).long_cycle);

    let (frame, _) = bench.client.last_published();
    assert!(frame.contains("latitude"));
    assert!(frame.contains("speed"));
    for field in ["altitude", "COG", "nsat", "HDOP"] {
        assert!(!frame.contains(field), "{field} is long-cycle only");
    }
}

#[test]
fn stale_modem_clock_is_discarded() {
    let mut bench = bench();
    bench
        .modem
        .set_rtc(Some(UtcDateTime::new(2018, 12, 31, 23, 59, 59)));
    bench.step();
    let (_, ts) = bench.client.last_published();
    assert_eq!(ts, None, "a pre-2019 modem clock was never set");
}

#[test]
fn plausible_modem_clock_stamps_the_frame() {
    let mut bench = bench();
    bench.modem.set_rtc(Some(UtcDateTime::new(2019, 1, 1, 0, 0, 0)));
    bench.step();
    let (_, ts) = bench.client.last_published();
    assert_eq!(ts, Some(1_546_300_800_000));
}

#[test]
fn fix_timestamp_overrides_modem_clock() {
    let mut bench = bench();
    // Modem clock wildly stale; the fix carries truth.
    bench.modem.set_rtc(Some(UtcDateTime::new(2015, 1, 1, 0, 0, 0)));
    let mut fix = good_fix();
    fix.timestamp = Some(UtcDateTime::new(2024, 6, 15, 12, 30, 45));
    bench.gnss.set_fix(Some(fix));
    bench.step();

    let (_, ts) = bench.client.last_published();
    assert_eq!(ts, Some(1_718_454_645_000));
}

#[test]
fn failed_publish_drops_the_frame() {
    let mut bench = bench();
    bench.client.set_publish_ok(false);
    let outcome = bench.step();
    assert!(!sent(&outcome).published);

    // Next send starts from a clean frame: same field count as a fresh
    // long frame, nothing carried over.
    bench.client.set_publish_ok(true);
    bench.io.set_ignition(true); // edge
    let outcome = bench.step_at(400);
    let report = sent(&outcome);
    assert!(report.published);
    let frames = bench.client.published();
    assert_eq!(frames[0].0.len(), frames[1].0.len());
}

#[test]
fn grace_deadline_expiry_is_fatal() {
    let mut bench = bench();
    bench.step(); // t=0, connected

    bench.client.set_connected(false);
    // Disconnect observed at t=1000: deadline at 61000.
    assert_eq!(bench.step_at(1_000), StepOutcome::Idle);
    bench.clock.set(61_000);
    assert!(bench.scheduler.step(61_000).is_ok(), "deadline is exclusive");

    bench.clock.set(61_001);
    let err = bench.scheduler.step(61_001).unwrap_err();
    assert!(matches!(err, FatalError::OfflineTimeout { .. }));
}

#[test]
fn recovery_before_deadline_clears_the_grace() {
    let mut bench = bench();
    bench.step();

    bench.client.set_connected(false);
    assert_eq!(bench.step_at(1_000), StepOutcome::Idle);

    bench.client.set_connected(true);
    assert_eq!(bench.step_at(60_000), StepOutcome::Idle);

    // Well past the original deadline: no fatal, the grace was cleared.
    bench.clock.set(120_000);
    assert!(bench.scheduler.step(120_000).is_ok());
}

#[test]
fn reconnect_restarts_the_grace_window() {
    let mut bench = bench();
    bench.step();

    bench.client.set_connected(false);
    assert_eq!(bench.step_at(1_000), StepOutcome::Idle);
    bench.client.set_connected(true);
    assert_eq!(bench.step_at(30_000), StepOutcome::Idle);

    // A second outage arms a fresh deadline from its own observation time.
    bench.client.set_connected(false);
    assert_eq!(bench.step_at(40_000), StepOutcome::Idle);
    assert!(bench.scheduler.step(100_000).is_ok());
    assert!(bench.scheduler.step(100_001).is_err());
}
