//! End-to-end armed intrusion episode: sensor trigger, GNSS skip,
//! acknowledgment-gated delivery and the stay-awake window lifecycle.

mod common;

use common::{MockClock, MockGnss, MockModem, MockSession, PowerLog};

use std::cell::RefCell;
use std::rc::Rc;

use tracker_core::cycle::{CycleConfig, Orchestrator, Step};
use tracker_core::diag::DiagEvent;
use tracker_core::instant::MillisInstant;
use tracker_core::motion::{SenseCell, SensorId};
use tracker_core::profiles::ProfileId;
use tracker_core::telemetry::topics;

fn at(ms: u64) -> MillisInstant {
    MillisInstant::from_millis(ms)
}

struct Episode {
    orch: Orchestrator<'static, MillisInstant, MockGnss, MockModem, MockSession, MockClock>,
    session: MockSession,
    gnss: MockGnss,
}

fn start_episode(sense: &'static SenseCell) -> Episode {
    let power_log: PowerLog = Rc::new(RefCell::new(Vec::new()));
    let gnss = MockGnss::new(power_log.clone());
    let modem = MockModem::new(power_log);
    let session = MockSession::default();
    let clock = MockClock::unsynced();

    let orch = Orchestrator::new(
        gnss.clone(),
        modem,
        session.clone(),
        clock,
        sense,
        ProfileId::Armed,
        CycleConfig::default(),
        at(0),
    );

    Episode {
        orch,
        session,
        gnss,
    }
}

fn leak_sense() -> &'static SenseCell {
    Box::leak(Box::new(SenseCell::new()))
}

#[test]
fn single_front_trigger_reaches_the_broker_and_clears_on_ack() {
    let sense = leak_sense();
    let mut episode = start_episode(sense);

    // Front sensor fires once; the first event of the episode skips GNSS.
    sense.record(SensorId::Front);
    episode.orch.tick(at(100));
    assert_eq!(episode.orch.step().label(), "RADIO_ON");
    assert!(episode.gnss.state.borrow().start_modes.is_empty());

    episode.orch.tick(at(110)); // -> NET_ATTACH
    episode.orch.tick(at(120)); // attach ok -> SESSION_CONNECT
    episode.orch.tick(at(130)); // connect + subscribe -> PUBLISH
    episode.orch.tick(at(140)); // publish -> RECEIVE_WINDOW (held open)

    {
        let state = episode.session.state.borrow();
        assert!(state.subscriptions.contains(&topics::DOWNLINK.to_string()));
        assert!(state.subscriptions.contains(&topics::MOTION_ACK.to_string()));
    }

    let motion = episode.session.published_on(topics::MOTION);
    assert_eq!(motion.len(), 1);
    let payload: serde_json::Value = serde_json::from_str(&motion[0].payload).unwrap();
    assert_eq!(payload["pir_event_id"], 1);
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["src_mask"], 1);
    assert_eq!(payload["profile"], "ARMED");

    // Window stays open under the stay-awake window; event still pending.
    assert!(matches!(
        episode.orch.step(),
        Step::ReceiveWindow { deadline: None }
    ));
    assert!(episode.orch.motion().pending());

    // Server acknowledgment clears the outbox unconditionally.
    episode
        .session
        .push_inbound(topics::MOTION_ACK, r#"{"type":"PIR_ACK","pir_event_id":1}"#);
    episode.orch.tick(at(200));
    assert!(!episode.orch.motion().pending());
    assert!(
        episode
            .orch
            .diag()
            .oldest_first()
            .any(|record| record.event == DiagEvent::MotionAcked { event_id: 1 })
    );
}

#[test]
fn stay_awake_window_heartbeats_then_expires() {
    let sense = leak_sense();
    let mut episode = start_episode(sense);

    sense.record(SensorId::Front);
    episode.orch.tick(at(100)); // -> RADIO_ON, window opens until t+30 min
    episode.orch.tick(at(110));
    episode.orch.tick(at(120));
    episode.orch.tick(at(130));
    episode.orch.tick(at(140)); // -> RECEIVE_WINDOW, heartbeat due at 120_140

    episode
        .session
        .push_inbound(topics::MOTION_ACK, r#"{"pir_event_id":1}"#);
    episode.orch.tick(at(200));

    let alive_before = episode.session.published_on(topics::ALIVE).len();

    // Liveness heartbeats on the 2 min sub-interval while the window holds.
    episode.orch.tick(at(120_140));
    episode.orch.tick(at(240_140));
    let alive_after = episode.session.published_on(topics::ALIVE).len();
    assert_eq!(alive_after, alive_before + 2);
    assert_eq!(
        episode
            .orch
            .diag()
            .oldest_first()
            .filter(|record| record.event == DiagEvent::Heartbeat)
            .count(),
        2
    );

    // 30 minutes after the single trigger the window expires and the
    // session winds down.
    episode.orch.tick(at(1_800_100));
    assert_eq!(episode.orch.step().label(), "SESSION_DISCONNECT");
    assert!(!episode.session.state.borrow().connected);
    assert!(
        episode
            .orch
            .diag()
            .oldest_first()
            .any(|record| record.event == DiagEvent::StayAwakeExpired)
    );

    episode.orch.tick(at(1_800_110)); // -> RADIO_OFF
    episode.orch.tick(at(1_800_120)); // -> ARMED_WAIT
    assert_eq!(episode.orch.step().label(), "ARMED_WAIT");
}

#[test]
fn second_event_preempts_open_window_back_to_publish() {
    let sense = leak_sense();
    let mut episode = start_episode(sense);

    sense.record(SensorId::Front);
    episode.orch.tick(at(100));
    episode.orch.tick(at(110));
    episode.orch.tick(at(120));
    episode.orch.tick(at(130));
    episode.orch.tick(at(140)); // -> RECEIVE_WINDOW

    episode
        .session
        .push_inbound(topics::MOTION_ACK, r#"{"pir_event_id":1}"#);
    episode.orch.tick(at(200));

    // Front stays locked out for 60 s after its publish; the back sensor
    // fires, forms event 2 and preempts the window immediately.
    sense.record(SensorId::Back);
    episode.orch.tick(at(30_000));
    assert_eq!(episode.orch.step().label(), "PUBLISH");

    episode.orch.tick(at(30_010));
    let motion = episode.session.published_on(topics::MOTION);
    assert_eq!(motion.len(), 2);
    let payload: serde_json::Value = serde_json::from_str(&motion[1].payload).unwrap();
    assert_eq!(payload["pir_event_id"], 2);
    assert_eq!(payload["src_mask"], 2);
}

#[test]
fn unacked_event_waits_out_its_lockout_then_retransmits() {
    let sense = leak_sense();
    let mut episode = start_episode(sense);

    sense.record(SensorId::Front);
    episode.orch.tick(at(100));
    episode.orch.tick(at(110));
    episode.orch.tick(at(120));
    episode.orch.tick(at(130));
    episode.orch.tick(at(140)); // publish event 1, lockout until 60_140

    // No acknowledgment arrives. Inside the lockout the pending event is
    // not eligible, so the window just holds.
    episode.orch.tick(at(30_000));
    assert_eq!(episode.orch.step().label(), "RECEIVE_WINDOW");
    assert!(episode.orch.motion().pending());
    assert_eq!(episode.session.published_on(topics::MOTION).len(), 1);

    // Once the contributing sensor's lockout expires the same event
    // becomes eligible again and preempts back to publish.
    episode.orch.tick(at(60_140));
    assert_eq!(episode.orch.step().label(), "PUBLISH");
    episode.orch.tick(at(60_150));

    let motion = episode.session.published_on(topics::MOTION);
    assert_eq!(motion.len(), 2);
    let payload: serde_json::Value = serde_json::from_str(&motion[1].payload).unwrap();
    assert_eq!(payload["pir_event_id"], 1);
}
