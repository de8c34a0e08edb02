//! Host transcript runner for the tracker control core.
//!
//! Drives the orchestrator against scripted collaborators on a simulated
//! millisecond clock and prints everything that crosses the transports.
//! Two scenarios: a parked reporting cycle and an armed intrusion episode.

mod sim;

use std::env;
use std::process;

use sim::{SimClock, SimGnss, SimModem, SimSession};

use tracker_core::cycle::{CycleConfig, Orchestrator};
use tracker_core::diag::DiagId;
use tracker_core::instant::MillisInstant;
use tracker_core::motion::{SenseCell, SensorId};
use tracker_core::profiles::ProfileId;
use tracker_core::telemetry::topics;

static SENSE: SenseCell = SenseCell::new();

#[derive(Copy, Clone, Eq, PartialEq)]
enum Scenario {
    Parked,
    Armed,
}

impl Scenario {
    fn from_tag(tag: &str) -> Result<Self, String> {
        match tag.to_ascii_lowercase().as_str() {
            "parked" => Ok(Scenario::Parked),
            "armed" => Ok(Scenario::Armed),
            other => Err(format!("unknown scenario `{other}`")),
        }
    }
}

fn main() {
    let scenario = match env::args().nth(1).as_deref() {
        None => Scenario::Parked,
        Some(tag) => Scenario::from_tag(tag).unwrap_or_else(|err| {
            eprintln!("{err}");
            eprintln!("Usage: tracker-emulator [parked|armed]");
            process::exit(2);
        }),
    };

    match scenario {
        Scenario::Parked => run_parked(),
        Scenario::Armed => run_armed(),
    }
}

struct Transcript {
    last_step: &'static str,
    last_diag: Option<DiagId>,
}

impl Transcript {
    fn new() -> Self {
        Self {
            last_step: "",
            last_diag: None,
        }
    }

    fn observe<G, M, S, C>(
        &mut self,
        now_ms: u64,
        orch: &Orchestrator<'static, MillisInstant, G, M, S, C>,
    ) where
        G: tracker_core::link::GnssLink,
        M: tracker_core::link::ModemLink,
        S: tracker_core::link::SessionLink,
        C: tracker_core::clock::WallClock,
    {
        let step = orch.step().label();
        if step != self.last_step {
            println!("t={now_ms:>9}ms step {step}");
            self.last_step = step;
        }
        for record in orch.diag().since(self.last_diag) {
            println!("  [diag] {}", record.event);
            self.last_diag = Some(record.id);
        }
    }
}

fn run_parked() {
    println!("=== parked reporting cycle ===");

    let session = SimSession::default();
    let mut orch = Orchestrator::new(
        SimGnss::new(3),
        SimModem::new(0),
        session.clone(),
        SimClock::unsynced(),
        &SENSE,
        ProfileId::Parked,
        CycleConfig::default(),
        MillisInstant::from_millis(0),
    );

    let mut transcript = Transcript::new();
    let mut now_ms = 0;
    while now_ms <= 40_000 {
        orch.tick(MillisInstant::from_millis(now_ms));
        transcript.observe(now_ms, &orch);
        now_ms += 100;
    }

    println!("---");
    println!(
        "published: {} position, {} alive, {} version",
        session.published_count(topics::POSITION),
        session.published_count(topics::ALIVE),
        session.published_count(topics::VERSION),
    );
    println!(
        "next communication at t={}ms",
        orch.next_comm_at().as_millis()
    );
}

fn run_armed() {
    println!("=== armed intrusion episode ===");

    let session = SimSession::default();
    let mut orch = Orchestrator::new(
        SimGnss::new(3),
        SimModem::new(0),
        session.clone(),
        SimClock::unsynced(),
        &SENSE,
        ProfileId::Armed,
        CycleConfig::default(),
        MillisInstant::from_millis(0),
    );

    let mut transcript = Transcript::new();
    let mut acked = false;
    let mut now_ms = 0;

    // Run 35 simulated minutes: trigger, episode, heartbeats, expiry.
    while now_ms <= 35 * 60 * 1_000 {
        // Fires before the boot communication is due, so the first cycle
        // of the episode skips GNSS entirely.
        if now_ms == 1_000 {
            println!("t={now_ms:>9}ms ** front motion sensor fires **");
            SENSE.record(SensorId::Front);
        }

        // The server acknowledges the intrusion report shortly after
        // seeing it.
        if !acked && session.published_count(topics::MOTION) == 1 && now_ms >= 3_000 {
            println!("t={now_ms:>9}ms ** server acknowledges event 1 **");
            session.inject(topics::MOTION_ACK, r#"{"type":"PIR_ACK","pir_event_id":1}"#);
            acked = true;
        }

        orch.tick(MillisInstant::from_millis(now_ms));
        transcript.observe(now_ms, &orch);
        now_ms += 100;
    }

    println!("---");
    println!(
        "published: {} motion, {} alive",
        session.published_count(topics::MOTION),
        session.published_count(topics::ALIVE),
    );
    println!("outbox pending: {}", orch.motion().pending());
}
