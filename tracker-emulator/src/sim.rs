//! Scripted collaborator simulators for transcript runs.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tracker_core::clock::{MIN_VALID_EPOCH, TimeSource, WallClock};
use tracker_core::gnss::StartMode;
use tracker_core::link::{
    GnssLink, InboundMessage, ModemLink, NetAttachError, NetAttachInfo, RawSentence, SessionLink,
};

/// Receiver that needs a few polls before it produces a trustworthy fix,
/// emitting the module's placeholder coordinate while searching.
pub struct SimGnss {
    powered: bool,
    polls: u32,
    polls_until_fix: u32,
}

impl SimGnss {
    pub fn new(polls_until_fix: u32) -> Self {
        Self {
            powered: false,
            polls: 0,
            polls_until_fix,
        }
    }
}

fn sentence(text: &str) -> RawSentence {
    let mut out = RawSentence::new();
    out.push_str(text).expect("simulated sentence too long");
    out
}

impl GnssLink for SimGnss {
    fn power_on(&mut self, mode: StartMode) -> bool {
        self.powered = true;
        self.polls = 0;
        println!("  [gnss] power on ({})", mode.label());
        true
    }

    fn power_off(&mut self) -> bool {
        if self.powered {
            println!("  [gnss] power off");
        }
        self.powered = false;
        true
    }

    fn poll_once(&mut self) -> Option<RawSentence> {
        if !self.powered {
            return None;
        }
        self.polls += 1;
        if self.polls <= self.polls_until_fix {
            // Searching: placeholder position, no fix status, zero sats.
            return Some(sentence(
                "+CGNSINF: 1,0,,62.000000,15.000000,0.0,0.0,0.0,0,,500.0,,,,0,,,,,,",
            ));
        }
        // Slight jitter between consecutive samples, well inside the
        // stationary stability threshold.
        let jitter = f64::from(self.polls % 3) * 0.000_02;
        let line = format!(
            "+CGNSINF: 1,1,20251213192250.000,{:.6},{:.6},31.5,0.2,0.0,1,,1.3,1.6,1.0,,9,11,,,42,,",
            59.329_5 + jitter,
            18.068_5 + jitter,
        );
        Some(sentence(&line))
    }
}

/// Modem with a configurable number of failed attach attempts.
pub struct SimModem {
    radio_on: bool,
    failures_left: u32,
}

impl SimModem {
    pub fn new(failures: u32) -> Self {
        Self {
            radio_on: false,
            failures_left: failures,
        }
    }
}

impl ModemLink for SimModem {
    fn radio_on(&mut self) -> bool {
        if !self.radio_on {
            println!("  [modem] radio on");
        }
        self.radio_on = true;
        true
    }

    fn radio_off(&mut self) -> bool {
        if self.radio_on {
            println!("  [modem] radio off");
        }
        self.radio_on = false;
        true
    }

    fn connect_data(
        &mut self,
        apn: &str,
        _registration_timeout: Duration,
        _attach_timeout: Duration,
    ) -> Result<NetAttachInfo, NetAttachError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(NetAttachError::RegistrationTimeout);
        }
        println!("  [modem] data link up (apn={apn})");
        let mut info = NetAttachInfo::default();
        let _ = info.ip.push_str("100.64.12.7");
        info.signal_quality = 19;
        Ok(info)
    }
}

/// Broker session that records publishes and delivers scripted inbound
/// messages.
#[derive(Clone, Default)]
pub struct SimSession {
    pub state: Rc<RefCell<SessionState>>,
}

#[derive(Default)]
pub struct SessionState {
    pub connected: bool,
    pub inbound: VecDeque<InboundMessage>,
    pub published: Vec<(String, String)>,
}

impl SimSession {
    pub fn inject(&self, topic: &str, payload: &str) {
        self.state.borrow_mut().inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    pub fn published_count(&self, topic: &str) -> usize {
        self.state
            .borrow()
            .published
            .iter()
            .filter(|(published_topic, _)| published_topic == topic)
            .count()
    }
}

impl SessionLink for SimSession {
    fn connect(&mut self) -> bool {
        self.state.borrow_mut().connected = true;
        println!("  [mqtt] connected");
        true
    }

    fn publish(&mut self, topic: &str, payload: &str, _retain: bool) -> bool {
        if !self.state.borrow().connected {
            return false;
        }
        println!("  [mqtt] publish {topic} {payload}");
        self.state
            .borrow_mut()
            .published
            .push((topic.to_string(), payload.to_string()));
        true
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        println!("  [mqtt] subscribe {topic}");
        true
    }

    fn service(&mut self) -> Option<InboundMessage> {
        self.state.borrow_mut().inbound.pop_front()
    }

    fn disconnect(&mut self) {
        if self.state.borrow().connected {
            println!("  [mqtt] disconnect");
        }
        self.state.borrow_mut().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }
}

/// Wall clock that syncs on request, as the network collaborator would.
pub struct SimClock {
    epoch: u32,
    source: TimeSource,
}

impl SimClock {
    pub fn unsynced() -> Self {
        Self {
            epoch: 0,
            source: TimeSource::None,
        }
    }
}

impl WallClock for SimClock {
    fn epoch_utc(&self) -> u32 {
        self.epoch
    }

    fn source(&self) -> TimeSource {
        self.source
    }

    fn sync(&mut self) -> bool {
        if self.epoch < MIN_VALID_EPOCH {
            // 2025-12-13T19:22:50Z
            self.epoch = 1_765_653_770;
            self.source = TimeSource::Modem;
            println!("  [clock] synced from network");
        }
        true
    }
}
