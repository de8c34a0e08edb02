//! Scripted transport mocks shared by the integration suites.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tracker_core::clock::{MIN_VALID_EPOCH, TimeSource, WallClock};
use tracker_core::gnss::StartMode;
use tracker_core::link::{
    GnssLink, InboundMessage, ModemLink, NetAttachError, NetAttachInfo, RawSentence, SessionLink,
};

/// Builds a bounded raw sentence from a test literal.
pub fn sentence(text: &str) -> RawSentence {
    let mut out = RawSentence::new();
    out.push_str(text).expect("test sentence too long");
    out
}

/// Order-sensitive log of power transitions across both antenna users.
pub type PowerLog = Rc<RefCell<Vec<&'static str>>>;

#[derive(Default)]
pub struct GnssState {
    pub powered: bool,
    pub lines: VecDeque<String>,
    pub start_modes: Vec<StartMode>,
}

#[derive(Clone)]
pub struct MockGnss {
    pub state: Rc<RefCell<GnssState>>,
    pub power_log: PowerLog,
}

impl MockGnss {
    pub fn new(power_log: PowerLog) -> Self {
        Self {
            state: Rc::new(RefCell::new(GnssState::default())),
            power_log,
        }
    }

    pub fn queue_line(&self, line: &str) {
        self.state.borrow_mut().lines.push_back(line.to_string());
    }
}

impl GnssLink for MockGnss {
    fn power_on(&mut self, mode: StartMode) -> bool {
        let mut state = self.state.borrow_mut();
        state.powered = true;
        state.start_modes.push(mode);
        self.power_log.borrow_mut().push("gnss_on");
        true
    }

    fn power_off(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.powered {
            self.power_log.borrow_mut().push("gnss_off");
        }
        state.powered = false;
        true
    }

    fn poll_once(&mut self) -> Option<RawSentence> {
        let line = self.state.borrow_mut().lines.pop_front()?;
        Some(sentence(&line))
    }
}

#[derive(Default)]
pub struct ModemState {
    pub radio_on: bool,
    pub attach_script: VecDeque<Result<NetAttachInfo, NetAttachError>>,
    pub attach_calls: usize,
}

#[derive(Clone)]
pub struct MockModem {
    pub state: Rc<RefCell<ModemState>>,
    pub power_log: PowerLog,
}

impl MockModem {
    pub fn new(power_log: PowerLog) -> Self {
        Self {
            state: Rc::new(RefCell::new(ModemState::default())),
            power_log,
        }
    }

    /// Queues one attach outcome; an empty script attaches immediately.
    pub fn script_attach(&self, outcome: Result<NetAttachInfo, NetAttachError>) {
        self.state.borrow_mut().attach_script.push_back(outcome);
    }

    pub fn attach_calls(&self) -> usize {
        self.state.borrow().attach_calls
    }
}

fn default_attach() -> NetAttachInfo {
    let mut info = NetAttachInfo::default();
    info.ip.push_str("10.0.0.2").expect("ip literal fits");
    info.signal_quality = 17;
    info
}

impl ModemLink for MockModem {
    fn radio_on(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.radio_on {
            self.power_log.borrow_mut().push("radio_on");
        }
        state.radio_on = true;
        true
    }

    fn radio_off(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.radio_on {
            self.power_log.borrow_mut().push("radio_off");
        }
        state.radio_on = false;
        true
    }

    fn connect_data(
        &mut self,
        _apn: &str,
        _registration_timeout: Duration,
        _attach_timeout: Duration,
    ) -> Result<NetAttachInfo, NetAttachError> {
        let mut state = self.state.borrow_mut();
        state.attach_calls += 1;
        state
            .attach_script
            .pop_front()
            .unwrap_or_else(|| Ok(default_attach()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Default)]
pub struct SessionState {
    pub connected: bool,
    pub connects: usize,
    pub subscriptions: Vec<String>,
    pub published: Vec<Published>,
    pub inbound: VecDeque<InboundMessage>,
}

#[derive(Clone, Default)]
pub struct MockSession {
    pub state: Rc<RefCell<SessionState>>,
}

impl MockSession {
    pub fn push_inbound(&self, topic: &str, payload: &str) {
        self.state.borrow_mut().inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.borrow().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.state
            .borrow()
            .published
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }
}

impl SessionLink for MockSession {
    fn connect(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        state.connected = true;
        state.connects += 1;
        true
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return false;
        }
        state.published.push(Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        });
        true
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        self.state.borrow_mut().subscriptions.push(topic.to_string());
        true
    }

    fn service(&mut self) -> Option<InboundMessage> {
        self.state.borrow_mut().inbound.pop_front()
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }
}

#[derive(Default)]
pub struct ClockState {
    pub epoch: u32,
    pub source: TimeSource,
    pub syncs: usize,
}

#[derive(Clone, Default)]
pub struct MockClock {
    pub state: Rc<RefCell<ClockState>>,
}

impl MockClock {
    /// Clock that syncs successfully on first request.
    pub fn unsynced() -> Self {
        Self::default()
    }

    pub fn synced(epoch: u32) -> Self {
        let clock = Self::default();
        {
            let mut state = clock.state.borrow_mut();
            state.epoch = epoch;
            state.source = TimeSource::Ntp;
        }
        clock
    }
}

impl WallClock for MockClock {
    fn epoch_utc(&self) -> u32 {
        self.state.borrow().epoch
    }

    fn source(&self) -> TimeSource {
        self.state.borrow().source
    }

    fn sync(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        state.syncs += 1;
        if state.epoch < MIN_VALID_EPOCH {
            state.epoch = MIN_VALID_EPOCH + 1_000;
            state.source = TimeSource::Modem;
        }
        true
    }
}
