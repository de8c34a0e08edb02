//! Core transport traits bound to the shared AT bus.
//!
//! One UART serves the receiver, the cellular stack, the MQTT session and
//! the modem clock; each binding borrows the bus through a `RefCell` owned
//! by the control task (single-threaded access, no locking needed).

pub mod at;

use core::cell::RefCell;
use core::time::Duration;

use alloc::string::ToString;

use chrono::NaiveDate;
use embassy_time::Instant;

use tracker_core::clock::{MIN_VALID_EPOCH, TimeSource, WallClock};
use tracker_core::gnss::StartMode;
use tracker_core::link::{
    GnssLink, InboundMessage, ModemLink, NetAttachError, NetAttachInfo, RawSentence, SessionLink,
};

use at::AtBus;

type SharedBus<'d> = RefCell<AtBus<'d>>;

const SHORT_CMD_TIMEOUT: Duration = Duration::from_secs(2);
const POWER_CMD_TIMEOUT: Duration = Duration::from_secs(5);

/// GNSS receiver control over the AT bus.
pub struct GnssAt<'a, 'd> {
    bus: &'a SharedBus<'d>,
    powered: bool,
}

impl<'a, 'd> GnssAt<'a, 'd> {
    pub fn new(bus: &'a SharedBus<'d>) -> Self {
        Self {
            bus,
            powered: false,
        }
    }
}

const fn start_command(mode: StartMode) -> &'static str {
    match mode {
        StartMode::Hot => "AT+CGNSHOT",
        StartMode::Warm => "AT+CGNSWARM",
        StartMode::Unknown | StartMode::Cold => "AT+CGNSCOLD",
    }
}

impl GnssLink for GnssAt<'_, '_> {
    fn power_on(&mut self, mode: StartMode) -> bool {
        if self.powered {
            return true;
        }
        let mut bus = self.bus.borrow_mut();

        // Output format before power-up; harmless if the module ignores it.
        bus.command_ok("AT+CGNSCFG=0", SHORT_CMD_TIMEOUT);
        if !bus.command_ok("AT+CGNSPWR=1", POWER_CMD_TIMEOUT) {
            return false;
        }
        bus.command_ok(start_command(mode), SHORT_CMD_TIMEOUT);
        bus.command_ok("AT+CGNSSEQ=RMC", SHORT_CMD_TIMEOUT);

        self.powered = true;
        true
    }

    fn power_off(&mut self) -> bool {
        if !self.powered {
            return true;
        }
        let ok = self
            .bus
            .borrow_mut()
            .command_ok("AT+CGNSPWR=0", POWER_CMD_TIMEOUT);
        self.powered = false;
        ok
    }

    fn poll_once(&mut self) -> Option<RawSentence> {
        let line = self
            .bus
            .borrow_mut()
            .command_line("AT+CGNSINF", "+CGNSINF:", SHORT_CMD_TIMEOUT)?;

        let mut sentence = RawSentence::new();
        for ch in line.as_str().chars().take(sentence.capacity()) {
            let _ = sentence.push(ch);
        }
        Some(sentence)
    }
}

/// Cellular data-link control over the AT bus.
pub struct ModemAt<'a, 'd> {
    bus: &'a SharedBus<'d>,
}

impl<'a, 'd> ModemAt<'a, 'd> {
    pub fn new(bus: &'a SharedBus<'d>) -> Self {
        Self { bus }
    }

    fn registered(bus: &mut AtBus<'_>) -> bool {
        let Some(line) = bus.command_line("AT+CEREG?", "+CEREG:", SHORT_CMD_TIMEOUT) else {
            return false;
        };
        line.as_str().ends_with(",1") || line.as_str().ends_with(",5")
    }

    fn signal_quality(bus: &mut AtBus<'_>) -> i16 {
        bus.command_line("AT+CSQ", "+CSQ:", SHORT_CMD_TIMEOUT)
            .and_then(|line| {
                let rest = line.as_str().strip_prefix("+CSQ:")?.trim().to_string();
                rest.split(',').next()?.parse::<i16>().ok()
            })
            .unwrap_or(-1)
    }
}

impl ModemLink for ModemAt<'_, '_> {
    fn radio_on(&mut self) -> bool {
        self.bus
            .borrow_mut()
            .command_ok("AT+CFUN=1", POWER_CMD_TIMEOUT)
    }

    fn radio_off(&mut self) -> bool {
        // A refused CFUN=0 is not critical between communication windows.
        self.bus
            .borrow_mut()
            .command_ok("AT+CFUN=0", POWER_CMD_TIMEOUT);
        true
    }

    fn connect_data(
        &mut self,
        apn: &str,
        registration_timeout: Duration,
        attach_timeout: Duration,
    ) -> Result<NetAttachInfo, NetAttachError> {
        let mut bus = self.bus.borrow_mut();

        if !bus.command_ok("AT", SHORT_CMD_TIMEOUT) && !bus.command_ok("AT", SHORT_CMD_TIMEOUT) {
            return Err(NetAttachError::NoModem);
        }

        let mut cmd = heapless::String::<128>::new();
        let _ = core::fmt::Write::write_fmt(
            &mut cmd,
            format_args!("AT+CGDCONT=1,\"IP\",\"{apn}\""),
        );
        bus.command_ok(cmd.as_str(), POWER_CMD_TIMEOUT);

        cmd.clear();
        let _ =
            core::fmt::Write::write_fmt(&mut cmd, format_args!("AT+CNCFG=0,1,\"{apn}\""));
        bus.command_ok(cmd.as_str(), POWER_CMD_TIMEOUT);

        bus.command_ok("AT+CFUN=1", POWER_CMD_TIMEOUT);

        let reg_deadline = Instant::now()
            + embassy_time::Duration::from_millis(
                u64::try_from(registration_timeout.as_millis()).unwrap_or(u64::MAX),
            );
        while !Self::registered(&mut bus) {
            if Instant::now() >= reg_deadline {
                return Err(NetAttachError::RegistrationTimeout);
            }
            embassy_time::block_for(embassy_time::Duration::from_millis(1_000));
        }

        if !bus.command_ok("AT+CNACT=0,1", attach_timeout) {
            return Err(NetAttachError::DataAttachFailed);
        }

        let mut info = NetAttachInfo::default();
        if let Some(line) = bus.command_line("AT+CNACT?", "+CNACT:", SHORT_CMD_TIMEOUT) {
            let text = line.as_str();
            if let (Some(open), Some(close)) = (text.find('"'), text.rfind('"'))
                && close > open
            {
                let _ = info.ip.push_str(&text[open + 1..close]);
            }
        }
        info.signal_quality = Self::signal_quality(&mut bus);
        Ok(info)
    }
}

/// MQTT session over the module's built-in client.
pub struct SessionAt<'a, 'd> {
    bus: &'a SharedBus<'d>,
    broker: &'static str,
    client_id: &'static str,
    connected: bool,
}

impl<'a, 'd> SessionAt<'a, 'd> {
    pub fn new(bus: &'a SharedBus<'d>, broker: &'static str, client_id: &'static str) -> Self {
        Self {
            bus,
            broker,
            client_id,
            connected: false,
        }
    }

    fn parse_urc(line: &str) -> Option<InboundMessage> {
        // +SMSUB: "topic","payload"
        let rest = line.strip_prefix("+SMSUB:")?.trim();
        let mut parts = rest.splitn(2, ',');
        let topic = parts.next()?.trim().trim_matches('"');
        let payload = parts.next()?.trim().trim_matches('"');
        Some(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
    }
}

impl SessionLink for SessionAt<'_, '_> {
    fn connect(&mut self) -> bool {
        let mut bus = self.bus.borrow_mut();

        let mut cmd = heapless::String::<160>::new();
        let _ = core::fmt::Write::write_fmt(
            &mut cmd,
            format_args!("AT+SMCONF=\"URL\",\"{}\"", self.broker),
        );
        bus.command_ok(cmd.as_str(), SHORT_CMD_TIMEOUT);

        cmd.clear();
        let _ = core::fmt::Write::write_fmt(
            &mut cmd,
            format_args!("AT+SMCONF=\"CLIENTID\",\"{}\"", self.client_id),
        );
        bus.command_ok(cmd.as_str(), SHORT_CMD_TIMEOUT);
        bus.command_ok("AT+SMCONF=\"KEEPTIME\",30", SHORT_CMD_TIMEOUT);

        self.connected = bus.command_ok("AT+SMCONN", Duration::from_secs(15));
        self.connected
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        if !self.connected {
            return false;
        }
        let mut cmd = heapless::String::<160>::new();
        let _ = core::fmt::Write::write_fmt(
            &mut cmd,
            format_args!(
                "AT+SMPUB=\"{}\",{},1,{}",
                topic,
                payload.len(),
                u8::from(retain)
            ),
        );
        self.bus
            .borrow_mut()
            .command_payload(cmd.as_str(), payload.as_bytes(), Duration::from_secs(8))
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let mut cmd = heapless::String::<160>::new();
        let _ = core::fmt::Write::write_fmt(
            &mut cmd,
            format_args!("AT+SMSUB=\"{topic}\",1"),
        );
        self.bus
            .borrow_mut()
            .command_ok(cmd.as_str(), SHORT_CMD_TIMEOUT)
    }

    fn service(&mut self) -> Option<InboundMessage> {
        if !self.connected {
            return None;
        }
        let line = self.bus.borrow_mut().poll_urc()?;
        Self::parse_urc(line.as_str())
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.bus
                .borrow_mut()
                .command_ok("AT+SMDISC", SHORT_CMD_TIMEOUT);
            self.connected = false;
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Wall clock synchronized from the modem's network time (`AT+CCLK?`).
pub struct ModemClock<'a, 'd> {
    bus: &'a SharedBus<'d>,
    base_epoch: u32,
    synced_at: Option<Instant>,
    source: TimeSource,
}

impl<'a, 'd> ModemClock<'a, 'd> {
    pub fn new(bus: &'a SharedBus<'d>) -> Self {
        Self {
            bus,
            base_epoch: 0,
            synced_at: None,
            source: TimeSource::None,
        }
    }

    /// Parses `yy/MM/dd,hh:mm:ss±zz` (zz in quarter hours) to epoch UTC.
    fn parse_cclk(text: &str) -> Option<u32> {
        let bytes = text.as_bytes();
        if bytes.len() < 20 {
            return None;
        }

        let num = |range: core::ops::Range<usize>| text.get(range)?.parse::<u32>().ok();
        let year = 2_000 + num(0..2)?;
        let month = num(3..5)?;
        let day = num(6..8)?;
        let hour = num(9..11)?;
        let minute = num(12..14)?;
        let second = num(15..17)?;
        let sign = *bytes.get(17)?;
        let quarters = num(18..20)?;

        let date = NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)?;
        let local = date.and_hms_opt(hour, minute, second)?;
        let offset_s = i64::from(quarters) * 15 * 60;
        let offset_s = if sign == b'-' { -offset_s } else { offset_s };
        let epoch = local.and_utc().timestamp() - offset_s;

        let epoch = u32::try_from(epoch).ok()?;
        (epoch >= MIN_VALID_EPOCH).then_some(epoch)
    }
}

impl WallClock for ModemClock<'_, '_> {
    fn epoch_utc(&self) -> u32 {
        match self.synced_at {
            Some(synced_at) => {
                let elapsed = Instant::now().saturating_duration_since(synced_at);
                self.base_epoch
                    .saturating_add(u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX))
            }
            None => 0,
        }
    }

    fn source(&self) -> TimeSource {
        self.source
    }

    fn sync(&mut self) -> bool {
        let line = self
            .bus
            .borrow_mut()
            .command_line("AT+CCLK?", "+CCLK:", SHORT_CMD_TIMEOUT);
        let Some(line) = line else {
            return false;
        };

        let text = line.as_str();
        let Some(open) = text.find('"') else {
            return false;
        };
        let Some(close) = text.rfind('"') else {
            return false;
        };
        if close <= open {
            return false;
        }

        match Self::parse_cclk(&text[open + 1..close]) {
            Some(epoch) => {
                self.base_epoch = epoch;
                self.synced_at = Some(Instant::now());
                self.source = TimeSource::Modem;
                true
            }
            None => false,
        }
    }
}
