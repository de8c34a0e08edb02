//! Transport interfaces to the excluded collaborators.
//!
//! The orchestrator drives the receiver, the cellular modem and the
//! messaging session exclusively through these traits; firmware binds them
//! to the AT-command transport, the emulator to scripted simulators, and
//! the test suites to mocks. Implementations may block internally but must
//! stay bounded by the timeouts the caller passes in.

use alloc::string::String;
use core::time::Duration;

use crate::gnss::StartMode;

/// Maximum raw receiver sentence length the core will carry.
pub const MAX_SENTENCE_LEN: usize = 164;

/// One raw comma-separated receiver record.
pub type RawSentence = heapless::String<MAX_SENTENCE_LEN>;

/// Satellite receiver transport.
pub trait GnssLink {
    /// Powers the receiver with the requested warm-up strategy.
    fn power_on(&mut self, mode: StartMode) -> bool;

    /// Powers the receiver down.
    fn power_off(&mut self) -> bool;

    /// Fetches one raw sample line; `None` when nothing parseable was
    /// available this call.
    fn poll_once(&mut self) -> Option<RawSentence>;
}

/// Successful data-link attachment report.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetAttachInfo {
    pub ip: heapless::String<48>,
    pub signal_quality: i16,
}

/// Attachment failure classification surfaced by the modem collaborator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NetAttachError {
    /// No AT response from the module.
    NoModem,
    /// Network registration did not complete in time.
    RegistrationTimeout,
    /// Registered but the data bearer would not come up.
    DataAttachFailed,
}

impl core::fmt::Display for NetAttachError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NetAttachError::NoModem => f.write_str("no_at"),
            NetAttachError::RegistrationTimeout => f.write_str("net_timeout"),
            NetAttachError::DataAttachFailed => f.write_str("data_attach_failed"),
        }
    }
}

/// Cellular modem transport.
///
/// `connect_data` performs its own internal retries (including a full radio
/// power-cycle fallback) and is treated as an atomic, possibly-slow
/// operation; the orchestrator enforces only an outer deadline and calls it
/// once per tick until it succeeds or the deadline passes.
pub trait ModemLink {
    fn radio_on(&mut self) -> bool;

    fn radio_off(&mut self) -> bool;

    fn connect_data(
        &mut self,
        apn: &str,
        registration_timeout: Duration,
        attach_timeout: Duration,
    ) -> Result<NetAttachInfo, NetAttachError>;
}

/// Inbound message delivered by the session collaborator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Publish/subscribe messaging session.
pub trait SessionLink {
    fn connect(&mut self) -> bool;

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool;

    fn subscribe(&mut self, topic: &str) -> bool;

    /// Services the inbound channel, returning at most one queued message
    /// per call.
    fn service(&mut self) -> Option<InboundMessage>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Receiver transport that performs no hardware interaction.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopGnssLink;

impl GnssLink for NoopGnssLink {
    fn power_on(&mut self, _: StartMode) -> bool {
        true
    }

    fn power_off(&mut self) -> bool {
        true
    }

    fn poll_once(&mut self) -> Option<RawSentence> {
        None
    }
}

/// Modem transport that reports instant success without hardware.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopModemLink;

impl ModemLink for NoopModemLink {
    fn radio_on(&mut self) -> bool {
        true
    }

    fn radio_off(&mut self) -> bool {
        true
    }

    fn connect_data(
        &mut self,
        _: &str,
        _: Duration,
        _: Duration,
    ) -> Result<NetAttachInfo, NetAttachError> {
        Ok(NetAttachInfo::default())
    }
}

/// Session transport that accepts everything and delivers nothing.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopSessionLink {
    connected: bool,
}

impl SessionLink for NoopSessionLink {
    fn connect(&mut self) -> bool {
        self.connected = true;
        true
    }

    fn publish(&mut self, _: &str, _: &str, _: bool) -> bool {
        self.connected
    }

    fn subscribe(&mut self, _: &str) -> bool {
        self.connected
    }

    fn service(&mut self) -> Option<InboundMessage> {
        None
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
