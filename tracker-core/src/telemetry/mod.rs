//! Typed uplink payloads and downlink command handling.
//!
//! Every outbound message kind has its own struct and serializer so field
//! names cannot drift between call sites, and the downlink side parses into
//! typed frames with the tolerant key handling the fleet relies on.

use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::clock::{WallClock, iso8601_utc};
use crate::gnss::{GnssFix, StartMode};
use crate::profiles::{ProfileConfig, ProfileId};

/// Stable device identity carried in every payload.
pub const DEVICE_ID: &str = "van_ellie";

/// Firmware revision advertised by the identity message.
pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Well-known topics shared with the broker side.
pub mod topics {
    pub const ALIVE: &str = "van/ellie/tele/alive";
    pub const POSITION: &str = "van/ellie/tele/gps";
    pub const MOTION: &str = "van/ellie/tele/pir";
    pub const VERSION: &str = "van/ellie/tele/version";
    pub const ACK_REPLY: &str = "van/ellie/ack";
    pub const DOWNLINK: &str = "van/ellie/cmd/downlink";
    pub const MOTION_ACK: &str = "van/ellie/cmd/pir_ack";
}

/// Outbound message classification, used by diagnostics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageKind {
    Alive,
    Position,
    Motion,
    AckReply,
    Version,
}

/// One serialized outbound message ready for the session link.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UplinkFrame {
    pub kind: MessageKind,
    pub topic: &'static str,
    pub payload: String,
    pub retain: bool,
}

#[derive(Serialize)]
struct AliveMessage {
    device_id: &'static str,
    msg_id: u32,
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    epoch_utc: u32,
    time_valid: bool,
    time_source: &'static str,
    profile: &'static str,
    uptime_s: u32,
}

#[derive(Serialize)]
struct PositionMessage {
    device_id: &'static str,
    msg_id: u32,
    #[serde(rename = "type")]
    kind: &'static str,
    mode: &'static str,
    timestamp: String,
    epoch_utc: u32,
    time_valid: bool,
    time_source: &'static str,
    profile: &'static str,
    fix_ok: bool,
    start_mode: &'static str,
    ttff_s: u16,
    valid: bool,
    fix_age_ms: u64,
    fix_mode: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed_kmh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    course_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt_m: Option<f64>,
}

#[derive(Serialize)]
struct MotionMessage {
    device_id: &'static str,
    msg_id: u32,
    #[serde(rename = "type")]
    kind: &'static str,
    pir_event_id: u32,
    count: u16,
    first_ms: u64,
    last_ms: u64,
    src_mask: u8,
    profile: &'static str,
    epoch_utc: u32,
}

#[derive(Serialize)]
struct AckReplyMessage {
    device_id: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    ack_msg_id: u32,
    status: &'static str,
    detail: &'static str,
    profile: &'static str,
    fw: &'static str,
    epoch_utc: u32,
}

#[derive(Serialize)]
struct VersionMessage {
    device_id: &'static str,
    fw: &'static str,
    epoch_utc: u32,
    time_valid: bool,
    time_source: &'static str,
    profile: &'static str,
}

/// Builds outbound frames and owns the monotonic message counter.
pub struct UplinkBuilder {
    msg_counter: u32,
}

impl UplinkBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self { msg_counter: 0 }
    }

    fn next_msg_id(&mut self) -> u32 {
        self.msg_counter = self.msg_counter.wrapping_add(1);
        self.msg_counter
    }

    /// Liveness message.
    pub fn alive(
        &mut self,
        clock: &impl WallClock,
        profile: &ProfileConfig,
        uptime_s: u32,
    ) -> Result<UplinkFrame, serde_json::Error> {
        let message = AliveMessage {
            device_id: DEVICE_ID,
            msg_id: self.next_msg_id(),
            kind: "ALIVE",
            timestamp: iso8601_utc(clock.epoch_utc()),
            epoch_utc: clock.epoch_utc(),
            time_valid: clock.is_valid(),
            time_source: clock.source().label(),
            profile: profile.name,
            uptime_s,
        };
        Ok(UplinkFrame {
            kind: MessageKind::Alive,
            topic: topics::ALIVE,
            payload: serde_json::to_string(&message)?,
            retain: false,
        })
    }

    /// Position message; coordinates are present only when a fix was
    /// acquired this cycle.
    pub fn position(
        &mut self,
        fix: Option<&GnssFix>,
        start_mode: StartMode,
        ttff_s: u16,
        fix_age_ms: u64,
        clock: &impl WallClock,
        profile: &ProfileConfig,
    ) -> Result<UplinkFrame, serde_json::Error> {
        let message = match fix {
            Some(fix) => PositionMessage {
                device_id: DEVICE_ID,
                msg_id: self.next_msg_id(),
                kind: "GPS",
                mode: "single",
                timestamp: iso8601_utc(clock.epoch_utc()),
                epoch_utc: clock.epoch_utc(),
                time_valid: clock.is_valid(),
                time_source: clock.source().label(),
                profile: profile.name,
                fix_ok: true,
                start_mode: fix.start_mode.label(),
                ttff_s: fix.ttff_s,
                valid: fix.valid,
                fix_age_ms,
                fix_mode: fix.fix_mode,
                lat: Some(fix.lat),
                lon: Some(fix.lon),
                speed_kmh: Some(fix.speed_kmh),
                course_deg: Some(fix.course_deg),
                alt_m: Some(fix.alt_m),
            },
            None => PositionMessage {
                device_id: DEVICE_ID,
                msg_id: self.next_msg_id(),
                kind: "GPS",
                mode: "single",
                timestamp: iso8601_utc(clock.epoch_utc()),
                epoch_utc: clock.epoch_utc(),
                time_valid: clock.is_valid(),
                time_source: clock.source().label(),
                profile: profile.name,
                fix_ok: false,
                start_mode: start_mode.label(),
                ttff_s,
                valid: false,
                fix_age_ms,
                fix_mode: 0,
                lat: None,
                lon: None,
                speed_kmh: None,
                course_deg: None,
                alt_m: None,
            },
        };
        Ok(UplinkFrame {
            kind: MessageKind::Position,
            topic: topics::POSITION,
            payload: serde_json::to_string(&message)?,
            retain: false,
        })
    }

    /// Intrusion event message.
    #[allow(clippy::too_many_arguments)]
    pub fn motion(
        &mut self,
        event_id: u32,
        count: u16,
        first_ms: u64,
        last_ms: u64,
        src_mask: u8,
        clock: &impl WallClock,
        profile: &ProfileConfig,
    ) -> Result<UplinkFrame, serde_json::Error> {
        let message = MotionMessage {
            device_id: DEVICE_ID,
            msg_id: self.next_msg_id(),
            kind: "PIR",
            pir_event_id: event_id,
            count,
            first_ms,
            last_ms,
            src_mask,
            profile: profile.name,
            epoch_utc: clock.epoch_utc(),
        };
        Ok(UplinkFrame {
            kind: MessageKind::Motion,
            topic: topics::MOTION,
            payload: serde_json::to_string(&message)?,
            retain: false,
        })
    }

    /// Downlink acknowledgment reply. Carries no message id of its own.
    pub fn ack_reply(
        &self,
        ack_msg_id: u32,
        status: AckStatus,
        detail: &'static str,
        clock: &impl WallClock,
        profile: &ProfileConfig,
    ) -> Result<UplinkFrame, serde_json::Error> {
        let message = AckReplyMessage {
            device_id: DEVICE_ID,
            kind: "ACK",
            ack_msg_id,
            status: status.label(),
            detail,
            profile: profile.name,
            fw: FW_VERSION,
            epoch_utc: clock.epoch_utc(),
        };
        Ok(UplinkFrame {
            kind: MessageKind::AckReply,
            topic: topics::ACK_REPLY,
            payload: serde_json::to_string(&message)?,
            retain: false,
        })
    }

    /// Identity/version message, published retained so the broker side
    /// always knows the running revision.
    pub fn version(
        &self,
        clock: &impl WallClock,
        profile: &ProfileConfig,
    ) -> Result<UplinkFrame, serde_json::Error> {
        let message = VersionMessage {
            device_id: DEVICE_ID,
            fw: FW_VERSION,
            epoch_utc: clock.epoch_utc(),
            time_valid: clock.is_valid(),
            time_source: clock.source().label(),
            profile: profile.name,
        };
        Ok(UplinkFrame {
            kind: MessageKind::Version,
            topic: topics::VERSION,
            payload: serde_json::to_string(&message)?,
            retain: true,
        })
    }
}

impl Default for UplinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply status for downlink command handling.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AckStatus {
    Ok,
    Error,
    DuplicateIgnored,
}

impl AckStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            AckStatus::Ok => "OK",
            AckStatus::Error => "ERROR",
            AckStatus::DuplicateIgnored => "DUPLICATE_IGNORED",
        }
    }
}

/// Reply the orchestrator must publish for a handled downlink command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AckDisposition {
    pub ack_msg_id: u32,
    pub status: AckStatus,
    pub detail: &'static str,
}

/// Actions produced by one inbound message.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DownlinkResult {
    /// Motion event acknowledgment to forward to the aggregator.
    pub motion_ack: Option<u32>,
    /// Validated profile change request.
    pub set_profile: Option<ProfileId>,
    /// Acknowledgment reply to publish.
    pub reply: Option<AckDisposition>,
}

#[derive(Deserialize)]
struct CommandFrame {
    #[serde(default)]
    ack_msg_id: Option<u32>,
    #[serde(default)]
    desired_profile: Option<String>,
}

#[derive(Deserialize)]
struct MotionAckFrame {
    #[serde(default, alias = "event_id")]
    pir_event_id: Option<u32>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Parses and deduplicates inbound downlink traffic.
///
/// Retained-message replays after a reconnect repeat the last command, so
/// a repeated `ack_msg_id` is acknowledged as a duplicate without being
/// applied again.
pub struct DownlinkHandler {
    last_ack_msg_id: u32,
}

impl DownlinkHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self { last_ack_msg_id: 0 }
    }

    /// Handles one inbound message; unknown topics and empty payloads
    /// (retained clears) produce no actions.
    pub fn handle(&mut self, topic: &str, payload: &str) -> DownlinkResult {
        let payload = payload.trim();
        if payload.is_empty() {
            return DownlinkResult::default();
        }

        if topic == topics::MOTION_ACK {
            return Self::handle_motion_ack(payload);
        }
        if topic == topics::DOWNLINK {
            return self.handle_command(payload);
        }
        DownlinkResult::default()
    }

    fn handle_motion_ack(payload: &str) -> DownlinkResult {
        let Ok(frame) = serde_json::from_str::<MotionAckFrame>(payload) else {
            return DownlinkResult::default();
        };

        let kind_ok = frame
            .kind
            .as_deref()
            .is_none_or(|kind| kind.is_empty() || kind == "PIR_ACK");
        let event_id = frame.pir_event_id.unwrap_or(0);

        if kind_ok && event_id != 0 {
            DownlinkResult {
                motion_ack: Some(event_id),
                ..DownlinkResult::default()
            }
        } else {
            DownlinkResult::default()
        }
    }

    fn handle_command(&mut self, payload: &str) -> DownlinkResult {
        let frame = serde_json::from_str::<CommandFrame>(payload).ok();
        let ack_msg_id = frame
            .as_ref()
            .and_then(|frame| frame.ack_msg_id)
            .unwrap_or(0);

        if ack_msg_id == 0 {
            return DownlinkResult {
                reply: Some(AckDisposition {
                    ack_msg_id: 0,
                    status: AckStatus::Error,
                    detail: "missing_ack_msg_id",
                }),
                ..DownlinkResult::default()
            };
        }

        if ack_msg_id == self.last_ack_msg_id {
            return DownlinkResult {
                reply: Some(AckDisposition {
                    ack_msg_id,
                    status: AckStatus::DuplicateIgnored,
                    detail: "same_ack_msg_id",
                }),
                ..DownlinkResult::default()
            };
        }
        self.last_ack_msg_id = ack_msg_id;

        let desired = frame.and_then(|frame| frame.desired_profile);
        match desired {
            Some(name) if !name.is_empty() => match ProfileId::parse(&name) {
                Some(profile) => DownlinkResult {
                    set_profile: Some(profile),
                    reply: Some(AckDisposition {
                        ack_msg_id,
                        status: AckStatus::Ok,
                        detail: "profile_set",
                    }),
                    ..DownlinkResult::default()
                },
                None => DownlinkResult {
                    reply: Some(AckDisposition {
                        ack_msg_id,
                        status: AckStatus::Error,
                        detail: "unknown_profile",
                    }),
                    ..DownlinkResult::default()
                },
            },
            _ => DownlinkResult {
                reply: Some(AckDisposition {
                    ack_msg_id,
                    status: AckStatus::Ok,
                    detail: "no_profile_change",
                }),
                ..DownlinkResult::default()
            },
        }
    }
}

impl Default for DownlinkHandler {
    fn default() -> Self {
        Self::new()
    }
}
