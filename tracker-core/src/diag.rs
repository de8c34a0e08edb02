//! Diagnostic event catalog and ring buffer.
//!
//! The core never writes to a log sink directly; it records typed events
//! into a fixed-capacity ring that the platform drains to its own sink
//! (defmt on the MCU, stdout on the host). Capacity is bounded so a chatty
//! cycle can only ever cost memory that was budgeted up front.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::gnss::StartMode;
use crate::instant::TickInstant;
use crate::profiles::ProfileId;
use crate::telemetry::{AckStatus, MessageKind};

/// Identifier attached to recorded diagnostic events.
pub type DiagId = u32;

/// Total number of diagnostic entries retained in memory.
pub const DIAG_RING_CAPACITY: usize = 128;

/// Discriminated diagnostic events recorded by the control core.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DiagEvent {
    ProfileChanged { to: ProfileId },
    GnssStarted { mode: StartMode },
    GnssFixValid { ttff_s: u16, sats: u8 },
    GnssSuspectAltitude,
    GnssTimeout,
    MotionAccepted { mask: u8, raw_count: u16 },
    MotionRateLimited { raw_count: u16 },
    MotionLockedOut { mask: u8 },
    MotionPublished { event_id: u32, count: u16, mask: u8 },
    MotionDropped { event_id: u32, count: u16 },
    MotionAcked { event_id: u32 },
    StayAwakeExpired,
    NetAttached { signal_quality: i16 },
    NetAttachTimeout,
    SessionConnectTimeout,
    PublishFailed { kind: MessageKind },
    DownlinkReplied { ack_msg_id: u32, status: AckStatus },
    Heartbeat,
}

impl DiagEvent {
    /// Short tag for sinks that cannot render the full [`fmt::Display`]
    /// form (e.g. deferred-format MCU logging).
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            DiagEvent::ProfileChanged { .. } => "profile-changed",
            DiagEvent::GnssStarted { .. } => "gnss-started",
            DiagEvent::GnssFixValid { .. } => "gnss-fix-valid",
            DiagEvent::GnssSuspectAltitude => "gnss-suspect-altitude",
            DiagEvent::GnssTimeout => "gnss-timeout",
            DiagEvent::MotionAccepted { .. } => "motion-accepted",
            DiagEvent::MotionRateLimited { .. } => "motion-rate-limited",
            DiagEvent::MotionLockedOut { .. } => "motion-locked-out",
            DiagEvent::MotionPublished { .. } => "motion-published",
            DiagEvent::MotionDropped { .. } => "motion-dropped",
            DiagEvent::MotionAcked { .. } => "motion-acked",
            DiagEvent::StayAwakeExpired => "stay-awake-expired",
            DiagEvent::NetAttached { .. } => "net-attached",
            DiagEvent::NetAttachTimeout => "net-attach-timeout",
            DiagEvent::SessionConnectTimeout => "session-connect-timeout",
            DiagEvent::PublishFailed { .. } => "publish-failed",
            DiagEvent::DownlinkReplied { .. } => "downlink-replied",
            DiagEvent::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for DiagEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagEvent::ProfileChanged { to } => write!(f, "profile-changed {to:?}"),
            DiagEvent::GnssStarted { mode } => write!(f, "gnss-started {}", mode.label()),
            DiagEvent::GnssFixValid { ttff_s, sats } => {
                write!(f, "gnss-fix-valid ttff={ttff_s}s sats={sats}")
            }
            DiagEvent::GnssSuspectAltitude => f.write_str("gnss-suspect-altitude"),
            DiagEvent::GnssTimeout => f.write_str("gnss-timeout"),
            DiagEvent::MotionAccepted { mask, raw_count } => {
                write!(f, "motion-accepted mask={mask:#04x} raw={raw_count}")
            }
            DiagEvent::MotionRateLimited { raw_count } => {
                write!(f, "motion-rate-limited raw={raw_count}")
            }
            DiagEvent::MotionLockedOut { mask } => {
                write!(f, "motion-locked-out mask={mask:#04x}")
            }
            DiagEvent::MotionPublished {
                event_id,
                count,
                mask,
            } => write!(
                f,
                "motion-published id={event_id} count={count} mask={mask:#04x}"
            ),
            DiagEvent::MotionDropped { event_id, count } => {
                write!(f, "motion-dropped id={event_id} count={count}")
            }
            DiagEvent::MotionAcked { event_id } => write!(f, "motion-acked id={event_id}"),
            DiagEvent::StayAwakeExpired => f.write_str("stay-awake-expired"),
            DiagEvent::NetAttached { signal_quality } => {
                write!(f, "net-attached csq={signal_quality}")
            }
            DiagEvent::NetAttachTimeout => f.write_str("net-attach-timeout"),
            DiagEvent::SessionConnectTimeout => f.write_str("session-connect-timeout"),
            DiagEvent::PublishFailed { kind } => write!(f, "publish-failed {kind:?}"),
            DiagEvent::DownlinkReplied { ack_msg_id, status } => {
                write!(f, "downlink-replied ack_msg_id={ack_msg_id} {status:?}")
            }
            DiagEvent::Heartbeat => f.write_str("heartbeat"),
        }
    }
}

/// Diagnostic record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DiagRecord<I> {
    pub id: DiagId,
    pub timestamp: I,
    pub event: DiagEvent,
}

/// Records diagnostic events into a fixed-size ring buffer.
pub struct DiagRecorder<I, const CAPACITY: usize = DIAG_RING_CAPACITY> {
    ring: HistoryBuf<DiagRecord<I>, CAPACITY>,
    next_id: DiagId,
}

impl<I: TickInstant, const CAPACITY: usize> DiagRecorder<I, CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_id: 0,
        }
    }

    /// Records an event and returns its identifier.
    pub fn record(&mut self, event: DiagEvent, timestamp: I) -> DiagId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.ring.write(DiagRecord {
            id,
            timestamp,
            event,
        });
        id
    }

    /// Most recent record, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&DiagRecord<I>> {
        self.ring.recent()
    }

    /// Iterator over retained records in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, DiagRecord<I>> {
        self.ring.oldest_ordered()
    }

    /// Records newer than `after` in chronological order; pass `None` to
    /// drain from the start of retained history.
    pub fn since(
        &self,
        after: Option<DiagId>,
    ) -> impl Iterator<Item = &DiagRecord<I>> {
        self.oldest_first()
            .filter(move |record| after.is_none_or(|seen| record.id > seen))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<I: TickInstant, const CAPACITY: usize> Default for DiagRecorder<I, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
