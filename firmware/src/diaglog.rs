//! Diagnostic ring drain to defmt / host console.
//!
//! The core records typed events; this sink tracks how far it has read and
//! mirrors new entries to the platform log on every pass of the control
//! task.

#![allow(dead_code)]

use tracker_core::diag::{DiagId, DiagRecord, DiagRecorder};

use crate::instant::FirmwareInstant;

/// Tracks drain progress through the core's diagnostic ring.
pub struct DiagSink {
    last_seen: Option<DiagId>,
}

impl DiagSink {
    #[must_use]
    pub const fn new() -> Self {
        Self { last_seen: None }
    }

    /// Emits every event recorded since the previous drain.
    pub fn drain(&mut self, diag: &DiagRecorder<FirmwareInstant>) {
        for record in diag.since(self.last_seen) {
            emit(record);
            self.last_seen = Some(record.id);
        }
    }
}

impl Default for DiagSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "none")]
fn emit(record: &DiagRecord<FirmwareInstant>) {
    defmt::info!(
        "diag[{=u32}] {=str} t={=u64}ms",
        record.id,
        record.event.label(),
        record.timestamp.into_embassy().as_millis()
    );
}

#[cfg(not(target_os = "none"))]
fn emit(record: &DiagRecord<FirmwareInstant>) {
    println!(
        "diag[{}] {} t={}ms",
        record.id,
        record.event,
        record.timestamp.into_embassy().as_millis()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_time::Instant;
    use tracker_core::diag::DiagEvent;

    fn at(ms: u64) -> FirmwareInstant {
        FirmwareInstant::from(Instant::from_millis(ms))
    }

    #[test]
    fn drain_advances_past_emitted_records() {
        let mut diag = DiagRecorder::<FirmwareInstant>::new();
        let mut sink = DiagSink::new();

        diag.record(DiagEvent::GnssTimeout, at(10));
        diag.record(DiagEvent::Heartbeat, at(20));
        sink.drain(&diag);
        assert_eq!(sink.last_seen, Some(1));

        // Nothing new: the cursor stays put.
        sink.drain(&diag);
        assert_eq!(sink.last_seen, Some(1));

        diag.record(DiagEvent::StayAwakeExpired, at(30));
        sink.drain(&diag);
        assert_eq!(sink.last_seen, Some(2));
    }
}
