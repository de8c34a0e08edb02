//! Wall-clock time model.
//!
//! The core never acquires time itself; the platform collaborator syncs
//! from the network (modem clock, then NTP) and exposes the result through
//! [`WallClock`]. The core only needs epoch seconds, a validity verdict and
//! the source tag carried in telemetry payloads.

use alloc::string::String;

use chrono::DateTime;

/// Epoch sanity floor: 2024-01-01 00:00:00 UTC. Anything below this is an
/// unsynchronized clock still running from its power-on default.
pub const MIN_VALID_EPOCH: u32 = 1_704_067_200;

/// Rendered in payloads when the clock has never synced.
pub const EPOCH_ZERO_ISO: &str = "1970-01-01T00:00:00Z";

/// Where the current wall-clock value came from.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TimeSource {
    #[default]
    None,
    Modem,
    Ntp,
}

impl TimeSource {
    /// Tag emitted in telemetry payloads.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            TimeSource::None => "NONE",
            TimeSource::Modem => "MODEM",
            TimeSource::Ntp => "NTP",
        }
    }
}

/// Wall-clock collaborator interface.
pub trait WallClock {
    /// Current UTC time as epoch seconds (0 when never synced).
    fn epoch_utc(&self) -> u32;

    /// Source of the last successful synchronization.
    fn source(&self) -> TimeSource;

    /// Attempts a (re)synchronization; invoked by the orchestrator after a
    /// successful network attach while the data link is known good.
    fn sync(&mut self) -> bool;

    /// Returns `true` when the current epoch passes the sanity floor.
    fn is_valid(&self) -> bool {
        self.epoch_utc() >= MIN_VALID_EPOCH
    }
}

/// Formats epoch seconds as `YYYY-MM-DDTHH:MM:SSZ`.
///
/// An unsynchronized clock renders the epoch-zero sentinel rather than a
/// misleading partial date.
#[must_use]
pub fn iso8601_utc(epoch_utc: u32) -> String {
    if epoch_utc < MIN_VALID_EPOCH {
        return String::from(EPOCH_ZERO_ISO);
    }

    match DateTime::from_timestamp(i64::from(epoch_utc), 0) {
        Some(utc) => {
            let mut rendered = String::new();
            let _ = core::fmt::Write::write_fmt(
                &mut rendered,
                format_args!("{}", utc.format("%Y-%m-%dT%H:%M:%SZ")),
            );
            rendered
        }
        None => String::from(EPOCH_ZERO_ISO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_valid_epochs() {
        // 2025-12-13 19:22:50 UTC
        assert_eq!(iso8601_utc(1_765_653_770), "2025-12-13T19:22:50Z");
    }

    #[test]
    fn unsynced_clock_renders_sentinel() {
        assert_eq!(iso8601_utc(0), EPOCH_ZERO_ISO);
        assert_eq!(iso8601_utc(MIN_VALID_EPOCH - 1), EPOCH_ZERO_ISO);
    }

    #[test]
    fn sanity_floor_is_2024() {
        assert_eq!(iso8601_utc(MIN_VALID_EPOCH), "2024-01-01T00:00:00Z");
    }
}
