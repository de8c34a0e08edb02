//! Position fix quality and stability filtering.
//!
//! Raw receiver sentences are noisy: the module reports placeholder
//! coordinates before it has a real fix, occasionally emits implausible
//! altitude/speed values, and the dilution-of-precision field misbehaves in
//! both directions. [`FixFilter`] turns that stream into a trust-scored fix:
//! a sample passing the instantaneous gates is a *candidate*, and a
//! candidate confirmed by N consecutive close-together candidates is
//! *valid*. Gate failures are silent rejections, never errors.

mod cgnsinf;

use core::time::Duration;

use heapless::String;

use crate::instant::TickInstant;

/// Maximum length of the receiver's UTC timestamp field
/// (`YYYYMMDDHHMMSS.sss`).
pub const MAX_UTC_LEN: usize = 20;

/// Receiver warm-up strategy chosen before powering the receiver.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum StartMode {
    #[default]
    Unknown,
    Cold,
    Warm,
    Hot,
}

impl StartMode {
    /// Tag emitted in telemetry payloads.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            StartMode::Unknown => "UNKNOWN",
            StartMode::Cold => "COLD",
            StartMode::Warm => "WARM",
            StartMode::Hot => "HOT",
        }
    }
}

/// One GNSS sample snapshot, constructed fresh on every poll.
///
/// `candidate` means the sample passed the instantaneous sanity and quality
/// gates; `valid` additionally requires the multi-sample stability
/// consensus.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GnssFix {
    pub valid: bool,
    pub candidate: bool,

    pub utc: String<MAX_UTC_LEN>,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,

    pub fix_mode: u8,
    pub hdop: f32,
    pub sats_used: u8,
    pub fix_field_present: bool,
    pub fix_status: u8,
    pub run_status: u8,
    /// Raw field count of the source sentence, kept for diagnostics.
    pub field_count: u8,

    /// Seconds since receiver power-on in the current acquisition.
    pub ttff_s: u16,
    pub start_mode: StartMode,
}

impl GnssFix {
    /// A stationary fix reporting a clearly sub-sea-level altitude is kept
    /// but flagged so consumers can ignore the altitude channel.
    #[must_use]
    pub fn suspect_altitude(&self) -> bool {
        self.speed_kmh < 1.0 && self.alt_m < -20.0
    }
}

/// Acceptance gate thresholds, tuned against the observed receiver.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FilterConfig {
    /// DOP at or above this value is outright garbage (the module emits
    /// 500.0 and similar while searching).
    pub hdop_reject_ge: f32,
    /// Plausible DOP band; values outside it correlate with ghost fixes
    /// even when the rest of the record looks healthy.
    pub hdop_min: f32,
    pub hdop_max: f32,
    pub sats_min: u8,
    pub alt_min_m: f64,
    pub alt_max_m: f64,
    pub speed_max_kmh: f64,
    /// Minimum UTC field length proving the receiver began resolving time.
    pub min_utc_len: usize,
    /// Consecutive close candidates required before `valid`.
    pub stable_samples: u8,
    pub stable_dist_m_stopped: f64,
    pub stable_dist_m_moving: f64,
    /// Coordinate the module reports while it has no fix.
    pub placeholder_lat: f64,
    pub placeholder_lon: f64,
    pub placeholder_tol: f64,
    pub near_zero_tol: f64,
    /// Last-fix age bounds for the warm-up strategy choice.
    pub hot_max_age: Duration,
    pub warm_max_age: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            hdop_reject_ge: 50.0,
            hdop_min: 0.5,
            hdop_max: 10.0,
            sats_min: 4,
            alt_min_m: -200.0,
            alt_max_m: 3000.0,
            speed_max_kmh: 200.0,
            min_utc_len: 8,
            stable_samples: 2,
            stable_dist_m_stopped: 80.0,
            stable_dist_m_moving: 250.0,
            placeholder_lat: 62.0,
            placeholder_lon: 15.0,
            placeholder_tol: 0.05,
            near_zero_tol: 0.001,
            hot_max_age: Duration::from_secs(2 * 60 * 60),
            warm_max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Mean Earth radius used by the great-circle distance.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn deg2rad(degrees: f64) -> f64 {
    degrees * (core::f64::consts::PI / 180.0)
}

/// Great-circle distance in meters between two WGS84 coordinates.
#[must_use]
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = deg2rad(lat2 - lat1);
    let d_lon = deg2rad(lon2 - lon1);
    let a = libm::sin(d_lat / 2.0) * libm::sin(d_lat / 2.0)
        + libm::cos(deg2rad(lat1))
            * libm::cos(deg2rad(lat2))
            * libm::sin(d_lon / 2.0)
            * libm::sin(d_lon / 2.0);
    let c = 2.0 * libm::atan2(libm::sqrt(a), libm::sqrt(1.0 - a));
    EARTH_RADIUS_M * c
}

/// Stateful fix filter: gates each sample and tracks the consensus run.
///
/// The retained last valid fix feeds only the warm-up strategy choice; it
/// is never reused as a stand-in position.
pub struct FixFilter<I> {
    config: FilterConfig,
    last_candidate: Option<(f64, f64)>,
    stable_count: u8,
    last_fix: Option<GnssFix>,
    last_fix_at: Option<I>,
    acquisition_started_at: Option<I>,
    start_mode: StartMode,
}

impl<I: TickInstant> FixFilter<I> {
    #[must_use]
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            last_candidate: None,
            stable_count: 0,
            last_fix: None,
            last_fix_at: None,
            acquisition_started_at: None,
            start_mode: StartMode::Unknown,
        }
    }

    #[must_use]
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Chooses the warm-up strategy from the age of the last valid fix.
    ///
    /// Without a trusted wall clock (or without any prior fix) the choice
    /// is always a full cold acquisition.
    #[must_use]
    pub fn pick_start_mode(&self, now: I, time_trusted: bool) -> StartMode {
        if !time_trusted {
            return StartMode::Cold;
        }

        let Some(last_fix_at) = self.last_fix_at else {
            return StartMode::Cold;
        };

        let age = now.saturating_duration_since(last_fix_at);
        if age <= self.config.hot_max_age {
            StartMode::Hot
        } else if age <= self.config.warm_max_age {
            StartMode::Warm
        } else {
            StartMode::Cold
        }
    }

    /// Resets consensus tracking for a fresh acquisition.
    pub fn begin_acquisition(&mut self, now: I, mode: StartMode) {
        self.start_mode = mode;
        self.acquisition_started_at = Some(now);
        self.last_candidate = None;
        self.stable_count = 0;
    }

    /// Stops TTFF tracking when the receiver is powered down.
    pub fn end_acquisition(&mut self) {
        self.acquisition_started_at = None;
    }

    /// Warm-up strategy used by the current acquisition.
    #[must_use]
    pub fn start_mode(&self) -> StartMode {
        self.start_mode
    }

    /// Last valid fix, if one was ever confirmed.
    #[must_use]
    pub fn last_fix(&self) -> Option<&GnssFix> {
        self.last_fix.as_ref()
    }

    /// Age of the last valid fix.
    #[must_use]
    pub fn fix_age(&self, now: I) -> Option<Duration> {
        self.last_fix_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Evaluates one raw receiver sentence.
    ///
    /// Returns `None` when the sentence is unparseable (no sample this
    /// poll); otherwise the gated fix with `candidate`/`valid` scored. A
    /// quality failure clears the consensus run entirely; a stability
    /// failure makes the failing-but-plausible sample the new reference
    /// with a run length of one.
    pub fn evaluate(&mut self, sentence: &str, now: I) -> Option<GnssFix> {
        let mut fix = cgnsinf::parse(sentence)?;

        fix.start_mode = self.start_mode;
        if let Some(started_at) = self.acquisition_started_at {
            let elapsed = now.saturating_duration_since(started_at);
            fix.ttff_s = u16::try_from(elapsed.as_secs()).unwrap_or(u16::MAX);
        }

        fix.candidate = self.quality_ok(&fix);
        fix.valid = false;

        if fix.candidate {
            let stable_with_previous = self.stability_ok(&fix);
            self.stable_count = if self.last_candidate.is_none() || !stable_with_previous {
                1
            } else {
                self.stable_count.saturating_add(1)
            };
            self.last_candidate = Some((fix.lat, fix.lon));
            fix.valid = self.stable_count >= self.config.stable_samples;
        } else {
            self.last_candidate = None;
            self.stable_count = 0;
        }

        if fix.valid {
            self.last_fix = Some(fix.clone());
            self.last_fix_at = Some(now);
        }

        Some(fix)
    }

    fn coords_in_range(lat: f64, lon: f64) -> bool {
        (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
    }

    fn coords_near_zero(&self, lat: f64, lon: f64) -> bool {
        libm::fabs(lat) < self.config.near_zero_tol && libm::fabs(lon) < self.config.near_zero_tol
    }

    fn is_placeholder(&self, lat: f64, lon: f64) -> bool {
        libm::fabs(lat - self.config.placeholder_lat) < self.config.placeholder_tol
            && libm::fabs(lon - self.config.placeholder_lon) < self.config.placeholder_tol
    }

    fn sanity_ok(&self, fix: &GnssFix) -> bool {
        if !Self::coords_in_range(fix.lat, fix.lon) {
            return false;
        }
        if self.coords_near_zero(fix.lat, fix.lon) {
            return false;
        }
        if self.is_placeholder(fix.lat, fix.lon) {
            return false;
        }
        if fix.hdop >= self.config.hdop_reject_ge {
            return false;
        }
        if fix.alt_m < self.config.alt_min_m || fix.alt_m > self.config.alt_max_m {
            return false;
        }
        if fix.speed_kmh < 0.0 || fix.speed_kmh > self.config.speed_max_kmh {
            return false;
        }
        true
    }

    fn quality_ok(&self, fix: &GnssFix) -> bool {
        if fix.run_status != 1 {
            return false;
        }
        if fix.utc.len() < self.config.min_utc_len {
            return false;
        }
        if !self.sanity_ok(fix) {
            return false;
        }
        if fix.sats_used < self.config.sats_min {
            return false;
        }
        if fix.fix_mode < 1 {
            return false;
        }
        if !(fix.hdop >= self.config.hdop_min && fix.hdop <= self.config.hdop_max) {
            return false;
        }

        // When the receiver reports an explicit fix-status field, trust it;
        // without it the remaining checks carry the verdict alone.
        if fix.fix_field_present {
            return fix.fix_status == 1;
        }
        true
    }

    fn stability_ok(&self, fix: &GnssFix) -> bool {
        let Some((prev_lat, prev_lon)) = self.last_candidate else {
            return true;
        };
        let distance = haversine_m(prev_lat, prev_lon, fix.lat, fix.lon);
        let limit = if fix.speed_kmh > 1.0 {
            self.config.stable_dist_m_moving
        } else {
            self.config.stable_dist_m_stopped
        };
        distance <= limit
    }
}

impl<I: TickInstant> Default for FixFilter<I> {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}
