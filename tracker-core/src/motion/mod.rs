//! Motion sensor event aggregation.
//!
//! Edges arrive from hardware interrupts into a [`SenseCell`] (atomic
//! counter + source bitmask) that the orchestrator drains exactly once per
//! tick. The [`MotionAggregator`] then applies the lockout and rate filters
//! and accumulates accepted units into a single in-flight outbox event, at
//! most one per operating mode. Delivery is acknowledgment-gated; an event
//! blocked by its own lockout at publish time is dropped, never queued.

use core::time::Duration;

use portable_atomic::{AtomicU8, AtomicU16, Ordering};

use crate::instant::TickInstant;
use crate::profiles::ProfileConfig;

/// Source bit for the front motion sensor.
pub const SENSOR_FRONT: u8 = 0x01;
/// Source bit for the back motion sensor.
pub const SENSOR_BACK: u8 = 0x02;

/// Number of physical motion sensors.
pub const SENSOR_COUNT: usize = 2;

/// Identifier for the physical motion sensors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorId {
    Front,
    Back,
}

impl SensorId {
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            SensorId::Front => 0,
            SensorId::Back => 1,
        }
    }

    #[must_use]
    pub const fn as_bit(self) -> u8 {
        match self {
            SensorId::Front => SENSOR_FRONT,
            SensorId::Back => SENSOR_BACK,
        }
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(SensorId::Front),
            1 => Some(SensorId::Back),
            _ => None,
        }
    }
}

/// Raw edge snapshot drained from the interrupt-fed cell.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RawEdges {
    pub count: u16,
    pub mask: u8,
}

impl RawEdges {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0 || self.mask == 0
    }
}

/// Single-producer/single-consumer cell shared with the interrupt handlers.
///
/// Handlers call [`SenseCell::record`] at arbitrary times relative to the
/// tick thread; [`SenseCell::drain`] reads-and-zeroes both fields inside one
/// critical section so the snapshot stays consistent with respect to the
/// handlers.
pub struct SenseCell {
    count: AtomicU16,
    mask: AtomicU8,
}

impl SenseCell {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicU16::new(0),
            mask: AtomicU8::new(0),
        }
    }

    /// Interrupt-side edge capture.
    pub fn record(&self, sensor: SensorId) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.mask.fetch_or(sensor.as_bit(), Ordering::Relaxed);
    }

    /// Tick-side atomic read-and-clear; call exactly once per tick.
    pub fn drain(&self) -> RawEdges {
        critical_section::with(|_| RawEdges {
            count: self.count.swap(0, Ordering::Relaxed),
            mask: self.mask.swap(0, Ordering::Relaxed),
        })
    }
}

impl Default for SenseCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregator timing parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MotionConfig {
    /// Per-sensor cooldown after a publish; triggers inside it are ignored
    /// at ingestion and block republication.
    pub lockout: Duration,
    /// Minimum gap between accepted units per sensor.
    pub accept_gap: Duration,
    /// Sliding stay-awake extension per accepted trigger.
    pub awake_window: Duration,
    /// Absolute cap on the stay-awake window from first activity.
    pub awake_cap: Duration,
    /// Liveness heartbeat interval while the window is open.
    pub heartbeat_interval: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            lockout: Duration::from_secs(60),
            accept_gap: Duration::from_secs(1),
            awake_window: Duration::from_secs(30 * 60),
            awake_cap: Duration::from_secs(2 * 60 * 60),
            heartbeat_interval: Duration::from_secs(2 * 60),
        }
    }
}

/// The single in-flight intrusion report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MotionEvent<I> {
    /// Monotonically increasing, process-lifetime unique.
    pub id: u32,
    /// Accepted units accumulated while pending (roughly seconds of
    /// motion, not raw edge noise).
    pub count: u16,
    pub first_at: I,
    pub last_at: I,
    pub src_mask: u8,
    pub pending: bool,
    pub acked: bool,
}

/// Sliding stay-awake window opened by accepted triggers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StayAwake<I> {
    pub started_at: I,
    pub until: I,
}

/// Outcome of one per-tick drain, used for diagnostics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IngestOutcome {
    /// No edges arrived since the previous tick.
    Idle,
    /// Edges arrived but the active profile does not monitor motion.
    Disabled,
    /// Every firing sensor sat inside its post-publish lockout.
    LockedOut { mask: u8 },
    /// Edges survived the lockout but the 1 Hz accept filter ate them all.
    RateLimited { raw_count: u16, raw_mask: u8 },
    /// At least one unit was accepted into the outbox.
    Accepted {
        accepted_mask: u8,
        raw_count: u16,
        raw_mask: u8,
    },
}

/// Debounces, rate-limits and accumulates motion triggers.
pub struct MotionAggregator<I> {
    config: MotionConfig,
    lockout_until: [Option<I>; SENSOR_COUNT],
    last_accepted_at: [Option<I>; SENSOR_COUNT],
    outbox: Option<MotionEvent<I>>,
    next_event_id: u32,
    awake: Option<StayAwake<I>>,
}

impl<I: TickInstant> MotionAggregator<I> {
    #[must_use]
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            lockout_until: [None; SENSOR_COUNT],
            last_accepted_at: [None; SENSOR_COUNT],
            outbox: None,
            next_event_id: 1,
            awake: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// The in-flight event, if any.
    #[must_use]
    pub fn outbox(&self) -> Option<&MotionEvent<I>> {
        self.outbox.as_ref()
    }

    /// Returns `true` while an event awaits delivery or acknowledgment.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.outbox.is_some()
    }

    /// Processes one drained edge snapshot.
    pub fn ingest(
        &mut self,
        raw: RawEdges,
        profile: &ProfileConfig,
        now: I,
    ) -> IngestOutcome {
        if raw.is_empty() {
            return IngestOutcome::Idle;
        }

        if !profile.id.monitors_motion() {
            return IngestOutcome::Disabled;
        }

        let enabled_mask = raw.mask & profile.sensor_mask();
        if enabled_mask == 0 {
            return IngestOutcome::Disabled;
        }

        let unlocked_mask = enabled_mask & !self.locked_mask(now);
        if unlocked_mask == 0 {
            return IngestOutcome::LockedOut { mask: raw.mask };
        }

        let mut accepted_mask = 0;
        for index in 0..SENSOR_COUNT {
            let Some(sensor) = SensorId::from_index(index) else {
                continue;
            };
            if unlocked_mask & sensor.as_bit() == 0 {
                continue;
            }
            let accept = match self.last_accepted_at[index] {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= self.config.accept_gap,
            };
            if accept {
                accepted_mask |= sensor.as_bit();
                self.last_accepted_at[index] = Some(now);
            }
        }

        if accepted_mask == 0 {
            return IngestOutcome::RateLimited {
                raw_count: raw.count,
                raw_mask: raw.mask,
            };
        }

        self.accumulate(accepted_mask, now);
        self.start_or_extend_awake(now);

        IngestOutcome::Accepted {
            accepted_mask,
            raw_count: raw.count,
            raw_mask: raw.mask,
        }
    }

    fn accumulate(&mut self, accepted_mask: u8, now: I) {
        if self.outbox.is_none() {
            let id = self.next_event_id;
            self.next_event_id = self.next_event_id.wrapping_add(1);
            self.outbox = Some(MotionEvent {
                id,
                count: 0,
                first_at: now,
                last_at: now,
                src_mask: 0,
                pending: true,
                acked: false,
            });
        }

        if let Some(event) = self.outbox.as_mut() {
            // One unit per accepted sensor, not the raw edge count.
            let units = u16::from(accepted_mask.count_ones() as u8);
            event.count = event.count.saturating_add(units);
            event.last_at = now;
            event.src_mask |= accepted_mask;
        }
    }

    fn locked_mask(&self, now: I) -> u8 {
        let mut mask = 0;
        for index in 0..SENSOR_COUNT {
            if let Some(until) = self.lockout_until[index]
                && now < until
                && let Some(sensor) = SensorId::from_index(index)
            {
                mask |= sensor.as_bit();
            }
        }
        mask
    }

    /// Delivery gate: eligible the instant any contributing sensor's
    /// lockout has expired.
    #[must_use]
    pub fn eligible_for_publish(&self, now: I) -> bool {
        let Some(event) = self.outbox.as_ref() else {
            return false;
        };
        let locked = self.locked_mask(now);
        event.src_mask & !locked != 0
    }

    /// Restarts the lockout for every contributing sensor after a publish.
    /// The event stays pending until a positive acknowledgment arrives.
    pub fn mark_published(&mut self, now: I) {
        let Some(event) = self.outbox.as_ref() else {
            return;
        };
        let src_mask = event.src_mask;
        for index in 0..SENSOR_COUNT {
            if let Some(sensor) = SensorId::from_index(index)
                && src_mask & sensor.as_bit() != 0
            {
                self.lockout_until[index] = Some(now + self.config.lockout);
            }
        }
    }

    /// Discards the in-flight event (publish blocked by lockout). The
    /// accumulated count is gone by design; monitoring resumes clean.
    pub fn drop_pending(&mut self) -> Option<MotionEvent<I>> {
        self.outbox.take()
    }

    /// Clears the outbox when the acknowledgment references the in-flight
    /// event. Stale or mismatched identifiers are ignored.
    pub fn acknowledge(&mut self, event_id: u32) -> bool {
        match self.outbox.as_ref() {
            Some(event) if event.id == event_id => {
                self.outbox = None;
                true
            }
            _ => false,
        }
    }

    fn start_or_extend_awake(&mut self, now: I) {
        match self.awake.as_mut() {
            None => {
                self.awake = Some(StayAwake {
                    started_at: now,
                    until: now + self.config.awake_window,
                });
            }
            Some(window) => {
                let proposed = now + self.config.awake_window;
                let cap = window.started_at + self.config.awake_cap;
                window.until = if proposed < cap { proposed } else { cap };
            }
        }
    }

    /// The open stay-awake window, if any.
    #[must_use]
    pub fn awake(&self) -> Option<&StayAwake<I>> {
        self.awake.as_ref()
    }

    /// Returns `true` while the window is open and unexpired.
    #[must_use]
    pub fn awake_active(&self, now: I) -> bool {
        matches!(self.awake, Some(window) if now < window.until)
    }

    /// Closes the window when its deadline has passed; returns `true` on
    /// the transition.
    pub fn close_awake_if_expired(&mut self, now: I) -> bool {
        if let Some(window) = self.awake
            && now >= window.until
        {
            self.awake = None;
            return true;
        }
        false
    }

    /// Mode-transition policy: leaving the monitoring mode discards the
    /// in-flight event, closes the window and resets the accept filter.
    pub fn on_profile_changed(&mut self, profile: &ProfileConfig) {
        if !profile.id.monitors_motion() {
            self.outbox = None;
            self.awake = None;
            self.last_accepted_at = [None; SENSOR_COUNT];
        }
    }
}

impl<I: TickInstant> Default for MotionAggregator<I> {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instant::MillisInstant;
    use crate::profiles::{ProfileId, profile_by_id};

    fn at(ms: u64) -> MillisInstant {
        MillisInstant::from_millis(ms)
    }

    fn edges(count: u16, mask: u8) -> RawEdges {
        RawEdges { count, mask }
    }

    fn armed() -> &'static ProfileConfig {
        profile_by_id(ProfileId::Armed)
    }

    #[test]
    fn sense_cell_drains_and_clears() {
        let cell = SenseCell::new();
        cell.record(SensorId::Front);
        cell.record(SensorId::Front);
        cell.record(SensorId::Back);

        let raw = cell.drain();
        assert_eq!(raw.count, 3);
        assert_eq!(raw.mask, SENSOR_FRONT | SENSOR_BACK);

        assert!(cell.drain().is_empty());
    }

    #[test]
    fn ingest_is_noop_outside_monitoring_mode() {
        let mut agg = MotionAggregator::default();
        let parked = profile_by_id(ProfileId::Parked);

        let outcome = agg.ingest(edges(5, SENSOR_FRONT), parked, at(1_000));
        assert_eq!(outcome, IngestOutcome::Disabled);
        assert!(agg.outbox().is_none());
        assert!(agg.awake().is_none());
    }

    #[test]
    fn concurrent_triggers_merge_into_one_event() {
        let mut agg = MotionAggregator::default();

        let outcome = agg.ingest(edges(7, SENSOR_FRONT | SENSOR_BACK), armed(), at(1_000));
        assert_eq!(
            outcome,
            IngestOutcome::Accepted {
                accepted_mask: SENSOR_FRONT | SENSOR_BACK,
                raw_count: 7,
                raw_mask: SENSOR_FRONT | SENSOR_BACK,
            }
        );

        let event = agg.outbox().copied().unwrap();
        assert_eq!(event.id, 1);
        assert_eq!(event.count, 2);
        assert_eq!(event.src_mask, 0x03);
        assert!(event.pending);
    }

    #[test]
    fn rate_filter_collapses_chatter_to_one_unit_per_second() {
        let mut agg = MotionAggregator::default();

        agg.ingest(edges(3, SENSOR_FRONT), armed(), at(1_000));
        let outcome = agg.ingest(edges(4, SENSOR_FRONT), armed(), at(1_500));
        assert_eq!(
            outcome,
            IngestOutcome::RateLimited {
                raw_count: 4,
                raw_mask: SENSOR_FRONT,
            }
        );
        assert_eq!(agg.outbox().unwrap().count, 1);

        agg.ingest(edges(2, SENSOR_FRONT), armed(), at(2_100));
        assert_eq!(agg.outbox().unwrap().count, 2);
    }

    #[test]
    fn locked_out_sensor_contributes_nothing() {
        let mut agg = MotionAggregator::default();

        agg.ingest(edges(1, SENSOR_FRONT), armed(), at(1_000));
        agg.mark_published(at(1_000));
        agg.drop_pending();

        let outcome = agg.ingest(edges(9, SENSOR_FRONT), armed(), at(30_000));
        assert_eq!(outcome, IngestOutcome::LockedOut { mask: SENSOR_FRONT });
        assert!(agg.outbox().is_none());

        // Lockout expired: accepted again.
        let outcome = agg.ingest(edges(1, SENSOR_FRONT), armed(), at(61_100));
        assert!(matches!(outcome, IngestOutcome::Accepted { .. }));
    }

    #[test]
    fn eligibility_needs_only_one_unlocked_contributor() {
        let mut agg = MotionAggregator::default();

        // Front publishes and enters lockout.
        agg.ingest(edges(1, SENSOR_FRONT), armed(), at(1_000));
        assert!(agg.eligible_for_publish(at(1_000)));
        agg.mark_published(at(1_000));
        agg.acknowledge(1);

        // Back fires while front is still locked out.
        agg.ingest(edges(1, SENSOR_BACK), armed(), at(5_000));
        assert!(agg.eligible_for_publish(at(5_000)));

        // A front-only event inside the lockout would not be eligible; the
        // sensor cannot even re-enter the outbox until lockout expiry.
        agg.mark_published(at(5_000));
        agg.acknowledge(2);
        let outcome = agg.ingest(edges(1, SENSOR_FRONT), armed(), at(10_000));
        assert_eq!(outcome, IngestOutcome::LockedOut { mask: SENSOR_FRONT });
    }

    #[test]
    fn acknowledge_requires_matching_identifier() {
        let mut agg = MotionAggregator::default();
        agg.ingest(edges(1, SENSOR_FRONT), armed(), at(1_000));

        assert!(!agg.acknowledge(99));
        assert!(agg.pending());
        assert!(agg.acknowledge(1));
        assert!(!agg.pending());
        // Re-acknowledging a cleared outbox is harmless.
        assert!(!agg.acknowledge(1));
    }

    #[test]
    fn event_ids_are_monotonic() {
        let mut agg = MotionAggregator::default();

        agg.ingest(edges(1, SENSOR_FRONT), armed(), at(1_000));
        assert_eq!(agg.outbox().unwrap().id, 1);
        agg.acknowledge(1);

        agg.ingest(edges(1, SENSOR_FRONT), armed(), at(3_000));
        assert_eq!(agg.outbox().unwrap().id, 2);
    }

    #[test]
    fn awake_window_slides_and_caps_at_two_hours() {
        let mut agg = MotionAggregator::default();
        let half_hour = Duration::from_secs(30 * 60);

        agg.ingest(edges(1, SENSOR_FRONT), armed(), at(0));
        let window = *agg.awake().unwrap();
        assert_eq!(window.until, at(0) + half_hour);

        // 100 minutes in: proposed extension exceeds the cap.
        agg.acknowledge(1);
        let later = at(100 * 60 * 1_000);
        agg.ingest(edges(1, SENSOR_FRONT), armed(), later);
        let window = *agg.awake().unwrap();
        assert_eq!(window.until, at(2 * 60 * 60 * 1_000));

        assert!(agg.awake_active(at(119 * 60 * 1_000)));
        assert!(!agg.awake_active(at(2 * 60 * 60 * 1_000)));
        assert!(agg.close_awake_if_expired(at(2 * 60 * 60 * 1_000)));
        assert!(agg.awake().is_none());
    }

    #[test]
    fn leaving_armed_discards_inflight_state() {
        let mut agg = MotionAggregator::default();
        agg.ingest(edges(1, SENSOR_FRONT), armed(), at(1_000));
        assert!(agg.pending());

        agg.on_profile_changed(profile_by_id(ProfileId::Parked));
        assert!(!agg.pending());
        assert!(agg.awake().is_none());

        // Re-arming starts clean; the rate filter was reset too.
        let outcome = agg.ingest(edges(1, SENSOR_FRONT), armed(), at(1_200));
        assert!(matches!(outcome, IngestOutcome::Accepted { .. }));
    }
}
