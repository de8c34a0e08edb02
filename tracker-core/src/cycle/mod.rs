//! Cycle orchestrator.
//!
//! A step state machine driven by repeated non-blocking ticks. Each
//! invocation drains the motion sense cell, then advances at most one step:
//! GNSS acquisition, radio attach, messaging session, receive window and
//! the per-profile wait. All waiting is expressed as deadlines checked on
//! each tick; exceeding one is never an error, only a scheduled forward
//! transition. The orchestrator is also the sole arbiter of the shared
//! antenna path: every transition into a GNSS step forces the radio off
//! first and vice versa, idempotently.

use core::time::Duration;

use crate::clock::WallClock;
use crate::diag::{DiagEvent, DiagRecorder};
use crate::gnss::{FixFilter, GnssFix, StartMode};
use crate::instant::TickInstant;
use crate::link::{GnssLink, InboundMessage, ModemLink, SessionLink};
use crate::motion::{IngestOutcome, MotionAggregator, SenseCell};
use crate::profiles::{ProfileConfig, ProfileId, profile_by_id};
use crate::telemetry::{DownlinkHandler, UplinkBuilder, UplinkFrame, topics};

/// Upper bound on inbound messages serviced in one tick.
const MAX_INBOUND_PER_TICK: usize = 8;

/// Orchestrator timing parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CycleConfig {
    /// Access point name handed to the modem collaborator.
    pub apn: &'static str,
    /// Network registration timeout passed through to the modem.
    pub registration_timeout: Duration,
    /// Data attach timeout passed through to the modem.
    pub attach_timeout: Duration,
    /// Receiver warm-up delay before polling starts.
    pub gnss_warmup: Duration,
    /// Nominal fix poll interval.
    pub gnss_poll_interval: Duration,
    /// Tightened poll interval once a candidate appears.
    pub gnss_poll_interval_candidate: Duration,
    /// Outer deadline for the network attach step.
    pub net_attach_deadline: Duration,
    /// Deadline for the session connect step.
    pub session_connect_deadline: Duration,
    /// Receive window while a motion event awaits acknowledgment.
    pub rx_window_pending: Duration,
    /// Receive window with nothing pending.
    pub rx_window_idle: Duration,
    /// Delay before the first communication after boot.
    pub first_comm_delay: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            apn: "services.telenor.se",
            registration_timeout: Duration::from_secs(120),
            attach_timeout: Duration::from_secs(60),
            gnss_warmup: Duration::from_millis(1_500),
            gnss_poll_interval: Duration::from_secs(1),
            gnss_poll_interval_candidate: Duration::from_millis(500),
            net_attach_deadline: Duration::from_secs(60),
            session_connect_deadline: Duration::from_secs(15),
            rx_window_pending: Duration::from_secs(30),
            rx_window_idle: Duration::from_secs(5),
            first_comm_delay: Duration::from_secs(2),
        }
    }
}

/// Per-cycle fix acquisition plan.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum FixPlan {
    Skip,
    Single { budget: Duration },
}

/// Orchestrator steps. Variants carry only the data that state needs; the
/// enum is exhaustive, so there is no unrecognized state to fail safe from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step<I> {
    Decide,
    GnssOn,
    GnssWarmup {
        deadline: I,
    },
    GnssCollect {
        deadline: I,
        next_poll: I,
        interval: Duration,
    },
    GnssOff,
    RadioOn,
    NetAttach {
        deadline: I,
    },
    SessionConnect {
        deadline: I,
    },
    Publish,
    /// `deadline` is `None` while the stay-awake window keeps the session
    /// open; the window's own expiry closes the step.
    ReceiveWindow {
        deadline: Option<I>,
    },
    SessionDisconnect,
    RadioOff,
    ArmedWait,
    ParkedWait,
}

impl<I> Step<I> {
    /// Step tag for diagnostics and status surfaces.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Step::Decide => "DECIDE",
            Step::GnssOn => "GNSS_ON",
            Step::GnssWarmup { .. } => "GNSS_WARMUP",
            Step::GnssCollect { .. } => "GNSS_COLLECT",
            Step::GnssOff => "GNSS_OFF",
            Step::RadioOn => "RADIO_ON",
            Step::NetAttach { .. } => "NET_ATTACH",
            Step::SessionConnect { .. } => "SESSION_CONNECT",
            Step::Publish => "PUBLISH",
            Step::ReceiveWindow { .. } => "RECEIVE_WINDOW",
            Step::SessionDisconnect => "SESSION_DISCONNECT",
            Step::RadioOff => "RADIO_OFF",
            Step::ArmedWait => "ARMED_WAIT",
            Step::ParkedWait => "PARKED_WAIT",
        }
    }
}

/// Drives one device communication cycle after another.
///
/// Owns all long-lived control state (fix filter history, motion outbox,
/// step deadlines); the interrupt-fed [`SenseCell`] is the only state it
/// shares with other execution contexts.
pub struct Orchestrator<'a, I, G, M, S, C> {
    config: CycleConfig,
    profile: ProfileId,
    gnss: G,
    modem: M,
    session: S,
    clock: C,
    sense: &'a SenseCell,
    filter: FixFilter<I>,
    motion: MotionAggregator<I>,
    uplink: UplinkBuilder,
    downlink: DownlinkHandler,
    diag: DiagRecorder<I>,
    step: Step<I>,
    next_comm_at: I,
    next_heartbeat_at: Option<I>,
    plan: FixPlan,
    cycle_fix: Option<GnssFix>,
    cycle_start_mode: StartMode,
    alarm_skip_used: bool,
    version_sent: bool,
    started_at: I,
}

impl<'a, I, G, M, S, C> Orchestrator<'a, I, G, M, S, C>
where
    I: TickInstant,
    G: GnssLink,
    M: ModemLink,
    S: SessionLink,
    C: WallClock,
{
    /// Creates the orchestrator and forces both antenna consumers off,
    /// tolerating whatever hardware state a fault left behind.
    pub fn new(
        mut gnss: G,
        mut modem: M,
        session: S,
        clock: C,
        sense: &'a SenseCell,
        profile: ProfileId,
        config: CycleConfig,
        now: I,
    ) -> Self {
        modem.radio_off();
        gnss.power_off();

        Self {
            next_comm_at: now + config.first_comm_delay,
            config,
            profile,
            gnss,
            modem,
            session,
            clock,
            sense,
            filter: FixFilter::default(),
            motion: MotionAggregator::default(),
            uplink: UplinkBuilder::new(),
            downlink: DownlinkHandler::new(),
            diag: DiagRecorder::new(),
            step: Step::Decide,
            next_heartbeat_at: None,
            plan: FixPlan::Skip,
            cycle_fix: None,
            cycle_start_mode: StartMode::Unknown,
            alarm_skip_used: false,
            version_sent: false,
            started_at: now,
        }
    }

    /// Current step.
    #[must_use]
    pub fn step(&self) -> &Step<I> {
        &self.step
    }

    /// Active operating profile.
    #[must_use]
    pub fn profile(&self) -> &'static ProfileConfig {
        profile_by_id(self.profile)
    }

    /// Motion aggregator state (read-only).
    #[must_use]
    pub fn motion(&self) -> &MotionAggregator<I> {
        &self.motion
    }

    /// Fix filter state (read-only).
    #[must_use]
    pub fn filter(&self) -> &FixFilter<I> {
        &self.filter
    }

    /// Diagnostic event ring.
    #[must_use]
    pub fn diag(&self) -> &DiagRecorder<I> {
        &self.diag
    }

    /// Next scheduled communication time.
    #[must_use]
    pub fn next_comm_at(&self) -> I {
        self.next_comm_at
    }

    /// Applies an externally driven mode change.
    pub fn set_profile(&mut self, id: ProfileId, now: I) {
        self.profile = id;
        self.alarm_skip_used = false;
        self.motion.on_profile_changed(profile_by_id(id));
        self.diag.record(DiagEvent::ProfileChanged { to: id }, now);
    }

    /// Advances the cycle by one non-blocking tick.
    pub fn tick(&mut self, now: I) {
        self.ingest_motion(now);

        match self.step {
            Step::Decide => self.tick_decide(now),
            Step::GnssOn => self.enter_gnss_warmup(now),
            Step::GnssWarmup { deadline } => {
                if now >= deadline {
                    self.enter_gnss_collect(now);
                }
            }
            Step::GnssCollect {
                deadline,
                next_poll,
                interval,
            } => self.tick_gnss_collect(now, deadline, next_poll, interval),
            Step::GnssOff => self.enter_radio_on(now),
            Step::RadioOn => self.enter_net_attach(now),
            Step::NetAttach { deadline } => self.tick_net_attach(now, deadline),
            Step::SessionConnect { deadline } => self.tick_session_connect(now, deadline),
            Step::Publish => self.tick_publish(now),
            Step::ReceiveWindow { deadline } => self.tick_receive_window(now, deadline),
            Step::SessionDisconnect => self.enter_radio_off(now),
            Step::RadioOff => self.tick_radio_off(now),
            Step::ArmedWait => {
                if self.motion.pending() {
                    self.next_comm_at = now;
                    self.step = Step::Decide;
                } else if now >= self.next_comm_at {
                    self.step = Step::Decide;
                }
            }
            Step::ParkedWait => {
                if now >= self.next_comm_at {
                    self.step = Step::Decide;
                }
            }
        }
    }

    fn ingest_motion(&mut self, now: I) {
        let raw = self.sense.drain();
        if raw.is_empty() {
            return;
        }

        let profile = profile_by_id(self.profile);
        match self.motion.ingest(raw, profile, now) {
            IngestOutcome::Accepted {
                accepted_mask,
                raw_count,
                ..
            } => {
                self.diag.record(
                    DiagEvent::MotionAccepted {
                        mask: accepted_mask,
                        raw_count,
                    },
                    now,
                );
            }
            IngestOutcome::RateLimited { raw_count, .. } => {
                self.diag
                    .record(DiagEvent::MotionRateLimited { raw_count }, now);
            }
            IngestOutcome::LockedOut { mask } => {
                self.diag.record(DiagEvent::MotionLockedOut { mask }, now);
            }
            IngestOutcome::Idle | IngestOutcome::Disabled => {}
        }
    }

    fn tick_decide(&mut self, now: I) {
        if self.motion.close_awake_if_expired(now) {
            self.diag.record(DiagEvent::StayAwakeExpired, now);
        }

        let profile = profile_by_id(self.profile);
        let comm_due = now >= self.next_comm_at;
        let need_comm = self.motion.pending() || comm_due;

        self.cycle_fix = None;
        self.cycle_start_mode = StartMode::Unknown;

        if !need_comm {
            self.enter_wait(profile.id);
            return;
        }

        // The first pending motion event in an armed episode skips GNSS to
        // minimize latency-to-alert; every other due cycle acquires when
        // the profile budgets time for it.
        self.plan = if profile.id.monitors_motion() && self.motion.pending() && !self.alarm_skip_used
        {
            self.alarm_skip_used = true;
            FixPlan::Skip
        } else if profile.fix_budget > Duration::ZERO {
            FixPlan::Single {
                budget: profile.fix_budget,
            }
        } else {
            FixPlan::Skip
        };

        match self.plan {
            FixPlan::Single { .. } => self.enter_gnss_on(now),
            FixPlan::Skip => self.enter_radio_on(now),
        }
    }

    fn enter_gnss_on(&mut self, now: I) {
        // Shared antenna path: radio off before the receiver powers up.
        self.modem.radio_off();

        let mode = self.filter.pick_start_mode(now, self.clock.is_valid());
        self.cycle_start_mode = mode;
        self.gnss.power_on(mode);
        self.filter.begin_acquisition(now, mode);
        self.diag.record(DiagEvent::GnssStarted { mode }, now);

        self.step = Step::GnssOn;
    }

    fn enter_gnss_warmup(&mut self, now: I) {
        self.step = Step::GnssWarmup {
            deadline: now + self.config.gnss_warmup,
        };
    }

    fn enter_gnss_collect(&mut self, now: I) {
        let budget = match self.plan {
            FixPlan::Single { budget } => budget,
            FixPlan::Skip => Duration::ZERO,
        };
        self.step = Step::GnssCollect {
            deadline: now + budget,
            next_poll: now,
            interval: self.config.gnss_poll_interval,
        };
    }

    fn tick_gnss_collect(&mut self, now: I, deadline: I, next_poll: I, interval: Duration) {
        let mut interval = interval;
        let mut next_poll = next_poll;

        if now >= next_poll {
            if let Some(sentence) = self.gnss.poll_once()
                && let Some(fix) = self.filter.evaluate(&sentence, now)
            {
                if fix.candidate && !fix.valid {
                    interval = self.config.gnss_poll_interval_candidate;
                }
                if fix.valid {
                    self.diag.record(
                        DiagEvent::GnssFixValid {
                            ttff_s: fix.ttff_s,
                            sats: fix.sats_used,
                        },
                        now,
                    );
                    if fix.suspect_altitude() {
                        self.diag.record(DiagEvent::GnssSuspectAltitude, now);
                    }
                    self.cycle_fix = Some(fix);
                    self.enter_gnss_off(now);
                    return;
                }
            }
            next_poll = now + interval;
        }

        if now >= deadline {
            // Non-fatal: the cycle proceeds without a fix.
            self.diag.record(DiagEvent::GnssTimeout, now);
            self.enter_gnss_off(now);
            return;
        }

        self.step = Step::GnssCollect {
            deadline,
            next_poll,
            interval,
        };
    }

    fn enter_gnss_off(&mut self, _now: I) {
        self.gnss.power_off();
        self.filter.end_acquisition();
        self.step = Step::GnssOff;
    }

    fn enter_radio_on(&mut self, _now: I) {
        // Shared antenna path: receiver off before the radio attaches.
        self.gnss.power_off();
        self.filter.end_acquisition();
        self.modem.radio_on();
        self.step = Step::RadioOn;
    }

    fn enter_net_attach(&mut self, now: I) {
        self.step = Step::NetAttach {
            deadline: now + self.config.net_attach_deadline,
        };
    }

    fn tick_net_attach(&mut self, now: I, deadline: I) {
        match self.modem.connect_data(
            self.config.apn,
            self.config.registration_timeout,
            self.config.attach_timeout,
        ) {
            Ok(info) => {
                self.diag.record(
                    DiagEvent::NetAttached {
                        signal_quality: info.signal_quality,
                    },
                    now,
                );
                self.clock.sync();
                self.step = Step::SessionConnect {
                    deadline: now + self.config.session_connect_deadline,
                };
            }
            Err(_) if now >= deadline => {
                self.diag.record(DiagEvent::NetAttachTimeout, now);
                self.enter_radio_off(now);
            }
            Err(_) => {}
        }
    }

    fn tick_session_connect(&mut self, now: I, deadline: I) {
        if self.session.connect() {
            self.session.subscribe(topics::DOWNLINK);
            self.session.subscribe(topics::MOTION_ACK);

            if !self.version_sent {
                let profile = profile_by_id(self.profile);
                if let Ok(frame) = self.uplink.version(&self.clock, profile)
                    && self.publish_frame(&frame, now)
                {
                    self.version_sent = true;
                }
            }

            self.step = Step::Publish;
        } else if now >= deadline {
            self.diag.record(DiagEvent::SessionConnectTimeout, now);
            self.enter_session_disconnect(now);
        }
    }

    fn tick_publish(&mut self, now: I) {
        if let FixPlan::Single { budget } = self.plan {
            let profile = profile_by_id(self.profile);
            let frame = match self.cycle_fix.as_ref() {
                Some(fix) => self.uplink.position(
                    Some(fix),
                    fix.start_mode,
                    fix.ttff_s,
                    0,
                    &self.clock,
                    profile,
                ),
                None => {
                    let fix_age_ms = duration_millis(self.filter.fix_age(now));
                    let ttff_s = u16::try_from(budget.as_secs()).unwrap_or(u16::MAX);
                    self.uplink.position(
                        None,
                        self.cycle_start_mode,
                        ttff_s,
                        fix_age_ms,
                        &self.clock,
                        profile,
                    )
                }
            };
            if let Ok(frame) = frame {
                self.publish_frame(&frame, now);
            }
        }

        self.publish_motion_or_drop(now);
        self.publish_alive(now);

        self.enter_receive_window(now);
    }

    fn publish_motion_or_drop(&mut self, now: I) {
        if !self.motion.pending() {
            return;
        }

        if self.motion.eligible_for_publish(now) {
            let Some(event) = self.motion.outbox().copied() else {
                return;
            };
            self.motion.mark_published(now);

            let profile = profile_by_id(self.profile);
            let first_ms = millis_since(event.first_at, self.started_at);
            let last_ms = millis_since(event.last_at, self.started_at);
            if let Ok(frame) = self.uplink.motion(
                event.id,
                event.count,
                first_ms,
                last_ms,
                event.src_mask,
                &self.clock,
                profile,
            ) {
                self.publish_frame(&frame, now);
            }
            self.diag.record(
                DiagEvent::MotionPublished {
                    event_id: event.id,
                    count: event.count,
                    mask: event.src_mask,
                },
                now,
            );
        } else if let Some(event) = self.motion.drop_pending() {
            // Blocked by its own lockout: bounded staleness beats an
            // unbounded backlog, so the event is discarded.
            self.diag.record(
                DiagEvent::MotionDropped {
                    event_id: event.id,
                    count: event.count,
                },
                now,
            );
        }
    }

    fn enter_receive_window(&mut self, now: I) {
        let armed_awake = self.profile.monitors_motion() && self.motion.awake_active(now);
        let deadline = if armed_awake {
            self.next_heartbeat_at = Some(now + self.motion.config().heartbeat_interval);
            None
        } else {
            let window = if self.motion.pending() {
                self.config.rx_window_pending
            } else {
                self.config.rx_window_idle
            };
            Some(now + window)
        };
        self.step = Step::ReceiveWindow { deadline };
    }

    fn tick_receive_window(&mut self, now: I, deadline: Option<I>) {
        for _ in 0..MAX_INBOUND_PER_TICK {
            let Some(message) = self.session.service() else {
                break;
            };
            self.handle_inbound(&message, now);
        }

        match deadline {
            None => {
                if !(self.profile.monitors_motion() && self.motion.awake_active(now)) {
                    if self.motion.close_awake_if_expired(now) {
                        self.diag.record(DiagEvent::StayAwakeExpired, now);
                    }
                    self.enter_session_disconnect(now);
                    return;
                }

                // An eligible pending event preempts straight back to
                // publish. A transmitted event awaiting acknowledgment sits
                // behind its lockout until the ack clears it or the lockout
                // expires and it becomes eligible again.
                if self.motion.pending() && self.motion.eligible_for_publish(now) {
                    self.step = Step::Publish;
                    return;
                }

                if let Some(heartbeat_at) = self.next_heartbeat_at
                    && now >= heartbeat_at
                {
                    self.publish_alive(now);
                    self.diag.record(DiagEvent::Heartbeat, now);
                    self.next_heartbeat_at =
                        Some(now + self.motion.config().heartbeat_interval);
                }
            }
            Some(deadline) if now >= deadline => self.enter_session_disconnect(now),
            Some(_) => {}
        }
    }

    fn handle_inbound(&mut self, message: &InboundMessage, now: I) {
        let result = self.downlink.handle(&message.topic, &message.payload);

        if let Some(event_id) = result.motion_ack
            && self.motion.acknowledge(event_id)
        {
            self.diag.record(DiagEvent::MotionAcked { event_id }, now);
        }

        if let Some(reply) = result.reply {
            let profile = profile_by_id(self.profile);
            if let Ok(frame) = self.uplink.ack_reply(
                reply.ack_msg_id,
                reply.status,
                reply.detail,
                &self.clock,
                profile,
            ) {
                self.publish_frame(&frame, now);
            }
            self.diag.record(
                DiagEvent::DownlinkReplied {
                    ack_msg_id: reply.ack_msg_id,
                    status: reply.status,
                },
                now,
            );
        }

        if let Some(profile_id) = result.set_profile {
            self.set_profile(profile_id, now);
            // Immediate feedback so the operator sees the new mode.
            self.publish_alive(now);
        }
    }

    fn enter_session_disconnect(&mut self, _now: I) {
        self.session.disconnect();
        self.step = Step::SessionDisconnect;
    }

    fn enter_radio_off(&mut self, _now: I) {
        self.modem.radio_off();
        self.step = Step::RadioOff;
    }

    fn tick_radio_off(&mut self, now: I) {
        let profile = profile_by_id(self.profile);
        let interval = if profile.id.monitors_motion() && self.motion.awake_active(now) {
            self.motion.config().heartbeat_interval
        } else {
            profile.comm_interval
        };
        self.next_comm_at = now + interval;
        self.enter_wait(profile.id);
    }

    fn enter_wait(&mut self, id: ProfileId) {
        self.step = if id.monitors_motion() {
            Step::ArmedWait
        } else {
            Step::ParkedWait
        };
    }

    fn publish_alive(&mut self, now: I) -> bool {
        let uptime = now.saturating_duration_since(self.started_at).as_secs();
        let uptime_s = u32::try_from(uptime).unwrap_or(u32::MAX);
        let profile = profile_by_id(self.profile);
        match self.uplink.alive(&self.clock, profile, uptime_s) {
            Ok(frame) => self.publish_frame(&frame, now),
            Err(_) => false,
        }
    }

    fn publish_frame(&mut self, frame: &UplinkFrame, now: I) -> bool {
        let ok = self
            .session
            .publish(frame.topic, &frame.payload, frame.retain);
        if !ok {
            self.diag
                .record(DiagEvent::PublishFailed { kind: frame.kind }, now);
        }
        ok
    }
}

fn duration_millis(duration: Option<Duration>) -> u64 {
    duration
        .map(|value| u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn millis_since<I: TickInstant>(instant: I, origin: I) -> u64 {
    u64::try_from(instant.saturating_duration_since(origin).as_millis()).unwrap_or(u64::MAX)
}
