use crate::config::TimingConfig;
use crate::queue::QueueModel;
use bus::{Approach, ModeLabel, PhaseLabel};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalState {
    Green(Approach),
    /// Both approaches red while handing green over.
    Switching { to: Approach },
    Emergency,
}

impl SignalState {
    pub fn green_approach(self) -> Option<Approach> {
        match self {
            SignalState::Green(a) => Some(a),
            _ => None,
        }
    }

    pub fn label(self) -> PhaseLabel {
        match self {
            SignalState::Green(Approach::A) => PhaseLabel::AGreen,
            SignalState::Green(Approach::B) => PhaseLabel::BGreen,
            SignalState::Switching { .. } => PhaseLabel::Switching,
            SignalState::Emergency => PhaseLabel::Emergency,
        }
    }

    pub fn mode(self) -> ModeLabel {
        match self {
            SignalState::Emergency => ModeLabel::Emergency,
            _ => ModeLabel::Normal,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Tick,
    Arrival(Approach),
    EmergencyDetect,
    EmergencyClear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionCause {
    /// Minimum green served and the green approach has no queue left.
    NoDemand,
    MaxGreen,
    /// The red approach reached its wait ceiling.
    Starvation,
    EmergencyPreempt,
    EmergencyExpired,
    EmergencyCleared,
    ClearanceDone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: SignalState,
    pub to: SignalState,
    pub at_ms: u64,
    pub cause: TransitionCause,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct EmergencyRequest {
    activated_ms: u64,
    expires_ms: u64,
}

/// Point-in-time view used by the publisher and the dashboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub at_ms: u64,
    pub state: SignalState,
    pub queues: [u32; 2],
    pub elapsed_ms: u64,
    pub remaining_ms: Option<u64>,
    pub extensions: u32,
    pub emergency_remaining_ms: Option<u64>,
}

/// Two-approach actuated signal with emergency preemption.
///
/// Time is supplied by the caller in milliseconds, so the same controller
/// runs under a wall clock, a simulation or a test harness. Each call to
/// [`SignalController::step`] is atomic: timers that fell due since the
/// previous call, discharge, the event, then every timer rule, in that order.
#[derive(Clone, Debug)]
pub struct SignalController {
    cfg: TimingConfig,
    queues: QueueModel,
    state: SignalState,
    phase_started_ms: u64,
    allowed_ms: u64,
    extensions: u32,
    next_discharge_ms: u64,
    waiting_since: [Option<u64>; 2],
    emergency: Option<EmergencyRequest>,
    resume_approach: Approach,
    now_ms: u64,
    started_ms: u64,
    transitions: u64,
}

impl SignalController {
    pub fn new(cfg: TimingConfig, now_ms: u64) -> Self {
        let initial = cfg.initial_approach;
        info!(approach = %initial, "controller starting");
        Self {
            queues: QueueModel::new(cfg.queue_max, cfg.discharge_rate),
            state: SignalState::Green(initial),
            phase_started_ms: now_ms,
            allowed_ms: cfg.min_green_ms,
            extensions: 0,
            next_discharge_ms: now_ms + cfg.discharge_tick_ms,
            waiting_since: [None; 2],
            emergency: None,
            resume_approach: initial,
            now_ms,
            started_ms: now_ms,
            transitions: 0,
            cfg,
        }
    }

    pub fn config(&self) -> &TimingConfig {
        &self.cfg
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    pub fn queues(&self) -> &QueueModel {
        &self.queues
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn uptime_ms(&self) -> u64 {
        self.now_ms - self.started_ms
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn phase_elapsed_ms(&self) -> u64 {
        self.now_ms - self.phase_started_ms
    }

    pub fn extensions(&self) -> u32 {
        self.extensions
    }

    pub fn emergency_active(&self) -> bool {
        self.emergency.is_some()
    }

    /// How long the approach has held demand while red, if it has.
    pub fn waiting_ms(&self, approach: Approach) -> Option<u64> {
        self.waiting_since[approach.index()].map(|since| self.now_ms - since)
    }

    pub fn snapshot(&self) -> Snapshot {
        let elapsed = self.phase_elapsed_ms();
        let emergency_remaining_ms = self
            .emergency
            .map(|e| e.expires_ms.saturating_sub(self.now_ms));
        let remaining_ms = match self.state {
            SignalState::Green(_) => Some(self.allowed_ms.saturating_sub(elapsed)),
            SignalState::Switching { .. } => Some(self.cfg.all_red_ms.saturating_sub(elapsed)),
            SignalState::Emergency => emergency_remaining_ms,
        };
        Snapshot {
            at_ms: self.now_ms,
            state: self.state,
            queues: self.queues.counts(),
            elapsed_ms: elapsed,
            remaining_ms,
            extensions: self.extensions,
            emergency_remaining_ms,
        }
    }

    /// Earliest future instant at which a `Tick` can change anything.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        let start = self.phase_started_ms;
        let mut candidates: Vec<u64> = Vec::with_capacity(5);
        match self.state {
            SignalState::Green(a) => {
                candidates.push(self.next_discharge_ms);
                candidates.push(start + self.cfg.min_green_ms);
                candidates.push(start + self.cfg.max_green_ms);
                if let Some(d) = self.starvation_deadline(a.other()) {
                    candidates.push(d);
                }
            }
            SignalState::Switching { .. } => candidates.push(start + self.cfg.all_red_ms),
            SignalState::Emergency => {
                if let Some(e) = self.emergency {
                    candidates.push(e.expires_ms);
                }
            }
        }
        candidates.into_iter().filter(|t| *t > self.now_ms).min()
    }

    pub fn step(&mut self, event: ControlEvent, now_ms: u64) -> Vec<Transition> {
        let mut out = Vec::new();
        let now = self.advance_clock(now_ms, &mut out);

        self.discharge_until(now);

        match event {
            ControlEvent::Tick => {}
            ControlEvent::Arrival(a) => {
                self.queues.on_arrival(a);
            }
            ControlEvent::EmergencyDetect => match self.emergency {
                Some(e) => debug!(
                    activated_ms = e.activated_ms,
                    "emergency already active, detect ignored"
                ),
                None => {
                    self.emergency = Some(EmergencyRequest {
                        activated_ms: now,
                        expires_ms: now + self.cfg.emergency_ms,
                    });
                }
            },
            ControlEvent::EmergencyClear => {
                if self.emergency.take().is_none() {
                    debug!("emergency clear with no active emergency");
                }
            }
        }
        self.refresh_waiting(now);
        self.evaluate(now, &mut out);
        out
    }

    /// Move the clock to `now_ms`, firing every timer that fell due on the
    /// way at its own deadline. A late caller delays the lamps, not the
    /// phase timing.
    fn advance_clock(&mut self, now_ms: u64, out: &mut Vec<Transition>) -> u64 {
        if now_ms < self.now_ms {
            warn!(now_ms, last_ms = self.now_ms, "clock went backwards, holding");
            return self.now_ms;
        }
        while let Some(due) = self.next_deadline_ms().filter(|d| *d < now_ms) {
            self.now_ms = due;
            self.discharge_until(due);
            self.refresh_waiting(due);
            self.evaluate(due, out);
        }
        self.now_ms = now_ms;
        self.now_ms
    }

    fn discharge_until(&mut self, now: u64) {
        let Some(a) = self.state.green_approach() else {
            return;
        };
        while self.next_discharge_ms <= now {
            self.queues.on_discharge_tick(a);
            self.next_discharge_ms += self.cfg.discharge_tick_ms;
        }
    }

    fn refresh_waiting(&mut self, now: u64) {
        let green = self.state.green_approach();
        for a in Approach::ALL {
            let slot = &mut self.waiting_since[a.index()];
            if green == Some(a) || !self.queues.has_demand(a) {
                *slot = None;
            } else if slot.is_none() {
                *slot = Some(now);
            }
        }
    }

    fn starvation_deadline(&self, approach: Approach) -> Option<u64> {
        self.waiting_since[approach.index()]
            .map(|since| (since + self.cfg.max_wait_ms).saturating_sub(self.cfg.all_red_ms))
    }

    fn evaluate(&mut self, now: u64, out: &mut Vec<Transition>) {
        if self.emergency.is_some() && self.state != SignalState::Emergency {
            self.resume_approach = match self.state {
                SignalState::Green(a) | SignalState::Switching { to: a } => a,
                SignalState::Emergency => self.resume_approach,
            };
            self.enter(SignalState::Emergency, now, TransitionCause::EmergencyPreempt, out);
            return;
        }

        match self.state {
            SignalState::Emergency => match self.emergency {
                Some(e) if now < e.expires_ms => {}
                Some(_) => {
                    self.emergency = None;
                    self.leave_emergency(now, TransitionCause::EmergencyExpired, out);
                }
                None => self.leave_emergency(now, TransitionCause::EmergencyCleared, out),
            },
            SignalState::Switching { to } => {
                if now >= self.phase_started_ms + self.cfg.all_red_ms {
                    self.grant(to, now, out);
                }
            }
            SignalState::Green(a) => {
                if let Some(cause) = self.green_decision(a, now) {
                    self.begin_switch(a.other(), now, cause, out);
                }
            }
        }
    }

    fn green_decision(&mut self, a: Approach, now: u64) -> Option<TransitionCause> {
        let elapsed = now - self.phase_started_ms;
        if elapsed >= self.cfg.max_green_ms {
            return Some(TransitionCause::MaxGreen);
        }
        if elapsed < self.cfg.min_green_ms {
            return None;
        }

        let starvation = self.starvation_deadline(a.other());
        if starvation.is_some_and(|d| now >= d) {
            return Some(TransitionCause::Starvation);
        }

        if !self.queues.has_demand(a) {
            return Some(TransitionCause::NoDemand);
        }

        // Demand remains: push the allowed duration out in whole steps,
        // clipped to max green and to the red approach's wait ceiling.
        let mut cap = self.cfg.max_green_ms;
        if let Some(d) = starvation {
            cap = cap.min(d - self.phase_started_ms);
        }
        while self.allowed_ms <= elapsed && self.allowed_ms < cap {
            self.allowed_ms = (self.allowed_ms + self.cfg.extend_step_ms).min(cap);
            self.extensions += 1;
            debug!(approach = %a, allowed_ms = self.allowed_ms, extensions = self.extensions, "green extended");
        }
        None
    }

    fn leave_emergency(&mut self, now: u64, cause: TransitionCause, out: &mut Vec<Transition>) {
        let [qa, qb] = self.queues.counts();
        let target = if qa > qb {
            Approach::A
        } else if qb > qa {
            Approach::B
        } else {
            self.resume_approach
        };
        info!(%target, queue_a = qa, queue_b = qb, ?cause, "emergency over");
        self.begin_switch(target, now, cause, out);
    }

    fn begin_switch(
        &mut self,
        to: Approach,
        now: u64,
        cause: TransitionCause,
        out: &mut Vec<Transition>,
    ) {
        self.enter(SignalState::Switching { to }, now, cause, out);
        if self.cfg.all_red_ms == 0 {
            self.grant(to, now, out);
        }
    }

    fn grant(&mut self, to: Approach, now: u64, out: &mut Vec<Transition>) {
        self.enter(
            SignalState::Green(to),
            now,
            TransitionCause::ClearanceDone,
            out,
        );
        self.next_discharge_ms = now + self.cfg.discharge_tick_ms;
    }

    fn enter(&mut self, to: SignalState, now: u64, cause: TransitionCause, out: &mut Vec<Transition>) {
        let from = self.state;
        info!(
            from = ?from.label(),
            to = ?to.label(),
            ?cause,
            held_ms = now - self.phase_started_ms,
            "phase transition"
        );
        self.state = to;
        self.phase_started_ms = now;
        self.allowed_ms = self.cfg.min_green_ms;
        self.extensions = 0;
        self.transitions += 1;
        self.refresh_waiting(now);
        out.push(Transition {
            from,
            to,
            at_ms: now,
            cause,
        });
    }
}
