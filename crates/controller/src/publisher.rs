use crate::machine::Snapshot;
use crate::outputs::Lamps;
use bus::{PerApproach, StateMessage};

/// Decides when state and status messages go out.
///
/// State goes out every `state_period_ms` and immediately after a phase
/// transition; an event-driven publish restarts the periodic timer. Status is
/// an independent, slower heartbeat.
#[derive(Clone, Debug)]
pub struct StatePublisher {
    state_period_ms: u64,
    status_period_ms: u64,
    last_state_ms: Option<u64>,
    last_status_ms: Option<u64>,
    seq: u64,
}

impl StatePublisher {
    pub fn new(state_period_ms: u64, status_period_ms: u64) -> Self {
        Self {
            state_period_ms,
            status_period_ms,
            last_state_ms: None,
            last_status_ms: None,
            seq: 0,
        }
    }

    pub fn state_due(&self, now_ms: u64, transitioned: bool) -> bool {
        transitioned || due(self.last_state_ms, self.state_period_ms, now_ms)
    }

    pub fn status_due(&self, now_ms: u64) -> bool {
        due(self.last_status_ms, self.status_period_ms, now_ms)
    }

    /// Build the next state message. Nothing is recorded until
    /// [`StatePublisher::state_sent`], so a failed publish is retried on the
    /// next loop iteration.
    pub fn state_message(&self, snap: &Snapshot, lamps: &Lamps, fail_safe: bool) -> StateMessage {
        StateMessage {
            seq: self.seq + 1,
            ts_ms: snap.at_ms,
            phase: snap.state.label(),
            mode: snap.state.mode(),
            lamps: PerApproach::from_array(lamps.aspects),
            queue: PerApproach::from_array(snap.queues),
            elapsed_ms: snap.elapsed_ms,
            remaining_ms: snap.remaining_ms,
            extensions: snap.extensions,
            emergency_remaining_ms: snap.emergency_remaining_ms,
            buzzer: lamps.buzzer.is_some(),
            fail_safe,
        }
    }

    /// Restart the periodic timer after a state message went out.
    pub fn state_sent(&mut self, now_ms: u64) {
        self.last_state_ms = Some(now_ms);
        self.seq += 1;
    }

    pub fn status_sent(&mut self, now_ms: u64) {
        self.last_status_ms = Some(now_ms);
    }

    /// Next instant a periodic message falls due, if anything was sent yet.
    pub fn next_due_ms(&self) -> Option<u64> {
        let state = self.last_state_ms.map(|t| t + self.state_period_ms);
        let status = self.last_status_ms.map(|t| t + self.status_period_ms);
        match (state, status) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

fn due(last: Option<u64>, period: u64, now: u64) -> bool {
    match last {
        None => true,
        Some(t) => now.saturating_sub(t) >= period,
    }
}
