use bus::{Approach, Aspect};
use tracing::error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TripReason {
    ConflictingGreens,
    GreenOverrun,
}

#[derive(Clone, Copy, Debug)]
pub struct MonitorConfig {
    pub max_green_ms: u64,
    /// Tolerance on top of max green before tripping.
    pub slack_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_green_ms: 20000,
            slack_ms: 500,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MonitorState {
    pub tripped: bool,
    pub reason: Option<TripReason>,
    green_since: [Option<u64>; 2],
}

impl MonitorState {
    /// Clear a latched trip after the cause has been dealt with.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What the outputs are actually showing at `t_ms`.
#[derive(Clone, Copy, Debug)]
pub struct Observation {
    pub t_ms: u64,
    pub aspects: [Aspect; 2],
}

fn trip(state: &mut MonitorState, reason: TripReason, t_ms: u64) {
    state.tripped = true;
    state.reason = Some(reason);
    error!(?reason, t_ms, "conflict monitor tripped, forcing all red");
}

/// Check one observation of the lamp outputs.
/// Once tripped the state stays latched until [`MonitorState::reset`].
pub fn evaluate(cfg: &MonitorConfig, state: &mut MonitorState, obs: Observation) {
    if state.tripped {
        return;
    }

    if obs.aspects.iter().all(|a| a.is_green()) {
        trip(state, TripReason::ConflictingGreens, obs.t_ms);
        return;
    }

    let limit = cfg.max_green_ms + cfg.slack_ms;
    for a in Approach::ALL {
        let slot = &mut state.green_since[a.index()];
        if !obs.aspects[a.index()].is_green() {
            *slot = None;
            continue;
        }
        let since = *slot.get_or_insert(obs.t_ms);
        if obs.t_ms.saturating_sub(since) > limit {
            trip(state, TripReason::GreenOverrun, obs.t_ms);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(t_ms: u64, a: Aspect, b: Aspect) -> Observation {
        Observation {
            t_ms,
            aspects: [a, b],
        }
    }

    #[test]
    fn both_green_trips_and_latches() {
        let cfg = MonitorConfig::default();
        let mut st = MonitorState::default();
        evaluate(&cfg, &mut st, obs(0, Aspect::Green, Aspect::Green));
        assert!(st.tripped);
        assert_eq!(st.reason, Some(TripReason::ConflictingGreens));

        evaluate(&cfg, &mut st, obs(100, Aspect::Red, Aspect::Red));
        assert!(st.tripped);
    }

    #[test]
    fn green_held_past_limit_trips() {
        let cfg = MonitorConfig {
            max_green_ms: 1000,
            slack_ms: 0,
        };
        let mut st = MonitorState::default();
        for t in (0..=1000).step_by(100) {
            evaluate(&cfg, &mut st, obs(t, Aspect::Red, Aspect::Green));
        }
        assert!(!st.tripped);
        evaluate(&cfg, &mut st, obs(1100, Aspect::Red, Aspect::Green));
        assert_eq!(st.reason, Some(TripReason::GreenOverrun));
    }

    #[test]
    fn red_resets_dwell_tracking() {
        let cfg = MonitorConfig {
            max_green_ms: 1000,
            slack_ms: 0,
        };
        let mut st = MonitorState::default();
        evaluate(&cfg, &mut st, obs(0, Aspect::Green, Aspect::Red));
        evaluate(&cfg, &mut st, obs(900, Aspect::Red, Aspect::Red));
        evaluate(&cfg, &mut st, obs(1000, Aspect::Green, Aspect::Red));
        evaluate(&cfg, &mut st, obs(1900, Aspect::Green, Aspect::Red));
        assert!(!st.tripped);
    }

    #[test]
    fn reset_clears_latch() {
        let mut st = MonitorState::default();
        evaluate(
            &MonitorConfig::default(),
            &mut st,
            obs(0, Aspect::Green, Aspect::Green),
        );
        st.reset();
        assert!(!st.tripped);
        assert_eq!(st.reason, None);
    }
}
