use crate::{Approach, BusConfig};
use thiserror::Error;

/// Classification of a topic inside the session namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Arrival(Approach),
    Emergency,
    State,
    Status,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("topic {0:?} is outside namespace {1:?}")]
    ForeignNamespace(String, String),
    #[error("arrival topic names unknown approach {0:?}")]
    UnknownApproach(String),
    #[error("unrecognised topic {0:?}")]
    Unrecognised(String),
}

/// Fully-qualified topic names for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    emergency: String,
    arrive: [String; 2],
    state: String,
    status: String,
}

impl Topics {
    pub fn new(base: &str, team_id: &str) -> Self {
        let base = base.trim_end_matches('/');
        let team = team_id.trim_matches('/');
        let prefix = if team.is_empty() {
            format!("{base}/")
        } else {
            format!("{base}/{team}/")
        };
        Self {
            emergency: format!("{prefix}emergency/detect"),
            arrive: [
                format!("{prefix}traffic/A/arrive"),
                format!("{prefix}traffic/B/arrive"),
            ],
            state: format!("{prefix}signal/state"),
            status: format!("{prefix}signal/status"),
            prefix,
        }
    }

    pub fn from_config(cfg: &BusConfig) -> Self {
        Self::new(&cfg.topic_base, &cfg.team_id)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn emergency(&self) -> &str {
        &self.emergency
    }

    pub fn arrive(&self, approach: Approach) -> &str {
        &self.arrive[approach.index()]
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Subscription filters the controller needs for its inbound events.
    pub fn controller_inbound(&self) -> Vec<String> {
        vec![
            self.emergency.clone(),
            self.arrive[0].clone(),
            self.arrive[1].clone(),
        ]
    }

    /// Wildcard filter covering everything the controller publishes.
    pub fn signal_wildcard(&self) -> String {
        format!("{}signal/#", self.prefix)
    }

    pub fn route(&self, topic: &str) -> Result<Route, RouteError> {
        let rest = topic
            .strip_prefix(self.prefix.as_str())
            .ok_or_else(|| RouteError::ForeignNamespace(topic.to_string(), self.prefix.clone()))?;

        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            ["emergency", "detect"] => Ok(Route::Emergency),
            ["signal", "state"] => Ok(Route::State),
            ["signal", "status"] => Ok(Route::Status),
            ["traffic", approach, "arrive"] => approach
                .parse::<Approach>()
                .map(Route::Arrival)
                .map_err(|_| RouteError::UnknownApproach(approach.to_string())),
            _ => Err(RouteError::Unrecognised(topic.to_string())),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::from_config(&BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_namespace_is_team_scoped() {
        let t = Topics::default();
        assert_eq!(t.state(), "stem/Finalize_capstone/LUXOR/signal/state");
        assert_eq!(
            t.arrive(Approach::B),
            "stem/Finalize_capstone/LUXOR/traffic/B/arrive"
        );
        assert_eq!(t.signal_wildcard(), "stem/Finalize_capstone/LUXOR/signal/#");
    }

    #[test]
    fn routes_known_topics() {
        let t = Topics::new("base/", "T1");
        assert_eq!(t.route("base/T1/emergency/detect"), Ok(Route::Emergency));
        assert_eq!(
            t.route("base/T1/traffic/A/arrive"),
            Ok(Route::Arrival(Approach::A))
        );
        assert_eq!(t.route("base/T1/signal/status"), Ok(Route::Status));
    }

    #[test]
    fn rejects_unknown_approach_and_other_sessions() {
        let t = Topics::new("base", "T1");
        assert_eq!(
            t.route("base/T1/traffic/C/arrive"),
            Err(RouteError::UnknownApproach("C".into()))
        );
        assert!(matches!(
            t.route("base/T2/traffic/A/arrive"),
            Err(RouteError::ForeignNamespace(..))
        ));
        assert!(matches!(
            t.route("base/T1/signal/other"),
            Err(RouteError::Unrecognised(_))
        ));
    }
}
