use bus::Approach;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("min_green_ms ({min}) exceeds max_green_ms ({max})")]
    GreenBounds { min: u64, max: u64 },
    #[error("max_wait_ms ({max_wait}) must cover min_green_ms plus all_red_ms ({needed})")]
    WaitTooShort { max_wait: u64, needed: u64 },
}

/// Timing and queue parameters of the signal controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub min_green_ms: u64,
    pub max_green_ms: u64,
    pub extend_step_ms: u64,
    pub max_wait_ms: u64,
    pub state_publish_ms: u64,
    pub status_publish_ms: u64,
    pub discharge_tick_ms: u64,
    pub discharge_rate: u32,
    pub queue_max: u32,
    pub emergency_ms: u64,
    /// All-red clearance held in SWITCHING. Zero passes straight through.
    pub all_red_ms: u64,
    pub initial_approach: Approach,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_green_ms: 5000,
            max_green_ms: 20000,
            extend_step_ms: 2000,
            max_wait_ms: 30000,
            state_publish_ms: 1000,
            status_publish_ms: 5000,
            discharge_tick_ms: 1000,
            discharge_rate: 1,
            queue_max: 50,
            emergency_ms: 5000,
            all_red_ms: 0,
            initial_approach: Approach::A,
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("min_green_ms", self.min_green_ms),
            ("max_green_ms", self.max_green_ms),
            ("extend_step_ms", self.extend_step_ms),
            ("max_wait_ms", self.max_wait_ms),
            ("state_publish_ms", self.state_publish_ms),
            ("status_publish_ms", self.status_publish_ms),
            ("discharge_tick_ms", self.discharge_tick_ms),
            ("emergency_ms", self.emergency_ms),
            ("discharge_rate", u64::from(self.discharge_rate)),
            ("queue_max", u64::from(self.queue_max)),
        ];
        for (name, v) in nonzero {
            if v == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.min_green_ms > self.max_green_ms {
            return Err(ConfigError::GreenBounds {
                min: self.min_green_ms,
                max: self.max_green_ms,
            });
        }
        let needed = self.min_green_ms + self.all_red_ms;
        if self.max_wait_ms < needed {
            return Err(ConfigError::WaitTooShort {
                max_wait: self.max_wait_ms,
                needed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(TimingConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_inverted_green_bounds() {
        let cfg = TimingConfig {
            min_green_ms: 30_000,
            max_green_ms: 20_000,
            max_wait_ms: 60_000,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::GreenBounds {
                min: 30_000,
                max: 20_000
            })
        );
    }

    #[test]
    fn rejects_zero_tick() {
        let cfg = TimingConfig {
            discharge_tick_ms: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("discharge_tick_ms")));
    }

    #[test]
    fn rejects_wait_shorter_than_min_green() {
        let cfg = TimingConfig {
            max_wait_ms: 4_000,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::WaitTooShort { .. })
        ));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: TimingConfig =
            serde_json::from_str(r#"{"min_green_ms":3000,"initial_approach":"B"}"#).unwrap();
        assert_eq!(cfg.min_green_ms, 3000);
        assert_eq!(cfg.max_green_ms, 20000);
        assert_eq!(cfg.initial_approach, Approach::B);
    }
}
