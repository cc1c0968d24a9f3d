use crate::{DemandParams, EmergencyCall, Intersection, ReaderFault};
use bus::Approach;
use controller::{ConfigError, ControllerSetup, RecordingOutputs, SignalOutputs};
use detector::DetectorConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    Normal,
    RushHourA,
    Emergency,
    Starvation,
    ReaderDropout,
}

/// Traffic, detector and controller adjustments a scenario applies.
#[derive(Clone, Debug)]
pub struct ScenarioSetup {
    pub demand: DemandParams,
    pub cooldown_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
    pub emergencies: Vec<EmergencyCall>,
    pub faults: Vec<(Approach, ReaderFault)>,
}

impl Default for ScenarioSetup {
    fn default() -> Self {
        Self {
            demand: DemandParams::default(),
            cooldown_ms: None,
            max_wait_ms: None,
            emergencies: Vec::new(),
            faults: Vec::new(),
        }
    }
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Normal,
        Scenario::RushHourA,
        Scenario::Emergency,
        Scenario::Starvation,
        Scenario::ReaderDropout,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Scenario::Normal => "Normal",
            Scenario::RushHourA => "Rush hour on A",
            Scenario::Emergency => "Emergency vehicles",
            Scenario::Starvation => "Heavy A, light B (wait ceiling)",
            Scenario::ReaderDropout => "Reader dropout on B",
        }
    }

    pub fn setup(self) -> ScenarioSetup {
        match self {
            Scenario::Normal => ScenarioSetup::default(),
            Scenario::RushHourA => ScenarioSetup {
                demand: DemandParams {
                    per_minute: [12.0, 3.0],
                    dwell_ms: 2000,
                    reread_ms: 500,
                },
                cooldown_ms: Some(3000),
                ..Default::default()
            },
            Scenario::Emergency => ScenarioSetup {
                emergencies: vec![
                    EmergencyCall {
                        at_ms: 30_000,
                        resolve_at_ms: None,
                    },
                    EmergencyCall {
                        at_ms: 60_000,
                        resolve_at_ms: Some(62_000),
                    },
                ],
                ..Default::default()
            },
            Scenario::Starvation => ScenarioSetup {
                demand: DemandParams {
                    per_minute: [30.0, 4.0],
                    dwell_ms: 1000,
                    reread_ms: 250,
                },
                cooldown_ms: Some(1500),
                max_wait_ms: Some(15_000),
                ..Default::default()
            },
            Scenario::ReaderDropout => ScenarioSetup {
                faults: vec![(Approach::B, ReaderFault::DropoutEvery { n: 3 })],
                ..Default::default()
            },
        }
    }

    /// One detector per approach, using the scenario's cooldown if it sets one.
    pub fn detectors(self) -> Vec<DetectorConfig> {
        let cooldown = self.setup().cooldown_ms;
        Approach::ALL
            .iter()
            .map(|a| {
                let mut cfg = DetectorConfig::for_approach(*a);
                if let Some(ms) = cooldown {
                    cfg.cooldown_ms = ms;
                }
                cfg
            })
            .collect()
    }

    pub fn build(
        self,
        controller: ControllerSetup,
        detectors: &[DetectorConfig],
        seed: u64,
    ) -> Result<Intersection, ConfigError> {
        self.build_with(controller, detectors, seed, RecordingOutputs::default())
    }

    /// Like [`Scenario::build`], driving `outputs` instead of a recorder.
    pub fn build_with<O: SignalOutputs>(
        self,
        mut controller: ControllerSetup,
        detectors: &[DetectorConfig],
        seed: u64,
        outputs: O,
    ) -> Result<Intersection<O>, ConfigError> {
        let s = self.setup();
        if let Some(ms) = s.max_wait_ms {
            controller.timing.max_wait_ms = ms;
        }
        let mut x = Intersection::with_outputs(controller, detectors, s.demand, seed, outputs)?;
        for call in s.emergencies {
            x.schedule_emergency(call);
        }
        for (approach, fault) in s.faults {
            x.set_reader_fault(approach, fault);
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controller::TransitionCause;

    #[test]
    fn every_scenario_builds_and_runs() {
        for s in Scenario::ALL {
            let mut x = s
                .build(ControllerSetup::default(), &s.detectors(), 42)
                .unwrap();
            for t in (0..=90_000).step_by(100) {
                x.step(t);
            }
            assert!(!x.control().fail_safe(), "{}", s.label());
            assert!(!x.transitions().is_empty(), "{}", s.label());
        }
    }

    #[test]
    fn emergency_scenario_preempts_twice() {
        let s = Scenario::Emergency;
        let mut x = s.build(ControllerSetup::default(), &s.detectors(), 3).unwrap();
        for t in (0..=70_000).step_by(100) {
            x.step(t);
        }
        let causes: Vec<_> = x
            .transitions()
            .iter()
            .filter(|t| {
                matches!(
                    t.cause,
                    TransitionCause::EmergencyPreempt
                        | TransitionCause::EmergencyExpired
                        | TransitionCause::EmergencyCleared
                )
            })
            .map(|t| (t.at_ms, t.cause))
            .collect();
        assert_eq!(
            causes,
            vec![
                (30_000, TransitionCause::EmergencyPreempt),
                (35_000, TransitionCause::EmergencyExpired),
                (60_000, TransitionCause::EmergencyPreempt),
                (62_000, TransitionCause::EmergencyCleared),
            ]
        );
    }

    #[test]
    fn scenario_cooldown_reaches_detectors() {
        let d = Scenario::Starvation.detectors();
        assert!(d.iter().all(|c| c.cooldown_ms == 1500));
        let d = Scenario::Normal.detectors();
        assert!(d.iter().all(|c| c.cooldown_ms == 8000));
    }
}
