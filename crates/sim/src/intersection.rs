use crate::{DemandParams, ReaderFault, TrafficSim};
use bus::{Approach, Bus, EmergencyMessage, LocalBroker, Message, Topics};
use controller::{
    ConfigError, ControlLoop, ControllerSetup, RecordingOutputs, SignalOutputs, Transition,
};
use crossbeam_channel::Receiver;
use detector::{DetectorConfig, DetectorMap, DetectorNode, TagId};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// An emergency vehicle announced at `at_ms`, optionally resolved later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmergencyCall {
    pub at_ms: u64,
    pub resolve_at_ms: Option<u64>,
}

/// Detectors, bus and controller wired together over an in-process broker.
pub struct Intersection<O: SignalOutputs = RecordingOutputs> {
    broker: LocalBroker,
    topics: Topics,
    detectors: BTreeMap<String, DetectorNode<LocalBroker>>,
    map: DetectorMap,
    control: ControlLoop<LocalBroker, O>,
    observer: Receiver<Message>,
    traffic: TrafficSim,
    pending: Vec<(u64, bool)>,
    transitions: Vec<Transition>,
}

impl Intersection {
    pub fn new(
        setup: ControllerSetup,
        detectors: &[DetectorConfig],
        demand: DemandParams,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        Self::with_outputs(setup, detectors, demand, seed, RecordingOutputs::default())
    }
}

impl<O: SignalOutputs> Intersection<O> {
    pub fn with_outputs(
        setup: ControllerSetup,
        detectors: &[DetectorConfig],
        demand: DemandParams,
        seed: u64,
        outputs: O,
    ) -> Result<Self, ConfigError> {
        let broker = LocalBroker::new();
        let topics = Topics::from_config(&setup.bus);
        let inbound = broker.subscribe_all(&topics.controller_inbound());
        let observer = broker.subscribe(&format!("{}#", topics.prefix()));
        let control = ControlLoop::new(
            setup,
            inbound,
            broker.clone(),
            outputs,
            0,
        )?;

        let map = DetectorMap::from_configs(detectors);
        let detectors = detectors
            .iter()
            .map(|cfg| {
                let node = DetectorNode::new(cfg.clone(), topics.clone(), broker.clone());
                (cfg.id.clone(), node)
            })
            .collect();

        Ok(Self {
            broker,
            topics,
            detectors,
            map,
            control,
            observer,
            traffic: TrafficSim::new(demand, seed),
            pending: Vec::new(),
            transitions: Vec::new(),
        })
    }

    pub fn broker(&self) -> &LocalBroker {
        &self.broker
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn control(&self) -> &ControlLoop<LocalBroker, O> {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ControlLoop<LocalBroker, O> {
        &mut self.control
    }

    pub fn detector(&self, id: &str) -> Option<&DetectorNode<LocalBroker>> {
        self.detectors.get(id)
    }

    /// Every phase transition the controller has made so far.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn set_reader_fault(&mut self, approach: Approach, fault: ReaderFault) {
        self.traffic.set_fault(approach, fault);
    }

    pub fn schedule_emergency(&mut self, call: EmergencyCall) {
        self.pending.push((call.at_ms, false));
        if let Some(t) = call.resolve_at_ms {
            self.pending.push((t, true));
        }
        self.pending.sort_by_key(|(t, _)| *t);
    }

    fn announce_emergencies(&mut self, now_ms: u64) {
        let due = self.pending.iter().take_while(|(t, _)| *t <= now_ms).count();
        for (at_ms, resolved) in self.pending.drain(..due) {
            let msg = EmergencyMessage {
                ts_ms: at_ms,
                resolved,
            };
            if let Err(e) = self.broker.publish_msg(self.topics.emergency(), &msg) {
                warn!(error = %e, resolved, "emergency message lost");
            }
        }
    }

    /// Earliest instant with timed work: a controller deadline, a publish or
    /// a scripted emergency.
    pub fn next_wakeup_ms(&self) -> Option<u64> {
        let scripted = self.pending.first().map(|(t, _)| *t);
        match (self.control.next_wakeup_ms(), scripted) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Advance the whole intersection to `now_ms` and return every bus
    /// message seen in the session namespace since the last step.
    pub fn step(&mut self, now_ms: u64) -> Vec<Message> {
        for read in self.traffic.advance(now_ms) {
            let lanes: Vec<&str> = self.map.detectors_for(read.approach).collect();
            if lanes.is_empty() {
                debug!(approach = %read.approach, "no detector covers approach, read ignored");
                continue;
            }
            // A vehicle stays in one lane, so all its reads hit the same reader.
            let id = lanes[lane_of(&read.tag, lanes.len())];
            if let Some(node) = self.detectors.get_mut(id) {
                node.on_tag_read(&read.tag, read.at_ms);
            }
        }
        self.announce_emergencies(now_ms);
        let made = self.control.run_once(now_ms);
        self.transitions.extend(made);
        self.observer.try_iter().collect()
    }
}

fn lane_of(tag: &TagId, lanes: usize) -> usize {
    let h = tag
        .0
        .iter()
        .fold(0usize, |h, b| h.wrapping_mul(31).wrapping_add(usize::from(*b)));
    h % lanes
}
