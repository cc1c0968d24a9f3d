use crate::config::{ConfigError, TimingConfig};
use crate::machine::{ControlEvent, SignalController, Transition};
use crate::outputs::{Lamps, PinMap, SignalOutputs};
use crate::publisher::StatePublisher;
use bus::{
    decode, ArrivalMessage, Bus, BusConfig, DecodeError, EmergencyMessage, Message, Route,
    RouteError, StatusMessage, Topics,
};
use crossbeam_channel::Receiver;
use safety::{MonitorConfig, MonitorState, Observation};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum InboundError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("controller does not consume {0:?} messages")]
    NotForController(Route),
}

/// Everything the controller node needs at boot.
#[derive(Clone, Debug, Default)]
pub struct ControllerSetup {
    pub timing: TimingConfig,
    pub pins: PinMap,
    pub bus: BusConfig,
    /// Conflict monitor programming. Derived from `timing` when unset.
    pub monitor: Option<MonitorConfig>,
}

/// The controller's single control loop.
///
/// Inbound bus messages queue up on `inbound`; each [`ControlLoop::run_once`]
/// drains them in arrival order, runs one timer tick, drives the outputs and
/// publishes. Nothing else mutates the signal state.
pub struct ControlLoop<B: Bus, O: SignalOutputs> {
    controller: SignalController,
    publisher: StatePublisher,
    monitor_cfg: MonitorConfig,
    monitor: MonitorState,
    topics: Topics,
    team_id: String,
    pins: PinMap,
    inbound: Receiver<Message>,
    bus: B,
    outputs: O,
    lamps: Lamps,
    dropped_events: u64,
    publish_failures: u64,
    bus_up: bool,
}

impl<B: Bus, O: SignalOutputs> ControlLoop<B, O> {
    pub fn new(
        setup: ControllerSetup,
        inbound: Receiver<Message>,
        bus: B,
        outputs: O,
        now_ms: u64,
    ) -> Result<Self, ConfigError> {
        setup.timing.validate()?;
        let topics = Topics::from_config(&setup.bus);
        info!(
            namespace = topics.prefix(),
            broker = %setup.bus.broker_addr(),
            "control loop starting"
        );
        let monitor_cfg = setup.monitor.unwrap_or(MonitorConfig {
            max_green_ms: setup.timing.max_green_ms,
            ..Default::default()
        });
        let publisher = StatePublisher::new(
            setup.timing.state_publish_ms,
            setup.timing.status_publish_ms,
        );
        let controller = SignalController::new(setup.timing, now_ms);
        let lamps = Lamps::for_state(controller.state(), &setup.pins);
        Ok(Self {
            controller,
            publisher,
            monitor_cfg,
            monitor: MonitorState::default(),
            topics,
            team_id: setup.bus.team_id,
            pins: setup.pins,
            inbound,
            bus,
            outputs,
            lamps,
            dropped_events: 0,
            publish_failures: 0,
            bus_up: true,
        })
    }

    pub fn controller(&self) -> &SignalController {
        &self.controller
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    /// Lamps most recently sent to the outputs.
    pub fn lamps(&self) -> Lamps {
        self.lamps
    }

    pub fn fail_safe(&self) -> bool {
        self.monitor.tripped
    }

    pub fn trip_reason(&self) -> Option<safety::TripReason> {
        self.monitor.reason
    }

    pub fn reset_fail_safe(&mut self) {
        if self.monitor.tripped {
            info!("fail-safe reset by operator");
        }
        self.monitor.reset();
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures
    }

    /// Earliest instant the loop has timed work to do.
    pub fn next_wakeup_ms(&self) -> Option<u64> {
        match (self.controller.next_deadline_ms(), self.publisher.next_due_ms()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// One loop iteration at `now_ms`. Returns the phase transitions made.
    pub fn run_once(&mut self, now_ms: u64) -> Vec<Transition> {
        let mut transitions = Vec::new();

        let pending: Vec<Message> = self.inbound.try_iter().collect();
        for msg in pending {
            match self.decode(&msg) {
                Ok(event) => transitions.extend(self.controller.step(event, now_ms)),
                Err(e) => {
                    self.dropped_events += 1;
                    warn!(topic = %msg.topic, error = %e, "inbound message dropped");
                }
            }
        }
        transitions.extend(self.controller.step(ControlEvent::Tick, now_ms));

        let tripped = self.actuate(now_ms);
        self.publish(now_ms, tripped || !transitions.is_empty());
        transitions
    }

    fn decode(&self, msg: &Message) -> Result<ControlEvent, InboundError> {
        match self.topics.route(&msg.topic)? {
            Route::Arrival(approach) => {
                let _: ArrivalMessage = decode(&msg.payload)?;
                Ok(ControlEvent::Arrival(approach))
            }
            Route::Emergency => {
                let body: EmergencyMessage = decode(&msg.payload)?;
                Ok(if body.resolved {
                    ControlEvent::EmergencyClear
                } else {
                    ControlEvent::EmergencyDetect
                })
            }
            other => Err(InboundError::NotForController(other)),
        }
    }

    /// Drive the outputs; returns true if the monitor tripped on this call.
    fn actuate(&mut self, now_ms: u64) -> bool {
        let wanted = Lamps::for_state(self.controller.state(), &self.pins);
        let was_tripped = self.monitor.tripped;
        safety::evaluate(
            &self.monitor_cfg,
            &mut self.monitor,
            Observation {
                t_ms: now_ms,
                aspects: wanted.aspects,
            },
        );
        let tripped_now = self.monitor.tripped && !was_tripped;
        if tripped_now {
            error!(state = ?self.controller.state(), "entering fail-safe all red");
        }
        self.lamps = if self.monitor.tripped {
            Lamps::ALL_RED
        } else {
            wanted
        };
        self.outputs.apply(&self.lamps);
        tripped_now
    }

    fn publish(&mut self, now_ms: u64, transitioned: bool) {
        if self.publisher.state_due(now_ms, transitioned) {
            let snap = self.controller.snapshot();
            let msg = self
                .publisher
                .state_message(&snap, &self.lamps, self.monitor.tripped);
            let topic = self.topics.state().to_string();
            if self.send(&topic, &msg) {
                self.publisher.state_sent(now_ms);
            }
        }

        if self.publisher.status_due(now_ms) {
            let status = StatusMessage {
                ts_ms: now_ms,
                team: self.team_id.clone(),
                uptime_ms: self.controller.uptime_ms(),
                online: true,
                mode: self.controller.state().mode(),
                transitions: self.controller.transitions(),
                dropped_events: self.dropped_events,
                fail_safe: self.monitor.tripped,
            };
            let topic = self.topics.status().to_string();
            if self.send(&topic, &status) {
                self.publisher.status_sent(now_ms);
            }
        }
    }

    fn send<T: Serialize>(&mut self, topic: &str, msg: &T) -> bool {
        match self.bus.publish_msg(topic, msg) {
            Ok(()) => {
                if !self.bus_up {
                    info!(topic, "bus reachable again, publishing resumed");
                    self.bus_up = true;
                }
                true
            }
            Err(e) => {
                self.publish_failures += 1;
                if self.bus_up {
                    warn!(topic, error = %e, "publish failed, running on local state");
                    self.bus_up = false;
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::SignalState;
    use crate::outputs::RecordingOutputs;
    use bus::{encode, Approach, LocalBroker, StateMessage};

    fn setup(broker: &LocalBroker) -> ControlLoop<LocalBroker, RecordingOutputs> {
        let cfg = ControllerSetup::default();
        let topics = Topics::from_config(&cfg.bus);
        let inbound = broker.subscribe_all(&topics.controller_inbound());
        ControlLoop::new(cfg, inbound, broker.clone(), RecordingOutputs::default(), 0).unwrap()
    }

    #[test]
    fn invalid_timing_is_rejected() {
        let broker = LocalBroker::new();
        let mut cfg = ControllerSetup::default();
        cfg.timing.queue_max = 0;
        let (_tx, rx) = crossbeam_channel::unbounded();
        let res = ControlLoop::new(cfg, rx, broker, RecordingOutputs::default(), 0);
        assert!(matches!(res, Err(ConfigError::Zero("queue_max"))));
    }

    #[test]
    fn arrival_and_garbage_on_the_bus() {
        let broker = LocalBroker::new();
        let mut node = setup(&broker);
        let topics = node.topics().clone();

        broker
            .publish(topics.arrive(Approach::B), &encode(&ArrivalMessage { ts_ms: 0, detector: "x".into() }).unwrap())
            .unwrap();
        broker.publish(topics.arrive(Approach::A), b"garbage").unwrap();
        node.run_once(100);

        assert_eq!(node.controller().queues().counts(), [0, 1]);
        assert_eq!(node.dropped_events(), 1);
    }

    #[test]
    fn emergency_resolved_payload_clears() {
        let broker = LocalBroker::new();
        let mut node = setup(&broker);
        let topics = node.topics().clone();

        let detect = encode(&EmergencyMessage { ts_ms: 0, resolved: false }).unwrap();
        broker.publish(topics.emergency(), &detect).unwrap();
        node.run_once(1_000);
        assert_eq!(node.controller().state(), SignalState::Emergency);
        assert!(node.lamps().buzzer.is_some());

        let clear = encode(&EmergencyMessage { ts_ms: 0, resolved: true }).unwrap();
        broker.publish(topics.emergency(), &clear).unwrap();
        node.run_once(1_200);
        assert_eq!(node.controller().state(), SignalState::Green(Approach::A));
        assert!(node.lamps().buzzer.is_none());
    }

    #[test]
    fn state_published_periodically_and_on_transition() {
        let broker = LocalBroker::new();
        let mut node = setup(&broker);
        let rx = broker.subscribe(node.topics().state());

        for t in (0..=5_000).step_by(100) {
            node.run_once(t);
        }
        let msgs: Vec<StateMessage> = rx
            .try_iter()
            .map(|m| decode(&m.payload).unwrap())
            .collect();
        let times: Vec<u64> = msgs.iter().map(|m| m.ts_ms).collect();
        assert_eq!(times, vec![0, 1_000, 2_000, 3_000, 4_000, 5_000]);
        assert_eq!(msgs.last().unwrap().phase, bus::PhaseLabel::BGreen);
    }

    #[test]
    fn transition_publish_restarts_period() {
        let broker = LocalBroker::new();
        let mut node = setup(&broker);
        let rx = broker.subscribe(node.topics().state());

        for t in (0..=5_500).step_by(500) {
            node.run_once(t);
        }
        // emergency at 5_700 is event-driven; next periodic is 6_700
        let detect = encode(&EmergencyMessage { ts_ms: 0, resolved: false }).unwrap();
        broker.publish(node.topics().emergency(), &detect).unwrap();
        for t in (5_700..=6_700).step_by(100) {
            node.run_once(t);
        }
        let times: Vec<u64> = rx
            .try_iter()
            .map(|m| decode::<StateMessage>(&m.payload).unwrap().ts_ms)
            .filter(|t| *t > 5_000)
            .collect();
        assert_eq!(times, vec![5_700, 6_700]);
    }

    #[test]
    fn status_is_a_separate_slower_topic() {
        let broker = LocalBroker::new();
        let mut node = setup(&broker);
        let rx = broker.subscribe(node.topics().status());
        for t in (0..=10_000).step_by(100) {
            node.run_once(t);
        }
        let msgs: Vec<StatusMessage> = rx
            .try_iter()
            .map(|m| decode(&m.payload).unwrap())
            .collect();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].team, "LUXOR");
        assert_eq!(msgs[2].uptime_ms, 10_000);
    }

    #[test]
    fn keeps_running_while_bus_is_down() {
        let broker = LocalBroker::new();
        let mut node = setup(&broker);
        let rx = broker.subscribe(node.topics().state());
        broker.set_online(false);
        for t in (0..=6_000).step_by(100) {
            node.run_once(t);
        }
        assert!(node.publish_failures() > 0);
        assert_eq!(node.controller().state(), SignalState::Green(Approach::B));

        broker.set_online(true);
        node.run_once(6_100);
        let msg: StateMessage = decode(&rx.try_recv().unwrap().payload).unwrap();
        assert_eq!(msg.phase, bus::PhaseLabel::BGreen);
    }

    #[test]
    fn own_topics_are_not_events() {
        let broker = LocalBroker::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let cfg = ControllerSetup::default();
        let topics = Topics::from_config(&cfg.bus);
        let mut node =
            ControlLoop::new(cfg, rx, broker, RecordingOutputs::default(), 0).unwrap();
        tx.send(Message::new(topics.state(), b"{}".to_vec())).unwrap();
        tx.send(Message::new("elsewhere/traffic/A/arrive", b"{}".to_vec()))
            .unwrap();
        node.run_once(0);
        assert_eq!(node.dropped_events(), 2);
    }

    #[test]
    fn loop_period_off_the_timer_grid_keeps_max_green() {
        let broker = LocalBroker::new();
        let mut node = setup(&broker);
        let topics = node.topics().clone();
        let arrival = encode(&ArrivalMessage {
            ts_ms: 0,
            detector: "rfid-a".into(),
        })
        .unwrap();

        let mut transitions = Vec::new();
        let mut t = 0;
        while t <= 60_000 {
            broker.publish(topics.arrive(Approach::A), &arrival).unwrap();
            broker.publish(topics.arrive(Approach::A), &arrival).unwrap();
            transitions.extend(node.run_once(t));
            t += 900;
        }

        assert_eq!(transitions[0].at_ms, 20_000);
        let greens: Vec<&Transition> = transitions
            .iter()
            .filter(|tr| matches!(tr.to, SignalState::Green(_)))
            .collect();
        for w in greens.windows(2) {
            assert!(w[1].at_ms - w[0].at_ms <= 20_000, "{:?}", w);
        }
        assert!(!node.fail_safe());
    }

    #[test]
    fn monitor_trip_forces_all_red_until_reset() {
        let broker = LocalBroker::new();
        let cfg = ControllerSetup {
            monitor: Some(MonitorConfig {
                max_green_ms: 3_000,
                slack_ms: 0,
            }),
            ..Default::default()
        };
        let topics = Topics::from_config(&cfg.bus);
        let inbound = broker.subscribe_all(&topics.controller_inbound());
        let rx = broker.subscribe(topics.state());
        let mut node =
            ControlLoop::new(cfg, inbound, broker.clone(), RecordingOutputs::default(), 0).unwrap();

        for t in (0..=3_500).step_by(100) {
            node.run_once(t);
        }
        assert!(node.fail_safe());
        assert_eq!(node.trip_reason(), Some(safety::TripReason::GreenOverrun));
        assert_eq!(node.lamps(), Lamps::ALL_RED);
        assert_eq!(node.outputs().current(), Some(Lamps::ALL_RED));
        let last: StateMessage = decode(&rx.try_iter().last().unwrap().payload).unwrap();
        assert!(last.fail_safe);

        node.reset_fail_safe();
        node.run_once(3_600);
        assert!(!node.fail_safe());
        assert!(node.lamps().aspects[0].is_green());
    }
}
