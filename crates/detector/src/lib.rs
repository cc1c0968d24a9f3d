use bus::{Approach, ArrivalMessage, Bus, Topics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// SPI chip-select and reset lines of the tag reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderPins {
    pub ss: u8,
    pub rst: u8,
}

impl Default for ReaderPins {
    fn default() -> Self {
        Self { ss: 21, rst: 22 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub id: String,
    pub approach: Approach,
    pub cooldown_ms: u64,
    pub pins: ReaderPins,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::for_approach(Approach::A)
    }
}

impl DetectorConfig {
    pub fn for_approach(approach: Approach) -> Self {
        Self {
            id: format!("rfid-{}", approach.as_str().to_ascii_lowercase()),
            approach,
            cooldown_ms: 8000,
            pins: ReaderPins::default(),
        }
    }
}

/// Decoded tag identifier. Only its presence matters; the bytes are logged.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TagId(pub Vec<u8>);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArrivalEvent {
    pub approach: Approach,
    pub ts_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ArrivalDetector {
    cfg: DetectorConfig,
    last_accepted: Option<u64>,
    accepted: u64,
    discarded: u64,
}

impl ArrivalDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self {
            cfg,
            last_accepted: None,
            accepted: 0,
            discarded: 0,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Accept one read per cooldown window; re-reads of a vehicle still in
    /// range are discarded. A timestamp behind the last accepted read counts
    /// as inside the window.
    pub fn on_tag_read(&mut self, tag: &TagId, now_ms: u64) -> Option<ArrivalEvent> {
        if let Some(last) = self.last_accepted {
            let since = now_ms.saturating_sub(last);
            if since < self.cfg.cooldown_ms {
                self.discarded += 1;
                debug!(detector = %self.cfg.id, %tag, since, "read inside cooldown, discarded");
                return None;
            }
        }

        self.last_accepted = Some(now_ms);
        self.accepted += 1;
        debug!(detector = %self.cfg.id, %tag, now_ms, "arrival accepted");
        Some(ArrivalEvent {
            approach: self.cfg.approach,
            ts_ms: now_ms,
        })
    }
}

/// Which approach each detector reports for.
#[derive(Clone, Debug, Default)]
pub struct DetectorMap {
    map: BTreeMap<String, Approach>,
}

impl DetectorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs<'a>(cfgs: impl IntoIterator<Item = &'a DetectorConfig>) -> Self {
        let mut map = Self::new();
        for c in cfgs {
            map.insert(&c.id, c.approach);
        }
        map
    }

    pub fn insert(&mut self, id: &str, approach: Approach) -> Option<Approach> {
        let prev = self.map.insert(id.to_string(), approach);
        if let Some(p) = prev {
            if p != approach {
                warn!(detector = id, from = %p, to = %approach, "detector reassigned");
            }
        }
        prev
    }

    pub fn approach_of(&self, id: &str) -> Option<Approach> {
        self.map.get(id).copied()
    }

    pub fn detectors_for(&self, approach: Approach) -> impl Iterator<Item = &str> {
        self.map
            .iter()
            .filter(move |(_, a)| **a == approach)
            .map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A detector wired to the bus.
pub struct DetectorNode<B: Bus> {
    detector: ArrivalDetector,
    topics: Topics,
    bus: B,
    undelivered: u64,
}

impl<B: Bus> DetectorNode<B> {
    pub fn new(cfg: DetectorConfig, topics: Topics, bus: B) -> Self {
        info!(detector = %cfg.id, approach = %cfg.approach, cooldown_ms = cfg.cooldown_ms, "detector online");
        Self {
            detector: ArrivalDetector::new(cfg),
            topics,
            bus,
            undelivered: 0,
        }
    }

    pub fn detector(&self) -> &ArrivalDetector {
        &self.detector
    }

    pub fn undelivered(&self) -> u64 {
        self.undelivered
    }

    /// Returns the accepted event, or `None` if the read was filtered or the
    /// publish failed.
    pub fn on_tag_read(&mut self, tag: &TagId, now_ms: u64) -> Option<ArrivalEvent> {
        let event = self.detector.on_tag_read(tag, now_ms)?;
        let msg = ArrivalMessage {
            ts_ms: event.ts_ms,
            detector: self.detector.config().id.clone(),
        };
        let topic = self.topics.arrive(event.approach);
        match self.bus.publish_msg(topic, &msg) {
            Ok(()) => Some(event),
            Err(e) => {
                self.undelivered += 1;
                warn!(detector = %msg.detector, topic, error = %e, "arrival not delivered");
                None
            }
        }
    }
}
