mod intersection;
mod scenario;

pub use intersection::{EmergencyCall, Intersection};
pub use scenario::{Scenario, ScenarioSetup};

use bus::Approach;
use detector::TagId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};

#[derive(Clone, Copy, Debug)]
pub struct DemandParams {
    /// Mean vehicles per minute, per approach.
    pub per_minute: [f64; 2],
    /// How long a tag stays in reader range.
    pub dwell_ms: u64,
    /// Interval between repeated reads of a tag in range.
    pub reread_ms: u64,
}

impl Default for DemandParams {
    fn default() -> Self {
        Self {
            per_minute: [4.0, 4.0],
            dwell_ms: 3000,
            reread_ms: 500,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReaderFault {
    None,
    /// Every n-th read is lost.
    DropoutEvery { n: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagRead {
    pub approach: Approach,
    pub tag: TagId,
    pub at_ms: u64,
}

#[derive(Clone, Debug)]
struct Vehicle {
    approach: Approach,
    tag: TagId,
    next_read_ms: u64,
    leaves_ms: u64,
}

/// Seeded vehicle arrivals and the tag reads they cause.
#[derive(Clone, Debug)]
pub struct TrafficSim {
    params: DemandParams,
    rngs: [StdRng; 2],
    next_arrival: [Option<u64>; 2],
    in_range: Vec<Vehicle>,
    faults: [ReaderFault; 2],
    reads: [u64; 2],
    spawned: [u32; 2],
}

impl TrafficSim {
    pub fn new(params: DemandParams, seed: u64) -> Self {
        let mut sim = Self {
            params,
            rngs: [
                StdRng::seed_from_u64(seed ^ 0xA1),
                StdRng::seed_from_u64(seed ^ 0xB2),
            ],
            next_arrival: [None; 2],
            in_range: Vec::new(),
            faults: [ReaderFault::None; 2],
            reads: [0; 2],
            spawned: [0; 2],
        };
        for a in Approach::ALL {
            sim.next_arrival[a.index()] = sim.gap_ms(a);
        }
        sim
    }

    pub fn set_fault(&mut self, approach: Approach, fault: ReaderFault) {
        self.faults[approach.index()] = fault;
    }

    pub fn vehicles(&self) -> u64 {
        self.spawned.iter().map(|n| u64::from(*n)).sum()
    }

    fn gap_ms(&mut self, approach: Approach) -> Option<u64> {
        let per_minute = self.params.per_minute[approach.index()];
        if !(per_minute.is_finite() && per_minute > 0.0) {
            return None;
        }
        let exp = Exp::new(per_minute / 60_000.0).ok()?;
        let gap: f64 = exp.sample(&mut self.rngs[approach.index()]);
        Some(gap.round().max(1.0) as u64)
    }

    fn spawn(&mut self, approach: Approach, at_ms: u64) {
        let n = &mut self.spawned[approach.index()];
        *n += 1;
        let mut tag = vec![approach.as_str().as_bytes()[0]];
        tag.extend_from_slice(&n.to_be_bytes());
        self.in_range.push(Vehicle {
            approach,
            tag: TagId(tag),
            next_read_ms: at_ms,
            leaves_ms: at_ms + self.params.dwell_ms,
        });
    }

    fn read_lost(&mut self, approach: Approach) -> bool {
        let i = approach.index();
        self.reads[i] += 1;
        match self.faults[i] {
            ReaderFault::None => false,
            ReaderFault::DropoutEvery { n } => n > 0 && self.reads[i] % n == 0,
        }
    }

    /// Advance to `until_ms` and return the reads that happened, oldest first.
    pub fn advance(&mut self, until_ms: u64) -> Vec<TagRead> {
        for a in Approach::ALL {
            while let Some(at) = self.next_arrival[a.index()].filter(|t| *t <= until_ms) {
                self.spawn(a, at);
                self.next_arrival[a.index()] = self.gap_ms(a).map(|g| at + g);
            }
        }

        let mut out = Vec::new();
        let reread = self.params.reread_ms.max(1);
        let mut vehicles = std::mem::take(&mut self.in_range);
        for v in &mut vehicles {
            while v.next_read_ms <= until_ms && v.next_read_ms <= v.leaves_ms {
                if !self.read_lost(v.approach) {
                    out.push(TagRead {
                        approach: v.approach,
                        tag: v.tag.clone(),
                        at_ms: v.next_read_ms,
                    });
                }
                v.next_read_ms += reread;
            }
        }
        vehicles.retain(|v| v.next_read_ms <= v.leaves_ms);
        self.in_range = vehicles;

        out.sort_by_key(|r| (r.at_ms, r.approach));
        out
    }
}
