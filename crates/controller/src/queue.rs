use bus::Approach;
use tracing::debug;

/// Vehicles waiting per approach, bounded to `0..=max`.
#[derive(Clone, Debug)]
pub struct QueueModel {
    counts: [u32; 2],
    max: u32,
    rate: u32,
    dropped: u64,
}

impl QueueModel {
    pub fn new(max: u32, discharge_rate: u32) -> Self {
        Self {
            counts: [0; 2],
            max,
            rate: discharge_rate,
            dropped: 0,
        }
    }

    /// Returns false when the queue is full and the arrival was dropped.
    pub fn on_arrival(&mut self, approach: Approach) -> bool {
        let c = &mut self.counts[approach.index()];
        if *c >= self.max {
            self.dropped += 1;
            debug!(%approach, max = self.max, "queue saturated, arrival dropped");
            return false;
        }
        *c += 1;
        true
    }

    /// One discharge interval for the approach holding green.
    pub fn on_discharge_tick(&mut self, approach: Approach) {
        let c = &mut self.counts[approach.index()];
        *c = c.saturating_sub(self.rate);
    }

    pub fn has_demand(&self, approach: Approach) -> bool {
        self.counts[approach.index()] > 0
    }

    pub fn count(&self, approach: Approach) -> u32 {
        self.counts[approach.index()]
    }

    pub fn counts(&self) -> [u32; 2] {
        self.counts
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrivals_saturate_at_max() {
        let mut q = QueueModel::new(3, 1);
        for _ in 0..5 {
            q.on_arrival(Approach::A);
        }
        assert_eq!(q.count(Approach::A), 3);
        assert_eq!(q.dropped(), 2);
        assert_eq!(q.count(Approach::B), 0);
    }

    #[test]
    fn discharge_floors_at_zero() {
        let mut q = QueueModel::new(10, 3);
        q.on_arrival(Approach::B);
        q.on_arrival(Approach::B);
        assert!(q.has_demand(Approach::B));
        q.on_discharge_tick(Approach::B);
        assert_eq!(q.count(Approach::B), 0);
        assert!(!q.has_demand(Approach::B));
    }
}
