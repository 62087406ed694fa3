//! Received snapshot ring and authoritative clock estimation

use std::collections::VecDeque;
use tracing::debug;

use crate::game::snapshot::ShipState;
use crate::game::Snapshot;

/// Bounds on the measured server sim-speed ratio
pub const MIN_SIM_SPEED: f64 = 0.5;
pub const MAX_SIM_SPEED: f64 = 2.0;

/// A snapshot stamped with local receipt time
#[derive(Debug, Clone)]
pub struct ReceivedSnapshot {
    pub received_at_ms: f64,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    entries: VecDeque<ReceivedSnapshot>,
    capacity: usize,
    max_extrapolation_ms: f64,
}

impl SnapshotBuffer {
    pub fn new(capacity: usize, max_extrapolation_ms: f64) -> Self {
        let capacity = capacity.max(2);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            max_extrapolation_ms: max_extrapolation_ms.max(0.0),
        }
    }

    /// Append a snapshot; the oldest is dropped when full. Snapshots that
    /// do not advance the tick are rejected.
    pub fn push(&mut self, snapshot: Snapshot, received_at_ms: f64) -> bool {
        if let Some(newest) = self.entries.back() {
            if snapshot.tick <= newest.snapshot.tick {
                debug!(
                    tick = snapshot.tick,
                    newest = newest.snapshot.tick,
                    "Out of order snapshot dropped"
                );
                return false;
            }
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ReceivedSnapshot {
            received_at_ms,
            snapshot,
        });
        true
    }

    pub fn latest(&self) -> Option<&ReceivedSnapshot> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReceivedSnapshot> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshots per second over the buffered window
    pub fn receive_rate_hz(&self) -> Option<f64> {
        let (first, last) = (self.entries.front()?, self.entries.back()?);
        let span = last.received_at_ms - first.received_at_ms;
        if self.entries.len() < 2 || !(span > 0.0) {
            return None;
        }
        Some((self.entries.len() - 1) as f64 * 1000.0 / span)
    }

    /// Simulated milliseconds per local millisecond over the buffered
    /// window, clamped; 1.0 until enough data exists
    pub fn sim_speed_ratio(&self) -> f64 {
        let (Some(first), Some(last)) = (self.entries.front(), self.entries.back()) else {
            return 1.0;
        };
        let wall = last.received_at_ms - first.received_at_ms;
        let sim = last.snapshot.sim_time_ms - first.snapshot.sim_time_ms;
        if !(wall > 0.0) || !sim.is_finite() {
            return 1.0;
        }
        (sim / wall).clamp(MIN_SIM_SPEED, MAX_SIM_SPEED)
    }

    /// Authoritative sim time at local time `now_ms`, extrapolated from the
    /// newest snapshot. Extrapolation stops after `max_extrapolation_ms` so
    /// a stalled stream freezes instead of running away.
    pub fn estimate_authoritative_time(&self, now_ms: f64) -> Option<f64> {
        let latest = self.entries.back()?;
        let elapsed = (now_ms - latest.received_at_ms).clamp(0.0, self.max_extrapolation_ms);
        Some(latest.snapshot.sim_time_ms + elapsed * self.sim_speed_ratio())
    }

    /// The local ship as of the newest snapshot
    pub fn latest_ship(&self, id: &str) -> Option<&ShipState> {
        self.latest()?.snapshot.ship(id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{EngineOptions, SimulationEngine};

    fn snapshots(n: usize) -> Vec<Snapshot> {
        let mut engine = SimulationEngine::new(EngineOptions::new(5));
        (0..n)
            .map(|_| {
                for _ in 0..3 {
                    engine.update(1.0 / 60.0);
                }
                engine.snapshot(None)
            })
            .collect()
    }

    #[test]
    fn test_rejects_stale_ticks_and_bounds() {
        let snaps = snapshots(5);
        let mut buffer = SnapshotBuffer::new(3, 250.0);
        for (i, snap) in snaps.iter().enumerate() {
            assert!(buffer.push(snap.clone(), i as f64 * 50.0));
        }
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.push(snaps[1].clone(), 500.0));
        assert_eq!(buffer.latest().map(|s| s.snapshot.tick), Some(snaps[4].tick));
    }

    #[test]
    fn test_rate_and_speed() {
        let snaps = snapshots(4);
        let mut buffer = SnapshotBuffer::new(8, 250.0);
        for (i, snap) in snaps.iter().enumerate() {
            buffer.push(snap.clone(), i as f64 * 50.0);
        }
        let rate = buffer.receive_rate_hz().unwrap();
        assert!((rate - 20.0).abs() < 1e-9);
        assert!((buffer.sim_speed_ratio() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_extrapolation_capped() {
        let snaps = snapshots(1);
        let mut buffer = SnapshotBuffer::new(8, 250.0);
        buffer.push(snaps[0].clone(), 1_000.0);
        let base = snaps[0].sim_time_ms;
        assert_eq!(buffer.estimate_authoritative_time(1_100.0), Some(base + 100.0));
        assert_eq!(buffer.estimate_authoritative_time(9_000.0), Some(base + 250.0));
        assert_eq!(buffer.estimate_authoritative_time(500.0), Some(base));
    }
}
