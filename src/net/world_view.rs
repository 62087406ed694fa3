//! Interpolated view of remote entities
//!
//! Each networked entity gets one proxy, created when it first appears in a
//! snapshot and kept (same serial) until a snapshot no longer lists it.
//! Proxies carry the last [`HISTORY_LEN`] authoritative samples; rendering
//! positions come from interpolating between the two samples that bracket a
//! target time behind the estimated authoritative clock.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::game::entities::Ping;
use crate::game::math::{lerp_angle, Vec2};
use crate::game::snapshot::{PartSnapshot, RoundSnapshot};
use crate::game::Snapshot;

use super::snapshot_buffer::SnapshotBuffer;

pub const HISTORY_LEN: usize = 3;

/// Consecutive samples further apart than this are a wrap or respawn, not
/// motion; they are not blended.
pub const TELEPORT_DISTANCE: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub sim_time_ms: f64,
    pub pos: Vec2,
    pub vel: Vec2,
    pub angle: f64,
}

impl PoseSample {
    fn blend(&self, other: &PoseSample, t: f64) -> PoseSample {
        let t = t.clamp(0.0, 1.0);
        if self.pos.distance(other.pos) > TELEPORT_DISTANCE {
            return if t < 0.5 { *self } else { *other };
        }
        PoseSample {
            sim_time_ms: self.sim_time_ms + (other.sim_time_ms - self.sim_time_ms) * t,
            pos: self.pos.lerp(other.pos, t),
            vel: self.vel.lerp(other.vel, t),
            angle: lerp_angle(self.angle, other.angle, t),
        }
    }
}

/// The newest authoritative samples of one entity, oldest first
#[derive(Debug, Clone, Default)]
pub struct EntityHistory {
    samples: VecDeque<PoseSample>,
}

impl EntityHistory {
    pub fn push(&mut self, sample: PoseSample) {
        if let Some(last) = self.samples.back_mut() {
            if sample.sim_time_ms < last.sim_time_ms {
                return;
            }
            if sample.sim_time_ms == last.sim_time_ms {
                *last = sample;
                return;
            }
        }
        if self.samples.len() >= HISTORY_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn newest(&self) -> Option<&PoseSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PoseSample> {
        self.samples.iter()
    }

    /// Pose at `target_ms`. Between two samples it is interpolated; outside
    /// the window the newest pair is used, clamped to its ends.
    pub fn sample_at(&self, target_ms: f64) -> Option<PoseSample> {
        let first = *self.samples.front()?;
        let last = *self.samples.back()?;
        let n = self.samples.len();
        if n == 1 || !target_ms.is_finite() {
            return Some(last);
        }

        let (a, b) = if target_ms < first.sim_time_ms || target_ms >= last.sim_time_ms {
            (self.samples[n - 2], last)
        } else {
            let (a, b) = self
                .samples
                .iter()
                .zip(self.samples.iter().skip(1))
                .find(|(_, b)| target_ms <= b.sim_time_ms)?;
            (*a, *b)
        };
        let span = b.sim_time_ms - a.sim_time_ms;
        let t = if span > 0.0 { (target_ms - a.sim_time_ms) / span } else { 1.0 };
        Some(a.blend(&b, t))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Ship,
    Asteroid,
    Gem,
    Saucer,
    Laser,
}

/// Render-side stand-in for one networked entity
#[derive(Debug, Clone)]
pub struct EntityProxy {
    pub id: String,
    /// Allocation order; unchanged for the proxy's lifetime
    pub serial: u64,
    pub kind: EntityKind,
    pub pos: Vec2,
    pub vel: Vec2,
    pub angle: f64,
    pub radius: f64,
    pub attached_to: Option<String>,
    history: EntityHistory,
}

impl EntityProxy {
    pub fn history(&self) -> &EntityHistory {
        &self.history
    }

    fn apply(&mut self, sample: &PoseSample) {
        self.pos = sample.pos;
        self.vel = sample.vel;
        self.angle = sample.angle;
    }
}

struct Observed {
    kind: EntityKind,
    sample: PoseSample,
    radius: f64,
    attached_to: Option<String>,
}

#[derive(Debug, Default)]
pub struct WorldView {
    proxies: BTreeMap<String, EntityProxy>,
    next_serial: u64,
    last_tick: Option<u64>,
    round: Option<RoundSnapshot>,
    parts: Vec<PartSnapshot>,
    pings: Vec<Ping>,
}

impl WorldView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one snapshot into every entity's history. Entities the
    /// snapshot omits are dropped; new ones get a fresh proxy.
    pub fn ingest(&mut self, snapshot: &Snapshot) {
        if self.last_tick.is_some_and(|t| snapshot.tick <= t) {
            return;
        }
        self.last_tick = Some(snapshot.tick);

        let t = snapshot.sim_time_ms;
        let mut seen = BTreeSet::new();
        for (id, observed) in observations(snapshot, t) {
            seen.insert(id.clone());
            let proxy = self.proxies.entry(id.clone()).or_insert_with(|| {
                self.next_serial += 1;
                EntityProxy {
                    id,
                    serial: self.next_serial,
                    kind: observed.kind,
                    pos: observed.sample.pos,
                    vel: observed.sample.vel,
                    angle: observed.sample.angle,
                    radius: observed.radius,
                    attached_to: None,
                    history: EntityHistory::default(),
                }
            });
            proxy.radius = observed.radius;
            proxy.attached_to = observed.attached_to;
            proxy.history.push(observed.sample);
        }
        self.proxies.retain(|id, _| seen.contains(id));

        self.round = Some(snapshot.round.clone());
        self.parts = snapshot.parts.clone();
        self.pings = snapshot.pings.clone();
    }

    /// Ingest every buffered snapshot newer than the last one seen
    pub fn sync(&mut self, buffer: &SnapshotBuffer) {
        for received in buffer.iter() {
            self.ingest(&received.snapshot);
        }
    }

    /// Move every proxy to its pose at `estimated authoritative time -
    /// delay_ms`. Returns the target time, or `None` before any snapshot.
    /// With no new data the same bracketing pair is reused.
    pub fn apply_interpolated_state(
        &mut self,
        now_ms: f64,
        delay_ms: f64,
        buffer: &SnapshotBuffer,
    ) -> Option<f64> {
        self.sync(buffer);
        let target = buffer.estimate_authoritative_time(now_ms)? - delay_ms.max(0.0);
        for proxy in self.proxies.values_mut() {
            if let Some(sample) = proxy.history.sample_at(target) {
                proxy.apply(&sample);
            }
        }
        Some(target)
    }

    pub fn proxy(&self, id: &str) -> Option<&EntityProxy> {
        self.proxies.get(id)
    }

    pub fn proxy_mut(&mut self, id: &str) -> Option<&mut EntityProxy> {
        self.proxies.get_mut(id)
    }

    pub fn proxies(&self) -> impl Iterator<Item = &EntityProxy> {
        self.proxies.values()
    }

    pub fn proxies_mut(&mut self) -> impl Iterator<Item = &mut EntityProxy> {
        self.proxies.values_mut()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn round(&self) -> Option<&RoundSnapshot> {
        self.round.as_ref()
    }

    pub fn parts(&self) -> &[PartSnapshot] {
        &self.parts
    }

    pub fn pings(&self) -> &[Ping] {
        &self.pings
    }

    /// Back to the freshly constructed state
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn observations(snapshot: &Snapshot, t: f64) -> Vec<(String, Observed)> {
    let sample = |x: f64, y: f64, vx: f64, vy: f64, angle: f64| PoseSample {
        sim_time_ms: t,
        pos: Vec2::new(x, y),
        vel: Vec2::new(vx, vy),
        angle,
    };

    let mut out = Vec::with_capacity(snapshot.entity_count());
    for s in &snapshot.ships {
        out.push((
            s.id.clone(),
            Observed {
                kind: EntityKind::Ship,
                sample: sample(s.x, s.y, s.vx, s.vy, s.angle),
                radius: s.radius,
                attached_to: None,
            },
        ));
    }
    for a in &snapshot.asteroids {
        out.push((
            a.id.clone(),
            Observed {
                kind: EntityKind::Asteroid,
                sample: sample(a.x, a.y, a.vx, a.vy, a.rot),
                radius: a.radius,
                attached_to: a.attached_to.clone(),
            },
        ));
    }
    for g in &snapshot.gems {
        out.push((
            g.id.clone(),
            Observed {
                kind: EntityKind::Gem,
                sample: sample(g.x, g.y, g.vx, g.vy, 0.0),
                radius: g.radius,
                attached_to: None,
            },
        ));
    }
    let hostiles = snapshot
        .saucer
        .iter()
        .map(|h| (EntityKind::Saucer, h))
        .chain(snapshot.lasers.iter().map(|h| (EntityKind::Laser, h)));
    for (kind, h) in hostiles {
        out.push((
            h.id.clone(),
            Observed {
                kind,
                sample: sample(h.x, h.y, h.vx, h.vy, h.vy.atan2(h.vx)),
                radius: h.radius,
                attached_to: None,
            },
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{EngineOptions, SimulationEngine};

    fn at(t: f64, x: f64, angle: f64) -> PoseSample {
        PoseSample {
            sim_time_ms: t,
            pos: Vec2::new(x, 0.0),
            vel: Vec2::ZERO,
            angle,
        }
    }

    #[test]
    fn test_history_keeps_three_newest() {
        let mut h = EntityHistory::default();
        for i in 0..5 {
            h.push(at(i as f64 * 50.0, i as f64, 0.0));
        }
        assert_eq!(h.len(), HISTORY_LEN);
        assert_eq!(h.iter().next().map(|s| s.sim_time_ms), Some(100.0));
    }

    #[test]
    fn test_sample_between_and_clamped() {
        let mut h = EntityHistory::default();
        h.push(at(0.0, 0.0, 0.0));
        h.push(at(100.0, 10.0, 0.0));
        assert_eq!(h.sample_at(50.0).unwrap().pos.x, 5.0);
        assert_eq!(h.sample_at(-20.0).unwrap().pos.x, 0.0);
        assert_eq!(h.sample_at(500.0).unwrap().pos.x, 10.0);
    }

    #[test]
    fn test_before_window_uses_newest_pair() {
        let mut h = EntityHistory::default();
        h.push(at(0.0, 0.0, 0.0));
        h.push(at(100.0, 10.0, 0.0));
        h.push(at(200.0, 20.0, 0.0));
        assert_eq!(h.sample_at(-50.0).unwrap().pos.x, 10.0);
        assert_eq!(h.sample_at(50.0).unwrap().pos.x, 5.0);
        assert_eq!(h.sample_at(250.0).unwrap().pos.x, 20.0);
    }

    #[test]
    fn test_interpolation_targets_estimated_authority_minus_delay() {
        let mut engine = SimulationEngine::new(EngineOptions::new(3));
        engine.add_player("p");
        let mut buffer = SnapshotBuffer::new(8, 250.0);
        for i in 0..3 {
            for _ in 0..3 {
                engine.update(1.0 / 60.0);
            }
            buffer.push(engine.snapshot(None), i as f64 * 50.0);
        }
        let newest = buffer.latest().unwrap().snapshot.sim_time_ms;
        let ratio = buffer.sim_speed_ratio();
        let mut view = WorldView::new();

        let target = view.apply_interpolated_state(130.0, 100.0, &buffer).unwrap();
        assert!((target - (newest + 30.0 * ratio - 100.0)).abs() < 1e-9);
        let ship = view.proxy("p").unwrap();
        assert_eq!(ship.pos, ship.history().sample_at(target).unwrap().pos);

        // A stalled stream stops extrapolating
        let stalled = view.apply_interpolated_state(10_000.0, 100.0, &buffer).unwrap();
        assert!((stalled - (newest + 250.0 * ratio - 100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_heading_takes_short_arc() {
        let mut h = EntityHistory::default();
        h.push(at(0.0, 0.0, 3.0));
        h.push(at(100.0, 0.0, -3.0));
        let mid = h.sample_at(50.0).unwrap().angle;
        assert!(mid.abs() > 3.0);
    }

    #[test]
    fn test_teleport_not_blended() {
        let mut h = EntityHistory::default();
        h.push(at(0.0, -1000.0, 0.0));
        h.push(at(100.0, 1000.0, 0.0));
        assert_eq!(h.sample_at(40.0).unwrap().pos.x, -1000.0);
        assert_eq!(h.sample_at(60.0).unwrap().pos.x, 1000.0);
    }
}
