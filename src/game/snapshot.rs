//! Snapshot projection, interest management and send cadence

use serde::{Deserialize, Serialize};

use super::engine::SimulationEngine;
use super::entities::{Asteroid, EntityId, GemKind, PartState, Ping, ShipPose, TechPart, ViewRect};
use super::math::Vec2;
use super::round::RoundOutcome;
use super::tuning::{AsteroidSize, ShipTier};

/// Stable string key for an engine entity
pub fn entity_key(prefix: char, id: EntityId) -> String {
    format!("{prefix}{id}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipState {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub angle: f64,
    pub radius: f64,
    pub mass: f64,
    pub tier: ShipTier,
    pub last_input_seq: u32,
    pub gem_score: u32,
    pub carried_part: Option<String>,
}

impl ShipState {
    /// The authoritative pose, ready for replay
    pub fn pose(&self) -> ShipPose {
        let mut pose = ShipPose::new(self.id.as_str(), Vec2::new(self.x, self.y), self.angle, self.tier);
        pose.vel = Vec2::new(self.vx, self.vy);
        pose
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsteroidState {
    pub id: String,
    pub size: AsteroidSize,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub radius: f64,
    pub rot: f64,
    pub attached_to: Option<String>,
    pub orbit_angle: f64,
    pub ship_launched: bool,
}

impl From<&Asteroid> for AsteroidState {
    fn from(a: &Asteroid) -> Self {
        Self {
            id: entity_key('a', a.id),
            size: a.size,
            x: a.pos.x,
            y: a.pos.y,
            vx: a.vel.x,
            vy: a.vel.y,
            radius: a.radius,
            rot: a.rot,
            attached_to: a.attached_to.clone(),
            orbit_angle: a.orbit_angle,
            ship_launched: a.ship_launched,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GemState {
    pub id: String,
    pub kind: GemKind,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub radius: f64,
    pub age_sec: f64,
    pub ttl_sec: f64,
}

/// Saucers and lasers share one shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostileState {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartSnapshot {
    pub id: String,
    pub state: PartState,
    pub x: f64,
    pub y: f64,
    pub container: Option<String>,
    pub carrier: Option<String>,
    pub slot: Option<usize>,
}

impl From<&TechPart> for PartSnapshot {
    fn from(p: &TechPart) -> Self {
        Self {
            id: entity_key('p', p.id),
            state: p.state,
            x: p.pos.x,
            y: p.pos.y,
            container: p.container_asteroid_id.map(|id| entity_key('a', id)),
            carrier: p.carrier_player_id.clone(),
            slot: p.slot,
        }
    }
}

/// Round, hazard and gate scalars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub duration_sec: f64,
    pub elapsed_sec: f64,
    pub star_x: f64,
    pub gate_x: f64,
    pub gate_y: f64,
    pub gate_radius: f64,
    pub gate_slots: Vec<Option<String>>,
    pub gate_active: bool,
    pub outcome: Option<RoundOutcome>,
}

/// Authoritative projection of the world at one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tick: u64,
    pub sim_time_ms: f64,
    pub ships: Vec<ShipState>,
    pub asteroids: Vec<AsteroidState>,
    pub gems: Vec<GemState>,
    pub saucer: Option<HostileState>,
    pub lasers: Vec<HostileState>,
    pub parts: Vec<PartSnapshot>,
    pub pings: Vec<Ping>,
    pub round: RoundSnapshot,
}

impl Snapshot {
    /// Project the engine. With a view, asteroids, gems, saucer and lasers
    /// are limited to the rect plus margin; ships, parts, pings and round
    /// scalars are always included. Attached asteroids travel with their
    /// owner so they follow the ship's visibility.
    pub fn capture(engine: &SimulationEngine, view: Option<&ViewRect>) -> Self {
        let visible = |pos: Vec2, radius: f64| view.map_or(true, |v| v.contains(pos, radius));

        let ships = engine
            .ships
            .values()
            .map(|s| ShipState {
                id: s.id().to_string(),
                x: s.pose.pos.x,
                y: s.pose.pos.y,
                vx: s.pose.vel.x,
                vy: s.pose.vel.y,
                angle: s.pose.angle,
                radius: s.pose.radius,
                mass: s.pose.mass,
                tier: s.pose.tier,
                last_input_seq: s.last_input_seq,
                gem_score: s.gem_score,
                carried_part: s.carried_part.map(|id| entity_key('p', id)),
            })
            .collect();

        let asteroids = engine
            .asteroids
            .values()
            .filter(|a| a.is_attached() || visible(a.pos, a.radius))
            .map(AsteroidState::from)
            .collect();

        let gems = engine
            .gems
            .values()
            .filter(|g| visible(g.pos, g.radius))
            .map(|g| GemState {
                id: entity_key('g', g.id),
                kind: g.kind,
                x: g.pos.x,
                y: g.pos.y,
                vx: g.vel.x,
                vy: g.vel.y,
                radius: g.radius,
                age_sec: g.age_sec,
                ttl_sec: g.ttl_sec,
            })
            .collect();

        let saucer = engine
            .saucer
            .as_ref()
            .filter(|s| visible(s.pos, s.radius))
            .map(|s| hostile('s', s.id, s.pos, s.vel, s.radius));

        let lasers = engine
            .lasers
            .values()
            .filter(|l| visible(l.pos, l.radius))
            .map(|l| hostile('l', l.id, l.pos, l.vel, l.radius))
            .collect();

        let round = &engine.round;
        Self {
            tick: engine.tick,
            sim_time_ms: engine.sim_time_ms,
            ships,
            asteroids,
            gems,
            saucer,
            lasers,
            parts: engine.parts.values().map(PartSnapshot::from).collect(),
            pings: engine.pings.clone(),
            round: RoundSnapshot {
                duration_sec: round.duration_sec,
                elapsed_sec: round.elapsed_sec,
                star_x: round.star_x,
                gate_x: round.gate.pos.x,
                gate_y: round.gate.pos.y,
                gate_radius: round.gate.radius,
                gate_slots: round
                    .gate
                    .slots
                    .iter()
                    .map(|slot| slot.map(|id| entity_key('p', id)))
                    .collect(),
                gate_active: round.gate.active,
                outcome: round.outcome,
            },
        }
    }

    pub fn ship(&self, id: &str) -> Option<&ShipState> {
        self.ships.iter().find(|s| s.id == id)
    }

    pub fn asteroid(&self, id: &str) -> Option<&AsteroidState> {
        self.asteroids.iter().find(|a| a.id == id)
    }

    pub fn entity_count(&self) -> usize {
        self.ships.len()
            + self.asteroids.len()
            + self.gems.len()
            + usize::from(self.saucer.is_some())
            + self.lasers.len()
    }
}

fn hostile(prefix: char, id: EntityId, pos: Vec2, vel: Vec2, radius: f64) -> HostileState {
    HostileState {
        id: entity_key(prefix, id),
        x: pos.x,
        y: pos.y,
        vx: vel.x,
        vy: vel.y,
        radius,
    }
}

/// Decides when a room broadcasts and builds per-client snapshots
pub struct SnapshotBuilder {
    /// Ticks since the last broadcast
    ticks_since_snapshot: u32,
    /// Broadcast every this many ticks
    snapshot_interval: u32,
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
            stats: SnapshotStats::default(),
        }
    }

    /// Interval in ticks for a tick rate and a target snapshot rate
    pub fn interval_for(tick_hz: u32, snapshot_hz: u32) -> u32 {
        (tick_hz / snapshot_hz.max(1)).max(1)
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Send on the next check (new joiner, round outcome)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    pub fn build(&mut self, engine: &SimulationEngine, view: Option<&ViewRect>) -> Snapshot {
        let snapshot = Snapshot::capture(engine, view);
        self.stats.record(snapshot.entity_count());
        snapshot
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Running totals for debugging interest management
#[derive(Debug, Default, Clone)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_entities: u64,
    pub avg_entities_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, entity_count: usize) {
        self.total_snapshots += 1;
        self.total_entities += entity_count as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_entities_per_snapshot =
            self.avg_entities_per_snapshot * ((n - 1.0) / n) + (entity_count as f32 / n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine::EngineOptions;
    use crate::game::tuning::Tunables;

    fn engine() -> SimulationEngine {
        let tunables = Tunables {
            population_enabled: false,
            saucer_enabled: false,
            round_enabled: false,
            ..Tunables::default()
        };
        SimulationEngine::new(EngineOptions::new(5).with_tunables(tunables))
    }

    #[test]
    fn test_should_send_every_interval() {
        let mut builder = SnapshotBuilder::new(SnapshotBuilder::interval_for(60, 20));
        let sent: Vec<bool> = (0..6).map(|_| builder.should_send()).collect();
        assert_eq!(sent, vec![false, false, true, false, false, true]);
        builder.force_next();
        assert!(builder.should_send());
    }

    #[test]
    fn test_view_filters_far_asteroids_but_keeps_ships() {
        let mut engine = engine();
        engine.add_player("p1");
        engine.place_ship("p1", Vec2::ZERO, 0.0);
        engine.spawn_asteroid(AsteroidSize::Small, Vec2::new(100.0, 0.0), Vec2::ZERO);
        engine.spawn_asteroid(AsteroidSize::Small, Vec2::new(1500.0, 900.0), Vec2::ZERO);

        let view = ViewRect { cx: 0.0, cy: 0.0, half_w: 300.0, half_h: 200.0, margin: 0.0 };
        let scoped = engine.snapshot(Some(&view));
        assert_eq!(scoped.asteroids.len(), 1);
        assert_eq!(scoped.ships.len(), 1);

        let full = engine.snapshot(None);
        assert_eq!(full.asteroids.len(), 2);
    }

    #[test]
    fn test_ship_state_pose_round_trips_fields() {
        let mut engine = engine();
        engine.add_player("p1");
        let snapshot = engine.snapshot(None);
        let state = snapshot.ship("p1").unwrap();
        let pose = state.pose();
        assert_eq!(&pose, &engine.ship("p1").unwrap().pose);
    }
}
