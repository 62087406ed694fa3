//! Round objective: the advancing star, tech parts and the jump gate

use serde::{Deserialize, Serialize};

use super::engine::SimulationEngine;
use super::entities::{EntityId, PartState, PlayerId, TechPart};
use super::math::Vec2;
use super::tuning::{AsteroidSize, Tunables, WorldSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundOutcome {
    Win,
    Lose,
}

/// Jump gate with one slot per tech part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub pos: Vec2,
    pub radius: f64,
    pub slots: Vec<Option<EntityId>>,
    pub active: bool,
}

impl Gate {
    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn is_full(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(Option::is_some)
    }
}

/// Round clock and objective state.
///
/// `star_x` never decreases; anything west of it is destroyed or lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    pub duration_sec: f64,
    pub elapsed_sec: f64,
    pub star_start_x: f64,
    pub star_end_x: f64,
    pub star_x: f64,
    pub gate: Gate,
    pub outcome: Option<RoundOutcome>,
}

impl RoundState {
    pub fn new(world: &WorldSize, tunables: &Tunables) -> Self {
        let half = world.half_extents();
        Self {
            duration_sec: tunables.round_duration_sec.max(1.0),
            elapsed_sec: 0.0,
            star_start_x: -half.x,
            star_end_x: half.x,
            star_x: -half.x,
            gate: Gate {
                pos: Vec2::new(half.x * 0.8, 0.0),
                radius: tunables.gate_radius,
                slots: vec![None; tunables.gate_slots.max(1)],
                active: false,
            },
            outcome: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Fraction of the round elapsed, 0..=1
    pub fn progress(&self) -> f64 {
        (self.elapsed_sec / self.duration_sec).clamp(0.0, 1.0)
    }

    fn star_at_progress(&self) -> f64 {
        self.star_start_x + (self.star_end_x - self.star_start_x) * self.progress()
    }
}

impl SimulationEngine {
    /// Hide one tech part inside each of a row of xlarge asteroids
    pub(super) fn setup_round_parts(&mut self) {
        let half = self.world.half_extents();
        let slots = self.round.gate.slots.len();
        for i in 0..slots {
            let fx = 0.3 + 0.5 * (i as f64 + 0.5) / slots as f64;
            let x = -half.x + self.world.width * fx;
            let y = self.rng.gameplay.range(-0.6, 0.6) * half.y;
            let angle = self.rng.gameplay.range(0.0, std::f64::consts::TAU);
            let stats = AsteroidSize::Xlarge.stats();
            let speed = self.rng.gameplay.range(stats.min_speed, stats.max_speed) * 0.5;
            let vel = Vec2::new(angle.cos(), angle.sin()) * speed;
            let rot_vel = self.rng.gameplay.range(-0.4, 0.4);
            let pos = Vec2::new(x, y);

            let container = self.insert_asteroid(AsteroidSize::Xlarge, pos, vel, rot_vel);
            let part_id = self.alloc_id();
            self.parts
                .insert(part_id, TechPart::in_asteroid(part_id, container, pos));
        }
    }

    pub(super) fn update_round(&mut self, dt: f64) {
        if !self.tunables.round_enabled || self.round.is_terminal() {
            return;
        }
        self.round.elapsed_sec += dt;
        self.round.star_x = self.round.star_x.max(self.round.star_at_progress());

        self.sweep_star_hazard();
        self.update_parts();
        self.update_gate();

        if self.round.outcome.is_none() && self.round.elapsed_sec >= self.round.duration_sec {
            self.round.outcome = Some(RoundOutcome::Lose);
            tracing::info!(tick = self.tick, "Round lost: star reached the end of the field");
        }
    }

    /// Remove everything the star has overtaken and respawn overtaken ships
    fn sweep_star_hazard(&mut self) {
        let star_x = self.round.star_x;

        let burned: Vec<EntityId> = self
            .asteroids
            .values()
            .filter(|a| a.pos.x < star_x)
            .map(|a| a.id)
            .collect();
        for id in burned {
            self.asteroids.remove(&id);
            for part in self.parts.values_mut() {
                if part.container_asteroid_id == Some(id) {
                    part.lose();
                    tracing::info!(part_id = part.id, "Tech part lost to the star");
                }
            }
        }

        self.gems.retain(|_, g| g.pos.x >= star_x);
        self.lasers.retain(|_, l| l.pos.x >= star_x);
        if self.saucer.as_ref().is_some_and(|s| s.pos.x < star_x) {
            self.saucer = None;
        }

        let overtaken: Vec<PlayerId> = self
            .ships
            .values()
            .filter(|s| s.pose.pos.x < star_x)
            .map(|s| s.id().to_string())
            .collect();
        for id in overtaken {
            self.respawn_ahead_of_star(&id);
        }
    }

    fn respawn_ahead_of_star(&mut self, id: &str) {
        self.release_attachments(id);
        let half = self.world.half_extents();
        let star_x = self.round.star_x;
        let margin = self.tunables.respawn_margin;
        let Some(ship) = self.ships.get_mut(id) else {
            return;
        };
        if let Some(part_id) = ship.carried_part.take() {
            if let Some(part) = self.parts.get_mut(&part_id) {
                part.lose();
            }
        }
        let x = (star_x + margin).min(half.x - ship.pose.radius);
        ship.pose.pos = Vec2::new(x, ship.pose.pos.y);
        ship.pose.vel = Vec2::ZERO;
        ship.respawns += 1;
        tracing::debug!(player_id = %id, respawns = ship.respawns, "Ship respawned ahead of the star");
    }

    fn update_parts(&mut self) {
        let star_x = self.round.star_x;
        let pickup = self.tunables.part_pickup_radius;
        let part_ids: Vec<EntityId> = self.parts.keys().copied().collect();

        for part_id in part_ids {
            let Some(part) = self.parts.get(&part_id).cloned() else {
                continue;
            };
            match part.state {
                PartState::InAsteroid => {
                    let container = part
                        .container_asteroid_id
                        .and_then(|id| self.asteroids.get(&id))
                        .map(|a| a.pos);
                    if let Some(part) = self.parts.get_mut(&part_id) {
                        match container {
                            Some(pos) => part.pos = pos,
                            None => {
                                tracing::warn!(part_id, "Tech part container missing, marking lost");
                                part.lose();
                            }
                        }
                    }
                }
                PartState::Carried => {
                    let carrier = part.carrier_player_id.clone();
                    let carrier_pos = carrier
                        .as_deref()
                        .and_then(|id| self.ships.get(id))
                        .filter(|s| s.carried_part == Some(part_id))
                        .map(|s| s.pose.pos);
                    if let Some(part) = self.parts.get_mut(&part_id) {
                        match carrier_pos {
                            Some(pos) => part.pos = pos,
                            None => {
                                let pos = part.pos;
                                part.drop_at(pos);
                            }
                        }
                    }
                }
                PartState::Dropped => {
                    let pos = part.pos;
                    if pos.x < star_x {
                        if let Some(part) = self.parts.get_mut(&part_id) {
                            part.lose();
                        }
                        continue;
                    }
                    let picker = self
                        .ships
                        .values_mut()
                        .filter(|s| s.carried_part.is_none())
                        .find(|s| {
                            let reach = s.pose.radius + pickup;
                            s.pose.pos.distance_sq(pos) <= reach * reach
                        });
                    if let Some(ship) = picker {
                        ship.carried_part = Some(part_id);
                        let carrier = ship.id().to_string();
                        if let Some(part) = self.parts.get_mut(&part_id) {
                            part.carry(&carrier);
                            tracing::debug!(part_id, player_id = %carrier, "Tech part picked up");
                        }
                    }
                }
                PartState::Installed | PartState::Lost => {}
            }
        }
    }

    fn update_gate(&mut self) {
        let gate_pos = self.round.gate.pos;
        let gate_radius = self.round.gate.radius;

        for ship in self.ships.values_mut() {
            let Some(part_id) = ship.carried_part else {
                continue;
            };
            if ship.pose.pos.distance(gate_pos) > gate_radius + ship.pose.radius {
                continue;
            }
            let Some(slot) = self.round.gate.free_slot() else {
                break;
            };
            if let Some(part) = self.parts.get_mut(&part_id) {
                part.install(slot, gate_pos);
                self.round.gate.slots[slot] = Some(part_id);
                ship.carried_part = None;
                tracing::info!(part_id, slot, player_id = %ship.id(), "Tech part installed");
            }
        }

        if !self.round.gate.active && self.round.gate.is_full() {
            self.round.gate.active = true;
            tracing::info!(tick = self.tick, "Jump gate active");
        }

        if self.round.gate.active {
            let entered = self
                .ships
                .values()
                .any(|s| s.pose.pos.distance(gate_pos) <= gate_radius + s.pose.radius);
            if entered {
                self.round.outcome = Some(RoundOutcome::Win);
                tracing::info!(tick = self.tick, "Round won: ship entered the jump gate");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine::EngineOptions;

    fn round_only() -> Tunables {
        Tunables {
            population_enabled: false,
            saucer_enabled: false,
            round_duration_sec: 10.0,
            ..Tunables::default()
        }
    }

    #[test]
    fn test_star_is_monotonic() {
        let mut engine = SimulationEngine::new(EngineOptions::new(3).with_tunables(round_only()));
        let mut last = engine.round().star_x;
        for _ in 0..120 {
            engine.update(1.0 / 60.0);
            assert!(engine.round().star_x >= last);
            last = engine.round().star_x;
        }
    }

    #[test]
    fn test_round_times_out_as_loss() {
        let mut engine = SimulationEngine::new(EngineOptions::new(3).with_tunables(round_only()));
        for _ in 0..(11 * 60) {
            engine.update(1.0 / 60.0);
        }
        assert_eq!(engine.round().outcome, Some(RoundOutcome::Lose));
    }

    #[test]
    fn test_parts_start_inside_containers() {
        let engine = SimulationEngine::new(EngineOptions::new(8).with_tunables(round_only()));
        assert_eq!(engine.parts().count(), 3);
        for part in engine.parts() {
            let container = part.container_asteroid_id.unwrap();
            assert_eq!(engine.asteroid(container).unwrap().size, AsteroidSize::Xlarge);
        }
    }

    #[test]
    fn test_missing_container_marks_part_lost() {
        let mut engine = SimulationEngine::new(EngineOptions::new(8).with_tunables(round_only()));
        let part = engine.parts().next().unwrap().clone();
        engine.asteroids.remove(&part.container_asteroid_id.unwrap());
        engine.update(1.0 / 60.0);
        assert_eq!(engine.part(part.id).unwrap().state, PartState::Lost);
    }
}
