//! Asteroid and ship contacts, impact energy and fracture

use std::collections::BTreeSet;

use super::engine::{FractureResult, SimulationEngine};
use super::entities::{Asteroid, EntityId};
use super::math::Vec2;
use super::physics::circle_contact;
use super::spatial::SpatialHash;
use super::tuning::AsteroidSize;

const SPATIAL_CELL_SIZE: f64 = 128.0;
const RESTITUTION: f64 = 0.8;
const CHILD_SPIN: f64 = 0.9;

/// Read-only view of one asteroid for pair resolution
#[derive(Clone, Copy)]
struct Body {
    pos: Vec2,
    vel: Vec2,
    radius: f64,
    inv_mass: f64,
    mass: f64,
    launched: bool,
    can_fracture: bool,
    fracture_energy: f64,
}

impl SimulationEngine {
    pub(super) fn resolve_collisions(&mut self) {
        let mut fractures: Vec<(EntityId, Vec2)> = Vec::new();
        self.collide_asteroids(&mut fractures);
        self.collide_ships_with_asteroids(&mut fractures);

        let mut seen = BTreeSet::new();
        for (id, normal) in fractures {
            if seen.insert(id) {
                self.fracture_with_normal(id, normal);
            }
        }
    }

    fn body(&self, asteroid: &Asteroid) -> Body {
        let attached = asteroid.is_attached();
        Body {
            pos: asteroid.pos,
            vel: self.effective_velocity(asteroid),
            radius: asteroid.radius,
            inv_mass: if attached { 0.0 } else { 1.0 / asteroid.mass },
            mass: asteroid.mass,
            launched: asteroid.ship_launched,
            can_fracture: asteroid.fracture_cooldown <= 0.0,
            fracture_energy: asteroid.size.stats().fracture_energy,
        }
    }

    fn collide_asteroids(&mut self, fractures: &mut Vec<(EntityId, Vec2)>) {
        let mut hash = SpatialHash::new(SPATIAL_CELL_SIZE);
        for asteroid in self.asteroids.values() {
            hash.insert(asteroid.id, asteroid.pos, asteroid.radius);
        }
        let multiplier = self.tunables.launched_damage_multiplier;

        for (id_a, id_b) in hash.candidate_pairs() {
            let (Some(a), Some(b)) = (self.asteroids.get(&id_a), self.asteroids.get(&id_b)) else {
                continue;
            };
            let (a, b) = (self.body(a), self.body(b));
            let total_inv = a.inv_mass + b.inv_mass;
            if total_inv == 0.0 {
                continue;
            }
            let Some(contact) = circle_contact(a.pos, a.radius, b.pos, b.radius) else {
                continue;
            };
            let n = contact.normal;

            if let Some(aa) = self.asteroids.get_mut(&id_a) {
                if a.inv_mass > 0.0 {
                    aa.pos -= n * (contact.overlap * a.inv_mass / total_inv);
                }
            }
            if let Some(bb) = self.asteroids.get_mut(&id_b) {
                if b.inv_mass > 0.0 {
                    bb.pos += n * (contact.overlap * b.inv_mass / total_inv);
                }
            }

            let vn = (b.vel - a.vel).dot(n);
            if vn >= 0.0 {
                continue;
            }

            let reduced_mass = a.mass * b.mass / (a.mass + b.mass);
            let energy = 0.5 * reduced_mass * vn * vn;
            let on_a = if b.launched { energy * multiplier } else { energy };
            let on_b = if a.launched { energy * multiplier } else { energy };
            if a.can_fracture && on_a >= a.fracture_energy {
                fractures.push((id_a, n));
            }
            if b.can_fracture && on_b >= b.fracture_energy {
                fractures.push((id_b, n));
            }

            let j = -(1.0 + RESTITUTION) * vn / total_inv;
            if let Some(aa) = self.asteroids.get_mut(&id_a) {
                if a.inv_mass > 0.0 {
                    aa.vel -= n * (j * a.inv_mass);
                }
            }
            if let Some(bb) = self.asteroids.get_mut(&id_b) {
                if b.inv_mass > 0.0 {
                    bb.vel += n * (j * b.inv_mass);
                }
            }
        }
    }

    /// Ships bounce off free asteroids and off other ships' rings. A ship's
    /// own ring never touches it.
    fn collide_ships_with_asteroids(&mut self, fractures: &mut Vec<(EntityId, Vec2)>) {
        let ship_ids: Vec<String> = self.ships.keys().cloned().collect();
        let asteroid_ids: Vec<EntityId> = self.asteroids.keys().copied().collect();

        for ship_id in &ship_ids {
            for asteroid_id in &asteroid_ids {
                let Some(asteroid) = self.asteroids.get(asteroid_id) else {
                    continue;
                };
                if asteroid.attached_to.as_deref() == Some(ship_id.as_str()) {
                    continue;
                }
                let body = self.body(asteroid);
                let Some(ship) = self.ships.get(ship_id) else {
                    continue;
                };
                let (ship_pos, ship_vel, ship_radius, ship_mass) =
                    (ship.pose.pos, ship.pose.vel, ship.pose.radius, ship.pose.mass);

                let Some(contact) = circle_contact(ship_pos, ship_radius, body.pos, body.radius)
                else {
                    continue;
                };
                let n = contact.normal;
                let ship_inv = 1.0 / ship_mass;
                let total_inv = ship_inv + body.inv_mass;

                let vn = (body.vel - ship_vel).dot(n);
                let j = if vn < 0.0 {
                    -(1.0 + RESTITUTION) * vn / total_inv
                } else {
                    0.0
                };

                if vn < 0.0 {
                    let reduced_mass = ship_mass * body.mass / (ship_mass + body.mass);
                    let energy = 0.5 * reduced_mass * vn * vn;
                    if body.can_fracture && energy >= body.fracture_energy {
                        fractures.push((*asteroid_id, n));
                    }
                }

                if let Some(ship) = self.ships.get_mut(ship_id) {
                    ship.pose.pos -= n * (contact.overlap * ship_inv / total_inv);
                    ship.pose.vel -= n * (j * ship_inv);
                }
                if body.inv_mass > 0.0 {
                    if let Some(asteroid) = self.asteroids.get_mut(asteroid_id) {
                        asteroid.pos += n * (contact.overlap * body.inv_mass / total_inv);
                        asteroid.vel += n * (j * body.inv_mass);
                    }
                }
            }
        }
    }

    /// Fracture an asteroid as if struck along `impact_normal`.
    ///
    /// Large and bigger split into two children offset along the tangent;
    /// med yields two gems; small is simply destroyed. Any tech part inside
    /// drops at the parent's position. Returns `None` for unknown ids or once
    /// the round is over.
    pub fn fracture(&mut self, id: EntityId, impact_normal: Vec2) -> Option<FractureResult> {
        if self.is_terminal() {
            return None;
        }
        self.fracture_with_normal(id, impact_normal)
    }

    fn fracture_with_normal(&mut self, id: EntityId, impact_normal: Vec2) -> Option<FractureResult> {
        let parent = self.asteroids.get(&id)?;
        let base_vel = self.effective_velocity(parent);
        let parent = self.asteroids.remove(&id)?;

        let mut normal = impact_normal.normalize_or_zero();
        if normal == Vec2::ZERO {
            normal = Vec2::new(1.0, 0.0);
        }
        let tangent = normal.perp();

        for part in self.parts.values_mut() {
            if part.container_asteroid_id == Some(id) {
                part.drop_at(parent.pos);
                tracing::info!(part_id = part.id, "Tech part released");
            }
        }

        let split = self.tunables.fracture_split_speed;
        let mut result = FractureResult::default();
        match parent.size.child() {
            Some(child) => {
                let offset = child.stats().radius;
                for sign in [1.0, -1.0] {
                    let pos = parent.pos + tangent * (offset * sign);
                    let vel = base_vel + tangent * (split * sign);
                    let rot_vel = parent.rot_vel + CHILD_SPIN * sign;
                    let child_id = self.insert_asteroid(child, pos, vel, rot_vel);
                    if let Some(c) = self.asteroids.get_mut(&child_id) {
                        c.fracture_cooldown = self.tunables.fracture_cooldown_sec;
                    }
                    result.children.push(child_id);
                }
            }
            None if parent.size > AsteroidSize::Small => {
                for sign in [1.0, -1.0] {
                    let kind = self.random_gem_kind();
                    let pos = parent.pos + tangent * (8.0 * sign);
                    let vel = base_vel + tangent * (split * 0.5 * sign);
                    result.gems.push(self.spawn_gem(kind, pos, vel));
                }
            }
            None => {}
        }

        tracing::debug!(
            asteroid_id = id,
            size = ?parent.size,
            children = result.children.len(),
            gems = result.gems.len(),
            "Asteroid fractured"
        );
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::game::engine::{EngineOptions, SimulationEngine};
    use crate::game::math::Vec2;
    use crate::game::tuning::{AsteroidSize, Tunables};

    fn engine() -> SimulationEngine {
        let tunables = Tunables {
            population_enabled: false,
            saucer_enabled: false,
            round_enabled: false,
            ..Tunables::default()
        };
        SimulationEngine::new(EngineOptions::new(4).with_tunables(tunables))
    }

    #[test]
    fn test_large_splits_into_two_meds() {
        let mut engine = engine();
        let id = engine
            .spawn_asteroid(AsteroidSize::Large, Vec2::ZERO, Vec2::new(10.0, 0.0))
            .unwrap();
        let result = engine.fracture(id, Vec2::new(1.0, 0.0)).unwrap();
        assert_eq!(result.children.len(), 2);
        assert!(result.gems.is_empty());
        assert!(engine.asteroid(id).is_none());
        for child in &result.children {
            let a = engine.asteroid(*child).unwrap();
            assert_eq!(a.size, AsteroidSize::Med);
            assert!(a.fracture_cooldown > 0.0);
        }
    }

    #[test]
    fn test_med_yields_gems_small_yields_nothing() {
        let mut engine = engine();
        let med = engine.spawn_asteroid(AsteroidSize::Med, Vec2::ZERO, Vec2::ZERO).unwrap();
        let result = engine.fracture(med, Vec2::new(0.0, 1.0)).unwrap();
        assert!(result.children.is_empty());
        assert_eq!(result.gems.len(), 2);

        let small = engine
            .spawn_asteroid(AsteroidSize::Small, Vec2::new(300.0, 0.0), Vec2::ZERO)
            .unwrap();
        let result = engine.fracture(small, Vec2::ZERO).unwrap();
        assert_eq!(result, Default::default());
        assert!(engine.fracture(small, Vec2::ZERO).is_none());
    }

    #[test]
    fn test_head_on_impact_separates_bodies() {
        let mut engine = engine();
        let a = engine
            .spawn_asteroid(AsteroidSize::Small, Vec2::new(-13.0, 0.0), Vec2::new(20.0, 0.0))
            .unwrap();
        let b = engine
            .spawn_asteroid(AsteroidSize::Small, Vec2::new(13.0, 0.0), Vec2::new(-20.0, 0.0))
            .unwrap();
        engine.update(1.0 / 60.0);
        let (a, b) = (engine.asteroid(a).unwrap(), engine.asteroid(b).unwrap());
        assert!(a.vel.x < 0.0);
        assert!(b.vel.x > 0.0);
    }
}
