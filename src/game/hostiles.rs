//! Saucer and laser hostiles

use super::engine::SimulationEngine;
use super::entities::{EntityId, GemKind, Laser, Saucer, LASER_RADIUS, SAUCER_RADIUS};
use super::math::Vec2;
use super::physics::{circles_overlap, outside_bounds};

impl SimulationEngine {
    pub(super) fn update_hostiles(&mut self, dt: f64) {
        self.update_saucer(dt);
        self.update_lasers(dt);
    }

    fn update_saucer(&mut self, dt: f64) {
        if self.saucer.is_none() {
            if !self.tunables.saucer_enabled {
                return;
            }
            self.saucer_timer -= dt;
            if self.saucer_timer <= 0.0 {
                self.spawn_saucer();
                let jitter = self.rng.gameplay.range(0.75, 1.25);
                self.saucer_timer = self.tunables.saucer_interval_sec * jitter;
            }
            return;
        }

        let half = self.world.half_extents();
        let Some(mut saucer) = self.saucer.take() else {
            return;
        };
        saucer.pos += saucer.vel * dt;
        if outside_bounds(saucer.pos, half, self.tunables.despawn_margin) {
            tracing::debug!(saucer_id = saucer.id, "Saucer left the field");
            return;
        }

        let rammed = self.asteroids.values().find(|a| {
            a.ship_launched && circles_overlap(a.pos, a.radius, saucer.pos, saucer.radius)
        });
        if let Some(asteroid) = rammed {
            tracing::debug!(saucer_id = saucer.id, asteroid_id = asteroid.id, "Saucer destroyed");
            for sign in [1.0, -1.0] {
                let vel = saucer.vel + Vec2::new(0.0, 30.0 * sign);
                self.spawn_gem(GemKind::Gold, saucer.pos, vel);
            }
            return;
        }

        saucer.fire_timer -= dt;
        if saucer.fire_timer <= 0.0 {
            saucer.fire_timer = self.tunables.saucer_fire_interval_sec;
            if let Some(target) = self.nearest_ship_within(saucer.pos, self.tunables.saucer_range) {
                let dir = (target - saucer.pos).normalize_or_zero();
                if dir != Vec2::ZERO {
                    self.spawn_laser(saucer.pos + dir * saucer.radius, dir);
                }
            }
        }
        self.saucer = Some(saucer);
    }

    fn spawn_saucer(&mut self) {
        let half = self.world.half_extents();
        let star_behind_left_edge = self.round.star_x <= -half.x;
        let from_left = self.rng.gameplay.chance(0.5) && star_behind_left_edge;
        let side = if from_left { 1.0 } else { -1.0 };
        let y = self.rng.gameplay.range(-0.8, 0.8) * half.y;
        let drift = self.rng.gameplay.range(-0.3, 0.3);
        let speed = self.tunables.saucer_speed;

        let id = self.alloc_id();
        self.saucer = Some(Saucer {
            id,
            pos: Vec2::new(-side * (half.x + SAUCER_RADIUS), y),
            vel: Vec2::new(side * speed, drift * speed),
            radius: SAUCER_RADIUS,
            fire_timer: self.tunables.saucer_fire_interval_sec,
        });
        tracing::debug!(saucer_id = id, from_left, "Saucer spawned");
    }

    fn nearest_ship_within(&self, from: Vec2, range: f64) -> Option<Vec2> {
        let mut best: Option<(Vec2, f64)> = None;
        for ship in self.ships.values() {
            let d = ship.pose.pos.distance(from);
            if d <= range && best.map_or(true, |(_, bd)| d < bd) {
                best = Some((ship.pose.pos, d));
            }
        }
        best.map(|(pos, _)| pos)
    }

    fn spawn_laser(&mut self, pos: Vec2, dir: Vec2) {
        let id = self.alloc_id();
        self.lasers.insert(
            id,
            Laser {
                id,
                pos,
                vel: dir * self.tunables.laser_speed,
                radius: LASER_RADIUS,
                age_sec: 0.0,
                ttl_sec: self.tunables.laser_lifetime_sec,
            },
        );
    }

    fn update_lasers(&mut self, dt: f64) {
        let half = self.world.half_extents();
        let margin = self.tunables.despawn_margin;
        let knockback = self.tunables.laser_knockback;

        let mut spent: Vec<EntityId> = Vec::new();
        for laser in self.lasers.values_mut() {
            laser.pos += laser.vel * dt;
            laser.age_sec += dt;
            if laser.age_sec >= laser.ttl_sec || outside_bounds(laser.pos, half, margin) {
                spent.push(laser.id);
                continue;
            }

            let hit_ship = self
                .ships
                .values_mut()
                .find(|s| circles_overlap(s.pose.pos, s.pose.radius, laser.pos, laser.radius));
            if let Some(ship) = hit_ship {
                ship.pose.vel += laser.vel.normalize_or_zero() * knockback;
                if let Some(part_id) = ship.carried_part.take() {
                    if let Some(part) = self.parts.get_mut(&part_id) {
                        part.drop_at(ship.pose.pos);
                        tracing::debug!(part_id, player_id = %ship.pose.owner_id, "Laser knocked part loose");
                    }
                }
                spent.push(laser.id);
                continue;
            }

            let absorbed = self
                .asteroids
                .values()
                .any(|a| circles_overlap(a.pos, a.radius, laser.pos, laser.radius));
            if absorbed {
                spent.push(laser.id);
            }
        }
        for id in spent {
            self.lasers.remove(&id);
        }
    }
}
