//! Gravity pull, ring capture, burst launch and ping markers

use std::collections::BTreeMap;

use super::engine::{attach, ring_radius, SimulationEngine};
use super::entities::{PlayerId, Ping, ShipPose};
use super::math::{angle_to_vec, Vec2};

/// Distances below this are clamped before the inverse-square pull
const MIN_PULL_DISTANCE: f64 = 40.0;

impl SimulationEngine {
    /// Pull free asteroids toward their nearest eligible ship and capture the
    /// ones that settle onto the ring.
    ///
    /// Eligibility: within the attract radius, small enough for the ship's
    /// tier, ship below its attachment cap, not inside a launch grace window.
    /// Ties in distance go to the lexicographically smallest player id.
    pub(super) fn apply_gravity(&mut self, dt: f64) {
        if self.ships.is_empty() {
            return;
        }
        let radius = self.tunables.attract_radius();
        let gap = self.tunables.ring_gap;
        let damping = 1.0 - (-self.tunables.ring_damping * dt).exp();

        let ships: Vec<ShipPose> = self.ships.values().map(|s| s.pose.clone()).collect();
        let mut attached: BTreeMap<PlayerId, usize> = BTreeMap::new();
        for asteroid in self.asteroids.values() {
            if let Some(owner) = &asteroid.attached_to {
                *attached.entry(owner.clone()).or_default() += 1;
            }
        }

        for asteroid in self.asteroids.values_mut() {
            if asteroid.is_attached() || asteroid.launch_timer > 0.0 {
                continue;
            }

            let mut best: Option<(&ShipPose, f64)> = None;
            for pose in &ships {
                let stats = pose.tier.stats();
                if asteroid.size > stats.max_attract_size {
                    continue;
                }
                if attached.get(&pose.owner_id).copied().unwrap_or(0) >= stats.max_attached {
                    continue;
                }
                let d = pose.pos.distance(asteroid.pos);
                if d > radius {
                    continue;
                }
                // strict comparison keeps the earliest (smallest) id on ties
                if best.map_or(true, |(_, best_d)| d < best_d) {
                    best = Some((pose, d));
                }
            }
            let Some((owner, d)) = best else {
                continue;
            };

            let stats = owner.tier.stats();
            let ring = ring_radius(owner.radius, asteroid.radius, gap);
            let toward = (owner.pos - asteroid.pos).normalize_or_zero();
            let pull = if d > ring {
                self.tunables.gravity_strength * stats.attract_scale
                    / d.max(MIN_PULL_DISTANCE).powi(2)
            } else {
                0.0
            };
            let spring = self.tunables.ring_spring * (d - ring);

            asteroid.vel += toward * ((pull + spring) * dt);
            asteroid.vel += (owner.vel - asteroid.vel) * damping;

            let radial_error = (d - ring).abs();
            let relative_speed = asteroid.vel.distance(owner.vel);
            if radial_error < self.tunables.capture_radial_tolerance
                && relative_speed < self.tunables.capture_speed_tolerance
            {
                attach(asteroid, owner, gap);
                *attached.entry(owner.owner_id.clone()).or_default() += 1;
                tracing::debug!(
                    asteroid_id = asteroid.id,
                    player_id = %owner.owner_id,
                    "Asteroid captured"
                );
            }
        }
    }

    /// Launch every ring member of ships that pressed burst this tick
    pub(super) fn handle_bursts(&mut self) {
        let ready: Vec<PlayerId> = self
            .ships
            .values()
            .filter(|s| s.input.burst && s.burst_cooldown <= 0.0)
            .map(|s| s.id().to_string())
            .collect();
        for id in ready {
            let launched = self.burst(&id);
            if let Some(ship) = self.ships.get_mut(&id) {
                ship.burst_cooldown = self.tunables.burst_cooldown_sec;
            }
            if launched > 0 {
                tracing::debug!(player_id = %id, launched, "Burst");
            }
        }
    }

    /// Release a ship's ring outward. Launch speed is the ship velocity plus
    /// `burst_speed` scaled by the tier. Returns how many were launched.
    pub(super) fn burst(&mut self, id: &str) -> usize {
        let Some(pose) = self.ships.get(id).map(|s| s.pose.clone()) else {
            return 0;
        };
        let speed = self.tunables.burst_speed * pose.tier.stats().burst_scale;
        let grace = self.tunables.launch_grace_sec;

        let mut launched = 0;
        for asteroid in self.asteroids.values_mut() {
            if asteroid.attached_to.as_deref() != Some(id) {
                continue;
            }
            let mut outward = (asteroid.pos - pose.pos).normalize_or_zero();
            if outward == Vec2::ZERO {
                outward = angle_to_vec(pose.angle + asteroid.orbit_angle);
            }
            asteroid.attached_to = None;
            asteroid.vel = pose.vel + outward * speed;
            asteroid.ship_launched = true;
            asteroid.launch_timer = grace;
            launched += 1;
        }
        launched
    }

    pub(super) fn handle_pings(&mut self) {
        let cooldown = self.tunables.ping_cooldown_sec;
        for ship in self.ships.values_mut() {
            if !ship.input.ping || ship.ping_cooldown > 0.0 {
                continue;
            }
            ship.ping_cooldown = cooldown;
            self.pings.push(Ping {
                owner_id: ship.id().to_string(),
                pos: ship.pose.pos,
                age_sec: 0.0,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::game::engine::{EngineOptions, SimulationEngine};
    use crate::game::math::Vec2;
    use crate::game::tuning::{AsteroidSize, ShipTier, Tunables};
    use crate::game::InputSample;

    fn engine() -> SimulationEngine {
        let tunables = Tunables {
            population_enabled: false,
            saucer_enabled: false,
            round_enabled: false,
            ..Tunables::default()
        };
        SimulationEngine::new(EngineOptions::new(21).with_tunables(tunables))
    }

    #[test]
    fn test_asteroid_on_ring_is_captured() {
        let mut engine = engine();
        engine.add_player("p1");
        engine.place_ship("p1", Vec2::ZERO, 0.0);
        let ring = engine.ring_radius(ShipTier::Small.stats().radius, AsteroidSize::Small.stats().radius);
        let id = engine
            .spawn_asteroid(AsteroidSize::Small, Vec2::new(0.0, ring + 1.0), Vec2::ZERO)
            .unwrap();
        engine.update(1.0 / 60.0);
        assert_eq!(engine.asteroid(id).unwrap().attached_to.as_deref(), Some("p1"));
    }

    #[test]
    fn test_too_large_for_tier_is_ignored() {
        let mut engine = engine();
        engine.add_player("p1");
        engine.place_ship("p1", Vec2::ZERO, 0.0);
        let id = engine
            .spawn_asteroid(AsteroidSize::Large, Vec2::new(0.0, 120.0), Vec2::ZERO)
            .unwrap();
        for _ in 0..30 {
            engine.update(1.0 / 60.0);
        }
        let asteroid = engine.asteroid(id).unwrap();
        assert!(asteroid.attached_to.is_none());
        assert_eq!(asteroid.vel, Vec2::ZERO);
    }

    #[test]
    fn test_burst_sets_cooldown_and_grace() {
        let mut engine = engine();
        engine.add_player("p1");
        engine.place_ship("p1", Vec2::ZERO, 0.0);
        let id = engine
            .spawn_asteroid(AsteroidSize::Small, Vec2::new(42.0, 0.0), Vec2::ZERO)
            .unwrap();
        engine.attach_asteroid(id, "p1");
        engine.set_input("p1", &InputSample { seq: 1, burst: true, ..Default::default() });
        engine.update(1.0 / 60.0);

        let asteroid = engine.asteroid(id).unwrap();
        assert!(asteroid.attached_to.is_none());
        assert!(asteroid.ship_launched);
        assert!(asteroid.launch_timer > 0.0);
        assert!(engine.ship("p1").unwrap().burst_cooldown > 0.0);
    }

    #[test]
    fn test_ping_respects_cooldown() {
        let mut engine = engine();
        engine.add_player("p1");
        for seq in 1..=3 {
            engine.set_input("p1", &InputSample { seq, ping: true, ..Default::default() });
            engine.update(1.0 / 60.0);
        }
        assert_eq!(engine.pings().len(), 1);
    }
}
