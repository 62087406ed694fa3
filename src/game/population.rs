//! Asteroid population budgeting and view-aware spawning

use super::engine::SimulationEngine;
use super::entities::ViewRect;
use super::math::Vec2;
use super::tuning::{AsteroidSize, Tunables, WorldSize};

/// Smallest target any world gets, unless the hard cap is lower
const MIN_TARGET: usize = 4;
const SPAWN_ATTEMPTS: usize = 8;
/// Clearance kept between a fresh asteroid and any ship hull
const SHIP_CLEARANCE: f64 = 40.0;

/// Asteroid count thresholds for one world. The hard cap in [`Tunables`]
/// bounds `target`; refills stop at `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationBudget {
    pub target: usize,
    pub min: usize,
    /// Below this the field refills at the urgent cadence
    pub urgent: usize,
}

impl PopulationBudget {
    pub fn for_world(world: &WorldSize, tunables: &Tunables) -> Self {
        let cap = tunables.asteroid_hard_cap;
        let raw = world.area() / 1.0e6 * tunables.asteroid_density * tunables.density_scale;
        let raw = if raw.is_finite() { raw.max(0.0).round() as usize } else { 0 };
        let target = raw.clamp(MIN_TARGET.min(cap), cap);
        let t = target as f64;
        Self {
            target,
            min: (t * 0.6).floor() as usize,
            urgent: (t * 0.35).floor() as usize,
        }
    }

    /// Seconds until the next spawn attempt, or `None` when at target
    pub fn spawn_interval(&self, count: usize, tunables: &Tunables) -> Option<f64> {
        if count >= self.target {
            None
        } else if count < self.urgent {
            Some(tunables.spawn_interval_urgent_sec)
        } else if count < self.min {
            Some(tunables.spawn_interval_normal_sec)
        } else {
            Some(tunables.spawn_interval_relaxed_sec)
        }
    }
}

impl SimulationEngine {
    pub fn population_budget(&self) -> PopulationBudget {
        PopulationBudget::for_world(&self.world, &self.tunables)
    }

    pub(super) fn update_population(&mut self, dt: f64) {
        if !self.tunables.population_enabled {
            return;
        }
        let budget = self.population_budget();
        let count = self.asteroids.len();
        let Some(interval) = budget.spawn_interval(count, &self.tunables) else {
            return;
        };

        self.spawn_timer = self.spawn_timer.min(interval) - dt;
        if self.spawn_timer > 0.0 {
            return;
        }
        self.spawn_timer = interval;
        self.spawn_offscreen();
    }

    fn viewports(&self) -> Vec<ViewRect> {
        let default_half = Vec2::new(
            self.tunables.default_view_half_width,
            self.tunables.default_view_half_height,
        );
        self.ships
            .values()
            .map(|s| s.effective_view(default_half))
            .collect()
    }

    fn random_size(&mut self) -> AsteroidSize {
        let weights = AsteroidSize::ALL.map(|s| s.stats().spawn_weight);
        AsteroidSize::ALL[self.rng.gameplay.weighted(&weights)]
    }

    fn random_drift(&mut self, size: AsteroidSize) -> (Vec2, f64) {
        let stats = size.stats();
        let heading = self.rng.gameplay.range(0.0, std::f64::consts::TAU);
        let speed = self.rng.gameplay.range(stats.min_speed, stats.max_speed);
        let rot_vel = self.rng.gameplay.range(-1.0, 1.0);
        (Vec2::new(heading.cos(), heading.sin()) * speed, rot_vel)
    }

    /// Whether an asteroid of `radius` may appear at `pos`
    fn spawn_position_ok(&self, pos: Vec2, radius: f64, views: &[ViewRect]) -> bool {
        let half = self.world.half_extents();
        if pos.x.abs() > half.x - radius || pos.y.abs() > half.y - radius {
            return false;
        }
        if self.tunables.round_enabled
            && pos.x < self.round.star_x + radius + self.tunables.spawn_margin
        {
            return false;
        }
        if views.iter().any(|v| v.contains(pos, radius)) {
            return false;
        }
        let near_ship = self.ships.values().any(|s| {
            let clear = s.pose.radius + radius + SHIP_CLEARANCE;
            s.pose.pos.distance_sq(pos) < clear * clear
        });
        let near_asteroid = self.asteroids.values().any(|a| {
            let clear = a.radius + radius;
            a.pos.distance_sq(pos) < clear * clear
        });
        !near_ship && !near_asteroid
    }

    /// Try to place one asteroid just outside some player's viewport.
    /// Without players, any free spot in the world is used.
    fn spawn_offscreen(&mut self) -> bool {
        let size = self.random_size();
        let radius = size.stats().radius;
        let views = self.viewports();
        let half = self.world.half_extents();
        let margin = self.tunables.spawn_margin;

        for _ in 0..SPAWN_ATTEMPTS {
            let pos = if views.is_empty() {
                Vec2::new(
                    self.rng.gameplay.range(-half.x, half.x),
                    self.rng.gameplay.range(-half.y, half.y),
                )
            } else {
                let view = views[self.rng.gameplay.index(views.len())];
                let off = margin + radius + view.margin;
                let along = self.rng.gameplay.range(-1.0, 1.0);
                match self.rng.gameplay.index(4) {
                    0 => Vec2::new(view.cx - view.half_w - off, view.cy + along * view.half_h),
                    1 => Vec2::new(view.cx + view.half_w + off, view.cy + along * view.half_h),
                    2 => Vec2::new(view.cx + along * view.half_w, view.cy - view.half_h - off),
                    _ => Vec2::new(view.cx + along * view.half_w, view.cy + view.half_h + off),
                }
            };
            if !self.spawn_position_ok(pos, radius, &views) {
                continue;
            }
            let (vel, rot_vel) = self.random_drift(size);
            self.insert_asteroid(size, pos, vel, rot_vel);
            return true;
        }
        false
    }

    /// Fill the field up to its target at round start
    pub(super) fn seed_field(&mut self) {
        let budget = self.population_budget();
        let half = self.world.half_extents();
        let views = self.viewports();
        let mut attempts = budget.target * 6;

        while self.asteroids.len() < budget.target && attempts > 0 {
            attempts -= 1;
            let size = self.random_size();
            let radius = size.stats().radius;
            let pos = Vec2::new(
                self.rng.gameplay.range(-half.x, half.x),
                self.rng.gameplay.range(-half.y, half.y),
            );
            if !self.spawn_position_ok(pos, radius, &views) {
                continue;
            }
            let (vel, rot_vel) = self.random_drift(size);
            self.insert_asteroid(size, pos, vel, rot_vel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine::EngineOptions;

    #[test]
    fn test_budget_thresholds() {
        let budget = PopulationBudget::for_world(&WorldSize::default(), &Tunables::default());
        assert_eq!(budget.target, 38);
        assert_eq!(budget.min, 22);
        assert_eq!(budget.urgent, 13);
    }

    #[test]
    fn test_budget_respects_hard_cap() {
        let tunables = Tunables { asteroid_hard_cap: 10, density_scale: 50.0, ..Tunables::default() };
        let budget = PopulationBudget::for_world(&WorldSize::default(), &tunables);
        assert_eq!(budget.target, 10);
    }

    #[test]
    fn test_cadence_adapts_to_count() {
        let t = Tunables::default();
        let budget = PopulationBudget::for_world(&WorldSize::default(), &t);
        assert_eq!(budget.spawn_interval(0, &t), Some(t.spawn_interval_urgent_sec));
        assert_eq!(budget.spawn_interval(budget.urgent, &t), Some(t.spawn_interval_normal_sec));
        assert_eq!(budget.spawn_interval(budget.min, &t), Some(t.spawn_interval_relaxed_sec));
        assert_eq!(budget.spawn_interval(budget.target, &t), None);
        // Fracture can overshoot; no refill above target either
        assert_eq!(budget.spawn_interval(budget.target + 5, &t), None);
    }

    #[test]
    fn test_spawns_stay_out_of_viewports() {
        let tunables = Tunables { saucer_enabled: false, round_enabled: false, ..Tunables::default() };
        let mut engine = SimulationEngine::new(EngineOptions::new(17).with_tunables(tunables));
        engine.asteroids.clear();
        engine.add_player("p1");
        let view = engine
            .ship("p1")
            .unwrap()
            .effective_view(Vec2::new(640.0, 400.0));
        for _ in 0..120 {
            let before: Vec<u32> = engine.asteroids().map(|a| a.id).collect();
            engine.update(1.0 / 60.0);
            for asteroid in engine.asteroids().filter(|a| !before.contains(&a.id)) {
                assert!(!view.contains(asteroid.pos, asteroid.radius));
            }
        }
        assert!(engine.asteroid_count() > 0);
    }
}
