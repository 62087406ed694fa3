//! Gameplay constants: per-tier ship stats, per-size asteroid stats and the
//! tunable record shared verbatim between the authority and the predictor.

use serde::{Deserialize, Serialize};

use super::math::{finite_or, Vec2};

/// Ship size class. Only ever grows during a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipTier {
    Small,
    Medium,
    Large,
}

/// Per-tier constants
#[derive(Debug, Clone, Copy)]
pub struct TierStats {
    pub radius: f64,
    pub mass: f64,
    /// Multiplier on `Tunables::ship_thrust`
    pub thrust_scale: f64,
    /// Multiplier on `Tunables::burst_speed`
    pub burst_scale: f64,
    /// Multiplier on the gravity pull
    pub attract_scale: f64,
    /// Radius of the rendered force field; bounds the attract radius
    pub force_field_radius: f64,
    /// How many asteroids may orbit at once
    pub max_attached: usize,
    /// Largest asteroid this tier can pull in
    pub max_attract_size: AsteroidSize,
    /// Gem score needed to reach this tier
    pub gem_threshold: u32,
}

impl ShipTier {
    pub const ALL: [ShipTier; 3] = [ShipTier::Small, ShipTier::Medium, ShipTier::Large];

    pub fn stats(self) -> TierStats {
        match self {
            ShipTier::Small => TierStats {
                radius: 18.0,
                mass: 1.0,
                thrust_scale: 1.0,
                burst_scale: 1.0,
                attract_scale: 1.0,
                force_field_radius: 120.0,
                max_attached: 3,
                max_attract_size: AsteroidSize::Small,
                gem_threshold: 0,
            },
            ShipTier::Medium => TierStats {
                radius: 24.0,
                mass: 1.6,
                thrust_scale: 1.15,
                burst_scale: 1.3,
                attract_scale: 1.25,
                force_field_radius: 160.0,
                max_attached: 5,
                max_attract_size: AsteroidSize::Med,
                gem_threshold: 10,
            },
            ShipTier::Large => TierStats {
                radius: 32.0,
                mass: 2.5,
                thrust_scale: 1.3,
                burst_scale: 1.6,
                attract_scale: 1.5,
                force_field_radius: 210.0,
                max_attached: 8,
                max_attract_size: AsteroidSize::Large,
                gem_threshold: 30,
            },
        }
    }

    /// Highest tier whose threshold `gem_score` meets
    pub fn for_gem_score(gem_score: u32) -> ShipTier {
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|tier| gem_score >= tier.stats().gem_threshold)
            .unwrap_or(ShipTier::Small)
    }

    pub fn largest_force_field_radius() -> f64 {
        Self::ALL
            .iter()
            .map(|t| t.stats().force_field_radius)
            .fold(0.0, f64::max)
    }
}

impl Default for ShipTier {
    fn default() -> Self {
        Self::Small
    }
}

/// Asteroid size class. Only ever shrinks (fracture).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsteroidSize {
    Small,
    Med,
    Large,
    Xlarge,
    Xxlarge,
}

#[derive(Debug, Clone, Copy)]
pub struct SizeStats {
    pub radius: f64,
    pub mass: f64,
    /// Kinetic energy an impact must transfer to fracture this size
    pub fracture_energy: f64,
    pub spawn_weight: f64,
    pub min_speed: f64,
    pub max_speed: f64,
}

impl AsteroidSize {
    pub const ALL: [AsteroidSize; 5] = [
        AsteroidSize::Small,
        AsteroidSize::Med,
        AsteroidSize::Large,
        AsteroidSize::Xlarge,
        AsteroidSize::Xxlarge,
    ];

    pub fn stats(self) -> SizeStats {
        match self {
            AsteroidSize::Small => SizeStats {
                radius: 14.0,
                mass: 1.0,
                fracture_energy: 4_000.0,
                spawn_weight: 0.30,
                min_speed: 30.0,
                max_speed: 80.0,
            },
            AsteroidSize::Med => SizeStats {
                radius: 24.0,
                mass: 3.0,
                fracture_energy: 12_000.0,
                spawn_weight: 0.30,
                min_speed: 20.0,
                max_speed: 60.0,
            },
            AsteroidSize::Large => SizeStats {
                radius: 40.0,
                mass: 8.0,
                fracture_energy: 30_000.0,
                spawn_weight: 0.20,
                min_speed: 15.0,
                max_speed: 45.0,
            },
            AsteroidSize::Xlarge => SizeStats {
                radius: 60.0,
                mass: 18.0,
                fracture_energy: 70_000.0,
                spawn_weight: 0.15,
                min_speed: 10.0,
                max_speed: 30.0,
            },
            AsteroidSize::Xxlarge => SizeStats {
                radius: 86.0,
                mass: 36.0,
                fracture_energy: 150_000.0,
                spawn_weight: 0.05,
                min_speed: 5.0,
                max_speed: 20.0,
            },
        }
    }

    /// Size of the two children produced by a fracture. `Med` and `Small`
    /// have no asteroid children.
    pub fn child(self) -> Option<AsteroidSize> {
        match self {
            AsteroidSize::Xxlarge => Some(AsteroidSize::Xlarge),
            AsteroidSize::Xlarge => Some(AsteroidSize::Large),
            AsteroidSize::Large => Some(AsteroidSize::Med),
            AsteroidSize::Med | AsteroidSize::Small => None,
        }
    }
}

/// World dimensions; the world is centered on the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSize {
    pub width: f64,
    pub height: f64,
}

impl WorldSize {
    pub const MIN_EXTENT: f64 = 800.0;
    pub const MAX_EXTENT: f64 = 20_000.0;

    pub fn new(width: f64, height: f64) -> Self {
        let d = Self::default();
        Self {
            width: finite_or(width, d.width).clamp(Self::MIN_EXTENT, Self::MAX_EXTENT),
            height: finite_or(height, d.height).clamp(Self::MIN_EXTENT, Self::MAX_EXTENT),
        }
    }

    pub fn half_extents(&self) -> Vec2 {
        Vec2::new(self.width * 0.5, self.height * 0.5)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

impl Default for WorldSize {
    fn default() -> Self {
        Self {
            width: 3200.0,
            height: 2000.0,
        }
    }
}

/// Margin kept between the largest force field and the attract radius
pub const ATTRACT_RADIUS_MARGIN: f64 = 24.0;

/// Gameplay tunables.
///
/// The authority sends its exact record in the handshake; the client predictor
/// must step with the same values or prediction will drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tunables {
    // Ship kinematics
    pub ship_turn_rate: f64,
    pub ship_thrust: f64,
    pub ship_max_speed: f64,
    pub ship_linear_damping: f64,
    pub ship_brake: f64,

    // Gravity and ring capture
    pub attract_radius_base: f64,
    pub gravity_strength: f64,
    pub ring_spring: f64,
    pub ring_damping: f64,
    pub ring_gap: f64,
    pub capture_radial_tolerance: f64,
    pub capture_speed_tolerance: f64,
    pub orbit_spin_rate: f64,

    // Burst
    pub burst_speed: f64,
    pub burst_cooldown_sec: f64,
    pub launch_grace_sec: f64,
    pub launched_damage_multiplier: f64,

    // Fracture and gems
    pub fracture_split_speed: f64,
    pub fracture_cooldown_sec: f64,
    pub gem_ttl_sec: f64,
    pub gem_drag: f64,
    pub gem_pickup_margin: f64,

    // Population budget
    pub population_enabled: bool,
    /// Target asteroids per million square world units
    pub asteroid_density: f64,
    pub density_scale: f64,
    pub asteroid_hard_cap: usize,
    pub spawn_interval_urgent_sec: f64,
    pub spawn_interval_normal_sec: f64,
    pub spawn_interval_relaxed_sec: f64,
    pub spawn_margin: f64,
    pub default_view_half_width: f64,
    pub default_view_half_height: f64,

    // Saucer and lasers
    pub saucer_enabled: bool,
    pub saucer_interval_sec: f64,
    pub saucer_speed: f64,
    pub saucer_fire_interval_sec: f64,
    pub saucer_range: f64,
    pub laser_speed: f64,
    pub laser_lifetime_sec: f64,
    pub laser_knockback: f64,
    pub despawn_margin: f64,

    // Round objective
    pub round_enabled: bool,
    pub round_duration_sec: f64,
    pub gate_slots: usize,
    pub gate_radius: f64,
    pub part_pickup_radius: f64,
    pub respawn_margin: f64,

    // Ping
    pub ping_cooldown_sec: f64,
    pub ping_ttl_sec: f64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            ship_turn_rate: 3.4,
            ship_thrust: 420.0,
            ship_max_speed: 520.0,
            ship_linear_damping: 0.6,
            ship_brake: 3.0,

            attract_radius_base: 200.0,
            gravity_strength: 2.0e5,
            ring_spring: 2.5,
            ring_damping: 2.2,
            ring_gap: 10.0,
            capture_radial_tolerance: 6.0,
            capture_speed_tolerance: 60.0,
            orbit_spin_rate: 0.8,

            burst_speed: 360.0,
            burst_cooldown_sec: 0.6,
            launch_grace_sec: 0.8,
            launched_damage_multiplier: 2.5,

            fracture_split_speed: 40.0,
            fracture_cooldown_sec: 0.25,
            gem_ttl_sec: 12.0,
            gem_drag: 1.2,
            gem_pickup_margin: 6.0,

            population_enabled: true,
            asteroid_density: 6.0,
            density_scale: 1.0,
            asteroid_hard_cap: 120,
            spawn_interval_urgent_sec: 0.15,
            spawn_interval_normal_sec: 0.6,
            spawn_interval_relaxed_sec: 1.5,
            spawn_margin: 80.0,
            default_view_half_width: 640.0,
            default_view_half_height: 400.0,

            saucer_enabled: true,
            saucer_interval_sec: 25.0,
            saucer_speed: 90.0,
            saucer_fire_interval_sec: 1.8,
            saucer_range: 600.0,
            laser_speed: 420.0,
            laser_lifetime_sec: 2.5,
            laser_knockback: 160.0,
            despawn_margin: 80.0,

            round_enabled: true,
            round_duration_sec: 240.0,
            gate_slots: 3,
            gate_radius: 90.0,
            part_pickup_radius: 20.0,
            respawn_margin: 200.0,

            ping_cooldown_sec: 2.0,
            ping_ttl_sec: 1.5,
        }
    }
}

impl Tunables {
    /// Radius within which asteroids feel a ship's pull. Never smaller than
    /// the largest tier's force field plus [`ATTRACT_RADIUS_MARGIN`].
    pub fn attract_radius(&self) -> f64 {
        self.attract_radius_base
            .max(ShipTier::largest_force_field_radius() + ATTRACT_RADIUS_MARGIN)
    }

    pub fn with_overrides(mut self, overrides: &TuningOverrides) -> Self {
        overrides.apply(&mut self);
        self
    }
}

/// Optional per-room tuning supplied in the join request.
/// Non-finite or non-positive values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TuningOverrides {
    pub ship_turn_rate: Option<f64>,
    pub ship_thrust: Option<f64>,
    pub ship_max_speed: Option<f64>,
    pub ship_linear_damping: Option<f64>,
    pub ship_brake: Option<f64>,
    pub attract_radius_base: Option<f64>,
    pub burst_speed: Option<f64>,
    pub density_scale: Option<f64>,
    pub asteroid_hard_cap: Option<usize>,
    pub round_duration_sec: Option<f64>,
    pub gate_slots: Option<usize>,
    pub population_enabled: Option<bool>,
    pub saucer_enabled: Option<bool>,
    pub round_enabled: Option<bool>,
}

impl TuningOverrides {
    pub fn apply(&self, t: &mut Tunables) {
        set_positive(&mut t.ship_turn_rate, self.ship_turn_rate);
        set_positive(&mut t.ship_thrust, self.ship_thrust);
        set_positive(&mut t.ship_max_speed, self.ship_max_speed);
        set_positive(&mut t.ship_linear_damping, self.ship_linear_damping);
        set_positive(&mut t.ship_brake, self.ship_brake);
        set_positive(&mut t.attract_radius_base, self.attract_radius_base);
        set_positive(&mut t.burst_speed, self.burst_speed);
        set_positive(&mut t.density_scale, self.density_scale);
        set_positive(&mut t.round_duration_sec, self.round_duration_sec);
        if let Some(cap) = self.asteroid_hard_cap {
            t.asteroid_hard_cap = cap.min(1_000);
        }
        if let Some(slots) = self.gate_slots {
            t.gate_slots = slots.clamp(1, 8);
        }
        if let Some(v) = self.population_enabled {
            t.population_enabled = v;
        }
        if let Some(v) = self.saucer_enabled {
            t.saucer_enabled = v;
        }
        if let Some(v) = self.round_enabled {
            t.round_enabled = v;
        }
    }
}

fn set_positive(slot: &mut f64, value: Option<f64>) {
    if let Some(v) = value {
        if v.is_finite() && v > 0.0 {
            *slot = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attract_radius_covers_largest_force_field() {
        let mut t = Tunables::default();
        t.attract_radius_base = 10.0;
        assert_eq!(
            t.attract_radius(),
            ShipTier::Large.stats().force_field_radius + ATTRACT_RADIUS_MARGIN
        );
        t.attract_radius_base = 900.0;
        assert_eq!(t.attract_radius(), 900.0);
    }

    #[test]
    fn test_tier_for_gem_score_is_monotonic() {
        assert_eq!(ShipTier::for_gem_score(0), ShipTier::Small);
        assert_eq!(ShipTier::for_gem_score(10), ShipTier::Medium);
        assert_eq!(ShipTier::for_gem_score(29), ShipTier::Medium);
        assert_eq!(ShipTier::for_gem_score(500), ShipTier::Large);
    }

    #[test]
    fn test_overrides_ignore_garbage() {
        let overrides = TuningOverrides {
            ship_thrust: Some(f64::NAN),
            ship_max_speed: Some(-5.0),
            burst_speed: Some(500.0),
            ..Default::default()
        };
        let t = Tunables::default().with_overrides(&overrides);
        assert_eq!(t.ship_thrust, Tunables::default().ship_thrust);
        assert_eq!(t.ship_max_speed, Tunables::default().ship_max_speed);
        assert_eq!(t.burst_speed, 500.0);
    }

    #[test]
    fn test_world_size_sanitized() {
        let w = WorldSize::new(f64::INFINITY, 10.0);
        assert_eq!(w.width, WorldSize::default().width);
        assert_eq!(w.height, WorldSize::MIN_EXTENT);
    }

    #[test]
    fn test_fracture_children_shrink() {
        assert_eq!(AsteroidSize::Large.child(), Some(AsteroidSize::Med));
        assert_eq!(AsteroidSize::Med.child(), None);
        for size in AsteroidSize::ALL {
            if let Some(child) = size.child() {
                assert!(child < size);
            }
        }
    }
}
