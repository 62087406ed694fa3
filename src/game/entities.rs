//! Authoritative world entities

use serde::{Deserialize, Serialize};

use super::math::{finite_or, Vec2};
use super::tuning::{AsteroidSize, ShipTier};
use super::InputSample;

pub type PlayerId = String;
pub type EntityId = u32;

/// The part of a ship that KinematicsStep reads and writes.
///
/// `radius` and `mass` are derived from `tier`; change them only through
/// [`ShipPose::set_tier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipPose {
    pub owner_id: PlayerId,
    pub pos: Vec2,
    pub vel: Vec2,
    pub angle: f64,
    pub radius: f64,
    pub mass: f64,
    pub tier: ShipTier,
}

impl ShipPose {
    pub fn new(owner_id: impl Into<PlayerId>, pos: Vec2, angle: f64, tier: ShipTier) -> Self {
        let stats = tier.stats();
        Self {
            owner_id: owner_id.into(),
            pos,
            vel: Vec2::ZERO,
            angle,
            radius: stats.radius,
            mass: stats.mass,
            tier,
        }
    }

    pub fn set_tier(&mut self, tier: ShipTier) {
        let stats = tier.stats();
        self.tier = tier;
        self.radius = stats.radius;
        self.mass = stats.mass;
    }
}

/// A player's ship plus the per-player bookkeeping the engine needs
#[derive(Debug, Clone)]
pub struct Ship {
    pub pose: ShipPose,
    /// Latched input for the next tick
    pub input: InputSample,
    /// Sequence number of the input consumed by the most recent tick
    pub last_input_seq: u32,
    pub gem_score: u32,
    pub burst_cooldown: f64,
    pub ping_cooldown: f64,
    pub carried_part: Option<EntityId>,
    /// Client-reported viewport, if any
    pub view: Option<ViewRect>,
    /// Cosmetic flame intensity while thrusting
    pub exhaust: f64,
    pub respawns: u32,
}

impl Ship {
    pub fn new(pose: ShipPose) -> Self {
        Self {
            pose,
            input: InputSample::default(),
            last_input_seq: 0,
            gem_score: 0,
            burst_cooldown: 0.0,
            ping_cooldown: 0.0,
            carried_part: None,
            view: None,
            exhaust: 0.0,
            respawns: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.pose.owner_id
    }

    /// Viewport used for spawn avoidance and interest management
    pub fn effective_view(&self, default_half: Vec2) -> ViewRect {
        self.view.unwrap_or(ViewRect {
            cx: self.pose.pos.x,
            cy: self.pose.pos.y,
            half_w: default_half.x,
            half_h: default_half.y,
            margin: 0.0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Asteroid {
    pub id: EntityId,
    pub size: AsteroidSize,
    pub pos: Vec2,
    /// Always zero while attached; the effective velocity is the owner's
    pub vel: Vec2,
    pub radius: f64,
    pub mass: f64,
    pub rot: f64,
    pub rot_vel: f64,
    pub attached_to: Option<PlayerId>,
    /// Orbit slot relative to the owner's heading
    pub orbit_angle: f64,
    pub ship_launched: bool,
    /// Remaining seconds during which a launched asteroid cannot be recaptured
    pub launch_timer: f64,
    pub fracture_cooldown: f64,
}

impl Asteroid {
    pub fn new(id: EntityId, size: AsteroidSize, pos: Vec2, vel: Vec2, rot_vel: f64) -> Self {
        let stats = size.stats();
        Self {
            id,
            size,
            pos,
            vel,
            radius: stats.radius,
            mass: stats.mass,
            rot: 0.0,
            rot_vel,
            attached_to: None,
            orbit_angle: 0.0,
            ship_launched: false,
            launch_timer: 0.0,
            fracture_cooldown: 0.0,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached_to.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GemKind {
    Diamond,
    Ruby,
    Emerald,
    Gold,
}

impl GemKind {
    pub const ALL: [GemKind; 4] = [GemKind::Diamond, GemKind::Ruby, GemKind::Emerald, GemKind::Gold];
    pub const WEIGHTS: [f64; 4] = [0.1, 0.2, 0.3, 0.4];

    pub fn value(self) -> u32 {
        match self {
            GemKind::Diamond => 5,
            GemKind::Ruby => 3,
            GemKind::Emerald => 2,
            GemKind::Gold => 1,
        }
    }
}

pub const GEM_RADIUS: f64 = 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Gem {
    pub id: EntityId,
    pub kind: GemKind,
    pub pos: Vec2,
    pub vel: Vec2,
    pub radius: f64,
    pub age_sec: f64,
    pub ttl_sec: f64,
}

pub const SAUCER_RADIUS: f64 = 22.0;
pub const LASER_RADIUS: f64 = 4.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Saucer {
    pub id: EntityId,
    pub pos: Vec2,
    pub vel: Vec2,
    pub radius: f64,
    pub fire_timer: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Laser {
    pub id: EntityId,
    pub pos: Vec2,
    pub vel: Vec2,
    pub radius: f64,
    pub age_sec: f64,
    pub ttl_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartState {
    InAsteroid,
    Dropped,
    Carried,
    Installed,
    Lost,
}

/// Jump-gate component.
///
/// `container_asteroid_id` is set iff `state == InAsteroid`, and
/// `carrier_player_id` iff `state == Carried`. Transitions go through the
/// methods below so the two never disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct TechPart {
    pub id: EntityId,
    pub state: PartState,
    pub pos: Vec2,
    pub container_asteroid_id: Option<EntityId>,
    pub carrier_player_id: Option<PlayerId>,
    pub slot: Option<usize>,
}

impl TechPart {
    pub fn in_asteroid(id: EntityId, container: EntityId, pos: Vec2) -> Self {
        Self {
            id,
            state: PartState::InAsteroid,
            pos,
            container_asteroid_id: Some(container),
            carrier_player_id: None,
            slot: None,
        }
    }

    pub fn drop_at(&mut self, pos: Vec2) {
        if self.is_final() {
            return;
        }
        self.state = PartState::Dropped;
        self.pos = pos;
        self.container_asteroid_id = None;
        self.carrier_player_id = None;
    }

    pub fn carry(&mut self, player_id: &str) {
        if self.state != PartState::Dropped {
            return;
        }
        self.state = PartState::Carried;
        self.carrier_player_id = Some(player_id.to_string());
    }

    pub fn install(&mut self, slot: usize, gate_pos: Vec2) {
        if self.state != PartState::Carried {
            return;
        }
        self.state = PartState::Installed;
        self.slot = Some(slot);
        self.pos = gate_pos;
        self.carrier_player_id = None;
    }

    pub fn lose(&mut self) {
        if self.is_final() {
            return;
        }
        self.state = PartState::Lost;
        self.container_asteroid_id = None;
        self.carrier_player_id = None;
    }

    /// Installed and lost parts never change again
    pub fn is_final(&self) -> bool {
        matches!(self.state, PartState::Installed | PartState::Lost)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    pub owner_id: PlayerId,
    pub pos: Vec2,
    pub age_sec: f64,
}

/// Client-reported viewport, used for interest management and spawn placement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRect {
    pub cx: f64,
    pub cy: f64,
    pub half_w: f64,
    pub half_h: f64,
    #[serde(default)]
    pub margin: f64,
}

impl ViewRect {
    pub const MAX_HALF_EXTENT: f64 = 5_000.0;

    /// Coerce garbage from the network into a usable rect
    pub fn sanitized(self) -> Self {
        Self {
            cx: finite_or(self.cx, 0.0),
            cy: finite_or(self.cy, 0.0),
            half_w: finite_or(self.half_w, 640.0).clamp(1.0, Self::MAX_HALF_EXTENT),
            half_h: finite_or(self.half_h, 400.0).clamp(1.0, Self::MAX_HALF_EXTENT),
            margin: finite_or(self.margin, 0.0).clamp(0.0, Self::MAX_HALF_EXTENT),
        }
    }

    /// Whether a circle at `pos` with radius `pad` touches the rect plus margin
    pub fn contains(&self, pos: Vec2, pad: f64) -> bool {
        let reach_x = self.half_w + self.margin + pad;
        let reach_y = self.half_h + self.margin + pad;
        (pos.x - self.cx).abs() <= reach_x && (pos.y - self.cy).abs() <= reach_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_state_machine_keeps_refs_consistent() {
        let mut part = TechPart::in_asteroid(1, 9, Vec2::ZERO);
        assert_eq!(part.container_asteroid_id, Some(9));

        part.carry("p1");
        assert_eq!(part.state, PartState::InAsteroid, "cannot carry from inside an asteroid");

        part.drop_at(Vec2::new(5.0, 5.0));
        assert_eq!(part.state, PartState::Dropped);
        assert!(part.container_asteroid_id.is_none());

        part.carry("p1");
        assert_eq!(part.carrier_player_id.as_deref(), Some("p1"));

        part.install(0, Vec2::new(100.0, 0.0));
        assert_eq!(part.state, PartState::Installed);
        assert!(part.carrier_player_id.is_none());

        part.lose();
        assert_eq!(part.state, PartState::Installed, "installed is final");
    }

    #[test]
    fn test_view_rect_contains_with_margin() {
        let rect = ViewRect { cx: 0.0, cy: 0.0, half_w: 100.0, half_h: 50.0, margin: 10.0 };
        assert!(rect.contains(Vec2::new(105.0, 0.0), 0.0));
        assert!(!rect.contains(Vec2::new(120.0, 0.0), 0.0));
        assert!(rect.contains(Vec2::new(120.0, 0.0), 15.0));
    }

    #[test]
    fn test_set_tier_derives_radius_and_mass() {
        let mut pose = ShipPose::new("p", Vec2::ZERO, 0.0, ShipTier::Small);
        pose.set_tier(ShipTier::Large);
        assert_eq!(pose.radius, ShipTier::Large.stats().radius);
        assert_eq!(pose.mass, ShipTier::Large.stats().mass);
    }
}
