//! Authoritative simulation engine
//!
//! One [`SimulationEngine`] owns the whole world and advances it with
//! [`SimulationEngine::update`]. Given the same seed and the same ordered
//! per-tick inputs, two engines serialize to identical text. Every collection
//! that is iterated in an order-sensitive way is a `BTreeMap` keyed by id, and
//! adding a player never draws from the gameplay RNG.

use serde::Serialize;
use std::collections::BTreeMap;

use super::entities::{
    Asteroid, EntityId, Gem, GemKind, Laser, PlayerId, Ping, Saucer, Ship, ShipPose, TechPart,
    ViewRect, GEM_RADIUS,
};
use super::math::{angle_to_vec, wrap_angle, Vec2};
use super::physics::{step_ship, wrap_position};
use super::rng::{fnv1a, RngStreams};
use super::round::RoundState;
use super::snapshot::Snapshot;
use super::tuning::{AsteroidSize, ShipTier, Tunables, WorldSize};
use super::InputSample;

/// Largest step a single `update` will simulate
pub const MAX_STEP_SECONDS: f64 = 0.1;

/// Construction parameters for an engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub seed: u32,
    pub world: WorldSize,
    pub tunables: Tunables,
}

impl EngineOptions {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            world: WorldSize::default(),
            tunables: Tunables::default(),
        }
    }

    pub fn with_world(mut self, world: WorldSize) -> Self {
        self.world = world;
        self
    }

    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Result of fracturing one asteroid
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FractureResult {
    pub children: Vec<EntityId>,
    pub gems: Vec<EntityId>,
}

/// The authoritative world
pub struct SimulationEngine {
    pub(super) seed: u32,
    pub(super) world: WorldSize,
    pub(super) tunables: Tunables,
    pub(super) rng: RngStreams,
    pub(super) tick: u64,
    pub(super) sim_time_ms: f64,
    pub(super) ships: BTreeMap<PlayerId, Ship>,
    pub(super) asteroids: BTreeMap<EntityId, Asteroid>,
    pub(super) gems: BTreeMap<EntityId, Gem>,
    pub(super) saucer: Option<Saucer>,
    pub(super) saucer_timer: f64,
    pub(super) lasers: BTreeMap<EntityId, Laser>,
    pub(super) parts: BTreeMap<EntityId, TechPart>,
    pub(super) pings: Vec<Ping>,
    pub(super) round: RoundState,
    pub(super) spawn_timer: f64,
    next_id: EntityId,
}

impl SimulationEngine {
    pub fn new(options: EngineOptions) -> Self {
        let world = WorldSize::new(options.world.width, options.world.height);
        let round = RoundState::new(&world, &options.tunables);
        let mut engine = Self {
            seed: options.seed,
            world,
            tunables: options.tunables,
            rng: RngStreams::new(options.seed),
            tick: 0,
            sim_time_ms: 0.0,
            ships: BTreeMap::new(),
            asteroids: BTreeMap::new(),
            gems: BTreeMap::new(),
            saucer: None,
            saucer_timer: 0.0,
            lasers: BTreeMap::new(),
            parts: BTreeMap::new(),
            pings: Vec::new(),
            round,
            spawn_timer: 0.0,
            next_id: 1,
        };
        engine.populate_round();
        engine
    }

    /// Build the per-round world: tech parts, initial field, saucer timer
    fn populate_round(&mut self) {
        if self.tunables.round_enabled {
            self.setup_round_parts();
        }
        if self.tunables.population_enabled {
            self.seed_field();
        }
        self.saucer_timer = self.tunables.saucer_interval_sec;
        self.spawn_timer = self.tunables.spawn_interval_normal_sec;
    }

    pub(super) fn alloc_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn sim_time_ms(&self) -> f64 {
        self.sim_time_ms
    }

    pub fn world(&self) -> &WorldSize {
        &self.world
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn ship(&self, id: &str) -> Option<&Ship> {
        self.ships.get(id)
    }

    pub fn ships(&self) -> impl Iterator<Item = &Ship> {
        self.ships.values()
    }

    pub fn asteroid(&self, id: EntityId) -> Option<&Asteroid> {
        self.asteroids.get(&id)
    }

    pub fn asteroids(&self) -> impl Iterator<Item = &Asteroid> {
        self.asteroids.values()
    }

    pub fn asteroid_count(&self) -> usize {
        self.asteroids.len()
    }

    pub fn gems(&self) -> impl Iterator<Item = &Gem> {
        self.gems.values()
    }

    pub fn saucer(&self) -> Option<&Saucer> {
        self.saucer.as_ref()
    }

    pub fn lasers(&self) -> impl Iterator<Item = &Laser> {
        self.lasers.values()
    }

    pub fn parts(&self) -> impl Iterator<Item = &TechPart> {
        self.parts.values()
    }

    pub fn part(&self, id: EntityId) -> Option<&TechPart> {
        self.parts.get(&id)
    }

    pub fn pings(&self) -> &[Ping] {
        &self.pings
    }

    pub fn is_terminal(&self) -> bool {
        self.round.is_terminal()
    }

    // ------------------------------------------------------------------
    // Players and input
    // ------------------------------------------------------------------

    /// Deterministic spawn point derived from the player id, never from the
    /// gameplay RNG, so registration order cannot change the world.
    fn spawn_point(&self, id: &str) -> Vec2 {
        let half = self.world.half_extents();
        let hash = fnv1a(id) ^ self.seed;
        let fy = (hash % 10_000) as f64 / 10_000.0;
        let radius = ShipTier::Large.stats().radius;
        let x = (self.round.star_x + self.tunables.respawn_margin + 200.0)
            .min(half.x - radius);
        let y = (fy - 0.5) * half.y * 1.2;
        Vec2::new(x, y)
    }

    /// Register a player. Returns false if the id is already present.
    pub fn add_player(&mut self, id: &str) -> bool {
        if self.ships.contains_key(id) {
            return false;
        }
        let pos = self.spawn_point(id);
        let pose = ShipPose::new(id, pos, 0.0, ShipTier::Small);
        self.ships.insert(id.to_string(), Ship::new(pose));
        true
    }

    /// Remove a player, releasing its orbit and dropping any carried part
    pub fn remove_player(&mut self, id: &str) -> bool {
        let Some(ship) = self.ships.remove(id) else {
            return false;
        };
        self.release_attachments(id);
        if let Some(part_id) = ship.carried_part {
            if let Some(part) = self.parts.get_mut(&part_id) {
                part.drop_at(ship.pose.pos);
            }
        }
        true
    }

    /// Latch the newest input for a player. Unknown ids are ignored.
    pub fn set_input(&mut self, id: &str, input: &InputSample) {
        if let Some(ship) = self.ships.get_mut(id) {
            ship.input.latch(input);
        }
    }

    pub fn set_view(&mut self, id: &str, view: ViewRect) {
        if let Some(ship) = self.ships.get_mut(id) {
            ship.view = Some(view.sanitized());
        }
    }

    /// Force a ship tier (scenario setup). Ignored once the round is over.
    pub fn set_ship_tier(&mut self, id: &str, tier: ShipTier) {
        if self.is_terminal() {
            return;
        }
        if let Some(ship) = self.ships.get_mut(id) {
            ship.pose.set_tier(tier);
        }
    }

    /// Teleport a ship (scenario setup). Ignored once the round is over.
    pub fn place_ship(&mut self, id: &str, pos: Vec2, angle: f64) {
        if self.is_terminal() || !pos.is_finite() {
            return;
        }
        if let Some(ship) = self.ships.get_mut(id) {
            ship.pose.pos = pos;
            ship.pose.vel = Vec2::ZERO;
            ship.pose.angle = wrap_angle(angle);
        }
        self.refresh_attachments(0.0);
    }

    // ------------------------------------------------------------------
    // Asteroids
    // ------------------------------------------------------------------

    /// Spawn a free asteroid. Returns `None` once the round is over.
    pub fn spawn_asteroid(&mut self, size: AsteroidSize, pos: Vec2, vel: Vec2) -> Option<EntityId> {
        if self.is_terminal() || !pos.is_finite() || !vel.is_finite() {
            return None;
        }
        Some(self.insert_asteroid(size, pos, vel, 0.0))
    }

    pub(super) fn insert_asteroid(
        &mut self,
        size: AsteroidSize,
        pos: Vec2,
        vel: Vec2,
        rot_vel: f64,
    ) -> EntityId {
        let id = self.alloc_id();
        self.asteroids
            .insert(id, Asteroid::new(id, size, pos, vel, rot_vel));
        id
    }

    /// Constrain an asteroid to a ship's ring at its current bearing
    pub fn attach_asteroid(&mut self, asteroid_id: EntityId, player_id: &str) -> bool {
        if self.is_terminal() {
            return false;
        }
        let Some(pose) = self.ships.get(player_id).map(|s| s.pose.clone()) else {
            return false;
        };
        let Some(asteroid) = self.asteroids.get_mut(&asteroid_id) else {
            return false;
        };
        attach(asteroid, &pose, self.tunables.ring_gap);
        true
    }

    /// Ring radius for an asteroid orbiting a ship
    pub fn ring_radius(&self, ship_radius: f64, asteroid_radius: f64) -> f64 {
        ring_radius(ship_radius, asteroid_radius, self.tunables.ring_gap)
    }

    /// Where an attached asteroid must be, given its owner's pose
    pub fn attachment_position(&self, owner: &ShipPose, asteroid: &Asteroid) -> Vec2 {
        attachment_position(owner, asteroid, self.tunables.ring_gap)
    }

    /// Velocity an asteroid actually moves with (the owner's while attached)
    pub(super) fn effective_velocity(&self, asteroid: &Asteroid) -> Vec2 {
        asteroid
            .attached_to
            .as_ref()
            .and_then(|owner| self.ships.get(owner))
            .map(|s| s.pose.vel)
            .unwrap_or(asteroid.vel)
    }

    pub(super) fn release_attachments(&mut self, owner: &str) {
        let owner_vel = self.ships.get(owner).map(|s| s.pose.vel).unwrap_or(Vec2::ZERO);
        for asteroid in self.asteroids.values_mut() {
            if asteroid.attached_to.as_deref() == Some(owner) {
                asteroid.attached_to = None;
                asteroid.vel = owner_vel;
            }
        }
    }

    /// Re-derive every attached asteroid's position from its owner. Orbits
    /// advance by `spin_dt`; orphaned attachments are released.
    pub(super) fn refresh_attachments(&mut self, spin_dt: f64) {
        let gap = self.tunables.ring_gap;
        let spin = self.tunables.orbit_spin_rate * spin_dt;
        for asteroid in self.asteroids.values_mut() {
            let Some(owner) = asteroid.attached_to.as_ref() else {
                continue;
            };
            match self.ships.get(owner) {
                Some(ship) => {
                    asteroid.orbit_angle = wrap_angle(asteroid.orbit_angle + spin);
                    asteroid.pos = attachment_position(&ship.pose, asteroid, gap);
                    asteroid.vel = Vec2::ZERO;
                }
                None => asteroid.attached_to = None,
            }
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the world by one fixed step.
    ///
    /// Non-finite or non-positive `dt` is ignored; larger steps are clamped to
    /// [`MAX_STEP_SECONDS`]. Once the round has an outcome only the tick
    /// counter and sim clock advance, and latched inputs are acknowledged
    /// without moving anything.
    pub fn update(&mut self, dt: f64) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let dt = dt.min(MAX_STEP_SECONDS);
        self.tick += 1;
        self.sim_time_ms += dt * 1000.0;

        if self.round.is_terminal() {
            for ship in self.ships.values_mut() {
                ship.last_input_seq = ship.input.seq;
                ship.input.clear_momentary();
            }
            return;
        }

        self.step_ships(dt);
        self.handle_bursts();
        self.handle_pings();
        self.apply_gravity(dt);
        self.integrate_free_bodies(dt);
        self.refresh_attachments(dt);
        self.resolve_collisions();
        self.update_gems(dt);
        self.update_hostiles(dt);
        self.update_round(dt);
        self.update_population(dt);
        self.refresh_attachments(0.0);
        self.age_pings(dt);

        for ship in self.ships.values_mut() {
            ship.input.clear_momentary();
        }
    }

    fn step_ships(&mut self, dt: f64) {
        let half = self.world.half_extents();
        for ship in self.ships.values_mut() {
            ship.last_input_seq = ship.input.seq;
            step_ship(&mut ship.pose, &ship.input, &self.tunables, half, dt);

            ship.exhaust = if ship.input.thrust_axis() > 0.0 {
                0.7 + 0.3 * self.rng.exhaust.next_f64()
            } else {
                0.0
            };
            ship.burst_cooldown = (ship.burst_cooldown - dt).max(0.0);
            ship.ping_cooldown = (ship.ping_cooldown - dt).max(0.0);
        }
    }

    fn integrate_free_bodies(&mut self, dt: f64) {
        let half = self.world.half_extents();
        for asteroid in self.asteroids.values_mut() {
            asteroid.rot = wrap_angle(asteroid.rot + asteroid.rot_vel * dt);
            asteroid.fracture_cooldown = (asteroid.fracture_cooldown - dt).max(0.0);
            if asteroid.launch_timer > 0.0 {
                asteroid.launch_timer = (asteroid.launch_timer - dt).max(0.0);
                if asteroid.launch_timer == 0.0 {
                    asteroid.ship_launched = false;
                }
            }
            if asteroid.is_attached() {
                continue;
            }
            asteroid.pos = wrap_position(asteroid.pos + asteroid.vel * dt, half);
        }
    }

    fn update_gems(&mut self, dt: f64) {
        let half = self.world.half_extents();
        let drag = (-self.tunables.gem_drag * dt).exp();
        self.gems.retain(|_, gem| {
            gem.age_sec += dt;
            gem.vel = gem.vel * drag;
            gem.pos = wrap_position(gem.pos + gem.vel * dt, half);
            gem.age_sec < gem.ttl_sec
        });

        let margin = self.tunables.gem_pickup_margin;
        let mut collected: Vec<(EntityId, PlayerId)> = Vec::new();
        for gem in self.gems.values() {
            let picker = self.ships.values().find(|ship| {
                let reach = ship.pose.radius + gem.radius + margin;
                ship.pose.pos.distance_sq(gem.pos) <= reach * reach
            });
            if let Some(ship) = picker {
                collected.push((gem.id, ship.id().to_string()));
            }
        }
        for (gem_id, player_id) in collected {
            let Some(gem) = self.gems.remove(&gem_id) else {
                continue;
            };
            if let Some(ship) = self.ships.get_mut(&player_id) {
                ship.gem_score += gem.kind.value();
                let earned = ShipTier::for_gem_score(ship.gem_score);
                if earned > ship.pose.tier {
                    ship.pose.set_tier(earned);
                    tracing::debug!(player_id = %player_id, tier = ?earned, "Ship tier upgraded");
                }
            }
        }
    }

    pub(super) fn spawn_gem(&mut self, kind: GemKind, pos: Vec2, vel: Vec2) -> EntityId {
        let id = self.alloc_id();
        self.gems.insert(
            id,
            Gem {
                id,
                kind,
                pos,
                vel,
                radius: GEM_RADIUS,
                age_sec: 0.0,
                ttl_sec: self.tunables.gem_ttl_sec,
            },
        );
        id
    }

    pub(super) fn random_gem_kind(&mut self) -> GemKind {
        GemKind::ALL[self.rng.gameplay.weighted(&GemKind::WEIGHTS)]
    }

    fn age_pings(&mut self, dt: f64) {
        let ttl = self.tunables.ping_ttl_sec;
        self.pings.retain_mut(|ping| {
            ping.age_sec += dt;
            ping.age_sec < ttl
        });
    }

    // ------------------------------------------------------------------
    // Reset and reseed
    // ------------------------------------------------------------------

    /// Start a fresh round: world contents are rebuilt, players keep their
    /// ids but return to small ships at their spawn points.
    pub fn reset_round(&mut self) {
        self.asteroids.clear();
        self.gems.clear();
        self.saucer = None;
        self.lasers.clear();
        self.parts.clear();
        self.pings.clear();
        self.round = RoundState::new(&self.world, &self.tunables);

        let ids: Vec<PlayerId> = self.ships.keys().cloned().collect();
        for id in ids {
            let pos = self.spawn_point(&id);
            if let Some(ship) = self.ships.get_mut(&id) {
                let view = ship.view;
                *ship = Ship::new(ShipPose::new(id.as_str(), pos, 0.0, ShipTier::Small));
                ship.view = view;
            }
        }

        self.populate_round();
        tracing::info!(seed = self.seed, tick = self.tick, "Round reset");
    }

    /// Replace all random streams
    pub fn reseed(&mut self, seed: u32) {
        self.seed = seed;
        self.rng.reseed(seed);
    }

    /// Restart the starfield stream; gameplay draws are unaffected
    pub fn reseed_starfield(&mut self, seed: u32) {
        self.rng.reseed_starfield(seed);
    }

    /// Restart the exhaust flicker stream; gameplay draws are unaffected
    pub fn reseed_exhaust(&mut self, seed: u32) {
        self.rng.reseed_exhaust(seed);
    }

    /// Background star positions for renderers (starfield stream only)
    pub fn starfield(&mut self, count: usize) -> Vec<Vec2> {
        let half = self.world.half_extents();
        (0..count)
            .map(|_| {
                Vec2::new(
                    self.rng.starfield.range(-half.x, half.x),
                    self.rng.starfield.range(-half.y, half.y),
                )
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------

    /// Full-world snapshot, or one scoped to a viewport
    pub fn snapshot(&self, view: Option<&ViewRect>) -> Snapshot {
        Snapshot::capture(self, view)
    }

    /// Canonical serialized state. Byte-identical across engines that saw
    /// the same seed and input timeline.
    pub fn render_game_to_text(&self) -> String {
        let text = TextState {
            seed: self.seed,
            world: self.world,
            rng: &self.rng,
            spawn_timer: self.spawn_timer,
            saucer_timer: self.saucer_timer,
            ships: self
                .ships
                .values()
                .map(|s| ShipDetail {
                    id: s.id(),
                    gem_score: s.gem_score,
                    burst_cooldown: s.burst_cooldown,
                    ping_cooldown: s.ping_cooldown,
                    exhaust: s.exhaust,
                    respawns: s.respawns,
                })
                .collect(),
            asteroid_timers: self
                .asteroids
                .values()
                .map(|a| (a.id, a.launch_timer, a.fracture_cooldown))
                .collect(),
            state: self.snapshot(None),
        };
        serde_json::to_string(&text).unwrap_or_default()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextState<'a> {
    seed: u32,
    world: WorldSize,
    rng: &'a RngStreams,
    spawn_timer: f64,
    saucer_timer: f64,
    ships: Vec<ShipDetail<'a>>,
    asteroid_timers: Vec<(EntityId, f64, f64)>,
    state: Snapshot,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShipDetail<'a> {
    id: &'a str,
    gem_score: u32,
    burst_cooldown: f64,
    ping_cooldown: f64,
    exhaust: f64,
    respawns: u32,
}

pub(super) fn ring_radius(ship_radius: f64, asteroid_radius: f64, gap: f64) -> f64 {
    ship_radius + asteroid_radius + gap
}

pub(super) fn attachment_position(owner: &ShipPose, asteroid: &Asteroid, gap: f64) -> Vec2 {
    owner.pos
        + angle_to_vec(owner.angle + asteroid.orbit_angle)
            * ring_radius(owner.radius, asteroid.radius, gap)
}

/// Turn a free asteroid into a ring member at its current bearing
pub(super) fn attach(asteroid: &mut Asteroid, owner: &ShipPose, gap: f64) {
    let bearing = (asteroid.pos - owner.pos).angle();
    asteroid.attached_to = Some(owner.owner_id.clone());
    asteroid.orbit_angle = wrap_angle(bearing - owner.angle);
    asteroid.vel = Vec2::ZERO;
    asteroid.ship_launched = false;
    asteroid.launch_timer = 0.0;
    asteroid.pos = attachment_position(owner, asteroid, gap);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_tunables() -> Tunables {
        Tunables {
            population_enabled: false,
            saucer_enabled: false,
            round_enabled: false,
            ..Tunables::default()
        }
    }

    fn quiet_engine() -> SimulationEngine {
        SimulationEngine::new(EngineOptions::new(11).with_tunables(quiet_tunables()))
    }

    #[test]
    fn test_update_ignores_bad_dt() {
        let mut engine = quiet_engine();
        engine.update(0.0);
        engine.update(-1.0);
        engine.update(f64::NAN);
        assert_eq!(engine.tick(), 0);
        engine.update(5.0);
        assert_eq!(engine.tick(), 1);
        assert!((engine.sim_time_ms() - MAX_STEP_SECONDS * 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_add_player_twice_rejected() {
        let mut engine = quiet_engine();
        assert!(engine.add_player("p1"));
        assert!(!engine.add_player("p1"));
        assert_eq!(engine.ships().count(), 1);
    }

    #[test]
    fn test_attached_asteroid_follows_owner() {
        let mut engine = quiet_engine();
        engine.add_player("p1");
        engine.place_ship("p1", Vec2::ZERO, 0.0);
        let id = engine
            .spawn_asteroid(AsteroidSize::Small, Vec2::new(42.0, 0.0), Vec2::ZERO)
            .unwrap();
        assert!(engine.attach_asteroid(id, "p1"));

        let input = InputSample { seq: 1, up: true, left: true, ..Default::default() };
        for _ in 0..60 {
            engine.set_input("p1", &input);
            engine.update(1.0 / 60.0);
            let ship = engine.ship("p1").unwrap();
            let asteroid = engine.asteroid(id).unwrap();
            assert_eq!(asteroid.vel, Vec2::ZERO);
            let expected = engine.attachment_position(&ship.pose, asteroid);
            assert!(asteroid.pos.distance(expected) < 1e-9);
        }
    }

    #[test]
    fn test_remove_player_releases_ring() {
        let mut engine = quiet_engine();
        engine.add_player("p1");
        let pos = engine.ship("p1").unwrap().pose.pos + Vec2::new(42.0, 0.0);
        let id = engine.spawn_asteroid(AsteroidSize::Small, pos, Vec2::ZERO).unwrap();
        engine.attach_asteroid(id, "p1");
        engine.remove_player("p1");
        assert!(engine.asteroid(id).unwrap().attached_to.is_none());
    }

    #[test]
    fn test_gem_pickup_upgrades_tier() {
        let mut engine = quiet_engine();
        engine.add_player("p1");
        let pos = engine.ship("p1").unwrap().pose.pos;
        for _ in 0..2 {
            engine.spawn_gem(GemKind::Diamond, pos, Vec2::ZERO);
        }
        engine.update(1.0 / 60.0);
        let ship = engine.ship("p1").unwrap();
        assert_eq!(ship.gem_score, 10);
        assert_eq!(ship.pose.tier, ShipTier::Medium);
        assert_eq!(ship.pose.radius, ShipTier::Medium.stats().radius);
    }

    #[test]
    fn test_starfield_does_not_touch_gameplay_rng() {
        let mut engine = quiet_engine();
        let before = engine.rng.gameplay.clone();
        let stars = engine.starfield(16);
        assert_eq!(stars.len(), 16);
        assert_eq!(engine.rng.gameplay, before);
    }
}
