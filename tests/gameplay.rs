mod support;

use orbitfall::game::engine::{EngineOptions, SimulationEngine};
use orbitfall::game::math::Vec2;
use orbitfall::game::tuning::AsteroidSize;
use orbitfall::game::{InputSample, RoundOutcome, ShipTier, Tunables};
use support::{quiet_engine, quiet_tunables, step, DT};

#[test]
fn fracture_large_yields_two_med_children() {
    let mut engine = quiet_engine(1);
    let id = engine
        .spawn_asteroid(AsteroidSize::Large, Vec2::new(300.0, 300.0), Vec2::ZERO)
        .unwrap();
    let result = engine.fracture(id, Vec2::new(1.0, 0.0)).unwrap();

    assert_eq!(result.children.len(), 2);
    assert!(result.gems.is_empty());
    assert!(engine.asteroid(id).is_none());
    for child in &result.children {
        assert_eq!(engine.asteroid(*child).unwrap().size, AsteroidSize::Med);
    }
}

#[test]
fn fracture_med_yields_two_gems_and_small_just_vanishes() {
    let mut engine = quiet_engine(2);
    let med = engine
        .spawn_asteroid(AsteroidSize::Med, Vec2::new(300.0, 300.0), Vec2::ZERO)
        .unwrap();
    let result = engine.fracture(med, Vec2::new(0.0, 1.0)).unwrap();
    assert!(result.children.is_empty());
    assert_eq!(result.gems.len(), 2);
    assert_eq!(engine.gems().count(), 2);

    let small = engine
        .spawn_asteroid(AsteroidSize::Small, Vec2::new(-300.0, 300.0), Vec2::ZERO)
        .unwrap();
    let before = engine.asteroid_count();
    let result = engine.fracture(small, Vec2::new(0.0, 1.0)).unwrap();
    assert!(result.children.is_empty());
    assert!(result.gems.is_empty());
    assert_eq!(engine.asteroid_count(), before - 1);
}

#[test]
fn attached_asteroids_follow_the_constraint_every_tick() {
    let mut engine = quiet_engine(3);
    engine.add_player("pilot");
    engine.place_ship("pilot", Vec2::ZERO, 0.3);
    let ids: Vec<_> = [0.0, 2.0, 4.0]
        .iter()
        .filter_map(|angle: &f64| {
            let pos = Vec2::new(angle.cos(), angle.sin()) * 60.0;
            engine.spawn_asteroid(AsteroidSize::Small, pos, Vec2::ZERO)
        })
        .collect();
    for id in &ids {
        assert!(engine.attach_asteroid(*id, "pilot"));
    }

    for tick in 0..240u32 {
        engine.set_input(
            "pilot",
            &InputSample {
                seq: tick + 1,
                up: tick % 3 != 0,
                left: tick % 50 < 20,
                ..Default::default()
            },
        );
        engine.update(DT);

        let owner = engine.ship("pilot").unwrap().pose.clone();
        for id in &ids {
            let asteroid = engine.asteroid(*id).unwrap();
            assert_eq!(asteroid.attached_to.as_deref(), Some("pilot"));
            assert_eq!(asteroid.vel, Vec2::ZERO);
            let expected = engine.attachment_position(&owner, asteroid);
            assert!(asteroid.pos.distance(expected) < 1e-9, "tick {tick}");
        }
    }
}

fn launch_speed(tier: ShipTier) -> f64 {
    let mut engine = quiet_engine(4);
    engine.add_player("p");
    engine.set_ship_tier("p", tier);
    engine.place_ship("p", Vec2::ZERO, 0.0);
    let id = engine
        .spawn_asteroid(AsteroidSize::Small, Vec2::new(0.0, 80.0), Vec2::ZERO)
        .unwrap();
    assert!(engine.attach_asteroid(id, "p"));

    engine.set_input("p", &InputSample { seq: 1, burst: true, ..Default::default() });
    engine.update(DT);

    let asteroid = engine.asteroid(id).unwrap();
    assert!(asteroid.attached_to.is_none());
    assert!(asteroid.ship_launched);
    asteroid.vel.length()
}

#[test]
fn burst_launch_speed_scales_with_tier() {
    let small = launch_speed(ShipTier::Small);
    let medium = launch_speed(ShipTier::Medium);
    let large = launch_speed(ShipTier::Large);
    assert!(small > 0.0);
    assert!(medium > small);
    assert!(large > medium);
}

fn tie_break_engine(order: [&str; 2]) -> (SimulationEngine, u32) {
    let mut engine = quiet_engine(5);
    for id in order {
        engine.add_player(id);
    }
    engine.place_ship("alice", Vec2::new(-100.0, 0.0), 0.0);
    engine.place_ship("bob", Vec2::new(100.0, 0.0), 0.0);
    let id = engine
        .spawn_asteroid(AsteroidSize::Small, Vec2::ZERO, Vec2::ZERO)
        .unwrap();
    (engine, id)
}

#[test]
fn equidistant_pull_goes_to_smaller_player_id() {
    for order in [["alice", "bob"], ["bob", "alice"]] {
        let (mut engine, id) = tie_break_engine(order);

        engine.update(DT);
        let first = engine.asteroid(id).unwrap();
        assert!(first.vel.x < 0.0, "pulled toward alice");

        let mut owner = None;
        for _ in 0..300 {
            engine.update(DT);
            if let Some(by) = engine.asteroid(id).and_then(|a| a.attached_to.clone()) {
                owner = Some(by);
                break;
            }
        }
        assert_eq!(owner.as_deref(), Some("alice"));
    }
}

#[test]
fn round_outcome_freezes_the_world() {
    let tunables = Tunables {
        round_duration_sec: 2.0,
        saucer_enabled: false,
        ..Tunables::default()
    };
    let mut engine = SimulationEngine::new(EngineOptions::new(6).with_tunables(tunables));
    engine.add_player("p");

    let mut ticks = 0;
    while !engine.is_terminal() && ticks < 600 {
        engine.update(DT);
        ticks += 1;
    }
    assert_eq!(engine.round().outcome, Some(RoundOutcome::Lose));

    let star = engine.round().star_x;
    let ids: Vec<_> = engine.asteroids().map(|a| a.id).collect();
    step(&mut engine, 120);

    assert_eq!(engine.round().outcome, Some(RoundOutcome::Lose));
    assert_eq!(engine.round().star_x, star);
    let after: Vec<_> = engine.asteroids().map(|a| a.id).collect();
    assert_eq!(ids, after);
    assert!(engine
        .spawn_asteroid(AsteroidSize::Small, Vec2::ZERO, Vec2::ZERO)
        .is_none());
}

#[test]
fn reset_round_clears_outcome() {
    let tunables = Tunables {
        round_enabled: true,
        round_duration_sec: 1.0,
        ..quiet_tunables()
    };
    let mut engine = SimulationEngine::new(EngineOptions::new(8).with_tunables(tunables));
    engine.add_player("p");
    step(&mut engine, 90);
    assert!(engine.is_terminal());

    engine.reset_round();
    assert!(!engine.is_terminal());
    assert!(engine.ship("p").is_some());
    assert_eq!(engine.round().elapsed_sec, 0.0);
}

#[test]
fn gems_upgrade_tier_monotonically() {
    let mut engine = quiet_engine(9);
    engine.add_player("p");
    engine.place_ship("p", Vec2::ZERO, 0.0);
    for _ in 0..12 {
        let id = engine
            .spawn_asteroid(AsteroidSize::Med, Vec2::new(0.0, 0.0), Vec2::ZERO)
            .unwrap();
        engine.fracture(id, Vec2::new(1.0, 0.0));
        step(&mut engine, 2);
    }
    let ship = engine.ship("p").unwrap();
    assert!(ship.gem_score >= 24);
    assert!(ship.pose.tier >= ShipTier::Medium);
}
