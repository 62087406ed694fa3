//! Shared builders for the integration tests

#![allow(dead_code)]

use orbitfall::game::{EngineOptions, InputSample, SimulationEngine, Tunables, TuningOverrides};
use orbitfall::ws::JoinOptions;

pub const DT: f64 = 1.0 / 60.0;

/// Tunables with every autonomous system off, for hand-built scenarios
pub fn quiet_tunables() -> Tunables {
    Tunables {
        population_enabled: false,
        saucer_enabled: false,
        round_enabled: false,
        ..Tunables::default()
    }
}

pub fn quiet_engine(seed: u32) -> SimulationEngine {
    SimulationEngine::new(EngineOptions::new(seed).with_tunables(quiet_tunables()))
}

pub fn quiet_join(seed: u32) -> JoinOptions {
    JoinOptions {
        seed: Some(seed),
        tuning: TuningOverrides {
            population_enabled: Some(false),
            saucer_enabled: Some(false),
            round_enabled: Some(false),
            ..TuningOverrides::default()
        },
        ..JoinOptions::default()
    }
}

pub fn step(engine: &mut SimulationEngine, ticks: usize) {
    for _ in 0..ticks {
        engine.update(DT);
    }
}

/// A reproducible input for player `slot` at `tick`: sweeping turns, pulsed
/// thrust and an occasional burst
pub fn scripted_input(slot: u32, tick: u32) -> InputSample {
    let phase = tick.wrapping_add(slot * 37);
    InputSample {
        seq: tick + 1,
        left: phase % 90 < 20,
        right: (45..60).contains(&(phase % 90)),
        up: phase % 30 < 18,
        down: phase % 200 > 190,
        burst: phase % 150 == 0,
        ping: phase % 400 == 7,
        turn_analog: 0.0,
        thrust_analog: if phase % 7 == 0 { 0.5 } else { 0.0 },
    }
}
