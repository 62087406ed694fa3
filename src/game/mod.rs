//! Game simulation modules

pub mod engine;
pub mod entities;
pub mod math;
pub mod physics;
pub mod rng;
pub mod room;
pub mod snapshot;
pub mod spatial;
pub mod tuning;

mod capture;
mod collision;
mod hostiles;
mod population;
mod round;

pub use engine::{EngineOptions, SimulationEngine, MAX_STEP_SECONDS};
pub use entities::{PlayerId, ShipPose, ViewRect};
pub use room::{GameRoom, RoomError, RoomHandle, RoomRegistry};
pub use population::PopulationBudget;
pub use round::{Gate, RoundOutcome, RoundState};
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use tuning::{ShipTier, Tunables, TuningOverrides, WorldSize};

use serde::{Deserialize, Serialize};

use self::math::finite_or;

/// One sampled input record.
///
/// `burst` and `ping` are momentary: the client sets them only on the sample
/// where they newly became pressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputSample {
    pub seq: u32,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub burst: bool,
    pub ping: bool,
    /// -1 (full left) ..= 1 (full right)
    pub turn_analog: f64,
    /// 0 ..= 1
    pub thrust_analog: f64,
}

impl InputSample {
    /// Clamp analog axes into range; non-finite values become 0
    pub fn sanitized(&self) -> Self {
        Self {
            turn_analog: finite_or(self.turn_analog, 0.0).clamp(-1.0, 1.0),
            thrust_analog: finite_or(self.thrust_analog, 0.0).clamp(0.0, 1.0),
            ..*self
        }
    }

    /// Combined turn axis; an analog stick overrides the digital keys
    pub fn turn_axis(&self) -> f64 {
        let analog = finite_or(self.turn_analog, 0.0).clamp(-1.0, 1.0);
        if analog != 0.0 {
            return analog;
        }
        match (self.left, self.right) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        }
    }

    pub fn thrust_axis(&self) -> f64 {
        let analog = finite_or(self.thrust_analog, 0.0).clamp(0.0, 1.0);
        if self.up {
            1.0
        } else {
            analog
        }
    }

    /// Merge a newer sample into a latched one: held fields are
    /// last-write-wins, momentary fields stay set until a tick consumes them.
    pub fn latch(&mut self, newer: &InputSample) {
        let burst = self.burst || newer.burst;
        let ping = self.ping || newer.ping;
        *self = newer.sanitized();
        self.burst = burst;
        self.ping = ping;
    }

    pub fn clear_momentary(&mut self) {
        self.burst = false;
        self.ping = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_clamps_and_coerces() {
        let raw = InputSample {
            turn_analog: f64::NAN,
            thrust_analog: 7.0,
            ..Default::default()
        };
        let s = raw.sanitized();
        assert_eq!(s.turn_analog, 0.0);
        assert_eq!(s.thrust_analog, 1.0);
    }

    #[test]
    fn test_latch_keeps_momentary_edges() {
        let mut latched = InputSample::default();
        latched.latch(&InputSample { seq: 1, burst: true, up: true, ..Default::default() });
        latched.latch(&InputSample { seq: 2, up: false, ..Default::default() });
        assert_eq!(latched.seq, 2);
        assert!(latched.burst);
        assert!(!latched.up);
        latched.clear_momentary();
        assert!(!latched.burst);
    }

    #[test]
    fn test_analog_turn_overrides_keys() {
        let input = InputSample { left: true, turn_analog: 0.5, ..Default::default() };
        assert_eq!(input.turn_axis(), 0.5);
        let input = InputSample { left: true, ..Default::default() };
        assert_eq!(input.turn_axis(), -1.0);
    }
}
