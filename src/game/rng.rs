//! Deterministic random number streams
//!
//! All simulation randomness goes through [`SeededRng`] (xorshift32) so that an
//! engine built from the same seed replays bit-for-bit. Nothing here touches
//! thread-local or OS entropy.

use serde::{Deserialize, Serialize};

/// xorshift32 generator with an explicit, serializable state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeededRng {
    state: u32,
}

impl SeededRng {
    pub fn new(seed: u32) -> Self {
        // xorshift has a fixed point at zero
        let state = if seed == 0 { 0x9E37_79B9 } else { seed };
        Self { state }
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    /// Uniform in [min, max)
    pub fn range(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }

    /// Uniform integer in [0, n); returns 0 when `n == 0`
    pub fn index(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (self.next_u32() as u64 % n as u64) as usize
    }

    pub fn chance(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Pick an index from a weight table. Zero/negative weights are never picked
    /// unless every weight is non-positive, in which case index 0 is returned.
    pub fn weighted(&mut self, weights: &[f64]) -> usize {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return 0;
        }
        let mut roll = self.next_f64() * total;
        for (i, w) in weights.iter().enumerate() {
            if *w <= 0.0 {
                continue;
            }
            if roll < *w {
                return i;
            }
            roll -= w;
        }
        weights.iter().rposition(|w| *w > 0.0).unwrap_or(0)
    }
}

/// The engine's named random streams.
///
/// Gameplay decisions only ever draw from `gameplay`; cosmetic streams are
/// separate so that rendering helpers cannot perturb the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngStreams {
    pub gameplay: SeededRng,
    pub starfield: SeededRng,
    pub exhaust: SeededRng,
}

const STARFIELD_SALT: u32 = 0x5F3C_A11D;
const EXHAUST_SALT: u32 = 0x00E8_4A57;

impl RngStreams {
    pub fn new(seed: u32) -> Self {
        Self {
            gameplay: SeededRng::new(seed),
            starfield: SeededRng::new(seed ^ STARFIELD_SALT),
            exhaust: SeededRng::new(seed.rotate_left(16) ^ EXHAUST_SALT),
        }
    }

    pub fn reseed(&mut self, seed: u32) {
        *self = Self::new(seed);
    }

    pub fn reseed_starfield(&mut self, seed: u32) {
        self.starfield = SeededRng::new(seed ^ STARFIELD_SALT);
    }

    pub fn reseed_exhaust(&mut self, seed: u32) {
        self.exhaust = SeededRng::new(seed.rotate_left(16) ^ EXHAUST_SALT);
    }
}

/// FNV-1a hash, used to derive per-player values that must not depend on
/// registration order.
pub fn fnv1a(text: &str) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for byte in text.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
