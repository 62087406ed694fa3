//! Input sampling and the unacknowledged input queue

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::game::InputSample;

/// Samples emitted at most per poll when the caller fell behind
pub const MAX_CATCH_UP: u32 = 4;

/// Device state as the caller sees it right now. Momentary buttons are
/// reported as held; the sampler turns them into edges.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawInput {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub burst: bool,
    pub ping: bool,
    pub turn_analog: f64,
    pub thrust_analog: f64,
}

/// Fixed-rate sampler with rising-edge detection for burst and ping
#[derive(Debug, Clone)]
pub struct InputSampler {
    step_ms: f64,
    next_due_ms: Option<f64>,
    held: RawInput,
    prev_burst: bool,
    prev_ping: bool,
    pending_burst: bool,
    pending_ping: bool,
    next_seq: u32,
}

impl InputSampler {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            step_ms: 1000.0 / rate_hz.max(1) as f64,
            next_due_ms: None,
            held: RawInput::default(),
            prev_burst: false,
            prev_ping: false,
            pending_burst: false,
            pending_ping: false,
            next_seq: 1,
        }
    }

    pub fn set_rate(&mut self, rate_hz: u32) {
        self.step_ms = 1000.0 / rate_hz.max(1) as f64;
    }

    pub fn step_seconds(&self) -> f64 {
        self.step_ms / 1000.0
    }

    /// Record the current device state. A press that is still held on the
    /// next observation does not fire again.
    pub fn observe(&mut self, raw: &RawInput) {
        if raw.burst && !self.prev_burst {
            self.pending_burst = true;
        }
        if raw.ping && !self.prev_ping {
            self.pending_ping = true;
        }
        self.prev_burst = raw.burst;
        self.prev_ping = raw.ping;
        self.held = *raw;
    }

    /// How many samples are due at `now_ms`
    pub fn due_samples(&mut self, now_ms: f64) -> u32 {
        if !now_ms.is_finite() {
            return 0;
        }
        let next = *self.next_due_ms.get_or_insert(now_ms);
        if now_ms < next {
            return 0;
        }
        let due = (((now_ms - next) / self.step_ms).floor() as u32).saturating_add(1);
        if due >= MAX_CATCH_UP {
            self.next_due_ms = Some(now_ms + self.step_ms);
            MAX_CATCH_UP
        } else {
            self.next_due_ms = Some(next + due as f64 * self.step_ms);
            due
        }
    }

    /// Produce the next sample. Edges are consumed by the first sample
    /// after the press.
    pub fn take(&mut self) -> InputSample {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);

        let sample = InputSample {
            seq,
            left: self.held.left,
            right: self.held.right,
            up: self.held.up,
            down: self.held.down,
            burst: self.pending_burst,
            ping: self.pending_ping,
            turn_analog: self.held.turn_analog,
            thrust_analog: self.held.thrust_analog,
        };
        self.pending_burst = false;
        self.pending_ping = false;
        sample.sanitized()
    }

    /// Forget timing, edges and sequence numbers
    pub fn reset(&mut self) {
        *self = Self {
            step_ms: self.step_ms,
            ..Self::new(1)
        };
    }
}

/// Sent but unacknowledged inputs in sequence order, bounded
#[derive(Debug, Clone)]
pub struct InputQueue {
    samples: VecDeque<InputSample>,
    capacity: usize,
    last_acked: u32,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            last_acked: 0,
        }
    }

    /// Append a sent sample. On overflow the oldest is evicted.
    pub fn push(&mut self, sample: InputSample) {
        if self.samples.len() >= self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                warn!(seq = evicted.seq, "Input queue full, evicting oldest unacked input");
            }
        }
        self.samples.push_back(sample);
    }

    /// Drop every sample with `seq <= ack`. Returns how many were dropped.
    /// Acks at or below the last one are ignored.
    pub fn ack(&mut self, ack: u32) -> usize {
        if ack <= self.last_acked {
            if ack < self.last_acked {
                debug!(ack, last_acked = self.last_acked, "Stale input ack ignored");
            }
            return 0;
        }
        self.last_acked = ack;
        let before = self.samples.len();
        while self.samples.front().is_some_and(|s| s.seq <= ack) {
            self.samples.pop_front();
        }
        before - self.samples.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_acked(&self) -> u32 {
        self.last_acked
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_acked = 0;
    }
}
