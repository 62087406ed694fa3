//! Local ship prediction and rewind-and-replay reconciliation

use tracing::{debug, info};

use crate::game::math::Vec2;
use crate::game::physics::step_ship;
use crate::game::{InputSample, ShipPose, Tunables};
use crate::ws::protocol::Welcome;

use super::client::NetClient;
use super::world_view::{EntityKind, WorldView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredictionState {
    #[default]
    Disconnected,
    /// Connected, no authoritative pose for the local ship yet
    PredictingWithoutAuthority,
    PredictingWithAuthority,
}

/// Owns the predicted pose of the local ship. Nothing else writes it.
#[derive(Debug, Clone, Default)]
pub struct PredictionController {
    state: PredictionState,
    local_id: Option<String>,
    tunables: Tunables,
    half_extents: Vec2,
    step_seconds: f64,
    predicted: Option<ShipPose>,
    last_reconciled_seq: Option<u32>,
    /// The newest snapshot reports a finished round; the authority moves
    /// nothing, so neither does the predictor
    round_over: bool,
}

impl PredictionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PredictionState {
        self.state
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn predicted(&self) -> Option<&ShipPose> {
        self.predicted.as_ref()
    }

    pub fn round_over(&self) -> bool {
        self.round_over
    }

    /// Adopt the authority's constants; prediction waits for the first
    /// authoritative pose
    pub fn on_connect(&mut self, welcome: &Welcome, step_seconds: f64) {
        *self = Self {
            state: PredictionState::PredictingWithoutAuthority,
            local_id: Some(welcome.session_id.clone()),
            tunables: welcome.tunables.clone(),
            half_extents: welcome.world.half_extents(),
            step_seconds,
            predicted: None,
            last_reconciled_seq: None,
            round_over: false,
        };
    }

    pub fn on_disconnect(&mut self) {
        *self = Self::default();
    }

    /// Step the predicted ship with an input that was just sent. Before the
    /// first authoritative pose, or while the round is over, the input is
    /// only recorded by the client.
    pub fn on_input_sent(&mut self, input: &InputSample, dt: f64) {
        if self.state != PredictionState::PredictingWithAuthority || self.round_over {
            return;
        }
        if let Some(pose) = self.predicted.as_mut() {
            step_ship(pose, input, &self.tunables, self.half_extents, dt);
        }
    }

    /// Rebase onto the newest authoritative pose and replay every input the
    /// authority has not processed. Returns true if the pose was rebuilt.
    /// A sample whose acked sequence has not advanced is skipped. While the
    /// round is over the pose is pinned to authority with no replay.
    pub fn reconcile(&mut self, client: &mut NetClient) -> bool {
        if self.state == PredictionState::Disconnected {
            return false;
        }
        let Some(local_id) = self.local_id.as_deref() else {
            return false;
        };
        let Some(authoritative) = client.snapshots().latest_ship(local_id).cloned() else {
            return false;
        };

        let round_over = client
            .snapshots()
            .latest()
            .is_some_and(|r| r.snapshot.round.outcome.is_some());
        let newly_over = round_over && !self.round_over;
        self.round_over = round_over;

        let acked = authoritative.last_input_seq;
        if !newly_over && self.last_reconciled_seq.is_some_and(|last| acked <= last) {
            return false;
        }

        client.ack_input_seq(acked);
        let mut pose = authoritative.pose();
        let mut replayed = 0usize;
        if !round_over {
            for input in client.pending_inputs().iter() {
                step_ship(&mut pose, input, &self.tunables, self.half_extents, self.step_seconds);
                replayed += 1;
            }
        }
        if newly_over {
            info!(local_id = %local_id, "Round over, prediction pinned to authority");
        }

        if self.state == PredictionState::PredictingWithoutAuthority {
            info!(local_id = %local_id, "Authoritative pose received, prediction active");
        }
        debug!(acked, replayed, "Reconciled local ship");

        self.predicted = Some(pose);
        self.last_reconciled_seq = Some(acked);
        self.state = PredictionState::PredictingWithAuthority;
        true
    }

    /// Pull the local ship's proxy onto the predicted pose and carry its
    /// attached asteroids along by the same rotation and translation.
    /// Render only; authoritative data is untouched.
    pub fn reanchor_attached(&self, view: &mut WorldView) {
        let (Some(local_id), Some(predicted)) = (self.local_id.as_deref(), self.predicted.as_ref()) else {
            return;
        };
        let Some(ship) = view.proxy_mut(local_id) else {
            return;
        };
        if ship.kind != EntityKind::Ship {
            return;
        }

        let old_pos = ship.pos;
        let turn = predicted.angle - ship.angle;
        ship.pos = predicted.pos;
        ship.vel = predicted.vel;
        ship.angle = predicted.angle;

        for proxy in view.proxies_mut() {
            if proxy.attached_to.as_deref() == Some(local_id) {
                proxy.pos = predicted.pos + (proxy.pos - old_pos).rotate(turn);
                proxy.vel = predicted.vel;
            }
        }
    }
}
