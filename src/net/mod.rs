//! Client netcode: NetClient, PredictionController and WorldView, composed
//! by [`ClientRuntime`].

pub mod client;
pub mod input;
pub mod prediction;
pub mod snapshot_buffer;
pub mod transport;
pub mod world_view;

pub use client::NetClient;
pub use input::{InputQueue, InputSampler, RawInput};
pub use prediction::{PredictionController, PredictionState};
pub use snapshot_buffer::SnapshotBuffer;
pub use transport::{LocalTransport, NetError, Transport, WsTransport};
pub use world_view::{EntityProxy, WorldView};

use crate::config::ClientConfig;
use crate::ws::protocol::{JoinOptions, Welcome};

/// What one call to [`ClientRuntime::frame`] did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReport {
    pub snapshots_received: usize,
    pub inputs_sent: usize,
    pub reconciled: bool,
    /// Authoritative sim time the view was interpolated to
    pub render_time_ms: Option<f64>,
    /// The transport closed during this frame
    pub disconnected: bool,
}

/// The three client components wired together
pub struct ClientRuntime {
    pub client: NetClient,
    pub prediction: PredictionController,
    pub view: WorldView,
}

impl ClientRuntime {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: NetClient::new(config),
            prediction: PredictionController::new(),
            view: WorldView::new(),
        }
    }

    pub async fn connect<T: Transport>(
        &mut self,
        transport: &T,
        endpoint: &str,
        options: &JoinOptions,
    ) -> Result<Welcome, NetError> {
        self.disconnect();
        let welcome = self.client.connect(transport, endpoint, options).await?;
        self.prediction
            .on_connect(&welcome, self.client.input_step_seconds());
        Ok(welcome)
    }

    /// Tear all three components down to their initial state
    pub fn disconnect(&mut self) {
        self.client.disconnect();
        self.prediction.on_disconnect();
        self.view.clear();
    }

    /// One render frame: receive, reconcile, sample and send input, predict,
    /// interpolate.
    pub fn frame(&mut self, now_ms: f64, raw: &RawInput) -> FrameReport {
        if !self.client.is_connected() {
            if self.prediction.state() != PredictionState::Disconnected {
                self.disconnect();
            }
            return FrameReport::default();
        }

        self.client.observe_input(raw);
        let snapshots_received = self.client.receive(now_ms);
        if !self.client.is_connected() {
            self.disconnect();
            return FrameReport {
                snapshots_received,
                disconnected: true,
                ..FrameReport::default()
            };
        }

        let reconciled = self.prediction.reconcile(&mut self.client);

        let sent = self.client.poll_input(now_ms);
        let step = self.client.input_step_seconds();
        for input in &sent {
            self.prediction.on_input_sent(input, step);
        }

        let delay_ms = self.client.config().interpolation_delay_ms;
        let render_time_ms = self
            .view
            .apply_interpolated_state(now_ms, delay_ms, self.client.snapshots());
        self.prediction.reanchor_attached(&mut self.view);

        FrameReport {
            snapshots_received,
            inputs_sent: sent.len(),
            reconciled,
            render_time_ms,
            disconnected: false,
        }
    }
}

impl Default for ClientRuntime {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}
