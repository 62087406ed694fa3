//! NetClient: session lifecycle, input framing and snapshot receipt

use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::game::{InputSample, ViewRect};
use crate::ws::protocol::{ClientMsg, JoinOptions, ServerMsg, Welcome};

use super::input::{InputQueue, InputSampler, RawInput};
use super::snapshot_buffer::SnapshotBuffer;
use super::transport::{NetError, Transport, TransportSession};

pub struct NetClient {
    config: ClientConfig,
    session: Option<TransportSession>,
    sampler: InputSampler,
    pending: InputQueue,
    snapshots: SnapshotBuffer,
    rtt_ms: Option<f64>,
}

impl NetClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            sampler: InputSampler::new(config.input_hz),
            pending: InputQueue::new(config.input_queue_capacity),
            snapshots: SnapshotBuffer::new(config.snapshot_capacity, config.max_extrapolation_ms),
            session: None,
            rtt_ms: None,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a session. Any existing session is closed first. Failures
    /// propagate and leave the client disconnected.
    pub async fn connect<T: Transport>(
        &mut self,
        transport: &T,
        endpoint: &str,
        options: &JoinOptions,
    ) -> Result<Welcome, NetError> {
        self.disconnect();

        let session = timeout(self.config.handshake_timeout, transport.open(endpoint, options))
            .await
            .map_err(|_| NetError::HandshakeTimeout)??;

        let welcome = session.welcome.clone();
        self.sampler.set_rate(welcome.tick_hz);
        self.session = Some(session);

        info!(
            session_id = %welcome.session_id,
            room_id = %welcome.room_id,
            tick_hz = welcome.tick_hz,
            "Connected"
        );
        Ok(welcome)
    }

    /// Close the session and clear every buffer. Safe when disconnected.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if session.outbound.send(ClientMsg::Leave).is_err() {
                debug!("Leave dropped, transport already closed");
            }
            info!(session_id = %session.welcome.session_id, "Disconnected");
        }
        self.sampler.reset();
        self.sampler.set_rate(self.config.input_hz);
        self.pending.clear();
        self.snapshots.clear();
        self.rtt_ms = None;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn welcome(&self) -> Option<&Welcome> {
        self.session.as_ref().map(|s| &s.welcome)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.welcome().map(|w| w.session_id.as_str())
    }

    /// Feed the current device state; call every frame
    pub fn observe_input(&mut self, raw: &RawInput) {
        self.sampler.observe(raw);
    }

    /// Emit and send every input sample due at `now_ms`. Returned samples
    /// are also retained until acknowledged.
    pub fn poll_input(&mut self, now_ms: f64) -> Vec<InputSample> {
        if self.session.is_none() {
            return Vec::new();
        }
        let due = self.sampler.due_samples(now_ms);
        let mut sent = Vec::with_capacity(due as usize);
        for _ in 0..due {
            let input = self.sampler.take();
            self.send(ClientMsg::Input { input });
            self.pending.push(input);
            sent.push(input);
        }
        sent
    }

    /// Report the local viewport; the authority scopes snapshots to it
    pub fn send_view(&mut self, view: ViewRect) -> Result<(), NetError> {
        if self.session.is_none() {
            return Err(NetError::NotConnected);
        }
        self.send(ClientMsg::View { view: view.sanitized() });
        Ok(())
    }

    /// Start an RTT measurement stamped with the caller's clock
    pub fn send_ping(&mut self, now_ms: f64) {
        self.send(ClientMsg::Ping {
            t: now_ms.max(0.0) as u64,
        });
    }

    /// Drain inbound messages. Returns the number of snapshots buffered.
    /// A closed transport disconnects the client.
    pub fn receive(&mut self, now_ms: f64) -> usize {
        let mut buffered = 0;
        let mut closed = false;

        if let Some(session) = self.session.as_mut() {
            loop {
                match session.inbound.try_recv() {
                    Ok(ServerMsg::Snapshot(snapshot)) => {
                        if self.snapshots.push(snapshot, now_ms) {
                            buffered += 1;
                        }
                    }
                    Ok(ServerMsg::Pong { t }) => {
                        self.rtt_ms = Some((now_ms - t as f64).max(0.0));
                    }
                    Ok(ServerMsg::Error { code, message }) => {
                        warn!(code = %code, message = %message, "Server error");
                    }
                    Ok(ServerMsg::Welcome(_)) => {
                        debug!("Repeated welcome ignored");
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        }

        if closed {
            info!("Transport closed by peer");
            self.disconnect();
        }
        buffered
    }

    /// Acknowledge inputs up to `seq`; stale acks are no-ops
    pub fn ack_input_seq(&mut self, seq: u32) -> usize {
        self.pending.ack(seq)
    }

    pub fn pending_inputs(&self) -> &InputQueue {
        &self.pending
    }

    pub fn snapshots(&self) -> &SnapshotBuffer {
        &self.snapshots
    }

    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt_ms
    }

    /// Simulated seconds covered by one input sample
    pub fn input_step_seconds(&self) -> f64 {
        self.sampler.step_seconds()
    }

    /// Best effort; a closing transport swallows the message
    fn send(&mut self, msg: ClientMsg) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.outbound.send(msg).is_err() {
            debug!("Send on closing connection dropped");
        }
    }
}

impl Default for NetClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Tunables, WorldSize};
    use std::future::Future;
    use tokio::sync::mpsc;

    /// Hands out a session whose far side the test keeps
    struct ScriptedTransport {
        fail: bool,
    }

    struct FarSide {
        from_client: mpsc::UnboundedReceiver<ClientMsg>,
        to_client: mpsc::UnboundedSender<ServerMsg>,
    }

    fn scripted_session() -> (TransportSession, FarSide) {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let welcome = Welcome {
            session_id: "me".into(),
            room_id: "r".into(),
            seed: 1,
            world: WorldSize::default(),
            tunables: Tunables::default(),
            tick_hz: 50,
            server_time: 0,
        };
        (
            TransportSession { welcome, outbound, inbound },
            FarSide { from_client, to_client },
        )
    }

    impl Transport for ScriptedTransport {
        fn open(
            &self,
            _endpoint: &str,
            _options: &JoinOptions,
        ) -> impl Future<Output = Result<TransportSession, NetError>> + Send {
            let fail = self.fail;
            async move {
                if fail {
                    return Err(NetError::Connect("refused".into()));
                }
                let (session, far) = scripted_session();
                // Keep the far side alive for the test's duration
                std::mem::forget(far);
                Ok(session)
            }
        }
    }

    #[test]
    fn test_connect_failure_propagates() {
        let mut client = NetClient::default();
        let result = tokio_test::block_on(client.connect(
            &ScriptedTransport { fail: true },
            "x",
            &JoinOptions::default(),
        ));
        assert!(matches!(result, Err(NetError::Connect(_))));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_adopts_tick_rate() {
        let mut client = NetClient::default();
        let welcome = tokio_test::block_on(client.connect(
            &ScriptedTransport { fail: false },
            "x",
            &JoinOptions::default(),
        ))
        .unwrap();
        assert_eq!(welcome.session_id, "me");
        assert!((client.input_step_seconds() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_inputs_retained_until_acked() {
        let (session, mut far) = scripted_session();
        let mut client = NetClient::default();
        client.session = Some(session);

        let sent = client.poll_input(0.0);
        assert_eq!(sent.len(), 1);
        let sent = client.poll_input(1000.0 / 60.0);
        assert_eq!(sent.len(), 1);
        assert_eq!(client.pending_inputs().len(), 2);
        assert!(matches!(far.from_client.try_recv(), Ok(ClientMsg::Input { .. })));

        client.ack_input_seq(1);
        assert_eq!(client.pending_inputs().len(), 1);
        client.ack_input_seq(1);
        assert_eq!(client.pending_inputs().len(), 1);
    }

    #[test]
    fn test_pong_measures_rtt_and_close_disconnects() {
        let (session, far) = scripted_session();
        let mut client = NetClient::default();
        client.session = Some(session);

        client.send_ping(100.0);
        far.to_client.send(ServerMsg::Pong { t: 100 }).unwrap();
        client.receive(140.0);
        assert_eq!(client.rtt_ms(), Some(40.0));

        drop(far);
        client.receive(150.0);
        assert!(!client.is_connected());
        assert!(client.pending_inputs().is_empty());
        assert_eq!(client.rtt_ms(), None);
    }

    #[test]
    fn test_disconnect_twice_is_fine() {
        let mut client = NetClient::default();
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
    }
}
