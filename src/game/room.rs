//! Room registry and the authoritative tick loop

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, JoinOptions, ServerMsg, Welcome};

use super::engine::{EngineOptions, SimulationEngine};
use super::entities::ViewRect;
use super::snapshot::SnapshotBuilder;

/// Room join failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    Full,

    #[error("Room is closed")]
    Closed,
}

impl RoomError {
    /// Wire code sent to clients in `ServerMsg::Error`
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::Full => "room_full",
            RoomError::Closed => "room_closed",
        }
    }
}

/// Per-room settings shared by every room in a registry
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub tick_hz: u32,
    pub snapshot_hz: u32,
    pub max_players: usize,
    /// Buffered outbound messages per client before snapshots are skipped
    pub outbound_capacity: usize,
    /// A room with no clients for this long shuts down
    pub idle_timeout: Duration,
    /// A finished round stays frozen this long before the room resets it
    pub round_restart_delay: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            snapshot_hz: 20,
            max_players: 8,
            outbound_capacity: 64,
            idle_timeout: Duration::from_secs(5),
            round_restart_delay: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for RoomSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_hz: config.tick_hz,
            snapshot_hz: config.snapshot_hz,
            max_players: config.room_max_players,
            ..Self::default()
        }
    }
}

/// Successful join: the handshake plus the session's outbound stream
#[derive(Debug)]
pub struct RoomJoin {
    pub welcome: Welcome,
    pub outbound: mpsc::Receiver<ServerMsg>,
}

/// Commands from connections to a room task
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        session_id: String,
        reply: oneshot::Sender<Result<RoomJoin, RoomError>>,
    },
    Client {
        session_id: String,
        msg: ClientMsg,
    },
    Leave {
        session_id: String,
    },
}

/// Handle to a running room
#[derive(Clone, Debug)]
pub struct RoomHandle {
    pub id: String,
    command_tx: mpsc::Sender<RoomCommand>,
    player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// True when both handles point at the same running room task
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        Arc::ptr_eq(&self.player_count, &other.player_count)
    }

    /// Join the room. The welcome carries the session id to look for in
    /// snapshots.
    pub async fn join(&self, session_id: &str) -> Result<RoomJoin, RoomError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(RoomCommand::Join {
                session_id: session_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| RoomError::Closed)?;
        reply_rx.await.map_err(|_| RoomError::Closed)?
    }

    pub async fn send(&self, session_id: &str, msg: ClientMsg) -> Result<(), RoomError> {
        self.command_tx
            .send(RoomCommand::Client {
                session_id: session_id.to_string(),
                msg,
            })
            .await
            .map_err(|_| RoomError::Closed)
    }

    /// Best effort; a closed room has already forgotten the session
    pub async fn leave(&self, session_id: &str) {
        let _ = self
            .command_tx
            .send(RoomCommand::Leave {
                session_id: session_id.to_string(),
            })
            .await;
    }
}

fn ticks_for(duration: Duration, tick_hz: u32) -> u64 {
    ((duration.as_secs_f64() * tick_hz as f64).ceil() as u64).max(1)
}

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, RoomHandle>>,
    settings: RoomSettings,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn get(&self, id: &str) -> Option<RoomHandle> {
        self.rooms
            .get(id)
            .map(|r| r.value().clone())
            .filter(|h| !h.is_closed())
    }

    /// Return the running room with this id, or start one from `options`.
    /// Must be called inside a tokio runtime.
    pub fn get_or_create(&self, room_id: &str, options: &JoinOptions) -> RoomHandle {
        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            entry => {
                let seed = options.seed.unwrap_or_else(rand::random);
                let (room, handle) = GameRoom::new(
                    room_id.to_string(),
                    options.engine_options(seed),
                    self.settings.clone(),
                    self.rooms.clone(),
                );
                entry.insert(handle.clone());
                tokio::spawn(room.run());
                handle
            }
        }
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RoomSettings::default())
    }
}

struct ClientSlot {
    outbound: mpsc::Sender<ServerMsg>,
    view: Option<ViewRect>,
}

/// The authoritative room task
pub struct GameRoom {
    id: String,
    engine: SimulationEngine,
    command_rx: mpsc::Receiver<RoomCommand>,
    clients: BTreeMap<String, ClientSlot>,
    snapshot_builder: SnapshotBuilder,
    settings: RoomSettings,
    player_count: Arc<AtomicUsize>,
    registry: Arc<DashMap<String, RoomHandle>>,
}

impl GameRoom {
    pub fn new(
        id: String,
        options: EngineOptions,
        settings: RoomSettings,
        registry: Arc<DashMap<String, RoomHandle>>,
    ) -> (Self, RoomHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id: id.clone(),
            command_tx,
            player_count: player_count.clone(),
        };

        let snapshot_interval = SnapshotBuilder::interval_for(settings.tick_hz, settings.snapshot_hz);
        let room = Self {
            id,
            engine: SimulationEngine::new(options),
            command_rx,
            clients: BTreeMap::new(),
            snapshot_builder: SnapshotBuilder::new(snapshot_interval),
            settings,
            player_count,
            registry,
        };

        (room, handle)
    }

    /// Run the fixed-rate tick loop until the room has been idle too long
    pub async fn run(mut self) {
        info!(room_id = %self.id, seed = self.engine.seed(), "Room started");

        let tick_hz = self.settings.tick_hz.max(1);
        let dt = 1.0 / tick_hz as f64;
        let mut tick_interval = interval(Duration::from_micros(1_000_000 / tick_hz as u64));
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let idle_limit = ticks_for(self.settings.idle_timeout, tick_hz);
        let restart_limit = ticks_for(self.settings.round_restart_delay, tick_hz);
        let mut idle_ticks: u64 = 0;
        let mut frozen_ticks: u64 = 0;

        loop {
            tick_interval.tick().await;

            if !self.process_commands() {
                break;
            }

            let was_terminal = self.engine.is_terminal();
            self.engine.update(dt);
            if !was_terminal && self.engine.is_terminal() {
                info!(
                    room_id = %self.id,
                    tick = self.engine.tick(),
                    outcome = ?self.engine.round().outcome,
                    "Round finished"
                );
                self.snapshot_builder.force_next();
            }

            if self.engine.is_terminal() {
                frozen_ticks += 1;
                if frozen_ticks >= restart_limit {
                    self.engine.reset_round();
                    self.snapshot_builder.force_next();
                    frozen_ticks = 0;
                    info!(room_id = %self.id, tick = self.engine.tick(), "Round restarted");
                }
            } else {
                frozen_ticks = 0;
            }

            if self.snapshot_builder.should_send() {
                self.broadcast_snapshots();
            }

            if self.clients.is_empty() {
                idle_ticks += 1;
                if idle_ticks >= idle_limit {
                    info!(room_id = %self.id, "Room idle, shutting down");
                    break;
                }
            } else {
                idle_ticks = 0;
            }
        }

        self.command_rx.close();
        let player_count = self.player_count.clone();
        self.registry
            .remove_if(&self.id, |_, h| Arc::ptr_eq(&h.player_count, &player_count));

        let stats = self.snapshot_builder.stats();
        info!(
            room_id = %self.id,
            ticks = self.engine.tick(),
            snapshots = stats.total_snapshots,
            avg_entities = stats.avg_entities_per_snapshot,
            "Room closed"
        );
    }

    /// Drain pending commands. Returns false once every handle is gone.
    fn process_commands(&mut self) -> bool {
        loop {
            match self.command_rx.try_recv() {
                Ok(RoomCommand::Join { session_id, reply }) => self.handle_join(session_id, reply),
                Ok(RoomCommand::Client { session_id, msg }) => self.handle_message(&session_id, msg),
                Ok(RoomCommand::Leave { session_id }) => self.handle_leave(&session_id),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_join(&mut self, session_id: String, reply: oneshot::Sender<Result<RoomJoin, RoomError>>) {
        if !self.clients.contains_key(&session_id) && self.clients.len() >= self.settings.max_players {
            warn!(room_id = %self.id, session_id = %session_id, "Room full, rejecting join");
            let _ = reply.send(Err(RoomError::Full));
            return;
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.settings.outbound_capacity.max(1));
        if self.clients.contains_key(&session_id) {
            warn!(session_id = %session_id, "Session already in room, replacing its stream");
        } else {
            self.engine.add_player(&session_id);
        }
        self.clients.insert(
            session_id.clone(),
            ClientSlot {
                outbound: outbound_tx,
                view: None,
            },
        );
        self.player_count.store(self.clients.len(), Ordering::Relaxed);

        let welcome = Welcome {
            session_id: session_id.clone(),
            room_id: self.id.clone(),
            seed: self.engine.seed(),
            world: *self.engine.world(),
            tunables: self.engine.tunables().clone(),
            tick_hz: self.settings.tick_hz,
            server_time: unix_millis(),
        };

        if reply
            .send(Ok(RoomJoin {
                welcome,
                outbound: outbound_rx,
            }))
            .is_err()
        {
            debug!(session_id = %session_id, "Joiner went away before the welcome");
            self.handle_leave(&session_id);
            return;
        }

        self.snapshot_builder.force_next();
        info!(
            room_id = %self.id,
            session_id = %session_id,
            players = self.clients.len(),
            "Player joined"
        );
    }

    fn handle_message(&mut self, session_id: &str, msg: ClientMsg) {
        if !self.clients.contains_key(session_id) {
            debug!(session_id = %session_id, "Message from unknown session ignored");
            return;
        }
        match msg {
            ClientMsg::Input { input } => self.engine.set_input(session_id, &input),
            ClientMsg::View { view } => {
                let view = view.sanitized();
                self.engine.set_view(session_id, view);
                if let Some(slot) = self.clients.get_mut(session_id) {
                    slot.view = Some(view);
                }
            }
            ClientMsg::Ping { t } => self.send_to(session_id, ServerMsg::Pong { t }),
            ClientMsg::Leave => self.handle_leave(session_id),
            ClientMsg::Join { .. } => {
                debug!(session_id = %session_id, "Duplicate join ignored");
            }
        }
    }

    fn handle_leave(&mut self, session_id: &str) {
        if self.clients.remove(session_id).is_none() {
            return;
        }
        self.engine.remove_player(session_id);
        self.player_count.store(self.clients.len(), Ordering::Relaxed);
        info!(
            room_id = %self.id,
            session_id = %session_id,
            players = self.clients.len(),
            "Player left"
        );
    }

    fn send_to(&mut self, session_id: &str, msg: ServerMsg) {
        let Some(slot) = self.clients.get(session_id) else {
            return;
        };
        if let Err(TrySendError::Closed(_)) = slot.outbound.try_send(msg) {
            self.handle_leave(session_id);
        }
    }

    fn broadcast_snapshots(&mut self) {
        let mut gone = Vec::new();
        for (session_id, slot) in &self.clients {
            let snapshot = self.snapshot_builder.build(&self.engine, slot.view.as_ref());
            match slot.outbound.try_send(ServerMsg::Snapshot(snapshot)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(room_id = %self.id, session_id = %session_id, "Client lagged, skipping snapshot");
                }
                Err(TrySendError::Closed(_)) => gone.push(session_id.clone()),
            }
        }
        for session_id in gone {
            self.handle_leave(&session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Tunables;
    use crate::game::TuningOverrides;

    fn quiet_options() -> JoinOptions {
        JoinOptions {
            seed: Some(12),
            tuning: TuningOverrides {
                population_enabled: Some(false),
                saucer_enabled: Some(false),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_join_returns_welcome_with_tunables() {
        let registry = RoomRegistry::default();
        let room = registry.get_or_create("lobby", &quiet_options());
        let join = room.join("s1").await.unwrap();
        assert_eq!(join.welcome.session_id, "s1");
        assert_eq!(join.welcome.seed, 12);
        assert!(!join.welcome.tunables.population_enabled);
        assert_eq!(join.welcome.tunables.ship_thrust, Tunables::default().ship_thrust);
    }

    #[tokio::test]
    async fn test_full_room_rejects() {
        let registry = RoomRegistry::new(RoomSettings {
            max_players: 1,
            ..RoomSettings::default()
        });
        let room = registry.get_or_create("tiny", &quiet_options());
        let _first = room.join("s1").await.unwrap();
        let second = room.join("s2").await;
        assert_eq!(second.unwrap_err(), RoomError::Full);
    }

    #[tokio::test]
    async fn test_finished_round_restarts_after_delay() {
        let registry = RoomRegistry::new(RoomSettings {
            round_restart_delay: Duration::from_millis(200),
            ..RoomSettings::default()
        });
        let mut options = quiet_options();
        options.tuning.round_enabled = Some(true);
        options.tuning.round_duration_sec = Some(1.0);
        let room = registry.get_or_create("short", &options);
        let mut join = room.join("s1").await.unwrap();

        let mut saw_outcome = false;
        let restarted = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = join.outbound.recv().await {
                let ServerMsg::Snapshot(snapshot) = msg else {
                    continue;
                };
                if snapshot.round.outcome.is_some() {
                    saw_outcome = true;
                } else if saw_outcome {
                    return snapshot.ship("s1").is_some() && snapshot.round.elapsed_sec < 0.5;
                }
            }
            false
        })
        .await;
        assert!(matches!(restarted, Ok(true)));
    }

    #[tokio::test]
    async fn test_same_id_reuses_room() {
        let registry = RoomRegistry::default();
        let a = registry.get_or_create("r", &quiet_options());
        let b = registry.get_or_create("r", &JoinOptions::default());
        assert!(a.same_room(&b));
        assert_eq!(registry.active_rooms(), 1);
    }
}
