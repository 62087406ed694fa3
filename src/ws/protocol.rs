//! WebSocket message protocol definitions
//!
//! JSON text frames, tagged by a `type` field in snake_case.

use serde::{Deserialize, Serialize};

use crate::game::{EngineOptions, InputSample, Snapshot, Tunables, TuningOverrides, ViewRect, WorldSize};

/// Options a client may attach to its join request. They only take effect
/// for the client that creates the room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinOptions {
    pub world_width: Option<f64>,
    pub world_height: Option<f64>,
    pub seed: Option<u32>,
    pub tuning: TuningOverrides,
}

impl JoinOptions {
    pub fn world_size(&self) -> WorldSize {
        let d = WorldSize::default();
        WorldSize::new(
            self.world_width.unwrap_or(d.width),
            self.world_height.unwrap_or(d.height),
        )
    }

    /// Engine construction parameters; `fallback_seed` is used when the
    /// request names none
    pub fn engine_options(&self, fallback_seed: u32) -> EngineOptions {
        EngineOptions::new(self.seed.unwrap_or(fallback_seed))
            .with_world(self.world_size())
            .with_tunables(Tunables::default().with_overrides(&self.tuning))
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Must be the first message on a connection
    Join {
        #[serde(default)]
        options: JoinOptions,
    },

    /// One sampled input, sent at the client's input rate
    Input { input: InputSample },

    /// Viewport report for interest management
    View { view: ViewRect },

    /// Ping for latency measurement
    Ping { t: u64 },

    Leave,
}

/// Handshake response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Id of the local ship in every snapshot
    pub session_id: String,
    pub room_id: String,
    pub seed: u32,
    pub world: WorldSize,
    /// The authority's exact tunables; the predictor must step with these
    pub tunables: Tunables,
    pub tick_hz: u32,
    pub server_time: u64,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    Welcome(Welcome),

    Snapshot(Snapshot),

    /// Pong response echoing the client's timestamp
    Pong { t: u64 },

    Error { code: String, message: String },
}

impl ServerMsg {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_msg_wire_format() {
        let msg = ClientMsg::Input {
            input: InputSample { seq: 7, up: true, ..Default::default() },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "input");
        assert_eq!(json["input"]["seq"], 7);
        assert_eq!(json["input"]["turnAnalog"], 0.0);
    }

    #[test]
    fn test_join_without_options_parses() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"join"}"#).unwrap();
        assert_eq!(msg, ClientMsg::Join { options: JoinOptions::default() });
    }

    #[test]
    fn test_join_options_build_engine_options() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"join","options":{"worldWidth":2000,"seed":9,"tuning":{"burstSpeed":500}}}"#,
        )
        .unwrap();
        let ClientMsg::Join { options } = msg else {
            panic!("expected join");
        };
        let engine = options.engine_options(1);
        assert_eq!(engine.seed, 9);
        assert_eq!(engine.world.width, 2000.0);
        assert_eq!(engine.tunables.burst_speed, 500.0);
    }

    #[test]
    fn test_server_error_tagged() {
        let json = serde_json::to_string(&ServerMsg::error("room_full", "Room is full")).unwrap();
        assert!(json.contains(r#""type":"error""#));
        let back: ServerMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ServerMsg::error("room_full", "Room is full"));
    }
}
