//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Authority configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human formatter
    pub log_json: bool,
    /// Allowed client origins for CORS, comma-separated; `*` allows any
    pub client_origin: String,

    /// Simulation ticks per second
    pub tick_hz: u32,
    /// Snapshots per second sent to each client
    pub snapshot_hz: u32,
    /// Players per room
    pub room_max_players: usize,
    /// Inbound messages per second per connection
    pub input_rate_limit: u32,
    /// How long a fresh socket may take to send its join request
    pub join_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins when the host provides one
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let tick_hz: u32 = parse_or("TICK_HZ", 60)?;
        let snapshot_hz: u32 = parse_or("SNAPSHOT_HZ", 20)?;

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            tick_hz: tick_hz.clamp(1, 240),
            snapshot_hz: snapshot_hz.clamp(1, tick_hz.clamp(1, 240)),
            room_max_players: parse_or("ROOM_MAX_PLAYERS", 8usize)?.max(1),
            input_rate_limit: parse_or("INPUT_RATE_LIMIT", 120u32)?.max(1),
            join_timeout: Duration::from_millis(parse_or("JOIN_TIMEOUT_MS", 5_000u64)?),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            client_origin: "*".to_string(),
            tick_hz: 60,
            snapshot_hz: 20,
            room_max_players: 8,
            input_rate_limit: 120,
            join_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Client-side netcode settings
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Input sampling rate; replaced by the authority's tick rate on connect
    pub input_hz: u32,
    /// Snapshots kept in the receive ring
    pub snapshot_capacity: usize,
    /// Unacknowledged inputs kept for replay
    pub input_queue_capacity: usize,
    /// How far behind the estimated authoritative clock the view renders
    pub interpolation_delay_ms: f64,
    /// Cap on clock extrapolation past the newest snapshot
    pub max_extrapolation_ms: f64,
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            input_hz: 60,
            snapshot_capacity: 32,
            input_queue_capacity: 256,
            interpolation_delay_ms: 100.0,
            max_extrapolation_ms: 250.0,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),
}
