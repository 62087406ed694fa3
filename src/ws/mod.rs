//! WebSocket transport for the authority

pub mod handler;
pub mod protocol;

pub use handler::ws_handler;
pub use protocol::{ClientMsg, JoinOptions, ServerMsg, Welcome};
