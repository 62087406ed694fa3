//! Orbitfall: a deterministic arcade simulation with an authoritative room
//! server and client-side prediction, reconciliation and interpolation.
//!
//! - [`game`] holds the simulation engine and the authority's room loop.
//! - [`net`] holds the client netcode.
//! - [`ws`] and [`http`] expose rooms over axum.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod net;
pub mod util;
pub mod ws;
