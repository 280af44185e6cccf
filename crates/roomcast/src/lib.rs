//! # Roomcast
//!
//! Real-time multiplayer session backend: one device creates a room and
//! gets a 6-digit access code, other devices join with the code over a
//! WebSocket, and everyone receives the continuously synchronized session
//! document (lobby roster + opaque game state) as one full snapshot
//! followed by structural deltas, at a fixed tick rate.
//!
//! The first joiner is the **host** (the display) — its disconnect tears
//! the whole session down. The second is the **controller** (the input
//! device), re-elected from the roster when it leaves.
//!
//! This crate is the outer shell: the axum REST/WS entry point, the
//! per-socket frame pump, background GC, and process wiring. The
//! mechanics live below it in `roomcast-room` (session actors and the
//! directory), `roomcast-session` (tokens and live connections),
//! `roomcast-protocol` (wire format, document schema, diff/patch), and
//! `roomcast-tick` (the sync-loop scheduler).

mod config;
mod error;
mod gc;
mod routes;
mod server;
mod state;
mod ws;

pub use config::ServerConfig;
pub use error::RoomcastError;
pub use routes::SessionResponse;
pub use server::{RoomcastServer, RoomcastServerBuilder};
