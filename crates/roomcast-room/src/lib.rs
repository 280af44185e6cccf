//! Session rooms for Roomcast.
//!
//! Each room runs as an isolated Tokio task (actor model) owning one
//! session document, its roster/role state machine, and three periodic
//! loops: the state-sync tick, the heartbeat ping, and disconnect
//! detection. Rooms are fully independent of each other.
//!
//! # Key types
//!
//! - [`SessionDirectory`] — creates rooms, resolves id/access-code/token,
//!   relays connection events, removes terminated rooms
//! - [`RoomHandle`] — send commands to a running room actor
//! - [`RoomConfig`] — loop timing (sync rate, ping interval, ...)
//! - [`ControllerCommand`] — input commands forwarded to game logic
//! - [`RoomError`] — what room and directory operations can reject

mod config;
mod directory;
mod error;
mod room;

pub use config::{RoomConfig, RoomPhase};
pub use directory::{DirectoryEvent, DirectoryEvents, SessionDirectory};
pub use error::RoomError;
pub use room::{
    CommandReceiver, ControllerCommand, JoinOptions, RoomHandle,
};
