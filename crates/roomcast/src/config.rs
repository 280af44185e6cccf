//! Server configuration.

use roomcast_room::RoomConfig;
use roomcast_session::{RegistryConfig, TokenConfig};

/// Everything the server needs to start: the listen address plus the
/// per-component settings passed down at construction. No component reads
/// global state — this is the single place the process wires things
/// together from.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address for the combined HTTP + WebSocket entry point.
    pub bind_addr: String,

    /// Timing for every room's three loops.
    pub room: RoomConfig,

    /// Join-token TTL and sweep cadence.
    pub tokens: TokenConfig,

    /// Stale-connection window and sweep cadence.
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            room: RoomConfig::default(),
            tokens: TokenConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}
