//! Room configuration and lifecycle phase.

use std::time::Duration;

use roomcast_tick::TickConfig;

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Timing configuration for one session room.
///
/// The three loops run on independent timers: the sync tick broadcasts
/// state, the ping loop probes liveness, and the disconnect check marks
/// clients whose pongs stopped arriving. The disconnect check runs on a
/// shorter period than the ping loop so the soft-disconnect marker shows
/// up promptly.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// State-sync tick settings (rate, jitter, budget warning).
    pub sync: TickConfig,

    /// How often the heartbeat ping goes out.
    pub ping_interval: Duration,

    /// How often the disconnect detector scans the roster.
    pub disconnect_check_interval: Duration,

    /// Command channel size for the room actor.
    pub command_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            sync: TickConfig::default(),
            ping_interval: Duration::from_secs(2),
            disconnect_check_interval: Duration::from_secs(1),
            command_buffer: 64,
        }
    }
}

impl RoomConfig {
    /// A client whose last pong is older than this is soft-disconnected.
    pub fn pong_timeout(&self) -> Duration {
        self.ping_interval * 2
    }

    /// The ceiling applied to measured round trips, in milliseconds.
    /// Anything slower than a full heartbeat period reports "at the
    /// ceiling" instead of an unbounded number.
    pub fn ping_ceiling_millis(&self) -> u64 {
        self.ping_interval.as_millis() as u64
    }
}

// ---------------------------------------------------------------------------
// RoomPhase
// ---------------------------------------------------------------------------

/// The lifecycle of a room:
///
/// ```text
/// Active ──(host leaves / explicit dispose)──→ Terminated
/// ```
///
/// Clients come and go within `Active`; `Terminated` is terminal — all
/// timers stopped, all connections closed, directory notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Active,
    Terminated,
}

impl RoomPhase {
    /// Whether the room is still serving clients.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}
