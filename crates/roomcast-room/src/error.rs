//! Error types for the room layer.

use roomcast_protocol::{ConnectionToken, SessionId};

/// Errors that can occur during room and directory operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No live session with the given id (or access code).
    #[error("Session not found")]
    SessionNotFound(SessionId),

    /// The connection token is already mapped to a session — a duplicate
    /// join from the same connection.
    #[error("Client has already joined a session")]
    AlreadyJoined(ConnectionToken),

    /// A requested display name failed validation. The message is the
    /// human-readable reason, surfaced verbatim to the caller.
    #[error("{0}")]
    InvalidDisplayName(String),

    /// Could not allocate a unique session id or access code within the
    /// retry bound.
    #[error("could not allocate a unique session id or access code")]
    CreateFailed,

    /// The room's actor is gone (terminated mid-call).
    #[error("session {0} is unavailable")]
    Unavailable(SessionId),
}
