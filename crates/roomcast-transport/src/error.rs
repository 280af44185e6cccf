//! Error types for the transport layer.

/// Errors that can occur when talking to a connection handle.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection's writer task is gone — the socket closed or is
    /// closing. Senders treat this as "the client missed the message",
    /// which the heartbeat/resync protocol already tolerates.
    #[error("connection closed")]
    Closed,
}
