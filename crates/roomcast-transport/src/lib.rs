//! Transport handle types for Roomcast.
//!
//! The core never touches a socket directly. Each accepted connection gets
//! a [`ConnectionHandle`] / [`FrameReceiver`] pair: the handle is handed to
//! the connection registry (and through it to rooms), while the receiver is
//! drained by the per-socket writer task in the server crate.
//!
//! Sends through the handle are fire-and-forget: they queue a frame on an
//! unbounded channel and return immediately. Nothing in the core ever
//! blocks on, awaits, or retries a delivery — a message to a dead
//! connection is simply dropped, and the full/delta resync protocol
//! absorbs the loss.

mod error;

pub use error::TransportError;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use roomcast_protocol::CloseCode;
use tokio::sync::mpsc;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection. Used only for logging — routing is
/// always by connection token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One outbound frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// An encoded wire envelope to deliver as-is.
    Data(Vec<u8>),

    /// Instruct the writer to close the socket with the given code and
    /// reason. The writer sends the close frame and stops draining.
    Close { code: CloseCode, reason: String },
}

/// Receiving half of a connection's outbound queue, owned by its writer
/// task.
pub type FrameReceiver = mpsc::UnboundedReceiver<Frame>;

/// Sending half of a connection's outbound queue.
///
/// Cheap to clone. Held by the connection registry; rooms resolve one per
/// send and drop it immediately after.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl ConnectionHandle {
    /// Creates a fresh handle/receiver pair for a newly accepted
    /// connection.
    pub fn channel() -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::next(),
                outbound: tx,
            },
            rx,
        )
    }

    /// The connection's log identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues encoded frame bytes for delivery. Returns immediately.
    ///
    /// # Errors
    /// [`TransportError::Closed`] if the writer task is gone. Callers log
    /// and move on — this is not a failure of the session.
    pub fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.outbound
            .send(Frame::Data(data))
            .map_err(|_| TransportError::Closed)
    }

    /// Queues a close instruction for the writer task.
    ///
    /// # Errors
    /// [`TransportError::Closed`] if the socket is already gone, which
    /// callers treat as already-closed.
    pub fn close(
        &self,
        code: CloseCode,
        reason: impl Into<String>,
    ) -> Result<(), TransportError> {
        self.outbound
            .send(Frame::Close {
                code,
                reason: reason.into(),
            })
            .map_err(|_| TransportError::Closed)
    }

    /// Whether the writer task is still draining this connection.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivers_data_frames_in_order() {
        let (handle, mut rx) = ConnectionHandle::channel();

        handle.send(b"one".to_vec()).unwrap();
        handle.send(b"two".to_vec()).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Frame::Data(b"one".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), Frame::Data(b"two".to_vec()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_queues_close_frame() {
        let (handle, mut rx) = ConnectionHandle::channel();

        handle
            .close(CloseCode::HostDisconnected, "host left")
            .unwrap();

        match rx.try_recv().unwrap() {
            Frame::Close { code, reason } => {
                assert_eq!(code, CloseCode::HostDisconnected);
                assert_eq!(reason, "host left");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn test_send_after_writer_gone_is_closed_error() {
        let (handle, rx) = ConnectionHandle::channel();
        drop(rx);

        assert!(!handle.is_open());
        assert!(matches!(
            handle.send(b"late".to_vec()),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _rx_a) = ConnectionHandle::channel();
        let (b, _rx_b) = ConnectionHandle::channel();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId(7);
        assert_eq!(id.to_string(), "conn-7");
    }
}
