//! The connection registry: token → live transport handle.
//!
//! The registry is the only owner of [`ConnectionHandle`]s. Rooms look a
//! handle up by token for each send and drop it immediately; nothing else
//! keeps one. That keeps the "who can reach this socket" question
//! answerable in exactly one place, which is what makes the stale sweep
//! safe: closing here is closing everywhere.
//!
//! Inbound activity is tracked per token (`touch`); the periodic sweep
//! force-closes anything idle past the stale window and hands the tokens
//! back to the caller, which relays each through the same close path a
//! transport-level close would take — so roster/role cleanup runs
//! identically for both.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use roomcast_protocol::{CloseCode, ConnectionToken};
use roomcast_transport::ConnectionHandle;

use crate::RegistryConfig;

/// One live connection.
#[derive(Debug)]
struct ConnectionEntry {
    handle: ConnectionHandle,
    last_activity: Instant,
}

/// Tracks every live connection by its redeemed token.
pub struct ConnectionRegistry {
    config: RegistryConfig,
    connections: Mutex<HashMap<ConnectionToken, ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn locked(
        &self,
    ) -> MutexGuard<'_, HashMap<ConnectionToken, ConnectionEntry>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a freshly accepted connection under its token.
    ///
    /// A token can only be redeemed once, so a second registration for the
    /// same token means a stale entry survived somewhere; the old handle
    /// is force-closed and replaced.
    pub fn register(
        &self,
        token: ConnectionToken,
        handle: ConnectionHandle,
    ) {
        let mut connections = self.locked();

        if let Some(previous) = connections.insert(
            token.clone(),
            ConnectionEntry {
                handle,
                last_activity: Instant::now(),
            },
        ) {
            tracing::warn!(
                %token,
                id = %previous.handle.id(),
                "replacing existing connection for token"
            );
            let _ = previous
                .handle
                .close(CloseCode::Terminated, "connection replaced");
        }

        tracing::debug!(%token, "connection registered");
    }

    /// Records inbound activity for a token. No-op for unknown tokens.
    pub fn touch(&self, token: &ConnectionToken) {
        if let Some(entry) = self.locked().get_mut(token) {
            entry.last_activity = Instant::now();
        }
    }

    /// The live handle for a token, if any.
    pub fn get(&self, token: &ConnectionToken) -> Option<ConnectionHandle> {
        self.locked().get(token).map(|entry| entry.handle.clone())
    }

    /// Force-closes and removes a connection.
    ///
    /// Returns `true` if the token had an entry. Closing an already-gone
    /// connection is not an error — the entry is simply absent.
    pub fn close(
        &self,
        token: &ConnectionToken,
        code: CloseCode,
        reason: &str,
    ) -> bool {
        let Some(entry) = self.locked().remove(token) else {
            return false;
        };

        tracing::debug!(%token, %code, reason, "closing connection");
        let _ = entry.handle.close(code, reason);
        true
    }

    /// Force-closes and removes every connection idle past the stale
    /// window, returning their tokens.
    ///
    /// The caller relays each returned token through the owning room's
    /// close path, exactly as if the transport had reported a close.
    pub fn sweep_stale(&self) -> Vec<ConnectionToken> {
        let stale_after = self.config.stale_after;
        let mut swept = Vec::new();

        self.locked().retain(|token, entry| {
            if entry.last_activity.elapsed() > stale_after {
                tracing::info!(
                    %token,
                    id = %entry.handle.id(),
                    "reclaiming stale connection"
                );
                let _ = entry
                    .handle
                    .close(CloseCode::Terminated, "connection stale");
                swept.push(token.clone());
                false
            } else {
                true
            }
        });

        swept
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.locked().len()
    }

    /// Returns `true` if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    /// How often the stale sweep should run.
    pub fn sweep_interval(&self) -> std::time::Duration {
        self.config.sweep_interval
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use roomcast_transport::Frame;

    use super::*;

    fn registry_with_instant_staleness() -> ConnectionRegistry {
        ConnectionRegistry::new(RegistryConfig {
            stale_after: Duration::ZERO,
            ..RegistryConfig::default()
        })
    }

    fn registry_with_long_window() -> ConnectionRegistry {
        ConnectionRegistry::new(RegistryConfig {
            stale_after: Duration::from_secs(3600),
            ..RegistryConfig::default()
        })
    }

    fn token(s: &str) -> ConnectionToken {
        ConnectionToken::new(s)
    }

    #[test]
    fn test_register_and_get() {
        let registry = registry_with_long_window();
        let (handle, _rx) = ConnectionHandle::channel();

        registry.register(token("t1"), handle.clone());

        let found = registry.get(&token("t1")).expect("should be present");
        assert_eq!(found.id(), handle.id());
        assert!(registry.get(&token("t2")).is_none());
    }

    #[test]
    fn test_register_replaces_and_closes_previous_handle() {
        let registry = registry_with_long_window();
        let (old_handle, mut old_rx) = ConnectionHandle::channel();
        let (new_handle, _new_rx) = ConnectionHandle::channel();

        registry.register(token("t1"), old_handle);
        registry.register(token("t1"), new_handle.clone());

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&token("t1")).unwrap().id(),
            new_handle.id()
        );
        assert!(matches!(
            old_rx.try_recv(),
            Ok(Frame::Close { code: CloseCode::Terminated, .. })
        ));
    }

    #[test]
    fn test_close_sends_close_frame_and_removes_entry() {
        let registry = registry_with_long_window();
        let (handle, mut rx) = ConnectionHandle::channel();
        registry.register(token("t1"), handle);

        let had_entry = registry.close(
            &token("t1"),
            CloseCode::HostDisconnected,
            "host left",
        );

        assert!(had_entry);
        assert!(registry.is_empty());
        match rx.try_recv().unwrap() {
            Frame::Close { code, reason } => {
                assert_eq!(code, CloseCode::HostDisconnected);
                assert_eq!(reason, "host left");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn test_close_unknown_token_returns_false() {
        let registry = registry_with_long_window();
        assert!(!registry.close(
            &token("ghost"),
            CloseCode::Terminated,
            "gone"
        ));
    }

    #[test]
    fn test_sweep_reclaims_idle_connections() {
        let registry = registry_with_instant_staleness();
        let (handle, mut rx) = ConnectionHandle::channel();
        registry.register(token("t1"), handle);

        let swept = registry.sweep_stale();

        assert_eq!(swept, vec![token("t1")]);
        assert!(registry.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Ok(Frame::Close { code: CloseCode::Terminated, .. })
        ));
    }

    #[test]
    fn test_sweep_keeps_active_connections() {
        let registry = registry_with_long_window();
        let (handle, _rx) = ConnectionHandle::channel();
        registry.register(token("t1"), handle);

        assert!(registry.sweep_stale().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_touch_unknown_token_is_noop() {
        let registry = registry_with_long_window();
        registry.touch(&token("ghost"));
        assert!(registry.is_empty());
    }
}
