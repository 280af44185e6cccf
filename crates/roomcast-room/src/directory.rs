//! The session directory: creates rooms, resolves them by id, access code,
//! or connection token, and relays connection events to the owning room.
//!
//! The directory owns three maps — sessions by id, access-code → id, and
//! token → id — behind a single mutex, taken briefly and never across an
//! await. Rooms never call back into the directory; when a room
//! terminates, its actor emits a [`DirectoryEvent`] that the directory's
//! event pump consumes to drop the room from every map. After that the
//! room is unresolvable, and relays for its tokens fall through as no-ops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use roomcast_protocol::{
    AccessCode, ConnectionToken, Envelope, SessionClient, SessionId,
};
use roomcast_session::ConnectionRegistry;
use tokio::sync::mpsc;

use crate::room::{spawn_room, JoinOptions, RoomHandle};
use crate::{RoomConfig, RoomError};

/// How many times id/access-code generation retries before giving up.
const MAX_ALLOC_ATTEMPTS: usize = 16;

/// What a room reports back to the directory.
///
/// An explicit message type rather than a callback closure: the event pump
/// is the only writer that removes rooms, and nothing captures directory
/// state inside a room.
#[derive(Debug)]
pub enum DirectoryEvent {
    /// The room terminated; drop it from every map.
    SessionTerminated {
        session_id: SessionId,
        access_code: AccessCode,
        /// Tokens of the clients that were still connected, so their
        /// token → session mappings die with the room.
        tokens: Vec<ConnectionToken>,
    },
}

/// Receiving half of the directory's event channel.
pub type DirectoryEvents = mpsc::UnboundedReceiver<DirectoryEvent>;

struct DirectoryInner {
    sessions: HashMap<SessionId, RoomHandle>,
    access_codes: HashMap<AccessCode, SessionId>,
    token_sessions: HashMap<ConnectionToken, SessionId>,
}

/// Creates and resolves session rooms.
pub struct SessionDirectory {
    config: RoomConfig,
    registry: Arc<ConnectionRegistry>,
    events_tx: mpsc::UnboundedSender<DirectoryEvent>,
    inner: Mutex<DirectoryInner>,
}

impl SessionDirectory {
    /// Creates an empty directory.
    ///
    /// The returned [`DirectoryEvents`] stream must be drained — pass it
    /// to [`Self::drive_events`] (the server spawns that as a task) or
    /// feed [`Self::process_event`] directly in tests.
    pub fn new(
        config: RoomConfig,
        registry: Arc<ConnectionRegistry>,
    ) -> (Self, DirectoryEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                registry,
                events_tx,
                inner: Mutex::new(DirectoryInner {
                    sessions: HashMap::new(),
                    access_codes: HashMap::new(),
                    token_sessions: HashMap::new(),
                }),
            },
            events_rx,
        )
    }

    fn locked(&self) -> MutexGuard<'_, DirectoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Session creation and lookup -------------------------------------

    /// Creates a new session with a unique id and a unique 6-digit access
    /// code, and starts its actor.
    ///
    /// # Errors
    /// [`RoomError::CreateFailed`] if no free id or access code was found
    /// within the retry bound — surfaced to the caller instead of looping
    /// forever.
    pub fn create_session(&self) -> Result<RoomHandle, RoomError> {
        let mut inner = self.locked();

        let session_id = (0..MAX_ALLOC_ATTEMPTS)
            .map(|_| SessionId::random())
            .find(|id| !inner.sessions.contains_key(id))
            .ok_or(RoomError::CreateFailed)?;

        let access_code = (0..MAX_ALLOC_ATTEMPTS)
            .map(|_| AccessCode::random())
            .find(|code| !inner.access_codes.contains_key(code))
            .ok_or(RoomError::CreateFailed)?;

        let handle = spawn_room(
            session_id.clone(),
            access_code.clone(),
            self.config.clone(),
            Arc::clone(&self.registry),
            self.events_tx.clone(),
        );

        inner
            .access_codes
            .insert(access_code.clone(), session_id.clone());
        inner.sessions.insert(session_id.clone(), handle.clone());

        tracing::info!(
            %session_id,
            %access_code,
            sessions = inner.sessions.len(),
            "session created"
        );

        Ok(handle)
    }

    /// Looks a session up by id.
    pub fn get_session(&self, session_id: &SessionId) -> Option<RoomHandle> {
        self.locked().sessions.get(session_id).cloned()
    }

    /// Looks a session up by its access code.
    pub fn get_session_by_access_code(
        &self,
        access_code: &AccessCode,
    ) -> Option<RoomHandle> {
        let inner = self.locked();
        let session_id = inner.access_codes.get(access_code)?;
        inner.sessions.get(session_id).cloned()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.locked().sessions.len()
    }

    // -- Joining ---------------------------------------------------------

    /// Adds the client behind `token` to a session.
    ///
    /// The token → session mapping is reserved *before* the room round
    /// trip and rolled back on failure, so two racing joins with the same
    /// token cannot both get in.
    ///
    /// # Errors
    /// - [`RoomError::SessionNotFound`] — no such session.
    /// - [`RoomError::AlreadyJoined`] — the token is already mapped.
    /// - Whatever [`RoomHandle::add_client`] rejects (bad display name).
    pub async fn join_session(
        &self,
        session_id: &SessionId,
        token: ConnectionToken,
        options: JoinOptions,
    ) -> Result<SessionClient, RoomError> {
        let handle = {
            let mut inner = self.locked();

            let handle = inner
                .sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| {
                    RoomError::SessionNotFound(session_id.clone())
                })?;

            if inner.token_sessions.contains_key(&token) {
                return Err(RoomError::AlreadyJoined(token));
            }
            inner
                .token_sessions
                .insert(token.clone(), session_id.clone());

            handle
        };

        match handle.add_client(token.clone(), options).await {
            Ok(client) => Ok(client),
            Err(error) => {
                self.locked().token_sessions.remove(&token);
                Err(error)
            }
        }
    }

    // -- Connection-event relays -----------------------------------------

    /// Relays an inbound message to the room owning `token`. No-op if the
    /// token is not currently mapped (already left or terminated).
    pub async fn handle_message(
        &self,
        token: &ConnectionToken,
        envelope: Envelope,
    ) {
        let Some(handle) = self.session_for_token(token) else {
            tracing::trace!(%token, "message for unmapped token, ignoring");
            return;
        };
        handle.handle_message(token.clone(), envelope).await;
    }

    /// Relays a transport error to the room owning `token`.
    pub async fn handle_error(
        &self,
        token: &ConnectionToken,
        detail: String,
    ) {
        let Some(handle) = self.session_for_token(token) else {
            tracing::trace!(%token, "error for unmapped token, ignoring");
            return;
        };
        handle.handle_error(token.clone(), detail).await;
    }

    /// Relays a transport close to the room owning `token` and drops the
    /// token → session mapping. The stale-connection sweep reclaims
    /// connections through this exact path.
    pub async fn handle_close(&self, token: &ConnectionToken) {
        let handle = {
            let mut inner = self.locked();
            let Some(session_id) = inner.token_sessions.remove(token)
            else {
                tracing::trace!(
                    %token,
                    "close for unmapped token, ignoring"
                );
                return;
            };
            inner.sessions.get(&session_id).cloned()
        };

        if let Some(handle) = handle {
            handle.handle_close(token.clone()).await;
        }
    }

    fn session_for_token(
        &self,
        token: &ConnectionToken,
    ) -> Option<RoomHandle> {
        let inner = self.locked();
        let session_id = inner.token_sessions.get(token)?;
        inner.sessions.get(session_id).cloned()
    }

    // -- Room events -----------------------------------------------------

    /// Applies one room event. Missing entries mean the room was already
    /// handled — not an error.
    pub fn process_event(&self, event: DirectoryEvent) {
        match event {
            DirectoryEvent::SessionTerminated {
                session_id,
                access_code,
                tokens,
            } => {
                let mut inner = self.locked();
                inner.sessions.remove(&session_id);
                inner.access_codes.remove(&access_code);
                for token in &tokens {
                    inner.token_sessions.remove(token);
                }

                tracing::info!(
                    %session_id,
                    %access_code,
                    sessions = inner.sessions.len(),
                    "session removed from directory"
                );
            }
        }
    }

    /// Drains room events until every sender is gone. The server spawns
    /// this once next to the accept loop.
    pub async fn drive_events(
        self: Arc<Self>,
        mut events: DirectoryEvents,
    ) {
        while let Some(event) = events.recv().await {
            self.process_event(event);
        }
    }
}
