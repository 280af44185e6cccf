//! The session room actor: one isolated Tokio task that owns one room.
//!
//! Everything that can touch a room's state — client joins and removals,
//! inbound messages, game-state mutation, termination, and the three
//! periodic loops (state-sync tick, heartbeat ping, disconnect detection)
//! — arrives as a branch of one `select!` loop. Nothing for the same room
//! ever runs concurrently with anything else for that room, so the diff
//! engine always compares against a consistent snapshot and no tick can
//! observe a half-applied roster change.
//!
//! Exiting the loop is what cancels the timers: `terminate` flips the
//! phase, closes every client connection, notifies the directory, and
//! breaks — after which no timer exists to fire.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use roomcast_protocol::{
    default_display_name, diff, now_unix_millis, validate_display_name,
    AccessCode, ClientId, CloseCode, Codec, ConnectionToken,
    CurrentTimePayload, Envelope, JsonCodec, MessageKind, PingPayload,
    SessionClient, SessionId, SessionState, HOST_DISPLAY_NAME,
};
use roomcast_session::{ConnectionRegistry, TokenPayload};
use roomcast_tick::TickScheduler;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::directory::DirectoryEvent;
use crate::{RoomConfig, RoomError, RoomPhase};

// ---------------------------------------------------------------------------
// Public message types
// ---------------------------------------------------------------------------

/// Join-time options, extracted from the redeemed token payload.
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    /// Requested display name. Ignored for the host, validated for
    /// everyone else.
    pub display_name: Option<String>,
}

impl JoinOptions {
    /// Pulls the known keys out of an arbitrary token payload.
    pub fn from_payload(payload: Option<&TokenPayload>) -> Self {
        let display_name = payload
            .and_then(|map| map.get("displayName"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        Self { display_name }
    }
}

/// An input command from the roster, forwarded opaquely to game logic.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerCommand {
    /// Who sent it. Game logic can check it against the controller slot.
    pub client_id: ClientId,
    /// The command payload, untouched by the core.
    pub payload: Value,
}

/// Receiving half for [`ControllerCommand`]s, held by game logic.
pub type CommandReceiver = mpsc::UnboundedReceiver<ControllerCommand>;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Operations the outside world can request from a room actor.
pub(crate) enum RoomCommand {
    /// Add a client to the roster.
    AddClient {
        token: ConnectionToken,
        options: JoinOptions,
        reply: oneshot::Sender<Result<SessionClient, RoomError>>,
    },

    /// An inbound wire message from a client.
    Inbound {
        token: ConnectionToken,
        envelope: Envelope,
    },

    /// The client's transport reported an error.
    ConnectionError {
        token: ConnectionToken,
        detail: String,
    },

    /// The client's transport closed.
    ConnectionClosed { token: ConnectionToken },

    /// Replace the opaque game-state document.
    SetGameState { game_state: Option<Value> },

    /// Install the sink that receives controller commands.
    SetCommandSink {
        sink: mpsc::UnboundedSender<ControllerCommand>,
    },

    /// Request a copy of the current session document.
    Snapshot {
        reply: oneshot::Sender<SessionState>,
    },

    /// Tear the room down.
    Terminate { code: CloseCode, reason: String },
}

// ---------------------------------------------------------------------------
// RoomHandle
// ---------------------------------------------------------------------------

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    session_id: SessionId,
    access_code: AccessCode,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// The room's unique id.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The room's join code.
    pub fn access_code(&self) -> &AccessCode {
        &self.access_code
    }

    /// Adds a client and returns its roster entry.
    pub async fn add_client(
        &self,
        token: ConnectionToken,
        options: JoinOptions,
    ) -> Result<SessionClient, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::AddClient {
                token,
                options,
                reply: reply_tx,
            })
            .await
            .map_err(|_| {
                RoomError::Unavailable(self.session_id.clone())
            })?;
        reply_rx.await.map_err(|_| {
            RoomError::Unavailable(self.session_id.clone())
        })?
    }

    /// Delivers an inbound wire message (fire-and-forget).
    pub async fn handle_message(
        &self,
        token: ConnectionToken,
        envelope: Envelope,
    ) {
        let _ = self
            .sender
            .send(RoomCommand::Inbound { token, envelope })
            .await;
    }

    /// Reports a transport error for a client. Runs the same roster
    /// cleanup as an explicit leave.
    pub async fn handle_error(
        &self,
        token: ConnectionToken,
        detail: String,
    ) {
        let _ = self
            .sender
            .send(RoomCommand::ConnectionError { token, detail })
            .await;
    }

    /// Reports a transport close for a client.
    pub async fn handle_close(&self, token: ConnectionToken) {
        let _ = self
            .sender
            .send(RoomCommand::ConnectionClosed { token })
            .await;
    }

    /// Replaces the opaque game-state document; the next sync tick
    /// broadcasts the change as a normal diff.
    pub async fn set_game_state(&self, game_state: Option<Value>) {
        let _ = self
            .sender
            .send(RoomCommand::SetGameState { game_state })
            .await;
    }

    /// Installs the game-logic sink for controller commands. Commands
    /// arriving while no sink is installed are logged and dropped.
    pub async fn set_command_sink(
        &self,
        sink: mpsc::UnboundedSender<ControllerCommand>,
    ) {
        let _ = self
            .sender
            .send(RoomCommand::SetCommandSink { sink })
            .await;
    }

    /// A copy of the current session document.
    pub async fn snapshot(&self) -> Result<SessionState, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| {
                RoomError::Unavailable(self.session_id.clone())
            })?;
        reply_rx.await.map_err(|_| {
            RoomError::Unavailable(self.session_id.clone())
        })
    }

    /// Tears the room down with the given close code and reason.
    pub async fn terminate(&self, code: CloseCode, reason: &str) {
        let _ = self
            .sender
            .send(RoomCommand::Terminate {
                code,
                reason: reason.to_string(),
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// The actor
// ---------------------------------------------------------------------------

/// Whether the actor loop keeps running after a command.
#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// Internal state of one room. Runs inside a Tokio task.
struct RoomActor {
    state: SessionState,
    phase: RoomPhase,
    config: RoomConfig,
    codec: JsonCodec,

    registry: Arc<ConnectionRegistry>,
    events: mpsc::UnboundedSender<DirectoryEvent>,
    receiver: mpsc::Receiver<RoomCommand>,

    scheduler: TickScheduler,
    ping_interval: tokio::time::Interval,
    disconnect_interval: tokio::time::Interval,

    /// Snapshot of the document as of the last successful broadcast
    /// comparison. `None` until the first tick.
    last_broadcast: Option<Value>,

    /// Clients that must receive one full snapshot before any delta.
    needs_full: HashSet<ClientId>,

    /// Always-maintained token → client-id cache, invalidated exactly on
    /// add/remove. Lookups never scan the roster.
    token_to_client: HashMap<ConnectionToken, ClientId>,

    last_ping_at: HashMap<ClientId, Instant>,
    last_pong_at: HashMap<ClientId, Instant>,

    /// Server-minus-client clock offset per client, for presentation.
    time_offset: HashMap<ClientId, i64>,

    command_sink: Option<mpsc::UnboundedSender<ControllerCommand>>,
}

impl RoomActor {
    fn new(
        session_id: SessionId,
        access_code: AccessCode,
        config: RoomConfig,
        registry: Arc<ConnectionRegistry>,
        events: mpsc::UnboundedSender<DirectoryEvent>,
        receiver: mpsc::Receiver<RoomCommand>,
    ) -> Self {
        let scheduler = TickScheduler::new(config.sync.clone());

        let start = tokio::time::Instant::now();
        let mut ping_interval = tokio::time::interval_at(
            start + config.ping_interval,
            config.ping_interval,
        );
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut disconnect_interval = tokio::time::interval_at(
            start + config.disconnect_check_interval,
            config.disconnect_check_interval,
        );
        disconnect_interval
            .set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            state: SessionState::new(
                session_id,
                access_code,
                now_unix_millis(),
            ),
            phase: RoomPhase::Active,
            config,
            codec: JsonCodec,
            registry,
            events,
            receiver,
            scheduler,
            ping_interval,
            disconnect_interval,
            last_broadcast: None,
            needs_full: HashSet::new(),
            token_to_client: HashMap::new(),
            last_ping_at: HashMap::new(),
            last_pong_at: HashMap::new(),
            time_offset: HashMap::new(),
            command_sink: None,
        }
    }

    /// Runs the actor loop until termination.
    async fn run(mut self) {
        tracing::info!(session_id = %self.state.id, "session started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd) == Flow::Stop {
                            break;
                        }
                    }
                    None => {
                        // Every handle dropped: dispose of the room.
                        self.terminate(
                            CloseCode::Terminated,
                            CloseCode::Terminated.default_reason(),
                        );
                        break;
                    }
                },
                _ = self.scheduler.wait_for_tick() => {
                    self.sync_tick();
                    self.scheduler.record_tick_end();
                }
                _ = self.ping_interval.tick() => {
                    eprintln!("DBG actor: ping tick");
                    self.send_ping_to_all();
                }
                _ = self.disconnect_interval.tick() => {
                    eprintln!("DBG actor: disconnect tick");
                    self.detect_disconnects();
                }
            }
        }

        tracing::info!(session_id = %self.state.id, "session stopped");
    }

    fn handle_command(&mut self, cmd: RoomCommand) -> Flow {
        match cmd {
            RoomCommand::AddClient {
                token,
                options,
                reply,
            } => {
                let result = self.add_client(token, options);
                let _ = reply.send(result);
                Flow::Continue
            }
            RoomCommand::Inbound { token, envelope } => {
                self.handle_inbound(token, envelope)
            }
            RoomCommand::ConnectionError { token, detail } => {
                tracing::debug!(
                    session_id = %self.state.id,
                    %token,
                    detail,
                    "client transport errored"
                );
                self.remove_client(&token)
            }
            RoomCommand::ConnectionClosed { token } => {
                self.remove_client(&token)
            }
            RoomCommand::SetGameState { game_state } => {
                self.state.game_state = game_state;
                Flow::Continue
            }
            RoomCommand::SetCommandSink { sink } => {
                self.command_sink = Some(sink);
                Flow::Continue
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.clone());
                Flow::Continue
            }
            RoomCommand::Terminate { code, reason } => {
                self.terminate(code, &reason)
            }
        }
    }

    // -- Roster ----------------------------------------------------------

    fn add_client(
        &mut self,
        token: ConnectionToken,
        options: JoinOptions,
    ) -> Result<SessionClient, RoomError> {
        if self.token_to_client.contains_key(&token) {
            return Err(RoomError::AlreadyJoined(token));
        }

        let join_order = self.state.client_count() + 1;
        let is_host = join_order == 1;
        let is_second = join_order == 2;

        // The host's name is reserved; everyone else either defaults by
        // join order or passes validation.
        let display_name = if is_host {
            HOST_DISPLAY_NAME.to_string()
        } else {
            match options.display_name {
                None => default_display_name(join_order),
                Some(name) => {
                    validate_display_name(&name)
                        .map_err(RoomError::InvalidDisplayName)?;
                    name
                }
            }
        };

        let mut client_id = ClientId::random();
        while self.state.clients.contains_key(&client_id) {
            client_id = ClientId::random();
        }

        let client = SessionClient::new(
            client_id.clone(),
            token.clone(),
            display_name,
            now_unix_millis(),
        );
        self.state.clients.insert(client_id.clone(), client.clone());
        self.token_to_client.insert(token, client_id.clone());

        if is_host {
            self.state.host_client_id = Some(client_id.clone());
        } else if is_second {
            self.state.controller_client_id = Some(client_id.clone());
        }

        // One full snapshot before any delta makes sense to this client.
        self.needs_full.insert(client_id.clone());

        tracing::info!(
            session_id = %self.state.id,
            client_id = %client_id,
            display_name = %client.display_name,
            clients = self.state.client_count(),
            host = is_host,
            "client joined"
        );

        // Learn the RTT and clock offset now rather than a full heartbeat
        // period from now.
        self.send_ping(&client_id);
        self.send_envelope(
            &client_id,
            &Envelope::bare(MessageKind::RequestCurrentTime),
        );

        Ok(client)
    }

    fn remove_client(&mut self, token: &ConnectionToken) -> Flow {
        let Some(client_id) = self.token_to_client.remove(token) else {
            tracing::debug!(
                session_id = %self.state.id,
                %token,
                "remove for unknown client token, ignoring"
            );
            return Flow::Continue;
        };

        let was_host = self.state.is_host(&client_id);
        let was_controller = self.state.is_controller(&client_id);

        self.state.remove_client(&client_id);
        self.needs_full.remove(&client_id);
        self.last_ping_at.remove(&client_id);
        self.last_pong_at.remove(&client_id);
        self.time_offset.remove(&client_id);

        tracing::info!(
            session_id = %self.state.id,
            client_id = %client_id,
            clients = self.state.client_count(),
            was_host,
            was_controller,
            "client removed"
        );

        if was_host {
            // No host migration: the room dies with its host.
            return self.terminate(
                CloseCode::HostDisconnected,
                CloseCode::HostDisconnected.default_reason(),
            );
        }

        if was_controller {
            let next = self
                .state
                .next_non_host_client()
                .map(|client| client.id.clone());
            if let Some(id) = &next {
                tracing::info!(
                    session_id = %self.state.id,
                    client_id = %id,
                    "controller promoted"
                );
            }
            self.state.controller_client_id = next;
        }

        Flow::Continue
    }

    // -- Inbound messages ------------------------------------------------

    fn handle_inbound(
        &mut self,
        token: ConnectionToken,
        envelope: Envelope,
    ) -> Flow {
        let Some(client_id) = self.token_to_client.get(&token).cloned()
        else {
            tracing::debug!(
                session_id = %self.state.id,
                %token,
                kind = %envelope.kind,
                "message from unknown client token, ignoring"
            );
            return Flow::Continue;
        };

        match envelope.kind {
            MessageKind::Pong => self.handle_pong(&client_id),
            MessageKind::Leave => return self.remove_client(&token),
            MessageKind::CurrentTime => {
                match envelope.payload_as::<CurrentTimePayload>() {
                    Ok(payload) => {
                        self.handle_current_time(&client_id, payload)
                    }
                    Err(error) => tracing::debug!(
                        session_id = %self.state.id,
                        client_id = %client_id,
                        %error,
                        "malformed current-time payload, ignoring"
                    ),
                }
            }
            MessageKind::ControllerCommand => {
                self.forward_controller_command(&client_id, envelope)
            }
            // Server-bound only from the other side, or unknown: drop.
            other => tracing::debug!(
                session_id = %self.state.id,
                client_id = %client_id,
                kind = %other,
                "unhandled message kind, ignoring"
            ),
        }

        Flow::Continue
    }

    fn handle_pong(&mut self, client_id: &ClientId) {
        let now = Instant::now();
        self.last_pong_at.insert(client_id.clone(), now);

        // 0 if no ping was recorded; anything above the heartbeat period
        // reports at the ceiling.
        let rtt_millis = self
            .last_ping_at
            .get(client_id)
            .map(|pinged| now.duration_since(*pinged).as_millis() as u64)
            .unwrap_or(0)
            .min(self.config.ping_ceiling_millis());

        if let Some(client) = self.state.clients.get_mut(client_id) {
            client.disconnected_at = 0;
            client.ping_millis = rtt_millis;
        }
    }

    fn handle_current_time(
        &mut self,
        client_id: &ClientId,
        payload: CurrentTimePayload,
    ) {
        let offset =
            now_unix_millis() as i64 - payload.current_time as i64;
        self.time_offset.insert(client_id.clone(), offset);

        tracing::debug!(
            session_id = %self.state.id,
            client_id = %client_id,
            offset_ms = offset,
            "client time offset recorded"
        );
    }

    fn forward_controller_command(
        &mut self,
        client_id: &ClientId,
        envelope: Envelope,
    ) {
        let Some(payload) = envelope.payload else {
            tracing::debug!(
                session_id = %self.state.id,
                client_id = %client_id,
                "controller command without payload, ignoring"
            );
            return;
        };

        let command = ControllerCommand {
            client_id: client_id.clone(),
            payload,
        };

        match &self.command_sink {
            Some(sink) => {
                if sink.send(command).is_err() {
                    tracing::debug!(
                        session_id = %self.state.id,
                        "command sink dropped, discarding command"
                    );
                    self.command_sink = None;
                }
            }
            None => tracing::debug!(
                session_id = %self.state.id,
                client_id = %client_id,
                "no command sink installed, discarding command"
            ),
        }
    }

    // -- State sync ------------------------------------------------------

    /// One execution of the fixed-rate state-sync loop.
    ///
    /// First tick: full snapshot to every current client, snapshot
    /// established. After that: a non-empty diff goes out as a delta to
    /// every synced client (joiners still waiting on their full snapshot
    /// are skipped); an empty diff sends the pending full snapshots, or
    /// nothing at all.
    fn sync_tick(&mut self) {
        let current = match serde_json::to_value(&self.state) {
            Ok(value) => value,
            Err(error) => {
                tracing::error!(
                    session_id = %self.state.id,
                    %error,
                    "failed to serialize session document"
                );
                return;
            }
        };

        let Some(last) = &self.last_broadcast else {
            let targets: Vec<ClientId> =
                self.state.clients.keys().cloned().collect();
            for client_id in &targets {
                self.send_full_state(client_id, &current);
            }
            self.needs_full.clear();
            self.last_broadcast = Some(current);
            return;
        };

        let delta = diff(last, &current);

        if !delta.is_empty() {
            let envelope =
                match Envelope::new(MessageKind::DeltaStateUpdate, &delta)
                {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        tracing::error!(
                            session_id = %self.state.id,
                            %error,
                            "failed to encode delta update"
                        );
                        return;
                    }
                };

            let targets: Vec<ClientId> = self
                .state
                .clients
                .keys()
                .filter(|id| !self.needs_full.contains(*id))
                .cloned()
                .collect();
            for client_id in &targets {
                self.send_envelope(client_id, &envelope);
            }

            self.last_broadcast = Some(current);
            return;
        }

        // Nothing changed; the only possible work is pending full pushes.
        if self.needs_full.is_empty() {
            return;
        }

        let targets: Vec<ClientId> =
            self.needs_full.drain().collect();
        for client_id in &targets {
            self.send_full_state(client_id, &current);
        }
    }

    fn send_full_state(&self, client_id: &ClientId, document: &Value) {
        let envelope = Envelope {
            kind: MessageKind::FullStateUpdate,
            payload: Some(document.clone()),
        };
        self.send_envelope(client_id, &envelope);
    }

    // -- Heartbeat and disconnect detection ------------------------------

    fn send_ping_to_all(&mut self) {
        let targets: Vec<ClientId> =
            self.state.clients.keys().cloned().collect();
        for client_id in &targets {
            self.send_ping(client_id);
        }
    }

    fn send_ping(&mut self, client_id: &ClientId) {
        self.last_ping_at
            .insert(client_id.clone(), Instant::now());

        match Envelope::new(MessageKind::Ping, &PingPayload::random()) {
            Ok(envelope) => self.send_envelope(client_id, &envelope),
            Err(error) => tracing::warn!(
                session_id = %self.state.id,
                %error,
                "failed to encode ping"
            ),
        }
    }

    /// Marks clients whose pongs stopped arriving as soft-disconnected.
    ///
    /// The marker is visible in the synced roster (`disconnectedAt`);
    /// removal only ever happens through `remove_client`.
    fn detect_disconnects(&mut self) {
        let now = Instant::now();
        let timeout = self.config.pong_timeout();

        for (client_id, client) in self.state.clients.iter_mut() {
            let Some(last_pong) = self.last_pong_at.get(client_id) else {
                eprintln!("DBG detect: no last_pong for {client_id}");
                continue;
            };
            eprintln!("DBG detect: elapsed={:?} timeout={:?}", now.duration_since(*last_pong), timeout);
            if now.duration_since(*last_pong) <= timeout {
                continue;
            }
            if client.disconnected_at == 0 {
                client.disconnected_at = now_unix_millis();
                tracing::info!(
                    session_id = %self.state.id,
                    client_id = %client_id,
                    "client soft-disconnected (missed heartbeats)"
                );
            }
        }
    }

    // -- Termination -----------------------------------------------------

    /// Closes every client connection, notifies the directory, and stops
    /// the actor. Idempotent: a second call is a no-op.
    fn terminate(&mut self, code: CloseCode, reason: &str) -> Flow {
        if !self.phase.is_active() {
            return Flow::Stop;
        }
        self.phase = RoomPhase::Terminated;

        tracing::info!(
            session_id = %self.state.id,
            %code,
            reason,
            clients = self.state.client_count(),
            "session terminating"
        );

        let tokens: Vec<ConnectionToken> = self
            .state
            .clients
            .values()
            .map(|client| client.connection_token.clone())
            .collect();

        for token in &tokens {
            self.registry.close(token, code, reason);
        }

        let _ = self.events.send(DirectoryEvent::SessionTerminated {
            session_id: self.state.id.clone(),
            access_code: self.state.access_code.clone(),
            tokens,
        });

        // Returning Stop breaks the actor loop, which drops all three
        // timers in one step — nothing can fire for this room again.
        Flow::Stop
    }

    // -- Sending ---------------------------------------------------------

    /// Best-effort send to one client, resolved through the registry by
    /// connection token. A missing client, missing handle, or dead writer
    /// is logged and swallowed — never queued, never retried.
    fn send_envelope(&self, client_id: &ClientId, envelope: &Envelope) {
        let bytes = match self.codec.encode(envelope) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(
                    session_id = %self.state.id,
                    %error,
                    "failed to encode outbound message"
                );
                return;
            }
        };

        let Some(client) = self.state.clients.get(client_id) else {
            tracing::debug!(
                session_id = %self.state.id,
                client_id = %client_id,
                "send to unknown client, dropping"
            );
            return;
        };

        let Some(handle) =
            self.registry.get(&client.connection_token)
        else {
            tracing::debug!(
                session_id = %self.state.id,
                client_id = %client_id,
                "no live connection for client, dropping message"
            );
            return;
        };

        if handle.send(bytes).is_err() {
            tracing::debug!(
                session_id = %self.state.id,
                client_id = %client_id,
                "connection writer gone, dropping message"
            );
        }
    }
}

/// Spawns a new room actor task and returns its handle.
pub(crate) fn spawn_room(
    session_id: SessionId,
    access_code: AccessCode,
    config: RoomConfig,
    registry: Arc<ConnectionRegistry>,
    events: mpsc::UnboundedSender<DirectoryEvent>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer);

    let actor = RoomActor::new(
        session_id.clone(),
        access_code.clone(),
        config,
        registry,
        events,
        rx,
    );

    tokio::spawn(actor.run());

    RoomHandle {
        session_id,
        access_code,
        sender: tx,
    }
}

// =========================================================================
// Tests
// =========================================================================
