use std::collections::HashMap;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};

use crate::auth::TokenClient;
use crate::broadcast::{
    BroadcastAck, BroadcastChannel, BroadcastMessage, BroadcastPayload, MessageLog,
    validate_payload,
};
use crate::config::SessionConfig;
use crate::engine::{EngineEvent, EngineEventReceiver, MediaEngine};
use crate::errors::SessionError;
use crate::events::{EventEmitter, SessionEvent, SessionListener, SessionState};
use crate::media::{
    AudioLevelSample, Identity, MediaStream, PublishConstraints, RemoteParticipant,
};
use crate::reconcile::SettingsReconciler;
use crate::roster::{RosterRegistry, StreamAdd};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    Connect {
        identity: Identity,
        reply: Reply<()>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    Reconfigure {
        constraints: PublishConstraints,
        reply: Reply<()>,
    },
    Broadcast {
        payload: BroadcastPayload,
        reply: Reply<BroadcastAck>,
    },
    Query(Query),
}

enum Query {
    Participants(oneshot::Sender<Vec<RemoteParticipant>>),
    RemoteStreams(oneshot::Sender<Vec<MediaStream>>),
    LocalStream(oneshot::Sender<Option<MediaStream>>),
    Constraints(oneshot::Sender<PublishConstraints>),
    Resolve {
        stream_id: String,
        reply: oneshot::Sender<Option<RemoteParticipant>>,
    },
    AudioLevels(oneshot::Sender<Vec<AudioLevelSample>>),
    Messages(oneshot::Sender<Vec<BroadcastMessage>>),
}

/// Cloneable handle to a running session.
///
/// Every method hands off to the session task through a queue, so calls
/// from any thread are serialized with engine callbacks.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    emitter: EventEmitter,
    room_id: Arc<str>,
    config: Arc<SessionConfig>,
}

impl SessionHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Resolve once the state satisfies `predicate`.
    pub async fn wait_for_state(
        &self,
        mut predicate: impl FnMut(SessionState) -> bool,
    ) -> Result<SessionState, SessionError> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| predicate(*s))
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(*reached)
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.emitter.add_listener(listener);
    }

    /// Create a BroadcastChannel bound to this session.
    pub fn broadcast_channel(&self) -> BroadcastChannel {
        BroadcastChannel::new(self.clone())
    }

    /// Fetch a token for this room, then connect as `display_name`.
    ///
    /// Token errors keep their kind; nothing is retried.
    pub async fn setup(&self, tokens: &TokenClient, display_name: &str) -> Result<(), SessionError> {
        let token = tokens
            .fetch_token(
                &self.config.endpoint,
                &self.config.auth_service_url,
                &self.room_id,
                display_name,
            )
            .await?;
        self.connect(Identity {
            display_name: display_name.to_string(),
            auth_token: token.secret().clone(),
        })
        .await
    }

    /// Start connecting. Resolves once the engine was asked to connect;
    /// the rest of the lifecycle is reported through state changes.
    pub async fn connect(&self, identity: Identity) -> Result<(), SessionError> {
        self.request(|reply| Command::Connect { identity, reply }).await?
    }

    /// Leave the room and close the session. Idempotent.
    pub async fn leave(&self) -> Result<(), SessionError> {
        match self.request(|reply| Command::Leave { reply }).await {
            Ok(()) | Err(SessionError::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Apply new constraints to the published local stream.
    pub async fn reconfigure(&self, constraints: PublishConstraints) -> Result<(), SessionError> {
        self.request(|reply| Command::Reconfigure { constraints, reply })
            .await?
    }

    pub(crate) async fn broadcast(
        &self,
        payload: BroadcastPayload,
    ) -> Result<BroadcastAck, SessionError> {
        self.request(|reply| Command::Broadcast { payload, reply })
            .await?
    }

    pub async fn participants(&self) -> Result<Vec<RemoteParticipant>, SessionError> {
        self.query(Query::Participants).await
    }

    pub async fn remote_streams(&self) -> Result<Vec<MediaStream>, SessionError> {
        self.query(Query::RemoteStreams).await
    }

    pub async fn local_stream(&self) -> Result<Option<MediaStream>, SessionError> {
        self.query(Query::LocalStream).await
    }

    pub async fn constraints(&self) -> Result<PublishConstraints, SessionError> {
        self.query(Query::Constraints).await
    }

    pub async fn resolve_participant(
        &self,
        stream_id: &str,
    ) -> Result<Option<RemoteParticipant>, SessionError> {
        let stream_id = stream_id.to_string();
        self.query(|reply| Query::Resolve { stream_id, reply }).await
    }

    /// Latest audio level per stream, ordered by stream id.
    pub async fn audio_levels(&self) -> Result<Vec<AudioLevelSample>, SessionError> {
        self.query(Query::AudioLevels).await
    }

    pub async fn messages(&self) -> Result<Vec<BroadcastMessage>, SessionError> {
        self.query(Query::Messages).await
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Query,
    ) -> Result<T, SessionError> {
        self.request(|reply| Command::Query(make(reply))).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Owns one session's lifecycle state machine.
///
/// Runs as a single task consuming engine events and handle commands.
/// Pending engine events are always handled before the next command.
pub struct SessionOrchestrator {
    engine: Arc<dyn MediaEngine>,
    room_id: String,
    config: Arc<SessionConfig>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    emitter: EventEmitter,
    identity: Option<Identity>,
    constraints: PublishConstraints,
    local_stream: Option<MediaStream>,
    roster: RosterRegistry,
    audio_levels: HashMap<String, AudioLevelSample>,
    messages: MessageLog,
    pending_broadcasts: HashMap<u64, Reply<BroadcastAck>>,
    next_request_id: u64,
    connect_deadline: Option<Instant>,
    /// Number of the latest connect attempt; 0 before the first.
    attempt: u64,
}

impl SessionOrchestrator {
    /// Spawn the session task on the current tokio runtime.
    ///
    /// `events` must be the channel `engine` reports on.
    pub fn spawn(
        engine: Arc<dyn MediaEngine>,
        events: EngineEventReceiver,
        room_id: impl Into<String>,
        config: SessionConfig,
        constraints: PublishConstraints,
    ) -> SessionHandle {
        let room_id = room_id.into();
        let config = Arc::new(config);
        let emitter = EventEmitter::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let orchestrator = Self {
            engine,
            room_id: room_id.clone(),
            config: config.clone(),
            state: SessionState::Idle,
            state_tx,
            emitter: emitter.clone(),
            identity: None,
            constraints,
            local_stream: None,
            roster: RosterRegistry::new(),
            audio_levels: HashMap::new(),
            messages: MessageLog::new(config.message_log_capacity),
            pending_broadcasts: HashMap::new(),
            next_request_id: 1,
            connect_deadline: None,
            attempt: 0,
        };
        tokio::spawn(orchestrator.run(commands_rx, events));

        SessionHandle {
            commands: commands_tx,
            state: state_rx,
            emitter,
            room_id: Arc::from(room_id),
            config,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: EngineEventReceiver,
    ) {
        let mut engine_open = true;
        loop {
            let deadline = self.connect_deadline;
            tokio::select! {
                biased;

                event = events.recv(), if engine_open => match event {
                    Some(event) => self.handle_engine_event(event),
                    None => {
                        engine_open = false;
                        if !self.state.is_terminal() {
                            self.terminate("engine event channel closed");
                        }
                    }
                },

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_connect_timeout();
                }
            }
        }

        // Every handle is gone.
        self.leave();
        tracing::info!("session task for room {} ended", self.room_id);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { identity, reply } => {
                let _ = reply.send(self.connect(identity));
            }
            Command::Leave { reply } => {
                self.leave();
                let _ = reply.send(());
            }
            Command::Reconfigure { constraints, reply } => {
                let _ = reply.send(self.reconfigure(constraints));
            }
            Command::Broadcast { payload, reply } => self.broadcast(payload, reply),
            Command::Query(query) => self.answer(query),
        }
    }

    fn answer(&self, query: Query) {
        match query {
            Query::Participants(reply) => {
                let _ = reply.send(self.roster.participants().to_vec());
            }
            Query::RemoteStreams(reply) => {
                let _ = reply.send(self.roster.streams().to_vec());
            }
            Query::LocalStream(reply) => {
                let _ = reply.send(self.local_stream.clone());
            }
            Query::Constraints(reply) => {
                let _ = reply.send(self.constraints.clone());
            }
            Query::Resolve { stream_id, reply } => {
                let _ = reply.send(self.roster.resolve_participant(&stream_id).cloned());
            }
            Query::AudioLevels(reply) => {
                let mut levels: Vec<_> = self.audio_levels.values().cloned().collect();
                levels.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
                let _ = reply.send(levels);
            }
            Query::Messages(reply) => {
                let _ = reply.send(self.messages.to_vec());
            }
        }
    }

    fn connect(&mut self, identity: Identity) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid_state("connect"));
        }
        if identity.auth_token.expose_secret().is_empty() {
            return Err(SessionError::Config("auth token is empty".into()));
        }
        self.constraints.validate()?;

        tracing::info!(
            "connecting to room {} as {}",
            self.room_id,
            identity.display_name
        );
        self.attempt += 1;
        self.set_state(SessionState::Connecting);
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout());
        self.engine.connect(&identity, self.attempt);
        self.identity = Some(identity);
        Ok(())
    }

    fn leave(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let previous = self.state;
        self.set_state(SessionState::Leaving);
        if previous.is_in_room() {
            self.engine.leave(&self.room_id);
        }
        if previous != SessionState::Idle {
            self.engine.disconnect();
        }
        self.close();
    }

    fn reconfigure(&mut self, next: PublishConstraints) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Err(self.invalid_state("reconfigure"));
        }
        let Some(stream) = self.local_stream.as_ref() else {
            return Err(self.invalid_state("reconfigure"));
        };
        SettingsReconciler::apply(self.engine.as_ref(), stream, &self.constraints, &next)?;
        tracing::info!("local stream {} reconfigured", stream.stream_id);
        self.constraints = next;
        Ok(())
    }

    fn broadcast(&mut self, payload: BroadcastPayload, reply: Reply<BroadcastAck>) {
        if !matches!(
            self.state,
            SessionState::Joined | SessionState::Publishing | SessionState::Active
        ) {
            let _ = reply.send(Err(self.invalid_state("broadcast")));
            return;
        }
        if let Err(e) = validate_payload(&payload) {
            let _ = reply.send(Err(e));
            return;
        }
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending_broadcasts.insert(request_id, reply);
        self.engine.broadcast(&self.room_id, request_id, &payload);
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        if self.state.is_terminal() || self.state == SessionState::Leaving {
            tracing::debug!("ignoring engine event in state {}: {event:?}", self.state);
            return;
        }
        match event {
            EngineEvent::Connected { attempt } => {
                if self.is_current(attempt, "Connected") {
                    self.on_connected();
                }
            }
            EngineEvent::ConnectFailed { attempt, reason } => {
                if self.is_current(attempt, "ConnectFailed") {
                    self.on_connect_failed(reason);
                }
            }
            EngineEvent::Disconnected { attempt, reason } => self.on_disconnected(attempt, reason),
            EngineEvent::JoinCompleted { attempt, result } => {
                if self.is_current(attempt, "JoinCompleted") {
                    self.on_join_completed(result);
                }
            }
            EngineEvent::PublishCompleted(result) => self.on_publish_completed(result),
            EngineEvent::SubscribeCompleted { stream_id, result } => {
                self.on_subscribe_completed(stream_id, result)
            }
            EngineEvent::BroadcastCompleted { request_id, result } => {
                if let Some(reply) = self.pending_broadcasts.remove(&request_id) {
                    let result = result
                        .map(|()| BroadcastAck { request_id })
                        .map_err(|e| SessionError::Engine(format!("broadcast: {e}")));
                    let _ = reply.send(result);
                }
            }
            room_event => self.on_room_event(room_event),
        }
    }

    fn is_current(&self, attempt: u64, what: &str) -> bool {
        if attempt != self.attempt {
            tracing::debug!(
                "ignoring {what} of connect attempt {attempt}, current is {}",
                self.attempt
            );
            return false;
        }
        true
    }

    fn on_connected(&mut self) {
        if self.state != SessionState::Connecting {
            tracing::debug!("ignoring Connected in state {}", self.state);
            return;
        }
        self.set_state(SessionState::Joining);
        self.engine.join(&self.room_id, self.attempt);
    }

    fn on_connect_failed(&mut self, reason: String) {
        if !matches!(self.state, SessionState::Connecting | SessionState::Joining) {
            tracing::debug!("ignoring ConnectFailed in state {}", self.state);
            return;
        }
        tracing::warn!("connect to room {} failed: {reason}", self.room_id);
        self.reset_to_idle();
        self.emitter.emit(SessionEvent::Error(SessionError::Engine(format!(
            "connect failed: {reason}"
        ))));
    }

    fn on_join_completed(&mut self, result: Result<(), String>) {
        if self.state != SessionState::Joining {
            tracing::debug!("ignoring JoinCompleted in state {}", self.state);
            return;
        }
        match result {
            Ok(()) => {
                self.connect_deadline = None;
                self.set_state(SessionState::Joined);
                self.engine
                    .set_audio_level_interval(self.constraints.audio_level_interval);
                self.publish_local();
            }
            Err(reason) => {
                tracing::warn!("join of room {} failed: {reason}", self.room_id);
                self.engine.disconnect();
                self.reset_to_idle();
                self.emitter.emit(SessionEvent::Error(SessionError::Engine(format!(
                    "join failed: {reason}"
                ))));
            }
        }
    }

    fn publish_local(&mut self) {
        if !self.constraints.publishes_anything() {
            tracing::info!("audio and video disabled, joining without local media");
            return;
        }
        self.set_state(SessionState::Publishing);
        self.engine.publish(&self.room_id, &self.constraints);
    }

    fn on_publish_completed(&mut self, result: Result<MediaStream, String>) {
        if self.state != SessionState::Publishing {
            tracing::debug!("ignoring PublishCompleted in state {}", self.state);
            return;
        }
        match result {
            Ok(stream) => {
                tracing::info!("local stream {} published", stream.stream_id);
                self.local_stream = Some(stream.clone());
                self.set_state(SessionState::Active);
                self.emitter.emit(SessionEvent::LocalStreamPublished(stream));
            }
            Err(reason) => {
                tracing::warn!("publish failed, staying joined without local media: {reason}");
                self.set_state(SessionState::Joined);
                self.emitter.emit(SessionEvent::Error(SessionError::Engine(format!(
                    "publish failed: {reason}"
                ))));
            }
        }
    }

    fn on_subscribe_completed(&mut self, stream_id: String, result: Result<(), String>) {
        match result {
            Ok(()) => tracing::debug!("subscribed to stream {stream_id}"),
            Err(reason) => {
                if self.roster.stream(&stream_id).is_none() {
                    return;
                }
                tracing::warn!("subscribe to stream {stream_id} failed: {reason}");
                self.emitter.emit(SessionEvent::Error(SessionError::Engine(format!(
                    "subscribe {stream_id}: {reason}"
                ))));
            }
        }
    }

    fn on_disconnected(&mut self, attempt: u64, reason: Option<String>) {
        // Idle means this session already tore the connection down itself.
        if self.state == SessionState::Idle {
            tracing::debug!("ignoring Disconnected in state {}", self.state);
            return;
        }
        if self.is_current(attempt, "Disconnected") {
            self.terminate(reason.as_deref().unwrap_or("no reason given"));
        }
    }

    /// The connection is gone for good; report it and close.
    fn terminate(&mut self, reason: &str) {
        tracing::info!("room {} disconnected: {reason}", self.room_id);
        self.emitter.emit(SessionEvent::Error(SessionError::Engine(format!(
            "disconnected: {reason}"
        ))));
        self.set_state(SessionState::Leaving);
        self.close();
    }

    fn on_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if !matches!(self.state, SessionState::Connecting | SessionState::Joining) {
            return;
        }
        let timeout_ms = self.config.connect_timeout_ms;
        tracing::warn!("connect to room {} timed out after {timeout_ms}ms", self.room_id);
        self.engine.disconnect();
        self.reset_to_idle();
        self.emitter.emit(SessionEvent::Error(SessionError::Engine(format!(
            "connect timed out after {timeout_ms}ms"
        ))));
    }

    /// Roster, stream, message and audio-level events.
    fn on_room_event(&mut self, event: EngineEvent) {
        if !self.state.is_in_room() {
            tracing::debug!("ignoring room event in state {}: {event:?}", self.state);
            return;
        }
        match event {
            EngineEvent::PeerJoined(peer) => {
                if self.roster.on_peer_join(peer.clone()) {
                    tracing::info!("peer joined: {} ({})", peer.display_name, peer.peer_id);
                    self.emitter.emit(SessionEvent::PeerJoined(peer));
                }
            }
            EngineEvent::PeerLeft { peer_id } => match self.roster.on_peer_leave(&peer_id) {
                Some(purged) => {
                    for stream in purged {
                        self.audio_levels.remove(&stream.stream_id);
                        self.emitter
                            .emit(SessionEvent::StreamRemoved(stream.stream_id));
                    }
                    tracing::info!("peer left: {peer_id}");
                    self.emitter.emit(SessionEvent::PeerLeft(peer_id));
                }
                None => tracing::debug!("PeerLeft for unknown peer {peer_id}"),
            },
            EngineEvent::StreamAdded(stream) => {
                match self.roster.on_stream_add(stream.clone()) {
                    StreamAdd::Added => {
                        self.engine.subscribe(&self.room_id, &stream.stream_id);
                        self.emitter.emit(SessionEvent::StreamAdded(stream));
                    }
                    StreamAdd::Duplicate => {
                        tracing::debug!("duplicate StreamAdded {}", stream.stream_id)
                    }
                    StreamAdd::UnknownOwner => tracing::warn!(
                        "dropping stream {} of unknown peer {}",
                        stream.stream_id,
                        stream.owner_id
                    ),
                }
            }
            EngineEvent::StreamRemoved { stream_id } => {
                if self.roster.on_stream_remove(&stream_id).is_some() {
                    self.audio_levels.remove(&stream_id);
                    self.emitter.emit(SessionEvent::StreamRemoved(stream_id));
                }
            }
            EngineEvent::BroadcastReceived { from_peer, payload } => {
                let message = BroadcastMessage {
                    id: uuid::Uuid::new_v4().to_string(),
                    from_peer,
                    payload,
                    received_at_ms: u64::try_from(chrono::Utc::now().timestamp_millis())
                        .unwrap_or_default(),
                };
                self.messages.push(message.clone());
                self.emitter.emit(SessionEvent::BroadcastReceived(message));
            }
            EngineEvent::AudioLevels(samples) => {
                let local_id = self.local_stream.as_ref().map(|s| s.stream_id.as_str());
                let known: Vec<AudioLevelSample> = samples
                    .into_iter()
                    .filter(|s| {
                        Some(s.stream_id.as_str()) == local_id
                            || self.roster.stream(&s.stream_id).is_some()
                    })
                    .collect();
                if known.is_empty() {
                    return;
                }
                for sample in &known {
                    self.audio_levels
                        .insert(sample.stream_id.clone(), sample.clone());
                }
                self.emitter.emit(SessionEvent::AudioLevels(known));
            }
            other => tracing::debug!("unhandled engine event: {other:?}"),
        }
    }

    fn reset_to_idle(&mut self) {
        self.connect_deadline = None;
        self.identity = None;
        self.roster.clear();
        self.audio_levels.clear();
        self.set_state(SessionState::Idle);
    }

    fn close(&mut self) {
        self.connect_deadline = None;
        self.roster.clear();
        self.local_stream = None;
        self.audio_levels.clear();
        self.messages.clear();
        for (_, reply) in self.pending_broadcasts.drain() {
            let _ = reply.send(Err(SessionError::Closed));
        }
        self.set_state(SessionState::Closed);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::info!("room {}: {} -> {}", self.room_id, self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        self.emitter.emit(SessionEvent::StateChanged(state));
    }

    fn invalid_state(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }
}
