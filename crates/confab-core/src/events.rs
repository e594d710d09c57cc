use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::broadcast::BroadcastMessage;
use crate::errors::SessionError;
use crate::media::{AudioLevelSample, MediaStream, RemoteParticipant};

/// Events emitted by the orchestrator to UI listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    PeerJoined(RemoteParticipant),
    PeerLeft(String), // peer id
    StreamAdded(MediaStream),
    StreamRemoved(String), // stream id
    LocalStreamPublished(MediaStream),
    BroadcastReceived(BroadcastMessage),
    AudioLevels(Vec<AudioLevelSample>),
    Error(SessionError),
}

/// Lifecycle of one session.
///
/// `Joining` is the connected-but-not-yet-joined step. `Joined` is also the
/// degraded state after a failed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Joining,
    Joined,
    Publishing,
    Active,
    Leaving,
    Closed,
}

impl SessionState {
    /// States in which roster, stream and message events are applied.
    pub fn is_in_room(&self) -> bool {
        matches!(
            self,
            SessionState::Joining
                | SessionState::Joined
                | SessionState::Publishing
                | SessionState::Active
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Trait for receiving events from the orchestrator.
/// Implementations must be Send + Sync (called from the session task).
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Dispatches events to registered listeners, in registration order.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
