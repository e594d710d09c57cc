//! Boundary to the real-time media engine.
//!
//! The engine owns signaling, transport and codecs. Commands are
//! fire-and-forget; their completions and every engine callback come back
//! as [`EngineEvent`]s on a single ordered channel, which the orchestrator
//! consumes in arrival order.
//!
//! Each connect attempt carries a number chosen by the orchestrator. The
//! engine echoes it on every event belonging to that connection, so events
//! from an abandoned attempt can be told apart from the current one.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::broadcast::BroadcastPayload;
use crate::media::{
    AudioLevelSample, CameraFacing, Identity, MediaStream, PublishConstraints, RemoteParticipant,
    TrackKind,
};

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Create the channel an engine reports on.
pub fn event_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

/// Everything the engine can report. Engine failures carry the engine's
/// own message.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Connected {
        attempt: u64,
    },
    ConnectFailed {
        attempt: u64,
        reason: String,
    },
    Disconnected {
        attempt: u64,
        reason: Option<String>,
    },
    JoinCompleted {
        attempt: u64,
        result: Result<(), String>,
    },
    /// Completion of `publish`; carries the local stream on success.
    PublishCompleted(Result<MediaStream, String>),
    SubscribeCompleted {
        stream_id: String,
        result: Result<(), String>,
    },
    BroadcastCompleted {
        request_id: u64,
        result: Result<(), String>,
    },
    PeerJoined(RemoteParticipant),
    PeerLeft { peer_id: String },
    StreamAdded(MediaStream),
    StreamRemoved { stream_id: String },
    BroadcastReceived {
        from_peer: Option<String>,
        payload: BroadcastPayload,
    },
    AudioLevels(Vec<AudioLevelSample>),
}

/// Operations the orchestrator issues to the media engine.
///
/// Asynchronous operations return immediately and complete through an
/// [`EngineEvent`]. Local capture changes (`apply_constraints`,
/// `restart_capturer`, `set_track_enabled`) complete synchronously.
pub trait MediaEngine: Send + Sync {
    fn connect(&self, identity: &Identity, attempt: u64);
    fn join(&self, room_id: &str, attempt: u64);
    fn publish(&self, room_id: &str, constraints: &PublishConstraints);
    fn subscribe(&self, room_id: &str, stream_id: &str);
    fn apply_constraints(
        &self,
        stream_id: &str,
        constraints: &PublishConstraints,
    ) -> Result<(), String>;
    fn restart_capturer(&self, stream_id: &str, facing: CameraFacing) -> Result<(), String>;
    fn set_track_enabled(&self, stream_id: &str, kind: TrackKind, enabled: bool)
    -> Result<(), String>;
    fn set_audio_level_interval(&self, interval: Duration);
    fn broadcast(&self, room_id: &str, request_id: u64, payload: &BroadcastPayload);
    fn leave(&self, room_id: &str);
    fn disconnect(&self);
}
