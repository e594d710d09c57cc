use std::sync::Mutex;
use std::time::Duration;

use crate::broadcast::BroadcastPayload;
use crate::engine::{EngineEvent, EngineEventReceiver, EngineEventSender, MediaEngine, event_channel};
use crate::media::{CameraFacing, Identity, MediaStream, PublishConstraints, TrackKind};

/// In-process engine that accepts every operation immediately.
///
/// No media flows. Useful for driving the session layer without a real
/// backend; remote activity can be simulated with [`LoopbackEngine::inject`].
pub struct LoopbackEngine {
    events: EngineEventSender,
    local_peer_id: String,
    audio_level_interval: Mutex<Option<Duration>>,
}

impl LoopbackEngine {
    pub fn new() -> (Self, EngineEventReceiver) {
        let (events, rx) = event_channel();
        let engine = Self {
            events,
            local_peer_id: uuid::Uuid::new_v4().to_string(),
            audio_level_interval: Mutex::new(None),
        };
        (engine, rx)
    }

    /// Deliver an event as if the backend produced it.
    pub fn inject(&self, event: EngineEvent) {
        self.emit(event);
    }

    pub fn audio_level_interval(&self) -> Option<Duration> {
        *self
            .audio_level_interval
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("loopback: session gone, event dropped");
        }
    }
}

impl MediaEngine for LoopbackEngine {
    fn connect(&self, identity: &Identity, attempt: u64) {
        tracing::debug!("loopback: connect #{attempt} as {}", identity.display_name);
        self.emit(EngineEvent::Connected { attempt });
    }

    fn join(&self, room_id: &str, attempt: u64) {
        tracing::debug!("loopback: join {room_id}");
        self.emit(EngineEvent::JoinCompleted {
            attempt,
            result: Ok(()),
        });
    }

    fn publish(&self, room_id: &str, constraints: &PublishConstraints) {
        let stream_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(
            "loopback: publish {stream_id} to {room_id} ({} {} @ {}fps)",
            constraints.codec,
            constraints.resolution,
            constraints.frame_rate
        );
        let stream = MediaStream {
            audio_track: constraints
                .publish_audio
                .then(|| format!("{stream_id}-audio")),
            video_track: constraints
                .publish_video
                .then(|| format!("{stream_id}-video")),
            owner_id: self.local_peer_id.clone(),
            stream_id,
        };
        self.emit(EngineEvent::PublishCompleted(Ok(stream)));
    }

    fn subscribe(&self, _room_id: &str, stream_id: &str) {
        self.emit(EngineEvent::SubscribeCompleted {
            stream_id: stream_id.to_string(),
            result: Ok(()),
        });
    }

    fn apply_constraints(
        &self,
        stream_id: &str,
        constraints: &PublishConstraints,
    ) -> Result<(), String> {
        tracing::debug!(
            "loopback: {stream_id} now {}kbps {} @ {}fps",
            constraints.bitrate_kbps,
            constraints.resolution,
            constraints.frame_rate
        );
        Ok(())
    }

    fn restart_capturer(&self, stream_id: &str, facing: CameraFacing) -> Result<(), String> {
        tracing::debug!("loopback: {stream_id} capturer restarted facing {facing:?}");
        Ok(())
    }

    fn set_track_enabled(
        &self,
        stream_id: &str,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), String> {
        tracing::debug!("loopback: {stream_id} {kind:?} enabled={enabled}");
        Ok(())
    }

    fn set_audio_level_interval(&self, interval: Duration) {
        *self
            .audio_level_interval
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(interval);
    }

    fn broadcast(&self, _room_id: &str, request_id: u64, payload: &BroadcastPayload) {
        tracing::debug!("loopback: broadcast #{request_id} with {} keys", payload.len());
        self.emit(EngineEvent::BroadcastCompleted {
            request_id,
            result: Ok(()),
        });
    }

    fn leave(&self, room_id: &str) {
        tracing::debug!("loopback: leave {room_id}");
    }

    fn disconnect(&self) {
        tracing::debug!("loopback: disconnect");
    }
}
