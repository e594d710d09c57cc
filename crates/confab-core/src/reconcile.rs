use std::time::Duration;

use crate::engine::MediaEngine;
use crate::errors::SessionError;
use crate::media::{CameraFacing, MediaStream, PublishConstraints, TrackKind};

/// One engine operation needed to move the local stream to new constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileStep {
    RestartCapturer(CameraFacing),
    /// Bitrate, frame rate or resolution changed; the engine swaps them live.
    HotSwap,
    SetTrackEnabled(TrackKind, bool),
    SetAudioLevelInterval(Duration),
}

/// Applies changed publish constraints to an already-published stream.
pub struct SettingsReconciler;

impl SettingsReconciler {
    /// Compute the engine steps, in execution order, without touching the
    /// engine.
    ///
    /// Codec changes after publish are refused, as is enabling a track kind
    /// that was never published.
    pub fn plan(
        stream: &MediaStream,
        current: &PublishConstraints,
        next: &PublishConstraints,
    ) -> Result<Vec<ReconcileStep>, SessionError> {
        next.validate()?;
        if next.codec != current.codec {
            return Err(SessionError::Unsupported(format!(
                "codec change from {} to {} after publish",
                current.codec, next.codec
            )));
        }

        let mut steps = Vec::new();
        if next.camera_facing != current.camera_facing {
            steps.push(ReconcileStep::RestartCapturer(next.camera_facing));
        }
        if next.bitrate_kbps != current.bitrate_kbps
            || next.frame_rate != current.frame_rate
            || next.resolution != current.resolution
        {
            steps.push(ReconcileStep::HotSwap);
        }
        if next.publish_audio != current.publish_audio {
            if stream.audio_track.is_none() {
                return Err(SessionError::Unsupported(
                    "no audio track was published".into(),
                ));
            }
            steps.push(ReconcileStep::SetTrackEnabled(TrackKind::Audio, next.publish_audio));
        }
        if next.publish_video != current.publish_video {
            if stream.video_track.is_none() {
                return Err(SessionError::Unsupported(
                    "no video track was published".into(),
                ));
            }
            steps.push(ReconcileStep::SetTrackEnabled(TrackKind::Video, next.publish_video));
        }
        if next.audio_level_interval != current.audio_level_interval {
            steps.push(ReconcileStep::SetAudioLevelInterval(next.audio_level_interval));
        }
        Ok(steps)
    }

    /// Plan and execute.
    ///
    /// On the first engine failure the steps already run are undone in
    /// reverse order, so the stream is left on `current` either way.
    pub fn apply(
        engine: &dyn MediaEngine,
        stream: &MediaStream,
        current: &PublishConstraints,
        next: &PublishConstraints,
    ) -> Result<(), SessionError> {
        let steps = Self::plan(stream, current, next)?;
        if steps.is_empty() {
            tracing::debug!("reconfigure: constraints unchanged");
            return Ok(());
        }

        let stream_id = stream.stream_id.as_str();
        for (done, step) in steps.iter().enumerate() {
            tracing::info!("reconfigure {stream_id}: {step:?}");
            if let Err(e) = run_step(engine, stream_id, step, next) {
                tracing::warn!("reconfigure {stream_id} failed at {step:?}: {e}");
                for step in steps[..done].iter().rev() {
                    let undo = step.undo(current);
                    if let Err(e) = run_step(engine, stream_id, &undo, current) {
                        tracing::warn!("reconfigure {stream_id}: undo {undo:?} failed: {e}");
                    }
                }
                return Err(SessionError::Engine(format!("reconfigure: {e}")));
            }
        }
        Ok(())
    }
}

impl ReconcileStep {
    /// The step that puts back what `self` changed.
    fn undo(&self, current: &PublishConstraints) -> ReconcileStep {
        match self {
            Self::RestartCapturer(_) => Self::RestartCapturer(current.camera_facing),
            Self::HotSwap => Self::HotSwap,
            Self::SetTrackEnabled(kind, enabled) => Self::SetTrackEnabled(*kind, !enabled),
            Self::SetAudioLevelInterval(_) => {
                Self::SetAudioLevelInterval(current.audio_level_interval)
            }
        }
    }
}

/// `target` is what a hot swap moves the encoder to.
fn run_step(
    engine: &dyn MediaEngine,
    stream_id: &str,
    step: &ReconcileStep,
    target: &PublishConstraints,
) -> Result<(), String> {
    match *step {
        ReconcileStep::RestartCapturer(facing) => engine.restart_capturer(stream_id, facing),
        ReconcileStep::HotSwap => engine.apply_constraints(stream_id, target),
        ReconcileStep::SetTrackEnabled(kind, enabled) => {
            engine.set_track_enabled(stream_id, kind, enabled)
        }
        ReconcileStep::SetAudioLevelInterval(interval) => {
            engine.set_audio_level_interval(interval);
            Ok(())
        }
    }
}
