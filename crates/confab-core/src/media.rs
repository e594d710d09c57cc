use std::fmt;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

/// Highest frame rate the capturer accepts.
pub const MAX_FRAME_RATE: u32 = 60;

/// Local identity presented to the room.
///
/// The token is kept as a secret so `Debug` output never leaks it.
#[derive(Debug, Clone)]
pub struct Identity {
    pub display_name: String,
    pub auth_token: SecretString,
}

impl Identity {
    pub fn new(display_name: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            auth_token: SecretString::from(auth_token.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub peer_id: String,
    pub display_name: String,
}

/// A bundle of at most one audio and one video track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub stream_id: String,
    pub owner_id: String,
    pub audio_track: Option<String>,
    pub video_track: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    Vp8,
    Vp9,
    H264,
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VideoCodec::Vp8 => "VP8",
            VideoCodec::Vp9 => "VP9",
            VideoCodec::H264 => "H264",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parameters governing how the local stream is encoded and published.
///
/// Rebuilt from [`MediaSettings`](crate::settings::MediaSettings) on every
/// publish or reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConstraints {
    pub publish_audio: bool,
    pub publish_video: bool,
    pub codec: VideoCodec,
    pub bitrate_kbps: u32,
    pub frame_rate: u32,
    pub resolution: Resolution,
    pub camera_facing: CameraFacing,
    pub audio_level_interval: Duration,
}

impl Default for PublishConstraints {
    fn default() -> Self {
        Self {
            publish_audio: true,
            publish_video: true,
            codec: VideoCodec::default(),
            bitrate_kbps: 256,
            frame_rate: 25,
            resolution: Resolution::default(),
            camera_facing: CameraFacing::default(),
            audio_level_interval: Duration::from_millis(500),
        }
    }
}

impl PublishConstraints {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.bitrate_kbps == 0 {
            return Err(SessionError::Config("bitrate must be positive".into()));
        }
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return Err(SessionError::Config(format!(
                "frame rate must be within 1..={MAX_FRAME_RATE}, got {}",
                self.frame_rate
            )));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(SessionError::Config(format!(
                "invalid resolution {}",
                self.resolution
            )));
        }
        if self.audio_level_interval.is_zero() {
            return Err(SessionError::Config(
                "audio level interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Whether publishing these constraints produces any track at all.
    pub fn publishes_anything(&self) -> bool {
        self.publish_audio || self.publish_video
    }
}

/// Periodic audio level reading for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioLevelSample {
    pub stream_id: String,
    pub level: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_constraints_are_valid() {
        assert!(PublishConstraints::default().validate().is_ok());
    }

    #[test]
    fn zero_bitrate_rejected() {
        let c = PublishConstraints {
            bitrate_kbps: 0,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn frame_rate_bounds() {
        for frame_rate in [0, MAX_FRAME_RATE + 1] {
            let c = PublishConstraints {
                frame_rate,
                ..Default::default()
            };
            assert!(matches!(c.validate(), Err(SessionError::Config(_))));
        }
    }

    #[test]
    fn empty_resolution_rejected() {
        let c = PublishConstraints {
            resolution: Resolution { width: 0, height: 720 },
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn identity_debug_hides_token() {
        let identity = Identity::new("Alice", "super-secret-token");
        let printed = format!("{identity:?}");
        assert!(printed.contains("Alice"));
        assert!(!printed.contains("super-secret-token"));
    }

    #[test]
    fn codec_serializes_lowercase() {
        let json = serde_json::to_string(&VideoCodec::H264).unwrap();
        assert_eq!(json, "\"h264\"");
    }
}
