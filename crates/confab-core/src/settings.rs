use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::media::{CameraFacing, PublishConstraints, Resolution, VideoCodec};

/// User-editable media preferences, persisted as `settings.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MediaSettings {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub codec: VideoCodec,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default)]
    pub camera_facing: CameraFacing,
    #[serde(default = "default_true")]
    pub publish_audio: bool,
    #[serde(default = "default_true")]
    pub publish_video: bool,
    #[serde(default = "default_audio_poll_delay_ms")]
    pub audio_poll_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_bitrate_kbps() -> u32 {
    256
}

fn default_frame_rate() -> u32 {
    25
}

fn default_audio_poll_delay_ms() -> u64 {
    500
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            display_name: None,
            codec: VideoCodec::default(),
            resolution: Resolution::default(),
            bitrate_kbps: default_bitrate_kbps(),
            frame_rate: default_frame_rate(),
            camera_facing: CameraFacing::default(),
            publish_audio: true,
            publish_video: true,
            audio_poll_delay_ms: default_audio_poll_delay_ms(),
        }
    }
}

impl MediaSettings {
    /// Build the publish constraints these settings describe.
    pub fn constraints(&self) -> PublishConstraints {
        PublishConstraints {
            publish_audio: self.publish_audio,
            publish_video: self.publish_video,
            codec: self.codec,
            bitrate_kbps: self.bitrate_kbps,
            frame_rate: self.frame_rate,
            resolution: self.resolution,
            camera_facing: self.camera_facing,
            audio_level_interval: Duration::from_millis(self.audio_poll_delay_ms),
        }
    }
}

/// File-backed settings with change notification.
///
/// Every update is written to disk and published to subscribers. The
/// orchestrator never reads the store; the shell forwards changes to
/// `SessionHandle::reconfigure`.
pub struct SettingsStore {
    settings: watch::Sender<MediaSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        let (settings, _) = watch::channel(settings);
        Self {
            settings,
            file_path,
        }
    }

    pub fn get(&self) -> MediaSettings {
        self.settings.borrow().clone()
    }

    /// Receive the latest settings after every change.
    pub fn subscribe(&self) -> watch::Receiver<MediaSettings> {
        self.settings.subscribe()
    }

    /// Apply `change`, persist, and notify subscribers if anything changed.
    pub fn update(&self, change: impl FnOnce(&mut MediaSettings)) {
        let changed = self.settings.send_if_modified(|settings| {
            let before = settings.clone();
            change(settings);
            *settings != before
        });
        if changed {
            self.save();
        }
    }

    pub fn set_display_name(&self, name: Option<String>) {
        self.update(|s| s.display_name = name);
    }

    pub fn set_camera_facing(&self, facing: CameraFacing) {
        self.update(|s| s.camera_facing = facing);
    }

    pub fn set_bitrate_kbps(&self, bitrate_kbps: u32) {
        self.update(|s| s.bitrate_kbps = bitrate_kbps);
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("cannot create settings directory {}: {e}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("cannot write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("cannot serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> MediaSettings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring corrupt {}: {e}", path.display());
                MediaSettings::default()
            }),
            Err(_) => MediaSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), MediaSettings::default());
    }

    #[test]
    fn test_display_name_persists() {
        let dir = temp_dir();
        {
            let store = SettingsStore::new(dir.path());
            store.set_display_name(Some("Alice".to_string()));
        }
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get().display_name, Some("Alice".to_string()));
    }

    #[test]
    fn test_media_fields_persist() {
        let dir = temp_dir();
        {
            let store = SettingsStore::new(dir.path());
            store.update(|s| {
                s.codec = VideoCodec::H264;
                s.frame_rate = 30;
                s.publish_video = false;
            });
            store.set_camera_facing(CameraFacing::Back);
        }
        let s = SettingsStore::new(dir.path()).get();
        assert_eq!(s.codec, VideoCodec::H264);
        assert_eq!(s.frame_rate, 30);
        assert!(!s.publish_video);
        assert_eq!(s.camera_facing, CameraFacing::Back);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join("settings.json"), "not json!!!").unwrap();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), MediaSettings::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"display_name":"Eve","bitrate_kbps":800}"#,
        )
        .unwrap();
        let s = SettingsStore::new(dir.path()).get();
        assert_eq!(s.display_name, Some("Eve".to_string()));
        assert_eq!(s.bitrate_kbps, 800);
        assert!(s.publish_audio);
        assert_eq!(s.frame_rate, 25);
    }

    #[test]
    fn test_subscribers_see_changes() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.set_bitrate_kbps(1200);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().bitrate_kbps, 1200);
    }

    #[test]
    fn test_unchanged_update_does_not_notify() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        let rx = store.subscribe();

        store.set_bitrate_kbps(default_bitrate_kbps());
        assert!(!rx.has_changed().unwrap());
        assert!(!dir.path().join("settings.json").exists());
    }

    #[test]
    fn test_constraints_follow_settings() {
        let settings = MediaSettings {
            audio_poll_delay_ms: 250,
            camera_facing: CameraFacing::Back,
            ..Default::default()
        };
        let c = settings.constraints();
        assert_eq!(c.audio_level_interval, Duration::from_millis(250));
        assert_eq!(c.camera_facing, CameraFacing::Back);
        assert!(c.validate().is_ok());
    }
}
