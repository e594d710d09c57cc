//! Conferencing session orchestration.
//!
//! Token exchange, the connect/join/publish lifecycle, roster bookkeeping,
//! settings-driven reconfiguration and out-of-band messages on top of an
//! external real-time media engine. No platform dependencies.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod deep_link;
pub mod engine;
pub mod errors;
pub mod events;
pub mod loopback;
pub mod media;
pub mod reconcile;
pub mod roster;
pub mod session;
pub mod settings;

pub use auth::{Token, TokenClient};
pub use broadcast::{BroadcastAck, BroadcastChannel, BroadcastMessage, BroadcastPayload};
pub use config::SessionConfig;
pub use deep_link::DeepLink;
pub use engine::{EngineEvent, MediaEngine};
pub use errors::SessionError;
pub use events::{SessionEvent, SessionListener, SessionState};
pub use loopback::LoopbackEngine;
pub use media::{
    AudioLevelSample, CameraFacing, Identity, MediaStream, PublishConstraints, RemoteParticipant,
    Resolution, VideoCodec,
};
pub use session::{SessionHandle, SessionOrchestrator};
pub use settings::{MediaSettings, SettingsStore};
