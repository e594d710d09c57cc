use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

/// Static configuration handed to the orchestrator at construction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Media engine endpoint, e.g. `wss://prod-eu.confab.live`.
    /// Its first host label selects the token environment.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Token service URL receiving the `POST`.
    #[serde(default = "default_auth_service_url")]
    pub auth_service_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_token_timeout_ms")]
    pub token_timeout_ms: u64,
    /// Number of received broadcast messages kept in memory.
    #[serde(default = "default_message_log_capacity")]
    pub message_log_capacity: usize,
}

fn default_endpoint() -> String {
    "wss://prod-eu.confab.live".to_string()
}

fn default_auth_service_url() -> String {
    "https://auth.confab.live/api/token".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_token_timeout_ms() -> u64 {
    10_000
}

fn default_message_log_capacity() -> usize {
    200
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            auth_service_url: default_auth_service_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            token_timeout_ms: default_token_timeout_ms(),
            message_log_capacity: default_message_log_capacity(),
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, SessionError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SessionError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&contents)
            .map_err(|e| SessionError::Config(format!("invalid {}: {e}", path.display())))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confab.json");
        fs::write(&path, r#"{"endpoint":"wss://qa-in.confab.live","connect_timeout_ms":500}"#)
            .unwrap();

        let config = SessionConfig::from_file(&path).unwrap();
        assert_eq!(config.endpoint, "wss://qa-in.confab.live");
        assert_eq!(config.connect_timeout(), Duration::from_millis(500));
        assert_eq!(config.auth_service_url, default_auth_service_url());
        assert_eq!(config.message_log_capacity, 200);
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::from_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[test]
    fn corrupt_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confab.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            SessionConfig::from_file(&path),
            Err(SessionError::Config(_))
        ));
    }
}
