use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::errors::SessionError;

static ROOM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").expect("valid room id regex"));

/// A room invitation opened from outside the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLink {
    pub room_id: String,
    pub host: String,
}

impl DeepLink {
    /// Parse `scheme://host/...?room=<id>`.
    pub fn parse(input: &str) -> Result<Self, SessionError> {
        let url = Url::parse(input.trim())
            .map_err(|e| SessionError::Config(format!("invalid deep link '{input}': {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| SessionError::Config(format!("deep link '{input}' has no host")))?
            .to_string();
        let room_id = url
            .query_pairs()
            .find(|(key, _)| key == "room")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| {
                SessionError::Config(format!("deep link '{input}' has no room parameter"))
            })?;
        if !ROOM_ID.is_match(&room_id) {
            return Err(SessionError::Config(format!(
                "invalid room id '{room_id}'"
            )));
        }

        Ok(Self { room_id, host })
    }
}
