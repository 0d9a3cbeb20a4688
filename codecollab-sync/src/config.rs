//! Session configuration.

use codecollab_core::RoomId;
use std::time::Duration;

use crate::presence::PresenceCapacity;

const ENV_BACKEND_URL: &str = "CODECOLLAB_BACKEND_URL";
const ENV_WS_URL: &str = "CODECOLLAB_WS_URL";
const ENV_SENDER_ID: &str = "CODECOLLAB_SENDER_ID";
const ENV_LANGUAGE: &str = "CODECOLLAB_LANGUAGE";

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the storage, runner and suggestion services
    pub backend_url: String,
    /// WebSocket base URL; derived from `backend_url` when unset
    pub ws_url: Option<String>,
    /// How long the initial connect may take before giving up
    pub connect_timeout: Duration,
    /// Timeout for each HTTP collaborator request
    pub request_timeout: Duration,
    /// Language reported to the suggestion service
    pub language: String,
    /// Identity of this participant in cursor messages
    pub sender_id: String,
    /// How many remote cursor markers are shown at once
    pub presence_capacity: PresenceCapacity,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            ws_url: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            language: "python".to_string(),
            sender_id: uuid::Uuid::new_v4().to_string(),
            presence_capacity: PresenceCapacity::SingleSlot,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `CODECOLLAB_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_blank(ENV_BACKEND_URL) {
            config.backend_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = non_blank(ENV_WS_URL) {
            config.ws_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(id) = non_blank(ENV_SENDER_ID) {
            config.sender_id = id;
        }
        if let Some(language) = non_blank(ENV_LANGUAGE) {
            config.language = language;
        }
        config
    }

    /// WebSocket base: explicit override, or the backend URL with its
    /// `http` scheme swapped for `ws` (`https` becomes `wss`).
    pub fn ws_base(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        match self.backend_url.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => self.backend_url.clone(),
        }
    }

    /// Sync endpoint for a room.
    pub fn room_ws_url(&self, room: &RoomId) -> String {
        format!("{}/ws/rooms/{}", self.ws_base(), room)
    }
}
