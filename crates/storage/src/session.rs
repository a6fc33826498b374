//! Session identifier and conversation log persistence.

use std::sync::Arc;

use shared::{domain::SessionId, error::StorageError, protocol::ChatMessage};
use tracing::{debug, info, warn};

use crate::KeyValueStore;

pub const SESSION_ID_KEY: &str = "sessionUUID";
pub const CHAT_MESSAGES_KEY: &str = "chat_messages";

/// Owns the session identifier (volatile store) and the serialized
/// conversation log (durable store). The in-memory log itself belongs to
/// the caller.
#[derive(Clone)]
pub struct SessionStore {
    volatile: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(volatile: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self { volatile, durable }
    }

    /// Returns the stored identifier, creating and storing one on first use.
    ///
    /// If the volatile store cannot be written the fresh identifier is still
    /// returned; it just won't survive until the next call.
    pub async fn get_or_create_session_id(&self) -> SessionId {
        match self.volatile.get_item(SESSION_ID_KEY).await {
            Ok(Some(existing)) if !existing.trim().is_empty() => return SessionId(existing),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed to read session id"),
        }

        let session_id = SessionId::generate();
        if let Err(err) = self
            .volatile
            .set_item(SESSION_ID_KEY, session_id.as_str())
            .await
        {
            warn!(error = %err, "failed to store session id");
        }
        debug!(ssid = %session_id, "created session id");
        session_id
    }

    /// Drops the persisted log and rotates the session identifier.
    pub async fn reset_session(&self) -> SessionId {
        if let Err(err) = self.durable.remove_item(CHAT_MESSAGES_KEY).await {
            warn!(error = %err, "failed to clear persisted conversation log");
        }

        let session_id = SessionId::generate();
        if let Err(err) = self
            .volatile
            .set_item(SESSION_ID_KEY, session_id.as_str())
            .await
        {
            warn!(error = %err, "failed to store rotated session id");
        }
        info!(ssid = %session_id, "session reset");
        session_id
    }

    pub async fn save_log(&self, log: &[ChatMessage]) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(log)?;
        self.durable.set_item(CHAT_MESSAGES_KEY, &serialized).await
    }

    /// Persisted log, or an empty one when nothing usable is stored.
    pub async fn load_log(&self) -> Vec<ChatMessage> {
        let raw = match self.durable.get_item(CHAT_MESSAGES_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(error = %err, "failed to read conversation log");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<ChatMessage>>(&raw) {
            Ok(log) => log,
            Err(err) => {
                warn!(error = %err, "discarding malformed conversation log");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
