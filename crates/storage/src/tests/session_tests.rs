use super::*;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::domain::{MessageId, MessageStatus, Role};

use crate::{MemoryStore, Storage};

async fn sqlite_backed_store() -> (SessionStore, Arc<Storage>) {
    let durable = Arc::new(Storage::new("sqlite::memory:").await.expect("db"));
    let store = SessionStore::new(Arc::new(MemoryStore::new()), durable.clone());
    (store, durable)
}

fn sample_log() -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            id: MessageId("c_00000001".to_string()),
            role: Role::User,
            content: "Hello".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            status: MessageStatus::Sent,
        },
        ChatMessage {
            id: MessageId("c_00000002".to_string()),
            role: Role::Assistant,
            content: "Sorry, something went wrong.\nPlease try again.".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 20).unwrap(),
            status: MessageStatus::Error,
        },
    ]
}

struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Backend("disk unavailable".to_string()))
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Backend("quota exceeded".to_string()))
    }

    async fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Backend("disk unavailable".to_string()))
    }
}

#[tokio::test]
async fn session_id_is_stable_until_reset() {
    let (store, _) = sqlite_backed_store().await;

    let first = store.get_or_create_session_id().await;
    let second = store.get_or_create_session_id().await;
    assert_eq!(first, second);

    let rotated = store.reset_session().await;
    assert_ne!(rotated, first);
    assert_eq!(store.get_or_create_session_id().await, rotated);
}

#[tokio::test]
async fn blank_stored_session_id_is_replaced() {
    let volatile = Arc::new(MemoryStore::new());
    volatile.set_item(SESSION_ID_KEY, "  ").await.expect("seed");
    let store = SessionStore::new(volatile.clone(), Arc::new(MemoryStore::new()));

    let session_id = store.get_or_create_session_id().await;
    assert!(!session_id.as_str().trim().is_empty());
    assert_eq!(
        volatile.get_item(SESSION_ID_KEY).await.expect("get"),
        Some(session_id.0.clone())
    );
}

#[tokio::test]
async fn saved_log_round_trips() {
    let (store, _) = sqlite_backed_store().await;
    let log = sample_log();

    store.save_log(&log).await.expect("save");
    assert_eq!(store.load_log().await, log);
}

#[tokio::test]
async fn absent_log_loads_empty() {
    let (store, _) = sqlite_backed_store().await;
    assert!(store.load_log().await.is_empty());
}

#[tokio::test]
async fn corrupted_log_loads_empty() {
    let (store, durable) = sqlite_backed_store().await;
    durable
        .set_item(CHAT_MESSAGES_KEY, "{not json")
        .await
        .expect("seed corrupt log");
    assert!(store.load_log().await.is_empty());

    durable
        .set_item(CHAT_MESSAGES_KEY, r#"{"id":"c_1"}"#)
        .await
        .expect("seed wrong shape");
    assert!(store.load_log().await.is_empty());
}

#[tokio::test]
async fn reset_discards_persisted_log() {
    let (store, durable) = sqlite_backed_store().await;
    store.save_log(&sample_log()).await.expect("save");

    store.reset_session().await;

    assert_eq!(durable.get_item(CHAT_MESSAGES_KEY).await.expect("get"), None);
    assert!(store.load_log().await.is_empty());
}

#[tokio::test]
async fn failing_backend_surfaces_on_save_but_not_on_load() {
    let store = SessionStore::new(Arc::new(FailingStore), Arc::new(FailingStore));

    let err = store.save_log(&sample_log()).await.expect_err("save fails");
    assert!(matches!(err, StorageError::Backend(_)));
    assert!(store.load_log().await.is_empty());

    // Still hands out an identifier even when it cannot be stored.
    let session_id = store.get_or_create_session_id().await;
    assert_eq!(session_id.as_str().len(), 36);
}
