use std::sync::Arc;

use axum::{routing::post, Json, Router};
use client_core::{ControllerConfig, ConversationController, WebhookClient};
use serde_json::{json, Value};
use shared::domain::{InputMode, Role};
use storage::{MemoryStore, SessionStore, Storage};
use tokio::net::TcpListener;

async fn echo_webhook(Json(payload): Json<Value>) -> Json<Value> {
    let text = payload["message"].as_str().unwrap_or_default();
    let ssid = payload["ssid"].as_str().unwrap_or_default();
    Json(json!({ "reply": format!("echo:{text}:{}", ssid.len()) }))
}

async fn spawn_echo_webhook() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route("/hook", post(echo_webhook));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/hook")
}

async fn open_controller(database_url: &str, webhook_url: &str) -> Arc<ConversationController> {
    let durable = Arc::new(Storage::new(database_url).await.expect("db"));
    let store = SessionStore::new(Arc::new(MemoryStore::new()), durable);
    ConversationController::load(
        store,
        Arc::new(WebhookClient::new(webhook_url)),
        ControllerConfig::default(),
    )
    .await
}

#[tokio::test]
async fn conversation_round_trips_through_webhook_and_sqlite() {
    let webhook_url = spawn_echo_webhook().await;
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("chat.sqlite3");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let controller = open_controller(&database_url, &webhook_url).await;
    controller.submit_text("Hello").await.expect("accepted");

    let messages = controller.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "echo:Hello:36");
    drop(controller);

    let restarted = open_controller(&database_url, &webhook_url).await;
    assert_eq!(restarted.messages().await, messages);
    assert_eq!(restarted.input_mode().await, InputMode::Chat);
}
