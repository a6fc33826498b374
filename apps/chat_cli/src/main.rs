use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{ControllerConfig, ConversationController, WebhookClient};
use storage::{MemoryStore, SessionStore, Storage};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod repl;

use config::{load_settings, normalize_database_url, validate_webhook_url};

#[derive(Parser, Debug)]
#[command(about = "Chat with a webhook from the terminal")]
struct Args {
    /// TOML file with webhook_url, data_dir, database_url, text_timeout_seconds.
    #[arg(long, default_value = "chat.toml")]
    config: PathBuf,
    #[arg(long)]
    webhook_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    text_timeout_seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config);
    if let Some(v) = args.webhook_url {
        settings.webhook_url = Some(v);
    }
    if let Some(v) = args.database_url {
        settings.database_url = v;
    }
    if let Some(v) = args.text_timeout_seconds {
        settings.text_timeout_seconds = v;
    }

    let webhook_url = validate_webhook_url(settings.webhook_url.as_deref())?;
    let database_url = normalize_database_url(&settings.database_url);
    let durable = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open chat history at '{database_url}'"))?;

    let store = SessionStore::new(Arc::new(MemoryStore::new()), Arc::new(durable));
    let ssid = store.get_or_create_session_id().await;
    info!(%webhook_url, %database_url, %ssid, "chat client starting");

    let controller = ConversationController::load(
        store,
        Arc::new(WebhookClient::new(webhook_url)),
        ControllerConfig {
            text_timeout: Duration::from_secs(settings.text_timeout_seconds),
            ..ControllerConfig::default()
        },
    )
    .await;

    repl::run(controller).await
}
