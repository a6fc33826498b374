use std::{fs, path::Path};

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use url::Url;

const DEFAULT_TEXT_TIMEOUT_SECONDS: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub webhook_url: Option<String>,
    pub database_url: String,
    pub text_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            database_url: default_database_url(),
            text_timeout_seconds: DEFAULT_TEXT_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    webhook_url: Option<String>,
    database_url: Option<String>,
    data_dir: Option<String>,
    text_timeout_seconds: Option<u64>,
}

/// Defaults, then `config_path` if it exists, then environment variables.
pub fn load_settings(config_path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        match apply_file_settings(&mut settings, &raw) {
            Ok(()) => tracing::debug!(path = %config_path.display(), "loaded config file"),
            Err(err) => tracing::warn!(
                path = %config_path.display(),
                error = %err,
                "ignoring unreadable config file"
            ),
        }
    }

    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings
}

fn apply_file_settings(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.webhook_url {
        settings.webhook_url = Some(v);
    }
    if let Some(dir) = file_cfg.data_dir {
        let path = Path::new(&dir).join("chat.sqlite3");
        settings.database_url = normalize_database_url(&path.to_string_lossy());
    }
    // An explicit url wins over data_dir.
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.text_timeout_seconds {
        settings.text_timeout_seconds = v;
    }
    Ok(())
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("WEBHOOK_URL") {
        settings.webhook_url = Some(v);
    }
    if let Some(v) = lookup("APP__WEBHOOK_URL") {
        settings.webhook_url = Some(v);
    }

    if let Some(v) = lookup("CHAT_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = lookup("APP__TEXT_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.text_timeout_seconds = parsed;
        }
    }
}

pub fn validate_webhook_url(raw: Option<&str>) -> anyhow::Result<String> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("no webhook url configured; pass --webhook-url or set WEBHOOK_URL"))?;
    let parsed = Url::parse(raw).with_context(|| format!("invalid webhook url '{raw}'"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("webhook url must start with http:// or https://");
    }
    Ok(parsed.to_string())
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return default_database_url();
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn default_database_url() -> String {
    let path = dirs::data_local_dir()
        .map(|base| base.join("webhook_chat").join("chat.sqlite3"))
        .unwrap_or_else(|| Path::new("./data").join("chat.sqlite3"));
    format!("sqlite://{}", path.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
