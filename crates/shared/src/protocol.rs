use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{MessageId, MessageStatus, Role, SessionId};

/// Field lookup order for replies to a text message.
pub const TEXT_REPLY_FIELDS: &[&str] = &["message", "reply"];
/// Field lookup order for replies to a file upload.
pub const FILE_REPLY_FIELDS: &[&str] = &["message", "reply", "status"];

pub const TEXT_REPLY_PLACEHOLDER: &str = "...";
pub const FILE_REPLY_PLACEHOLDER: &str = "File uploaded successfully.";
pub const TEXT_APOLOGY: &str = "Sorry, something went wrong. Please try again.";
pub const FILE_APOLOGY: &str =
    "Sorry, the file upload failed. Make sure the webhook endpoint is reachable.";

pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// One turn of the conversation as persisted under `chat_messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(alias = "type")]
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_error(content: impl Into<String>) -> Self {
        let mut message = Self::assistant(content);
        message.status = MessageStatus::Error;
        message
    }

    pub fn is_error(&self) -> bool {
        self.status == MessageStatus::Error
    }
}

/// JSON body of the text webhook call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextWebhookRequest {
    pub message: String,
    pub ssid: SessionId,
}

/// A PDF picked by the user, read fully into memory before upload.
#[derive(Debug, Clone)]
pub struct PdfUpload {
    pub filename: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl PdfUpload {
    pub fn is_pdf(&self) -> bool {
        self.media_type
            .split(';')
            .next()
            .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(PDF_MEDIA_TYPE))
    }
}

/// Successful webhook response body, classified once on arrival.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookBody {
    Structured { fields: Map<String, Value>, raw: String },
    PlainText(String),
    Empty,
}

impl WebhookBody {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(fields)) => Self::Structured { fields, raw },
            _ => Self::PlainText(raw),
        }
    }

    /// First non-empty string among `fields`, then the raw body, then `placeholder`.
    pub fn extract_reply(&self, fields: &[&str], placeholder: &str) -> String {
        match self {
            Self::Structured { fields: map, raw } => fields
                .iter()
                .find_map(|name| match map.get(*name) {
                    Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| raw.clone()),
            Self::PlainText(text) => text.clone(),
            Self::Empty => placeholder.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_field_wins_over_reply() {
        let body = WebhookBody::parse(r#"{"reply":"second","message":"first"}"#);
        assert_eq!(
            body.extract_reply(TEXT_REPLY_FIELDS, TEXT_REPLY_PLACEHOLDER),
            "first"
        );
    }

    #[test]
    fn reply_field_used_when_message_missing_or_not_a_string() {
        let body = WebhookBody::parse(r#"{"message":42,"reply":"fallback"}"#);
        assert_eq!(
            body.extract_reply(TEXT_REPLY_FIELDS, TEXT_REPLY_PLACEHOLDER),
            "fallback"
        );
    }

    #[test]
    fn status_field_only_consulted_for_uploads() {
        let raw = r#"{"status":"received"}"#;
        let body = WebhookBody::parse(raw);
        assert_eq!(
            body.extract_reply(FILE_REPLY_FIELDS, FILE_REPLY_PLACEHOLDER),
            "received"
        );
        assert_eq!(
            body.extract_reply(TEXT_REPLY_FIELDS, TEXT_REPLY_PLACEHOLDER),
            raw
        );
    }

    #[test]
    fn non_object_json_is_plain_text() {
        assert_eq!(
            WebhookBody::parse("[1,2]"),
            WebhookBody::PlainText("[1,2]".to_string())
        );
        assert_eq!(
            WebhookBody::parse("hello there"),
            WebhookBody::PlainText("hello there".to_string())
        );
    }

    #[test]
    fn blank_body_falls_back_to_placeholder() {
        let body = WebhookBody::parse("  \n");
        assert_eq!(body, WebhookBody::Empty);
        assert_eq!(body.extract_reply(TEXT_REPLY_FIELDS, TEXT_REPLY_PLACEHOLDER), "...");
    }

    #[test]
    fn legacy_records_with_type_field_load() {
        let raw = r#"[{"id":"c_abc","type":"ai","content":"hi","timestamp":"2024-01-01T00:00:00.000Z","status":"sent"}]"#;
        let log: Vec<ChatMessage> = serde_json::from_str(raw).expect("legacy log");
        assert_eq!(log[0].role, Role::Assistant);
        assert_eq!(log[0].status, MessageStatus::Sent);
    }

    #[test]
    fn pdf_detection_ignores_parameters_and_case() {
        let upload = PdfUpload {
            filename: "cv.pdf".to_string(),
            media_type: "Application/PDF; charset=binary".to_string(),
            bytes: Vec::new(),
        };
        assert!(upload.is_pdf());

        let text = PdfUpload {
            media_type: "text/plain".to_string(),
            ..upload
        };
        assert!(!text.is_pdf());
    }
}
