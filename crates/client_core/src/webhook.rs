//! HTTP transport to the chat webhook.

use async_trait::async_trait;
use reqwest::{
    header::ACCEPT,
    multipart::{Form, Part},
    Client, Response,
};
use shared::{
    domain::SessionId,
    error::TransportError,
    protocol::{PdfUpload, TextWebhookRequest, WebhookBody},
};
use tracing::debug;

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send_text(&self, request: &TextWebhookRequest)
        -> Result<WebhookBody, TransportError>;
    async fn upload_file(
        &self,
        upload: &PdfUpload,
        session_id: &SessionId,
    ) -> Result<WebhookBody, TransportError>;
}

pub struct WebhookClient {
    http: Client,
    webhook_url: String,
}

impl WebhookClient {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            webhook_url: webhook_url.into(),
        }
    }
}

fn http_error(err: reqwest::Error) -> TransportError {
    TransportError::Http(err.to_string())
}

/// Reads the body as text regardless of status so the error path can log it.
async fn read_body(response: Response) -> Result<WebhookBody, TransportError> {
    let status = response.status();
    let body = response.text().await.map_err(http_error)?;
    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(WebhookBody::parse(body))
}

#[async_trait]
impl WebhookTransport for WebhookClient {
    async fn send_text(
        &self,
        request: &TextWebhookRequest,
    ) -> Result<WebhookBody, TransportError> {
        debug!(ssid = %request.ssid, len = request.message.len(), "posting text to webhook");
        let response = self
            .http
            .post(&self.webhook_url)
            .header(ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(http_error)?;
        read_body(response).await
    }

    async fn upload_file(
        &self,
        upload: &PdfUpload,
        session_id: &SessionId,
    ) -> Result<WebhookBody, TransportError> {
        debug!(
            ssid = %session_id,
            filename = %upload.filename,
            size_bytes = upload.bytes.len(),
            "uploading file to webhook"
        );
        let file_part = Part::bytes(upload.bytes.clone())
            .file_name(upload.filename.clone())
            .mime_str(&upload.media_type)
            .map_err(http_error)?;
        let form = Form::new()
            .part("file", file_part)
            .text("ssid", session_id.0.clone());

        let response = self
            .http
            .post(&self.webhook_url)
            .multipart(form)
            .send()
            .await
            .map_err(http_error)?;
        read_body(response).await
    }
}

#[cfg(test)]
#[path = "tests/webhook_tests.rs"]
mod tests;
