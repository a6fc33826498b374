//! Conversation state and the request lifecycle around the webhook.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{ConversationState, InputMode, MessageId, Role, SessionId},
    error::{TransportError, ValidationError, MAX_MESSAGE_LEN},
    protocol::{
        ChatMessage, PdfUpload, TextWebhookRequest, FILE_APOLOGY, FILE_REPLY_FIELDS,
        FILE_REPLY_PLACEHOLDER, TEXT_APOLOGY, TEXT_REPLY_FIELDS, TEXT_REPLY_PLACEHOLDER,
    },
};
use storage::SessionStore;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::webhook::WebhookTransport;

const DEFAULT_TEXT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub text_timeout: Duration,
    pub max_message_len: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            text_timeout: DEFAULT_TEXT_TIMEOUT,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    MessageAppended(ChatMessage),
    TypingChanged(bool),
    Notice(String),
    ModeChanged(InputMode),
    ConversationReset { session_id: SessionId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Another request is in flight; nothing was appended.
    Busy,
    /// The conversation was reset before the reply arrived; the request was
    /// abandoned and nothing was appended for it.
    Cancelled,
    Completed { reply: ChatMessage },
}

struct ConversationInner {
    messages: Vec<ChatMessage>,
    state: ConversationState,
    mode: InputMode,
    // Cancelled by a reset so the abandoned request stops and its reply is dropped.
    in_flight: Option<CancellationToken>,
}

impl ConversationInner {
    fn append(&mut self, mut message: ChatMessage) -> ChatMessage {
        if let Some(last) = self.messages.last() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }
        while self.messages.iter().any(|existing| existing.id == message.id) {
            message.id = MessageId::generate_long();
        }
        self.messages.push(message.clone());
        message
    }
}

pub struct ConversationController {
    store: SessionStore,
    transport: Arc<dyn WebhookTransport>,
    config: ControllerConfig,
    inner: Mutex<ConversationInner>,
    // Held for the whole lifetime of the one outstanding webhook request.
    request_slot: Mutex<()>,
    events: broadcast::Sender<ControllerEvent>,
}

impl ConversationController {
    /// Restores the persisted log and starts idle.
    pub async fn load(
        store: SessionStore,
        transport: Arc<dyn WebhookTransport>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        let messages = store.load_log().await;
        let mode = if messages.is_empty() {
            InputMode::Upload
        } else {
            InputMode::Chat
        };
        info!(restored = messages.len(), "conversation loaded");

        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            store,
            transport,
            config,
            inner: Mutex::new(ConversationInner {
                messages,
                state: ConversationState::Idle,
                mode,
                in_flight: None,
            }),
            request_slot: Mutex::new(()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.messages.clone()
    }

    pub async fn state(&self) -> ConversationState {
        self.inner.lock().await.state
    }

    pub async fn is_typing(&self) -> bool {
        self.state().await == ConversationState::AwaitingResponse
    }

    pub async fn input_mode(&self) -> InputMode {
        self.inner.lock().await.mode
    }

    /// Most recent user text, for recalling it into the input line.
    pub async fn last_user_message(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone())
    }

    /// Live counter shown next to the input, e.g. `12/2000`.
    pub fn char_counter(&self, text: &str) -> String {
        format!("{}/{}", text.encode_utf16().count(), self.config.max_message_len)
    }

    pub async fn submit_text(&self, text: &str) -> Result<SubmitOutcome, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        let len = text.encode_utf16().count();
        if len > self.config.max_message_len {
            return Err(self.reject(ValidationError::MessageTooLong {
                len,
                max: self.config.max_message_len,
            }));
        }

        let Ok(_slot) = self.request_slot.try_lock() else {
            return Ok(SubmitOutcome::Busy);
        };
        let cancel = self.begin_request(ChatMessage::user(text)).await;

        let session_id = self.store.get_or_create_session_id().await;
        let reply = tokio::select! {
            reply = self.text_request(text, &session_id) => reply,
            _ = cancel.cancelled() => return Ok(SubmitOutcome::Cancelled),
        };
        Ok(self.finish_request(&cancel, reply, None).await)
    }

    /// Sends one text turn; never fails, errors become an apology message.
    pub async fn text_request(&self, text: &str, session_id: &SessionId) -> ChatMessage {
        let request = TextWebhookRequest {
            message: text.to_string(),
            ssid: session_id.clone(),
        };
        let result =
            match tokio::time::timeout(self.config.text_timeout, self.transport.send_text(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.config.text_timeout)),
            };

        match result {
            Ok(body) => {
                ChatMessage::assistant(body.extract_reply(TEXT_REPLY_FIELDS, TEXT_REPLY_PLACEHOLDER))
            }
            Err(err) => {
                warn!(ssid = %session_id, error = %err, "text request failed");
                ChatMessage::assistant_error(TEXT_APOLOGY)
            }
        }
    }

    pub async fn submit_file(
        &self,
        upload: Option<PdfUpload>,
    ) -> Result<SubmitOutcome, ValidationError> {
        let Some(upload) = upload else {
            return Err(self.reject(ValidationError::NoFileSelected));
        };
        if !upload.is_pdf() {
            return Err(self.reject(ValidationError::NotPdf {
                media_type: upload.media_type.clone(),
            }));
        }

        let Ok(_slot) = self.request_slot.try_lock() else {
            return Ok(SubmitOutcome::Busy);
        };
        let notice = ChatMessage::user(format!("Uploading file: {}", upload.filename));
        let cancel = self.begin_request(notice).await;

        let session_id = self.store.get_or_create_session_id().await;
        let reply = tokio::select! {
            reply = self.file_request(&upload, &session_id) => reply,
            _ = cancel.cancelled() => return Ok(SubmitOutcome::Cancelled),
        };
        // A successful upload opens the chat.
        let mode = (!reply.is_error()).then_some(InputMode::Chat);
        Ok(self.finish_request(&cancel, reply, mode).await)
    }

    /// Uploads the PDF with no timeout; never fails, errors become an apology message.
    pub async fn file_request(&self, upload: &PdfUpload, session_id: &SessionId) -> ChatMessage {
        match self.transport.upload_file(upload, session_id).await {
            Ok(body) => {
                info!(ssid = %session_id, filename = %upload.filename, "file uploaded");
                ChatMessage::assistant(body.extract_reply(FILE_REPLY_FIELDS, FILE_REPLY_PLACEHOLDER))
            }
            Err(err) => {
                warn!(ssid = %session_id, filename = %upload.filename, error = %err, "file upload failed");
                ChatMessage::assistant_error(FILE_APOLOGY)
            }
        }
    }

    /// Notes a picked file in the conversation before it is uploaded.
    pub async fn record_file_selection(&self, filename: &str) -> ChatMessage {
        let mut inner = self.inner.lock().await;
        let message = inner.append(ChatMessage::user(format!("File selected: {filename}")));
        self.persist(&inner.messages).await;
        drop(inner);
        self.emit(ControllerEvent::MessageAppended(message.clone()));
        message
    }

    /// Wipes the persisted log, rotates the session id and returns the
    /// controller to its initial state. A request still in flight is
    /// cancelled and its reply never appears.
    pub async fn new_conversation(&self) -> SessionId {
        let in_flight = self.inner.lock().await.in_flight.take();
        if let Some(cancel) = in_flight {
            info!("cancelling in-flight webhook request");
            cancel.cancel();
        }
        // Returns once the cancelled request has let go of the slot.
        let _slot = self.request_slot.lock().await;

        let mut inner = self.inner.lock().await;
        let session_id = self.store.reset_session().await;
        inner.messages.clear();
        inner.state = ConversationState::Idle;
        inner.mode = InputMode::Upload;
        inner.in_flight = None;
        drop(inner);

        self.emit(ControllerEvent::TypingChanged(false));
        self.emit(ControllerEvent::ConversationReset {
            session_id: session_id.clone(),
        });
        session_id
    }

    /// Appends the outgoing message and enters `AwaitingResponse`. The
    /// caller must hold the request slot.
    async fn begin_request(&self, outgoing: ChatMessage) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut inner = self.inner.lock().await;
        let message = inner.append(outgoing);
        inner.state = ConversationState::AwaitingResponse;
        inner.in_flight = Some(cancel.clone());
        self.persist(&inner.messages).await;
        drop(inner);

        self.emit(ControllerEvent::MessageAppended(message));
        self.emit(ControllerEvent::TypingChanged(true));
        cancel
    }

    async fn finish_request(
        &self,
        cancel: &CancellationToken,
        reply: ChatMessage,
        mode: Option<InputMode>,
    ) -> SubmitOutcome {
        let mut inner = self.inner.lock().await;
        if cancel.is_cancelled() {
            info!("dropping reply for a conversation that was reset");
            return SubmitOutcome::Cancelled;
        }
        let reply = inner.append(reply);
        inner.state = ConversationState::Idle;
        inner.in_flight = None;
        if let Some(mode) = mode {
            inner.mode = mode;
        }
        self.persist(&inner.messages).await;
        drop(inner);

        self.emit(ControllerEvent::MessageAppended(reply.clone()));
        if let Some(mode) = mode {
            self.emit(ControllerEvent::ModeChanged(mode));
        }
        self.emit(ControllerEvent::TypingChanged(false));
        SubmitOutcome::Completed { reply }
    }

    async fn persist(&self, messages: &[ChatMessage]) {
        if let Err(err) = self.store.save_log(messages).await {
            warn!(error = %err, "failed to persist conversation log");
        }
    }

    fn reject(&self, err: ValidationError) -> ValidationError {
        if err.is_user_visible() {
            self.emit(ControllerEvent::Notice(err.to_string()));
        }
        err
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
