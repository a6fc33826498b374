//! Chat client core: webhook transport and the conversation controller.

mod controller;
pub mod webhook;

pub use controller::{ControllerConfig, ControllerEvent, ConversationController, SubmitOutcome};
pub use webhook::{WebhookClient, WebhookTransport};
