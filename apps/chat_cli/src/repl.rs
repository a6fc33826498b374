//! Terminal front end: reads commands from stdin, renders controller events.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use chrono::Local;
use client_core::{ControllerEvent, ConversationController, SubmitOutcome};
use futures::StreamExt;
use shared::{
    domain::{InputMode, MessageStatus, Role},
    error::ValidationError,
    protocol::{ChatMessage, PdfUpload},
};
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};

pub const SUGGESTIONS: &[&str] = &[
    "Can you review my CV?",
    "Which roles fit my experience?",
    "How can I improve my CV?",
];

const BUSY_NOTICE: &str = "! still waiting for the previous reply";

const HELP: &str = "\
commands:
  <text>             send a message
  /select <path>     choose a PDF to upload
  /upload [path]     upload the chosen (or given) PDF
  /suggest <n>       send suggestion n
  /last              show your last message
  /count <text>      show the character counter for <text>
  /history           redraw the conversation
  /new               start a new chat
  /quit              exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Select(PathBuf),
    Upload(Option<PathBuf>),
    Suggest(usize),
    Last,
    Count(String),
    History,
    New,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name {
        "select" if !arg.is_empty() => Command::Select(PathBuf::from(arg)),
        "upload" if arg.is_empty() => Command::Upload(None),
        "upload" => Command::Upload(Some(PathBuf::from(arg))),
        "suggest" => match arg.parse::<usize>() {
            Ok(n) if (1..=SUGGESTIONS.len()).contains(&n) => Command::Suggest(n),
            _ => Command::Unknown(trimmed.to_string()),
        },
        "last" => Command::Last,
        "count" => Command::Count(arg.to_string()),
        "history" => Command::History,
        "new" => Command::New,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(trimmed.to_string()),
    }
}

pub fn format_message(message: &ChatMessage) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "bot",
    };
    let marker = match message.status {
        MessageStatus::Sent => "",
        MessageStatus::Error => " (!)",
    };
    format!("[{time}] {who}{marker}: {}", message.content)
}

async fn read_pdf(path: &Path) -> Result<PdfUpload, std::io::Error> {
    let bytes = tokio::fs::read(path).await?;
    let media_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    Ok(PdfUpload {
        filename,
        media_type,
        bytes,
    })
}

async fn render_history(controller: &ConversationController) {
    for message in controller.messages().await {
        println!("{}", format_message(&message));
    }
    match controller.input_mode().await {
        InputMode::Upload => println!("-- upload a PDF with /select <path> then /upload --"),
        InputMode::Chat => {}
    }
}

/// Line to print for a finished submit. Validation rejections already reach
/// the user as notices.
pub fn outcome_notice(outcome: &Result<SubmitOutcome, ValidationError>) -> Option<&'static str> {
    match outcome {
        Ok(SubmitOutcome::Busy) => Some(BUSY_NOTICE),
        Ok(SubmitOutcome::Cancelled | SubmitOutcome::Completed { .. }) | Err(_) => None,
    }
}

fn spawn_submit<F>(submit: F)
where
    F: Future<Output = Result<SubmitOutcome, ValidationError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(notice) = outcome_notice(&submit.await) {
            println!("{notice}");
        }
    });
}

fn spawn_renderer(mut events: broadcast::Receiver<ControllerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ControllerEvent::MessageAppended(message)) => {
                    println!("{}", format_message(&message))
                }
                Ok(ControllerEvent::TypingChanged(true)) => println!("bot is typing..."),
                Ok(ControllerEvent::TypingChanged(false)) => {}
                Ok(ControllerEvent::Notice(notice)) => println!("! {notice}"),
                Ok(ControllerEvent::ModeChanged(InputMode::Chat)) => {
                    println!("-- upload complete, chat is open --")
                }
                Ok(ControllerEvent::ModeChanged(InputMode::Upload)) => {}
                Ok(ControllerEvent::ConversationReset { session_id }) => {
                    println!("\n-- new chat (session {session_id}) --");
                    println!("-- upload a PDF with /select <path> then /upload --");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "renderer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Runs the read/dispatch loop until `/quit` or end of input.
pub async fn run(controller: Arc<ConversationController>) -> Result<()> {
    let renderer = spawn_renderer(controller.subscribe_events());
    render_history(&controller).await;
    println!("type /help for commands");

    let mut lines = LinesStream::new(BufReader::new(io::stdin()).lines());
    let mut selected: Option<PdfUpload> = None;

    while let Some(line) = lines.next().await {
        let line = line?;
        let command = parse_command(&line);
        debug!(?command, "dispatching");
        let busy = controller.is_typing().await;

        match command {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Unknown(raw) => println!("! unknown command {raw}; try /help"),
            Command::Last => match controller.last_user_message().await {
                Some(text) => println!("{text}"),
                None => println!("! nothing sent yet"),
            },
            Command::Count(text) => println!("{}", controller.char_counter(&text)),
            Command::History => render_history(&controller).await,
            Command::New => {
                selected = None;
                controller.new_conversation().await;
            }
            Command::Select(path) => match read_pdf(&path).await {
                Ok(upload) => {
                    controller.record_file_selection(&upload.filename).await;
                    selected = Some(upload);
                }
                Err(err) => println!("! cannot read {}: {err}", path.display()),
            },
            Command::Send(_) | Command::Suggest(_) | Command::Upload(_) if busy => {
                println!("{BUSY_NOTICE}");
            }
            Command::Send(text) => {
                let controller = controller.clone();
                spawn_submit(async move { controller.submit_text(&text).await });
            }
            Command::Suggest(n) => {
                let controller = controller.clone();
                let text = SUGGESTIONS[n - 1];
                spawn_submit(async move { controller.submit_text(text).await });
            }
            Command::Upload(path) => {
                let upload = match path {
                    Some(path) => match read_pdf(&path).await {
                        Ok(upload) => Some(upload),
                        Err(err) => {
                            println!("! cannot read {}: {err}", path.display());
                            continue;
                        }
                    },
                    None => selected.clone(),
                };
                let controller = controller.clone();
                spawn_submit(async move { controller.submit_file(upload).await });
            }
        }
    }

    renderer.abort();
    Ok(())
}

#[cfg(test)]
#[path = "tests/repl_tests.rs"]
mod tests;
