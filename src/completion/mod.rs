//! Generative completion behind a small trait.
//!
//! The bridge only ever needs "conversation in, text out", either whole or
//! as a stream of chunks. [`OpenAiCompatibleClient`] provides that over any
//! `chat/completions` endpoint that speaks server-sent events.

use crate::api::{ChatMessage, ChatRequest, ChatResponse};
use crate::core::config::CompletionConfig;
use crate::mcp::content::{ContentBlock, InvocationResult, PromptResult};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use memchr::memchr;
use std::error::Error as StdError;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionError {
    /// The environment variable meant to hold the API key is unset or empty.
    MissingApiKey { env_var: String },
    /// The request never produced a response.
    Request(String),
    /// The endpoint answered with an error; the text is already formatted.
    Api(String),
    /// The response stream broke off or carried something unreadable.
    Stream(String),
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionError::MissingApiKey { env_var } => {
                write!(f, "No API key found. Set the {env_var} environment variable.")
            }
            CompletionError::Request(message) => write!(f, "Completion request failed: {message}"),
            CompletionError::Api(message) => f.write_str(message),
            CompletionError::Stream(message) => write!(f, "Completion stream failed: {message}"),
        }
    }
}

impl StdError for CompletionError {}

pub type CompletionStream = BoxStream<'static, Result<String, CompletionError>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Streams the reply in chunks. The stream ends after the last chunk or
    /// after the first error, and cannot be restarted.
    fn stream(&self, conversation: Vec<ChatMessage>) -> CompletionStream;

    /// The whole reply as one string.
    async fn complete(&self, conversation: Vec<ChatMessage>) -> Result<String, CompletionError> {
        let mut chunks = self.stream(conversation);
        let mut reply = String::new();
        while let Some(chunk) = chunks.next().await {
            reply.push_str(&chunk?);
        }
        Ok(reply)
    }
}

/// Asks the model to act on `instruction` using the text of an invocation
/// result. Failed invocations are forwarded too, marked as such.
pub async fn interpret(
    service: &dyn CompletionService,
    instruction: &str,
    content: &InvocationResult,
) -> Result<String, CompletionError> {
    service
        .complete(vec![ChatMessage::user(interpretation_prompt(
            instruction,
            content,
        ))])
        .await
}

fn interpretation_prompt(instruction: &str, content: &InvocationResult) -> String {
    let body = content
        .content
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("\n");
    let label = if content.is_error {
        "The call failed with"
    } else {
        "Content"
    };
    format!("{}\n\n{label}:\n{body}", instruction.trim())
}

/// Runs a rendered prompt through the model.
pub async fn complete_prompt(
    service: &dyn CompletionService,
    prompt: &PromptResult,
) -> Result<String, CompletionError> {
    let conversation = prompt
        .as_conversation()
        .into_iter()
        .map(|(role, text)| ChatMessage::new(role, text))
        .collect();
    service.complete(conversation).await
}

pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Builds a client from configuration, reading the key from the
    /// configured environment variable.
    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let env_var = config.api_key_env();
        let api_key = std::env::var(env_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CompletionError::MissingApiKey {
                env_var: env_var.to_string(),
            })?;
        Ok(Self::new(&config.base_url, &config.model, &api_key))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatibleClient {
    fn stream(&self, conversation: Vec<ChatMessage>) -> CompletionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = self
            .client
            .post(self.chat_url())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&ChatRequest {
                model: self.model.clone(),
                messages: conversation,
                stream: true,
            });

        tokio::spawn(async move {
            if let Err(err) = pump_events(request, &tx).await {
                let _ = tx.send(Err(err));
            }
        });

        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }
}

type ChunkSender = mpsc::UnboundedSender<Result<String, CompletionError>>;

/// Forwards content deltas until `[DONE]`, the end of the body, or the
/// receiver going away.
async fn pump_events(
    request: reqwest::RequestBuilder,
    tx: &ChunkSender,
) -> Result<(), CompletionError> {
    let response = request
        .send()
        .await
        .map_err(|err| CompletionError::Request(err.to_string()))?;
    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        debug!(status = %status, "Completion endpoint returned an error");
        return Err(CompletionError::Api(format_api_error(&error_text)));
    }

    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| CompletionError::Stream(err.to_string()))?;
        buffer.extend_from_slice(&chunk);

        while let Some(newline) = memchr(b'\n', &buffer) {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let line = std::str::from_utf8(&line)
                .map_err(|err| CompletionError::Stream(format!("invalid UTF-8: {err}")))?;
            match parse_event_line(line.trim()) {
                SseLine::Ignored => {}
                SseLine::Chunk(text) => {
                    if tx.send(Ok(text)).is_err() {
                        return Ok(());
                    }
                }
                SseLine::Done => return Ok(()),
                SseLine::Failed(message) => return Err(CompletionError::Api(message)),
            }
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Ignored,
    Chunk(String),
    Done,
    Failed(String),
}

fn parse_event_line(line: &str) -> SseLine {
    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return SseLine::Ignored;
    };
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    if payload.trim().is_empty() {
        return SseLine::Ignored;
    }
    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => match response.first_delta() {
            Some(text) if !text.is_empty() => SseLine::Chunk(text.to_string()),
            _ => SseLine::Ignored,
        },
        Err(_) => SseLine::Failed(format_api_error(payload)),
    }
}

fn error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|message| message.as_str())
        .or_else(|| value.get("error").and_then(|error| error.as_str()))
        .or_else(|| value.get("message").and_then(|message| message.as_str()))?;
    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Turns an error body into a readable message, pretty-printing JSON.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();
    if trimmed.is_empty() {
        return "API error: <empty response>".to_string();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| trimmed.to_string());
        return match error_summary(&value) {
            Some(summary) => format!("API error: {summary}\n{pretty}"),
            None => format!("API error:\n{pretty}"),
        };
    }
    format!("API error: {trimmed}")
}
