//! Response Orchestrator - dual response generation with a fallback chain
//!
//! 1. Primary endpoint (full-capability agent gateway) produces the detailed answer.
//!    Long answers are compressed into a spoken summary by the secondary endpoint,
//!    or locally when that call fails.
//! 2. Secondary endpoint (local conversational model) answers when the primary fails;
//!    its reply is both the spoken and the detailed text.
//! 3. When both fail, a fixed apology is spoken.
//!
//! Endpoint failures never leave this module.

use crate::config::{EndpointConfig, VoiceConfig};
use crate::error::{VoiceError, VoiceResult};
use crate::turn::{Role, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const APOLOGY: &str = "Sorry, I couldn't reach any of my language models just now. Please try again in a moment.";

const PRIMARY_SYSTEM_PROMPT: &str = "You are a knowledgeable assistant answering questions that were asked by voice. \
    Give complete, detailed answers. Use markdown formatting (headings, lists, code blocks) where it helps readability.";

const VOICE_SYSTEM_PROMPT: &str = "You are a friendly voice assistant. Your reply will be read aloud. \
    Answer in one to three short conversational sentences. Do not use markdown, lists, headings, code or emoji.";

const SUMMARY_SYSTEM_PROMPT: &str = "Compress the following answer into one or two natural spoken sentences \
    that a voice assistant can read aloud. Plain text only: no markdown, no lists, no preamble.";

/// Local fallback: answers longer than this are truncated when no sentence end is found.
const LOCAL_VOICE_MAX_CHARS: usize = 200;
const LOCAL_VOICE_TRUNCATE_CHARS: usize = 150;

/// One OpenAI-style chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User.as_str(), content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant.as_str(), content)
    }
}

/// HTTP client abstraction for a chat-completions endpoint.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Send `messages` and return the reply text. Empty replies are errors.
    async fn complete(&self, messages: &[ChatMessage], timeout: Duration) -> VoiceResult<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` endpoint over reqwest.
#[derive(Debug, Clone)]
pub struct OpenAiChatEndpoint {
    name: String,
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiChatEndpoint {
    pub fn new(name: impl Into<String>, config: &EndpointConfig) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| VoiceError::Config(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            name: name.into(),
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: config.bearer().map(str::to_string),
            client,
        })
    }
}

#[async_trait]
impl ChatEndpoint for OpenAiChatEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[ChatMessage], timeout: Duration) -> VoiceResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };
        let mut req = self.client.post(&self.url).timeout(timeout).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Endpoint(format!(
                "{} returned {}: {}",
                self.name, status, body
            )));
        }

        let parsed: ChatResponse = res.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| VoiceError::Endpoint(format!("{} returned an empty reply", self.name)))
    }
}

/// The dual response: spoken text plus the full answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseEnvelope {
    pub voice: String,
    pub detail: String,
}

impl ResponseEnvelope {
    fn same(text: String) -> Self {
        Self {
            voice: text.clone(),
            detail: text,
        }
    }
}

/// Timeouts and thresholds for the fallback chain.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub primary_timeout: Duration,
    pub secondary_timeout: Duration,
    pub summary_timeout: Duration,
    /// Primary answers longer than this (in characters) get a spoken summary.
    pub summary_threshold_chars: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            primary_timeout: config.primary.timeout(),
            secondary_timeout: config.secondary.timeout(),
            summary_timeout: config.pipeline.summary_timeout(),
            summary_threshold_chars: config.pipeline.summary_threshold_chars,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&VoiceConfig::default())
    }
}

pub struct ResponseOrchestrator {
    primary: Arc<dyn ChatEndpoint>,
    secondary: Arc<dyn ChatEndpoint>,
    settings: OrchestratorSettings,
}

impl ResponseOrchestrator {
    pub fn new(
        primary: Arc<dyn ChatEndpoint>,
        secondary: Arc<dyn ChatEndpoint>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            primary,
            secondary,
            settings,
        }
    }

    /// Build both endpoints from configuration.
    pub fn from_config(config: &VoiceConfig) -> VoiceResult<Self> {
        let primary = OpenAiChatEndpoint::new("primary", &config.primary)?;
        let secondary = OpenAiChatEndpoint::new("secondary", &config.secondary)?;
        Ok(Self::new(
            Arc::new(primary),
            Arc::new(secondary),
            OrchestratorSettings::from_config(config),
        ))
    }

    /// Produce the dual response for `user_message`. Never fails: the last resort is the apology.
    pub async fn get_response(&self, user_message: &str, history: &[Turn]) -> ResponseEnvelope {
        let started = Instant::now();
        let messages = primary_messages(user_message, history);
        let reply = self.primary.complete(&messages, self.settings.primary_timeout).await;
        match non_blank(self.primary.name(), reply) {
            Ok(detail) => {
                info!(
                    target: "voxrelay::responder",
                    endpoint = self.primary.name(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "primary answered"
                );
                let voice = self.spoken_version(&detail).await;
                return ResponseEnvelope { voice, detail };
            }
            Err(e) => warn!(
                target: "voxrelay::responder",
                "{} failed, falling back: {}",
                self.primary.name(),
                e
            ),
        }

        let started = Instant::now();
        let messages = voice_messages(user_message, history);
        let reply = self.secondary.complete(&messages, self.settings.secondary_timeout).await;
        match non_blank(self.secondary.name(), reply) {
            Ok(text) => {
                info!(
                    target: "voxrelay::responder",
                    endpoint = self.secondary.name(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "secondary answered"
                );
                ResponseEnvelope::same(text)
            }
            Err(e) => {
                warn!(
                    target: "voxrelay::responder",
                    "{} failed too, apologizing: {}",
                    self.secondary.name(),
                    e
                );
                ResponseEnvelope::same(APOLOGY.to_string())
            }
        }
    }

    /// Spoken text for a primary answer: the answer itself when short, else a summary.
    async fn spoken_version(&self, detail: &str) -> String {
        if detail.chars().count() <= self.settings.summary_threshold_chars {
            return detail.to_string();
        }
        let messages = [
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(detail),
        ];
        let reply = self.secondary.complete(&messages, self.settings.summary_timeout).await;
        match non_blank(self.secondary.name(), reply) {
            Ok(summary) if summary.chars().count() < detail.chars().count() => {
                debug!(target: "voxrelay::responder", "summary: {}", summary);
                summary
            }
            Ok(_) => {
                debug!(target: "voxrelay::responder", "summary not shorter than answer, deriving locally");
                derive_voice(detail)
            }
            Err(e) => {
                warn!(target: "voxrelay::responder", "summary failed, deriving locally: {}", e);
                derive_voice(detail)
            }
        }
    }
}

/// Trimmed reply, with blank text treated as a failed call.
fn non_blank(endpoint: &str, reply: VoiceResult<String>) -> VoiceResult<String> {
    let text = reply?;
    let text = text.trim();
    if text.is_empty() {
        return Err(VoiceError::Endpoint(format!("{} returned an empty reply", endpoint)));
    }
    Ok(text.to_string())
}

/// Detailed-answer prompt: assistant turns contribute their full detail.
fn primary_messages(user_message: &str, history: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(PRIMARY_SYSTEM_PROMPT)];
    messages.extend(history.iter().map(|turn| match turn.role() {
        Role::User => ChatMessage::user(turn.text()),
        Role::Assistant => ChatMessage::assistant(turn.detail()),
    }));
    push_user_if_missing(&mut messages, user_message);
    messages
}

/// Voice-style prompt: only the spoken text of each turn.
fn voice_messages(user_message: &str, history: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(VOICE_SYSTEM_PROMPT)];
    messages.extend(
        history
            .iter()
            .map(|turn| ChatMessage::new(turn.role().as_str(), turn.text())),
    );
    push_user_if_missing(&mut messages, user_message);
    messages
}

fn push_user_if_missing(messages: &mut Vec<ChatMessage>, user_message: &str) {
    let already_last = messages
        .last()
        .is_some_and(|m| m.role == Role::User.as_str() && m.content == user_message);
    if !already_last {
        messages.push(ChatMessage::user(user_message));
    }
}

/// Spoken text derived without a model: the first sentence, or a truncated prefix of a long answer.
pub fn derive_voice(detail: &str) -> String {
    let text = detail.trim();
    if let Some(end) = text.find(['.', '!', '?']) {
        let sentence = text[..=end].trim();
        if sentence.chars().any(char::is_alphanumeric) {
            return sentence.to_string();
        }
    }
    if text.chars().count() > LOCAL_VOICE_MAX_CHARS {
        let cut: String = text.chars().take(LOCAL_VOICE_TRUNCATE_CHARS).collect();
        return format!("{}...", cut.trim_end());
    }
    text.to_string()
}
