//! Wire messages exchanged with the caller.
//!
//! Outbound control messages are JSON objects tagged by `type`; synthesized audio travels
//! as a raw binary frame after the `response` event.

use serde::{Deserialize, Serialize};

pub const STATUS_TRANSCRIBING: &str = "Transcribing...";
pub const STATUS_THINKING: &str = "Thinking...";
pub const STATUS_SPEAKING: &str = "Speaking...";
pub const STATUS_TOO_SHORT: &str = "Recording too short — hold longer";
pub const STATUS_NO_SPEECH: &str = "No speech detected";
pub const STATUS_BUSY: &str = "Still processing the previous recording";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionEvent {
    Pong,
    Status {
        text: String,
    },
    Transcript {
        text: String,
        #[serde(rename = "latencyMs")]
        latency_ms: u64,
    },
    Response {
        voice: String,
        detail: String,
        #[serde(rename = "latencyMs")]
        latency_ms: u64,
    },
    Error {
        text: String,
    },
}

impl SessionEvent {
    pub fn status(text: impl Into<String>) -> Self {
        SessionEvent::Status { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        SessionEvent::Error { text: text.into() }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Everything a session sends toward its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Event(SessionEvent),
    /// WAV bytes from the synthesizer.
    Audio(Vec<u8>),
}

/// Inbound text frames. Anything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Ping,
}

/// `None` for malformed or unrecognized control messages.
pub fn parse_control(text: &str) -> Option<ControlFrame> {
    serde_json::from_str(text).ok()
}
