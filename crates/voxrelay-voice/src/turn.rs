//! Conversation history for one session.
//!
//! History is append-only and replayed verbatim to the language model, so insertion order
//! is significant. Assistant turns may carry the unabridged answer next to the spoken one.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    /// Voice-facing utterance.
    text: String,
    /// Full answer, only kept for assistant turns whose detail differs from `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Turn {
    /// A user turn. Its detail is always its text.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            detail: None,
        }
    }

    /// An assistant turn with a spoken `voice` and a full `detail`.
    ///
    /// `voice` must be non-empty; an empty `detail` falls back to `voice`.
    pub fn assistant(voice: impl Into<String>, detail: impl Into<String>) -> VoiceResult<Self> {
        let voice = voice.into();
        if voice.trim().is_empty() {
            return Err(VoiceError::InvalidTurn("assistant turn has no spoken text".into()));
        }
        let detail = detail.into();
        let detail = if detail.trim().is_empty() || detail == voice {
            None
        } else {
            Some(detail)
        };
        Ok(Self {
            role: Role::Assistant,
            text: voice,
            detail,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Full content: the detail when present, otherwise the text.
    pub fn detail(&self) -> &str {
        self.detail.as_deref().unwrap_or(&self.text)
    }

    pub fn has_detail(&self) -> bool {
        self.detail.is_some()
    }
}

/// Append-only ordered turn list.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
