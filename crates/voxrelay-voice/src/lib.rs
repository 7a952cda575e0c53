//! # VoxRelay Voice - per-connection voice pipeline
//!
//! Turns one captured clip into a spoken reply, reporting progress at every stage.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Session Pipeline                          │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐                  │
//! │  │ Transcoder │→ │    STT     │→ │   Dedup    │                  │
//! │  │  (ffmpeg)  │  │ (process)  │  │ (repeats)  │                  │
//! │  └────────────┘  └────────────┘  └────────────┘                  │
//! │                                        ↓                         │
//! │  ┌────────────┐   voice   ┌──────────────────────────────────┐   │
//! │  │    TTS     │←──────────│ Response Orchestrator            │   │
//! │  │ (process)  │           │ primary → secondary → apology    │   │
//! │  └────────────┘           └──────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod dedup;
pub mod engines;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod session;
pub mod temp;
pub mod turn;

pub use config::{EndpointConfig, PipelineConfig, VoiceConfig};
pub use dedup::dedup_transcript;
pub use engines::{ProcessEngines, RequestId, SpeechEngines};
pub use error::{VoiceError, VoiceResult};
pub use events::{parse_control, ControlFrame, Outbound, SessionEvent};
pub use orchestrator::{
    ChatEndpoint, ChatMessage, OpenAiChatEndpoint, OrchestratorSettings, ResponseEnvelope,
    ResponseOrchestrator,
};
pub use session::{PipelineState, SessionHandle, SessionPipeline, SubmitOutcome};
pub use temp::TempFile;
pub use turn::{ConversationHistory, Role, Turn};
