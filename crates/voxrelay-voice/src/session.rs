//! Session Pipeline - the per-connection voice state machine
//!
//! ```text
//! Idle → ReceivingAudio → Transcribing → AwaitingResponse → Synthesizing → Idle
//!                              └──────────────┴───────────────────┴→ Error → Idle
//! ```
//!
//! One cycle per audio clip, strictly sequential within a session. Clips that arrive
//! while a cycle is running wait in a bounded queue; when the queue is full they are
//! rejected with a status event.

use crate::config::PipelineConfig;
use crate::dedup::dedup_transcript;
use crate::engines::{RequestId, SpeechEngines};
use crate::error::VoiceResult;
use crate::events::{
    Outbound, SessionEvent, STATUS_BUSY, STATUS_NO_SPEECH, STATUS_SPEAKING, STATUS_THINKING,
    STATUS_TOO_SHORT, STATUS_TRANSCRIBING,
};
use crate::orchestrator::ResponseOrchestrator;
use crate::temp::TempFile;
use crate::turn::{ConversationHistory, Turn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// State of the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ReceivingAudio,
    Transcribing,
    AwaitingResponse,
    Synthesizing,
    Error,
}

/// Runs voice cycles for one connection and owns its conversation history.
pub struct SessionPipeline {
    id: String,
    seq: u64,
    state: PipelineState,
    history: ConversationHistory,
    engines: Arc<dyn SpeechEngines>,
    responder: Arc<ResponseOrchestrator>,
    settings: PipelineConfig,
    events: mpsc::UnboundedSender<Outbound>,
}

impl SessionPipeline {
    pub fn new(
        id: impl Into<String>,
        engines: Arc<dyn SpeechEngines>,
        responder: Arc<ResponseOrchestrator>,
        settings: PipelineConfig,
        events: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            id: id.into(),
            seq: 0,
            state: PipelineState::Idle,
            history: ConversationHistory::new(),
            engines,
            responder,
            settings,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Run one full cycle for a captured clip. Always returns to `Idle`.
    pub async fn process_audio(&mut self, audio: Vec<u8>) {
        self.transition(PipelineState::ReceivingAudio);
        if let Err(e) = self.run_cycle(audio).await {
            self.transition(PipelineState::Error);
            warn!(target: "voxrelay::session", "cycle failed: {}", e);
            self.emit(SessionEvent::error(e.to_string()));
        }
        self.transition(PipelineState::Idle);
    }

    async fn run_cycle(&mut self, audio: Vec<u8>) -> VoiceResult<()> {
        if audio.len() < self.settings.min_audio_bytes {
            debug!(target: "voxrelay::session", "clip too short: {} bytes", audio.len());
            self.emit(SessionEvent::status(STATUS_TOO_SHORT));
            return Ok(());
        }

        self.seq += 1;
        let request = RequestId::new(self.id.clone(), self.seq);
        let temp_dir = self.settings.temp_dir();
        tokio::fs::create_dir_all(&temp_dir).await?;
        let raw = TempFile::new(temp_dir.join(format!("clip-{}.raw", request)));
        tokio::fs::write(raw.path(), &audio).await?;
        self.write_debug_capture(&audio).await;

        self.emit(SessionEvent::status(STATUS_TRANSCRIBING));
        self.transition(PipelineState::Transcribing);
        let started = Instant::now();
        let wav = TempFile::new(self.engines.transcode(raw.path()).await?);
        let raw_text = self.engines.transcribe(wav.path()).await?;
        drop(wav);
        drop(raw);
        let cleaned = dedup_transcript(raw_text.trim());
        let transcript = cleaned.trim();
        let stt_ms = started.elapsed().as_millis() as u64;

        if transcript.is_empty() {
            info!(target: "voxrelay::session", "no speech in {} ({} ms)", request, stt_ms);
            self.emit(SessionEvent::status(STATUS_NO_SPEECH));
            return Ok(());
        }
        if cleaned.len() < raw_text.trim().len() {
            debug!(target: "voxrelay::session", "repetition removed from transcript: {:?}", raw_text);
        }
        debug!(target: "voxrelay::session", "transcript ({} ms): {}", stt_ms, transcript);
        self.emit(SessionEvent::Transcript {
            text: transcript.to_string(),
            latency_ms: stt_ms,
        });
        self.history.push(Turn::user(transcript));

        self.transition(PipelineState::AwaitingResponse);
        self.emit(SessionEvent::status(STATUS_THINKING));
        let started = Instant::now();
        let envelope = self
            .responder
            .get_response(transcript, self.history.turns())
            .await;
        let response_ms = started.elapsed().as_millis() as u64;
        let reply = Turn::assistant(envelope.voice.clone(), envelope.detail.clone())?;
        self.emit(SessionEvent::Response {
            voice: envelope.voice.clone(),
            detail: envelope.detail,
            latency_ms: response_ms,
        });
        self.history.push(reply);

        self.transition(PipelineState::Synthesizing);
        self.emit(SessionEvent::status(STATUS_SPEAKING));
        let speech = self.engines.synthesize(&envelope.voice, &request).await?;
        info!(
            target: "voxrelay::session",
            "{} done: stt {} ms, response {} ms, {} audio bytes",
            request,
            stt_ms,
            response_ms,
            speech.len()
        );
        self.send(Outbound::Audio(speech));
        Ok(())
    }

    async fn write_debug_capture(&self, audio: &[u8]) {
        let Some(path) = self.settings.debug_capture_path() else {
            return;
        };
        if let Err(e) = tokio::fs::write(&path, audio).await {
            warn!(target: "voxrelay::session", "debug capture {} not written: {}", path.display(), e);
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(target: "voxrelay::session", "{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn emit(&self, event: SessionEvent) {
        self.send(Outbound::Event(event));
    }

    fn send(&self, out: Outbound) {
        // Receiver is gone once the connection closed; nothing left to deliver to.
        let _ = self.events.send(out);
    }
}

/// Result of handing a clip to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Queue full (a busy status was sent) or session already stopped.
    Rejected,
}

/// A pipeline running on its own task. Dropping the handle abandons the in-flight cycle;
/// child processes are killed and temp files removed as the cycle's future is dropped.
pub struct SessionHandle {
    id: String,
    audio_tx: mpsc::Sender<Vec<u8>>,
    events: mpsc::UnboundedSender<Outbound>,
    worker: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn the worker. `queue_depth` clips may wait while a cycle runs.
    pub fn spawn(pipeline: SessionPipeline, queue_depth: usize) -> Self {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(queue_depth.max(1));
        let id = pipeline.id().to_string();
        let events = pipeline.events.clone();
        let span = info_span!(target: "voxrelay::session", "session", id = %id);

        let worker = tokio::spawn(
            async move {
                let mut pipeline = pipeline;
                info!(target: "voxrelay::session", "session started");
                while let Some(clip) = audio_rx.recv().await {
                    pipeline.process_audio(clip).await;
                }
                info!(
                    target: "voxrelay::session",
                    "session ended after {} turns",
                    pipeline.history().len()
                );
            }
            .instrument(span),
        );

        Self {
            id,
            audio_tx,
            events,
            worker,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a clip for the next cycle.
    pub fn submit_audio(&self, audio: Vec<u8>) -> SubmitOutcome {
        match self.audio_tx.try_send(audio) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                debug!(target: "voxrelay::session", "session {} busy, clip rejected", self.id);
                let _ = self
                    .events
                    .send(Outbound::Event(SessionEvent::status(STATUS_BUSY)));
                SubmitOutcome::Rejected
            }
            Err(TrySendError::Closed(_)) => SubmitOutcome::Rejected,
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
