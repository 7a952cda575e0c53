//! Integration tests for the session pipeline, driven by scripted engines and endpoints.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use voxrelay_voice::events::{
    STATUS_BUSY, STATUS_NO_SPEECH, STATUS_SPEAKING, STATUS_THINKING, STATUS_TOO_SHORT,
    STATUS_TRANSCRIBING,
};
use voxrelay_voice::{
    ChatEndpoint, ChatMessage, OrchestratorSettings, Outbound, PipelineConfig, PipelineState,
    RequestId, ResponseOrchestrator, Role, SessionEvent, SessionHandle, SessionPipeline,
    SpeechEngines, SubmitOutcome, VoiceError, VoiceResult,
};

const WAV: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt ";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Engines that write a fake WAV, return scripted transcripts and record TTS requests.
#[derive(Default)]
struct FakeEngines {
    transcripts: Mutex<VecDeque<VoiceResult<String>>>,
    fail_tts: bool,
    synth_requests: Mutex<Vec<(String, RequestId)>>,
    /// When set, transcription waits for a permit after signalling `entered`.
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
}

impl FakeEngines {
    fn with_transcripts(transcripts: Vec<VoiceResult<String>>) -> Self {
        Self {
            transcripts: Mutex::new(transcripts.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SpeechEngines for FakeEngines {
    async fn transcode(&self, input: &Path) -> VoiceResult<PathBuf> {
        assert!(input.exists(), "raw clip should exist during transcoding");
        let out = input.with_extension("16k.wav");
        tokio::fs::write(&out, WAV).await?;
        Ok(out)
    }

    async fn transcribe(&self, wav: &Path) -> VoiceResult<String> {
        assert!(wav.exists(), "wav should exist during transcription");
        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            let _permit = gate.acquire().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        }
        self.transcripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("hello there my friend".into()))
    }

    async fn synthesize(&self, text: &str, request: &RequestId) -> VoiceResult<Vec<u8>> {
        self.synth_requests
            .lock()
            .unwrap()
            .push((text.to_string(), request.clone()));
        if self.fail_tts {
            return Err(VoiceError::Tts("speaker model missing".into()));
        }
        Ok(WAV.to_vec())
    }
}

/// Endpoint that always gives the same reply (or always fails).
struct FixedEndpoint(Option<&'static str>);

#[async_trait]
impl ChatEndpoint for FixedEndpoint {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn complete(&self, _messages: &[ChatMessage], _timeout: Duration) -> VoiceResult<String> {
        self.0
            .map(str::to_string)
            .ok_or_else(|| VoiceError::Endpoint("unreachable".into()))
    }
}

fn responder() -> Arc<ResponseOrchestrator> {
    responder_with(Some("Nice to hear from you."), None)
}

fn responder_with(
    primary: Option<&'static str>,
    secondary: Option<&'static str>,
) -> Arc<ResponseOrchestrator> {
    Arc::new(ResponseOrchestrator::new(
        Arc::new(FixedEndpoint(primary)),
        Arc::new(FixedEndpoint(secondary)),
        OrchestratorSettings::default(),
    ))
}

fn settings(temp_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        temp_dir: Some(temp_dir.to_path_buf()),
        debug_capture: false,
        ..Default::default()
    }
}

fn clip() -> Vec<u8> {
    vec![7u8; 4096]
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

fn status(text: &str) -> Outbound {
    Outbound::Event(SessionEvent::status(text))
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

fn pipeline(
    engines: Arc<FakeEngines>,
    temp_dir: &Path,
) -> (SessionPipeline, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let p = SessionPipeline::new("s1", engines, responder(), settings(temp_dir), tx);
    (p, rx)
}

#[tokio::test]
async fn full_cycle_emits_events_in_order_and_records_two_turns() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(FakeEngines::default());
    let (mut p, mut rx) = pipeline(engines.clone(), dir.path());

    p.process_audio(clip()).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 6, "{:?}", events);
    assert_eq!(events[0], status(STATUS_TRANSCRIBING));
    assert!(matches!(
        &events[1],
        Outbound::Event(SessionEvent::Transcript { text, .. }) if text == "hello there my friend"
    ));
    assert_eq!(events[2], status(STATUS_THINKING));
    assert!(matches!(
        &events[3],
        Outbound::Event(SessionEvent::Response { voice, detail, .. })
            if voice == "Nice to hear from you." && detail == "Nice to hear from you."
    ));
    assert_eq!(events[4], status(STATUS_SPEAKING));
    assert_eq!(events[5], Outbound::Audio(WAV.to_vec()));

    let turns = p.history().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role(), Role::User);
    assert_eq!(turns[0].text(), "hello there my friend");
    assert_eq!(turns[1].role(), Role::Assistant);
    assert_eq!(turns[1].text(), "Nice to hear from you.");

    assert_eq!(p.state(), PipelineState::Idle);
    assert!(is_empty_dir(dir.path()), "temp artifacts left behind");
}

#[tokio::test]
async fn short_recording_emits_one_status_and_next_clip_still_works() {
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(FakeEngines::default());
    let (mut p, mut rx) = pipeline(engines, dir.path());

    p.process_audio(vec![0u8; 44]).await;
    assert_eq!(drain(&mut rx), vec![status(STATUS_TOO_SHORT)]);
    assert_eq!(p.state(), PipelineState::Idle);
    assert!(p.history().is_empty());

    p.process_audio(clip()).await;
    let events = drain(&mut rx);
    assert_eq!(events.len(), 6);
    assert_eq!(p.history().len(), 2);
}

#[tokio::test]
async fn blank_transcript_reports_no_speech_without_history() {
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(FakeEngines::with_transcripts(vec![Ok("   ".into())]));
    let (mut p, mut rx) = pipeline(engines.clone(), dir.path());

    p.process_audio(clip()).await;

    assert_eq!(
        drain(&mut rx),
        vec![status(STATUS_TRANSCRIBING), status(STATUS_NO_SPEECH)]
    );
    assert!(p.history().is_empty());
    assert!(engines.synth_requests.lock().unwrap().is_empty());
    assert!(is_empty_dir(dir.path()));
}

#[tokio::test]
async fn repeated_phrase_is_cleaned_before_reaching_history() {
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(FakeEngines::with_transcripts(vec![Ok(
        "I went to the store today I went to the store".into(),
    )]));
    let (mut p, mut rx) = pipeline(engines, dir.path());

    p.process_audio(clip()).await;

    let events = drain(&mut rx);
    assert!(matches!(
        &events[1],
        Outbound::Event(SessionEvent::Transcript { text, .. }) if text == "I went to the store today"
    ));
    assert_eq!(p.history().turns()[0].text(), "I went to the store today");
}

#[tokio::test]
async fn stt_failure_emits_error_and_session_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(FakeEngines::with_transcripts(vec![Err(VoiceError::Stt(
        "recognizer crashed".into(),
    ))]));
    let (mut p, mut rx) = pipeline(engines, dir.path());

    p.process_audio(clip()).await;

    assert_eq!(
        drain(&mut rx),
        vec![
            status(STATUS_TRANSCRIBING),
            Outbound::Event(SessionEvent::error("STT error: recognizer crashed")),
        ]
    );
    assert_eq!(p.state(), PipelineState::Idle);
    assert!(p.history().is_empty());
    assert!(is_empty_dir(dir.path()));

    p.process_audio(clip()).await;
    assert_eq!(drain(&mut rx).len(), 6);
}

#[tokio::test]
async fn tts_failure_emits_error_after_response() {
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(FakeEngines {
        fail_tts: true,
        ..Default::default()
    });
    let (mut p, mut rx) = pipeline(engines, dir.path());

    p.process_audio(clip()).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 6);
    assert_eq!(events[4], status(STATUS_SPEAKING));
    assert_eq!(
        events[5],
        Outbound::Event(SessionEvent::error("TTS error: speaker model missing"))
    );
    assert!(!events.iter().any(|e| matches!(e, Outbound::Audio(_))));
    assert_eq!(p.state(), PipelineState::Idle);
}

#[tokio::test]
async fn each_cycle_gets_a_distinct_request_id() {
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(FakeEngines::default());
    let (mut p, _rx) = pipeline(engines.clone(), dir.path());

    p.process_audio(clip()).await;
    p.process_audio(clip()).await;

    let requests = engines.synth_requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].0, "Nice to hear from you.");
    assert_ne!(requests[0].1, requests[1].1);
    assert_eq!(requests[1].1.session(), "s1");
}

#[tokio::test]
async fn debug_capture_holds_last_clip() {
    let dir = tempfile::tempdir().unwrap();
    let capture_dir = tempfile::tempdir().unwrap();
    let capture = capture_dir.path().join("last.webm");
    let (tx, _rx) = mpsc::unbounded_channel();
    let cfg = PipelineConfig {
        temp_dir: Some(dir.path().to_path_buf()),
        debug_capture_path: Some(capture.clone()),
        ..Default::default()
    };
    let mut p = SessionPipeline::new("s1", Arc::new(FakeEngines::default()), responder(), cfg, tx);

    p.process_audio(vec![1u8; 2000]).await;
    p.process_audio(vec![2u8; 3000]).await;

    assert_eq!(std::fs::read(&capture).unwrap(), vec![2u8; 3000]);
}

#[tokio::test]
async fn busy_session_queues_then_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let engines = Arc::new(FakeEngines {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let entered = engines.entered.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let p = SessionPipeline::new("s1", engines, responder(), settings(dir.path()), tx);
    let handle = SessionHandle::spawn(p, 2);

    assert_eq!(handle.submit_audio(clip()), SubmitOutcome::Queued);
    entered.notified().await;

    assert_eq!(handle.submit_audio(clip()), SubmitOutcome::Queued);
    assert_eq!(handle.submit_audio(clip()), SubmitOutcome::Queued);
    assert_eq!(handle.submit_audio(clip()), SubmitOutcome::Rejected);

    gate.add_permits(10);

    let mut audio_frames = 0;
    let mut busy = 0;
    while audio_frames < 3 {
        let item = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("pipeline stalled")
            .expect("channel closed");
        match item {
            Outbound::Audio(_) => audio_frames += 1,
            Outbound::Event(SessionEvent::Status { text }) if text == STATUS_BUSY => busy += 1,
            _ => {}
        }
    }
    assert_eq!(busy, 1);
}

#[tokio::test]
async fn dropping_the_handle_abandons_cycle_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(FakeEngines {
        gate: Some(Arc::new(Semaphore::new(0))),
        ..Default::default()
    });
    let entered = engines.entered.clone();
    let (tx, _rx) = mpsc::unbounded_channel();
    let p = SessionPipeline::new("s1", engines, responder(), settings(dir.path()), tx);
    let handle = SessionHandle::spawn(p, 2);

    handle.submit_audio(clip());
    entered.notified().await;
    assert!(!is_empty_dir(dir.path()), "clip and wav should exist mid-cycle");

    drop(handle);
    for _ in 0..50 {
        if is_empty_dir(dir.path()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(is_empty_dir(dir.path()));
}

#[tokio::test]
async fn blank_primary_reply_still_completes_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(FakeEngines::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut p = SessionPipeline::new(
        "s1",
        engines.clone(),
        responder_with(Some("   "), Some("Fallback answer.")),
        settings(dir.path()),
        tx,
    );

    p.process_audio(clip()).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 6, "{:?}", events);
    assert!(!events
        .iter()
        .any(|e| matches!(e, Outbound::Event(SessionEvent::Error { .. }))));
    let turns = p.history().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].text(), "Fallback answer.");
    assert_eq!(engines.synth_requests.lock().unwrap()[0].0, "Fallback answer.");
}
