//! **Speech engines**: transcoder, STT and TTS behind one seam.
//!
//! The pipeline only sees `SpeechEngines`. `ProcessEngines` backs it with out-of-process
//! tools (ffmpeg and sherpa-onnx style binaries); an in-process or networked engine can
//! replace it without touching the pipeline.

use crate::config::{SttConfig, TranscoderConfig, TtsConfig, VoiceConfig};
use crate::error::{VoiceError, VoiceResult};
use crate::temp::TempFile;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Characters of stderr kept in a failure message.
const DIAGNOSTIC_TAIL_CHARS: usize = 500;

/// Unique per-request identifier: session id plus a per-session sequence number.
/// Used to name temp files so concurrent sessions never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId {
    session: String,
    seq: u64,
}

impl RequestId {
    pub fn new(session: impl Into<String>, seq: u64) -> Self {
        Self {
            session: session.into(),
            seq,
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.session, self.seq)
    }
}

/// Backend for the three external engines a voice cycle needs.
#[async_trait]
pub trait SpeechEngines: Send + Sync {
    /// Normalize any input audio to mono 16 kHz 16-bit PCM WAV. Returns the new file's path;
    /// the caller owns (and must delete) it.
    async fn transcode(&self, input: &Path) -> VoiceResult<PathBuf>;

    /// Raw recognizer text for a normalized WAV. Empty string means no speech.
    async fn transcribe(&self, wav: &Path) -> VoiceResult<String>;

    /// Synthesize `text` into WAV bytes.
    async fn synthesize(&self, text: &str, request: &RequestId) -> VoiceResult<Vec<u8>>;
}

/// Production engines: one child process per call, bounded by a timeout and killed on drop.
#[derive(Debug, Clone)]
pub struct ProcessEngines {
    transcoder: TranscoderConfig,
    stt: SttConfig,
    tts: TtsConfig,
    temp_dir: PathBuf,
    timeout: Duration,
}

impl ProcessEngines {
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            transcoder: config.transcoder.clone(),
            stt: config.stt.clone(),
            tts: config.tts.clone(),
            temp_dir: config.pipeline.temp_dir(),
            timeout: config.pipeline.process_timeout(),
        }
    }

    async fn run(
        &self,
        mut cmd: Command,
        program: &str,
        stage_err: fn(String) -> VoiceError,
    ) -> VoiceResult<Output> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(target: "voxrelay::engines", "spawning {}", program);
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(stage_err(format!("failed to run {}: {}", program, e))),
            Err(_) => {
                warn!(target: "voxrelay::engines", "{} exceeded {:?}, killed", program, self.timeout);
                Err(VoiceError::Timeout(format!(
                    "{} did not finish within {}s",
                    program,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl SpeechEngines for ProcessEngines {
    async fn transcode(&self, input: &Path) -> VoiceResult<PathBuf> {
        let output_path = input.with_extension("16k.wav");
        let output_guard = TempFile::new(&output_path);

        let program = &self.transcoder.program;
        let mut cmd = Command::new(program);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(input)
            .args(["-ac", "1", "-ar", "16000", "-sample_fmt", "s16"])
            .arg(&output_path);

        let output = self.run(cmd, program, VoiceError::Conversion).await?;
        if !output.status.success() {
            return Err(VoiceError::Conversion(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                diagnostic_tail(&output.stderr)
            )));
        }
        if !tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
            return Err(VoiceError::Conversion(format!("{} produced no output file", program)));
        }
        Ok(output_guard.into_path())
    }

    async fn transcribe(&self, wav: &Path) -> VoiceResult<String> {
        let program = &self.stt.program;
        let mut cmd = Command::new(program);
        cmd.args(&self.stt.model_args).arg(wav);

        let output = self.run(cmd, program, VoiceError::Stt).await?;
        if !output.status.success() {
            return Err(VoiceError::Stt(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                diagnostic_tail(&output.stderr)
            )));
        }

        // The recognizer prints its JSON result on stderr; scan both streams.
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push('\n');
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(extract_transcript(&combined).unwrap_or_default())
    }

    async fn synthesize(&self, text: &str, request: &RequestId) -> VoiceResult<Vec<u8>> {
        let text = spoken_arg(text);
        if text.is_empty() {
            return Err(VoiceError::Tts("nothing to speak".into()));
        }
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let wav = TempFile::new(self.temp_dir.join(format!("tts-{}.wav", request)));

        let program = &self.tts.program;
        let mut cmd = Command::new(program);
        cmd.args(&self.tts.model_args)
            .arg(format!("--sid={}", self.tts.speaker_id))
            .arg(format!("--output-filename={}", wav.path().display()))
            .arg(text);

        let output = self.run(cmd, program, VoiceError::Tts).await?;
        if !output.status.success() {
            return Err(VoiceError::Tts(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                diagnostic_tail(&output.stderr)
            )));
        }

        let bytes = tokio::fs::read(wav.path())
            .await
            .map_err(|e| VoiceError::Tts(format!("could not read synthesized audio: {}", e)))?;
        if bytes.is_empty() {
            return Err(VoiceError::Tts(format!("{} produced an empty file", program)));
        }
        Ok(bytes)
    }
}

/// First line that parses as a JSON object with a string `text` field.
pub fn extract_transcript(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find_map(|record| {
            record
                .get("text")
                .and_then(|t| t.as_str())
                .map(|t| t.trim().to_string())
        })
}

/// Text as a positional argument. Leading dashes would be parsed as an option.
fn spoken_arg(text: &str) -> &str {
    text.trim_start_matches(|c: char| c == '-' || c.is_whitespace())
        .trim_end()
}

/// Last `DIAGNOSTIC_TAIL_CHARS` characters of a tool's stderr.
fn diagnostic_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= DIAGNOSTIC_TAIL_CHARS {
        return text.to_string();
    }
    text.chars().skip(count - DIAGNOSTIC_TAIL_CHARS).collect()
}
