//! Voice relay configuration.
//!
//! Precedence: env `VOXRELAY_CONFIG` path > `config/voxrelay.toml` > defaults, with
//! `VOXRELAY__<SECTION>__<KEY>` environment variables layered on top. Adapters and the
//! response orchestrator receive their section at construction time.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var naming the TOML file to load.
pub const CONFIG_PATH_ENV: &str = "VOXRELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/voxrelay.toml";
const ENV_PREFIX: &str = "VOXRELAY";

const PRIMARY_URL: &str = "http://127.0.0.1:18789/v1/chat/completions";
const PRIMARY_MODEL: &str = "default";
const PRIMARY_TIMEOUT_SECS: u64 = 25;
const SECONDARY_URL: &str = "http://127.0.0.1:11434/v1/chat/completions";
const SECONDARY_MODEL: &str = "llama3.2";
const SECONDARY_TIMEOUT_SECS: u64 = 20;

/// Top-level configuration for the gateway and the pipeline it hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    /// Full-capability agent gateway (detailed answers).
    pub primary: EndpointConfig,
    /// Locally reachable conversational model (fallback + summarizer).
    pub secondary: EndpointConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            transcoder: TranscoderConfig::default(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            primary: EndpointConfig::primary_default(),
            secondary: EndpointConfig::secondary_default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

/// Audio normalizer (ffmpeg-compatible command line).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub program: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

/// Offline recognizer. `model_args` are passed verbatim before the WAV path
/// (e.g. `--tokens=/models/tokens.txt`, `--whisper-encoder=/models/encoder.onnx`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub program: String,
    pub model_args: Vec<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            program: "sherpa-onnx-offline".to_string(),
            model_args: Vec::new(),
        }
    }
}

/// Offline synthesizer. `model_args` carry the voice model paths. The text to speak is
/// passed last, as a positional argument, with leading dashes stripped so it is never read
/// as an option.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub program: String,
    pub model_args: Vec<String>,
    pub speaker_id: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            program: "sherpa-onnx-offline-tts".to_string(),
            model_args: Vec::new(),
            speaker_id: 0,
        }
    }
}

/// One OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Full URL including `/chat/completions`.
    pub url: String,
    pub model: String,
    /// Optional bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl EndpointConfig {
    pub fn primary_default() -> Self {
        Self {
            url: PRIMARY_URL.to_string(),
            model: PRIMARY_MODEL.to_string(),
            api_key: None,
            timeout_secs: PRIMARY_TIMEOUT_SECS,
        }
    }

    pub fn secondary_default() -> Self {
        Self {
            url: SECONDARY_URL.to_string(),
            model: SECONDARY_MODEL.to_string(),
            api_key: None,
            timeout_secs: SECONDARY_TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Bearer token, ignoring blank values.
    pub fn bearer(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Session pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Payloads below this size are treated as header-only recordings.
    pub min_audio_bytes: usize,
    /// Root for per-request temporary files. Defaults to `<os temp>/voxrelay`.
    pub temp_dir: Option<PathBuf>,
    /// Overwrite a single debug copy of the last capture. Every session writes the same
    /// path without coordination, so concurrent sessions may interleave; diagnostics only.
    pub debug_capture: bool,
    /// Defaults to `<temp_dir>/last-capture.webm`.
    pub debug_capture_path: Option<PathBuf>,
    /// Primary answers longer than this get a spoken summary.
    pub summary_threshold_chars: usize,
    pub summary_timeout_secs: u64,
    /// Upper bound for each transcoder/STT/TTS process.
    pub process_timeout_secs: u64,
    /// Clips allowed to wait while a cycle is running.
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_audio_bytes: 1000,
            temp_dir: None,
            debug_capture: true,
            debug_capture_path: None,
            summary_threshold_chars: 100,
            summary_timeout_secs: 10,
            process_timeout_secs: 60,
            queue_depth: 2,
        }
    }
}

impl PipelineConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("voxrelay"))
    }

    /// `None` when debug capture is disabled.
    pub fn debug_capture_path(&self) -> Option<PathBuf> {
        if !self.debug_capture {
            return None;
        }
        Some(
            self.debug_capture_path
                .clone()
                .unwrap_or_else(|| self.temp_dir().join("last-capture.webm")),
        )
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_timeout_secs)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }
}

impl VoiceConfig {
    /// Load from the file named by `VOXRELAY_CONFIG` (or `config/voxrelay.toml`) and the environment.
    pub fn load() -> VoiceResult<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from an explicit file path. A missing file falls back to defaults.
    pub fn load_from(path: &Path) -> VoiceResult<Self> {
        let primary = EndpointConfig::primary_default();
        let secondary = EndpointConfig::secondary_default();
        let builder = config::Config::builder()
            .set_default("primary.url", primary.url)?
            .set_default("primary.model", primary.model)?
            .set_default("primary.timeout_secs", primary.timeout_secs as i64)?
            .set_default("secondary.url", secondary.url)?
            .set_default("secondary.model", secondary.model)?
            .set_default("secondary.timeout_secs", secondary.timeout_secs as i64)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: VoiceConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.pipeline.queue_depth == 0 {
            return Err(VoiceError::Config("pipeline.queue_depth must be at least 1".into()));
        }
        if self.pipeline.process_timeout_secs == 0 {
            return Err(VoiceError::Config(
                "pipeline.process_timeout_secs must be positive".into(),
            ));
        }
        for (key, program) in [
            ("transcoder.program", &self.transcoder.program),
            ("stt.program", &self.stt.program),
            ("tts.program", &self.tts.program),
        ] {
            if program.trim().is_empty() {
                return Err(VoiceError::Config(format!("{} is empty", key)));
            }
        }
        for (key, endpoint) in [("primary", &self.primary), ("secondary", &self.secondary)] {
            if endpoint.url.trim().is_empty() {
                return Err(VoiceError::Config(format!("{}.url is empty", key)));
            }
            if endpoint.timeout_secs == 0 {
                return Err(VoiceError::Config(format!("{}.timeout_secs must be positive", key)));
            }
        }
        Ok(())
    }
}
