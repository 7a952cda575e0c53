//! VoxRelay gateway: serves one voice session per WebSocket connection.

mod ws;

use anyhow::Context;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voxrelay_voice::{ProcessEngines, ResponseOrchestrator, SpeechEngines, VoiceConfig};

/// Shared by every connection.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<VoiceConfig>,
    pub(crate) engines: Arc<dyn SpeechEngines>,
    pub(crate) responder: Arc<ResponseOrchestrator>,
    /// Connections with a live session.
    pub(crate) sessions: Arc<AtomicUsize>,
}

impl AppState {
    fn from_config(config: VoiceConfig) -> anyhow::Result<Self> {
        let engines: Arc<dyn SpeechEngines> = Arc::new(ProcessEngines::new(&config));
        let responder =
            ResponseOrchestrator::from_config(&config).context("building chat endpoints")?;
        Ok(Self {
            config: Arc::new(config),
            engines,
            responder: Arc::new(responder),
            sessions: Arc::new(AtomicUsize::new(0)),
        })
    }
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/v1/health", get(health))
        .with_state(state)
}

/// GET /api/v1/health – liveness check plus the number of live sessions.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.load(Ordering::Relaxed),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[voxrelay-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = VoiceConfig::load().context("loading configuration")?;
    let temp_dir = config.pipeline.temp_dir();
    tokio::fs::create_dir_all(&temp_dir)
        .await
        .with_context(|| format!("creating temp dir {}", temp_dir.display()))?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("server.host/server.port do not form a socket address")?;
    info!(
        target: "voxrelay::gateway",
        primary = %config.primary.url,
        secondary = %config.secondary.url,
        temp_dir = %temp_dir.display(),
        "voice pipeline configured"
    );

    let app = build_router(AppState::from_config(config)?);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(target: "voxrelay::gateway", "listening on ws://{}/ws", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(target: "voxrelay::gateway", "shutdown requested (Ctrl+C)");
        }
    }
    Ok(())
}
