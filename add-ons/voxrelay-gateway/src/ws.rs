//! WebSocket transport: binary frames carry recorded clips in and synthesized audio out,
//! text frames carry JSON events.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxrelay_voice::{
    parse_control, ControlFrame, Outbound, SessionEvent, SessionHandle, SessionPipeline,
};

pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn to_message(out: Outbound) -> Option<Message> {
    match out {
        Outbound::Audio(bytes) => Some(Message::Binary(bytes)),
        Outbound::Event(event) => match event.to_json() {
            Ok(json) => Some(Message::Text(json)),
            Err(e) => {
                warn!(target: "voxrelay::gateway", "event not serialized: {}", e);
                None
            }
        },
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4().simple().to_string();
    let live = state.sessions.fetch_add(1, Ordering::Relaxed) + 1;
    info!(target: "voxrelay::gateway", session = %session_id, live, "connection opened");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            let Some(msg) = to_message(out) else { continue };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let pipeline = SessionPipeline::new(
        session_id.clone(),
        state.engines.clone(),
        state.responder.clone(),
        state.config.pipeline.clone(),
        out_tx.clone(),
    );
    let handle = SessionHandle::spawn(pipeline, state.config.pipeline.queue_depth);

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Binary(audio)) => {
                debug!(target: "voxrelay::gateway", session = %session_id, bytes = audio.len(), "clip received");
                handle.submit_audio(audio);
            }
            Ok(Message::Text(text)) => match parse_control(&text) {
                Some(ControlFrame::Ping) => {
                    let _ = out_tx.send(Outbound::Event(SessionEvent::Pong));
                }
                None => debug!(target: "voxrelay::gateway", "ignoring text frame: {}", text),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(target: "voxrelay::gateway", session = %session_id, "socket error: {}", e);
                break;
            }
        }
    }

    // Abandons the in-flight cycle; its pending events are discarded with the channel.
    drop(handle);
    drop(out_tx);
    writer.abort();
    let _ = writer.await;

    let live = state.sessions.fetch_sub(1, Ordering::Relaxed) - 1;
    info!(target: "voxrelay::gateway", session = %session_id, live, "connection closed");
}
