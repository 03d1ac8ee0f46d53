//! Presentation Bridge: a thin axum router exposing `/health`,
//! `/metrics`, and `/ws`. Grounded on the teacher's `main.rs`
//! (`AppState`, `websocket_handler`/`handle_socket`/`websocket_broadcaster`,
//! `health_check`) — the connect-then-replay-then-stream pattern is
//! kept, the payload type changed from Polymarket market events to
//! `WsEvent`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::models::WsEvent;
use crate::persistence::SignalRepository;

#[derive(Clone)]
pub struct BridgeState {
    pub repository: Arc<dyn SignalRepository>,
    pub broadcast_tx: broadcast::Sender<WsEvent>,
    pub metrics_handle: PrometheusHandle,
}

pub fn build_router(state: BridgeState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<BridgeState>) -> impl IntoResponse {
    crate::metrics::render(&state.metrics_handle)
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<BridgeState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: BridgeState) {
    // Replay recent signals so a freshly connected client isn't blind
    // to anything emitted just before it joined.
    if let Ok(recent) = state.repository.list_recent(50).await {
        for signal in recent.into_iter().rev() {
            let payload = match serde_json::to_string(&WsEvent::Signal(signal)) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if socket.send(Message::Text(payload)).await.is_err() {
                return;
            }
        }
    }

    let mut rx = state.broadcast_tx.subscribe();
    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(event) => {
                        let Ok(payload) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_returns_ok() {
        assert_eq!(health_check().await, "ok");
    }
}
