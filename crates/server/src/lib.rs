use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use channel_transport::{token::verify_token, ChannelHub, HubChannel};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use shared::{
    domain::{ChannelId, Identity},
    error::{ApiError, ErrorCode},
    protocol::{ClientFrame, ServerFrame},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

pub mod config;

pub use config::{load_settings, Settings};

#[derive(Clone)]
pub struct AppState {
    pub hub: ChannelHub,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            hub: ChannelHub::new(settings.history_capacity),
            settings: Arc::new(settings),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = q.token.filter(|token| !token.trim().is_empty()) else {
        return unauthorized("missing channel token");
    };
    let claims = match verify_token(
        &state.settings.channel_secret,
        &token,
        state.settings.token_leeway_seconds,
    ) {
        Ok(claims) => claims,
        Err(err) => {
            warn!(error = %err, "relay: websocket token refused");
            return unauthorized(err.to_string());
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let identity = claims.identity();
    let channel_id = claims.channel_id();
    ws.on_upgrade(move |socket| ws_connection(state, socket, identity, channel_id))
}

fn unauthorized(message: impl Into<String>) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::new(ErrorCode::Unauthorized, message)),
    )
        .into_response()
}

async fn ws_connection(
    state: Arc<AppState>,
    socket: WebSocket,
    identity: Identity,
    channel_id: ChannelId,
) {
    let channel = state.hub.channel(&channel_id);
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    info!(%identity, %channel_id, "relay: client connected");

    // subscribed before any frame is read, so nothing published from here on is missed
    let messages = BroadcastStream::new(channel.subscribe_messages())
        .map(|update| update.map(|message| ServerFrame::Message { message }));
    let presence = BroadcastStream::new(channel.subscribe_presence())
        .map(|update| update.map(ServerFrame::PresenceChanged));
    let mut updates = tokio_stream::StreamExt::merge(messages, presence);
    let forward_tx = out_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(update) = updates.next().await {
            match update {
                Ok(frame) => {
                    if forward_tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "relay: client fell behind on channel updates");
                }
            }
        }
    });

    let send_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(v) => v,
                Err(err) => {
                    warn!(error = %err, "relay: failed to encode frame");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut peer = Peer::new(identity.clone());
    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => peer.handle(&channel, frame),
            Err(err) => ServerFrame::Error {
                request_id: None,
                error: ApiError::validation(format!("invalid frame: {err}")),
            },
        };
        if out_tx.send(reply).is_err() {
            break;
        }
    }

    peer.leave(&channel);
    forward_task.abort();
    send_task.abort();
    info!(%identity, %channel_id, "relay: client disconnected");
}

/// Per-socket view of one member on one channel.
pub struct Peer {
    identity: Identity,
    entered: bool,
}

impl Peer {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            entered: false,
        }
    }

    pub fn handle(&mut self, channel: &HubChannel, frame: ClientFrame) -> ServerFrame {
        debug!(identity = %self.identity, request_id = frame.request_id(), "relay: frame");
        match frame {
            ClientFrame::Publish {
                request_id,
                message,
            } => {
                if message.name.trim().is_empty() {
                    return ServerFrame::Error {
                        request_id: Some(request_id),
                        error: ApiError::validation("message name cannot be empty"),
                    };
                }
                channel.publish(&self.identity, message);
                ServerFrame::Ack { request_id }
            }
            ClientFrame::EnterPresence { request_id } => {
                if !self.entered {
                    channel.enter(&self.identity);
                    self.entered = true;
                }
                ServerFrame::Ack { request_id }
            }
            ClientFrame::LeavePresence { request_id } => {
                self.leave(channel);
                ServerFrame::Ack { request_id }
            }
            ClientFrame::GetPresence { request_id } => ServerFrame::Presence {
                request_id,
                members: channel.members(),
            },
            ClientFrame::History { request_id, limit } => ServerFrame::HistoryPage {
                request_id,
                messages: channel.history(limit),
            },
        }
    }

    pub fn leave(&mut self, channel: &HubChannel) {
        if self.entered {
            channel.leave(&self.identity);
            self.entered = false;
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
