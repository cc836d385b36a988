use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use channel_transport::{
    token::{mint_token, DEFAULT_TOKEN_TTL_SECONDS},
    ChannelConnector, ChannelSession, ConnectRequest,
};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::{ChannelId, Identity},
    protocol::{ChannelMessage, ClientFrame, OutboundMessage, PresenceEvent, ServerFrame},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const FANOUT_CAPACITY: usize = 1024;

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<ServerFrame>>>>;

/// Websocket transport to a `huddle-relay` server.
pub struct RelayConnector {
    server_url: String,
    token_ttl_seconds: i64,
}

impl RelayConnector {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
        }
    }

    pub fn with_token_ttl(mut self, ttl_seconds: i64) -> Self {
        self.token_ttl_seconds = ttl_seconds;
        self
    }

    fn ws_url(&self, token: &str) -> Result<Url> {
        let server_url = self.server_url.trim_end_matches('/');
        let ws_url = if server_url.starts_with("https://") {
            server_url.replacen("https://", "wss://", 1)
        } else if server_url.starts_with("http://") {
            server_url.replacen("http://", "ws://", 1)
        } else if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
            server_url.to_string()
        } else {
            return Err(anyhow!("relay url must start with http://, https://, ws:// or wss://"));
        };
        let mut url = Url::parse(&format!("{ws_url}/ws"))
            .with_context(|| format!("invalid relay url: {server_url}"))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

#[async_trait]
impl ChannelConnector for RelayConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn ChannelSession>> {
        let token = mint_token(
            &request.credential,
            &request.identity,
            &request.channel_id,
            self.token_ttl_seconds,
        )?;
        let url = self.ws_url(&token)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect to relay at {}", self.server_url))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (messages, _) = broadcast::channel(FANOUT_CAPACITY);
        let (presence, _) = broadcast::channel(FANOUT_CAPACITY);
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if ws_writer.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        let reader = {
            let messages = messages.clone();
            let presence = presence.clone();
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                while let Some(frame) = ws_reader.next().await {
                    match frame {
                        Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(frame) => dispatch_frame(frame, &pending, &messages, &presence),
                            Err(err) => warn!(error = %err, "relay: invalid server frame"),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "relay: websocket receive failed");
                            break;
                        }
                    }
                }
                // dropping the senders fails every request still waiting
                pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clear();
                info!("relay: connection closed");
            })
        };

        info!(
            identity = %request.identity,
            channel_id = %request.channel_id,
            "relay: session opened"
        );
        Ok(Arc::new(RelaySession {
            identity: request.identity,
            channel_id: request.channel_id,
            outgoing,
            pending,
            next_request_id: AtomicU64::new(1),
            messages,
            presence,
            tasks: Mutex::new(vec![reader, writer]),
            closed: AtomicBool::new(false),
        }))
    }
}

fn dispatch_frame(
    frame: ServerFrame,
    pending: &PendingRequests,
    messages: &broadcast::Sender<ChannelMessage>,
    presence: &broadcast::Sender<PresenceEvent>,
) {
    let request_id = match &frame {
        ServerFrame::Message { message } => {
            let _ = messages.send(message.clone());
            return;
        }
        ServerFrame::PresenceChanged(event) => {
            let _ = presence.send(event.clone());
            return;
        }
        ServerFrame::Error {
            request_id: None,
            error,
        } => {
            warn!(error = %error, "relay: server reported an error");
            return;
        }
        ServerFrame::Ack { request_id }
        | ServerFrame::Presence { request_id, .. }
        | ServerFrame::HistoryPage { request_id, .. }
        | ServerFrame::Error {
            request_id: Some(request_id),
            ..
        } => *request_id,
    };
    let waiter = pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .remove(&request_id);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(frame);
        }
        None => debug!(request_id, "relay: response for unknown request"),
    }
}

pub struct RelaySession {
    identity: Identity,
    channel_id: ChannelId,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingRequests,
    next_request_id: AtomicU64,
    messages: broadcast::Sender<ChannelMessage>,
    presence: broadcast::Sender<PresenceEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RelaySession {
    async fn request(&self, build: impl FnOnce(u64) -> ClientFrame) -> Result<ServerFrame> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("relay session is closed"));
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let frame = build(request_id);
        let text = serde_json::to_string(&frame)?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(request_id, tx);
        if self.outgoing.send(Message::Text(text)).is_err() {
            self.pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&request_id);
            return Err(anyhow!("relay connection is closed"));
        }

        match rx.await {
            Ok(ServerFrame::Error { error, .. }) => Err(anyhow!("relay rejected request: {error}")),
            Ok(frame) => Ok(frame),
            Err(_) => Err(anyhow!("relay connection closed before responding")),
        }
    }
}

#[async_trait]
impl ChannelSession for RelaySession {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        match self
            .request(|request_id| ClientFrame::Publish {
                request_id,
                message,
            })
            .await?
        {
            ServerFrame::Ack { .. } => Ok(()),
            other => Err(anyhow!("unexpected relay response to publish: {other:?}")),
        }
    }

    async fn enter_presence(&self) -> Result<()> {
        match self
            .request(|request_id| ClientFrame::EnterPresence { request_id })
            .await?
        {
            ServerFrame::Ack { .. } => Ok(()),
            other => Err(anyhow!("unexpected relay response to presence enter: {other:?}")),
        }
    }

    async fn presence_members(&self) -> Result<Vec<Identity>> {
        match self
            .request(|request_id| ClientFrame::GetPresence { request_id })
            .await?
        {
            ServerFrame::Presence { members, .. } => Ok(members),
            other => Err(anyhow!("unexpected relay response to presence get: {other:?}")),
        }
    }

    fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence.subscribe()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<ChannelMessage> {
        self.messages.subscribe()
    }

    async fn history(&self, limit: usize) -> Result<Vec<ChannelMessage>> {
        match self
            .request(|request_id| ClientFrame::History { request_id, limit })
            .await?
        {
            ServerFrame::HistoryPage { messages, .. } => Ok(messages),
            other => Err(anyhow!("unexpected relay response to history: {other:?}")),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.outgoing.send(Message::Close(None));
        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let mut tasks = tasks.into_iter();
        let reader = tasks.next();
        // let the writer flush the close frame; the reader is stopped outright
        if let Some(reader) = reader {
            reader.abort();
        }
        for writer in tasks {
            let _ = writer.await;
        }
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        info!(identity = %self.identity, channel_id = %self.channel_id, "relay: session closed");
        Ok(())
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
        {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/relay_tests.rs"]
mod tests;
