use std::{sync::Arc, time::Duration};

use channel_transport::{ChannelConnector, ChannelSession, ConnectRequest};
use chrono::{DateTime, Utc};
use shared::{
    domain::{ConnectSettings, ConnectionState, Identity, PresentMember, Recipient},
    protocol::ChatMessage,
};
use storage::RosterStore;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod error;
mod history;
mod presence;
pub mod relay;
pub mod router;

pub use error::SyncError;
pub use relay::RelayConnector;
pub use router::{is_visible, MessageRouter};

/// Number of backlog items replayed after each successful connect.
pub const HISTORY_REPLAY_LIMIT: usize = 30;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub connect_timeout: Duration,
    pub history_limit: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            history_limit: HISTORY_REPLAY_LIMIT,
        }
    }
}

/// A chat message as the rendering sink should show it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderableMessage {
    pub id: Uuid,
    pub from: Identity,
    pub display_name: String,
    pub to: Recipient,
    pub content: String,
    pub code: Option<String>,
    pub is_agent: bool,
    pub sent_by_self: bool,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// `Connected` precedes every message, boundary and presence event of that connection.
    ConnectionStateChanged {
        state: ConnectionState,
        reason: Option<String>,
    },
    Message(RenderableMessage),
    /// Separates replayed history from live traffic; sent once per connection.
    HistoryBoundary,
    PresenceUpdated {
        members: Vec<PresentMember>,
    },
    PresenceCleared,
    /// Optimistic local echo of an outgoing message, before the transport answers.
    OutgoingPending {
        local_id: Uuid,
        to: Recipient,
        content: String,
    },
    SendConfirmed {
        local_id: Uuid,
    },
    SendFailed {
        local_id: Uuid,
        reason: String,
    },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: Recipient,
    pub content: String,
    pub code: Option<String>,
    pub is_agent: bool,
}

impl OutgoingMessage {
    pub fn new(to: Recipient, content: impl Into<String>) -> Self {
        Self {
            to,
            content: content.into(),
            code: None,
            is_agent: false,
        }
    }

    fn into_chat(self, from: Identity) -> ChatMessage {
        let mut message = ChatMessage::new(from, self.to, self.content);
        message.code = self.code;
        message.is_agent = self.is_agent;
        message
    }
}

struct ActiveSession {
    handle: Arc<dyn ChannelSession>,
    local: Identity,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the channel connection for one workspace.
///
/// Connect and disconnect hold the session lock for the whole transition, a
/// pending connect included, so transitions never overlap and at most one
/// channel handle is live.
pub struct SyncClient {
    connector: Arc<dyn ChannelConnector>,
    roster: Arc<RosterStore>,
    options: SyncOptions,
    session: Mutex<Option<ActiveSession>>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
}

impl SyncClient {
    pub fn new(connector: Arc<dyn ChannelConnector>, roster: Arc<RosterStore>) -> Self {
        Self::with_options(connector, roster, SyncOptions::default())
    }

    pub fn with_options(
        connector: Arc<dyn ChannelConnector>,
        roster: Arc<RosterStore>,
        options: SyncOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            roster,
            options,
            session: Mutex::new(None),
            state,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn roster(&self) -> &Arc<RosterStore> {
        &self.roster
    }

    pub async fn connect(&self) -> Result<(), SyncError> {
        // requests are served in arrival order, so the lock comes before any store read
        let mut slot = self.session.lock().await;
        let settings = load_connect_settings(&self.roster).await?;

        if let Some(active) = slot.take() {
            info!("sync: replacing existing channel session");
            self.teardown(active).await;
        }

        self.set_state(ConnectionState::Connecting, None);
        // on timeout the attempt future is dropped, so a late session is never adopted
        let handle = match connect_with_timeout(
            self.connector.as_ref(),
            &settings,
            self.options.connect_timeout,
        )
        .await
        {
            Ok(handle) => handle,
            Err(error) => {
                self.fail(&error);
                return Err(error);
            }
        };

        if let Err(err) = self.roster.store().set_connected_marker(true).await {
            warn!(error = %err, "sync: failed to write connected marker");
        }
        info!(channel_id = %settings.channel_id, "sync: connected");
        self.set_state(ConnectionState::Connected, None);
        let active = self.activate(handle, settings.identity).await;
        *slot = Some(active);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), SyncError> {
        let mut slot = self.session.lock().await;
        if let Some(active) = slot.take() {
            self.teardown(active).await;
            info!("sync: disconnected");
        }
        if self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected, None);
        }
        Ok(())
    }

    /// Publishes a message from the local member.
    ///
    /// Emits `OutgoingPending` first, then `SendConfirmed` or `SendFailed`
    /// under the same id. Failed sends are not retried.
    pub async fn send(&self, outgoing: OutgoingMessage) -> Result<Uuid, SyncError> {
        let (handle, local) = {
            let slot = self.session.lock().await;
            let Some(active) = slot.as_ref() else {
                warn!("sync: send skipped, not connected");
                return Err(SyncError::NotConnected);
            };
            (Arc::clone(&active.handle), active.local.clone())
        };

        let message = outgoing.into_chat(local);
        let local_id = message.id;

        let _ = self.events.send(ClientEvent::OutgoingPending {
            local_id,
            to: message.to.clone(),
            content: message.content.clone(),
        });

        let published = match message.to_outbound() {
            Ok(outbound) => handle.publish(outbound).await,
            Err(err) => Err(err.into()),
        };
        match published {
            Ok(()) => {
                let _ = self.events.send(ClientEvent::SendConfirmed { local_id });
                Ok(local_id)
            }
            Err(err) => {
                let error = SyncError::Publish(err.to_string());
                error!(error = %error, %local_id, "sync: publish failed");
                let _ = self.events.send(ClientEvent::SendFailed {
                    local_id,
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Maps a user-supplied recipient (`all`, an identity or a display name)
    /// to a channel address.
    pub async fn resolve_recipient(&self, name: &str) -> Result<Recipient, SyncError> {
        resolve_recipient(&self.roster, name).await
    }

    async fn activate(&self, handle: Arc<dyn ChannelSession>, local: Identity) -> ActiveSession {
        // (a) presence
        let presence_changes = handle.subscribe_presence();
        if let Err(err) = handle.enter_presence().await {
            warn!(error = %err, "sync: failed to enter presence");
            let _ = self
                .events
                .send(ClientEvent::Error(format!("failed to enter presence: {err}")));
        }
        let presence_task = presence::spawn_tracker(
            Arc::clone(&handle),
            Arc::clone(&self.roster),
            self.events.clone(),
            presence_changes,
        );

        // (b) history, then live; live is subscribed first so nothing published
        // during the replay is lost, it just waits behind the boundary marker
        let mut live = handle.subscribe_messages();
        let router = MessageRouter::new(local.clone(), Arc::clone(&self.roster));
        let delivery_session = Arc::clone(&handle);
        let events = self.events.clone();
        let history_limit = self.options.history_limit;
        let delivery_task = tokio::spawn(async move {
            history::replay(delivery_session.as_ref(), &router, &events, history_limit).await;
            loop {
                match live.recv().await {
                    Ok(message) => {
                        router.deliver(&message, &events).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync: live message stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        ActiveSession {
            handle,
            local,
            tasks: vec![presence_task, delivery_task],
        }
    }

    async fn teardown(&self, active: ActiveSession) {
        for task in &active.tasks {
            task.abort();
        }
        if let Err(err) = active.handle.close().await {
            warn!(error = %err, "sync: channel close reported an error");
        }
        if let Err(err) = self.roster.store().set_connected_marker(false).await {
            warn!(error = %err, "sync: failed to clear connected marker");
        }
        let _ = self.events.send(ClientEvent::PresenceCleared);
    }

    fn fail(&self, error: &SyncError) {
        error!(error = %error, "sync: connection attempt failed");
        self.set_state(ConnectionState::Failed, Some(error.to_string()));
        self.set_state(ConnectionState::Disconnected, None);
    }

    fn set_state(&self, state: ConnectionState, reason: Option<String>) {
        self.state.send_replace(state);
        let _ = self
            .events
            .send(ClientEvent::ConnectionStateChanged { state, reason });
    }
}

/// Connects, publishes one message and closes the handle.
///
/// Used for one-shot sends next to a possibly running [`SyncClient`] on the
/// same workspace: it does not enter presence, replay history, register
/// members or touch the connected marker.
pub async fn publish_once(
    connector: &dyn ChannelConnector,
    roster: &RosterStore,
    outgoing: OutgoingMessage,
    connect_timeout: Duration,
) -> Result<Uuid, SyncError> {
    let settings = load_connect_settings(roster).await?;
    let handle = connect_with_timeout(connector, &settings, connect_timeout).await?;

    let message = outgoing.into_chat(settings.identity);
    let id = message.id;
    let published = match message.to_outbound() {
        Ok(outbound) => handle.publish(outbound).await,
        Err(err) => Err(err.into()),
    };
    if let Err(err) = handle.close().await {
        warn!(error = %err, "sync: channel close reported an error");
    }
    published.map_err(|err| SyncError::Publish(err.to_string()))?;
    info!(message_id = %id, channel_id = %settings.channel_id, "sync: one-shot message published");
    Ok(id)
}

async fn load_connect_settings(roster: &RosterStore) -> Result<ConnectSettings, SyncError> {
    let config = roster.config().await.map_err(SyncError::Store)?;
    config.connect_settings().map_err(|field| {
        warn!(field, "sync: connect refused, configuration incomplete");
        SyncError::Configuration { field }
    })
}

async fn connect_with_timeout(
    connector: &dyn ChannelConnector,
    settings: &ConnectSettings,
    connect_timeout: Duration,
) -> Result<Arc<dyn ChannelSession>, SyncError> {
    let request = ConnectRequest {
        identity: settings.identity.clone(),
        channel_id: settings.channel_id.clone(),
        credential: settings.credential.clone(),
    };
    match tokio::time::timeout(connect_timeout, connector.connect(request)).await {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(err)) => Err(SyncError::Connection(err.to_string())),
        Err(_) => Err(SyncError::Timeout(connect_timeout)),
    }
}

/// `all` passes through; anything else must match a roster member by identity
/// or display name.
pub async fn resolve_recipient(roster: &RosterStore, name: &str) -> Result<Recipient, SyncError> {
    let name = name.trim();
    if Recipient::parse(name).is_broadcast() {
        return Ok(Recipient::All);
    }
    match roster.find_member(name).await.map_err(SyncError::Store)? {
        Some(entry) => Ok(Recipient::Member(entry.identity)),
        None => {
            let known = roster
                .entries()
                .await
                .map_err(SyncError::Store)?
                .iter()
                .map(|entry| entry.resolved_name().to_string())
                .collect();
            Err(SyncError::UnknownRecipient {
                name: name.to_string(),
                known,
            })
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
