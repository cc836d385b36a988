use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{ChannelId, Identity},
    protocol::{ChannelMessage, OutboundMessage, PresenceEvent},
};
use tokio::sync::broadcast;
use tracing::info;

use crate::{ChannelConnector, ChannelHub, ChannelSession, ConnectRequest, HubChannel};

/// Connects sessions straight to a [`ChannelHub`] in the same process.
pub struct MemoryConnector {
    hub: ChannelHub,
    credential: String,
}

impl MemoryConnector {
    pub fn new(hub: ChannelHub, credential: impl Into<String>) -> Self {
        Self {
            hub,
            credential: credential.into(),
        }
    }

    pub fn hub(&self) -> &ChannelHub {
        &self.hub
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn ChannelSession>> {
        if request.credential != self.credential {
            return Err(anyhow!("invalid channel credential"));
        }
        let channel = self.hub.channel(&request.channel_id);
        info!(
            identity = %request.identity,
            channel_id = %request.channel_id,
            "memory transport: session opened"
        );
        Ok(Arc::new(MemorySession::new(
            request.identity,
            request.channel_id,
            channel,
        )))
    }
}

pub struct MemorySession {
    identity: Identity,
    channel_id: ChannelId,
    channel: Arc<HubChannel>,
    entered: AtomicBool,
    closed: AtomicBool,
}

impl MemorySession {
    pub fn new(identity: Identity, channel_id: ChannelId, channel: Arc<HubChannel>) -> Self {
        Self {
            identity,
            channel_id,
            channel,
            entered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(anyhow!("channel session is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelSession for MemorySession {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        self.ensure_open()?;
        self.channel.publish(&self.identity, message);
        Ok(())
    }

    async fn enter_presence(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.entered.swap(true, Ordering::SeqCst) {
            self.channel.enter(&self.identity);
        }
        Ok(())
    }

    async fn presence_members(&self) -> Result<Vec<Identity>> {
        self.ensure_open()?;
        Ok(self.channel.members())
    }

    fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.channel.subscribe_presence()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<ChannelMessage> {
        self.channel.subscribe_messages()
    }

    async fn history(&self, limit: usize) -> Result<Vec<ChannelMessage>> {
        self.ensure_open()?;
        Ok(self.channel.history(limit))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.entered.swap(false, Ordering::SeqCst) {
            self.channel.leave(&self.identity);
        }
        info!(
            identity = %self.identity,
            channel_id = %self.channel_id,
            "memory transport: session closed"
        );
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.entered.swap(false, Ordering::SeqCst) {
            self.channel.leave(&self.identity);
        }
    }
}
