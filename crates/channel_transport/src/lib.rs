use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{ChannelId, Identity},
    protocol::{ChannelMessage, OutboundMessage, PresenceEvent},
};
use tokio::sync::broadcast;

mod hub;
mod memory;
pub mod token;

pub use hub::{ChannelHub, HubChannel, DEFAULT_HISTORY_CAPACITY};
pub use memory::{MemoryConnector, MemorySession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub identity: Identity,
    pub channel_id: ChannelId,
    pub credential: String,
}

/// One authenticated attachment to a channel.
///
/// Messages and presence changes arrive as broadcast streams; everything else
/// is request/response. `history` returns items newest first.
#[async_trait]
pub trait ChannelSession: Send + Sync {
    fn identity(&self) -> &Identity;
    fn channel_id(&self) -> &ChannelId;
    async fn publish(&self, message: OutboundMessage) -> anyhow::Result<()>;
    async fn enter_presence(&self) -> anyhow::Result<()>;
    async fn presence_members(&self) -> anyhow::Result<Vec<Identity>>;
    fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent>;
    fn subscribe_messages(&self) -> broadcast::Receiver<ChannelMessage>;
    async fn history(&self, limit: usize) -> anyhow::Result<Vec<ChannelMessage>>;
    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> anyhow::Result<Arc<dyn ChannelSession>>;
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
