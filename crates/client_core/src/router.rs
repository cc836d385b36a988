use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use shared::{
    domain::{Identity, Recipient},
    protocol::{ChannelMessage, ChatMessage},
};
use storage::RosterStore;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{ClientEvent, RenderableMessage};

const SEEN_IDS_CAPACITY: usize = 512;

/// Addressing rule: broadcasts, messages to the local member, and anything the
/// local member sent (including agents acting as them).
pub fn is_visible(to: &Recipient, from: &Identity, local: &Identity) -> bool {
    to.is_broadcast() || to.is_member(local) || from == local
}

/// Decides what reaches the rendering sink and how it is attributed.
///
/// History and live traffic go through the same router. Deliveries repeated by
/// the transport (same message id) are rendered once.
pub struct MessageRouter {
    local: Identity,
    roster: Arc<RosterStore>,
    seen: Mutex<SeenIds>,
}

impl MessageRouter {
    pub fn new(local: Identity, roster: Arc<RosterStore>) -> Self {
        Self {
            local,
            roster,
            seen: Mutex::new(SeenIds::default()),
        }
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    pub async fn route(&self, message: &ChannelMessage) -> Option<RenderableMessage> {
        let Some(chat) = ChatMessage::from_channel(message) else {
            debug!(message_id = %message.id, name = %message.name, "router: dropped malformed message");
            return None;
        };
        self.route_chat(chat).await
    }

    pub async fn route_chat(&self, chat: ChatMessage) -> Option<RenderableMessage> {
        if !is_visible(&chat.to, &chat.from, &self.local) {
            return None;
        }
        if !self.first_sighting(chat.id) {
            debug!(message_id = %chat.id, "router: dropped duplicate delivery");
            return None;
        }

        let sender_name = match self.roster.lookup(&chat.from).await {
            Ok(Some(entry)) => entry.resolved_name().to_string(),
            Ok(None) => chat.from.to_string(),
            Err(err) => {
                warn!(error = %err, from = %chat.from, "router: roster lookup failed");
                chat.from.to_string()
            }
        };
        let display_name = if chat.is_agent {
            format!("Agent {sender_name}")
        } else {
            sender_name
        };

        Some(RenderableMessage {
            sent_by_self: chat.from == self.local,
            id: chat.id,
            from: chat.from,
            display_name,
            to: chat.to,
            content: chat.content,
            code: chat.code,
            is_agent: chat.is_agent,
            published_at: chat.published_at,
        })
    }

    /// Routes `message` and emits it when admitted. Returns whether it was emitted.
    pub async fn deliver(
        &self,
        message: &ChannelMessage,
        events: &broadcast::Sender<ClientEvent>,
    ) -> bool {
        match self.route(message).await {
            Some(renderable) => {
                let _ = events.send(ClientEvent::Message(renderable));
                true
            }
            None => false,
        }
    }

    fn first_sighting(&self, id: Uuid) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id)
    }
}

#[derive(Default)]
struct SeenIds {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SeenIds {
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_IDS_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
