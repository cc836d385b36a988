use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use chrono::Utc;
use shared::{
    domain::{ChannelId, Identity},
    protocol::{ChannelMessage, OutboundMessage, PresenceAction, PresenceEvent},
};
use tokio::sync::broadcast;
use tracing::debug;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
const FANOUT_CAPACITY: usize = 1024;

/// Registry of live channels: presence, bounded history and fan-out.
///
/// Used by the relay server for every connected socket and directly by
/// [`crate::MemoryConnector`] for in-process sessions.
#[derive(Clone)]
pub struct ChannelHub {
    channels: Arc<Mutex<HashMap<ChannelId, Arc<HubChannel>>>>,
    history_capacity: usize,
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ChannelHub {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            history_capacity: history_capacity.max(1),
        }
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Arc<HubChannel> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            channels
                .entry(channel_id.clone())
                .or_insert_with(|| Arc::new(HubChannel::new(self.history_capacity))),
        )
    }

    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

struct ChannelState {
    // identity -> number of attachments currently entered
    presence: BTreeMap<Identity, usize>,
    history: VecDeque<ChannelMessage>,
}

pub struct HubChannel {
    state: Mutex<ChannelState>,
    history_capacity: usize,
    messages: broadcast::Sender<ChannelMessage>,
    presence_events: broadcast::Sender<PresenceEvent>,
}

impl HubChannel {
    fn new(history_capacity: usize) -> Self {
        let (messages, _) = broadcast::channel(FANOUT_CAPACITY);
        let (presence_events, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            state: Mutex::new(ChannelState {
                presence: BTreeMap::new(),
                history: VecDeque::with_capacity(history_capacity),
            }),
            history_capacity,
            messages,
            presence_events,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stamps, records and fans out a message. History and fan-out are updated
    /// under one lock so every subscriber sees the same order as history.
    pub fn publish(&self, client_id: &Identity, message: OutboundMessage) -> ChannelMessage {
        let stored = ChannelMessage {
            id: message.id,
            name: message.name,
            client_id: Some(client_id.clone()),
            data: message.data,
            published_at: Utc::now(),
        };
        let mut state = self.state();
        if state.history.len() == self.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(stored.clone());
        let _ = self.messages.send(stored.clone());
        stored
    }

    /// Newest first, at most `limit` items.
    pub fn history(&self, limit: usize) -> Vec<ChannelMessage> {
        self.state()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn enter(&self, identity: &Identity) {
        let mut state = self.state();
        let count = state.presence.entry(identity.clone()).or_insert(0);
        *count += 1;
        let action = if *count == 1 {
            PresenceAction::Enter
        } else {
            PresenceAction::Update
        };
        debug!(identity = %identity, ?action, "hub: presence enter");
        let _ = self.presence_events.send(PresenceEvent {
            action,
            identity: identity.clone(),
        });
    }

    pub fn leave(&self, identity: &Identity) {
        let mut state = self.state();
        let Some(count) = state.presence.get_mut(identity) else {
            return;
        };
        *count = count.saturating_sub(1);
        let action = if *count == 0 {
            state.presence.remove(identity);
            PresenceAction::Leave
        } else {
            PresenceAction::Update
        };
        debug!(identity = %identity, ?action, "hub: presence leave");
        let _ = self.presence_events.send(PresenceEvent {
            action,
            identity: identity.clone(),
        });
    }

    pub fn members(&self) -> Vec<Identity> {
        self.state().presence.keys().cloned().collect()
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<ChannelMessage> {
        self.messages.subscribe()
    }

    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence_events.subscribe()
    }
}
