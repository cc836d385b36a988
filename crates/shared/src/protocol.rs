use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    domain::{Identity, Recipient},
    error::ApiError,
};

/// Event name used for chat traffic on a channel.
pub const CHAT_EVENT_NAME: &str = "message";

/// A message as stored and fanned out by the channel. `data` is left untyped
/// so that a malformed payload from some other publisher still travels and
/// can be dropped by the receiving client instead of breaking the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Identity>,
    pub data: Value,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub name: String,
    pub data: Value,
}

/// Loose view of a chat payload; every field may be absent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_agent: bool,
}

/// A validated chat message: sender, recipient and content are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub from: Identity,
    pub to: Recipient,
    pub content: String,
    pub code: Option<String>,
    pub is_agent: bool,
    pub published_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(from: Identity, to: Recipient, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
            content: content.into(),
            code: None,
            is_agent: false,
            published_at: None,
        }
    }

    /// Validates a channel message. Returns `None` for other event names and
    /// for payloads without a sender, a recipient or any content.
    pub fn from_channel(message: &ChannelMessage) -> Option<Self> {
        if message.name != CHAT_EVENT_NAME {
            return None;
        }
        let body: MessageBody = serde_json::from_value(message.data.clone()).ok()?;
        let from = body.from.filter(|v| !v.is_empty())?;
        let to = body.to.filter(|v| !v.is_empty())?;
        let content = body.content.filter(|v| !v.is_empty())?;
        Some(Self {
            id: message.id,
            from: Identity::new(from),
            to: Recipient::parse(&to),
            content,
            code: body.code.filter(|v| !v.is_empty()),
            is_agent: body.is_agent,
            published_at: Some(message.published_at),
        })
    }

    pub fn body(&self) -> MessageBody {
        MessageBody {
            from: Some(self.from.to_string()),
            to: Some(self.to.to_string()),
            content: Some(self.content.clone()),
            code: self.code.clone(),
            is_agent: self.is_agent,
        }
    }

    pub fn to_outbound(&self) -> serde_json::Result<OutboundMessage> {
        Ok(OutboundMessage {
            id: self.id,
            name: CHAT_EVENT_NAME.to_string(),
            data: serde_json::to_value(self.body())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Enter,
    Leave,
    Update,
    Present,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub action: PresenceAction,
    pub identity: Identity,
}

/// Frames sent by a client to the relay over the websocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    Publish {
        request_id: u64,
        message: OutboundMessage,
    },
    EnterPresence {
        request_id: u64,
    },
    LeavePresence {
        request_id: u64,
    },
    GetPresence {
        request_id: u64,
    },
    History {
        request_id: u64,
        limit: usize,
    },
}

impl ClientFrame {
    pub fn request_id(&self) -> u64 {
        match self {
            Self::Publish { request_id, .. }
            | Self::EnterPresence { request_id }
            | Self::LeavePresence { request_id }
            | Self::GetPresence { request_id }
            | Self::History { request_id, .. } => *request_id,
        }
    }
}

/// Frames sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack {
        request_id: u64,
    },
    Presence {
        request_id: u64,
        members: Vec<Identity>,
    },
    HistoryPage {
        request_id: u64,
        messages: Vec<ChannelMessage>,
    },
    Message {
        message: ChannelMessage,
    },
    PresenceChanged(PresenceEvent),
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        error: ApiError,
    },
}
