use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! string_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id_newtype!(Identity);
string_id_newtype!(ChannelId);

/// Wire value of the broadcast recipient.
pub const BROADCAST_RECIPIENT: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    All,
    Member(Identity),
}

impl Recipient {
    pub fn parse(raw: &str) -> Self {
        if raw == BROADCAST_RECIPIENT {
            Self::All
        } else {
            Self::Member(Identity::new(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::All => BROADCAST_RECIPIENT,
            Self::Member(identity) => identity.as_str(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn is_member(&self, identity: &Identity) -> bool {
        matches!(self, Self::Member(member) if member == identity)
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        match value {
            Recipient::All => BROADCAST_RECIPIENT.to_string(),
            Recipient::Member(identity) => identity.0,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Durable display metadata for one member of the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_prompt: Option<String>,
}

impl RosterEntry {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            display_name: None,
            style_prompt: None,
        }
    }

    /// Display name with the identity as fallback; blank names count as absent.
    pub fn resolved_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.identity.as_str(),
        }
    }

    pub fn style_prompt(&self) -> Option<&str> {
        self.style_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
    }
}

/// Field-level administrative edit of a roster entry. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterUpdate {
    pub display_name: Option<String>,
    pub style_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentMember {
    pub identity: Identity,
    pub display_name: String,
}

/// The persisted per-workspace document: connection settings plus the roster.
///
/// Keys this version does not know about are kept in `extra` so that a
/// read-modify-write never drops fields written by other tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub credential: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_theme: Option<String>,
    #[serde(default)]
    pub team: Vec<RosterEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectSettings {
    pub identity: Identity,
    pub channel_id: ChannelId,
    pub credential: String,
}

impl WorkspaceConfig {
    /// Returns the first required connection field that is missing or blank.
    pub fn missing_connect_field(&self) -> Option<&'static str> {
        [
            ("identity", &self.identity),
            ("channel_id", &self.channel_id),
            ("credential", &self.credential),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }

    pub fn connect_settings(&self) -> Result<ConnectSettings, &'static str> {
        if let Some(field) = self.missing_connect_field() {
            return Err(field);
        }
        Ok(ConnectSettings {
            identity: Identity::new(self.identity.trim()),
            channel_id: ChannelId::new(self.channel_id.trim()),
            credential: self.credential.trim().to_string(),
        })
    }

    pub fn roster_entry(&self, identity: &Identity) -> Option<&RosterEntry> {
        self.team.iter().find(|entry| &entry.identity == identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_round_trips_through_wire_string() {
        assert_eq!(Recipient::parse("all"), Recipient::All);
        assert_eq!(
            Recipient::parse("bob"),
            Recipient::Member(Identity::new("bob"))
        );
        // addressing is case-sensitive; only the exact literal is broadcast
        assert_eq!(
            Recipient::parse("ALL"),
            Recipient::Member(Identity::new("ALL"))
        );
        let json = serde_json::to_string(&Recipient::All).expect("json");
        assert_eq!(json, "\"all\"");
    }

    #[test]
    fn resolved_name_falls_back_to_identity_when_blank() {
        let mut entry = RosterEntry::new(Identity::new("bob"));
        assert_eq!(entry.resolved_name(), "bob");
        entry.display_name = Some("  ".into());
        assert_eq!(entry.resolved_name(), "bob");
        entry.display_name = Some("Bobby".into());
        assert_eq!(entry.resolved_name(), "Bobby");
    }

    #[test]
    fn connect_settings_reports_first_missing_field() {
        let mut config = WorkspaceConfig {
            identity: "alice".into(),
            channel_id: "acme/widgets".into(),
            ..WorkspaceConfig::default()
        };
        assert_eq!(config.connect_settings(), Err("credential"));

        config.credential = "secret".into();
        config.identity = " ".into();
        assert_eq!(config.missing_connect_field(), Some("identity"));

        config.identity = "alice".into();
        let settings = config.connect_settings().expect("complete");
        assert_eq!(settings.channel_id.as_str(), "acme/widgets");
    }

    #[test]
    fn unknown_config_keys_survive_round_trip() {
        let raw = r#"{"identity":"alice","team":[],"message_key":null,"custom":{"a":1}}"#;
        let config: WorkspaceConfig = serde_json::from_str(raw).expect("parse");
        assert!(config.extra.contains_key("custom"));

        let written = serde_json::to_value(&config).expect("serialize");
        assert_eq!(written["custom"]["a"], 1);
        assert!(written.get("message_key").is_some());
    }
}
