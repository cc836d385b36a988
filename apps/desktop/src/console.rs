use client_core::{ClientEvent, RenderableMessage};
use shared::domain::ConnectionState;

/// A line typed into `huddle watch`: `@name text` is direct, anything else is
/// a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLine {
    pub to: Option<String>,
    pub content: String,
}

pub fn parse_input(line: &str) -> Option<InputLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix('@') {
        let (name, content) = rest.split_once(char::is_whitespace)?;
        let content = content.trim();
        if name.is_empty() || content.is_empty() {
            return None;
        }
        return Some(InputLine {
            to: Some(name.to_string()),
            content: content.to_string(),
        });
    }
    Some(InputLine {
        to: None,
        content: line.to_string(),
    })
}

pub fn render_event(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::ConnectionStateChanged { state, reason } => {
            let label = match state {
                ConnectionState::Disconnected => "disconnected",
                ConnectionState::Connecting => "connecting",
                ConnectionState::Connected => "connected",
                ConnectionState::Failed => "connection failed",
            };
            Some(match reason {
                Some(reason) => format!("* {label}: {reason}"),
                None => format!("* {label}"),
            })
        }
        ClientEvent::Message(message) => Some(render_message(message)),
        ClientEvent::HistoryBoundary => Some("--- live ---".to_string()),
        ClientEvent::PresenceUpdated { members } => {
            let names: Vec<&str> = members.iter().map(|m| m.display_name.as_str()).collect();
            Some(format!("* online: {}", names.join(", ")))
        }
        ClientEvent::SendFailed { reason, .. } => Some(format!("! not sent: {reason}")),
        ClientEvent::Error(message) => Some(format!("! {message}")),
        ClientEvent::PresenceCleared
        | ClientEvent::OutgoingPending { .. }
        | ClientEvent::SendConfirmed { .. } => None,
    }
}

fn render_message(message: &RenderableMessage) -> String {
    let from = if message.sent_by_self {
        "you"
    } else {
        message.display_name.as_str()
    };
    let mut line = if message.to.is_broadcast() {
        format!("{from}: {}", message.content)
    } else {
        format!("{from} -> {}: {}", message.to, message.content)
    };
    if let Some(code) = message.code.as_deref().filter(|code| !code.trim().is_empty()) {
        line.push_str("\n```\n");
        line.push_str(code.trim_end());
        line.push_str("\n```");
    }
    line
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;
