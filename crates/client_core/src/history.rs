use channel_transport::ChannelSession;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{error::SyncError, router::MessageRouter, ClientEvent};

/// Replays the most recent `limit` channel messages oldest-first through the
/// router, then emits the history boundary marker.
///
/// On fetch failure the marker is skipped and the error is logged and sent
/// as [`ClientEvent::Error`]; live delivery carries on either way.
pub(crate) async fn replay(
    session: &dyn ChannelSession,
    router: &MessageRouter,
    events: &broadcast::Sender<ClientEvent>,
    limit: usize,
) {
    let mut backlog = match session.history(limit).await {
        Ok(backlog) => backlog,
        Err(err) => {
            let error = SyncError::HistoryFetch(err.to_string());
            warn!(error = %error, channel_id = %session.channel_id(), "history: replay skipped");
            let _ = events.send(ClientEvent::Error(error.to_string()));
            return;
        }
    };

    // transport order is newest first
    backlog.reverse();
    let mut delivered = 0usize;
    for message in &backlog {
        if router.deliver(message, events).await {
            delivered += 1;
        }
    }
    let _ = events.send(ClientEvent::HistoryBoundary);
    info!(
        fetched = backlog.len(),
        delivered,
        channel_id = %session.channel_id(),
        "history: replay complete"
    );
}
