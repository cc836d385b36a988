use std::sync::Arc;

use anyhow::Result;
use channel_transport::ChannelSession;
use shared::{
    domain::{Identity, PresentMember},
    protocol::PresenceEvent,
};
use storage::RosterStore;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::ClientEvent;

/// Rebuilds the presence view from a full snapshot, registers newcomers on the
/// roster and publishes the resolved member list.
pub(crate) async fn refresh(
    session: &dyn ChannelSession,
    roster: &RosterStore,
    events: &broadcast::Sender<ClientEvent>,
) -> Result<Vec<PresentMember>> {
    let mut identities: Vec<Identity> = session.presence_members().await?;
    identities.sort();
    identities.dedup();

    let entries = roster.merge_present(&identities).await?;
    let members: Vec<PresentMember> = entries
        .iter()
        .map(|entry| PresentMember {
            identity: entry.identity.clone(),
            display_name: entry.resolved_name().to_string(),
        })
        .collect();

    let _ = events.send(ClientEvent::PresenceUpdated {
        members: members.clone(),
    });
    Ok(members)
}

/// Spawns the tracker: one refresh up front, then one per presence change of
/// any kind. Deltas are only used as a trigger; a lagging receiver just
/// refreshes again.
pub(crate) fn spawn_tracker(
    session: Arc<dyn ChannelSession>,
    roster: Arc<RosterStore>,
    events: broadcast::Sender<ClientEvent>,
    mut changes: broadcast::Receiver<PresenceEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        refresh_or_report(session.as_ref(), &roster, &events).await;
        loop {
            match changes.recv().await {
                Ok(change) => {
                    debug!(identity = %change.identity, action = ?change.action, "presence: change");
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "presence: change stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
            refresh_or_report(session.as_ref(), &roster, &events).await;
        }
    })
}

async fn refresh_or_report(
    session: &dyn ChannelSession,
    roster: &RosterStore,
    events: &broadcast::Sender<ClientEvent>,
) {
    if let Err(err) = refresh(session, roster, events).await {
        warn!(error = %err, "presence: refresh failed");
        let _ = events.send(ClientEvent::Error(format!(
            "failed to refresh presence: {err}"
        )));
    }
}
