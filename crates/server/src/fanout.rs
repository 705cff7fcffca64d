// Broadcast fanout: push a membership snapshot to every live connection.
//
// Each target gets its own send task; the batch completes only after
// every send has settled. A failed or slow target never takes down the
// rest of the broadcast — that is the central reliability contract.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use tally_common::{protocol::ws::WsMessage, types::ConnectionRecord};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Upper bound for a single delivery. One stalled peer bounds the batch
/// at this, instead of stalling it indefinitely.
pub(crate) const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a single delivery failed. Always caught per target and recorded
/// in the [`BroadcastReport`], never propagated.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The target id has no live outbound channel — it disconnected
    /// between the snapshot read and the send.
    #[error("no live channel for target")]
    StaleTarget,

    /// The target's outbound channel closed while sending.
    #[error("outbound channel closed")]
    ChannelClosed,

    /// The send did not settle within [`SEND_TIMEOUT`].
    #[error("send timed out")]
    Timeout,
}

/// Transport send boundary for broadcasts. Production uses the
/// [`ConnectionHub`]; tests substitute recording or failing senders.
pub trait SnapshotSender: Clone + Send + Sync + 'static {
    fn send(
        &self,
        target: &str,
        message: WsMessage,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// Per-target outcome of one broadcast, as a first-class value.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, DeliveryError)>,
}

impl BroadcastReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Deliver a per-target payload to every connection in the snapshot.
///
/// `payload` builds the frame for one target from the full list. All
/// sends run concurrently and the call returns only after each one has
/// succeeded, failed, or timed out.
pub async fn broadcast_with<S, F>(
    connections: &[ConnectionRecord],
    payload: F,
    sender: &S,
) -> BroadcastReport
where
    S: SnapshotSender,
    F: Fn(&str, &[ConnectionRecord]) -> WsMessage,
{
    let mut tasks = JoinSet::new();
    for target in connections {
        let target_id = target.connection_id.clone();
        let message = payload(&target_id, connections);
        let sender = sender.clone();
        tasks.spawn(async move {
            let outcome = match tokio::time::timeout(SEND_TIMEOUT, sender.send(&target_id, message))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout),
            };
            (target_id, outcome)
        });
    }

    let mut report = BroadcastReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((target_id, Ok(()))) => report.delivered.push(target_id),
            Ok((target_id, Err(delivery_error))) => {
                warn!(%target_id, %delivery_error, "snapshot delivery failed; continuing broadcast");
                report.failed.push((target_id, delivery_error));
            }
            Err(join_error) => {
                error!(%join_error, "broadcast send task panicked");
            }
        }
    }

    report
}

/// Broadcast the default snapshot payload `{connection_id, connections}`
/// to every connection in the list.
pub async fn broadcast_snapshot<S: SnapshotSender>(
    connections: &[ConnectionRecord],
    sender: &S,
) -> BroadcastReport {
    broadcast_with(
        connections,
        |target_id, all| WsMessage::Snapshot {
            connection_id: target_id.to_owned(),
            connections: all.to_vec(),
        },
        sender,
    )
    .await
}

/// Live outbound channels, one per connected socket. Registered when a
/// socket opens, removed when it closes; the delivery side of fanout.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    channels: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<WsMessage>>>>,
}

impl ConnectionHub {
    pub async fn register(&self, connection_id: &str, sender: mpsc::UnboundedSender<WsMessage>) {
        self.channels.write().await.insert(connection_id.to_owned(), sender);
    }

    pub async fn remove(&self, connection_id: &str) {
        self.channels.write().await.remove(connection_id);
    }

    pub async fn live_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Direct send to one connection, outside a broadcast.
    pub async fn send_to(
        &self,
        connection_id: &str,
        message: WsMessage,
    ) -> Result<(), DeliveryError> {
        SnapshotSender::send(self, connection_id, message).await
    }
}

impl SnapshotSender for ConnectionHub {
    async fn send(&self, target: &str, message: WsMessage) -> Result<(), DeliveryError> {
        let channel = self.channels.read().await.get(target).cloned();
        match channel {
            Some(channel) => channel.send(message).map_err(|_| DeliveryError::ChannelClosed),
            None => Err(DeliveryError::StaleTarget),
        }
    }
}
