/**
 * Message Bus
 *
 * The shared publish/subscribe medium the cross-instance relay runs over.
 *
 * # Backends
 *
 * - `InMemoryBus` - a `tokio::sync::broadcast` channel. Every clone of the bus
 *   shares the channel, so several relays in one process behave like several
 *   server instances. Used when no database is configured and in tests.
 * - `PgNotifyBus` (see `pg_bus`) - PostgreSQL `LISTEN`/`NOTIFY`, shared by every
 *   process pointed at the same database.
 *
 * Delivery is best-effort on both: a lagging in-memory subscriber skips what it
 * missed, and a notification sent while a listener reconnects is lost.
 */

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::backend::error::{CollabError, CollabResult};

/// One message received from a bus channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Shared publish/subscribe bus
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a text payload on a channel
    async fn publish(&self, channel: &str, payload: String) -> CollabResult<()>;

    /// Subscribe to a set of channels; the stream ends when the bus goes away
    async fn subscribe(&self, channels: &[String]) -> CollabResult<BoxStream<'static, BusMessage>>;

    /// Short backend name for logs and stats
    fn backend(&self) -> &'static str;
}

/// In-process bus over a broadcast channel
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl InMemoryBus {
    /// Create a bus whose subscribers buffer up to `capacity` messages
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> CollabResult<()> {
        let message = BusMessage {
            channel: channel.to_string(),
            payload,
        };
        match self.tx.send(message) {
            Ok(subscriber_count) => {
                tracing::debug!(
                    "[Bus] Published on {} to {} subscriber(s)",
                    channel,
                    subscriber_count
                );
                Ok(())
            }
            Err(_) => {
                // No subscribers, that's okay
                tracing::debug!("[Bus] No subscribers on {}", channel);
                Ok(())
            }
        }
    }

    async fn subscribe(&self, channels: &[String]) -> CollabResult<BoxStream<'static, BusMessage>> {
        if channels.is_empty() {
            return Err(CollabError::bus("subscribe called with no channels"));
        }
        let wanted = channels.to_vec();
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| {
            let keep = match item {
                Ok(message) if wanted.contains(&message.channel) => Some(message),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("[Bus] Subscriber lagged, skipped {} message(s)", skipped);
                    None
                }
            };
            futures_util::future::ready(keep)
        });
        Ok(stream.boxed())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
