/**
 * PostgreSQL LISTEN/NOTIFY Bus
 *
 * Publishes with `SELECT pg_notify($1, $2)` through the shared pool and
 * subscribes with a dedicated `PgListener` connection. PostgreSQL caps a
 * notification payload at just under 8000 bytes, so larger payloads are
 * rejected before they reach the server.
 *
 * `PgListener::recv` reconnects on its own after a lost connection. Receive
 * errors are logged and retried with a growing backoff; after
 * `MAX_RECEIVE_FAILURES` in a row the stream ends and the relay subscribes
 * again with a fresh listener.
 */

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use sqlx::postgres::{PgListener, PgPool};
use std::time::Duration;

use crate::backend::error::{CollabError, CollabResult};
use crate::backend::realtime::bus::{BusMessage, MessageBus};

/// Largest payload PostgreSQL accepts for `NOTIFY`
pub const MAX_NOTIFY_PAYLOAD: usize = 7999;

/// Consecutive receive errors before the stream gives up on its listener
pub const MAX_RECEIVE_FAILURES: u32 = 5;

fn receive_backoff(failures: u32) -> Duration {
    Duration::from_millis(250 * 2u64.pow(failures.min(6)))
}

#[derive(Debug, Clone)]
pub struct PgNotifyBus {
    pool: PgPool,
}

impl PgNotifyBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageBus for PgNotifyBus {
    async fn publish(&self, channel: &str, payload: String) -> CollabResult<()> {
        if payload.len() > MAX_NOTIFY_PAYLOAD {
            return Err(CollabError::bus(format!(
                "payload of {} bytes exceeds NOTIFY limit on {}",
                payload.len(),
                channel
            )));
        }

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(|e| CollabError::bus(format!("pg_notify on {} failed: {}", channel, e)))?;
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> CollabResult<BoxStream<'static, BusMessage>> {
        if channels.is_empty() {
            return Err(CollabError::bus("subscribe called with no channels"));
        }

        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| CollabError::bus(format!("listener connect failed: {}", e)))?;
        listener
            .listen_all(channels.iter().map(String::as_str))
            .await
            .map_err(|e| CollabError::bus(format!("LISTEN failed: {}", e)))?;

        tracing::info!("[Bus] Listening on {} PostgreSQL channel(s)", channels.len());

        let stream = stream::unfold(listener, |mut listener| async move {
            let mut failures = 0u32;
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let message = BusMessage {
                            channel: notification.channel().to_string(),
                            payload: notification.payload().to_string(),
                        };
                        return Some((message, listener));
                    }
                    Err(e) => {
                        failures += 1;
                        if failures >= MAX_RECEIVE_FAILURES {
                            tracing::error!(
                                "[Bus] Giving up on listener after {} failed receives: {}",
                                failures,
                                e
                            );
                            return None;
                        }
                        let backoff = receive_backoff(failures);
                        tracing::error!(
                            "[Bus] Notification receive failed, retrying in {:?}: {}",
                            backoff,
                            e
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
