//! In-memory bus backend.
//!
//! One `tokio::sync::broadcast` channel per topic. Useful for tests and
//! for single-instance deployments that have no cross-instance traffic to
//! carry; the fan-out path is identical either way.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::traits::{Bus, BusError, Subscription};

/// Per-topic broadcast capacity. Receivers that fall behind skip payloads
/// (`RecvError::Lagged`), matching the lossy worst case of a real bus.
const TOPIC_CAPACITY: usize = 1024;

/// In-process bus backend.
#[derive(Default)]
pub struct MemoryBus {
    topics: DashMap<String, broadcast::Sender<Bytes>>,
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        // send() errs only when there are no subscribers; pub/sub semantics
        // make that a successful publish to nobody.
        let _ = self.sender(topic).send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<Subscription, BusError> {
        let mut source = self.sender(topic).subscribe();
        let (tx, rx) = mpsc::channel(TOPIC_CAPACITY);
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(topic = %topic, "subscription cancelled");
                        break;
                    }
                    msg = source.recv() => match msg {
                        Ok(payload) => {
                            if tx.send(Ok(payload)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "subscription lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    async fn health(&self) -> Result<(), BusError> {
        Ok(())
    }
}
