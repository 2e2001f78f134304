//! Redis bus backend.
//!
//! Publishes over a shared multiplexed connection; each subscription gets
//! its own pub/sub connection driven by a background task that forwards
//! payloads until cancelled.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::traits::{Bus, BusError, Subscription};

/// Buffered payloads per subscription before the forwarder blocks.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Bus backend over Redis pub/sub.
pub struct RedisBus {
    client: ::redis::Client,
    conn: ::redis::aio::MultiplexedConnection,
}

impl RedisBus {
    /// Connect to Redis and verify the connection with a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or Redis is unreachable.
    pub async fn connect(address: &str) -> Result<Self, BusError> {
        let client =
            ::redis::Client::open(address).map_err(|e| BusError::Connection(e.to_string()))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(address = %address, "connected to bus");

        Ok(Self { client, conn })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        use ::redis::AsyncCommands;

        let mut conn = self.conn.clone();
        let _: () = conn
            .publish(topic, &payload[..])
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        debug!(topic = %topic, bytes = payload.len(), "published payload");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<Subscription, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        info!(topic = %topic, "subscribed to bus topic");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let topic = topic.to_string();

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(topic = %topic, "subscription cancelled");
                        break;
                    }
                    msg = stream.next() => {
                        match msg {
                            Some(msg) => match msg.get_payload::<Vec<u8>>() {
                                Ok(payload) => {
                                    if tx.send(Ok(Bytes::from(payload))).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    error!(topic = %topic, error = %e, "bad bus payload");
                                    let _ = tx
                                        .send(Err(BusError::Subscribe(e.to_string())))
                                        .await;
                                    break;
                                }
                            },
                            None => {
                                let _ = tx
                                    .send(Err(BusError::Connection(
                                        "bus subscription stream ended".to_string(),
                                    )))
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    async fn health(&self) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(())
    }
}
