//! Bus abstraction traits.
//!
//! These traits define the interface every bus backend must provide,
//! keeping the fan-out engine and the session path backend-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not reach the bus.
    #[error("bus connection failed: {0}")]
    Connection(String),

    /// The bus rejected a publish.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Subscribing or receiving failed.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// A live subscription to one topic.
///
/// Payloads arrive in bus order. The stream ends cleanly (yields `None`)
/// when the subscription's cancellation token fires; a backend error is
/// surfaced once and then the stream ends.
pub struct Subscription {
    rx: mpsc::Receiver<Result<Bytes, BusError>>,
}

impl Subscription {
    /// Wrap a receiver fed by a backend task.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Result<Bytes, BusError>>) -> Self {
        Self { rx }
    }

    /// Receive the next payload.
    ///
    /// Returns `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Result<Bytes, BusError>> {
        self.rx.recv().await
    }
}

/// A publish/subscribe bus shared by all instances.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a payload to a topic.
    ///
    /// Best-effort fire-and-forget: a failure is surfaced to the caller
    /// but never retried internally.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus rejected the publish.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    /// Subscribe to a topic.
    ///
    /// The returned stream ends when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription could not be established.
    async fn subscribe(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<Subscription, BusError>;

    /// Round-trip a ping to the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus is unreachable.
    async fn health(&self) -> Result<(), BusError>;
}
