//! Presence store abstraction.

use async_trait::async_trait;
use murmur_core::UserInfo;
use std::time::Duration;
use thiserror::Error;

/// Liveness lease duration. A session refreshes its lease on every
/// heartbeat; an entry that goes this long without a refresh expires.
pub const PRESENCE_TTL: Duration = Duration::from_secs(300);

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "chat";

/// Presence store errors.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Could not reach the store.
    #[error("presence connection failed: {0}")]
    Connection(String),

    /// A store operation failed.
    #[error("presence operation failed: {0}")]
    Store(String),
}

/// Key of a channel's member set.
#[must_use]
pub fn channel_users_key(namespace: &str, channel_id: &str) -> String {
    format!("{namespace}:channel:{channel_id}:users")
}

/// Key of one member's liveness lease.
#[must_use]
pub fn user_lease_key(namespace: &str, channel_id: &str, user_id: &str) -> String {
    format!("{namespace}:user:{channel_id}:{user_id}")
}

/// The shared presence set, keyed by `(channel, user)`.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Add a user to a channel, or replace their profile if already
    /// present. Either way the liveness lease is (re)written with the
    /// full TTL; this is also how profile changes persist.
    ///
    /// # Errors
    ///
    /// Returns an error if a store step failed.
    async fn add(
        &self,
        channel_id: &str,
        user_id: &str,
        username: Option<&str>,
        color: Option<&str>,
    ) -> Result<(), PresenceError>;

    /// Remove a user from a channel and delete their lease. Both steps
    /// are attempted even if the first fails.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    async fn remove(&self, channel_id: &str, user_id: &str) -> Result<(), PresenceError>;

    /// Extend a user's lease by the full TTL. A lease that has already
    /// expired is left alone; the call still succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the store was unreachable.
    async fn refresh(&self, channel_id: &str, user_id: &str) -> Result<(), PresenceError>;

    /// List a channel's live members. Members whose lease has expired are
    /// evicted from the set and omitted. Order is unspecified.
    ///
    /// # Errors
    ///
    /// Returns an error if the member set could not be read.
    async fn list(&self, channel_id: &str) -> Result<Vec<UserInfo>, PresenceError>;
}
