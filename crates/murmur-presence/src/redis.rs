//! Redis presence backend.
//!
//! Channel membership lives in a set keyed
//! `{ns}:channel:{channel}:users`; each member's liveness lease is a
//! TTL'd key `{ns}:user:{channel}:{user}` whose value carries the
//! profile blob.

use async_trait::async_trait;
use murmur_core::UserInfo;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::profile::{encode_profile, parse_profile};
use crate::traits::{
    channel_users_key, user_lease_key, PresenceError, PresenceStore, DEFAULT_NAMESPACE,
    PRESENCE_TTL,
};

/// Presence backend over Redis.
pub struct RedisPresence {
    conn: ::redis::aio::MultiplexedConnection,
    namespace: String,
    ttl: Duration,
}

impl RedisPresence {
    /// Connect to Redis and verify the connection with a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or Redis is unreachable.
    pub async fn connect(address: &str) -> Result<Self, PresenceError> {
        let client =
            ::redis::Client::open(address).map_err(|e| PresenceError::Connection(e.to_string()))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PresenceError::Connection(e.to_string()))?;

        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| PresenceError::Connection(e.to_string()))?;

        info!(address = %address, "connected to presence store");

        Ok(Self {
            conn,
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl: PRESENCE_TTL,
        })
    }

    /// Override the key namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Override the lease TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl PresenceStore for RedisPresence {
    async fn add(
        &self,
        channel_id: &str,
        user_id: &str,
        username: Option<&str>,
        color: Option<&str>,
    ) -> Result<(), PresenceError> {
        use ::redis::AsyncCommands;

        let set_key = channel_users_key(&self.namespace, channel_id);
        let lease_key = user_lease_key(&self.namespace, channel_id, user_id);
        let mut conn = self.conn.clone();

        let _: () = conn
            .sadd(&set_key, user_id)
            .await
            .map_err(|e| PresenceError::Store(e.to_string()))?;

        let value = encode_profile(username, color);
        let _: () = conn
            .set_ex(&lease_key, value, self.ttl.as_secs())
            .await
            .map_err(|e| PresenceError::Store(e.to_string()))?;

        debug!(channel = %channel_id, user = %user_id, "added user to channel");
        Ok(())
    }

    async fn remove(&self, channel_id: &str, user_id: &str) -> Result<(), PresenceError> {
        use ::redis::AsyncCommands;

        let set_key = channel_users_key(&self.namespace, channel_id);
        let lease_key = user_lease_key(&self.namespace, channel_id, user_id);
        let mut conn = self.conn.clone();

        // Both steps run even if one fails; the caller sees the first error.
        let removed: Result<(), ::redis::RedisError> = conn.srem(&set_key, user_id).await;
        if let Err(e) = &removed {
            error!(channel = %channel_id, user = %user_id, error = %e, "failed to remove user from channel set");
        }

        let deleted: Result<(), ::redis::RedisError> = conn.del(&lease_key).await;
        if let Err(e) = &deleted {
            error!(channel = %channel_id, user = %user_id, error = %e, "failed to delete user lease");
        }

        removed
            .and(deleted)
            .map_err(|e| PresenceError::Store(e.to_string()))?;

        debug!(channel = %channel_id, user = %user_id, "removed user from channel");
        Ok(())
    }

    async fn refresh(&self, channel_id: &str, user_id: &str) -> Result<(), PresenceError> {
        use ::redis::AsyncCommands;

        let lease_key = user_lease_key(&self.namespace, channel_id, user_id);
        let mut conn = self.conn.clone();

        // EXPIRE on a missing key is a no-op; an already-expired session
        // stays expired.
        let _: bool = conn
            .expire(&lease_key, self.ttl.as_secs() as i64)
            .await
            .map_err(|e| PresenceError::Store(e.to_string()))?;

        debug!(channel = %channel_id, user = %user_id, "refreshed presence lease");
        Ok(())
    }

    async fn list(&self, channel_id: &str) -> Result<Vec<UserInfo>, PresenceError> {
        use ::redis::AsyncCommands;

        let set_key = channel_users_key(&self.namespace, channel_id);
        let mut conn = self.conn.clone();

        let member_ids: Vec<String> = conn
            .smembers(&set_key)
            .await
            .map_err(|e| PresenceError::Store(e.to_string()))?;

        let mut users = Vec::with_capacity(member_ids.len());
        for user_id in member_ids {
            let lease_key = user_lease_key(&self.namespace, channel_id, &user_id);
            match conn.get::<_, Option<String>>(&lease_key).await {
                Ok(Some(value)) => {
                    let (username, color) = parse_profile(&value);
                    users.push(UserInfo::new(user_id, username, color));
                }
                Ok(None) => {
                    // Lease expired: reconcile the set in passing.
                    let evicted: Result<(), ::redis::RedisError> =
                        conn.srem(&set_key, &user_id).await;
                    if let Err(e) = evicted {
                        warn!(channel = %channel_id, user = %user_id, error = %e, "failed to evict stale member");
                    }
                    debug!(channel = %channel_id, user = %user_id, "evicted stale member");
                }
                Err(e) => {
                    // Transient read failure: skip the member rather than
                    // evicting someone who may still be alive.
                    warn!(channel = %channel_id, user = %user_id, error = %e, "failed to read lease, skipping member");
                }
            }
        }

        Ok(users)
    }
}
