//! In-memory presence backend.
//!
//! Leases are deadlines on the tokio clock, so tests can drive expiry
//! with `tokio::time::pause` and a single instance can run without an
//! external store. Semantics mirror the Redis backend: expired members
//! survive in the set until a read reconciles them away.

use async_trait::async_trait;
use dashmap::DashMap;
use murmur_core::UserInfo;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::profile::{encode_profile, parse_profile};
use crate::traits::{PresenceError, PresenceStore, PRESENCE_TTL};

struct Lease {
    value: String,
    expires_at: Instant,
}

impl Lease {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process presence backend.
pub struct MemoryPresence {
    channels: DashMap<String, HashMap<String, Lease>>,
    ttl: Duration,
}

impl MemoryPresence {
    /// Create a store with the standard lease TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(PRESENCE_TTL)
    }

    /// Create a store with a custom lease TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            ttl,
        }
    }
}

impl Default for MemoryPresence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresence {
    async fn add(
        &self,
        channel_id: &str,
        user_id: &str,
        username: Option<&str>,
        color: Option<&str>,
    ) -> Result<(), PresenceError> {
        let lease = Lease {
            value: encode_profile(username, color),
            expires_at: Instant::now() + self.ttl,
        };

        self.channels
            .entry(channel_id.to_string())
            .or_default()
            .insert(user_id.to_string(), lease);

        debug!(channel = %channel_id, user = %user_id, "added user to channel");
        Ok(())
    }

    async fn remove(&self, channel_id: &str, user_id: &str) -> Result<(), PresenceError> {
        if let Some(mut members) = self.channels.get_mut(channel_id) {
            members.remove(user_id);
        }

        debug!(channel = %channel_id, user = %user_id, "removed user from channel");
        Ok(())
    }

    async fn refresh(&self, channel_id: &str, user_id: &str) -> Result<(), PresenceError> {
        if let Some(mut members) = self.channels.get_mut(channel_id) {
            if let Some(lease) = members.get_mut(user_id) {
                // An expired lease stays expired, as with EXPIRE on a
                // missing key.
                if !lease.is_expired() {
                    lease.expires_at = Instant::now() + self.ttl;
                }
            }
        }

        Ok(())
    }

    async fn list(&self, channel_id: &str) -> Result<Vec<UserInfo>, PresenceError> {
        let Some(mut members) = self.channels.get_mut(channel_id) else {
            return Ok(Vec::new());
        };

        members.retain(|user_id, lease| {
            if lease.is_expired() {
                debug!(channel = %channel_id, user = %user_id, "evicted stale member");
                false
            } else {
                true
            }
        });

        Ok(members
            .iter()
            .map(|(user_id, lease)| {
                let (username, color) = parse_profile(&lease.value);
                UserInfo::new(user_id.clone(), username, color)
            })
            .collect())
    }
}
