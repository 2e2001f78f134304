//! # murmur-presence
//!
//! TTL-leased channel presence for the murmur realtime engine.
//!
//! Presence answers "who is in channel X?" across every instance. Each
//! member of a channel holds a short-lived liveness lease that its session
//! refreshes on a heartbeat; a session that dies silently simply stops
//! refreshing and its entry expires. Reads reconcile: members whose lease
//! is gone are evicted from the channel set on the spot.
//!
//! Backends implement the [`PresenceStore`] trait:
//!
//! - **Redis** - Production backend (set membership + leased keys)
//! - **Memory** - In-process backend for tests and single-instance runs

pub mod memory;
mod profile;
pub mod redis;
pub mod traits;

pub use memory::MemoryPresence;
pub use self::redis::RedisPresence;
pub use traits::{PresenceError, PresenceStore, DEFAULT_NAMESPACE, PRESENCE_TTL};
