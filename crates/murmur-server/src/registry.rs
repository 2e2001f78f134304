//! In-process session registry.
//!
//! Every live session on this instance is registered here with its
//! identity, its bounded outbound queue, and its cancellation token. The
//! fan-out engine turns one bus payload into N queue writes through
//! [`SessionRegistry::broadcast_filter`]; nothing in that path ever waits
//! on a slow socket.

use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique identifier for a session on this instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sess_{}", Uuid::new_v4().as_simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered session's broadcast surface.
pub struct SessionHandle {
    /// User bound to the session. Immutable after bind.
    pub user_id: String,
    /// Channel the session joined. Immutable after bind.
    pub channel_id: String,
    sender: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Create a handle for a bound session.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        sender: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            sender,
            cancel,
        }
    }
}

/// The set of live sessions on this instance.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Register a session.
    pub fn register(&self, id: SessionId, handle: SessionHandle) {
        debug!(session = %id, user = %handle.user_id, "session registered");
        self.sessions.insert(id, handle);
    }

    /// Deregister a session.
    ///
    /// Returns `true` if the session was registered.
    pub fn unregister(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session = %id, "session deregistered");
        }
        removed
    }

    /// Queue `payload` to every session matching `predicate`.
    ///
    /// Writes are non-blocking: a session whose outbound queue is full is
    /// disconnected (its token is cancelled) instead of holding up the
    /// rest of the channel. Returns the number of sessions written to.
    pub fn broadcast_filter<F>(&self, payload: Bytes, predicate: F) -> usize
    where
        F: Fn(&SessionHandle) -> bool,
    {
        let mut delivered = 0;

        for entry in self.sessions.iter() {
            let handle = entry.value();
            if handle.cancel.is_cancelled() || !predicate(handle) {
                continue;
            }

            match handle.sender.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        session = %entry.key(),
                        user = %handle.user_id,
                        "outbound queue full, disconnecting slow session"
                    );
                    handle.cancel.cancel();
                }
                // Session is already tearing down; it will deregister itself.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        delivered
    }

    /// Cancel every registered session. Used during shutdown; each session
    /// deregisters itself as it exits.
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
        }
    }
}
