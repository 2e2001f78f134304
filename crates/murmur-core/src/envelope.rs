//! Event envelope for murmur.
//!
//! Every event that crosses a process boundary (client frame, bus payload,
//! fan-out delivery) is one envelope. The wire form is a single JSON object
//! with a `type` discriminator; in memory each type gets its own payload
//! record so absent optional fields stay "not present" rather than
//! zero-valued.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// User id carried by server-originated sync envelopes.
pub const SYSTEM_USER: &str = "system";

/// The single channel every session currently joins.
pub const DEFAULT_CHANNEL: &str = "default";

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// A canvas coordinate attached to chat events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A channel member as reported by the presence store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl UserInfo {
    /// Create a member entry. Empty profile strings are treated as absent.
    #[must_use]
    pub fn new(user_id: impl Into<String>, username: Option<String>, color: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.filter(|s| !s.is_empty()),
            color: color.filter(|s| !s.is_empty()),
        }
    }
}

/// A chat message on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub channel_id: String,
    pub user_id: String,
    /// Filled by the publisher if the client did not supply one.
    pub message_id: Option<String>,
    pub payload: Option<String>,
    pub position: Option<Position>,
    pub timestamp: i64,
}

/// A user entered the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct UserJoined {
    pub channel_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub color: Option<String>,
    pub timestamp: i64,
}

/// A user left the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct UserLeft {
    pub channel_id: String,
    pub user_id: String,
    pub timestamp: i64,
}

/// Authoritative membership snapshot, sent directly to a newly bound
/// session. `user_id` is always [`SYSTEM_USER`].
#[derive(Debug, Clone, PartialEq)]
pub struct UserSync {
    pub channel_id: String,
    pub user_id: String,
    pub users: Vec<UserInfo>,
    pub timestamp: i64,
}

/// A user changed their display name.
#[derive(Debug, Clone, PartialEq)]
pub struct UsernameChanged {
    pub channel_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub timestamp: i64,
}

/// A user changed their color.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorChanged {
    pub channel_id: String,
    pub user_id: String,
    pub color: Option<String>,
    pub timestamp: i64,
}

/// An event type this build does not know. Decoded as a pass-through so
/// newer peers on the same bus do not poison the subscription loop; the
/// fan-out filter drops it.
#[derive(Debug, Clone, PartialEq)]
pub struct Unknown {
    pub kind: String,
    pub channel_id: String,
    pub user_id: String,
    pub timestamp: i64,
}

/// The event envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Chat(Chat),
    UserJoined(UserJoined),
    UserLeft(UserLeft),
    UserSync(UserSync),
    UsernameChanged(UsernameChanged),
    ColorChanged(ColorChanged),
    Unknown(Unknown),
}

impl Envelope {
    /// Create a `user_joined` event stamped with the current time.
    #[must_use]
    pub fn user_joined(
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        username: Option<String>,
        color: Option<String>,
    ) -> Self {
        Envelope::UserJoined(UserJoined {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            username: username.filter(|s| !s.is_empty()),
            color: color.filter(|s| !s.is_empty()),
            timestamp: now_millis(),
        })
    }

    /// Create a `user_left` event stamped with the current time.
    #[must_use]
    pub fn user_left(channel_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Envelope::UserLeft(UserLeft {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            timestamp: now_millis(),
        })
    }

    /// Create a `user_sync` snapshot for a channel.
    #[must_use]
    pub fn user_sync(channel_id: impl Into<String>, users: Vec<UserInfo>) -> Self {
        Envelope::UserSync(UserSync {
            channel_id: channel_id.into(),
            user_id: SYSTEM_USER.to_string(),
            users,
            timestamp: now_millis(),
        })
    }

    /// The wire discriminator for this envelope.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Envelope::Chat(_) => "chat",
            Envelope::UserJoined(_) => "user_joined",
            Envelope::UserLeft(_) => "user_left",
            Envelope::UserSync(_) => "user_sync",
            Envelope::UsernameChanged(_) => "username_changed",
            Envelope::ColorChanged(_) => "color_changed",
            Envelope::Unknown(u) => &u.kind,
        }
    }

    /// The channel this event is scoped to.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        match self {
            Envelope::Chat(e) => &e.channel_id,
            Envelope::UserJoined(e) => &e.channel_id,
            Envelope::UserLeft(e) => &e.channel_id,
            Envelope::UserSync(e) => &e.channel_id,
            Envelope::UsernameChanged(e) => &e.channel_id,
            Envelope::ColorChanged(e) => &e.channel_id,
            Envelope::Unknown(e) => &e.channel_id,
        }
    }

    /// The subject user of this event.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Envelope::Chat(e) => &e.user_id,
            Envelope::UserJoined(e) => &e.user_id,
            Envelope::UserLeft(e) => &e.user_id,
            Envelope::UserSync(e) => &e.user_id,
            Envelope::UsernameChanged(e) => &e.user_id,
            Envelope::ColorChanged(e) => &e.user_id,
            Envelope::Unknown(e) => &e.user_id,
        }
    }

    /// Origin-assigned creation time in Unix milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        match self {
            Envelope::Chat(e) => e.timestamp,
            Envelope::UserJoined(e) => e.timestamp,
            Envelope::UserLeft(e) => e.timestamp,
            Envelope::UserSync(e) => e.timestamp,
            Envelope::UsernameChanged(e) => e.timestamp,
            Envelope::ColorChanged(e) => e.timestamp,
            Envelope::Unknown(e) => e.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_joined_drops_empty_profile() {
        let e = Envelope::user_joined("default", "u1", Some(String::new()), Some("#fff".into()));
        match e {
            Envelope::UserJoined(ev) => {
                assert_eq!(ev.username, None);
                assert_eq!(ev.color.as_deref(), Some("#fff"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_user_sync_subject_is_system() {
        let e = Envelope::user_sync("default", vec![]);
        assert_eq!(e.user_id(), SYSTEM_USER);
        assert_eq!(e.kind(), "user_sync");
    }

    #[test]
    fn test_accessors() {
        let e = Envelope::user_left("room", "u2");
        assert_eq!(e.channel_id(), "room");
        assert_eq!(e.user_id(), "u2");
        assert!(e.timestamp() > 0);
    }
}
