//! Delivery rules for fan-out.
//!
//! One published envelope turns into N per-session writes. Which sessions
//! qualify depends on the event type:
//!
//! - `chat` is suppressed back to its sender (the client echoes its own
//!   message optimistically); everyone else in the channel receives it.
//! - Presence events (`user_joined`, `user_left`, `username_changed`,
//!   `color_changed`) go to everyone in the channel, origin included, so
//!   the origin's UI is driven by the same event stream as its peers.
//! - `user_sync` is normally written directly at connect time and never
//!   published, but one arriving on the bus is delivered channel-wide.
//! - Unknown types are dropped.

use crate::envelope::Envelope;

/// Decide whether `envelope` should be delivered to the session identified
/// by `session_channel` / `session_user`.
#[must_use]
pub fn should_deliver(envelope: &Envelope, session_channel: &str, session_user: &str) -> bool {
    if envelope.channel_id() != session_channel {
        return false;
    }

    match envelope {
        Envelope::Chat(chat) => chat.user_id != session_user,
        Envelope::Unknown(_) => false,
        _ => true,
    }
}
