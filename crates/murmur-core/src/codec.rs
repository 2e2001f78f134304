//! Codec for encoding and decoding envelopes.
//!
//! The wire form is canonical UTF-8 JSON: a single object carrying the
//! `type` discriminator and the fields meaningful for that type. Absent
//! optional fields are omitted entirely; an empty string is emitted and is
//! distinct from an absent field. Unknown JSON fields are ignored on decode.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::{
    Chat, ColorChanged, Envelope, Position, Unknown, UserInfo, UserJoined, UserLeft, UserSync,
    UsernameChanged,
};

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Malformed JSON.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is missing.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A required field is present but empty.
    #[error("field must be non-empty: {0}")]
    EmptyField(&'static str),
}

/// The flat wire representation. All fields optional so that decode can
/// report exactly which required field is missing.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    users: Option<Vec<UserInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
}

/// Encode an envelope to JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let wire = to_wire(envelope);
    let data = serde_json::to_vec(&wire)?;
    Ok(Bytes::from(data))
}

/// Decode an envelope from JSON bytes.
///
/// # Errors
///
/// Returns an error on malformed JSON, or when `type`, `channel_id`,
/// `user_id`, or `timestamp` is missing, or when `channel_id`/`user_id`
/// is empty. An unknown `type` is not an error; it decodes to
/// [`Envelope::Unknown`].
pub fn decode(data: &[u8]) -> Result<Envelope, CodecError> {
    let wire: WireEnvelope = serde_json::from_slice(data)?;
    from_wire(wire)
}

fn to_wire(envelope: &Envelope) -> WireEnvelope {
    let mut wire = WireEnvelope {
        kind: Some(envelope.kind().to_string()),
        channel_id: Some(envelope.channel_id().to_string()),
        user_id: Some(envelope.user_id().to_string()),
        timestamp: Some(envelope.timestamp()),
        ..WireEnvelope::default()
    };

    match envelope {
        Envelope::Chat(e) => {
            wire.message_id = e.message_id.clone();
            wire.payload = e.payload.clone();
            wire.position = e.position;
        }
        Envelope::UserJoined(e) => {
            wire.username = e.username.clone();
            wire.color = e.color.clone();
        }
        Envelope::UserSync(e) => {
            wire.users = Some(e.users.clone());
        }
        Envelope::UsernameChanged(e) => {
            wire.username = e.username.clone();
        }
        Envelope::ColorChanged(e) => {
            wire.color = e.color.clone();
        }
        Envelope::UserLeft(_) | Envelope::Unknown(_) => {}
    }

    wire
}

fn from_wire(wire: WireEnvelope) -> Result<Envelope, CodecError> {
    let kind = wire.kind.ok_or(CodecError::MissingField("type"))?;
    let channel_id = wire.channel_id.ok_or(CodecError::MissingField("channel_id"))?;
    let user_id = wire.user_id.ok_or(CodecError::MissingField("user_id"))?;
    let timestamp = wire.timestamp.ok_or(CodecError::MissingField("timestamp"))?;

    if channel_id.is_empty() {
        return Err(CodecError::EmptyField("channel_id"));
    }
    if user_id.is_empty() {
        return Err(CodecError::EmptyField("user_id"));
    }

    let envelope = match kind.as_str() {
        "chat" => Envelope::Chat(Chat {
            channel_id,
            user_id,
            message_id: wire.message_id,
            payload: wire.payload,
            position: wire.position,
            timestamp,
        }),
        "user_joined" => Envelope::UserJoined(UserJoined {
            channel_id,
            user_id,
            username: wire.username,
            color: wire.color,
            timestamp,
        }),
        "user_left" => Envelope::UserLeft(UserLeft {
            channel_id,
            user_id,
            timestamp,
        }),
        "user_sync" => Envelope::UserSync(UserSync {
            channel_id,
            user_id,
            users: wire.users.unwrap_or_default(),
            timestamp,
        }),
        "username_changed" => Envelope::UsernameChanged(UsernameChanged {
            channel_id,
            user_id,
            username: wire.username,
            timestamp,
        }),
        "color_changed" => Envelope::ColorChanged(ColorChanged {
            channel_id,
            user_id,
            color: wire.color,
            timestamp,
        }),
        other => Envelope::Unknown(Unknown {
            kind: other.to_string(),
            channel_id,
            user_id,
            timestamp,
        }),
    };

    Ok(envelope)
}
