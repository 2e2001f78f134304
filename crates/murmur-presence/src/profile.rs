//! Lease value encoding.
//!
//! The lease key's value doubles as the member's profile. Three forms
//! exist in the wild:
//!
//! - a JSON blob `{"username":"Alice","color":"#ef4444"}` with empty
//!   fields omitted (current),
//! - the literal `"1"`, meaning "present, no profile" (legacy marker),
//! - any other bare string, taken as a username (oldest format).
//!
//! Writers always emit the first two; readers must accept all three.

use serde::{Deserialize, Serialize};

pub(crate) const NO_PROFILE_MARKER: &str = "1";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<String>,
}

/// Encode a profile into a lease value. Empty strings count as absent.
pub(crate) fn encode_profile(username: Option<&str>, color: Option<&str>) -> String {
    let profile = Profile {
        username: username.filter(|s| !s.is_empty()).map(str::to_string),
        color: color.filter(|s| !s.is_empty()).map(str::to_string),
    };

    if profile.username.is_none() && profile.color.is_none() {
        return NO_PROFILE_MARKER.to_string();
    }

    serde_json::to_string(&profile).unwrap_or_else(|_| NO_PROFILE_MARKER.to_string())
}

/// Parse a lease value into `(username, color)`.
pub(crate) fn parse_profile(value: &str) -> (Option<String>, Option<String>) {
    if value.is_empty() || value == NO_PROFILE_MARKER {
        return (None, None);
    }

    match serde_json::from_str::<Profile>(value) {
        Ok(profile) => (
            profile.username.filter(|s| !s.is_empty()),
            profile.color.filter(|s| !s.is_empty()),
        ),
        // Oldest format: the value is the username itself.
        Err(_) => (Some(value.to_string()), None),
    }
}
