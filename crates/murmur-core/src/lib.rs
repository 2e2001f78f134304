//! # murmur-core
//!
//! Envelope model and delivery rules for the murmur realtime engine.
//!
//! This crate defines the fundamental building blocks shared by every
//! murmur instance:
//!
//! - **Envelope** - The discriminated event record carried end-to-end
//! - **Codec** - UTF-8 JSON encoding/decoding with validation
//! - **Filter** - Per-type delivery rules for fan-out
//!
//! ## Example
//!
//! ```rust
//! use murmur_core::{codec, Envelope};
//!
//! let join = Envelope::user_joined("default", "user-1", Some("Alice".into()), None);
//!
//! // Encode and decode
//! let encoded = codec::encode(&join).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(join, decoded);
//! ```

pub mod codec;
pub mod envelope;
pub mod filter;

pub use codec::{decode, encode, CodecError};
pub use envelope::{now_millis, Envelope, Position, UserInfo, DEFAULT_CHANNEL, SYSTEM_USER};
pub use filter::should_deliver;
