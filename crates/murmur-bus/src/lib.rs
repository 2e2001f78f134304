//! # murmur-bus
//!
//! Publish/subscribe bus abstraction for the murmur realtime engine.
//!
//! Every murmur instance publishes each envelope to one well-known topic
//! and consumes the same topic; the bus is what makes a fleet of instances
//! behave like one server. Backends implement the [`Bus`] trait:
//!
//! - **Redis** - Production backend over Redis pub/sub
//! - **Memory** - In-process backend for tests and single-instance runs
//!
//! The bus makes no ordering promise across publishers and does not
//! deduplicate. Origin suppression happens at the fan-out layer, not here.

pub mod memory;
pub mod redis;
pub mod traits;

pub use memory::MemoryBus;
pub use self::redis::RedisBus;
pub use traits::{Bus, BusError, Subscription};
