//! # murmur-server
//!
//! Horizontally scalable realtime chat and presence server for a shared
//! canvas. Each instance terminates WebSocket sessions, publishes every
//! event to a shared bus, and fans bus traffic back out to its local
//! sessions under per-type delivery rules; channel membership lives in a
//! shared presence store with TTL-leased liveness.

pub mod config;
pub mod fanout;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod session;

pub use config::Config;
pub use handlers::AppState;
