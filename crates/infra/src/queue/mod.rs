//! Broker transports for the job channel.
//!
//! The channel mechanics (reconnects, acknowledgement, read loop) live in
//! `tracker-bus`; this module only provides infrastructure-backed
//! `tracker_bus::Broker` implementations. The in-memory broker for tests/dev
//! is `tracker_bus::MemoryBroker`.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsBroker, RedisStreamsConfig, RedisStreamsSession};
