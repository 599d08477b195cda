//! `tracker-bus`: durable publish/consume transport for job descriptors.
//!
//! ## Layers
//!
//! - [`transport`]: the broker-facing contract (`Broker` opens `Session`s).
//!   Implementations live in infrastructure crates (Redis Streams) or here
//!   ([`memory::MemoryBroker`], for tests/dev).
//! - [`ack`]: the one-shot acknowledgement capability attached to every
//!   consumed job.
//! - [`channel`]: the [`MessageChannel`] contract seen by the scheduler, plus
//!   its notices and errors.
//! - [`durable`]: [`DurableChannel`], which implements the contract over any
//!   `Broker` with guarded reconnects and a background read loop.
//!
//! Delivery is **at-least-once**: a job may be seen again after a reject, a
//! crash, or a malformed-message policy that leaves it pending.

pub mod ack;
pub mod channel;
pub mod durable;
pub mod memory;
pub mod transport;

pub use ack::{AckHandle, AckJob, Acknowledger};
pub use channel::{
    ChannelConfig, ChannelError, ChannelNotice, Consumer, MalformedPolicy, MessageChannel,
};
pub use durable::DurableChannel;
pub use memory::MemoryBroker;
pub use transport::{Broker, Delivery, DeliveryTag, Session, Settlement, TransportError};
