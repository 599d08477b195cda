//! Broker-facing transport contract.
//!
//! A [`Broker`] knows how to reach the durable queue; each call to
//! [`Broker::open`] establishes a fresh connection and declares the queue and
//! consumer subscription, yielding a [`Session`]. Sessions are cheap handles
//! that report whether their connection is still usable; once closed they
//! never reopen. Reconnecting means opening a new session.
//!
//! Deliveries are identified by an opaque [`DeliveryTag`] that stays valid
//! across sessions of the same broker, so a job consumed on one connection can
//! be settled on another.

use async_trait::async_trait;
use thiserror::Error;

/// Opaque broker-assigned identity of one delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub String);

impl core::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw message handed out by a session, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub body: Vec<u8>,
}

/// Final disposition of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Processed; remove the message permanently.
    Ack,
    /// Return the message to the queue for redelivery.
    Requeue { body: Vec<u8> },
    /// Remove the message without processing it.
    Discard,
    /// Move the message to the dead-letter queue.
    DeadLetter { body: Vec<u8>, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached or the connection broke mid-command.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// The session was already closed.
    #[error("session closed")]
    Closed,

    /// The broker rejected a command.
    #[error("broker command error: {0}")]
    Command(String),

    /// The delivery tag is not pending on this broker.
    #[error("unknown delivery {0}")]
    UnknownDelivery(DeliveryTag),
}

impl TransportError {
    /// Whether the failure means the session is unusable and a reconnect may help.
    pub fn is_connection(&self) -> bool {
        matches!(self, TransportError::Connection(_) | TransportError::Closed)
    }
}

/// Entry point to a durable queue.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Session: Session;

    /// Connect, declare the queue and the consumer subscription.
    async fn open(&self) -> Result<Self::Session, TransportError>;
}

/// One live connection to the broker.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// `false` once the connection failed or was closed.
    fn is_open(&self) -> bool;

    /// Enqueue one message durably.
    async fn publish(&self, body: &[u8]) -> Result<(), TransportError>;

    /// Wait a bounded time for the next new delivery.
    ///
    /// `Ok(None)` means nothing arrived within the broker's poll window.
    async fn fetch(&self) -> Result<Option<Delivery>, TransportError>;

    /// Deliveries previously handed to this consumer and never settled.
    ///
    /// Called once at process start so a crashed run's jobs are redelivered.
    async fn recover(&self) -> Result<Vec<Delivery>, TransportError>;

    async fn settle(&self, tag: &DeliveryTag, settlement: Settlement)
    -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
