//! Message channel contract (mechanics only).
//!
//! The channel is the scheduler's only view of the broker:
//!
//! ```text
//! new_job ──publish──▶ [durable queue] ──consume──▶ jobs    (AckJob stream)
//!                                               └─▶ notices (errors + reconnect notices)
//! ```
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a job is redelivered after `reject`, after a crash, or
//!   by broker policy; consumers settle each job exactly once.
//! - **Single active delivery**: a message is handed to one consumer at a time.
//! - **No ordering guarantees** across jobs.
//!
//! ## Streams
//!
//! `consume` returns two independent streams fed by one background loop.
//! `jobs` is bounded (the broker absorbs what the scheduler cannot take yet);
//! `notices` is unbounded so reporting never stalls delivery. Both close after
//! `shutdown`, and neither can be restarted.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use tracker_core::{JobDescriptor, JobId};

use crate::ack::AckJob;
use crate::transport::{DeliveryTag, TransportError};

/// What to do with a message whose payload does not decode.
///
/// Every policy reports the message once on the notice stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Neither acknowledge nor reject; the broker's own pending/redelivery
    /// rules decide the message's fate.
    #[default]
    Leave,
    /// Acknowledge and drop.
    Discard,
    /// Move to the dead-letter queue with the decode error as reason.
    DeadLetter,
}

impl FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leave" => Ok(Self::Leave),
            "discard" | "drop" => Ok(Self::Discard),
            "dead-letter" | "dead_letter" | "dlq" => Ok(Self::DeadLetter),
            other => Err(format!(
                "unknown malformed policy {other:?} (expected leave, discard or dead-letter)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Pause between reconnect attempts of the read loop.
    pub reconnect_interval: Duration,
    pub malformed: MalformedPolicy,
    /// Capacity of the job stream.
    pub prefetch: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(5),
            malformed: MalformedPolicy::default(),
            prefetch: 1,
        }
    }
}

impl ChannelConfig {
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed = policy;
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cannot encode job {id}: {reason}")]
    Encode { id: JobId, reason: String },

    #[error("channel is shutting down")]
    Stopped,

    #[error("channel is already being consumed")]
    AlreadyConsuming,
}

/// Non-fatal events reported by the background read loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelNotice {
    /// A payload did not decode into a job descriptor.
    Decode {
        tag: DeliveryTag,
        body: String,
        error: String,
    },
    /// The consuming connection broke; a reconnect loop starts.
    ConnectionLost(TransportError),
    /// One reconnect attempt failed; another follows after the interval.
    ReconnectFailed(TransportError),
    /// The consumer subscription is back; delivery resumes.
    Reconnected,
    /// Pending deliveries from a previous run could not be listed.
    RecoveryFailed(TransportError),
    /// The read loop could not settle a delivery it owned.
    SettleFailed {
        tag: DeliveryTag,
        error: TransportError,
    },
}

impl ChannelNotice {
    pub fn is_error(&self) -> bool {
        !matches!(self, ChannelNotice::Reconnected)
    }
}

impl core::fmt::Display for ChannelNotice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ChannelNotice::Decode { tag, body, error } => {
                write!(f, "cannot decode message {tag} {body:?}: {error}")
            }
            ChannelNotice::ConnectionLost(err) => {
                write!(f, "connection closed unexpectedly: {err}")
            }
            ChannelNotice::ReconnectFailed(err) => write!(f, "cannot reconnect: {err}"),
            ChannelNotice::Reconnected => f.write_str("reconnected"),
            ChannelNotice::RecoveryFailed(err) => {
                write!(f, "cannot recover pending deliveries: {err}")
            }
            ChannelNotice::SettleFailed { tag, error } => {
                write!(f, "cannot settle message {tag}: {error}")
            }
        }
    }
}

/// The two output streams of [`MessageChannel::consume`].
#[derive(Debug)]
pub struct Consumer {
    pub jobs: mpsc::Receiver<AckJob>,
    pub notices: mpsc::UnboundedReceiver<ChannelNotice>,
}

/// Durable publish/consume transport for job descriptors.
///
/// `publish` may be called concurrently with the background consumption
/// started by `consume`.
#[async_trait]
pub trait MessageChannel: Send + Sync + 'static {
    /// Serialize and durably enqueue a descriptor, reconnecting once if the
    /// connection is not open.
    async fn publish(&self, job: &JobDescriptor) -> Result<(), ChannelError>;

    /// Start the background read loop. Only one consumer per channel.
    async fn consume(&self) -> Result<Consumer, ChannelError>;

    /// Stop consuming, close the transport and wait for the read loop to exit.
    async fn shutdown(&self) -> Result<(), ChannelError>;
}

#[async_trait]
impl<C> MessageChannel for Arc<C>
where
    C: MessageChannel + ?Sized,
{
    async fn publish(&self, job: &JobDescriptor) -> Result<(), ChannelError> {
        (**self).publish(job).await
    }

    async fn consume(&self) -> Result<Consumer, ChannelError> {
        (**self).consume().await
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        (**self).shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_policy_parses_aliases() {
        assert_eq!("leave".parse(), Ok(MalformedPolicy::Leave));
        assert_eq!("Discard".parse(), Ok(MalformedPolicy::Discard));
        assert_eq!("dead_letter".parse(), Ok(MalformedPolicy::DeadLetter));
        assert!("requeue".parse::<MalformedPolicy>().is_err());
    }

    #[test]
    fn reconnect_notice_is_not_an_error() {
        assert!(!ChannelNotice::Reconnected.is_error());
        assert!(ChannelNotice::ConnectionLost(TransportError::Closed).is_error());
    }
}
