//! One-shot acknowledgement capability.
//!
//! A consumed job is the plain [`JobDescriptor`] paired with an [`AckHandle`]
//! tied to its transport message. The handle is consumed by either `ack` or
//! `reject`, so settling a job twice does not type-check. Dropping the handle
//! without settling leaves the message pending on the broker.

use async_trait::async_trait;

use tracker_core::JobDescriptor;

use crate::channel::ChannelError;

/// Settles the transport message behind a consumed job.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Permanently remove the message from the channel.
    async fn ack(&self) -> Result<(), ChannelError>;

    /// Return the message to the channel for redelivery.
    async fn reject(&self) -> Result<(), ChannelError>;
}

/// Owned, single-use wrapper around an [`Acknowledger`].
pub struct AckHandle {
    inner: Box<dyn Acknowledger>,
}

impl AckHandle {
    pub fn new(acknowledger: impl Acknowledger + 'static) -> Self {
        Self {
            inner: Box::new(acknowledger),
        }
    }

    pub async fn ack(self) -> Result<(), ChannelError> {
        self.inner.ack().await
    }

    pub async fn reject(self) -> Result<(), ChannelError> {
        self.inner.reject().await
    }
}

impl core::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AckHandle").finish_non_exhaustive()
    }
}

/// A job descriptor delivered by the channel, together with its capability.
#[derive(Debug)]
pub struct AckJob {
    job: JobDescriptor,
    handle: AckHandle,
}

impl AckJob {
    pub fn new(job: JobDescriptor, handle: AckHandle) -> Self {
        Self { job, handle }
    }

    pub fn job(&self) -> &JobDescriptor {
        &self.job
    }

    pub async fn ack(self) -> Result<(), ChannelError> {
        self.handle.ack().await
    }

    pub async fn reject(self) -> Result<(), ChannelError> {
        self.handle.reject().await
    }

    pub fn into_parts(self) -> (JobDescriptor, AckHandle) {
        (self.job, self.handle)
    }
}
