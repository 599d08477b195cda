//! Sample persistence boundary.
//!
//! Two kinds of records per job id:
//!
//! - **raw samples**: an append-only, chronologically ordered list written by
//!   the single active Job Runner for that id
//! - **result**: one finalized [`JobResult`], stored with a time-to-live
//!
//! The store does not enforce single-writer access; the channel's
//! single-delivery contract does.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tracker_core::{JobId, JobResult, Sample};

pub use in_memory::InMemorySampleStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisSampleStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("cannot encode or decode record for job {id}: {reason}")]
    Serialization { id: JobId, reason: String },
}

#[async_trait]
pub trait SampleStore: Send + Sync + 'static {
    /// Append one sample to the job's raw list.
    async fn add_value(&self, id: JobId, sample: &Sample) -> Result<(), StoreError>;

    /// All raw samples for the job, oldest first. Empty when none exist.
    async fn get_values(&self, id: JobId) -> Result<Vec<Sample>, StoreError>;

    async fn delete_values(&self, id: JobId) -> Result<(), StoreError>;

    /// Store the finalized result, replacing any previous one.
    async fn add_result(&self, result: &JobResult) -> Result<(), StoreError>;

    /// `Ok(None)` when no result exists or it has expired.
    async fn get_result(&self, id: JobId) -> Result<Option<JobResult>, StoreError>;
}

#[async_trait]
impl<S> SampleStore for Arc<S>
where
    S: SampleStore + ?Sized,
{
    async fn add_value(&self, id: JobId, sample: &Sample) -> Result<(), StoreError> {
        (**self).add_value(id, sample).await
    }

    async fn get_values(&self, id: JobId) -> Result<Vec<Sample>, StoreError> {
        (**self).get_values(id).await
    }

    async fn delete_values(&self, id: JobId) -> Result<(), StoreError> {
        (**self).delete_values(id).await
    }

    async fn add_result(&self, result: &JobResult) -> Result<(), StoreError> {
        (**self).add_result(result).await
    }

    async fn get_result(&self, id: JobId) -> Result<Option<JobResult>, StoreError> {
        (**self).get_result(id).await
    }
}
