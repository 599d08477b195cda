use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use tracker_core::{JobId, JobResult, Sample};

use super::{SampleStore, StoreError};

#[derive(Debug, Default)]
struct Records {
    values: HashMap<JobId, Vec<Sample>>,
    results: HashMap<JobId, (JobResult, Instant)>,
}

/// In-memory sample store.
///
/// Intended for tests/dev. Expired results are dropped on lookup and swept
/// whenever a new result is written.
/// Expiry follows tokio's clock, so paused-time tests can step past a TTL.
#[derive(Debug)]
pub struct InMemorySampleStore {
    records: RwLock<Records>,
    result_ttl: Duration,
}

impl InMemorySampleStore {
    pub fn new(result_ttl: Duration) -> Self {
        Self {
            records: RwLock::new(Records::default()),
            result_ttl,
        }
    }

    /// Number of jobs that currently have raw samples.
    pub fn jobs_with_values(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values
            .len()
    }

    /// Number of results held, expired ones included until the next sweep.
    pub fn results_held(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .results
            .len()
    }
}

#[async_trait]
impl SampleStore for InMemorySampleStore {
    async fn add_value(&self, id: JobId, sample: &Sample) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.values.entry(id).or_default().push(*sample);
        Ok(())
    }

    async fn get_values(&self, id: JobId) -> Result<Vec<Sample>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values.get(&id).cloned().unwrap_or_default())
    }

    async fn delete_values(&self, id: JobId) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.values.remove(&id);
        Ok(())
    }

    async fn add_result(&self, result: &JobResult) -> Result<(), StoreError> {
        let now = Instant::now();
        let expires_at = now + self.result_ttl;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.results.retain(|_, (_, expiry)| now < *expiry);
        records
            .results
            .insert(result.id, (result.clone(), expires_at));
        Ok(())
    }

    async fn get_result(&self, id: JobId) -> Result<Option<JobResult>, StoreError> {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let Some((result, expires_at)) = records.results.get(&id) else {
            return Ok(None);
        };
        if now < *expires_at {
            return Ok(Some(result.clone()));
        }
        records.results.remove(&id);
        Ok(None)
    }
}
