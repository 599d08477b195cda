//! Per-job state machine.
//!
//! ```text
//!            expire passed
//!   start ───────────────────────────┐
//!     │                              ▼
//!     ▼        deadline         ┌──────────┐  ok   ┌───────┐
//! ┌──────────┐ ───────────────▶ │Finalizing│ ────▶ │ Acked │
//! │ Sampling │                  └──────────┘       └───────┘
//! └──────────┘ ◀─┐                   │ store error
//!   │   │ tick   │                   ▼
//!   │   └────────┘              ┌──────────┐
//!   └─────── cancelled ───────▶ │ Rejected │
//!                               └──────────┘
//! ```
//!
//! Sampling takes one sample, then races cancellation, the expiry deadline
//! and the frequency timer, in that priority. The deadline is fixed when the
//! runner starts; the frequency timer is re-armed from "now" after every
//! sample, so intervals stretch under load.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tracker_bus::AckJob;
use tracker_core::{JobDescriptor, JobId, JobResult, Sample};
use tracker_infra::{SampleStore, StoreError, ValueProvider};

/// What a (re)started job does with raw samples left by an earlier attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleSamples {
    /// Append alongside them.
    #[default]
    Keep,
    /// Delete them before the first sample.
    Discard,
}

impl FromStr for StaleSamples {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "discard" => Ok(Self::Discard),
            other => Err(format!(
                "unknown stale sample policy {other:?} (expected keep or discard)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sampling,
    Finalizing,
}

/// How a run ended. Only `Finalized` leads to an ack.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Finalized { samples: usize },
    Cancelled,
    Failed(StoreError),
}

impl Outcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, Outcome::Finalized { .. })
    }
}

pub struct JobRunner<S, P> {
    store: Arc<S>,
    provider: Arc<P>,
    stale: StaleSamples,
}

impl<S, P> Clone for JobRunner<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            provider: self.provider.clone(),
            stale: self.stale,
        }
    }
}

impl<S, P> JobRunner<S, P>
where
    S: SampleStore,
    P: ValueProvider,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, stale: StaleSamples) -> Self {
        Self {
            store,
            provider,
            stale,
        }
    }

    /// Run the job and settle its message: ack when finalized, reject otherwise.
    pub async fn execute(&self, job: AckJob, cancel: &CancellationToken) -> Outcome {
        let (descriptor, handle) = job.into_parts();
        let id = descriptor.id();
        info!(job_id = %id, frequency = ?descriptor.frequency(), expire = %descriptor.expire(), "job started");

        let outcome = self.run(&descriptor, cancel).await;

        let settled = match &outcome {
            Outcome::Finalized { samples } => {
                info!(job_id = %id, samples, "job finalized");
                handle.ack().await
            }
            Outcome::Cancelled => {
                info!(job_id = %id, "job cancelled, returning it for redelivery");
                handle.reject().await
            }
            Outcome::Failed(err) => {
                error!(job_id = %id, error = %err, "cannot finalize job, returning it for redelivery");
                handle.reject().await
            }
        };
        if let Err(err) = settled {
            error!(job_id = %id, error = %err, "cannot settle job");
        }

        outcome
    }

    /// Drive the state machine to a terminal outcome without settling.
    pub async fn run(&self, job: &JobDescriptor, cancel: &CancellationToken) -> Outcome {
        let id = job.id();
        let now = Utc::now();
        let deadline = Instant::now() + job.remaining(now).unwrap_or_default();

        if self.stale == StaleSamples::Discard {
            if let Err(err) = self.store.delete_values(id).await {
                warn!(job_id = %id, error = %err, "cannot discard stale samples");
            }
        }

        let mut state = if job.is_expired(now) {
            State::Finalizing
        } else {
            State::Sampling
        };

        loop {
            state = match state {
                State::Sampling => {
                    self.sample(id).await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Outcome::Cancelled,
                        _ = sleep_until(deadline) => State::Finalizing,
                        _ = sleep(job.frequency()) => State::Sampling,
                    }
                }
                State::Finalizing => {
                    return match self.finalize(id).await {
                        Ok(samples) => Outcome::Finalized { samples },
                        Err(err) => Outcome::Failed(err),
                    };
                }
            };
        }
    }

    async fn sample(&self, id: JobId) {
        let value = match self.provider.sample().await {
            Ok(value) => value,
            Err(err) => {
                warn!(job_id = %id, error = %err, "cannot take sample");
                return;
            }
        };

        match self.store.add_value(id, &Sample::now(value)).await {
            Ok(()) => debug!(job_id = %id, value, "sample stored"),
            Err(err) => warn!(job_id = %id, error = %err, "cannot store sample"),
        }
    }

    async fn finalize(&self, id: JobId) -> Result<usize, StoreError> {
        let values = self.store.get_values(id).await?;
        let result = JobResult::new(id, values);
        self.store.add_result(&result).await?;
        self.store.delete_values(id).await?;
        Ok(result.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tracker_infra::{InMemorySampleStore, ProviderError};

    use super::*;

    /// Deterministic provider: 1.0, 2.0, 3.0, ...
    #[derive(Debug, Default)]
    pub(crate) struct Counting(AtomicU64);

    #[async_trait]
    impl ValueProvider for Counting {
        async fn sample(&self) -> Result<f64, ProviderError> {
            Ok((self.0.fetch_add(1, Ordering::Relaxed) + 1) as f64)
        }
    }

    /// Fails every other call, starting with the first.
    #[derive(Debug, Default)]
    struct Flaky(AtomicU64);

    #[async_trait]
    impl ValueProvider for Flaky {
        async fn sample(&self) -> Result<f64, ProviderError> {
            if self.0.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
                Err(ProviderError::Unavailable("feed down".to_string()))
            } else {
                Ok(40_000.0)
            }
        }
    }

    /// Finalize step a [`FailingStore`] breaks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        GetValues,
        AddResult,
        DeleteValues,
    }

    /// In-memory store with one finalize step failing.
    #[derive(Debug)]
    struct FailingStore {
        inner: InMemorySampleStore,
        step: Step,
    }

    impl FailingStore {
        fn new(step: Step) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemorySampleStore::new(Duration::from_secs(3600)),
                step,
            })
        }

        fn check(&self, step: Step) -> Result<(), StoreError> {
            if self.step == step {
                return Err(StoreError::Connection("store down".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SampleStore for FailingStore {
        async fn add_value(&self, id: JobId, sample: &Sample) -> Result<(), StoreError> {
            self.inner.add_value(id, sample).await
        }

        async fn get_values(&self, id: JobId) -> Result<Vec<Sample>, StoreError> {
            self.check(Step::GetValues)?;
            self.inner.get_values(id).await
        }

        async fn delete_values(&self, id: JobId) -> Result<(), StoreError> {
            self.check(Step::DeleteValues)?;
            self.inner.delete_values(id).await
        }

        async fn add_result(&self, result: &JobResult) -> Result<(), StoreError> {
            self.check(Step::AddResult)?;
            self.inner.add_result(result).await
        }

        async fn get_result(&self, id: JobId) -> Result<Option<JobResult>, StoreError> {
            self.inner.get_result(id).await
        }
    }

    pub(crate) fn store() -> Arc<InMemorySampleStore> {
        Arc::new(InMemorySampleStore::new(Duration::from_secs(3600)))
    }

    fn job_expiring_in(secs: i64, frequency_secs: u64) -> JobDescriptor {
        JobDescriptor::from_parts(
            JobId::new(),
            Duration::from_secs(frequency_secs),
            Utc::now() + chrono::Duration::seconds(secs),
        )
    }

    fn runner<S: SampleStore>(store: Arc<S>) -> JobRunner<S, Counting> {
        JobRunner::new(store, Arc::new(Counting::default()), StaleSamples::Keep)
    }

    #[tokio::test(start_paused = true)]
    async fn samples_until_expiry_then_finalizes() {
        let store = store();
        let job = job_expiring_in(10, 2);

        let outcome = runner(store.clone()).run(&job, &CancellationToken::new()).await;

        assert_eq!(outcome, Outcome::Finalized { samples: 5 });
        let result = store.get_result(job.id()).await.unwrap().unwrap();
        let values: Vec<f64> = result.values.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(store.get_values(job.id()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_job_finalizes_without_sampling() {
        let store = store();
        let job = job_expiring_in(-5, 2);

        let outcome = runner(store.clone()).run(&job, &CancellationToken::new()).await;

        assert_eq!(outcome, Outcome::Finalized { samples: 0 });
        let result = store.get_result(job.id()).await.unwrap().unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_rejects_and_keeps_partial_samples() {
        let store = store();
        let job = job_expiring_in(10, 2);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let outcome = runner(store.clone()).run(&job, &cancel).await;

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(store.get_values(job.id()).await.unwrap().len(), 2);
        assert_eq!(store.get_result(job.id()).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failures_do_not_stop_sampling() {
        let store = store();
        let job = job_expiring_in(10, 2);
        let runner = JobRunner::new(store.clone(), Arc::new(Flaky::default()), StaleSamples::Keep);

        let outcome = runner.run(&job, &CancellationToken::new()).await;

        // Ticks at 0,2,4,6,8; the 1st, 3rd and 5th fail.
        assert_eq!(outcome, Outcome::Finalized { samples: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_at_finalize_keeps_raw_samples() {
        let store = FailingStore::new(Step::GetValues);
        let job = job_expiring_in(4, 2);

        let outcome = runner(store.clone()).run(&job, &CancellationToken::new()).await;

        assert!(matches!(outcome, Outcome::Failed(StoreError::Connection(_))));
        assert_eq!(store.inner.get_values(job.id()).await.unwrap().len(), 2);
        assert_eq!(store.get_result(job.id()).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_result_write_keeps_raw_samples() {
        let store = FailingStore::new(Step::AddResult);
        let job = job_expiring_in(4, 2);

        let outcome = runner(store.clone()).run(&job, &CancellationToken::new()).await;

        assert!(matches!(outcome, Outcome::Failed(StoreError::Connection(_))));
        assert_eq!(store.get_values(job.id()).await.unwrap().len(), 2);
        assert_eq!(store.get_result(job.id()).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cleanup_at_finalize_is_a_failure() {
        let store = FailingStore::new(Step::DeleteValues);
        let job = job_expiring_in(4, 2);

        let outcome = runner(store.clone()).run(&job, &CancellationToken::new()).await;

        assert!(matches!(outcome, Outcome::Failed(StoreError::Connection(_))));
        assert_eq!(store.get_values(job.id()).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn discard_policy_clears_samples_of_previous_attempt() {
        let store = store();
        let job = job_expiring_in(4, 2);
        store
            .add_value(job.id(), &Sample::now(99.0))
            .await
            .unwrap();

        let runner = JobRunner::new(
            store.clone(),
            Arc::new(Counting::default()),
            StaleSamples::Discard,
        );
        let outcome = runner.run(&job, &CancellationToken::new()).await;

        assert_eq!(outcome, Outcome::Finalized { samples: 2 });
        let result = store.get_result(job.id()).await.unwrap().unwrap();
        assert!(result.values.iter().all(|s| s.value != 99.0));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_policy_appends_to_previous_attempt() {
        let store = store();
        let job = job_expiring_in(4, 2);
        store
            .add_value(job.id(), &Sample::now(99.0))
            .await
            .unwrap();

        let outcome = runner(store.clone()).run(&job, &CancellationToken::new()).await;

        assert_eq!(outcome, Outcome::Finalized { samples: 3 });
    }

    #[test]
    fn stale_policy_parses() {
        assert_eq!("keep".parse(), Ok(StaleSamples::Keep));
        assert_eq!(" DISCARD ".parse(), Ok(StaleSamples::Discard));
        assert!("purge".parse::<StaleSamples>().is_err());
    }
}
