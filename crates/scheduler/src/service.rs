//! Scheduling service: the composition root of the job pipeline.
//!
//! `TrackerService` owns the channel, the sample store and the value provider,
//! and exposes the operations the request layer needs. The request layer talks
//! to it through [`TrackerApi`] so it can hold any backend as a trait object.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tracker_bus::{ChannelError, MessageChannel};
use tracker_core::{DomainError, JobDescriptor, JobId, JobResult};
use tracker_infra::{SampleStore, StoreError, ValueProvider};

use crate::dispatcher::Dispatcher;
use crate::runner::{JobRunner, StaleSamples};
use crate::stats::{Counters, DispatcherStats};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("cannot publish job: {0}")]
    Publish(#[source] ChannelError),

    #[error("cannot start consuming: {0}")]
    Consume(#[source] ChannelError),

    #[error("result not found for job {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub max_workers: usize,
    pub stale_samples: StaleSamples,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            stale_samples: StaleSamples::default(),
        }
    }
}

/// Operations available to the request-facing layer.
#[async_trait]
pub trait TrackerApi: Send + Sync + 'static {
    /// Schedule a job sampling every `frequency` for `period`; returns its id.
    async fn new_job(&self, period: Duration, frequency: Duration) -> Result<JobId, ServiceError>;

    async fn get_result(&self, id: JobId) -> Result<JobResult, ServiceError>;

    fn stats(&self) -> DispatcherStats;
}

pub struct TrackerService<C, S, P> {
    channel: Arc<C>,
    store: Arc<S>,
    runner: JobRunner<S, P>,
    max_workers: usize,
    counters: Arc<Counters>,
}

impl<C, S, P> TrackerService<C, S, P>
where
    C: MessageChannel,
    S: SampleStore,
    P: ValueProvider,
{
    pub fn new(channel: Arc<C>, store: Arc<S>, provider: Arc<P>, config: ServiceConfig) -> Self {
        Self {
            runner: JobRunner::new(store.clone(), provider, config.stale_samples),
            channel,
            store,
            max_workers: config.max_workers,
            counters: Arc::default(),
        }
    }

    pub async fn new_job(
        &self,
        period: Duration,
        frequency: Duration,
    ) -> Result<JobId, ServiceError> {
        let job = JobDescriptor::schedule(period, frequency, Utc::now())?;
        self.channel
            .publish(&job)
            .await
            .map_err(ServiceError::Publish)?;
        info!(job_id = %job.id(), ?period, ?frequency, expire = %job.expire(), "job scheduled");
        Ok(job.id())
    }

    pub async fn get_result(&self, id: JobId) -> Result<JobResult, ServiceError> {
        match self.store.get_result(id).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(ServiceError::NotFound(id)),
            Err(err) => {
                error!(job_id = %id, error = %err, "cannot get result");
                Err(err.into())
            }
        }
    }

    /// Start consuming and dispatching jobs in the background.
    ///
    /// Runs until `cancel` fires; the channel is shut down after every runner
    /// has settled its job.
    pub async fn start(&self, cancel: CancellationToken) -> Result<ServiceHandle, ServiceError> {
        let consumer = self.channel.consume().await.map_err(ServiceError::Consume)?;
        let dispatcher =
            Dispatcher::with_counters(self.runner.clone(), self.max_workers, self.counters.clone());
        let channel = self.channel.clone();

        let task = tokio::spawn(async move {
            dispatcher.run(consumer, cancel).await;
            if let Err(err) = channel.shutdown().await {
                error!(error = %err, "channel shutdown failed");
            }
        });

        info!(max_workers = self.max_workers, "tracker service started");
        Ok(ServiceHandle { task })
    }

    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }
}

#[async_trait]
impl<C, S, P> TrackerApi for TrackerService<C, S, P>
where
    C: MessageChannel,
    S: SampleStore,
    P: ValueProvider,
{
    async fn new_job(&self, period: Duration, frequency: Duration) -> Result<JobId, ServiceError> {
        TrackerService::new_job(self, period, frequency).await
    }

    async fn get_result(&self, id: JobId) -> Result<JobResult, ServiceError> {
        TrackerService::get_result(self, id).await
    }

    fn stats(&self) -> DispatcherStats {
        TrackerService::stats(self)
    }
}

/// Background dispatch task returned by [`TrackerService::start`].
#[derive(Debug)]
pub struct ServiceHandle {
    task: JoinHandle<()>,
}

impl ServiceHandle {
    /// Wait until dispatch has drained and the channel is shut down.
    pub async fn stopped(self) {
        if let Err(err) = self.task.await {
            error!(error = %err, "dispatch task terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::sleep;
    use tracker_bus::{ChannelConfig, DurableChannel, MemoryBroker};

    use super::*;
    use crate::runner::tests::{Counting, store};

    async fn service() -> (
        Arc<DurableChannel<MemoryBroker>>,
        TrackerService<DurableChannel<MemoryBroker>, tracker_infra::InMemorySampleStore, Counting>,
    ) {
        let channel = Arc::new(
            DurableChannel::connect(MemoryBroker::new(), ChannelConfig::default())
                .await
                .unwrap(),
        );
        let service = TrackerService::new(
            channel.clone(),
            store(),
            Arc::new(Counting::default()),
            ServiceConfig::default(),
        );
        (channel, service)
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_job_produces_result_after_its_period() {
        let (_channel, service) = service().await;
        let cancel = CancellationToken::new();
        let handle = service.start(cancel.clone()).await.unwrap();

        let id = service
            .new_job(Duration::from_secs(10), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(matches!(
            service.get_result(id).await,
            Err(ServiceError::NotFound(missing)) if missing == id
        ));

        sleep(Duration::from_secs(12)).await;

        let result = service.get_result(id).await.unwrap();
        assert_eq!(result.id, id);
        // One immediate sample plus one per interval; the grace second adds the t=10 tick.
        assert_eq!(result.len(), 6);
        assert_eq!(service.stats().acked, 1);

        cancel.cancel();
        handle.stopped().await;
    }

    #[tokio::test(start_paused = true)]
    async fn new_job_rejects_frequency_longer_than_period() {
        let (channel, service) = service().await;
        let err = service
            .new_job(Duration::from_secs(2), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(channel.broker().ready_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_result_is_not_found() {
        let (_channel, service) = service().await;
        let id = JobId::new();
        assert!(matches!(
            service.get_result(id).await,
            Err(ServiceError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_rejects_running_job_and_shuts_channel_down() {
        let (channel, service) = service().await;
        let cancel = CancellationToken::new();
        let handle = service.start(cancel.clone()).await.unwrap();

        let id = service
            .new_job(Duration::from_secs(10), Duration::from_secs(2))
            .await
            .unwrap();
        sleep(Duration::from_secs(3)).await;

        cancel.cancel();
        handle.stopped().await;

        assert!(matches!(
            service.get_result(id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(service.stats().rejected, 1);
        assert_eq!(channel.broker().ready_len(), 1);
        assert!(matches!(
            service.new_job(Duration::from_secs(10), Duration::from_secs(2)).await,
            Err(ServiceError::Publish(ChannelError::Stopped))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_surfaces_as_error() {
        let (channel, service) = service().await;
        channel.broker().sever();
        channel.broker().set_reachable(false);

        let err = service
            .new_job(Duration::from_secs(10), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Publish(ChannelError::Transport(_))));
    }
}
