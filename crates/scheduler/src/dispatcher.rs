//! Bounded-concurrency dispatch of consumed jobs.
//!
//! A worker slot is acquired *before* pulling the next job, so at most
//! `max_workers` jobs are ever running. A few more deliveries may sit unsettled
//! on this consumer: one in the channel's prefetch buffer and one held by its
//! read loop. Each runner holds its slot until it has acked or rejected its job.
//!
//! ## Shutdown
//!
//! When the cancellation token fires the pull loop stops, the job stream is
//! closed, jobs already buffered in it are rejected, and `run` returns once
//! every in-flight runner has settled its job.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use tracker_bus::{AckJob, ChannelNotice, Consumer};
use tracker_infra::{SampleStore, ValueProvider};

use crate::runner::JobRunner;
use crate::stats::{Counters, DispatcherStats};

pub struct Dispatcher<S, P> {
    runner: JobRunner<S, P>,
    max_workers: usize,
    counters: Arc<Counters>,
}

impl<S, P> Dispatcher<S, P>
where
    S: SampleStore,
    P: ValueProvider,
{
    pub fn new(runner: JobRunner<S, P>, max_workers: usize) -> Self {
        Self::with_counters(runner, max_workers, Arc::default())
    }

    pub(crate) fn with_counters(
        runner: JobRunner<S, P>,
        max_workers: usize,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            runner,
            max_workers: max_workers.max(1),
            counters,
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    /// Process jobs until the stream closes or `cancel` fires.
    pub async fn run(&self, consumer: Consumer, cancel: CancellationToken) {
        let Consumer { mut jobs, notices } = consumer;
        tokio::spawn(drain_notices(notices));

        let slots = Arc::new(Semaphore::new(self.max_workers));
        let runners = TaskTracker::new();
        info!(max_workers = self.max_workers, "dispatcher started");

        loop {
            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                slot = slots.clone().acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.counters.consumed();

            let runner = self.runner.clone();
            let counters = self.counters.clone();
            let cancel = cancel.clone();
            runners.spawn(async move {
                let _slot = slot;
                let _in_flight = counters.begin();
                let outcome = runner.execute(job, &cancel).await;
                counters.record(&outcome);
            });
        }

        self.return_buffered(&mut jobs).await;

        runners.close();
        info!(in_flight = runners.len(), "dispatcher stopping, waiting for runners");
        runners.wait().await;
        info!("dispatcher stopped");
    }

    async fn return_buffered(&self, jobs: &mut mpsc::Receiver<AckJob>) {
        jobs.close();
        while let Some(job) = jobs.recv().await {
            let id = job.job().id();
            self.counters.consumed();
            self.counters.rejected();
            match job.reject().await {
                Ok(()) => info!(job_id = %id, "returned unstarted job"),
                Err(err) => warn!(job_id = %id, error = %err, "cannot return unstarted job"),
            }
        }
    }
}

async fn drain_notices(mut notices: mpsc::UnboundedReceiver<ChannelNotice>) {
    while let Some(notice) = notices.recv().await {
        if notice.is_error() {
            error!(notice = %notice, "channel error");
        } else {
            info!(notice = %notice, "channel notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio::time::sleep;
    use tracker_bus::{ChannelConfig, DurableChannel, MemoryBroker, MessageChannel};
    use tracker_core::{JobDescriptor, JobId};

    use super::*;
    use crate::runner::StaleSamples;
    use crate::runner::tests::{Counting, store};

    async fn channel() -> DurableChannel<MemoryBroker> {
        DurableChannel::connect(MemoryBroker::new(), ChannelConfig::default())
            .await
            .unwrap()
    }

    fn job(expire_secs: i64) -> JobDescriptor {
        JobDescriptor::from_parts(
            JobId::new(),
            Duration::from_secs(1),
            Utc::now() + chrono::Duration::seconds(expire_secs),
        )
    }

    async fn wait_for(dispatcher: &Dispatcher<impl SampleStore, impl ValueProvider>, acked: u64) {
        while dispatcher.stats().acked < acked {
            sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_runs_more_than_max_workers() {
        let channel = channel().await;
        let store = store();
        let dispatcher = Arc::new(Dispatcher::new(
            JobRunner::new(store.clone(), Arc::new(Counting::default()), StaleSamples::Keep),
            2,
        ));

        let mut ids = Vec::new();
        for _ in 0..5 {
            let job = job(3);
            ids.push(job.id());
            channel.publish(&job).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let consumer = channel.consume().await.unwrap();
        let running = {
            let dispatcher = dispatcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(consumer, cancel).await })
        };

        wait_for(dispatcher.as_ref(), 5).await;
        cancel.cancel();
        running.await.unwrap();
        channel.shutdown().await.unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.peak_in_flight, 2);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.consumed, 5);
        assert_eq!(stats.rejected, 0);
        for id in ids {
            assert!(store.get_result(id).await.unwrap().is_some());
        }
        assert_eq!(channel.broker().pending_len(), 0);
        assert_eq!(channel.broker().ready_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_running_and_unstarted_jobs() {
        let channel = channel().await;
        let store = store();
        let dispatcher = Arc::new(Dispatcher::new(
            JobRunner::new(store.clone(), Arc::new(Counting::default()), StaleSamples::Keep),
            1,
        ));
        for _ in 0..3 {
            channel.publish(&job(30)).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let consumer = channel.consume().await.unwrap();
        let running = {
            let dispatcher = dispatcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(consumer, cancel).await })
        };

        sleep(Duration::from_secs(5)).await;
        assert_eq!(dispatcher.stats().in_flight, 1);

        cancel.cancel();
        running.await.unwrap();
        channel.shutdown().await.unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.acked, 0);
        assert_eq!(stats.in_flight, 0);
        // Nothing is left in limbo: every job is back in the queue.
        assert_eq!(channel.broker().pending_len(), 0);
        assert_eq!(channel.broker().ready_len(), 3);
    }
}
