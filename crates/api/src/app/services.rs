//! Backend wiring.
//!
//! `TRACKER_BACKEND` picks the implementations behind the tracker service:
//!
//! - `redis`: Redis Streams broker + Redis sample store (requires the `redis` feature)
//! - `memory`: in-process broker + store, for dev and tests
//!
//! Either way the initial broker and store connections are made here, and a
//! failure aborts start-up.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use tracker_bus::{ChannelConfig, DurableChannel, MemoryBroker, MessageChannel};
use tracker_infra::{InMemorySampleStore, RandomAmountProvider, SampleStore};
use tracker_scheduler::{ServiceConfig, ServiceHandle, TrackerApi, TrackerService};

use crate::config::{AppConfig, Backend};

/// A started tracker service.
pub struct Runtime {
    pub api: Arc<dyn TrackerApi>,
    pub handle: ServiceHandle,
}

/// Connect the configured backend and start dispatching.
pub async fn launch(config: &AppConfig, cancel: CancellationToken) -> Result<Runtime> {
    match config.backend {
        Backend::Memory => launch_memory(config, cancel).await,
        Backend::Redis => launch_redis(config, cancel).await,
    }
}

fn channel_config(config: &AppConfig) -> ChannelConfig {
    ChannelConfig::default()
        .with_reconnect_interval(config.reconnect_interval)
        .with_malformed_policy(config.malformed)
}

async fn launch_memory(config: &AppConfig, cancel: CancellationToken) -> Result<Runtime> {
    let channel = DurableChannel::connect(MemoryBroker::new(), channel_config(config))
        .await
        .context("failed to open in-memory channel")?;
    let store = InMemorySampleStore::new(config.result_ttl);
    info!("using in-memory backend");
    start(channel, store, config, cancel).await
}

#[cfg(feature = "redis")]
async fn launch_redis(config: &AppConfig, cancel: CancellationToken) -> Result<Runtime> {
    use tracker_infra::{RedisSampleStore, RedisStreamsBroker, RedisStreamsConfig};

    let mut streams = RedisStreamsConfig::new(config.broker_url.clone(), config.queue.clone());
    streams.group = config.group.clone();
    streams.consumer = config.consumer.clone();
    streams.dead_letter_stream = config.dead_letter_queue.clone();

    let broker = RedisStreamsBroker::new(streams).context("invalid BROKER_URL")?;
    let channel = DurableChannel::connect(broker, channel_config(config))
        .await
        .context("failed to connect to broker")?;
    let store = RedisSampleStore::connect(&config.store_url, config.result_ttl)
        .await
        .context("failed to connect to store")?;
    info!(queue = %config.queue, group = %config.group, consumer = %config.consumer, "using redis backend");
    start(channel, store, config, cancel).await
}

#[cfg(not(feature = "redis"))]
async fn launch_redis(_config: &AppConfig, _cancel: CancellationToken) -> Result<Runtime> {
    anyhow::bail!("the redis backend requires the `redis` feature; set TRACKER_BACKEND=memory")
}

async fn start<C, S>(
    channel: C,
    store: S,
    config: &AppConfig,
    cancel: CancellationToken,
) -> Result<Runtime>
where
    C: MessageChannel,
    S: SampleStore,
{
    let service = Arc::new(TrackerService::new(
        Arc::new(channel),
        Arc::new(store),
        Arc::new(RandomAmountProvider::new()),
        ServiceConfig {
            max_workers: config.max_workers,
            stale_samples: config.stale_samples,
        },
    ));
    let handle = service
        .start(cancel)
        .await
        .context("failed to start tracker service")?;

    Ok(Runtime {
        api: service,
        handle,
    })
}
