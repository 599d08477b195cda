//! Redis Streams broker (durable, at-least-once delivery).
//!
//! ## Mapping
//!
//! - **Queue**: one stream key (default `smartbrain`)
//! - **Subscription**: one consumer group with a stable consumer name, so a
//!   restarted process finds its own pending entries again
//! - **Publish**: `XADD <stream> * payload <json>`
//! - **Fetch**: `XREADGROUP GROUP <g> <c> COUNT 1 BLOCK <ms> STREAMS <stream> >`
//! - **Recover**: the same read with id `0` (this consumer's pending entries)
//! - **Ack / Discard**: `MULTI XACK XDEL EXEC`
//! - **Requeue**: `MULTI XADD XACK XDEL EXEC` (fresh copy at the tail)
//! - **Dead-letter**: `MULTI XADD <dlq> XACK XDEL EXEC`
//!
//! Each session owns one multiplexed connection. A blocking read holds up
//! that connection, so the read loop and the command path use separate
//! sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;
use tracing::{debug, instrument, warn};

use tracker_bus::{Broker, Delivery, DeliveryTag, Session, Settlement, TransportError};

const PAYLOAD_FIELD: &str = "payload";
const REASON_FIELD: &str = "reason";
const RECOVER_PAGE: usize = 100;

#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub url: String,
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub dead_letter_stream: String,
    /// Upper bound of one blocking fetch.
    pub block: Duration,
}

impl RedisStreamsConfig {
    pub fn new(url: impl Into<String>, stream: impl Into<String>) -> Self {
        let stream = stream.into();
        Self {
            url: url.into(),
            dead_letter_stream: format!("{stream}:dlq"),
            stream,
            group: "tracker".to_string(),
            consumer: "tracker-1".to_string(),
            block: Duration::from_secs(1),
        }
    }
}

fn classify(err: redis::RedisError) -> TransportError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Command(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RedisStreamsBroker {
    client: redis::Client,
    config: RedisStreamsConfig,
}

impl RedisStreamsBroker {
    pub fn new(config: RedisStreamsConfig) -> Result<Self, TransportError> {
        let client = redis::Client::open(config.url.as_str()).map_err(classify)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RedisStreamsConfig {
        &self.config
    }
}

#[async_trait]
impl Broker for RedisStreamsBroker {
    type Session = RedisStreamsSession;

    #[instrument(skip(self), fields(stream = %self.config.stream, group = %self.config.group), err)]
    async fn open(&self) -> Result<RedisStreamsSession, TransportError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(classify)?;

        // MKSTREAM creates the stream on first use; "0" so entries published
        // before the group existed are still delivered.
        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(_) => debug!("consumer group created"),
            Err(err) if err.code() == Some("BUSYGROUP") => {}
            Err(err) => return Err(classify(err)),
        }

        Ok(RedisStreamsSession {
            conn,
            config: self.config.clone(),
            open: AtomicBool::new(true),
        })
    }
}

pub struct RedisStreamsSession {
    conn: MultiplexedConnection,
    config: RedisStreamsConfig,
    open: AtomicBool,
}

impl RedisStreamsSession {
    fn connection(&self) -> Result<MultiplexedConnection, TransportError> {
        if self.open.load(Ordering::Acquire) {
            Ok(self.conn.clone())
        } else {
            Err(TransportError::Closed)
        }
    }

    /// Map a command failure, marking the session broken on connection errors.
    fn fail(&self, err: redis::RedisError) -> TransportError {
        let err = classify(err);
        if err.is_connection() {
            self.open.store(false, Ordering::Release);
        }
        err
    }

    async fn read(&self, from: &str, block: bool) -> Result<Vec<Delivery>, TransportError> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg("COUNT")
            .arg(if block { 1 } else { RECOVER_PAGE });
        if block {
            let block_ms = u64::try_from(self.config.block.as_millis()).unwrap_or(u64::MAX);
            cmd.arg("BLOCK").arg(block_ms.max(1));
        }
        cmd.arg("STREAMS").arg(&self.config.stream).arg(from);

        let reply: Option<StreamReadReply> =
            cmd.query_async(&mut conn).await.map_err(|e| self.fail(e))?;

        Ok(reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .map(|entry| Delivery {
                body: entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default(),
                tag: DeliveryTag(entry.id),
            })
            .collect())
    }
}

#[async_trait]
impl Session for RedisStreamsSession {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    #[instrument(skip(self, body), fields(stream = %self.config.stream), err)]
    async fn publish(&self, body: &[u8]) -> Result<(), TransportError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("XADD")
            .arg(&self.config.stream)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.fail(e))?;
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Delivery>, TransportError> {
        Ok(self.read(">", true).await?.into_iter().next())
    }

    async fn recover(&self) -> Result<Vec<Delivery>, TransportError> {
        let mut recovered = Vec::new();
        let mut cursor = "0".to_string();
        loop {
            let page = self.read(&cursor, false).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.tag.0.clone();
            let full = page.len() == RECOVER_PAGE;
            recovered.extend(page);
            if !full {
                break;
            }
        }
        Ok(recovered)
    }

    #[instrument(skip(self, settlement), fields(stream = %self.config.stream, tag = %tag), err)]
    async fn settle(
        &self,
        tag: &DeliveryTag,
        settlement: Settlement,
    ) -> Result<(), TransportError> {
        let mut conn = self.connection()?;
        let mut pipe = redis::pipe();
        pipe.atomic();

        match &settlement {
            Settlement::Ack | Settlement::Discard => {}
            Settlement::Requeue { body } => {
                pipe.cmd("XADD")
                    .arg(&self.config.stream)
                    .arg("*")
                    .arg(PAYLOAD_FIELD)
                    .arg(body.as_slice())
                    .ignore();
            }
            Settlement::DeadLetter { body, reason } => {
                pipe.cmd("XADD")
                    .arg(&self.config.dead_letter_stream)
                    .arg("*")
                    .arg(PAYLOAD_FIELD)
                    .arg(body.as_slice())
                    .arg(REASON_FIELD)
                    .arg(reason.as_str())
                    .ignore();
            }
        }

        pipe.cmd("XACK")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg(&tag.0)
            .cmd("XDEL")
            .arg(&self.config.stream)
            .arg(&tag.0)
            .ignore();

        let (acked,): (i64,) = pipe.query_async(&mut conn).await.map_err(|e| self.fail(e))?;
        if acked == 0 {
            warn!("settled entry was not pending");
            return Err(TransportError::UnknownDelivery(tag.clone()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RedisStreamsConfig {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let mut config = RedisStreamsConfig::new(url, format!("tracker-test-{}", std::process::id()));
        config.block = Duration::from_millis(100);
        config
    }

    #[test]
    fn dead_letter_stream_defaults_to_queue_suffix() {
        let config = RedisStreamsConfig::new("redis://localhost", "smartbrain");
        assert_eq!(config.dead_letter_stream, "smartbrain:dlq");
        assert_eq!(config.group, "tracker");
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn publish_fetch_ack_and_recover_against_redis() {
        let broker = RedisStreamsBroker::new(config()).unwrap();
        let session = broker.open().await.unwrap();

        session.publish(b"{\"hello\":1}").await.unwrap();
        let delivery = session.fetch().await.unwrap().expect("entry delivered");
        assert_eq!(delivery.body, b"{\"hello\":1}");

        // Unsettled: visible to a fresh session through recovery.
        let again = broker.open().await.unwrap();
        let pending = again.recover().await.unwrap();
        assert!(pending.iter().any(|d| d.tag == delivery.tag));

        again.settle(&delivery.tag, Settlement::Ack).await.unwrap();
        assert!(again.recover().await.unwrap().iter().all(|d| d.tag != delivery.tag));
        assert_eq!(
            again.settle(&delivery.tag, Settlement::Ack).await.unwrap_err(),
            TransportError::UnknownDelivery(delivery.tag)
        );
    }
}
