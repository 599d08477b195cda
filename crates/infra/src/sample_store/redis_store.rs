//! Redis-backed sample store.
//!
//! ## Keys
//!
//! - `<prefix>:values:<id>`: list of JSON samples, `RPUSH`ed in order
//! - `<prefix>:result:<id>`: JSON result, `SET ... PX <ttl>`

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::instrument;

use tracker_core::{JobId, JobResult, Sample};

use super::{SampleStore, StoreError};

const DEFAULT_PREFIX: &str = "tracker";

#[derive(Clone)]
pub struct RedisSampleStore {
    conn: ConnectionManager,
    prefix: String,
    result_ttl: Duration,
}

impl core::fmt::Debug for RedisSampleStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisSampleStore")
            .field("prefix", &self.prefix)
            .field("result_ttl", &self.result_ttl)
            .finish_non_exhaustive()
    }
}

fn classify(err: redis::RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

impl RedisSampleStore {
    /// Connect and verify the server answers `PING`.
    ///
    /// `url` carries host, credentials and database, e.g. `redis://:pw@host:6379/2`.
    pub async fn connect(url: &str, result_ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(classify)?;
        let mut conn = ConnectionManager::new(client).await.map_err(classify)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        Ok(Self {
            conn,
            prefix: DEFAULT_PREFIX.to_string(),
            result_ttl,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn values_key(&self, id: JobId) -> String {
        format!("{}:values:{id}", self.prefix)
    }

    fn result_key(&self, id: JobId) -> String {
        format!("{}:result:{id}", self.prefix)
    }
}

#[async_trait]
impl SampleStore for RedisSampleStore {
    #[instrument(skip(self, sample), fields(job_id = %id), err)]
    async fn add_value(&self, id: JobId, sample: &Sample) -> Result<(), StoreError> {
        let json = serde_json::to_string(sample).map_err(|e| StoreError::Serialization {
            id,
            reason: e.to_string(),
        })?;
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(self.values_key(id))
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_values(&self, id: JobId) -> Result<Vec<Sample>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.values_key(id))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        raw.iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| StoreError::Serialization {
                    id,
                    reason: format!("{json}: {e}"),
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn delete_values(&self, id: JobId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.values_key(id))
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    #[instrument(skip(self, result), fields(job_id = %result.id), err)]
    async fn add_result(&self, result: &JobResult) -> Result<(), StoreError> {
        let json = serde_json::to_string(result).map_err(|e| StoreError::Serialization {
            id: result.id,
            reason: e.to_string(),
        })?;
        let ttl_ms = u64::try_from(self.result_ttl.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("SET")
            .arg(self.result_key(result.id))
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_result(&self, id: JobId) -> Result<Option<JobResult>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.result_key(id))
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| StoreError::Serialization {
                id,
                reason: format!("{json}: {e}"),
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string())
    }

    async fn store() -> RedisSampleStore {
        RedisSampleStore::connect(&redis_url(), Duration::from_secs(30))
            .await
            .expect("redis reachable")
            .with_prefix(format!("tracker-test-{}", JobId::new()))
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn finalize_cycle_round_trips_through_redis() {
        let store = store().await;
        let id = JobId::new();
        let first = Sample::now(39_100.0);
        let second = Sample::now(40_200.0);
        store.add_value(id, &first).await.unwrap();
        store.add_value(id, &second).await.unwrap();

        let values = store.get_values(id).await.unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].value, 39_100.0);

        let result = JobResult::new(id, values);
        store.add_result(&result).await.unwrap();
        store.delete_values(id).await.unwrap();

        assert!(store.get_values(id).await.unwrap().is_empty());
        let stored = store.get_result(id).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn missing_result_is_none() {
        let store = store().await;
        assert!(store.get_result(JobId::new()).await.unwrap().is_none());
    }
}
