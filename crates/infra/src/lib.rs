//! Infrastructure layer: sample persistence, broker transport, external values.
//!
//! Every adapter has an in-memory twin so the scheduler can be exercised
//! without IO. Redis-backed adapters are compiled with the `redis` feature.

pub mod external;
pub mod queue;
pub mod sample_store;

pub use external::{ProviderError, RandomAmountProvider, ValueProvider};
pub use sample_store::{InMemorySampleStore, SampleStore, StoreError};

#[cfg(feature = "redis")]
pub use queue::{RedisStreamsBroker, RedisStreamsConfig, RedisStreamsSession};
#[cfg(feature = "redis")]
pub use sample_store::RedisSampleStore;
