//! External value sources.
//!
//! A [`ValueProvider`] yields one numeric reading per call. The only
//! implementation is a random stand-in for a price feed.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("value source unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ValueProvider: Send + Sync + 'static {
    async fn sample(&self) -> Result<f64, ProviderError>;
}

#[async_trait]
impl<P> ValueProvider for Arc<P>
where
    P: ValueProvider + ?Sized,
{
    async fn sample(&self) -> Result<f64, ProviderError> {
        (**self).sample().await
    }
}

/// Uniform whole amounts in `[39000, 41000)`.
#[derive(Debug, Clone)]
pub struct RandomAmountProvider {
    range: Range<u32>,
}

impl Default for RandomAmountProvider {
    fn default() -> Self {
        Self {
            range: 39_000..41_000,
        }
    }
}

impl RandomAmountProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValueProvider for RandomAmountProvider {
    async fn sample(&self) -> Result<f64, ProviderError> {
        let amount = rand::thread_rng().gen_range(self.range.clone());
        Ok(f64::from(amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn amounts_are_whole_and_in_range() {
        let provider = RandomAmountProvider::new();
        for _ in 0..500 {
            let value = provider.sample().await.unwrap();
            assert!((39_000.0..41_000.0).contains(&value), "{value}");
            assert_eq!(value.fract(), 0.0);
        }
    }
}
