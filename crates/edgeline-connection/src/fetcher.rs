//! Rollout percentage source
//!
//! The selector asks a fetcher for the percentage of accounts that should
//! default to the rollout protocol. How the value is obtained is up to the
//! implementation.

use async_trait::async_trait;
use thiserror::Error;

/// Percentage fetch errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Percentage request failed: {0}")]
    Request(String),

    #[error("Invalid percentage response: {0}")]
    InvalidResponse(String),

    #[error("Percentage {0} out of range 0..=100")]
    OutOfRange(i32),
}

/// Source of the rollout percentage
#[async_trait]
pub trait PercentageFetcher: Send + Sync {
    /// Fetch the current rollout percentage
    async fn fetch(&self) -> Result<i32, FetchError>;
}

#[async_trait]
impl<F> PercentageFetcher for F
where
    F: Fn() -> Result<i32, FetchError> + Send + Sync,
{
    async fn fetch(&self) -> Result<i32, FetchError> {
        self()
    }
}

/// Fetcher that always returns the same percentage
#[derive(Debug, Clone, Copy)]
pub struct StaticPercentage(pub i32);

#[async_trait]
impl PercentageFetcher for StaticPercentage {
    async fn fetch(&self) -> Result<i32, FetchError> {
        Ok(self.0)
    }
}

/// Reject values outside `0..=100`
pub(crate) fn validate(percentage: i32) -> Result<i32, FetchError> {
    if (0..=100).contains(&percentage) {
        Ok(percentage)
    } else {
        Err(FetchError::OutOfRange(percentage))
    }
}
