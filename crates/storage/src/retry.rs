//! Time bounds and compare-and-set retry loops for store operations.
//!
//! - [`with_timeout`] bounds a single store call; an elapsed deadline becomes
//!   [`StorageError::Timeout`], which is transient.
//! - [`with_cas_retry`] re-runs a read-modify-write cycle while it keeps
//!   losing compare-and-set races, sleeping a jittered delay between
//!   attempts. Any non-conflict error is returned immediately.

use std::{future::Future, time::Duration};

use fail::fail_point;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Retry policy for compare-and-set conflicts.
///
/// ```
/// use std::time::Duration;
/// use yeoladin_storage::CasRetryConfig;
///
/// let config = CasRetryConfig::builder().max_retries(8).build();
/// assert_eq!(config.max_retries, 8);
/// assert_eq!(config.base_delay, Duration::from_millis(2));
/// ```
#[derive(Debug, Clone, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CasRetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Base delay between attempts; up to the same amount again is added as
    /// jitter.
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    #[builder(default = default_base_delay())]
    pub base_delay: Duration,
}

fn default_max_retries() -> u32 {
    16
}

fn default_base_delay() -> Duration {
    Duration::from_millis(2)
}

impl Default for CasRetryConfig {
    fn default() -> Self {
        Self { max_retries: default_max_retries(), base_delay: default_base_delay() }
    }
}

/// Runs `operation` with a deadline.
///
/// # Errors
///
/// Returns [`StorageError::Timeout`] naming `operation_name` if `limit`
/// elapses first; otherwise whatever `operation` returns.
#[tracing::instrument(skip(operation), fields(timeout_ms = limit.as_millis() as u64))]
pub async fn with_timeout<Fut, T>(
    limit: Duration,
    operation_name: &str,
    operation: Fut,
) -> StorageResult<T>
where
    Fut: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(
                operation = operation_name,
                timeout_ms = limit.as_millis() as u64,
                "store operation timed out",
            );
            Err(StorageError::timeout(operation_name))
        },
    }
}

/// Retries a read-modify-write cycle on compare-and-set conflict.
///
/// The `operation` closure must perform the full cycle (read the current
/// value, compute the change, write it back with a compare-and-set
/// condition) so every attempt sees fresh state.
///
/// # Errors
///
/// - [`StorageError::CasRetriesExhausted`] when every attempt conflicted
/// - Any non-conflict error from `operation`, unchanged
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub async fn with_cas_retry<F, Fut, T>(config: &CasRetryConfig, mut operation: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(StorageError::Conflict) if attempt < config.max_retries => {
                let jitter = if config.base_delay.as_millis() > 0 {
                    let range = config.base_delay.as_millis() as u64;
                    Duration::from_millis(rand::rng().random_range(0..=range))
                } else {
                    Duration::ZERO
                };
                let delay = config.base_delay + jitter;
                tracing::debug!(
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "CAS conflict, retrying after jitter",
                );
                fail_point!("cas-retry-before-sleep");
                tokio::time::sleep(delay).await;
            },
            Err(StorageError::Conflict) => {
                return Err(StorageError::cas_retries_exhausted(config.max_retries + 1));
            },
            Err(e) => return Err(e),
        }
    }

    Err(StorageError::cas_retries_exhausted(config.max_retries + 1))
}
