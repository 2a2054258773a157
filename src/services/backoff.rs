//! Exponential backoff with jitter around a single storage call.
//!
//! Each backend request is wrapped on its own, so a transient failure on part
//! 7 of an upload only repeats part 7.

use crate::{
    errors::RetryError,
    models::transfer::RetryPolicy,
    services::object_store::StorageResult,
};
use rand::Rng;
use std::{future::Future, time::Duration};
use tracing::{error, warn};

/// A successful result together with the retries it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Run `operation` until it succeeds, fails with a non-retriable error, or
/// exhausts `policy.max_retries`.
///
/// Total attempts are at most `1 + max_retries`. Before retry `k` the executor
/// sleeps `min(initial * 2^(k-1), cap)` plus up to `jitter_fraction` of that.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<Retried<T>, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut retries = 0u32;

    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(Retried { value, retries }),
            Err(err) => err,
        };

        if !err.is_retriable() {
            error!(operation, error = %err, "Non-retriable error, not retrying");
            return Err(RetryError::Permanent(err));
        }

        retries += 1;
        if retries > policy.max_retries {
            error!(
                operation,
                max_retries = policy.max_retries,
                error = %err,
                "Max retries reached. Giving up."
            );
            return Err(RetryError::Exhausted {
                attempts: retries,
                source: err,
            });
        }

        let backoff = policy.delay_for_attempt(retries);
        let sleep_time = backoff + jitter(backoff, policy.jitter_fraction);
        warn!(
            operation,
            attempt = retries,
            max_retries = policy.max_retries,
            sleep_secs = sleep_time.as_secs_f64(),
            error = %err,
            "Retrying operation"
        );
        tokio::time::sleep(sleep_time).await;
    }
}

/// Uniform random delay in `[0, fraction * backoff)`.
pub fn jitter(backoff: Duration, fraction: f64) -> Duration {
    let max = backoff.as_secs_f64() * fraction;
    if max <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..max))
}
