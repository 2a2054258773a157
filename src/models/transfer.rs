//! Immutable tuning values for retries and transfers.
//!
//! Built once at startup and handed to the services that need them; nothing
//! here is mutated afterwards.

use std::time::Duration;

const MIB: u64 = 1024 * 1024;
const KIB: usize = 1024;

/// Upper bound for a single backoff delay (one hour).
pub const BACKOFF_CAP: Duration = Duration::from_secs(3600);

/// Jitter is drawn from `[0, JITTER_FRACTION * backoff)`.
pub const JITTER_FRACTION: f64 = 0.1;

/// Retry budget for one call site.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_cap: Duration,
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            backoff_cap: BACKOFF_CAP,
            jitter_fraction: JITTER_FRACTION,
        }
    }

    /// Delay before jitter for retry number `attempt` (1-based):
    /// `min(initial * 2^(attempt-1), cap)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exponent)
            .map_or(self.backoff_cap, |d| d.min(self.backoff_cap))
    }
}

/// Retry budgets for each step of a multipart session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionRetryPolicies {
    pub initiate: RetryPolicy,
    pub part: RetryPolicy,
    pub complete: RetryPolicy,
    pub abort: RetryPolicy,
}

impl Default for SessionRetryPolicies {
    fn default() -> Self {
        Self {
            initiate: RetryPolicy::new(30, Duration::from_secs(5)),
            part: RetryPolicy::new(30, Duration::from_secs(5)),
            complete: RetryPolicy::new(30, Duration::from_secs(10)),
            abort: RetryPolicy::new(5, Duration::from_secs(1)),
        }
    }
}

/// Parameters of the managed (concurrent-part) transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferConfig {
    /// Objects of at most this size go up in a single put.
    pub multipart_threshold: u64,
    /// Parts uploaded concurrently.
    pub max_concurrency: usize,
    /// Size of each part.
    pub multipart_chunk_size: usize,
    /// Parts allowed to be read ahead of the uploads.
    pub max_io_queue: usize,
    /// Buffer size for reads from the source.
    pub io_chunk_size: usize,
}

impl TransferConfig {
    pub fn server() -> Self {
        Self {
            multipart_threshold: 100 * MIB,
            max_concurrency: 20,
            multipart_chunk_size: 100 * MIB as usize,
            max_io_queue: 200,
            io_chunk_size: 512 * KIB,
        }
    }

    pub fn cli() -> Self {
        Self {
            multipart_threshold: 10 * MIB,
            max_concurrency: 10,
            multipart_chunk_size: 25 * MIB as usize,
            max_io_queue: 100,
            io_chunk_size: 256 * KIB,
        }
    }

    /// Parts in flight at once, read-ahead included.
    pub fn in_flight_limit(&self) -> usize {
        self.max_concurrency.min(self.max_io_queue).max(1)
    }
}

/// Everything the transfer strategy needs to pick and run a path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransferPolicy {
    /// Declared lengths above this go to the managed path.
    pub managed_threshold: u64,
    /// Whether the managed path may be used at all.
    pub managed_enabled: bool,
    /// Send known-small objects as one put instead of a multipart session.
    pub small_object_put: bool,
    /// Chunk size of the manual streaming path.
    pub manual_chunk_size: usize,
    pub transfer: TransferConfig,
    pub managed_retry: RetryPolicy,
    pub put_retry: RetryPolicy,
    pub session: SessionRetryPolicies,
}

impl TransferPolicy {
    /// Server profile: managed path only for large bodies when acceleration
    /// is configured; everything else streams through a multipart session.
    pub fn server(acceleration: bool) -> Self {
        Self {
            managed_threshold: 100 * MIB,
            managed_enabled: acceleration,
            small_object_put: false,
            manual_chunk_size: 100 * MIB as usize,
            transfer: TransferConfig::server(),
            managed_retry: RetryPolicy::new(30, Duration::from_secs(10)),
            put_retry: RetryPolicy::new(30, Duration::from_secs(5)),
            session: SessionRetryPolicies::default(),
        }
    }

    /// CLI profile: small files in one put, large files through the
    /// managed path with the manual path as fallback.
    pub fn cli() -> Self {
        Self {
            managed_threshold: 10 * MIB,
            managed_enabled: true,
            small_object_put: true,
            manual_chunk_size: 25 * MIB as usize,
            transfer: TransferConfig::cli(),
            managed_retry: RetryPolicy::new(30, Duration::from_secs(5)),
            put_retry: RetryPolicy::new(30, Duration::from_secs(5)),
            session: SessionRetryPolicies::default(),
        }
    }
}
