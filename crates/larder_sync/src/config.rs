//! Configuration for the sync coordinator.

use std::time::Duration;

/// Which tables a reconcile pass reads back from the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileScope {
    /// Only tables that had pending or conflicting rows when the pass began,
    /// or whose push hit a version mismatch.
    #[default]
    PendingTables,
    /// Every registered table.
    AllTables,
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often the background scheduler runs an unattended pass.
    pub sync_interval: Duration,
    /// Upper bound for the connectivity probe.
    pub probe_timeout: Duration,
    /// Upper bound for each remote call. Handed to remote clients that are
    /// built from this configuration.
    pub request_timeout: Duration,
    /// Per-row retry ceiling and backoff.
    pub retry: RetryConfig,
    /// Maximum number of updates sent in one batched call.
    pub push_batch_size: usize,
    /// Tables read back by reconcile.
    pub reconcile_scope: ReconcileScope,
    /// Scheduled passes bootstrap again once the last bootstrap is older
    /// than this. `None` bootstraps only once.
    pub bootstrap_max_age: Option<Duration>,
}

impl SyncConfig {
    /// Creates a configuration with the given sync interval.
    pub fn new(sync_interval: Duration) -> Self {
        Self {
            sync_interval,
            probe_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            push_batch_size: 50,
            reconcile_scope: ReconcileScope::default(),
            bootstrap_max_age: None,
        }
    }

    /// Sets the connectivity probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the per-call request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the push batch size. Zero is treated as one.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the reconcile scope.
    pub fn with_reconcile_scope(mut self, scope: ReconcileScope) -> Self {
        self.reconcile_scope = scope;
        self
    }

    /// Sets the bootstrap staleness age.
    pub fn with_bootstrap_max_age(mut self, age: Duration) -> Self {
        self.bootstrap_max_age = Some(age);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// Per-row retry behavior.
///
/// A row that failed `max_attempts` times is stalled: passes skip it until
/// its attempts are reset or it is edited again.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failed attempts after which a row is stalled.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given ceiling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration where a single failure stalls the row.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before the attempt following `failures` failed
    /// ones. Zero failures means no delay.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // up to 25%
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Returns true if a row with `attempts` failures is stalled.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Cheap jitter source without an RNG dependency.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
