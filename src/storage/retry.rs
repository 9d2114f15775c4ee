//! Bounded retry with exponential backoff, deadlines and cancellation.
//!
//! A store call that makes no progress (it was throttled, failed with a
//! retryable error, or returned everything as unprocessed) counts as one
//! attempt. Any progress resets the count. After `max_retries` consecutive
//! attempts without progress the operation fails with
//! [`Error::BackendUnavailable`].

use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest single sleep between cancellation checks.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Retry policy for store calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive attempts without progress before giving up.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_delay_ms: 25,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Calculates the delay for a given attempt using exponential backoff.
    ///
    /// Formula: `min(base_delay_ms * 2^(attempt - 1), max_delay_ms)`; attempt
    /// zero has no delay.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        self.base_delay_ms
            .saturating_mul(1 << (attempt - 1).min(20))
            .min(self.max_delay_ms)
    }
}

/// Shared flag that aborts in-flight operations.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every operation observing this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline and cancellation scope of one contract operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    operation: &'static str,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl OperationContext {
    /// Starts an operation, with an optional timeout measured from now.
    #[must_use]
    pub fn new(operation: &'static str, timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            operation,
            deadline: timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    /// The operation name used in errors and logs.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    /// Fails if the operation was cancelled or its deadline passed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Canceled`] or [`Error::DeadlineExceeded`].
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled {
                operation: self.operation.to_string(),
            });
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Error::DeadlineExceeded {
                operation: self.operation.to_string(),
            });
        }
        Ok(())
    }

    /// Sleeps for `delay`, waking early to fail on cancellation or deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Canceled`] or [`Error::DeadlineExceeded`].
    pub fn sleep(&self, delay: Duration) -> Result<()> {
        let wake = Instant::now() + delay;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= wake {
                return Ok(());
            }
            let mut slice = (wake - now).min(SLEEP_SLICE);
            if let Some(deadline) = self.deadline {
                slice = slice.min(deadline.saturating_duration_since(now));
            }
            std::thread::sleep(slice);
        }
    }
}

/// Attempt counter for one retry loop.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    ctx: &'a OperationContext,
    attempts: u32,
}

impl<'a> Backoff<'a> {
    /// Starts a loop with no attempts recorded.
    #[must_use]
    pub const fn new(policy: &'a RetryPolicy, ctx: &'a OperationContext) -> Self {
        Self {
            policy,
            ctx,
            attempts: 0,
        }
    }

    /// Records that the last call made progress.
    pub const fn progress(&mut self) {
        self.attempts = 0;
    }

    /// Records an attempt without progress and waits before the next one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendUnavailable`] once the policy is exhausted, or
    /// [`Error::Canceled`] / [`Error::DeadlineExceeded`] while waiting.
    pub fn retry(&mut self, reason: &str) -> Result<()> {
        self.attempts += 1;
        if self.attempts > self.policy.max_retries {
            tracing::error!(
                operation = self.ctx.operation(),
                attempts = self.attempts,
                reason,
                "Store made no progress; giving up"
            );
            return Err(Error::BackendUnavailable {
                operation: self.ctx.operation().to_string(),
                attempts: self.attempts,
            });
        }

        let delay_ms = self.policy.delay_for_attempt(self.attempts);
        tracing::warn!(
            operation = self.ctx.operation(),
            attempt = self.attempts,
            delay_ms,
            reason,
            "Retrying store call"
        );
        metrics::counter!(
            "kv_unprocessed_retries_total",
            "operation" => self.ctx.operation()
        )
        .increment(1);
        self.ctx.sleep(Duration::from_millis(delay_ms))
    }

    /// Attempts recorded since the last progress.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_for_attempt(0), 0);
        assert_eq!(policy.delay_for_attempt(1), 100);
        assert_eq!(policy.delay_for_attempt(2), 200);
        assert_eq!(policy.delay_for_attempt(4), 800);
        assert_eq!(policy.delay_for_attempt(5), 1_000);
        assert_eq!(policy.delay_for_attempt(60), 1_000);
    }

    #[test]
    fn test_backoff_gives_up_after_max_retries() {
        let policy = instant_policy(3);
        let ctx = OperationContext::new("get_nodes", None, CancellationToken::new());
        let mut backoff = Backoff::new(&policy, &ctx);

        for _ in 0..3 {
            backoff.retry("unprocessed").unwrap();
        }
        let err = backoff.retry("unprocessed").unwrap_err();
        assert!(matches!(
            err,
            Error::BackendUnavailable { ref operation, attempts: 4 } if operation == "get_nodes"
        ));
    }

    #[test]
    fn test_progress_resets_attempts() {
        let policy = instant_policy(2);
        let ctx = OperationContext::new("create_nodes", None, CancellationToken::new());
        let mut backoff = Backoff::new(&policy, &ctx);

        backoff.retry("unprocessed").unwrap();
        backoff.retry("unprocessed").unwrap();
        backoff.progress();
        assert_eq!(backoff.attempts(), 0);
        backoff.retry("unprocessed").unwrap();
    }

    #[test]
    fn test_cancelled_context() {
        let token = CancellationToken::new();
        let ctx = OperationContext::new("ping", None, token.clone());
        assert!(ctx.check().is_ok());

        token.cancel();
        assert!(matches!(ctx.check(), Err(Error::Canceled { .. })));
        assert!(matches!(
            ctx.sleep(Duration::from_secs(60)),
            Err(Error::Canceled { .. })
        ));
    }

    #[test]
    fn test_deadline_bounds_sleep() {
        let ctx = OperationContext::new(
            "get_nodes",
            Some(Duration::from_millis(20)),
            CancellationToken::new(),
        );
        let start = Instant::now();
        let result = ctx.sleep(Duration::from_secs(60));
        assert!(matches!(result, Err(Error::DeadlineExceeded { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
