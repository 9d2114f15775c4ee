//! Circuit breaking for graph backends.
//!
//! Stops calling a backend that keeps failing so that callers fail fast
//! instead of stacking up on retries inside the adapter.
//!
//! A breaker starts [`BreakerPhase::Closed`]. Enough consecutive health
//! failures move it to [`BreakerPhase::Open`], where every call is rejected
//! with [`Error::BackendUnavailable`] without reaching the backend. Once the
//! reset timeout has passed a limited number of trial calls are let through
//! ([`BreakerPhase::HalfOpen`]): a success closes the breaker again, a
//! failure reopens it.
//!
//! ```rust,ignore
//! use bcfs::storage::resilience::{BreakerConfig, ResilientGraph};
//!
//! let resilient = ResilientGraph::new(backend, BreakerConfig::default(), "ddb");
//! resilient.ping()?;
//! ```

use super::traits::Graph;
use crate::config::BackendConfig;
use crate::models::{Edges, Nodes};
use crate::{Error, Result};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_max_calls: 1,
        }
    }
}

impl BreakerConfig {
    /// Reads `breaker_failure_threshold`, `breaker_reset_ms` and
    /// `breaker_half_open_max_calls`, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is present with the wrong type.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let defaults = Self::default();
        let small = |key: &str, default: u32| -> Result<u32> {
            Ok(config
                .optional_u64(key)?
                .map_or(default, |v| u32::try_from(v).unwrap_or(u32::MAX)))
        };

        Ok(Self {
            failure_threshold: small("breaker_failure_threshold", defaults.failure_threshold)?,
            reset_timeout_ms: config
                .optional_u64("breaker_reset_ms")?
                .unwrap_or(defaults.reset_timeout_ms),
            half_open_max_calls: small(
                "breaker_half_open_max_calls",
                defaults.half_open_max_calls,
            )?,
        })
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout in milliseconds.
    #[must_use]
    pub const fn with_reset_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.reset_timeout_ms = timeout_ms;
        self
    }
}

/// Where a breaker is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    /// Calls pass through; failures are being counted.
    Closed,
    /// Calls are rejected until the reset timeout passes.
    Open,
    /// A bounded number of trial calls decide whether to close.
    HalfOpen,
}

/// Tracks backend health for one [`ResilientGraph`].
#[derive(Debug)]
pub struct CircuitBreaker {
    phase: BreakerPhase,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_calls: u32,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    backend_name: String,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: &BreakerConfig, backend_name: impl Into<String>) -> Self {
        Self {
            phase: BreakerPhase::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_calls: 0,
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            half_open_max_calls: config.half_open_max_calls.max(1),
            backend_name: backend_name.into(),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> BreakerPhase {
        self.phase
    }

    /// Claims a slot for one backend call. `false` means reject.
    pub fn try_acquire(&mut self) -> bool {
        match self.phase {
            BreakerPhase::Closed => true,
            BreakerPhase::Open => {
                let cooled = self
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.reset_timeout);
                if cooled {
                    tracing::info!(
                        backend = %self.backend_name,
                        "Letting trial calls through to backend"
                    );
                    self.phase = BreakerPhase::HalfOpen;
                    self.trial_calls = 1;
                }
                cooled
            },
            BreakerPhase::HalfOpen if self.trial_calls < self.half_open_max_calls => {
                self.trial_calls += 1;
                true
            },
            BreakerPhase::HalfOpen => false,
        }
    }

    /// Records a healthy response.
    pub fn record_success(&mut self) {
        if self.phase != BreakerPhase::Closed {
            tracing::info!(backend = %self.backend_name, "Backend recovered");
        }
        self.phase = BreakerPhase::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_calls = 0;
    }

    /// Records a health failure. Returns `true` when this failure opened the
    /// breaker.
    pub fn record_failure(&mut self) -> bool {
        let trip = match self.phase {
            BreakerPhase::Open => false,
            BreakerPhase::HalfOpen => true,
            BreakerPhase::Closed => {
                self.consecutive_failures += 1;
                self.consecutive_failures >= self.failure_threshold
            },
        };
        if trip {
            tracing::warn!(
                backend = %self.backend_name,
                failures = self.consecutive_failures,
                trial = self.phase == BreakerPhase::HalfOpen,
                "Backend marked unavailable"
            );
            self.phase = BreakerPhase::Open;
            self.opened_at = Some(Instant::now());
            self.trial_calls = 0;
        }
        trip
    }
}

/// Whether an error says something about backend health.
///
/// Request-shape and contract errors come back from a healthy backend and
/// leave the breaker alone.
const fn counts_as_failure(error: &Error) -> bool {
    matches!(
        error,
        Error::BackendUnavailable { .. }
            | Error::DeadlineExceeded { .. }
            | Error::OperationFailed { .. }
    )
}

/// Graph wrapper with circuit breaker protection.
pub struct ResilientGraph<G: Graph> {
    inner: G,
    breaker: Mutex<CircuitBreaker>,
    backend_name: String,
}

impl<G: Graph> ResilientGraph<G> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: G, config: BreakerConfig, backend_name: impl Into<String>) -> Self {
        let backend_name = backend_name.into();
        Self {
            inner,
            breaker: Mutex::new(CircuitBreaker::new(&config, backend_name.clone())),
            backend_name,
        }
    }

    /// The wrapped backend.
    #[must_use]
    pub const fn inner(&self) -> &G {
        &self.inner
    }

    /// Current breaker phase.
    #[must_use]
    pub fn phase(&self) -> BreakerPhase {
        self.breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase()
    }

    fn execute<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        if !breaker.try_acquire() {
            drop(breaker);
            tracing::debug!(backend = %self.backend_name, operation, "Rejected by open circuit");
            return Err(Error::BackendUnavailable {
                operation: operation.to_string(),
                attempts: 0,
            });
        }
        drop(breaker);

        let result = call();

        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        match &result {
            Err(e) if counts_as_failure(e) => {
                let tripped = breaker.record_failure();
                drop(breaker);
                if tripped {
                    metrics::counter!(
                        "graph_circuit_breaker_trips_total",
                        "backend" => self.backend_name.clone(),
                        "operation" => operation
                    )
                    .increment(1);
                }
            },
            _ => breaker.record_success(),
        }

        result
    }
}

impl<G: Graph> Graph for ResilientGraph<G> {
    fn get_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        self.execute("get_nodes", || self.inner.get_nodes(nodes))
    }

    fn get_in_edges(&self, edges: Edges) -> Result<Edges> {
        self.execute("get_in_edges", || self.inner.get_in_edges(edges))
    }

    fn get_out_edges(&self, edges: Edges) -> Result<Edges> {
        self.execute("get_out_edges", || self.inner.get_out_edges(edges))
    }

    fn create_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        self.execute("create_nodes", || self.inner.create_nodes(nodes))
    }

    fn create_edges(&self, edges: Edges) -> Result<Edges> {
        self.execute("create_edges", || self.inner.create_edges(edges))
    }

    fn alter_nodes(&self, nodes: Nodes) -> Result<Nodes> {
        self.execute("alter_nodes", || self.inner.alter_nodes(nodes))
    }

    fn delete_nodes(&self, nodes: Nodes) -> Result<()> {
        self.execute("delete_nodes", || self.inner.delete_nodes(nodes))
    }

    fn ping(&self) -> Result<()> {
        self.execute("ping", || self.inner.ping())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyGraph {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FlakyGraph {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl Graph for FlakyGraph {
        fn get_nodes(&self, nodes: Nodes) -> Result<Nodes> {
            Ok(nodes)
        }

        fn get_in_edges(&self, edges: Edges) -> Result<Edges> {
            Ok(edges)
        }

        fn get_out_edges(&self, edges: Edges) -> Result<Edges> {
            Ok(edges)
        }

        fn create_nodes(&self, nodes: Nodes) -> Result<Nodes> {
            Ok(nodes)
        }

        fn create_edges(&self, edges: Edges) -> Result<Edges> {
            Ok(edges)
        }

        fn alter_nodes(&self, _nodes: Nodes) -> Result<Nodes> {
            Err(Error::NotFound("node '1'".to_string()))
        }

        fn delete_nodes(&self, _nodes: Nodes) -> Result<()> {
            Ok(())
        }

        fn ping(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::OperationFailed {
                    operation: "ping".to_string(),
                    cause: "down".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn cooled_down() {
        std::thread::sleep(Duration::from_millis(1));
    }

    #[test]
    fn test_new_breaker_is_closed() {
        let mut breaker = CircuitBreaker::new(&BreakerConfig::default(), "test");
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_breaker_trips_at_threshold() {
        let mut breaker =
            CircuitBreaker::new(&BreakerConfig::default().with_failure_threshold(3), "test");

        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert_eq!(breaker.phase(), BreakerPhase::Closed);

        assert!(breaker.record_failure());
        assert_eq!(breaker.phase(), BreakerPhase::Open);
        assert!(!breaker.try_acquire());
        assert!(!breaker.record_failure());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker =
            CircuitBreaker::new(&BreakerConfig::default().with_failure_threshold(2), "test");
        assert!(!breaker.record_failure());
        breaker.record_success();
        assert!(!breaker.record_failure());
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
    }

    #[test]
    fn test_trial_calls_are_bounded() {
        let config = BreakerConfig {
            failure_threshold: 1,
            reset_timeout_ms: 0,
            half_open_max_calls: 2,
        };
        let mut breaker = CircuitBreaker::new(&config, "test");

        breaker.record_failure();
        cooled_down();

        assert!(breaker.try_acquire());
        assert_eq!(breaker.phase(), BreakerPhase::HalfOpen);
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_trial_outcome_decides_phase() {
        let config = BreakerConfig::default()
            .with_failure_threshold(1)
            .with_reset_timeout_ms(0);
        let mut breaker = CircuitBreaker::new(&config, "test");

        breaker.record_failure();
        cooled_down();
        assert!(breaker.try_acquire());
        assert!(breaker.record_failure());
        assert_eq!(breaker.phase(), BreakerPhase::Open);

        cooled_down();
        assert!(breaker.try_acquire());
        breaker.record_success();
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
    }

    #[test]
    fn test_config_clamps_minimums() {
        let config = BreakerConfig {
            failure_threshold: 0,
            reset_timeout_ms: 0,
            half_open_max_calls: 0,
        };
        let breaker = CircuitBreaker::new(&config, "test");
        assert_eq!(breaker.failure_threshold, 1);
        assert_eq!(breaker.half_open_max_calls, 1);
    }

    #[test]
    fn test_config_from_backend_config() {
        let config = BackendConfig::new("ddb")
            .with("breaker_failure_threshold", 2_i64)
            .with("breaker_reset_ms", 100_i64);
        let breaker = BreakerConfig::from_config(&config).unwrap();
        assert_eq!(breaker.failure_threshold, 2);
        assert_eq!(breaker.reset_timeout_ms, 100);
        assert_eq!(breaker.half_open_max_calls, 1);

        let bad = BackendConfig::new("ddb").with("breaker_reset_ms", "soon");
        assert!(BreakerConfig::from_config(&bad).is_err());
    }

    #[test]
    fn test_resilient_graph_fails_fast_when_open() {
        let config = BreakerConfig::default()
            .with_failure_threshold(2)
            .with_reset_timeout_ms(60_000);
        let graph = ResilientGraph::new(FlakyGraph::new(true), config, "flaky");

        assert!(matches!(graph.ping(), Err(Error::OperationFailed { .. })));
        assert!(matches!(graph.ping(), Err(Error::OperationFailed { .. })));
        assert_eq!(graph.phase(), BreakerPhase::Open);

        assert!(matches!(
            graph.ping(),
            Err(Error::BackendUnavailable { attempts: 0, .. })
        ));
        assert_eq!(graph.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_contract_errors_do_not_trip() {
        let config = BreakerConfig::default().with_failure_threshold(1);
        let graph = ResilientGraph::new(FlakyGraph::new(false), config, "healthy");

        for _ in 0..3 {
            assert!(matches!(
                graph.alter_nodes(Nodes::with_source("s")),
                Err(Error::NotFound(_))
            ));
        }
        assert_eq!(graph.phase(), BreakerPhase::Closed);
        assert!(graph.ping().is_ok());
    }
}
