//! # Backoff Controller
//!
//! Wraps the router's request handling and slows down the delivery of
//! repeated errors.
//!
//! ```text
//! request ──► executor.validate_and_execute()
//!                 │
//!                 ├─ Ok  ──► return immediately (ledger untouched)
//!                 │
//!                 └─ Err ──► classify ──► ledger.record() ──► policy.delay_for()
//!                                               │ (per-class lock released here)
//!                                               ▼
//!                                        sleep(delay) ──► return original error
//! ```
//!
//! The controller changes only *when* an error is delivered, never *what* is
//! delivered. Internal faults (poisoned locks, clock skew) are logged and
//! counted, and the error goes out without any delay.

use crate::backoff::classifier::{ErrorClass, ErrorClassifier};
use crate::backoff::error::{ConfigError, ValidationError};
use crate::backoff::ledger::BackoffLedger;
use crate::backoff::policy::DelayPolicy;
use crate::config::BackoffConfig;
use crate::observability::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Downstream validation/execution collaborator
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    type Request: Send;
    type Response: Send;

    /// Validate the request and forward it to its partition
    async fn validate_and_execute(
        &self,
        request: Self::Request,
    ) -> Result<Self::Response, ValidationError>;
}

/// Outcome handed back to the router, plus the delay that was applied
#[derive(Debug)]
pub struct Delivered<T> {
    pub outcome: Result<T, ValidationError>,
    /// Artificial delay added before returning; always zero on success
    pub delay: Duration,
}

impl<T> Delivered<T> {
    pub fn into_result(self) -> Result<T, ValidationError> {
        self.outcome
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-class adaptive error backoff
#[derive(Debug)]
pub struct BackoffController {
    classifier: ErrorClassifier,
    ledger: BackoffLedger,
    policy: DelayPolicy,
}

impl BackoffController {
    pub fn new(config: &BackoffConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_parts(
            ErrorClassifier::new(config.class_scope),
            BackoffLedger::new(config.reset_window_duration()),
            config.delay_policy(),
        ))
    }

    #[must_use]
    pub fn with_parts(
        classifier: ErrorClassifier,
        ledger: BackoffLedger,
        policy: DelayPolicy,
    ) -> Self {
        Self {
            classifier,
            ledger,
            policy,
        }
    }

    pub fn ledger(&self) -> &BackoffLedger {
        &self.ledger
    }

    pub fn policy(&self) -> &DelayPolicy {
        &self.policy
    }

    /// Run the request through `executor`, delaying the result if it failed
    ///
    /// The delay is a tokio timer, so the worker thread keeps serving other
    /// requests while this one waits.
    pub async fn handle<E>(&self, executor: &E, request: E::Request) -> Delivered<E::Response>
    where
        E: RequestExecutor + ?Sized,
    {
        let outcome = executor.validate_and_execute(request).await;
        let delay = self.delay_for_outcome(&outcome);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Delivered { outcome, delay }
    }

    /// Thread-per-request variant of [`BackoffController::handle`]
    ///
    /// Blocks the calling thread for the delay. Do not call from an async task.
    pub fn handle_blocking<T, F>(&self, execute: F) -> Delivered<T>
    where
        F: FnOnce() -> Result<T, ValidationError>,
    {
        let outcome = execute();
        let delay = self.delay_for_outcome(&outcome);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Delivered { outcome, delay }
    }

    /// Record `error` and return the delay it should incur, without sleeping
    pub fn penalty_for(&self, error: &ValidationError) -> Duration {
        let class = self.classifier.classify_error(error);
        self.penalty_for_class(&class)
    }

    fn delay_for_outcome<T>(&self, outcome: &Result<T, ValidationError>) -> Duration {
        metrics::increment_requests(outcome.is_ok());
        match self.classifier.classify(outcome) {
            Some(class) => self.penalty_for_class(&class),
            None => Duration::ZERO,
        }
    }

    fn penalty_for_class(&self, class: &ErrorClass) -> Duration {
        let snapshot = match self.ledger.record(class) {
            Ok(snapshot) => snapshot,
            Err(fault) => {
                warn!(
                    class = %class,
                    error = %fault,
                    "backoff fault, delivering error without delay"
                );
                metrics::increment_backoff_faults(fault.kind());
                return Duration::ZERO;
            }
        };

        let delay = self.policy.delay_for(&snapshot);
        metrics::observe_backoff_delay(delay.as_secs_f64());

        let count = snapshot.count;
        if self.policy.is_saturated(count) && !self.policy.is_saturated(count - 1) {
            warn!(
                class = %class,
                count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "error class reached maximum backoff"
            );
        } else if !delay.is_zero() {
            debug!(
                class = %class,
                count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "delaying error"
            );
        }
        delay
    }

    /// Periodically drop idle classes from the ledger
    ///
    /// Purging only reclaims memory: an idle class would be reset on its next
    /// error anyway. Must be called from within a tokio runtime.
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let purged = controller.ledger.purge_idle(now);
                let active = controller.ledger.active_classes(now).len();
                metrics::set_active_classes(active);
                if purged > 0 {
                    info!(purged, active, "purged idle error classes");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::classifier::ClassScope;
    use crate::backoff::error::ViolationKind;
    use crate::backoff::ledger::poison_class;

    fn controller(reset_window: Duration) -> BackoffController {
        BackoffController::with_parts(
            ErrorClassifier::new(ClassScope::Namespace),
            BackoffLedger::new(reset_window),
            DelayPolicy {
                base_delay: Duration::from_millis(1),
                max_exponent: 3,
                max_delay: Duration::from_millis(8),
                free_errors: 1,
            },
        )
    }

    fn missing_key(ns: &str) -> ValidationError {
        ValidationError::new(ns, ViolationKind::MissingShardKey, "document has no shardKey")
    }

    #[test]
    fn test_penalty_escalates_then_caps() {
        let c = controller(Duration::from_secs(60));
        let delays: Vec<u64> = (0..7)
            .map(|_| {
                u64::try_from(c.penalty_for(&missing_key("foo.bar")).as_millis()).unwrap()
            })
            .collect();
        assert_eq!(delays, vec![0, 1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_blocking_success_is_delay_free_and_ledger_neutral() {
        let c = controller(Duration::from_secs(60));
        let delivered = c.handle_blocking(|| Ok::<_, ValidationError>(42));
        assert_eq!(delivered.delay, Duration::ZERO);
        assert_eq!(delivered.into_result(), Ok(42));
        assert!(c.ledger().is_empty());
    }

    #[test]
    fn test_blocking_error_is_returned_unchanged() {
        let c = controller(Duration::from_secs(60));
        c.penalty_for(&missing_key("foo.bar"));

        let started = Instant::now();
        let delivered = c.handle_blocking(|| Err::<(), _>(missing_key("foo.bar")));
        assert_eq!(delivered.delay, Duration::from_millis(1));
        assert!(started.elapsed() >= Duration::from_millis(1));
        assert_eq!(delivered.into_result(), Err(missing_key("foo.bar")));
    }

    #[test]
    fn test_clock_skew_fault_yields_zero_delay() {
        let c = controller(Duration::from_secs(60));
        let error = missing_key("foo.bar");
        let class = ErrorClassifier::default().classify_error(&error);

        // Stamp the class far in the future so the next real-clock record looks skewed
        let future = Instant::now() + Duration::from_secs(3600);
        for _ in 0..5 {
            c.ledger().record_at(&class, future).unwrap();
        }

        assert_eq!(c.penalty_for(&error), Duration::ZERO);
        assert_eq!(c.ledger().snapshot(&class).unwrap().count, 5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BackoffConfig {
            base_delay_ms: 0,
            ..BackoffConfig::default()
        };
        assert_eq!(
            BackoffController::new(&config).unwrap_err(),
            ConfigError::ZeroBaseDelay
        );
    }

    #[test]
    fn test_poisoned_class_lock_yields_zero_delay_and_counts_fault() {
        let c = controller(Duration::from_secs(60));
        let error = missing_key("foo.bar");
        let class = ErrorClassifier::default().classify_error(&error);
        for _ in 0..5 {
            c.penalty_for(&error);
        }
        poison_class(c.ledger(), &class);
        let faults_before = metrics::backoff_faults("poisoned");

        let delivered = c.handle_blocking(|| Err::<(), _>(missing_key("foo.bar")));

        assert_eq!(delivered.delay, Duration::ZERO);
        assert_eq!(delivered.into_result(), Err(missing_key("foo.bar")));
        assert!(metrics::backoff_faults("poisoned") > faults_before);
        // The slot was reset, so the class starts over
        assert_eq!(c.penalty_for(&error), Duration::ZERO);
        assert_eq!(c.ledger().snapshot(&class).unwrap().count, 1);
    }
}
