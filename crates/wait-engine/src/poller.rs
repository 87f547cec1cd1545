//! Generic polling loop behind every wait

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mobisync_core_types::{CaptureOptions, StateComparison, StateSnapshotService, UiSnapshot};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::conditions::ConditionNode;
use crate::errors::WaitError;
use crate::evaluator::CompoundConditionEvaluator;
use crate::metrics::WaitMetricsTracker;
use crate::timeouts::{TimeoutQuery, TimeoutResolver};
use crate::types::{
    PollingDefaults, StateVerification, TimeoutAlert, TimeoutAlertHandler, TimeoutStrategy,
    WaitOptions, WaitPerformance, WaitResult, DYNAMIC_INTERVAL_RATIO, MIN_DYNAMIC_INTERVAL_MS,
};

const DEFAULT_OPERATION: &str = "waitForCondition";

/// Next polling interval in milliseconds.
///
/// `fixed` keeps the current interval, `progressive` multiplies it by
/// `backoff_factor` up to `max_backoff_ms`, `dynamic` uses a tenth of the
/// remaining budget clamped to `[50, max_backoff_ms]`.
pub fn next_interval(
    strategy: TimeoutStrategy,
    current_ms: u64,
    remaining_ms: u64,
    backoff_factor: f64,
    max_backoff_ms: u64,
) -> u64 {
    match strategy {
        TimeoutStrategy::Fixed => current_ms,
        TimeoutStrategy::Progressive => {
            let grown = (current_ms as f64 * backoff_factor).round() as u64;
            grown.min(max_backoff_ms)
        }
        TimeoutStrategy::Dynamic => {
            let ceiling = max_backoff_ms.max(MIN_DYNAMIC_INTERVAL_MS);
            let share = (remaining_ms as f64 * DYNAMIC_INTERVAL_RATIO) as u64;
            share.clamp(MIN_DYNAMIC_INTERVAL_MS, ceiling)
        }
    }
}

/// Effective settings of one wait
#[derive(Debug, Clone)]
struct WaitPlan {
    operation: String,
    timeout_ms: u64,
    interval_ms: u64,
    strategy: TimeoutStrategy,
    backoff_factor: f64,
    max_backoff_ms: u64,
    initial_delay_ms: u64,
    strict: bool,
    alert_threshold: f64,
    error_message: String,
}

impl WaitPlan {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Default)]
struct CheckStats {
    operations: u32,
    total_ms: u64,
    max_ms: u64,
}

impl CheckStats {
    fn observe(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        self.operations += 1;
        self.total_ms += ms;
        self.max_ms = self.max_ms.max(ms);
    }

    fn performance(&self) -> WaitPerformance {
        let avg_check_time = if self.operations == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.operations as f64
        };
        WaitPerformance {
            avg_check_time,
            max_check_time: self.max_ms,
            total_polls: self.operations,
        }
    }
}

/// Polls a predicate/condition pair until it holds or the budget runs out.
pub struct ConditionPoller {
    resolver: Arc<TimeoutResolver>,
    metrics: Arc<WaitMetricsTracker>,
    evaluator: Option<Arc<CompoundConditionEvaluator>>,
    snapshots: Option<Arc<dyn StateSnapshotService>>,
    defaults: PollingDefaults,
    alert_handler: Option<TimeoutAlertHandler>,
}

impl ConditionPoller {
    pub fn new(resolver: Arc<TimeoutResolver>, metrics: Arc<WaitMetricsTracker>) -> Self {
        Self {
            resolver,
            metrics,
            evaluator: None,
            snapshots: None,
            defaults: PollingDefaults::default(),
            alert_handler: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<CompoundConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn StateSnapshotService>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_defaults(mut self, defaults: PollingDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_alert_handler(mut self, handler: TimeoutAlertHandler) -> Self {
        self.alert_handler = Some(handler);
        self
    }

    pub fn defaults(&self) -> &PollingDefaults {
        &self.defaults
    }

    pub fn resolver(&self) -> &Arc<TimeoutResolver> {
        &self.resolver
    }

    pub fn metrics(&self) -> &Arc<WaitMetricsTracker> {
        &self.metrics
    }

    /// Fill an unset strict flag with the configured default for top-level waits
    pub fn apply_default_strictness(&self, mut options: WaitOptions) -> WaitOptions {
        options
            .strict_mode
            .get_or_insert(self.defaults.strict_by_default);
        options
    }

    fn plan(&self, options: &WaitOptions) -> WaitPlan {
        let operation = options
            .operation
            .clone()
            .unwrap_or_else(|| DEFAULT_OPERATION.to_string());
        let timeout_ms = options.timeout_ms.unwrap_or_else(|| {
            let query = TimeoutQuery::new(&operation)
                .element_type(options.element_type.as_deref())
                .element_id(options.element_id.as_deref())
                .condition(options.condition_kind.as_deref());
            self.resolver.resolve_adjusted(&query)
        });
        let error_message = options
            .error_message
            .clone()
            .unwrap_or_else(|| format!("{operation} condition not met within {timeout_ms}ms"));

        WaitPlan {
            timeout_ms,
            interval_ms: options.interval_ms.unwrap_or(self.defaults.interval_ms).max(1),
            strategy: options.timeout_strategy.unwrap_or(self.defaults.strategy),
            backoff_factor: options.backoff_factor.unwrap_or(self.defaults.backoff_factor),
            max_backoff_ms: options.max_backoff_ms.unwrap_or(self.defaults.max_backoff_ms),
            initial_delay_ms: options
                .initial_delay_ms
                .unwrap_or(self.defaults.initial_delay_ms),
            strict: options.strict_mode.unwrap_or(false),
            alert_threshold: options
                .alert_threshold
                .unwrap_or(self.defaults.alert_threshold),
            error_message,
            operation,
        }
    }

    /// Poll until `condition(predicate())` holds.
    ///
    /// Errors from either closure are retried in non-strict mode and
    /// returned immediately in strict mode, unless they are themselves
    /// timeouts. Exhausting the budget is an error only in strict mode.
    pub async fn wait_for_condition<T, P, PFut, C, CFut>(
        &self,
        mut predicate: P,
        mut condition: C,
        options: WaitOptions,
    ) -> Result<WaitResult<T>, WaitError>
    where
        T: Clone + Send,
        P: FnMut() -> PFut + Send,
        PFut: Future<Output = Result<T, WaitError>> + Send,
        C: FnMut(T) -> CFut + Send,
        CFut: Future<Output = Result<bool, WaitError>> + Send,
    {
        let plan = self.plan(&options);
        let timeout = plan.timeout();
        debug!(
            operation = %plan.operation,
            timeout_ms = plan.timeout_ms,
            interval_ms = plan.interval_ms,
            strategy = %plan.strategy,
            strict = plan.strict,
            "Starting wait"
        );

        let before = match &options.state_verification {
            Some(verification) => self.capture(&plan, verification, "before").await,
            None => None,
        };

        let start = Instant::now();
        if plan.initial_delay_ms > 0 {
            sleep(Duration::from_millis(plan.initial_delay_ms).min(timeout)).await;
        }

        let mut stats = CheckStats::default();
        let mut interval_ms = plan.interval_ms;
        let mut last_error: Option<String> = None;

        while start.elapsed() < timeout {
            let check_start = Instant::now();
            let outcome = match predicate().await {
                Ok(value) => match condition(value.clone()).await {
                    Ok(true) => Ok(Some(value)),
                    Ok(false) => Ok(None),
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };
            stats.observe(check_start.elapsed());

            match outcome {
                Ok(Some(value)) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    self.metrics.record(&plan.operation, elapsed_ms, true);
                    self.resolver.record_outcome(&plan.operation, false);
                    debug!(
                        operation = %plan.operation,
                        elapsed_ms,
                        checks = stats.operations,
                        "Wait condition met"
                    );
                    let state_comparison = match (&before, &options.state_verification) {
                        (Some(before), Some(verification)) => {
                            self.verify(&plan, before, verification).await?
                        }
                        _ => None,
                    };
                    return Ok(WaitResult {
                        success: true,
                        value: Some(value),
                        elapsed_time: elapsed_ms,
                        operations: stats.operations,
                        performance: stats.performance(),
                        timed_out: false,
                        last_error,
                        state_comparison,
                    });
                }
                Ok(None) => {}
                Err(err) if plan.strict && !err.is_timeout() => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    self.metrics.record(&plan.operation, elapsed_ms, false);
                    warn!(operation = %plan.operation, error = %err, "Wait aborted by check failure");
                    return Err(err);
                }
                Err(err) => {
                    debug!(operation = %plan.operation, error = %err, "Check failed, continuing");
                    last_error = Some(err.to_string());
                }
            }

            let elapsed = start.elapsed();
            self.check_alert(&plan, elapsed, stats.operations);
            if elapsed >= timeout {
                break;
            }
            let remaining_ms = (timeout - elapsed).as_millis() as u64;
            interval_ms = next_interval(
                plan.strategy,
                interval_ms,
                remaining_ms,
                plan.backoff_factor,
                plan.max_backoff_ms,
            );
            sleep(Duration::from_millis(interval_ms.min(remaining_ms))).await;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.metrics.record(&plan.operation, elapsed_ms, false);
        self.resolver.record_outcome(&plan.operation, true);
        warn!(
            operation = %plan.operation,
            elapsed_ms,
            timeout_ms = plan.timeout_ms,
            checks = stats.operations,
            "Wait timed out"
        );

        if plan.strict {
            return Err(WaitError::Timeout {
                message: plan.error_message,
                elapsed_ms,
                timeout_ms: plan.timeout_ms,
                attempts: stats.operations,
            });
        }
        Ok(WaitResult {
            success: false,
            value: None,
            elapsed_time: elapsed_ms,
            operations: stats.operations,
            performance: stats.performance(),
            timed_out: true,
            last_error,
            state_comparison: None,
        })
    }

    /// Wait until a boolean predicate returns `true`
    pub async fn wait_for_custom<P, Fut>(
        &self,
        predicate: P,
        options: WaitOptions,
    ) -> Result<WaitResult<bool>, WaitError>
    where
        P: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<bool, WaitError>> + Send,
    {
        let mut options = self.apply_default_strictness(options);
        options
            .operation
            .get_or_insert_with(|| "waitForCustom".to_string());
        options
            .condition_kind
            .get_or_insert_with(|| "custom".to_string());
        let negate = options.fail_on_present;
        self.wait_for_condition(
            predicate,
            move |met: bool| async move { Ok(met != negate) },
            options,
        )
        .await
    }

    /// Wait until a condition tree evaluates to `true`.
    ///
    /// The tree is validated up front; malformed trees fail regardless of
    /// strict mode.
    pub async fn wait_for_compound_condition(
        &self,
        node: &ConditionNode,
        options: WaitOptions,
    ) -> Result<WaitResult<bool>, WaitError> {
        let evaluator: &CompoundConditionEvaluator = self.evaluator.as_deref().ok_or_else(|| {
            WaitError::InvalidCondition("no compound condition evaluator configured".to_string())
        })?;
        node.validate()?;

        let mut options = self.apply_default_strictness(options);
        options
            .operation
            .get_or_insert_with(|| "waitForCompoundCondition".to_string());
        options
            .condition_kind
            .get_or_insert_with(|| "compound".to_string());
        let negate = options.fail_on_present;
        self.wait_for_condition(
            move || evaluator.evaluate(node),
            move |met: bool| async move { Ok(met != negate) },
            options,
        )
        .await
    }

    fn check_alert(&self, plan: &WaitPlan, elapsed: Duration, attempt: u32) {
        if plan.timeout_ms == 0 || plan.alert_threshold <= 0.0 {
            return;
        }
        let elapsed_ms = elapsed.as_millis() as u64;
        let fraction = elapsed_ms as f64 / plan.timeout_ms as f64;
        if fraction < plan.alert_threshold {
            return;
        }
        warn!(
            operation = %plan.operation,
            elapsed_ms,
            timeout_ms = plan.timeout_ms,
            fraction,
            attempt,
            "Wait approaching timeout"
        );
        if let Some(handler) = &self.alert_handler {
            handler(&TimeoutAlert {
                operation: plan.operation.clone(),
                elapsed_ms,
                timeout_ms: plan.timeout_ms,
                fraction,
                attempt,
            });
        }
    }

    async fn capture(
        &self,
        plan: &WaitPlan,
        verification: &StateVerification,
        phase: &str,
    ) -> Option<UiSnapshot> {
        let snapshots = self.snapshots.as_ref()?;
        let options = CaptureOptions {
            include_hierarchy: verification.include_hierarchy,
            include_screenshot: false,
            label: Some(format!("{}:{phase}", plan.operation)),
        };
        match snapshots.capture_state(&options).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(operation = %plan.operation, phase, error = %err, "State capture failed, skipping verification");
                None
            }
        }
    }

    async fn verify(
        &self,
        plan: &WaitPlan,
        before: &UiSnapshot,
        verification: &StateVerification,
    ) -> Result<Option<StateComparison>, WaitError> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(None);
        };
        let Some(after) = self.capture(plan, verification, "after").await else {
            return Ok(None);
        };
        let comparison = snapshots.compare_states(before, &after).await;
        if comparison.matches == verification.expect_change {
            let message = if verification.expect_change {
                format!("{}: UI state did not change", plan.operation)
            } else {
                format!(
                    "{}: UI state changed ({})",
                    plan.operation,
                    comparison.differences.join(", ")
                )
            };
            if verification.fail_on_mismatch {
                return Err(WaitError::StateMismatch(message));
            }
            warn!(operation = %plan.operation, "{}", message);
        }
        Ok(Some(comparison))
    }
}
