//! Option, result and policy types shared by the wait engine

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use mobisync_core_types::StateComparison;
use serde::{Deserialize, Serialize};

use crate::errors::WaitError;

/// Polling interval used when neither the options nor the defaults name one
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 3_000;
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.8;

/// Lower bound of the dynamic polling interval
pub const MIN_DYNAMIC_INTERVAL_MS: u64 = 50;

/// Share of the remaining budget used as the dynamic polling interval
pub const DYNAMIC_INTERVAL_RATIO: f64 = 0.10;

/// How the polling interval evolves between checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutStrategy {
    #[default]
    Fixed,
    Progressive,
    Dynamic,
}

impl TimeoutStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutStrategy::Fixed => "fixed",
            TimeoutStrategy::Progressive => "progressive",
            TimeoutStrategy::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for TimeoutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeoutStrategy {
    type Err = WaitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(TimeoutStrategy::Fixed),
            "progressive" => Ok(TimeoutStrategy::Progressive),
            "dynamic" => Ok(TimeoutStrategy::Dynamic),
            other => Err(WaitError::InvalidCondition(format!(
                "unknown timeout strategy: {other}"
            ))),
        }
    }
}

/// Before/after UI-state check around a wait
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateVerification {
    /// The wait is expected to change the UI; a wait that leaves it untouched is a mismatch
    pub expect_change: bool,
    /// Promote a mismatch into [`WaitError::StateMismatch`]
    pub fail_on_mismatch: bool,
    pub include_hierarchy: bool,
}

impl Default for StateVerification {
    fn default() -> Self {
        Self {
            expect_change: true,
            fail_on_mismatch: false,
            include_hierarchy: true,
        }
    }
}

/// Per-call wait options; every unset field falls back to the poller defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitOptions {
    /// Explicit budget, bypasses the timeout resolver
    pub timeout_ms: Option<u64>,
    pub interval_ms: Option<u64>,
    pub error_message: Option<String>,
    pub strict_mode: Option<bool>,
    pub require_visible: bool,
    pub require_enabled: bool,
    /// Invert the wait: succeed once the condition no longer holds
    pub fail_on_present: bool,
    pub backoff_factor: Option<f64>,
    pub max_backoff_ms: Option<u64>,
    pub initial_delay_ms: Option<u64>,
    pub timeout_strategy: Option<TimeoutStrategy>,
    /// Operation kind used for timeout resolution and metrics
    pub operation: Option<String>,
    pub element_type: Option<String>,
    pub element_id: Option<String>,
    pub condition_kind: Option<String>,
    pub alert_threshold: Option<f64>,
    pub state_verification: Option<StateVerification>,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval_ms = Some(interval_ms);
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = Some(strict);
        self
    }

    pub fn with_strategy(mut self, strategy: TimeoutStrategy) -> Self {
        self.timeout_strategy = Some(strategy);
        self
    }

    pub fn with_backoff(mut self, factor: f64, max_backoff_ms: u64) -> Self {
        self.backoff_factor = Some(factor);
        self.max_backoff_ms = Some(max_backoff_ms);
        self
    }

    pub fn with_initial_delay(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = Some(delay_ms);
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn for_element(
        mut self,
        element_type: Option<impl Into<String>>,
        element_id: Option<impl Into<String>>,
    ) -> Self {
        self.element_type = element_type.map(Into::into);
        self.element_id = element_id.map(Into::into);
        self
    }

    pub fn with_condition_kind(mut self, kind: impl Into<String>) -> Self {
        self.condition_kind = Some(kind.into());
        self
    }

    pub fn with_alert_threshold(mut self, fraction: f64) -> Self {
        self.alert_threshold = Some(fraction);
        self
    }

    pub fn require_visible(mut self) -> Self {
        self.require_visible = true;
        self
    }

    pub fn require_enabled(mut self) -> Self {
        self.require_enabled = true;
        self
    }

    /// Wait for absence instead of presence
    pub fn negate(mut self) -> Self {
        self.fail_on_present = true;
        self
    }

    pub fn with_state_verification(mut self, verification: StateVerification) -> Self {
        self.state_verification = Some(verification);
        self
    }
}

/// Poller-wide defaults, loaded from the `polling` configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingDefaults {
    pub interval_ms: u64,
    pub backoff_factor: f64,
    pub max_backoff_ms: u64,
    pub initial_delay_ms: u64,
    pub strategy: TimeoutStrategy,
    /// Elapsed fraction of the budget past which every failed check raises an alert
    pub alert_threshold: f64,
    /// Strictness applied by top-level waits when the caller leaves it unset
    pub strict_by_default: bool,
}

impl Default for PollingDefaults {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            initial_delay_ms: 0,
            strategy: TimeoutStrategy::Fixed,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            strict_by_default: true,
        }
    }
}

/// Per-check timing statistics of one wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitPerformance {
    pub avg_check_time: f64,
    pub max_check_time: u64,
    pub total_polls: u32,
}

/// Outcome of a wait
#[derive(Debug, Clone)]
pub struct WaitResult<T> {
    pub success: bool,
    pub value: Option<T>,
    /// Milliseconds from loop start to completion
    pub elapsed_time: u64,
    /// Predicate invocations actually performed
    pub operations: u32,
    pub performance: WaitPerformance,
    pub timed_out: bool,
    /// Last swallowed predicate or condition failure
    pub last_error: Option<String>,
    pub state_comparison: Option<StateComparison>,
}

impl<T> WaitResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WaitResult<U> {
        WaitResult {
            success: self.success,
            value: self.value.map(f),
            elapsed_time: self.elapsed_time,
            operations: self.operations,
            performance: self.performance,
            timed_out: self.timed_out,
            last_error: self.last_error,
            state_comparison: self.state_comparison,
        }
    }
}

/// Raised on every failed check once the elapsed fraction crosses the alert threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeoutAlert {
    pub operation: String,
    pub elapsed_ms: u64,
    pub timeout_ms: u64,
    pub fraction: f64,
    /// 1-based check number that triggered the alert
    pub attempt: u32,
}

pub type TimeoutAlertHandler = Arc<dyn Fn(&TimeoutAlert) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_options_deserialize_from_camel_case() {
        let options: WaitOptions = serde_json::from_value(serde_json::json!({
            "timeoutMs": 2500,
            "strictMode": false,
            "timeoutStrategy": "progressive",
            "failOnPresent": true,
            "stateVerification": { "failOnMismatch": true }
        }))
        .unwrap();

        assert_eq!(options.timeout_ms, Some(2500));
        assert_eq!(options.strict_mode, Some(false));
        assert_eq!(options.timeout_strategy, Some(TimeoutStrategy::Progressive));
        assert!(options.fail_on_present);
        let verification = options.state_verification.unwrap();
        assert!(verification.expect_change);
        assert!(verification.fail_on_mismatch);
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(
            "Dynamic".parse::<TimeoutStrategy>().unwrap(),
            TimeoutStrategy::Dynamic
        );
        assert!("exponential".parse::<TimeoutStrategy>().is_err());
    }

    #[test]
    fn polling_defaults() {
        let defaults = PollingDefaults::default();
        assert_eq!(defaults.interval_ms, 500);
        assert_eq!(defaults.max_backoff_ms, 3000);
        assert!(defaults.strict_by_default);
    }
}
