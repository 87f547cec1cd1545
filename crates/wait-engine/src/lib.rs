//! Synchronization engine
//!
//! Hierarchical timeout resolution, a generic polling loop with fixed,
//! progressive and dynamic backoff, compound condition trees and running
//! wait statistics.

pub mod conditions;
pub mod element_waits;
pub mod errors;
pub mod evaluator;
pub mod metrics;
pub mod poller;
pub mod timeouts;
pub mod types;

pub use conditions::{
    ComparisonKind, CompoundCondition, ConditionNode, ElementCondition, LogicalOperator,
};
pub use element_waits::ElementWaits;
pub use errors::WaitError;
pub use evaluator::CompoundConditionEvaluator;
pub use metrics::{WaitMetricsTracker, WaitPerformanceMetrics};
pub use poller::{next_interval, ConditionPoller};
pub use timeouts::{
    DynamicAdjustment, OutcomeSamples, ResolvedProfile, TimeoutConfig, TimeoutOverrides, TimeoutProfile,
    TimeoutQuery, TimeoutResolver, DEFAULT_PROFILE, DEFAULT_TIMEOUT_MS,
};
pub use types::*;
