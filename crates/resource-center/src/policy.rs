//! Declarative policies consumed by the batcher and the lifecycle tracker
//!
//! Every field has a default so partial configuration documents are valid.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingOptions {
    pub enabled: bool,
    /// A key reaching this many queued calls flushes without waiting for the timer
    #[serde(alias = "maxBatchSize")]
    pub max_batch_size: usize,
    /// Debounce window between the first queued call and the flush
    #[serde(alias = "batchTimeoutMs")]
    pub batch_timeout_ms: u64,
    /// Operation names eligible for batching; everything else bypasses the queue
    pub operations: Vec<String>,
    /// Retry each call on its own when a specialized batch path fails
    #[serde(alias = "fallbackOnBatchFailure")]
    pub fallback_on_batch_failure: bool,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 10,
            batch_timeout_ms: 50,
            operations: vec![
                "findElement".into(),
                "findElements".into(),
                "getAttribute".into(),
                "getText".into(),
                "isDisplayed".into(),
                "isEnabled".into(),
            ],
            fallback_on_batch_failure: true,
        }
    }
}

impl BatchingOptions {
    pub fn covers(&self, operation: &str) -> bool {
        self.enabled && self.operations.iter().any(|allowed| allowed == operation)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationStrategy {
    /// Evict the least recently accessed reference once `max_entries` is exceeded
    #[default]
    Lru,
    /// Sweeps also evict references older than `ttl_ms`
    Ttl,
    /// Nothing is evicted automatically by the cache policy
    Manual,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingStrategy {
    pub enabled: bool,
    #[serde(alias = "ttl")]
    pub ttl_ms: u64,
    #[serde(alias = "maxEntries")]
    pub max_entries: usize,
    #[serde(alias = "invalidationStrategy")]
    pub invalidation_strategy: InvalidationStrategy,
}

impl Default for CachingStrategy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300_000,
            max_entries: 1_000,
            invalidation_strategy: InvalidationStrategy::Lru,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyLoadingOptions {
    pub enabled: bool,
    /// Registry size past which a `track` triggers an optimize sweep
    #[serde(alias = "loadThreshold")]
    pub load_threshold: usize,
    /// Idle time before a per-resource timer evicts the reference
    #[serde(alias = "unloadThreshold")]
    pub unload_threshold_ms: u64,
    /// Idle time past which an optimize sweep evicts the reference
    #[serde(alias = "unusedResourceThreshold")]
    pub unused_resource_threshold_ms: u64,
    #[serde(alias = "clearCachesOnOptimize")]
    pub clear_caches_on_optimize: bool,
}

impl Default for LazyLoadingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            load_threshold: 500,
            unload_threshold_ms: 60_000,
            unused_resource_threshold_ms: 300_000,
            clear_caches_on_optimize: false,
        }
    }
}
