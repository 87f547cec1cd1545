//! Reference-counted registry of derived artifacts with idle eviction
//!
//! Each tracked `type:id` key owns at most one idle timer. Re-tracking a key
//! aborts its previous timer, and a timer only evicts if it is still the
//! current one for its key.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mobisync_core_types::{ElementLocator, StateSnapshotService};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::errors::ResourceError;
use crate::policy::{CachingStrategy, InvalidationStrategy, LazyLoadingOptions};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    /// Cached element handle owned by the element locator
    Element,
    /// Cached UI snapshot owned by the snapshot service
    State,
    /// Temporary image file on local disk
    Image,
    Other(String),
}

impl ResourceType {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::Element => "element",
            ResourceType::State => "state",
            ResourceType::Image => "image",
            ResourceType::Other(name) => name,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        match value {
            "element" => ResourceType::Element,
            "state" => ResourceType::State,
            "image" => ResourceType::Image,
            other => ResourceType::Other(other.to_string()),
        }
    }
}

impl From<String> for ResourceType {
    fn from(value: String) -> Self {
        ResourceType::from(value.as_str())
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.as_str().to_string()
    }
}

pub fn resource_key(resource_type: &ResourceType, id: &str) -> String {
    format!("{resource_type}:{id}")
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub id: String,
    pub usage_count: u64,
    #[serde(skip)]
    pub created_at: Instant,
    #[serde(skip)]
    pub last_accessed: Instant,
    /// Bytes, taken from the `size` metadata field
    pub size: u64,
    pub metadata: Map<String, Value>,
}

impl ResourceReference {
    fn new(resource_type: ResourceType, id: &str) -> Self {
        let now = Instant::now();
        Self {
            resource_type,
            id: id.to_string(),
            usage_count: 0,
            created_at: now,
            last_accessed: now,
            size: 0,
            metadata: Map::new(),
        }
    }

    pub fn key(&self) -> String {
        resource_key(&self.resource_type, &self.id)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_accessed.elapsed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Backing file of an image resource
    pub fn path(&self) -> Option<PathBuf> {
        self.metadata
            .get("path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
    }

    fn touch(&mut self, metadata: Option<Map<String, Value>>, size: Option<u64>) {
        self.usage_count += 1;
        self.last_accessed = Instant::now();
        if let Some(size) = size {
            self.size = size;
        }
        if let Some(metadata) = metadata {
            self.metadata.extend(metadata);
        }
    }
}

fn metadata_size(key: &str, metadata: Option<&Map<String, Value>>) -> Result<Option<u64>, ResourceError> {
    let Some(size) = metadata.and_then(|metadata| metadata.get("size")) else {
        return Ok(None);
    };
    size.as_u64()
        .or_else(|| size.as_f64().filter(|bytes| *bytes >= 0.0).map(|bytes| bytes as u64))
        .map(Some)
        .ok_or_else(|| ResourceError::InvalidMetadata {
            key: key.to_string(),
            reason: format!("size must be a non-negative number, got {size}"),
        })
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub tracked: usize,
    pub total_size: u64,
    pub by_type: BTreeMap<String, usize>,
    pub track_calls: u64,
    pub evictions: u64,
    pub idle_evictions: u64,
    pub cleanup_failures: u64,
    pub pending_timers: usize,
}

/// Outcome of [`ResourceLifecycleTracker::reset`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LifecycleReset {
    pub cleared_references: usize,
    pub cancelled_timers: usize,
}

struct IdleTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct LifecycleCounters {
    track_calls: AtomicU64,
    evictions: AtomicU64,
    idle_evictions: AtomicU64,
    cleanup_failures: AtomicU64,
}

struct TrackerInner {
    locator: Arc<dyn ElementLocator>,
    snapshots: Arc<dyn StateSnapshotService>,
    lazy: LazyLoadingOptions,
    caching: CachingStrategy,
    registry: Mutex<HashMap<String, ResourceReference>>,
    timers: Mutex<HashMap<String, IdleTimer>>,
    generation: AtomicU64,
    counters: LifecycleCounters,
}

#[derive(Clone)]
pub struct ResourceLifecycleTracker {
    inner: Arc<TrackerInner>,
}

impl ResourceLifecycleTracker {
    pub fn new(
        locator: Arc<dyn ElementLocator>,
        snapshots: Arc<dyn StateSnapshotService>,
        lazy: LazyLoadingOptions,
        caching: CachingStrategy,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                locator,
                snapshots,
                lazy,
                caching,
                registry: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                counters: LifecycleCounters::default(),
            }),
        }
    }

    /// Record a use of `type:id`, creating the reference on first use.
    ///
    /// Metadata fields overwrite earlier values of the same name. When lazy
    /// loading is enabled the key's idle timer is re-armed.
    pub async fn track(
        &self,
        resource_type: ResourceType,
        id: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<ResourceReference, ResourceError> {
        let key = resource_key(&resource_type, id);
        let size = metadata_size(&key, metadata.as_ref())?;
        let (reference, previous, tracked) = {
            let mut registry = self.inner.registry.lock();
            let previous = registry.len();
            let reference = registry
                .entry(key.clone())
                .or_insert_with(|| ResourceReference::new(resource_type, id));
            reference.touch(metadata, size);
            (reference.clone(), previous, registry.len())
        };
        self.inner
            .counters
            .track_calls
            .fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, usage_count = reference.usage_count, "Tracked resource");

        if self.inner.lazy.enabled {
            self.inner.arm_idle_timer(&key);
        }
        self.inner.enforce_limits(previous, tracked).await;
        Ok(reference)
    }

    /// Evict one reference through its type-specific cleanup
    pub async fn unload_resource(
        &self,
        resource_type: &ResourceType,
        id: &str,
    ) -> Result<bool, ResourceError> {
        self.inner.evict(&resource_key(resource_type, id)).await
    }

    /// Evict every reference idle past the unused-resource threshold
    pub async fn optimize_memory_usage(&self) -> usize {
        self.inner.optimize().await
    }

    pub fn reference(&self, resource_type: &ResourceType, id: &str) -> Option<ResourceReference> {
        self.inner
            .registry
            .lock()
            .get(&resource_key(resource_type, id))
            .cloned()
    }

    pub fn references_of(&self, resource_type: &ResourceType) -> Vec<ResourceReference> {
        let mut references: Vec<ResourceReference> = self
            .inner
            .registry
            .lock()
            .values()
            .filter(|reference| &reference.resource_type == resource_type)
            .cloned()
            .collect();
        references.sort_by(|a, b| a.id.cmp(&b.id));
        references
    }

    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.lock().len()
    }

    pub fn stats(&self) -> LifecycleStats {
        let (tracked, total_size, by_type) = {
            let registry = self.inner.registry.lock();
            let mut by_type = BTreeMap::new();
            for reference in registry.values() {
                *by_type
                    .entry(reference.resource_type.to_string())
                    .or_insert(0) += 1;
            }
            let total_size = registry.values().map(|reference| reference.size).sum();
            (registry.len(), total_size, by_type)
        };
        let counters = &self.inner.counters;
        LifecycleStats {
            tracked,
            total_size,
            by_type,
            track_calls: counters.track_calls.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            idle_evictions: counters.idle_evictions.load(Ordering::Relaxed),
            cleanup_failures: counters.cleanup_failures.load(Ordering::Relaxed),
            pending_timers: self.pending_timers(),
        }
    }

    /// Cancel every idle timer, clear the registry and zero the counters
    pub fn reset(&self) -> LifecycleReset {
        let timers: Vec<IdleTimer> = self.inner.timers.lock().drain().map(|(_, timer)| timer).collect();
        let cancelled_timers = timers.len();
        for timer in timers {
            timer.handle.abort();
        }
        let cleared_references = {
            let mut registry = self.inner.registry.lock();
            let cleared = registry.len();
            registry.clear();
            cleared
        };
        let counters = &self.inner.counters;
        for counter in [
            &counters.track_calls,
            &counters.evictions,
            &counters.idle_evictions,
            &counters.cleanup_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        info!(cleared_references, cancelled_timers, "Resource lifecycle tracker reset");
        LifecycleReset {
            cleared_references,
            cancelled_timers,
        }
    }
}

impl TrackerInner {
    fn arm_idle_timer(self: &Arc<Self>, key: &str) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let delay = Duration::from_millis(self.lazy.unload_threshold_ms);
        let inner = Arc::clone(self);
        let timer_key = key.to_string();

        let mut timers = self.timers.lock();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            inner.expire(&timer_key, generation).await;
        });
        if let Some(previous) = timers.insert(key.to_string(), IdleTimer { generation, handle }) {
            previous.handle.abort();
        }
    }

    async fn expire(&self, key: &str, generation: u64) {
        {
            let mut timers = self.timers.lock();
            match timers.get(key) {
                Some(timer) if timer.generation == generation => {
                    // detach: this task is the timer
                    timers.remove(key);
                }
                _ => return,
            }
        }
        debug!(key, "Idle timer fired");
        match self.evict(key).await {
            Ok(true) => {
                self.counters.idle_evictions.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(err) => warn!(key, error = %err, "Idle eviction failed"),
        }
    }

    fn cancel_timer(&self, key: &str) {
        if let Some(timer) = self.timers.lock().remove(key) {
            timer.handle.abort();
        }
    }

    async fn evict(&self, key: &str) -> Result<bool, ResourceError> {
        let Some(reference) = self.registry.lock().get(key).cloned() else {
            return Ok(false);
        };
        self.cancel_timer(key);
        if let Err(err) = self.cleanup(&reference).await {
            self.counters
                .cleanup_failures
                .fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }
        {
            // a track that landed during cleanup keeps its entry and timer
            let mut registry = self.registry.lock();
            let unchanged = registry.get(key).is_some_and(|current| {
                current.usage_count == reference.usage_count
                    && current.last_accessed == reference.last_accessed
            });
            if !unchanged {
                debug!(key, "Resource re-tracked during cleanup; keeping it");
                return Ok(false);
            }
            registry.remove(key);
        }
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(key, usage_count = reference.usage_count, "Evicted resource");
        Ok(true)
    }

    async fn cleanup(&self, reference: &ResourceReference) -> Result<(), ResourceError> {
        match &reference.resource_type {
            ResourceType::Element => self.locator.clear_cache(Some(&reference.id)).await,
            ResourceType::State => self.snapshots.clear_cache(Some(&reference.id)).await,
            ResourceType::Image => {
                if let Some(path) = reference.path() {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => debug!(path = %path.display(), "Deleted image resource"),
                        Err(err) if err.kind() == ErrorKind::NotFound => {
                            debug!(path = %path.display(), "Image resource already gone")
                        }
                        Err(source) => return Err(ResourceError::Cleanup { path, source }),
                    }
                }
            }
            ResourceType::Other(_) => {}
        }
        Ok(())
    }

    fn stale_keys(&self) -> Vec<String> {
        let unused = Duration::from_millis(self.lazy.unused_resource_threshold_ms);
        let ttl = (self.caching.enabled
            && self.caching.invalidation_strategy == InvalidationStrategy::Ttl)
            .then(|| Duration::from_millis(self.caching.ttl_ms));
        self.registry
            .lock()
            .values()
            .filter(|reference| {
                reference.idle_for() > unused || ttl.is_some_and(|ttl| reference.age() > ttl)
            })
            .map(ResourceReference::key)
            .collect()
    }

    async fn optimize(&self) -> usize {
        let mut evicted = 0;
        for key in self.stale_keys() {
            match self.evict(&key).await {
                Ok(true) => evicted += 1,
                Ok(false) => {}
                Err(err) => warn!(key = %key, error = %err, "Failed to evict idle resource"),
            }
        }
        if self.lazy.clear_caches_on_optimize {
            self.locator.clear_cache(None).await;
            self.snapshots.clear_cache(None).await;
        }
        info!(evicted, remaining = self.registry.lock().len(), "Optimized resource usage");
        evicted
    }

    fn least_recently_used(&self) -> Option<String> {
        self.registry
            .lock()
            .values()
            .min_by_key(|reference| reference.last_accessed)
            .map(ResourceReference::key)
    }

    async fn enforce_limits(&self, previous: usize, tracked: usize) {
        let mut tracked = tracked;
        if self.caching.enabled && self.caching.invalidation_strategy == InvalidationStrategy::Lru {
            while tracked > self.caching.max_entries {
                let Some(key) = self.least_recently_used() else {
                    break;
                };
                match self.evict(&key).await {
                    Ok(_) => debug!(key = %key, "Evicted least recently used resource"),
                    Err(err) => {
                        warn!(key = %key, error = %err, "LRU eviction failed");
                        break;
                    }
                }
                tracked = self.registry.lock().len();
            }
        }
        // sweep once per crossing, not on every track while above the threshold
        let crossed = previous <= self.lazy.load_threshold && tracked > self.lazy.load_threshold;
        if self.lazy.enabled && crossed {
            debug!(tracked, load_threshold = self.lazy.load_threshold, "Load threshold exceeded");
            self.optimize().await;
        }
    }
}
