//! Synchronization context
//!
//! Wires the wait engine and the resource center together from one
//! [`SyncConfig`] and the device-driver collaborators. Collaborators are
//! passed in explicitly; nothing here reaches for global state.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use mobisync_core_types::{ElementHandle, ElementLocator, LocatorStrategy, StateSnapshotService};
use mobisync_resource_center::{
    BatchExecutor, BatchHandler, BatchStats, LifecycleStats, ResetReport, ResourceCenter,
    ResourceReference, ResourceType,
};
use mobisync_wait_engine::{
    CompoundConditionEvaluator, ConditionNode, ConditionPoller, ElementWaits, ResolvedProfile,
    TimeoutAlertHandler, TimeoutProfile, TimeoutQuery, TimeoutResolver, WaitError,
    WaitMetricsTracker, WaitOptions, WaitPerformanceMetrics, WaitResult,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::config::SyncConfig;
use crate::errors::Result;

pub type ElementWaitResult = WaitResult<Option<ElementHandle>>;

pub struct SyncContext {
    config: Arc<SyncConfig>,
    resolver: Arc<TimeoutResolver>,
    metrics: Arc<WaitMetricsTracker>,
    poller: Arc<ConditionPoller>,
    element_waits: ElementWaits,
    resources: ResourceCenter,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        locator: Arc<dyn ElementLocator>,
        snapshots: Arc<dyn StateSnapshotService>,
    ) -> Result<Self> {
        Self::build(config, locator, snapshots, None)
    }

    /// Like [`new`](Self::new), with a callback invoked on every timeout alert
    pub fn new_with_alert_handler(
        config: SyncConfig,
        locator: Arc<dyn ElementLocator>,
        snapshots: Arc<dyn StateSnapshotService>,
        handler: TimeoutAlertHandler,
    ) -> Result<Self> {
        Self::build(config, locator, snapshots, Some(handler))
    }

    fn build(
        config: SyncConfig,
        locator: Arc<dyn ElementLocator>,
        snapshots: Arc<dyn StateSnapshotService>,
        alert_handler: Option<TimeoutAlertHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let resolver = Arc::new(config.timeouts.build_resolver());

        let metrics = Arc::new(WaitMetricsTracker::new());
        let evaluator = Arc::new(CompoundConditionEvaluator::new(locator.clone()));
        let mut poller = ConditionPoller::new(resolver.clone(), metrics.clone())
            .with_evaluator(evaluator)
            .with_snapshots(snapshots.clone())
            .with_defaults(config.polling.clone());
        if let Some(handler) = alert_handler {
            poller = poller.with_alert_handler(handler);
        }
        let poller = Arc::new(poller);

        let element_waits = ElementWaits::new(poller.clone(), locator.clone());
        let resources = ResourceCenter::new(
            config.batching.clone(),
            config.caching.clone(),
            config.lazy_loading.clone(),
            locator,
            snapshots,
        );

        info!(
            active_profile = %resolver.active_profile_name(),
            profiles = resolver.profile_names().len(),
            batching = config.batching.enabled,
            lazy_loading = config.lazy_loading.enabled,
            "Synchronization context ready"
        );

        Ok(Self {
            config: Arc::new(config),
            resolver,
            metrics,
            poller,
            element_waits,
            resources,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        self.config.as_ref()
    }

    pub fn resolver(&self) -> &Arc<TimeoutResolver> {
        &self.resolver
    }

    pub fn poller(&self) -> &Arc<ConditionPoller> {
        &self.poller
    }

    pub fn resources(&self) -> &ResourceCenter {
        &self.resources
    }

    // Waits

    /// Generic wait; strictness defaults to `polling.strict_by_default`
    pub async fn wait_for_condition<T, P, PFut, C, CFut>(
        &self,
        predicate: P,
        condition: C,
        options: WaitOptions,
    ) -> Result<WaitResult<T>>
    where
        T: Clone + Send,
        P: FnMut() -> PFut + Send,
        PFut: Future<Output = std::result::Result<T, WaitError>> + Send,
        C: FnMut(T) -> CFut + Send,
        CFut: Future<Output = std::result::Result<bool, WaitError>> + Send,
    {
        let options = self.poller.apply_default_strictness(options);
        Ok(self
            .poller
            .wait_for_condition(predicate, condition, options)
            .await?)
    }

    pub async fn wait_for_element_present(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: WaitOptions,
    ) -> Result<ElementWaitResult> {
        Ok(self
            .element_waits
            .wait_for_element_present(strategy, selector, options)
            .await?)
    }

    pub async fn wait_for_element_visible(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: WaitOptions,
    ) -> Result<ElementWaitResult> {
        Ok(self
            .element_waits
            .wait_for_element_visible(strategy, selector, options)
            .await?)
    }

    pub async fn wait_for_element_enabled(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: WaitOptions,
    ) -> Result<ElementWaitResult> {
        Ok(self
            .element_waits
            .wait_for_element_enabled(strategy, selector, options)
            .await?)
    }

    pub async fn wait_for_attribute_equals(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        attribute: &str,
        expected: &str,
        options: WaitOptions,
    ) -> Result<ElementWaitResult> {
        Ok(self
            .element_waits
            .wait_for_attribute_equals(strategy, selector, attribute, expected, options)
            .await?)
    }

    pub async fn wait_for_text_equals(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        expected: &str,
        options: WaitOptions,
    ) -> Result<ElementWaitResult> {
        Ok(self
            .element_waits
            .wait_for_text_equals(strategy, selector, expected, options)
            .await?)
    }

    pub async fn wait_for_compound_condition(
        &self,
        node: &ConditionNode,
        options: WaitOptions,
    ) -> Result<WaitResult<bool>> {
        Ok(self.poller.wait_for_compound_condition(node, options).await?)
    }

    /// Validate a JSON condition tree, then wait on it
    pub async fn wait_for_compound_json(
        &self,
        tree: Value,
        options: WaitOptions,
    ) -> Result<WaitResult<bool>> {
        let node = ConditionNode::from_json(tree)?;
        self.wait_for_compound_condition(&node, options).await
    }

    pub async fn wait_for_custom<P, Fut>(
        &self,
        predicate: P,
        options: WaitOptions,
    ) -> Result<WaitResult<bool>>
    where
        P: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<bool, WaitError>> + Send,
    {
        Ok(self.poller.wait_for_custom(predicate, options).await?)
    }

    // Timeouts

    pub fn resolve_timeout(
        &self,
        operation: &str,
        element_type: Option<&str>,
        element_id: Option<&str>,
    ) -> u64 {
        self.resolver
            .resolve_timeout(operation, element_type, element_id)
    }

    /// Resolution including condition kind and dynamic adjustment
    pub fn resolve(&self, query: &TimeoutQuery<'_>) -> u64 {
        self.resolver.resolve_adjusted(query)
    }

    pub fn register_timeout_profile(&self, profile: TimeoutProfile) -> ResolvedProfile {
        self.resolver.register_profile(profile)
    }

    pub fn set_active_profile(&self, name: &str) -> bool {
        self.resolver.set_active_profile(name)
    }

    pub fn active_profile_name(&self) -> String {
        self.resolver.active_profile_name()
    }

    // Metrics

    pub fn wait_metrics(&self) -> BTreeMap<String, WaitPerformanceMetrics> {
        self.metrics.get_all()
    }

    pub fn wait_metrics_for(&self, operation: &str) -> Option<WaitPerformanceMetrics> {
        self.metrics.get(operation)
    }

    pub fn reset_wait_metrics(&self, operation: Option<&str>) {
        self.metrics.reset(operation);
    }

    // Resources

    pub async fn submit(
        &self,
        operation: &str,
        args: Value,
        executor: BatchExecutor,
    ) -> Result<Value> {
        Ok(self.resources.submit(operation, args, executor).await?)
    }

    pub fn register_batch_handler(&self, operation: &str, handler: Arc<dyn BatchHandler>) {
        self.resources
            .batcher()
            .register_batch_handler(operation, handler);
    }

    pub async fn track(
        &self,
        resource_type: ResourceType,
        id: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<ResourceReference> {
        Ok(self.resources.track(resource_type, id, metadata).await?)
    }

    pub async fn unload_resource(&self, resource_type: &ResourceType, id: &str) -> Result<bool> {
        Ok(self
            .resources
            .lifecycle()
            .unload_resource(resource_type, id)
            .await?)
    }

    pub async fn optimize_memory_usage(&self) -> usize {
        self.resources.optimize_memory_usage().await
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.resources.batch_stats()
    }

    pub fn resource_stats(&self) -> LifecycleStats {
        self.resources.resource_stats()
    }

    pub fn reset(&self) -> ResetReport {
        self.resources.reset()
    }
}
