//! In-process collaborator implementations
//!
//! Suitable for unit tests and early integration: every call is counted so a
//! test can assert what the core asked for.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::ports::{
    diff_snapshots, CaptureOptions, DeviceElement, ElementHandle, ElementLocator, StateComparison,
    StateSnapshotService, UiSnapshot,
};
use crate::{LocatorStrategy, SyncError};

#[derive(Debug)]
pub struct InMemoryElement {
    id: String,
    displayed: AtomicBool,
    enabled: AtomicBool,
    stale: AtomicBool,
    text: RwLock<String>,
    attributes: RwLock<HashMap<String, String>>,
}

impl InMemoryElement {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            displayed: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            stale: AtomicBool::new(false),
            text: RwLock::new(String::new()),
            attributes: RwLock::new(HashMap::new()),
        })
    }

    pub fn set_displayed(&self, displayed: bool) {
        self.displayed.store(displayed, Ordering::SeqCst);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Every subsequent read fails with [`SyncError::Stale`]
    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::SeqCst);
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.write() = text.into();
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.write().insert(name.into(), value.into());
    }

    fn check_attached(&self) -> Result<(), SyncError> {
        if self.stale.load(Ordering::SeqCst) {
            return Err(SyncError::Stale(self.id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceElement for InMemoryElement {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_displayed(&self) -> Result<bool, SyncError> {
        self.check_attached()?;
        Ok(self.displayed.load(Ordering::SeqCst))
    }

    async fn is_enabled(&self) -> Result<bool, SyncError> {
        self.check_attached()?;
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>, SyncError> {
        self.check_attached()?;
        Ok(self.attributes.read().get(name).cloned())
    }

    async fn text(&self) -> Result<String, SyncError> {
        self.check_attached()?;
        Ok(self.text.read().clone())
    }
}

/// Locator backed by a selector table
#[derive(Default)]
pub struct InMemoryLocator {
    elements: DashMap<String, Vec<Arc<InMemoryElement>>>,
    failures: DashMap<String, SyncError>,
    calls: DashMap<String, u64>,
    total_calls: AtomicU64,
    cache_clears: Mutex<Vec<Option<String>>>,
}

impl InMemoryLocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn key(strategy: LocatorStrategy, selector: &str) -> String {
        format!("{}|{}", strategy.as_str(), selector)
    }

    pub fn insert(&self, strategy: LocatorStrategy, selector: &str, element: Arc<InMemoryElement>) {
        self.elements
            .entry(Self::key(strategy, selector))
            .or_default()
            .push(element);
    }

    pub fn remove(&self, strategy: LocatorStrategy, selector: &str) {
        self.elements.remove(&Self::key(strategy, selector));
    }

    /// Force every lookup of `selector` to fail with `error`
    pub fn fail_with(&self, strategy: LocatorStrategy, selector: &str, error: SyncError) {
        self.failures.insert(Self::key(strategy, selector), error);
    }

    pub fn clear_failure(&self, strategy: LocatorStrategy, selector: &str) {
        self.failures.remove(&Self::key(strategy, selector));
    }

    /// Lookups performed for one selector (single and multi lookups combined)
    pub fn calls_for(&self, strategy: LocatorStrategy, selector: &str) -> u64 {
        self.calls
            .get(&Self::key(strategy, selector))
            .map(|count| *count)
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Every `clear_cache` call received, in order
    pub fn cache_clears(&self) -> Vec<Option<String>> {
        self.cache_clears.lock().clone()
    }

    fn lookup(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> Result<Vec<Arc<InMemoryElement>>, SyncError> {
        let key = Self::key(strategy, selector);
        *self.calls.entry(key.clone()).or_insert(0) += 1;
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.get(&key) {
            return Err(error.clone());
        }
        Ok(self
            .elements
            .get(&key)
            .map(|found| found.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ElementLocator for InMemoryLocator {
    async fn find_element(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        _timeout: Option<Duration>,
    ) -> Result<ElementHandle, SyncError> {
        self.lookup(strategy, selector)?
            .into_iter()
            .next()
            .map(|element| element as ElementHandle)
            .ok_or_else(|| SyncError::NotFound(format!("{strategy}={selector}")))
    }

    async fn find_elements(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, SyncError> {
        Ok(self
            .lookup(strategy, selector)?
            .into_iter()
            .map(|element| element as ElementHandle)
            .collect())
    }

    async fn clear_cache(&self, key: Option<&str>) {
        self.cache_clears.lock().push(key.map(str::to_string));
    }
}

/// Snapshot service backed by a mutable key/value view of the UI
#[derive(Default)]
pub struct InMemorySnapshotService {
    entries: RwLock<BTreeMap<String, String>>,
    captures: AtomicU64,
    fail_captures: AtomicBool,
    cache_clears: Mutex<Vec<Option<String>>>,
}

impl InMemorySnapshotService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_entry(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
    }

    pub fn remove_entry(&self, key: &str) {
        self.entries.write().remove(key);
    }

    pub fn set_fail_captures(&self, fail: bool) {
        self.fail_captures.store(fail, Ordering::SeqCst);
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn cache_clears(&self) -> Vec<Option<String>> {
        self.cache_clears.lock().clone()
    }
}

#[async_trait]
impl StateSnapshotService for InMemorySnapshotService {
    async fn capture_state(&self, options: &CaptureOptions) -> Result<UiSnapshot, SyncError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.fail_captures.load(Ordering::SeqCst) {
            return Err(SyncError::Driver("state capture failed".into()));
        }
        Ok(UiSnapshot {
            id: Uuid::new_v4().to_string(),
            label: options.label.clone(),
            entries: self.entries.read().clone(),
        })
    }

    async fn compare_states(&self, before: &UiSnapshot, after: &UiSnapshot) -> StateComparison {
        diff_snapshots(before, after)
    }

    async fn clear_cache(&self, key: Option<&str>) {
        self.cache_clears.lock().push(key.map(str::to_string));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locator_counts_calls_and_reports_missing_elements() {
        let locator = InMemoryLocator::new();
        let button = InMemoryElement::new("el-1");
        button.set_attribute("label", "Submit");
        locator.insert(LocatorStrategy::AccessibilityId, "submit", button);

        let found = locator
            .find_element(LocatorStrategy::AccessibilityId, "submit", None)
            .await
            .unwrap();
        assert_eq!(found.id(), "el-1");
        assert_eq!(
            found.attribute("label").await.unwrap().as_deref(),
            Some("Submit")
        );

        let missing = locator
            .find_element(LocatorStrategy::AccessibilityId, "cancel", None)
            .await;
        assert!(matches!(missing, Err(SyncError::NotFound(_))));
        assert!(locator
            .find_elements(LocatorStrategy::AccessibilityId, "cancel")
            .await
            .unwrap()
            .is_empty());

        assert_eq!(locator.calls_for(LocatorStrategy::AccessibilityId, "submit"), 1);
        assert_eq!(locator.total_calls(), 3);
    }

    #[tokio::test]
    async fn stale_elements_fail_reads() {
        let element = InMemoryElement::new("el-2");
        element.set_stale(true);
        assert!(matches!(
            element.is_displayed().await,
            Err(SyncError::Stale(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_service_captures_current_entries() {
        let service = InMemorySnapshotService::new();
        service.set_entry("screen", "login");
        let before = service.capture_state(&CaptureOptions::default()).await.unwrap();
        service.set_entry("screen", "home");
        let after = service.capture_state(&CaptureOptions::default()).await.unwrap();
        let diff = service.compare_states(&before, &after).await;
        assert!(!diff.matches);
        assert_eq!(service.captures(), 2);

        service.clear_cache(Some("snap-1")).await;
        assert_eq!(service.cache_clears(), vec![Some("snap-1".to_string())]);
    }
}
