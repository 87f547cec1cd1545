//! Collaborator ports consumed by the synchronization core
//!
//! Element location, UI-state capture and cache invalidation are provided by
//! the device-driver layer. The core only depends on these traits.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{LocatorStrategy, SyncError};

/// A located UI element on the remote device.
#[async_trait]
pub trait DeviceElement: Send + Sync + fmt::Debug {
    /// Driver-assigned element reference
    fn id(&self) -> &str;

    async fn is_displayed(&self) -> Result<bool, SyncError>;

    async fn is_enabled(&self) -> Result<bool, SyncError>;

    /// Current value of a named attribute, `None` when the attribute is absent
    async fn attribute(&self, name: &str) -> Result<Option<String>, SyncError>;

    async fn text(&self) -> Result<String, SyncError>;
}

pub type ElementHandle = Arc<dyn DeviceElement>;

/// Element location service with its own element cache.
#[async_trait]
pub trait ElementLocator: Send + Sync {
    /// Locate a single element; fails with [`SyncError::NotFound`] when nothing matches
    async fn find_element(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<ElementHandle, SyncError>;

    /// Locate every matching element; an empty list is not an error
    async fn find_elements(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, SyncError>;

    /// Invalidate one cache entry, or the whole cache when `key` is `None`
    async fn clear_cache(&self, key: Option<&str>);
}

/// Options for a UI-state capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    pub include_hierarchy: bool,
    pub include_screenshot: bool,
    pub label: Option<String>,
}

/// Summary of the device UI at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiSnapshot {
    pub id: String,
    pub label: Option<String>,
    pub entries: BTreeMap<String, String>,
}

impl UiSnapshot {
    pub fn fingerprint(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Outcome of comparing two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateComparison {
    pub matches: bool,
    pub differences: Vec<String>,
}

/// UI-state snapshot service with its own snapshot cache.
#[async_trait]
pub trait StateSnapshotService: Send + Sync {
    async fn capture_state(&self, options: &CaptureOptions) -> Result<UiSnapshot, SyncError>;

    async fn compare_states(&self, before: &UiSnapshot, after: &UiSnapshot) -> StateComparison;

    /// Invalidate one cached snapshot, or every cached snapshot when `key` is `None`
    async fn clear_cache(&self, key: Option<&str>);
}

/// Key-by-key comparison shared by snapshot service implementations
pub fn diff_snapshots(before: &UiSnapshot, after: &UiSnapshot) -> StateComparison {
    let mut differences = Vec::new();
    for (key, value) in &before.entries {
        match after.entries.get(key) {
            Some(other) if other == value => {}
            Some(other) => differences.push(format!("{key}: '{value}' -> '{other}'")),
            None => differences.push(format!("{key}: removed")),
        }
    }
    for key in after.entries.keys() {
        if !before.entries.contains_key(key) {
            differences.push(format!("{key}: added"));
        }
    }
    StateComparison {
        matches: differences.is_empty(),
        differences,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> UiSnapshot {
        UiSnapshot {
            id: "s".into(),
            label: None,
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn diff_reports_changed_added_and_removed_keys() {
        let before = snapshot(&[("title", "Login"), ("spinner", "visible")]);
        let after = snapshot(&[("title", "Home"), ("banner", "shown")]);
        let diff = diff_snapshots(&before, &after);
        assert!(!diff.matches);
        assert_eq!(diff.differences.len(), 3);
        assert!(diff_snapshots(&before, &before).matches);
        assert_eq!(before.fingerprint(), "spinner=visible;title=Login");
    }
}
