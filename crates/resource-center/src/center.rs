//! Combined owner of the operation batcher and the lifecycle tracker

use std::sync::Arc;

use mobisync_core_types::{ElementLocator, StateSnapshotService};
use serde_json::{Map, Value};
use tracing::info;

use crate::batcher::{BatchExecutor, BatchStats, OperationBatcher};
use crate::errors::{BatchError, ResourceError};
use crate::lifecycle::{LifecycleStats, ResourceLifecycleTracker, ResourceReference, ResourceType};
use crate::policy::{BatchingOptions, CachingStrategy, LazyLoadingOptions};

/// What a [`ResourceCenter::reset`] tore down
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub rejected_operations: usize,
    pub cleared_references: usize,
    /// Idle timers plus the batch flush timer
    pub cancelled_timers: usize,
}

pub struct ResourceCenter {
    batcher: OperationBatcher,
    lifecycle: ResourceLifecycleTracker,
}

impl ResourceCenter {
    pub fn new(
        batching: BatchingOptions,
        caching: CachingStrategy,
        lazy: LazyLoadingOptions,
        locator: Arc<dyn ElementLocator>,
        snapshots: Arc<dyn StateSnapshotService>,
    ) -> Self {
        Self {
            batcher: OperationBatcher::new(batching),
            lifecycle: ResourceLifecycleTracker::new(locator, snapshots, lazy, caching),
        }
    }

    pub fn batcher(&self) -> &OperationBatcher {
        &self.batcher
    }

    pub fn lifecycle(&self) -> &ResourceLifecycleTracker {
        &self.lifecycle
    }

    pub async fn submit(
        &self,
        operation: &str,
        args: Value,
        executor: BatchExecutor,
    ) -> Result<Value, BatchError> {
        self.batcher.submit(operation, args, executor).await
    }

    pub async fn track(
        &self,
        resource_type: ResourceType,
        id: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<ResourceReference, ResourceError> {
        self.lifecycle.track(resource_type, id, metadata).await
    }

    pub async fn optimize_memory_usage(&self) -> usize {
        self.lifecycle.optimize_memory_usage().await
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.batcher.stats()
    }

    pub fn resource_stats(&self) -> LifecycleStats {
        self.lifecycle.stats()
    }

    /// Return both engines to a quiescent state
    pub fn reset(&self) -> ResetReport {
        let batch = self.batcher.reset_with_report();
        let lifecycle = self.lifecycle.reset();
        let report = ResetReport {
            rejected_operations: batch.rejected,
            cleared_references: lifecycle.cleared_references,
            cancelled_timers: lifecycle.cancelled_timers + usize::from(batch.timer_cancelled),
        };
        info!(
            rejected_operations = report.rejected_operations,
            cleared_references = report.cleared_references,
            cancelled_timers = report.cancelled_timers,
            "Resource center reset"
        );
        report
    }
}
