use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mobisync_core_types::memory::{InMemoryLocator, InMemorySnapshotService};
use mobisync_resource_center::{
    executor, BatchError, BatchPhase, BatchingOptions, CachingStrategy, LazyLoadingOptions,
    ResourceCenter, ResourceType,
};
use serde_json::json;

fn center() -> (ResourceCenter, Arc<InMemoryLocator>) {
    let locator = InMemoryLocator::new();
    let center = ResourceCenter::new(
        BatchingOptions {
            batch_timeout_ms: 500,
            ..BatchingOptions::default()
        },
        CachingStrategy::default(),
        LazyLoadingOptions {
            unload_threshold_ms: 1_000,
            ..LazyLoadingOptions::default()
        },
        locator.clone(),
        InMemorySnapshotService::new(),
    );
    (center, locator)
}

#[tokio::test(start_paused = true)]
async fn reset_leaves_everything_quiescent() {
    let (center, locator) = center();
    let center = Arc::new(center);
    let executed = Arc::new(AtomicUsize::new(0));

    let mut queued = Vec::new();
    for i in 0..3 {
        let center = center.clone();
        let executed = executed.clone();
        queued.push(tokio::spawn(async move {
            let exec = executor(move |args| {
                let executed = executed.clone();
                async move {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(args)
                }
            });
            center.submit("getText", json!([format!("el-{i}")]), exec).await
        }));
    }
    center.track(ResourceType::Element, "el-0", None).await.unwrap();
    center.track(ResourceType::State, "snap-1", None).await.unwrap();

    while center.batcher().pending_count() < 3 {
        tokio::task::yield_now().await;
    }

    let report = center.reset();
    assert_eq!(report.rejected_operations, 3);
    assert_eq!(report.cleared_references, 2);
    assert_eq!(report.cancelled_timers, 3);

    for handle in queued {
        assert_eq!(handle.await.unwrap(), Err(BatchError::Reset));
    }
    assert_eq!(center.batcher().phase(), BatchPhase::Idle);
    assert!(center.lifecycle().is_empty());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(executed.load(Ordering::SeqCst), 0);
    assert!(locator.cache_clears().is_empty());
    assert_eq!(center.resource_stats().pending_timers, 0);
}

#[tokio::test(start_paused = true)]
async fn batched_calls_and_tracking_work_together() {
    let (center, locator) = center();
    let exec = executor(|args| async move { Ok(json!({ "text": args[0] })) });

    let (a, b) = tokio::join!(
        center.submit("getText", json!(["el-1"]), exec.clone()),
        center.submit("getText", json!(["el-1"]), exec.clone()),
    );
    assert_eq!(a.unwrap(), json!({ "text": "el-1" }));
    assert_eq!(b.unwrap(), json!({ "text": "el-1" }));
    assert_eq!(center.batch_stats().flushes, 1);
    assert_eq!(center.batch_stats().coalesced, 2);

    center.track(ResourceType::Element, "el-1", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(center.lifecycle().is_empty());
    assert_eq!(locator.cache_clears(), vec![Some("el-1".to_string())]);
    assert_eq!(center.optimize_memory_usage().await, 0);
}
