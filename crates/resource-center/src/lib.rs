//! Resource and operation management
//!
//! [`OperationBatcher`] coalesces eligible calls issued inside a debounce
//! window into one flush cycle. [`ResourceLifecycleTracker`] keeps
//! reference-counted records of derived artifacts and evicts them when they
//! go idle. [`ResourceCenter`] owns one of each.

pub mod batcher;
pub mod center;
pub mod errors;
pub mod lifecycle;
pub mod policy;

pub use batcher::{
    batch_key, executor, BatchExecutor, BatchFuture, BatchHandler, BatchPhase, BatchReset,
    BatchStats, OperationBatcher,
};
pub use center::{ResetReport, ResourceCenter};
pub use errors::{BatchError, ResourceError};
pub use lifecycle::{
    resource_key, LifecycleReset, LifecycleStats, ResourceLifecycleTracker, ResourceReference,
    ResourceType,
};
pub use policy::{BatchingOptions, CachingStrategy, InvalidationStrategy, LazyLoadingOptions};
