//! Orbiter Tasks - task graph execution engine
//!
//! This crate provides the after-success dependency graph, a bounded-parallel
//! scheduler with skip propagation, and a content-addressable cache with
//! host-side and device-side stores.

pub mod cache;
pub mod dag;
pub mod device_cache;
pub mod reporter;
pub mod scheduler;
pub mod task;

pub use cache::{
    ArtifactLocation, CacheEntry, CacheError, CacheInput, CacheKey, CacheLookup, CacheStats,
    CacheStore, ContentCache, Fingerprint, LocalCacheStore, PruneStats,
};
pub use dag::{DagError, TaskGraph, TaskHandle};
pub use device_cache::DeviceCacheStore;
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter};
pub use scheduler::{RunReport, SchedulerOptions, TaskResult, TaskScheduler};
pub use task::{task_fn, FnTask, Task, TaskError, TaskOutput, TaskState};
