//! Background job execution for long running authoring tasks.
//!
//! Callers hand [`JobContext`]s to a [`JobManager`]. Each context belongs to
//! a named group with its own fixed pool of worker threads. Within a group
//! contexts run one at a time in enqueue order, while their work items are
//! spread across all of the group's workers.

pub mod config;
pub mod error;
pub mod manager;
pub mod observer;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use config::{ManagerConfig, DEFAULT_GROUP};
pub use error::{ContextError, JobError, Result};
pub use manager::JobManager;
pub use observer::{JobObserver, LogObserver, TrackingObserver};
pub use scheduler::{
    BatchContext, ContextGroup, JobContext, JobHandle, JobSnapshot, JobStatus, Progress, WorkItem,
    WorkLoad,
};
pub use worker::{ShutdownReport, WorkerStats};
