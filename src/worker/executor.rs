use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::ContextError;
use crate::scheduler::{JobHandle, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Completed,
    /// The item asked its job to stop
    Aborted,
    Failed,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Aborted => write!(f, "aborted"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of executing one work item
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub status: ItemStatus,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_failure(&self) -> bool {
        self.status == ItemStatus::Failed
    }
}

/// Runs work items on the calling worker thread.
///
/// Faults never escape: returned errors and panics are logged and reported
/// in the [`ExecutionResult`] so the worker can carry on with the next item.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    worker: String,
}

impl JobExecutor {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn execute(&self, job: &JobHandle, item: Box<dyn WorkItem>) -> ExecutionResult {
        tracing::trace!(worker = %self.worker, job_id = %job.id(), "Executing work item");
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| item.run()))
            .unwrap_or_else(|panic| Err(ContextError::from_panic(panic)));
        Self::process_result(&self.worker, job, result, started.elapsed())
    }

    fn process_result(
        worker: &str,
        job: &JobHandle,
        result: Result<(), ContextError>,
        elapsed: Duration,
    ) -> ExecutionResult {
        let (status, error) = match result {
            Ok(()) => (ItemStatus::Completed, None),
            Err(ContextError::Aborted) => {
                tracing::debug!(
                    worker,
                    job_id = %job.id(),
                    name = job.name(),
                    "Work item aborted its job"
                );
                job.abort();
                (ItemStatus::Aborted, None)
            }
            Err(e) => {
                tracing::error!(
                    worker,
                    job_id = %job.id(),
                    name = job.name(),
                    error = %e,
                    "Work item failed"
                );
                (ItemStatus::Failed, Some(e.to_string()))
            }
        };

        ExecutionResult {
            job_id: job.id(),
            status,
            error,
            elapsed,
        }
    }
}
