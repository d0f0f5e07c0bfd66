use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use uuid::Uuid;

use crate::scheduler::context::{JobContext, Progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    /// Enqueued, waiting for a worker of its group
    Idle,
    /// Begun and handing out work items
    Active,
    /// Finalized, successfully or aborted
    Done,
    /// Declined or failed to begin; never became active
    Discarded,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Discarded)
    }

    fn can_become(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Idle, JobStatus::Active)
                | (JobStatus::Idle, JobStatus::Discarded)
                | (JobStatus::Active, JobStatus::Done)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Idle => write!(f, "idle"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Discarded => write!(f, "discarded"),
        }
    }
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    aborted: bool,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

struct JobEntry {
    id: Uuid,
    name: String,
    group: String,
    context: Box<dyn JobContext>,
    created_at: DateTime<Utc>,
    state: Mutex<JobState>,
    changed: Condvar,
}

/// Shared handle to an enqueued job context.
///
/// Returned by `JobManager::enqueue` and passed to every observer. Cloning is
/// cheap; all clones refer to the same job.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobEntry>,
}

/// Point-in-time view of a job, suitable for display or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub name: String,
    pub group: String,
    pub status: JobStatus,
    pub aborted: bool,
    pub error: Option<String>,
    pub progress: Option<Progress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobHandle {
    pub(crate) fn new(context: Box<dyn JobContext>) -> Self {
        Self {
            inner: Arc::new(JobEntry {
                id: Uuid::new_v4(),
                name: context.name().to_string(),
                group: context.group_id().to_string(),
                context,
                created_at: Utc::now(),
                state: Mutex::new(JobState {
                    status: JobStatus::Idle,
                    aborted: false,
                    error: None,
                    started_at: None,
                    finished_at: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn group(&self) -> &str {
        &self.inner.group
    }

    pub fn context(&self) -> &dyn JobContext {
        self.inner.context.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn status(&self) -> JobStatus {
        self.inner.state.lock().status
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Whether an abort was requested or the job ended aborted.
    pub fn is_aborted(&self) -> bool {
        self.inner.state.lock().aborted || self.inner.context.is_aborted()
    }

    /// Fault recorded while beginning or finalizing the job.
    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    pub fn progress(&self) -> Option<Progress> {
        self.inner.context.progress()
    }

    /// Ask the context to stop handing out work.
    pub fn abort(&self) {
        tracing::debug!(job_id = %self.id(), name = self.name(), "Abort requested");
        self.inner.context.abort();
    }

    /// Block until the job reaches a terminal status or `timeout` elapses.
    /// Returns whether the job finished.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !state.status.is_terminal() {
            if self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                return state.status.is_terminal();
            }
        }
        true
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let progress = self.progress();
        let state = self.inner.state.lock();
        JobSnapshot {
            id: self.inner.id,
            name: self.inner.name.clone(),
            group: self.inner.group.clone(),
            status: state.status,
            aborted: state.aborted || self.inner.context.is_aborted(),
            error: state.error.clone(),
            progress,
            created_at: self.inner.created_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }

    pub fn ptr_eq(&self, other: &JobHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn mark_active(&self) -> bool {
        self.transition(JobStatus::Active, false, None)
    }

    pub(crate) fn mark_done(&self, aborted: bool, error: Option<String>) -> bool {
        self.transition(JobStatus::Done, aborted, error)
    }

    pub(crate) fn mark_discarded(&self, aborted: bool, error: Option<String>) -> bool {
        self.transition(JobStatus::Discarded, aborted, error)
    }

    /// Move to `next` if the state machine allows it. Status never regresses.
    fn transition(&self, next: JobStatus, aborted: bool, error: Option<String>) -> bool {
        let mut state = self.inner.state.lock();
        if !state.status.can_become(next) {
            tracing::warn!(
                job_id = %self.inner.id,
                from = %state.status,
                to = %next,
                "Rejected job status transition"
            );
            return false;
        }
        state.status = next;
        state.aborted |= aborted;
        if error.is_some() {
            state.error = error;
        }
        match next {
            JobStatus::Active => state.started_at = Some(Utc::now()),
            JobStatus::Done | JobStatus::Discarded => state.finished_at = Some(Utc::now()),
            JobStatus::Idle => {}
        }
        drop(state);
        self.inner.changed.notify_all();
        true
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("group", &self.inner.group)
            .field("status", &self.status())
            .finish()
    }
}
