use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;
use crate::observer::{ObserverRegistry, Transition};
use crate::scheduler::context::{WorkItem, WorkLoad};
use crate::scheduler::job::JobHandle;

#[derive(Debug, Default)]
struct GroupState {
    idle: VecDeque<JobHandle>,
    active: Option<JobHandle>,
    /// Set while a worker waits for the group to drain and finalizes the
    /// active job. No items are handed out and nothing is promoted meanwhile.
    finalizing: bool,
    /// Workers currently executing an item of the active job
    busy: usize,
}

/// Result of asking a group for work.
pub(crate) enum Dispatch<'a> {
    Work(Assignment<'a>),
    /// Nothing to do within the wait timeout
    Idle,
    Shutdown,
}

/// A work item handed to a worker. The worker counts as busy for the group
/// until `busy` is dropped.
pub(crate) struct Assignment<'a> {
    pub(crate) job: JobHandle,
    pub(crate) item: Box<dyn WorkItem>,
    pub(crate) busy: BusyGuard<'a>,
}

pub(crate) struct BusyGuard<'a> {
    group: &'a ContextGroup,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.group.item_finished();
    }
}

/// One scheduling partition: an idle FIFO and at most one active job.
///
/// All queue and active-slot mutation happens under `state`. `begin` and
/// `done` hooks run with the lock held, so no two workers ever see different
/// active jobs and the slot is clear before the next promotion.
pub struct ContextGroup {
    name: String,
    state: Mutex<GroupState>,
    /// Signalled on enqueue, promotion, finalization and shutdown
    work_ready: Condvar,
    /// Signalled when the last busy worker of the group finishes its item
    all_idle: Condvar,
    shutdown: CancellationToken,
    observers: Arc<ObserverRegistry>,
}

impl ContextGroup {
    pub(crate) fn new(
        name: impl Into<String>,
        shutdown: CancellationToken,
        observers: Arc<ObserverRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(GroupState::default()),
            work_ready: Condvar::new(),
            all_idle: Condvar::new(),
            shutdown,
            observers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a job to the idle queue and wake waiting workers.
    pub(crate) fn put(&self, job: JobHandle) {
        self.state.lock().idle.push_back(job);
        self.work_ready.notify_all();
    }

    /// Wake every waiter so it can observe shutdown.
    pub(crate) fn wake_all(&self) {
        let _state = self.state.lock();
        self.work_ready.notify_all();
        self.all_idle.notify_all();
    }

    pub fn active(&self) -> Option<JobHandle> {
        self.state.lock().active.clone()
    }

    pub fn idle_len(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn busy_workers(&self) -> usize {
        self.state.lock().busy
    }

    /// Hand out the next work item of the active job, promoting idle jobs as
    /// needed. Blocks up to `timeout` while there is nothing to do.
    pub(crate) fn next_work(&self, timeout: Duration) -> Dispatch<'_> {
        let mut transitions = Vec::new();
        let dispatch = self.schedule(timeout, &mut transitions);
        // Observers run outside the lock
        self.observers.deliver(transitions);
        dispatch
    }

    fn schedule(&self, timeout: Duration, transitions: &mut Vec<Transition>) -> Dispatch<'_> {
        let mut state = self.state.lock();
        loop {
            if self.shutdown.is_cancelled() {
                return Dispatch::Shutdown;
            }

            let Some(job) = state.active.clone() else {
                match state.idle.pop_front() {
                    Some(candidate) => {
                        if self.start(&candidate, transitions) {
                            state.active = Some(candidate);
                            self.work_ready.notify_all();
                        }
                    }
                    None => {
                        if self.work_ready.wait_for(&mut state, timeout).timed_out() {
                            return Dispatch::Idle;
                        }
                    }
                }
                continue;
            };

            if state.finalizing {
                if self.work_ready.wait_for(&mut state, timeout).timed_out() {
                    return Dispatch::Idle;
                }
                continue;
            }

            match fetch(&job) {
                Ok(WorkLoad::Item(item)) => {
                    state.busy += 1;
                    return Dispatch::Work(Assignment {
                        job,
                        item,
                        busy: BusyGuard { group: self },
                    });
                }
                Ok(WorkLoad::Exhausted) => self.finish(&mut state, job, false, None, transitions),
                Ok(WorkLoad::Aborted) => self.finish(&mut state, job, true, None, transitions),
                Err(e) => {
                    tracing::error!(
                        job_id = %job.id(),
                        name = job.name(),
                        error = %e,
                        "Work source failed"
                    );
                    self.finish(&mut state, job, true, Some(e.to_string()), transitions)
                }
            }
        }
    }

    /// Idle -> Active. Returns false if the job declined or failed to begin,
    /// in which case it is discarded.
    fn start(&self, job: &JobHandle, transitions: &mut Vec<Transition>) -> bool {
        tracing::debug!(job_id = %job.id(), name = job.name(), group = %self.name, "Starting job");

        let result = if job.context().is_aborted() {
            Err(ContextError::Aborted)
        } else {
            run_hook(|| job.context().begin())
        };

        match result {
            Ok(()) => {
                job.mark_active();
                transitions.push(Transition::Started(job.clone()));
                tracing::debug!(job_id = %job.id(), name = job.name(), "Job started");
                true
            }
            Err(ContextError::Aborted) => {
                tracing::debug!(job_id = %job.id(), name = job.name(), "Job aborted before start");
                job.mark_discarded(true, None);
                transitions.push(Transition::Discarded(job.clone()));
                false
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id(),
                    name = job.name(),
                    error = %e,
                    "Job not started"
                );
                job.mark_discarded(false, Some(e.to_string()));
                transitions.push(Transition::Discarded(job.clone()));
                false
            }
        }
    }

    /// Active -> Done. Waits until no worker of the group is executing an
    /// item, then finalizes the job and clears the active slot.
    fn finish(
        &self,
        state: &mut MutexGuard<'_, GroupState>,
        job: JobHandle,
        mut aborted: bool,
        mut error: Option<String>,
        transitions: &mut Vec<Transition>,
    ) {
        state.finalizing = true;
        while state.busy > 0 {
            if self.shutdown.is_cancelled() {
                // Items may still be running; the job stays active
                state.finalizing = false;
                return;
            }
            self.all_idle.wait(state);
        }

        tracing::debug!(job_id = %job.id(), name = job.name(), "Finalizing job");
        match run_hook(|| job.context().done()) {
            Ok(()) => {}
            Err(ContextError::Aborted) => aborted = true,
            Err(e) => {
                tracing::error!(
                    job_id = %job.id(),
                    name = job.name(),
                    error = %e,
                    "Job finalization failed"
                );
                error.get_or_insert_with(|| e.to_string());
            }
        }

        state.active = None;
        state.finalizing = false;
        job.mark_done(aborted || job.context().is_aborted(), error);
        tracing::debug!(job_id = %job.id(), name = job.name(), "Job finished");
        transitions.push(Transition::Finished(job));
        self.work_ready.notify_all();
    }

    fn item_finished(&self) {
        let mut state = self.state.lock();
        state.busy = state.busy.saturating_sub(1);
        if state.busy == 0 {
            self.all_idle.notify_all();
        }
    }
}

impl std::fmt::Debug for ContextGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ContextGroup")
            .field("name", &self.name)
            .field("idle", &state.idle.len())
            .field("active", &state.active.as_ref().map(JobHandle::name))
            .field("busy", &state.busy)
            .finish()
    }
}

fn fetch(job: &JobHandle) -> Result<WorkLoad, ContextError> {
    catch_unwind(AssertUnwindSafe(|| job.context().next_work_item(false, None)))
        .map_err(ContextError::from_panic)
}

/// Run a context hook, turning a panic into a fault.
fn run_hook<F>(hook: F) -> Result<(), ContextError>
where
    F: FnOnce() -> Result<(), ContextError>,
{
    catch_unwind(AssertUnwindSafe(hook))
        .unwrap_or_else(|panic| Err(ContextError::from_panic(panic)))
}
