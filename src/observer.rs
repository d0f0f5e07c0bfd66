//! Observers of job lifecycle events.
//!
//! Observers drive progress displays and logs. `register_job` is called
//! synchronously on the thread that enqueues a job; the transition hooks are
//! called from worker threads after the group's scheduling lock has been
//! released. Implementations must return quickly.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::ContextError;
use crate::scheduler::{JobHandle, JobSnapshot, JobStatus};

pub trait JobObserver: Send + Sync {
    /// A job was enqueued.
    fn register_job(&self, job: &JobHandle);

    /// The job was begun and now hands out work.
    fn job_started(&self, _job: &JobHandle) {}

    /// The job was finalized.
    fn job_finished(&self, _job: &JobHandle) {}

    /// The job declined or failed to begin and was dropped.
    fn job_discarded(&self, _job: &JobHandle) {}
}

/// Lifecycle change produced while scheduling, delivered once the group lock
/// is released.
#[derive(Debug, Clone)]
pub(crate) enum Transition {
    Started(JobHandle),
    Finished(JobHandle),
    Discarded(JobHandle),
}

/// Observer installed whenever nothing else is listening.
#[derive(Debug, Default)]
pub struct LogObserver;

impl JobObserver for LogObserver {
    fn register_job(&self, job: &JobHandle) {
        tracing::info!(
            job_id = %job.id(),
            name = job.name(),
            group = job.group(),
            "Job registered"
        );
    }

    fn job_started(&self, job: &JobHandle) {
        tracing::info!(job_id = %job.id(), name = job.name(), "Job started");
    }

    fn job_finished(&self, job: &JobHandle) {
        match job.error() {
            Some(error) => tracing::warn!(
                job_id = %job.id(),
                name = job.name(),
                aborted = job.is_aborted(),
                error = %error,
                "Job finished with error"
            ),
            None => tracing::info!(
                job_id = %job.id(),
                name = job.name(),
                aborted = job.is_aborted(),
                "Job finished"
            ),
        }
    }

    fn job_discarded(&self, job: &JobHandle) {
        match job.error() {
            Some(error) => tracing::error!(
                job_id = %job.id(),
                name = job.name(),
                error = %error,
                "Job failed to start"
            ),
            None => {
                tracing::info!(job_id = %job.id(), name = job.name(), "Job aborted before start")
            }
        }
    }
}

/// Keeps every registered job so a job list can show and prune them.
#[derive(Debug, Default)]
pub struct TrackingObserver {
    jobs: Mutex<Vec<JobHandle>>,
}

impl TrackingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered jobs in registration order.
    pub fn jobs(&self) -> Vec<JobHandle> {
        self.jobs.lock().clone()
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        self.jobs().iter().map(JobHandle::snapshot).collect()
    }

    /// Jobs that have not reached a terminal status yet
    pub fn pending(&self) -> Vec<JobHandle> {
        self.jobs
            .lock()
            .iter()
            .filter(|j| !j.is_finished())
            .cloned()
            .collect()
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.jobs.lock().iter().filter(|j| j.status() == status).count()
    }

    /// Drop done and discarded jobs from the list. Returns the number removed.
    pub fn clear_finished(&self) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|job| !job.is_finished());
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

impl JobObserver for TrackingObserver {
    fn register_job(&self, job: &JobHandle) {
        self.jobs.lock().push(job.clone());
    }
}

/// The set of attached observers. Never empty: with no observer attached the
/// default one is active.
pub struct ObserverRegistry {
    default: Arc<dyn JobObserver>,
    observers: RwLock<Vec<Arc<dyn JobObserver>>>,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new(Arc::new(LogObserver))
    }
}

impl ObserverRegistry {
    pub fn new(default: Arc<dyn JobObserver>) -> Self {
        Self {
            observers: RwLock::new(vec![default.clone()]),
            default,
        }
    }

    /// Attach an observer. The default observer steps aside.
    pub fn add(&self, observer: Arc<dyn JobObserver>) {
        let mut observers = self.observers.write();
        observers.retain(|o| !Arc::ptr_eq(o, &self.default));
        observers.push(observer);
    }

    /// Detach an observer. Returns whether it was attached. Removing the last
    /// observer reinstates the default.
    pub fn remove(&self, observer: &Arc<dyn JobObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        let removed = observers.len() != before;
        if observers.is_empty() {
            observers.push(self.default.clone());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Whether only the default observer is attached.
    pub fn is_default_only(&self) -> bool {
        let observers = self.observers.read();
        observers.len() == 1 && Arc::ptr_eq(&observers[0], &self.default)
    }

    fn current(&self) -> Vec<Arc<dyn JobObserver>> {
        self.observers.read().clone()
    }

    pub(crate) fn register(&self, job: &JobHandle) {
        for observer in self.current() {
            notify(job, "register_job", || observer.register_job(job));
        }
    }

    pub(crate) fn deliver(&self, transitions: Vec<Transition>) {
        if transitions.is_empty() {
            return;
        }
        let observers = self.current();
        for transition in &transitions {
            for observer in &observers {
                match transition {
                    Transition::Started(job) => {
                        notify(job, "job_started", || observer.job_started(job))
                    }
                    Transition::Finished(job) => {
                        notify(job, "job_finished", || observer.job_finished(job))
                    }
                    Transition::Discarded(job) => {
                        notify(job, "job_discarded", || observer.job_discarded(job))
                    }
                }
            }
        }
    }
}

/// Call one observer hook. A panicking observer is logged and skipped so it
/// cannot take down the worker delivering the notification.
fn notify<F: FnOnce()>(job: &JobHandle, hook: &'static str, f: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let error = ContextError::from_panic(panic);
        tracing::error!(
            job_id = %job.id(),
            name = job.name(),
            hook,
            error = %error,
            "Observer failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobContext, WorkLoad};
    use std::time::Duration;

    struct Still(&'static str);

    impl JobContext for Still {
        fn name(&self) -> &str {
            self.0
        }

        fn next_work_item(&self, _block: bool, _timeout: Option<Duration>) -> WorkLoad {
            WorkLoad::Exhausted
        }
    }

    #[test]
    fn registry_starts_with_default() {
        let registry = ObserverRegistry::default();
        assert_eq!(registry.len(), 1);
        assert!(registry.is_default_only());
    }

    #[test]
    fn adding_observer_replaces_default() {
        let registry = ObserverRegistry::default();
        let tracker: Arc<dyn JobObserver> = Arc::new(TrackingObserver::new());
        registry.add(tracker.clone());
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_default_only());

        let second: Arc<dyn JobObserver> = Arc::new(TrackingObserver::new());
        registry.add(second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removing_last_observer_reinstates_default() {
        let registry = ObserverRegistry::default();
        let tracker: Arc<dyn JobObserver> = Arc::new(TrackingObserver::new());
        registry.add(tracker.clone());

        assert!(registry.remove(&tracker));
        assert!(registry.is_default_only());
        assert!(!registry.remove(&tracker));
        assert!(registry.is_default_only());
    }

    #[test]
    fn tracking_observer_clears_only_finished_jobs() {
        let tracker = TrackingObserver::new();
        let done = JobHandle::new(Box::new(Still("done")));
        let discarded = JobHandle::new(Box::new(Still("discarded")));
        let active = JobHandle::new(Box::new(Still("active")));
        let idle = JobHandle::new(Box::new(Still("idle")));
        for job in [&done, &discarded, &active, &idle] {
            tracker.register_job(job);
        }

        done.mark_active();
        done.mark_done(false, None);
        discarded.mark_discarded(true, None);
        active.mark_active();

        assert_eq!(tracker.len(), 4);
        assert_eq!(tracker.pending().len(), 2);
        assert_eq!(tracker.clear_finished(), 2);

        let names: Vec<String> = tracker.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["active", "idle"]);
        assert_eq!(tracker.count_with_status(JobStatus::Active), 1);
    }
}
