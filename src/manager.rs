use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::error::{JobError, Result};
use crate::observer::{JobObserver, ObserverRegistry};
use crate::scheduler::{ContextGroup, JobContext, JobHandle};
use crate::worker::pool::WorkerPool;
use crate::worker::{ShutdownReport, WorkerStats};

struct GroupSlot {
    group: Arc<ContextGroup>,
    pool: WorkerPool,
}

/// Orchestrates job groups, their workers and the attached observers.
///
/// One manager is constructed by the application and shared by reference
/// with the code that registers jobs. Jobs may only be enqueued from the
/// thread that created the manager.
///
/// Dropping the manager runs [`JobManager::destroy`].
pub struct JobManager {
    config: ManagerConfig,
    groups: RwLock<HashMap<String, GroupSlot>>,
    observers: Arc<ObserverRegistry>,
    shutdown: CancellationToken,
    control_thread: ThreadId,
    destroyed: AtomicBool,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl JobManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            groups: RwLock::new(HashMap::new()),
            observers: Arc::new(ObserverRegistry::default()),
            shutdown: CancellationToken::new(),
            control_thread: thread::current().id(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Create a group and start its workers.
    ///
    /// `group` defaults to the configured default group and `worker_count`
    /// to the available hardware parallelism.
    pub fn init(&self, group: Option<&str>, worker_count: Option<usize>) -> Result<()> {
        let name = group.unwrap_or(&self.config.default_group).to_string();
        let count = worker_count.unwrap_or_else(|| self.config.default_worker_count());

        if self.shutdown.is_cancelled() {
            return Err(JobError::ShutDown);
        }
        if count == 0 {
            return Err(JobError::InvalidWorkerCount(count));
        }

        let mut groups = self.groups.write();
        if groups.contains_key(&name) {
            return Err(JobError::GroupAlreadyInitialized(name));
        }

        let group = Arc::new(ContextGroup::new(
            name.clone(),
            self.shutdown.clone(),
            self.observers.clone(),
        ));
        let pool = WorkerPool::spawn(group.clone(), count, &self.config)?;
        tracing::info!(group = %name, workers = pool.len(), "Job group initialized");
        groups.insert(name, GroupSlot { group, pool });
        Ok(())
    }

    /// Register a job and queue it in its group.
    ///
    /// # Panics
    ///
    /// Panics when called from any thread other than the one that created
    /// the manager.
    pub fn enqueue<C>(&self, context: C) -> Result<JobHandle>
    where
        C: JobContext + 'static,
    {
        self.enqueue_boxed(Box::new(context))
    }

    pub fn enqueue_boxed(&self, context: Box<dyn JobContext>) -> Result<JobHandle> {
        assert_eq!(
            thread::current().id(),
            self.control_thread,
            "jobs must be enqueued from the thread that created the job manager"
        );

        if self.shutdown.is_cancelled() {
            return Err(JobError::ShutDown);
        }

        let group = self
            .group(context.group_id())
            .ok_or_else(|| JobError::GroupNotFound(context.group_id().to_string()))?;

        let job = JobHandle::new(context);
        tracing::debug!(job_id = %job.id(), name = job.name(), group = job.group(), "Register job");

        self.observers.register(&job);
        group.put(job.clone());
        Ok(job)
    }

    pub fn add_observer(&self, observer: Arc<dyn JobObserver>) {
        self.observers.add(observer);
    }

    /// Detach an observer. The default logging observer takes over once the
    /// last one is gone.
    pub fn remove_observer(&self, observer: &Arc<dyn JobObserver>) -> bool {
        self.observers.remove(observer)
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn group(&self, name: &str) -> Option<Arc<ContextGroup>> {
        self.groups.read().get(name).map(|slot| slot.group.clone())
    }

    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn worker_stats(&self, group: &str) -> Option<Vec<WorkerStats>> {
        self.groups.read().get(group).map(|slot| slot.pool.stats())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop all workers and join them.
    ///
    /// Workers finish the item they are executing and then exit. Each worker
    /// is waited for at most the configured join timeout; stragglers are
    /// logged and reported, never waited for indefinitely. Calling this more
    /// than once is a no-op.
    pub fn destroy(&self) -> ShutdownReport {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }

        tracing::debug!("Start destroying job manager");
        self.shutdown.cancel();

        let mut groups = self.groups.write();
        for slot in groups.values() {
            slot.pool.request_stop();
            slot.group.wake_all();
        }

        let mut report = ShutdownReport::default();
        for (name, slot) in groups.iter_mut() {
            tracing::debug!(group = %name, "Joining workers");
            report.merge(slot.pool.join(self.config.join_timeout));
        }

        if report.is_clean() {
            tracing::info!(joined = report.joined, "Job manager destroyed");
        } else {
            tracing::warn!(
                joined = report.joined,
                timed_out = report.timed_out.len(),
                "Job manager destroyed with unresponsive workers"
            );
        }
        report
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::WorkLoad;
    use std::time::Duration;

    struct Empty(&'static str);

    impl JobContext for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        fn group_id(&self) -> &str {
            self.0
        }

        fn next_work_item(&self, _block: bool, _timeout: Option<Duration>) -> WorkLoad {
            WorkLoad::Exhausted
        }
    }

    fn manager() -> JobManager {
        JobManager::new(
            ManagerConfig::default()
                .with_wait_timeout(Duration::from_millis(10))
                .with_join_timeout(Duration::from_secs(2)),
        )
    }

    #[test]
    fn init_defaults_to_general_group() {
        let manager = manager();
        manager.init(None, Some(1)).unwrap();
        assert_eq!(manager.group_names(), vec!["general"]);
        assert_eq!(manager.worker_stats("general").unwrap().len(), 1);
    }

    #[test]
    fn init_twice_fails() {
        let manager = manager();
        manager.init(Some("render"), Some(1)).unwrap();
        let err = manager.init(Some("render"), Some(2)).unwrap_err();
        assert!(matches!(err, JobError::GroupAlreadyInitialized(ref g) if g == "render"));
        assert_eq!(manager.worker_stats("render").unwrap().len(), 1);
    }

    #[test]
    fn init_rejects_zero_workers() {
        let manager = manager();
        let err = manager.init(None, Some(0)).unwrap_err();
        assert!(matches!(err, JobError::InvalidWorkerCount(0)));
        assert!(manager.group_names().is_empty());
    }

    #[test]
    fn destroy_is_idempotent() {
        let manager = manager();
        manager.init(None, Some(2)).unwrap();
        let first = manager.destroy();
        assert_eq!(first.joined, 2);
        assert!(first.is_clean());

        let second = manager.destroy();
        assert_eq!(second.joined, 0);
        assert!(manager.is_shut_down());
    }

    #[test]
    fn enqueue_after_destroy_fails() {
        let manager = manager();
        manager.init(None, Some(1)).unwrap();
        manager.destroy();
        let err = manager.enqueue(Empty("general")).unwrap_err();
        assert!(matches!(err, JobError::ShutDown));
        assert!(matches!(manager.init(Some("late"), Some(1)), Err(JobError::ShutDown)));
    }

    #[test]
    #[should_panic(expected = "thread that created the job manager")]
    fn enqueue_from_foreign_thread_panics() {
        let manager = Arc::new(manager());
        manager.init(None, Some(1)).unwrap();
        let remote = manager.clone();
        let result = thread::spawn(move || remote.enqueue(Empty("general")).map(|_| ())).join();
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }
}
