use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::scheduler::group::{Assignment, ContextGroup, Dispatch};
use crate::worker::executor::JobExecutor;

/// Per-worker counters
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub name: String,
    pub group: String,
    pub processed: u64,
    pub failed: u64,
    pub busy: bool,
    pub alive: bool,
}

/// Outcome of joining worker threads during shutdown
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub joined: usize,
    /// Names of workers that did not exit within the join timeout
    pub timed_out: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }

    pub(crate) fn merge(&mut self, other: ShutdownReport) {
        self.joined += other.joined;
        self.timed_out.extend(other.timed_out);
    }
}

#[derive(Debug, Default)]
struct WorkerState {
    stop: AtomicBool,
    busy: AtomicBool,
    processed: AtomicU64,
    failed: AtomicU64,
    exited: Mutex<bool>,
    exit_signal: Condvar,
}

impl WorkerState {
    /// Wait until the worker thread has left its loop. Returns false on
    /// timeout.
    fn wait_exited(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut exited = self.exited.lock();
        while !*exited {
            if self.exit_signal.wait_until(&mut exited, deadline).timed_out() {
                return *exited;
            }
        }
        true
    }
}

/// Marks the worker as exited when the thread body returns or unwinds.
struct ExitGuard(Arc<WorkerState>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        *self.0.exited.lock() = true;
        self.0.exit_signal.notify_all();
    }
}

struct Worker {
    name: String,
    state: Arc<WorkerState>,
    handle: Option<JoinHandle<()>>,
}

/// Fixed set of threads serving one group.
pub(crate) struct WorkerPool {
    group: String,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Start `count` workers pulling from `group`.
    pub(crate) fn spawn(
        group: Arc<ContextGroup>,
        count: usize,
        config: &ManagerConfig,
    ) -> Result<Self> {
        let mut pool = Self {
            group: group.name().to_string(),
            workers: Vec::with_capacity(count),
        };

        for index in 0..count {
            let name = config.thread_name(group.name(), index);
            tracing::debug!(worker = %name, group = group.name(), "Creating worker");

            let state = Arc::new(WorkerState::default());
            let executor = JobExecutor::new(name.clone());
            let wait = config.wait_timeout;
            let thread_group = group.clone();
            let thread_state = state.clone();

            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                let _exit = ExitGuard(thread_state.clone());
                worker_loop(&thread_group, &thread_state, &executor, wait);
            });

            match spawned {
                Ok(handle) => pool.workers.push(Worker {
                    name,
                    state,
                    handle: Some(handle),
                }),
                Err(e) => {
                    tracing::error!(worker = %name, error = %e, "Failed to spawn worker");
                    pool.request_stop();
                    return Err(e.into());
                }
            }
        }

        Ok(pool)
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Ask every worker to exit after its current item.
    pub(crate) fn request_stop(&self) {
        for worker in &self.workers {
            worker.state.stop.store(true, Ordering::Release);
        }
    }

    /// Join every worker, waiting at most `timeout` for each one.
    pub(crate) fn join(&mut self, timeout: Duration) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for worker in &mut self.workers {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            tracing::debug!(worker = %worker.name, "Joining worker");
            if worker.state.wait_exited(timeout) {
                if handle.join().is_err() {
                    tracing::warn!(worker = %worker.name, "Worker thread panicked");
                }
                report.joined += 1;
            } else {
                tracing::warn!(worker = %worker.name, "Could not join worker");
                worker.handle = Some(handle);
                report.timed_out.push(worker.name.clone());
            }
        }
        report
    }

    pub(crate) fn stats(&self) -> Vec<WorkerStats> {
        self.workers
            .iter()
            .map(|w| WorkerStats {
                name: w.name.clone(),
                group: self.group.clone(),
                processed: w.state.processed.load(Ordering::Relaxed),
                failed: w.state.failed.load(Ordering::Relaxed),
                busy: w.state.busy.load(Ordering::Relaxed),
                alive: w.handle.as_ref().is_some_and(|h| !h.is_finished()),
            })
            .collect()
    }
}

fn worker_loop(group: &ContextGroup, state: &WorkerState, executor: &JobExecutor, wait: Duration) {
    tracing::debug!(worker = executor.worker(), group = group.name(), "Worker started");

    while !state.stop.load(Ordering::Acquire) {
        match group.next_work(wait) {
            Dispatch::Shutdown => break,
            Dispatch::Idle => continue,
            Dispatch::Work(Assignment { job, item, busy }) => {
                state.busy.store(true, Ordering::Relaxed);
                let result = executor.execute(&job, item);
                state.processed.fetch_add(1, Ordering::Relaxed);
                if result.is_failure() {
                    state.failed.fetch_add(1, Ordering::Relaxed);
                }
                state.busy.store(false, Ordering::Relaxed);
                // Counters are settled before the group can finalize the job
                drop(busy);
            }
        }
    }

    tracing::debug!(worker = executor.worker(), group = group.name(), "Worker stopped");
}
