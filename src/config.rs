use std::time::Duration;

/// Group used when a job or `init` call does not name one.
pub const DEFAULT_GROUP: &str = "general";

/// Configuration for the job manager and the worker pools it starts.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Group initialized by `init(None, ..)`
    pub default_group: String,
    /// Worker count used when hardware parallelism cannot be determined
    pub fallback_workers: usize,
    /// How long an idle worker waits for new work before re-checking its
    /// stop flag
    pub wait_timeout: Duration,
    /// Upper bound for joining a single worker during shutdown
    pub join_timeout: Duration,
    /// Prefix for worker thread names, followed by group and index
    pub thread_name_prefix: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_group: DEFAULT_GROUP.to_string(),
            fallback_workers: 2,
            wait_timeout: Duration::from_millis(500),
            join_timeout: Duration::from_secs(3),
            thread_name_prefix: "job-worker".to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = group.into();
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Number of workers for a group when the caller does not specify one.
    pub fn default_worker_count(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(self.fallback_workers)
    }

    pub(crate) fn thread_name(&self, group: &str, index: usize) -> String {
        format!("{}-{}-{}", self.thread_name_prefix, group, index)
    }
}
