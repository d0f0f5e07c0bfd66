use thiserror::Error;

/// Misuse of the scheduler API. These are the only faults that cross the
/// scheduler boundary; everything a job does wrong is contained and logged.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job group {0:?} is already initialized")]
    GroupAlreadyInitialized(String),

    #[error("Job group {0:?} is not available")]
    GroupNotFound(String),

    #[error("Worker count must be positive, got {0}")]
    InvalidWorkerCount(usize),

    #[error("Job manager is shut down")]
    ShutDown,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Fault raised by a job context hook or a work item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The job declined to start or to continue. Not an error condition.
    #[error("job aborted")]
    Aborted,

    #[error("{0}")]
    Failed(String),
}

impl ContextError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ContextError::Failed(msg.into())
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, ContextError::Aborted)
    }

    /// Convert a caught panic payload into a fault.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        ContextError::Failed(format!("panicked: {}", msg))
    }
}
