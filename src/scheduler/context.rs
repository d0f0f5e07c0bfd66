use std::time::Duration;

use serde::Serialize;

use crate::config::DEFAULT_GROUP;
use crate::error::ContextError;

/// One discrete piece of executable work yielded by an active context.
///
/// What running it means, and what a failure means, is entirely the
/// context's business. The scheduler only logs the outcome.
pub trait WorkItem: Send {
    fn run(self: Box<Self>) -> Result<(), ContextError>;
}

impl<F> WorkItem for F
where
    F: FnOnce() -> Result<(), ContextError> + Send,
{
    fn run(self: Box<Self>) -> Result<(), ContextError> {
        (*self)()
    }
}

/// Answer of a context when asked for its next work item.
pub enum WorkLoad {
    Item(Box<dyn WorkItem>),
    /// The source is drained; the context can be finalized.
    Exhausted,
    /// The context gave up mid-stream. It is finalized like an exhausted one
    /// and flagged as aborted.
    Aborted,
}

impl WorkLoad {
    pub fn item<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), ContextError> + Send + 'static,
    {
        WorkLoad::Item(Box::new(f))
    }
}

impl std::fmt::Debug for WorkLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkLoad::Item(_) => write!(f, "Item(..)"),
            WorkLoad::Exhausted => write!(f, "Exhausted"),
            WorkLoad::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Progress as shown in a job list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: u64,
    pub max: u64,
    pub info: String,
}

/// A long-lived unit of submitted work.
///
/// Contexts are enqueued once into the group named by [`group_id`], begun
/// when a worker of that group promotes them, drained through
/// [`next_work_item`] and finalized with [`done`].
///
/// `begin` and `done` run while the group's scheduling lock is held and must
/// not call back into the job manager.
///
/// [`group_id`]: JobContext::group_id
/// [`next_work_item`]: JobContext::next_work_item
/// [`done`]: JobContext::done
pub trait JobContext: Send + Sync {
    fn name(&self) -> &str;

    fn group_id(&self) -> &str {
        DEFAULT_GROUP
    }

    /// Prepare the context. Returning [`ContextError::Aborted`] declines the
    /// job; any other error is logged. Either way the context is discarded
    /// and never becomes active.
    fn begin(&self) -> Result<(), ContextError> {
        Ok(())
    }

    /// Finalize the context. Errors are logged and otherwise ignored.
    fn done(&self) -> Result<(), ContextError> {
        Ok(())
    }

    /// Hand out the next work item. The scheduler always polls with
    /// `block == false`.
    fn next_work_item(&self, block: bool, timeout: Option<Duration>) -> WorkLoad;

    fn progress(&self) -> Option<Progress> {
        None
    }

    /// Request a cooperative abort. Contexts that support it should answer
    /// subsequent fetches with [`WorkLoad::Aborted`].
    fn abort(&self) {}

    fn is_aborted(&self) -> bool {
        false
    }
}
