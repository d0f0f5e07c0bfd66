pub mod batch;
pub mod context;
pub mod group;
pub mod job;

pub use batch::BatchContext;
pub use context::{JobContext, Progress, WorkItem, WorkLoad};
pub use group::ContextGroup;
pub use job::{JobHandle, JobSnapshot, JobStatus};
