//! Worker threads that execute work items.
//!
//! Each group gets a fixed pool of OS threads when it is initialized. A
//! worker repeatedly:
//!
//! 1. Asks its group for the next work item, waiting with a timeout
//! 2. Exits when the manager shuts down or its stop flag is set
//! 3. Runs the item through [`JobExecutor`], which contains any fault
//! 4. Reports itself idle again so the group can finalize drained jobs
//!
//! # Components
//!
//! - [`JobExecutor`]: Runs a single item and logs its outcome
//! - [`pool`]: Worker thread lifecycle, statistics and bounded joins

pub mod executor;
pub mod pool;

pub use executor::{ExecutionResult, ItemStatus, JobExecutor};
pub use pool::{ShutdownReport, WorkerStats};
