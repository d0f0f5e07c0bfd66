use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_GROUP;
use crate::error::ContextError;
use crate::scheduler::context::{JobContext, Progress, WorkItem, WorkLoad};

type ItemSource = Box<dyn Iterator<Item = Box<dyn WorkItem>> + Send>;

/// General purpose job context draining an iterator of work items.
///
/// Bounded batches report `max` progress from the iterator's size hint;
/// unbounded ones report the number of items handed out so far. Aborting
/// makes the next fetch answer [`WorkLoad::Aborted`].
pub struct BatchContext {
    name: String,
    group: String,
    items: Mutex<ItemSource>,
    total: Option<u64>,
    dispensed: AtomicU64,
    completed: Arc<AtomicU64>,
    info: Mutex<String>,
    abort: CancellationToken,
}

impl BatchContext {
    pub fn new<I, F>(name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = F>,
        I::IntoIter: Send + 'static,
        F: WorkItem + 'static,
    {
        let iter = items.into_iter();
        // Only an exact hint is a total; otherwise progress counts dispensed items
        let total = match iter.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower as u64),
            _ => None,
        };
        let source = iter.map(|f| Box::new(f) as Box<dyn WorkItem>);
        Self::from_source(name.into(), Box::new(source), total)
    }

    /// A batch that never runs dry. `factory` receives the item index.
    pub fn unbounded<F, W>(name: impl Into<String>, mut factory: F) -> Self
    where
        F: FnMut(u64) -> W + Send + 'static,
        W: WorkItem + 'static,
    {
        let iter = (0u64..).map(move |i| Box::new(factory(i)) as Box<dyn WorkItem>);
        Self::from_source(name.into(), Box::new(iter), None)
    }

    fn from_source(name: String, items: ItemSource, total: Option<u64>) -> Self {
        Self {
            name,
            group: DEFAULT_GROUP.to_string(),
            items: Mutex::new(items),
            total,
            dispensed: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
            info: Mutex::new(String::new()),
            abort: CancellationToken::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Token that aborts this batch when cancelled.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn set_info(&self, info: impl Into<String>) {
        *self.info.lock() = info.into();
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

impl JobContext for BatchContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn group_id(&self) -> &str {
        &self.group
    }

    fn begin(&self) -> Result<(), ContextError> {
        if self.abort.is_cancelled() {
            return Err(ContextError::Aborted);
        }
        self.set_info("running");
        Ok(())
    }

    fn done(&self) -> Result<(), ContextError> {
        if self.abort.is_cancelled() {
            self.set_info("aborted");
        } else {
            self.set_info("all done");
        }
        Ok(())
    }

    fn next_work_item(&self, _block: bool, _timeout: Option<Duration>) -> WorkLoad {
        if self.abort.is_cancelled() {
            return WorkLoad::Aborted;
        }
        match self.items.lock().next() {
            Some(inner) => {
                self.dispensed.fetch_add(1, Ordering::Relaxed);
                WorkLoad::Item(Box::new(Tracked {
                    inner,
                    completed: self.completed.clone(),
                }))
            }
            None => WorkLoad::Exhausted,
        }
    }

    fn progress(&self) -> Option<Progress> {
        Some(Progress {
            current: self.completed(),
            max: self
                .total
                .unwrap_or_else(|| self.dispensed.load(Ordering::Relaxed)),
            info: self.info.lock().clone(),
        })
    }

    fn abort(&self) {
        self.abort.cancel();
    }

    fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }
}

/// Counts an item towards progress once it has run.
struct Tracked {
    inner: Box<dyn WorkItem>,
    completed: Arc<AtomicU64>,
}

impl WorkItem for Tracked {
    fn run(self: Box<Self>) -> Result<(), ContextError> {
        let Tracked { inner, completed } = *self;
        let result = inner.run();
        completed.fetch_add(1, Ordering::Relaxed);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Result<(), ContextError> {
        Ok(())
    }

    fn corrupt() -> Result<(), ContextError> {
        Err(ContextError::failed("corrupt jpeg"))
    }

    fn run(load: WorkLoad) -> Result<(), ContextError> {
        match load {
            WorkLoad::Item(item) => item.run(),
            other => panic!("expected an item, got {:?}", other),
        }
    }

    #[test]
    fn bounded_batch_reports_progress() {
        let batch = BatchContext::new("pictures", (0..3).map(|_| noop));
        assert_eq!(batch.group_id(), "general");
        batch.begin().unwrap();

        run(batch.next_work_item(false, None)).unwrap();
        let progress = batch.progress().unwrap();
        assert_eq!(progress.current, 1);
        assert_eq!(progress.max, 3);
        assert_eq!(progress.info, "running");

        run(batch.next_work_item(false, None)).unwrap();
        run(batch.next_work_item(false, None)).unwrap();
        assert!(matches!(batch.next_work_item(false, None), WorkLoad::Exhausted));

        batch.done().unwrap();
        assert_eq!(batch.progress().unwrap().info, "all done");
    }

    #[test]
    fn filtered_batch_reports_items_actually_dispensed() {
        let pictures = (0..10).filter(|i| i % 2 == 0).map(|_| noop);
        let batch = BatchContext::new("even pictures", pictures);
        while let WorkLoad::Item(item) = batch.next_work_item(false, None) {
            item.run().unwrap();
        }

        let progress = batch.progress().unwrap();
        assert_eq!(progress.current, 5);
        assert_eq!(progress.max, 5);
    }

    #[test]
    fn failed_items_still_count_as_completed() {
        let batch = BatchContext::new("faulty", vec![corrupt]);
        let result = run(batch.next_work_item(false, None));
        assert_eq!(result, Err(ContextError::failed("corrupt jpeg")));
        assert_eq!(batch.completed(), 1);
    }

    #[test]
    fn unbounded_batch_never_exhausts() {
        let batch = BatchContext::unbounded("preview", |_| noop).with_group("preview");
        assert_eq!(batch.group_id(), "preview");
        for _ in 0..50 {
            run(batch.next_work_item(false, None)).unwrap();
        }
        assert_eq!(batch.progress().unwrap().max, 50);
    }

    #[test]
    fn abort_stops_dispensing() {
        let batch = BatchContext::unbounded("render", |_| noop);
        let token = batch.abort_token();
        run(batch.next_work_item(false, None)).unwrap();

        token.cancel();
        assert!(batch.is_aborted());
        assert!(matches!(batch.next_work_item(false, None), WorkLoad::Aborted));
        assert_eq!(batch.begin(), Err(ContextError::Aborted));

        batch.done().unwrap();
        assert_eq!(batch.progress().unwrap().info, "aborted");
    }
}
