
use std::sync::Arc;

use filmstrip_jobs::{JobError, JobHandle, JobObserver, JobStatus, TrackingObserver};
use test_harness::{
    test_manager, wait_all, wait_until, EventLog, RecordingObserver, ScriptedContext, WAIT,
};

#[test]
fn test_enqueue_into_uninitialized_group_fails() {
    let manager = test_manager();
    manager.init(None, Some(1)).unwrap();
    let tracker = Arc::new(TrackingObserver::new());
    manager.add_observer(tracker.clone());
    let log = EventLog::new();

    let err = manager
        .enqueue(
            ScriptedContext::new("export", &log)
                .with_group("export")
                .with_items(1),
        )
        .unwrap_err();

    assert!(matches!(err, JobError::GroupNotFound(ref g) if g == "export"));
    assert!(tracker.is_empty());
    assert_eq!(manager.group_names(), vec!["general"]);
    assert_eq!(manager.group("general").unwrap().idle_len(), 0);
    assert!(log.events().is_empty());
}

#[test]
fn test_observer_attach_and_detach() {
    let manager = test_manager();
    assert!(manager.observers().is_default_only());

    let first: Arc<dyn JobObserver> = Arc::new(TrackingObserver::new());
    let second: Arc<dyn JobObserver> = Arc::new(TrackingObserver::new());
    manager.add_observer(first.clone());
    assert!(!manager.observers().is_default_only());
    assert_eq!(manager.observers().len(), 1);

    manager.add_observer(second.clone());
    assert_eq!(manager.observers().len(), 2);

    assert!(manager.remove_observer(&first));
    assert!(!manager.remove_observer(&first));
    assert_eq!(manager.observers().len(), 1);

    assert!(manager.remove_observer(&second));
    assert!(manager.observers().is_default_only());
}

#[test]
fn test_every_observer_is_notified() {
    let manager = test_manager();
    manager.init(None, Some(2)).unwrap();
    let recorder = Arc::new(RecordingObserver::default());
    let tracker = Arc::new(TrackingObserver::new());
    manager.add_observer(recorder.clone());
    manager.add_observer(tracker.clone());
    let log = EventLog::new();

    let job = manager
        .enqueue(ScriptedContext::new("slideshow", &log).with_items(2))
        .unwrap();
    assert_eq!(tracker.len(), 1);
    assert!(tracker.jobs()[0].ptr_eq(&job));
    assert_eq!(recorder.log.count("registered:slideshow"), 1);

    assert!(job.wait(WAIT));
    assert!(wait_until(WAIT, || recorder.log.count("finished:slideshow") == 1));
}

/// Observer that fails on every lifecycle transition.
struct FailingObserver;

impl JobObserver for FailingObserver {
    fn register_job(&self, _job: &JobHandle) {}

    fn job_started(&self, job: &JobHandle) {
        panic!("progress panel lost {}", job.name());
    }

    fn job_finished(&self, job: &JobHandle) {
        panic!("progress panel lost {}", job.name());
    }
}

/// A panicking observer neither kills the worker delivering the callback
/// nor stalls the group.
#[test]
fn test_failing_observer_does_not_stall_group() {
    let manager = test_manager();
    manager.init(None, Some(1)).unwrap();
    let recorder = Arc::new(RecordingObserver::default());
    manager.add_observer(Arc::new(FailingObserver));
    manager.add_observer(recorder.clone());
    let log = EventLog::new();

    let first = manager
        .enqueue(ScriptedContext::new("first", &log).with_items(1))
        .unwrap();
    let second = manager
        .enqueue(ScriptedContext::new("second", &log).with_items(2))
        .unwrap();
    wait_all(&[first.clone(), second.clone()]);

    assert_eq!(first.status(), JobStatus::Done);
    assert_eq!(second.status(), JobStatus::Done);
    assert_eq!(log.matching("second.item").len(), 2);

    // Observers after the failing one are still notified
    assert!(wait_until(WAIT, || recorder.log.count("finished:second") == 1));
    assert_eq!(recorder.log.count("started:first"), 1);

    let stats = manager.worker_stats("general").unwrap();
    assert!(stats[0].alive);
}

#[test]
fn test_tracking_observer_clears_finished_jobs() {
    let manager = test_manager();
    manager.init(None, Some(1)).unwrap();
    let tracker = Arc::new(TrackingObserver::new());
    manager.add_observer(tracker.clone());
    let log = EventLog::new();

    let done = manager
        .enqueue(ScriptedContext::new("done", &log).with_items(1))
        .unwrap();
    wait_all(&[done]);

    let endless = manager
        .enqueue(ScriptedContext::new("endless", &log).unbounded())
        .unwrap();
    let queued = manager
        .enqueue(ScriptedContext::new("queued", &log).with_items(1))
        .unwrap();
    assert!(wait_until(WAIT, || endless.status() == JobStatus::Active));

    assert_eq!(tracker.len(), 3);
    assert_eq!(tracker.pending().len(), 2);
    assert_eq!(tracker.count_with_status(JobStatus::Done), 1);

    assert_eq!(tracker.clear_finished(), 1);
    assert_eq!(tracker.len(), 2);
    assert!(tracker.jobs().iter().any(|job| job.ptr_eq(&queued)));

    let snapshots = tracker.snapshots();
    assert!(snapshots.iter().all(|s| !s.status.is_terminal()));
    manager.destroy();
}

#[test]
fn test_snapshot_serializes_to_json() {
    let manager = test_manager();
    manager.init(None, Some(1)).unwrap();
    let log = EventLog::new();

    let job = manager
        .enqueue(ScriptedContext::new("slideshow", &log).with_items(1))
        .unwrap();
    assert!(job.wait(WAIT));

    let json = serde_json::to_value(job.snapshot()).unwrap();
    assert_eq!(json["name"], "slideshow");
    assert_eq!(json["group"], "general");
    assert_eq!(json["status"], "Done");
    assert_eq!(json["aborted"], false);
    assert!(json["finished_at"].is_string());
}
