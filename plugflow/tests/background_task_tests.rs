//! Integration tests for background tasks, cancellation and the task
//! registry.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use plugflow::nodes::MultiplyNode;
use plugflow::task::TaskRegistry;
use plugflow::{BackgroundTask, Canceller, Document, EngineError, Graph, TaskStatus};

/// Helper: spins until cancelled, giving up after a few seconds so a broken
/// test can't hang the suite.
fn spin_until_cancelled(canceller: &Canceller) -> Result<(), EngineError> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        canceller.check()?;
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

#[test]
fn test_completed_task() {
    let task = BackgroundTask::spawn(None, |_| Ok(()));
    task.wait();
    assert_eq!(task.status(), TaskStatus::Completed);
}

#[test]
fn test_errors_and_panics_finish_as_errored() {
    let failing = BackgroundTask::spawn(None, |_| Err(EngineError::compute("boom")));
    failing.wait();
    assert_eq!(failing.status(), TaskStatus::Errored);

    let panicking = BackgroundTask::spawn(None, |_| panic!("boom"));
    panicking.wait();
    assert_eq!(panicking.status(), TaskStatus::Errored);
}

#[test]
fn test_running_task_is_cancelled() {
    let (started_tx, started_rx) = mpsc::channel();
    let task = BackgroundTask::spawn(None, move |canceller| {
        started_tx.send(()).ok();
        spin_until_cancelled(canceller)
    });
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(task.status(), TaskStatus::Running);

    task.cancel_and_wait();
    assert_eq!(task.status(), TaskStatus::Cancelled);
}

#[test]
fn test_wait_for_times_out_on_running_task() {
    let task = BackgroundTask::spawn(None, spin_until_cancelled);
    assert!(!task.wait_for(Duration::from_millis(20)));
    task.cancel();
    assert!(task.wait_for(Duration::from_secs(10)));
    assert!(task.status().is_finished());
}

#[test]
fn test_only_the_edited_documents_tasks_are_cancelled() {
    let registry = Arc::new(TaskRegistry::new());
    let a = Document::with_registry(Graph::new(), registry.clone());
    let b = Document::with_registry(Graph::new(), registry.clone());

    let spawn = |document: &Document| {
        BackgroundTask::spawn_with_registry(
            registry.clone(),
            Some(document.subject(None)),
            spin_until_cancelled,
        )
    };
    let a1 = spawn(&a);
    let a2 = spawn(&a);
    let b1 = spawn(&b);
    assert_eq!(registry.tasks_for_document(a.id()), 2);
    assert_eq!(registry.tasks_for_document(b.id()), 1);

    assert_eq!(registry.cancel_affected_tasks(a.id()), 2);
    assert_eq!(a1.status(), TaskStatus::Cancelled);
    assert_eq!(a2.status(), TaskStatus::Cancelled);
    assert!(!b1.status().is_finished());
    assert_eq!(registry.tasks_for_document(a.id()), 0);

    b1.cancel_and_wait();
    assert_eq!(b1.status(), TaskStatus::Cancelled);
    assert!(registry.is_empty());
}

#[test]
fn test_document_edit_waits_for_readers_to_cancel() {
    let registry = Arc::new(TaskRegistry::new());
    let mut graph = Graph::new();
    let id = graph.add_node("multiply", MultiplyNode::build);
    let op1 = graph.node_as::<MultiplyNode>(id).unwrap().op1;
    let document = Arc::new(Document::with_registry(graph, registry.clone()));

    let (started_tx, started_rx) = mpsc::channel();
    let reader = document.clone();
    let task = BackgroundTask::spawn_with_registry(
        registry.clone(),
        Some(document.subject(Some(op1))),
        move |canceller| {
            let _graph = reader.read();
            started_tx.send(()).ok();
            spin_until_cancelled(canceller)
        },
    );
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    document.edit(|graph| graph.set_value(op1, 2i64)).unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(registry.is_empty());
}
