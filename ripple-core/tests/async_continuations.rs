//! Async Continuation Tests
//!
//! Tracking only covers the synchronous part of a computation. These tests
//! verify how cells behave when work resumes after an `.await`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ripple_core::{Observable, ReactiveError, Result, Runtime};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Append a todo once a simulated request completes.
async fn add_todo_later(rt: &Runtime, todos: &Observable<Vec<String>>, title: &str) -> Result<()> {
    tokio::time::sleep(Duration::from_millis(5)).await;
    rt.run_in_transaction(|| todos.modify(|list| list.push(title.to_string())))?
}

/// Test that writes made after an await still notify reactions.
#[tokio::test]
async fn continuation_writes_notify_reactions() {
    init_tracing();
    let rt = Runtime::new();
    let todos = rt.create_observable(Vec::<String>::new());
    let lengths = Arc::new(Mutex::new(Vec::new()));

    let reaction = rt
        .create_reaction({
            let (todos, lengths) = (todos.clone(), lengths.clone());
            move || lengths.lock().push(todos.get().len())
        })
        .unwrap();

    add_todo_later(&rt, &todos, "fetch").await.unwrap();
    add_todo_later(&rt, &todos, "render").await.unwrap();

    assert_eq!(*lengths.lock(), vec![0, 1, 2]);
    reaction.dispose();
}

/// Test that handles can move into spawned tasks.
#[tokio::test]
async fn handles_move_across_tasks() {
    init_tracing();
    let rt = Runtime::new();
    let todos = rt.create_observable(Vec::<String>::new());
    let count = rt.create_computed({
        let todos = todos.clone();
        move || todos.get().len()
    });

    let task = tokio::spawn({
        let (rt, todos) = (rt.clone(), todos.clone());
        async move { add_todo_later(&rt, &todos, "spawned").await }
    });
    task.await.unwrap().unwrap();

    assert_eq!(count.get().unwrap(), 1);
}

/// Test that reads performed after an await are not recorded.
#[tokio::test]
async fn reads_after_await_are_untracked() {
    init_tracing();
    let rt = Runtime::new();
    let query = rt.create_observable("rust".to_string());
    let page = rt.create_observable(1);
    let invalidations = Arc::new(AtomicUsize::new(0));

    let reaction = rt.create_invalidation_reaction("search", {
        let invalidations = invalidations.clone();
        move || {
            invalidations.fetch_add(1, Ordering::SeqCst);
        }
    });

    let term = reaction.track(|| query.get()).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // The tracking frame closed before the await
    assert!(!rt.is_tracking());
    let current_page = page.get();
    assert_eq!((term.as_str(), current_page), ("rust", 1));
    assert_eq!(reaction.dependency_count(), 1);

    page.set(2).unwrap();
    assert_eq!(invalidations.load(Ordering::SeqCst), 0);

    query.set("tokio".to_string()).unwrap();
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    reaction.dispose();
}

/// Test that a continuation resuming after disposal cannot re-subscribe.
#[tokio::test]
async fn disposed_reaction_rejects_continuation() {
    init_tracing();
    let rt = Runtime::new();
    let status = rt.create_observable("loading".to_string());
    let invalidations = Arc::new(AtomicUsize::new(0));

    let reaction = rt.create_invalidation_reaction("status-view", {
        let invalidations = invalidations.clone();
        move || {
            invalidations.fetch_add(1, Ordering::SeqCst);
        }
    });
    reaction.track(|| status.get()).unwrap();

    let pending = tokio::spawn({
        let (reaction, status) = (reaction.clone(), status.clone());
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            reaction.track(|| status.get())
        }
    });

    // Unmounted while the request is in flight
    reaction.dispose();

    let node = reaction.id();
    assert_eq!(
        pending.await.unwrap().unwrap_err(),
        ReactiveError::UseAfterDispose { node }
    );

    status.set("done".to_string()).unwrap();
    assert_eq!(invalidations.load(Ordering::SeqCst), 0);
    assert_eq!(status.subscriber_count(), 0);
}
