//! Fresh-start scenarios: earlier checkpoints and artifacts are dropped

use crate::helpers::*;
use protorun::execution::FsWorkspace;
use protorun::persistence::RunLock;
use protorun::{CheckpointEntry, CheckpointStore, InMemoryCheckpointStore, JsonlCheckpointLog, ResumeMode};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_fresh_start_clears_previous_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(3, dir.path());
    let mut pipeline = build(&config);
    let total = pipeline.len();

    let entries = pipeline.steps.iter().map(|s| CheckpointEntry::for_step(s, 0)).collect();
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::with_entries(entries));
    assert_eq!(store.latest_completed_iteration().await.unwrap(), 3);

    let dispatcher = MockDispatcher::new();
    let outcome = run(&mut pipeline, dispatcher.clone(), store.clone(), ResumeMode::FreshStart).await;

    assert_eq!(outcome.resolution(), (total, 0));
    assert_eq!(dispatcher.call_count(), total);
    assert_eq!(logged_steps(&store).await, names(&pipeline, 0..total));
}

#[tokio::test]
async fn test_fresh_start_with_no_history_reports_iteration_zero() {
    let store = InMemoryCheckpointStore::new();
    store.clear().await.unwrap();
    assert_eq!(store.latest_completed_iteration().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fresh_start_recovers_from_damaged_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.jsonl");
    tokio::fs::write(&path, "{\"step\": \"setup.00_convert_input\"\nnot json at all\n")
        .await
        .unwrap();

    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);

    let log: Arc<dyn CheckpointStore> = Arc::new(JsonlCheckpointLog::open(&path).await.unwrap());
    assert!(log.entries().await.is_err());

    let dispatcher = MockDispatcher::new();
    run(&mut pipeline, dispatcher.clone(), log.clone(), ResumeMode::FreshStart)
        .await
        .report();

    assert_eq!(dispatcher.call_count(), pipeline.len());
    assert_eq!(log.entries().await.unwrap().len(), pipeline.len());
}

#[tokio::test]
async fn test_delete_working_dir_resets_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(1, dir.path());
    let mut pipeline = build(&config);

    let iter_dir = dir.path().join("Iter_1");
    tokio::fs::create_dir_all(&iter_dir).await.unwrap();
    tokio::fs::write(iter_dir.join("reference_ref01.vol"), b"old").await.unwrap();
    let log_path = dir.path().join("checkpoints.jsonl");
    let lock_path = RunLock::path_for(dir.path(), &pipeline.run_name);
    tokio::fs::write(&lock_path, b"").await.unwrap();

    let store: Arc<dyn CheckpointStore> = Arc::new(JsonlCheckpointLog::open(&log_path).await.unwrap());
    let workspace = Arc::new(
        FsWorkspace::new(dir.path())
            .preserve(log_path.clone())
            .preserve(lock_path.clone()),
    );
    let mut opts = options(ResumeMode::FreshStart);
    opts.delete_working_dir = true;

    run_with(&mut pipeline, MockDispatcher::new(), store, Some(workspace), opts)
        .await
        .report();

    assert!(!iter_dir.exists());
    assert!(lock_path.exists());
    assert!(log_path.exists());
}

#[tokio::test]
async fn test_delete_working_dir_requires_fresh_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(1, dir.path());
    let mut pipeline = build(&config);

    let workspace = Arc::new(RecordingWorkspace::default());
    let mut opts = options(ResumeMode::Continue);
    opts.delete_working_dir = true;

    let dispatcher = MockDispatcher::new();
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let outcome = run_with(&mut pipeline, dispatcher.clone(), store, Some(workspace.clone()), opts).await;

    assert!(outcome.result.is_err());
    assert_eq!(workspace.resets.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.call_count(), 0);
}
