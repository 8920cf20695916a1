//! Checkpoints written by one process are honoured by the next

use crate::helpers::*;
use protorun::{CheckpointStore, JsonlCheckpointLog, ResumeMode};
use std::sync::Arc;

#[tokio::test]
async fn test_jsonl_log_carries_progress_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let path = config.checkpoint_path();
    let mut pipeline = build(&config);
    let total = pipeline.len();
    let failing = 4;

    let first_log: Arc<dyn CheckpointStore> = Arc::new(JsonlCheckpointLog::open(&path).await.unwrap());
    let broken = MockDispatcher::failing_at(&pipeline.steps[failing].operation);
    assert!(run(&mut pipeline, broken, first_log, ResumeMode::FreshStart)
        .await
        .result
        .is_err());

    let mut pipeline = build(&config);
    let second_log: Arc<dyn CheckpointStore> = Arc::new(JsonlCheckpointLog::open(&path).await.unwrap());
    assert_eq!(logged_steps(&second_log).await, names(&pipeline, 0..failing));

    let dispatcher = MockDispatcher::new();
    let outcome = run(&mut pipeline, dispatcher.clone(), second_log, ResumeMode::Continue).await;
    assert_eq!(outcome.report().skipped_steps, failing);
    assert_eq!(dispatcher.call_count(), total - failing);

    let third_log = JsonlCheckpointLog::open(&path).await.unwrap();
    assert_eq!(third_log.entries().await.unwrap().len(), total);
    assert_eq!(third_log.latest_completed_iteration().await.unwrap(), 2);
}

#[tokio::test]
async fn test_restart_rewrites_jsonl_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(3, dir.path());
    let path = config.checkpoint_path();
    let mut pipeline = build(&config);

    let log: Arc<dyn CheckpointStore> = Arc::new(JsonlCheckpointLog::open(&path).await.unwrap());
    run(&mut pipeline, MockDispatcher::new(), log, ResumeMode::FreshStart)
        .await
        .report();

    let restart = pipeline.first_position_of_iteration(2).unwrap();
    let mut pipeline = build(&config);
    let log: Arc<dyn CheckpointStore> = Arc::new(JsonlCheckpointLog::open(&path).await.unwrap());
    let dispatcher = MockDispatcher::new();
    run(&mut pipeline, dispatcher.clone(), log, ResumeMode::FromIteration(2))
        .await
        .report();
    assert_eq!(dispatcher.call_count(), pipeline.len() - restart + 1);

    let reopened = JsonlCheckpointLog::open(&path).await.unwrap();
    let positions: Vec<usize> = reopened
        .entries()
        .await
        .unwrap()
        .iter()
        .map(|e| e.position)
        .collect();
    assert_eq!(positions, (1..=pipeline.len()).collect::<Vec<_>>());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_store_carries_progress_across_instances() {
    use protorun::persistence::SqliteCheckpointStore;

    let dir = tempfile::tempdir().unwrap();
    let mut config = projmatch_config(2, dir.path());
    config.checkpoint_backend = protorun::core::config::CheckpointBackend::Sqlite;
    let path = config.checkpoint_path();
    let mut pipeline = build(&config);
    let failing = 5;

    let first: Arc<dyn CheckpointStore> =
        Arc::new(SqliteCheckpointStore::open(&path, &config.run_name).await.unwrap());
    let broken = MockDispatcher::failing_at(&pipeline.steps[failing].operation);
    assert!(run(&mut pipeline, broken, first, ResumeMode::FreshStart)
        .await
        .result
        .is_err());

    let mut pipeline = build(&config);
    let second: Arc<dyn CheckpointStore> =
        Arc::new(SqliteCheckpointStore::open(&path, &config.run_name).await.unwrap());
    let dispatcher = MockDispatcher::new();
    let outcome = run(&mut pipeline, dispatcher.clone(), second.clone(), ResumeMode::Continue).await;

    assert_eq!(outcome.report().skipped_steps, failing);
    assert_eq!(dispatcher.call_count(), pipeline.len() - failing);
    assert_eq!(second.entries().await.unwrap().len(), pipeline.len());
}
