//! Checkpoint logs that cannot be trusted for a partial resume

use crate::helpers::*;
use protorun::{CheckpointEntry, CheckpointStore, InMemoryCheckpointStore, PipelineError, ResumeMode};
use std::sync::Arc;

fn entries_for(pipeline: &protorun::Pipeline, indices: &[usize]) -> Vec<CheckpointEntry> {
    indices
        .iter()
        .map(|&i| CheckpointEntry::for_step(&pipeline.steps[i], 0))
        .collect()
}

async fn assert_continue_rejected(entries: Vec<CheckpointEntry>, pipeline: &mut protorun::Pipeline) {
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::with_entries(entries));
    let dispatcher = MockDispatcher::new();
    let outcome = run(pipeline, dispatcher.clone(), store, ResumeMode::Continue).await;

    assert!(
        matches!(outcome.result, Err(PipelineError::CheckpointCorruption(_))),
        "expected corruption"
    );
    assert_eq!(dispatcher.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_step_rejected_then_fresh_start_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);

    let mut entries = entries_for(&pipeline, &[0, 1]);
    let mut stray = entries[1].clone();
    stray.step = "iter_001.01_projection_matching_v2".to_string();
    stray.position = 3;
    entries.push(stray);

    assert_continue_rejected(entries.clone(), &mut pipeline).await;

    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::with_entries(entries));
    let dispatcher = MockDispatcher::new();
    run(&mut pipeline, dispatcher.clone(), store.clone(), ResumeMode::FreshStart)
        .await
        .report();
    assert_eq!(dispatcher.call_count(), pipeline.len());
    assert_eq!(store.entries().await.unwrap().len(), pipeline.len());
}

#[tokio::test]
async fn test_gap_in_log_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);

    let entries = entries_for(&pipeline, &[0, 1, 3]);
    assert_continue_rejected(entries, &mut pipeline).await;
}

#[tokio::test]
async fn test_position_mismatch_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);

    let mut entries = entries_for(&pipeline, &[0, 1]);
    entries[1].position = 7;
    assert_continue_rejected(entries, &mut pipeline).await;
}

#[tokio::test]
async fn test_iteration_restart_also_validates_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);

    let entries = entries_for(&pipeline, &[1]);
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::with_entries(entries));
    let outcome = run(&mut pipeline, MockDispatcher::new(), store, ResumeMode::FromIteration(2)).await;
    assert!(matches!(outcome.result, Err(PipelineError::CheckpointCorruption(_))));
}

#[tokio::test]
async fn test_conflicting_exit_code_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(1, dir.path());
    let pipeline = build(&config);
    let store = InMemoryCheckpointStore::new();

    store.mark_complete(&pipeline.steps[0], 0).await.unwrap();
    store.mark_complete(&pipeline.steps[0], 0).await.unwrap();
    assert_eq!(store.entries().await.unwrap().len(), 1);

    let err = store.mark_complete(&pipeline.steps[0], 2).await.unwrap_err();
    assert!(matches!(err, PipelineError::CheckpointCorruption(_)));
}
