//! Resume scenarios: continue, restart from a step, restart from an iteration

use crate::helpers::*;
use protorun::{CheckpointEntry, CheckpointStore, InMemoryCheckpointStore, PipelineError, ResumeMode};
use std::sync::Arc;

/// Store holding checkpoints for the first `count` steps of `pipeline`
fn store_with_prefix(pipeline: &protorun::Pipeline, count: usize) -> Arc<dyn CheckpointStore> {
    let entries = pipeline.steps[..count]
        .iter()
        .map(|s| CheckpointEntry::for_step(s, 0))
        .collect();
    Arc::new(InMemoryCheckpointStore::with_entries(entries))
}

#[tokio::test]
async fn test_continue_skips_completed_steps() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(4, dir.path());
    let mut pipeline = build(&config);
    let total = pipeline.len();
    let done = 7;

    let store = store_with_prefix(&pipeline, done);
    let dispatcher = MockDispatcher::new();
    let outcome = run(&mut pipeline, dispatcher.clone(), store.clone(), ResumeMode::Continue).await;

    let report = outcome.report();
    assert_eq!(report.skipped_steps, done);
    assert_eq!(report.executed_steps, names(&pipeline, done..total));
    assert_eq!(dispatcher.call_count(), total - done);
    for step in &pipeline.steps[..done] {
        assert_eq!(dispatcher.times_called(&step.operation), 0, "{} re-ran", step.name);
    }
    assert_eq!(logged_steps(&store).await, names(&pipeline, 0..total));
}

#[tokio::test]
async fn test_continue_on_finished_run_dispatches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);
    let total = pipeline.len();

    let store = store_with_prefix(&pipeline, total);
    let dispatcher = MockDispatcher::new();
    let outcome = run(&mut pipeline, dispatcher.clone(), store, ResumeMode::Continue).await;

    assert_eq!(outcome.report().skipped_steps, total);
    assert!(outcome.report().executed_steps.is_empty());
    assert_eq!(dispatcher.call_count(), 0);
    assert!(pipeline.is_complete());
}

#[tokio::test]
async fn test_continue_with_empty_log_runs_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);

    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let dispatcher = MockDispatcher::new();
    run(&mut pipeline, dispatcher.clone(), store, ResumeMode::Continue)
        .await
        .report();

    assert_eq!(dispatcher.call_count(), pipeline.len());
}

#[tokio::test]
async fn test_from_step_discards_later_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(3, dir.path());
    let mut pipeline = build(&config);
    let total = pipeline.len();
    let restart = 5;

    let store = store_with_prefix(&pipeline, total);
    let dispatcher = MockDispatcher::new();
    let outcome = run(
        &mut pipeline,
        dispatcher.clone(),
        store.clone(),
        ResumeMode::FromStep(restart),
    )
    .await;

    let (discarded, skipped) = outcome.resolution();
    assert_eq!(discarded, total - restart + 1);
    assert_eq!(skipped, restart - 1);
    assert_eq!(outcome.started_steps(), names(&pipeline, restart - 1..total));
    assert_eq!(dispatcher.call_count(), total - restart + 1);
    assert_eq!(logged_steps(&store).await, names(&pipeline, 0..total));
}

#[tokio::test]
async fn test_from_iteration_reruns_that_iteration_onward() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(4, dir.path());
    let mut pipeline = build(&config);
    let total = pipeline.len();

    let store = store_with_prefix(&pipeline, total);
    let dispatcher = MockDispatcher::new();
    let workspace = Arc::new(RecordingWorkspace::default());
    let mut opts = options(ResumeMode::FromIteration(3));
    opts.discard_artifacts = true;

    let outcome = run_with(
        &mut pipeline,
        dispatcher.clone(),
        store.clone(),
        Some(workspace.clone()),
        opts,
    )
    .await;

    let first = pipeline.first_position_of_iteration(3).unwrap();
    assert!(outcome.started_steps()[0].starts_with("iter_003.00_"));
    assert_eq!(outcome.started_steps(), names(&pipeline, first - 1..total));

    for step in pipeline.steps.iter().filter(|s| s.iteration.map_or(false, |i| i < 3)) {
        assert_eq!(dispatcher.times_called(&step.operation), 0, "{} re-ran", step.name);
    }
    assert_eq!(*workspace.discarded.lock().unwrap(), vec![3, 4]);
    assert_eq!(store.latest_completed_iteration().await.unwrap(), 4);
}

#[tokio::test]
async fn test_from_iteration_beyond_log_resumes_at_first_gap() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(4, dir.path());
    let mut pipeline = build(&config);
    let done = 3;

    let store = store_with_prefix(&pipeline, done);
    let dispatcher = MockDispatcher::new();
    let outcome = run(&mut pipeline, dispatcher.clone(), store, ResumeMode::FromIteration(4)).await;

    assert_eq!(outcome.resolution(), (0, done));
    assert_eq!(outcome.started_steps()[0], pipeline.steps[done].name);
}

#[tokio::test]
async fn test_out_of_range_restart_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);
    let total = pipeline.len();

    for mode in [ResumeMode::FromIteration(3), ResumeMode::FromStep(total + 1)] {
        let store = store_with_prefix(&pipeline, total);
        let dispatcher = MockDispatcher::new();
        let outcome = run(&mut pipeline, dispatcher.clone(), store.clone(), mode).await;

        assert!(matches!(
            outcome.result,
            Err(PipelineError::InvalidConfiguration(_))
        ));
        assert_eq!(dispatcher.call_count(), 0);
        assert_eq!(store.entries().await.unwrap().len(), total);
    }
}

#[tokio::test]
async fn test_legacy_selector_maps_to_iteration_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = projmatch_config(4, dir.path());
    config.continue_at_iteration = Some(3);
    config.is_iter = true;
    assert_eq!(config.resume_mode().unwrap(), ResumeMode::FromIteration(3));

    config.continue_at_iteration = Some(-1);
    assert_eq!(config.resume_mode().unwrap(), ResumeMode::Continue);
}

#[tokio::test]
async fn test_mid_iteration_restart_keeps_checkpointed_outputs() {
    use protorun::execution::FsWorkspace;

    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(3, dir.path());
    let mut pipeline = build(&config);
    let total = pipeline.len();
    for i in 1..=3 {
        let iter_dir = dir.path().join(format!("Iter_{}", i));
        tokio::fs::create_dir_all(&iter_dir).await.unwrap();
        tokio::fs::write(iter_dir.join("angles.doc"), b"angles").await.unwrap();
    }

    let restart = pipeline
        .steps_in_iteration(2)
        .find(|s| s.label() == "reconstruct")
        .map(|s| s.position)
        .unwrap();
    let store = store_with_prefix(&pipeline, total);
    let workspace = Arc::new(FsWorkspace::new(dir.path()));
    let mut opts = options(ResumeMode::FromStep(restart));
    opts.discard_artifacts = true;

    let dispatcher = MockDispatcher::new();
    let outcome = run_with(&mut pipeline, dispatcher.clone(), store, Some(workspace), opts).await;

    assert_eq!(outcome.started_steps(), names(&pipeline, restart - 1..total));
    assert!(dir.path().join("Iter_1").join("angles.doc").exists());
    assert!(dir.path().join("Iter_2").join("angles.doc").exists());
    assert!(!dir.path().join("Iter_3").exists());
}
