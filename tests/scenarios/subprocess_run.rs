//! Runs that dispatch real local programs

use crate::helpers::*;
use protorun::core::config::DispatchConfig;
use protorun::execution::{build_dispatcher, InProcessDispatcher};
use protorun::{
    CheckpointStore, ExecutionResult, InMemoryCheckpointStore, JsonlCheckpointLog, Pipeline,
    PipelineError, ResumeMode,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Map every action in `pipeline` to `program`
fn programs(pipeline: &Pipeline, program: &str) -> HashMap<String, String> {
    pipeline
        .steps
        .iter()
        .map(|s| (s.operation.action.clone(), program.to_string()))
        .collect()
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_programs_complete_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);

    let dispatch = DispatchConfig {
        programs: programs(&pipeline, "true"),
        ..Default::default()
    };
    let dispatcher = build_dispatcher(&dispatch, &dir.path().join("jobs"));
    let store: Arc<dyn CheckpointStore> =
        Arc::new(JsonlCheckpointLog::open(config.checkpoint_path()).await.unwrap());

    let outcome = run_with(&mut pipeline, dispatcher, store.clone(), None, options(ResumeMode::FreshStart)).await;
    assert_eq!(outcome.report().executed_steps.len(), pipeline.len());
    assert_eq!(store.latest_completed_iteration().await.unwrap(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_pool_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(1, dir.path());
    let mut pipeline = build(&config);

    let dispatch = DispatchConfig {
        threads: 3,
        programs: programs(&pipeline, "true"),
        ..Default::default()
    };
    let dispatcher = build_dispatcher(&dispatch, &dir.path().join("jobs"));
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());

    let outcome = run_with(&mut pipeline, dispatcher, store, None, options(ResumeMode::FreshStart)).await;
    assert!(outcome.result.is_ok());
    assert!(pipeline.is_complete());
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_program_reports_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(1, dir.path());
    let mut pipeline = build(&config);

    let mut map = programs(&pipeline, "true");
    map.insert("reconstruct".to_string(), "false".to_string());
    let dispatch = DispatchConfig {
        programs: map,
        ..Default::default()
    };
    let dispatcher = build_dispatcher(&dispatch, &dir.path().join("jobs"));
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());

    let outcome = run_with(&mut pipeline, dispatcher, store.clone(), None, options(ResumeMode::FreshStart)).await;
    match outcome.result {
        Err(PipelineError::StepExecutionFailure { step, exit_code, .. }) => {
            assert!(step.ends_with("_reconstruct"));
            assert_eq!(exit_code, Some(1));
            assert!(!store.has(&step).await.unwrap());
        }
        other => panic!("expected step failure, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_in_process_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(1, dir.path());
    let mut pipeline = build(&config);

    let calls = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = InProcessDispatcher::new();
    let actions: Vec<String> = pipeline.steps.iter().map(|s| s.operation.action.clone()).collect();
    for action in actions {
        let counter = calls.clone();
        dispatcher = dispatcher.register(action, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ExecutionResult::success(0)
        });
    }

    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    run_with(&mut pipeline, dispatcher, store, None, options(ResumeMode::FreshStart))
        .await
        .report();
    assert_eq!(calls.load(Ordering::SeqCst), pipeline.len());
}
