//! Failure scenarios: a failed step halts the run and is retried on resume

use crate::helpers::*;
use protorun::core::state::{ControllerState, ExecutionStatus};
use protorun::execution::{ExecutionEvent, RunController};
use protorun::{
    CheckpointEntry, CheckpointStore, InMemoryCheckpointStore, PipelineError, ResumeMode,
    StepRecord,
};
use std::sync::Arc;

/// Store whose writes fail for one step
struct RejectingStore {
    inner: InMemoryCheckpointStore,
    reject: String,
}

#[async_trait::async_trait]
impl CheckpointStore for RejectingStore {
    async fn entries(&self) -> Result<Vec<CheckpointEntry>, PipelineError> {
        self.inner.entries().await
    }

    async fn has(&self, step: &str) -> Result<bool, PipelineError> {
        self.inner.has(step).await
    }

    async fn mark_complete(&self, step: &StepRecord, exit_code: i32) -> Result<(), PipelineError> {
        if step.name == self.reject {
            return Err(PipelineError::Storage("disk full".to_string()));
        }
        self.inner.mark_complete(step, exit_code).await
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        self.inner.clear().await
    }

    async fn discard_from(&self, position: usize) -> Result<usize, PipelineError> {
        self.inner.discard_from(position).await
    }
}

#[tokio::test]
async fn test_failure_halts_run_without_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(3, dir.path());
    let mut pipeline = build(&config);
    let failing = 6;
    let failing_name = pipeline.steps[failing].name.clone();

    let dispatcher = MockDispatcher::failing_at(&pipeline.steps[failing].operation);
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let outcome = run(&mut pipeline, dispatcher.clone(), store.clone(), ResumeMode::FreshStart).await;

    match &outcome.result {
        Err(PipelineError::StepExecutionFailure { step, exit_code, diagnostic }) => {
            assert_eq!(step, &failing_name);
            assert_eq!(*exit_code, Some(1));
            assert!(diagnostic.contains("crashed"));
        }
        other => panic!("expected step failure, got {:?}", other.as_ref().map(|_| ())),
    }

    assert_eq!(dispatcher.call_count(), failing + 1);
    assert_eq!(logged_steps(&store).await, names(&pipeline, 0..failing));
    assert!(!store.has(&failing_name).await.unwrap());
    for step in &pipeline.steps[failing + 1..] {
        assert_eq!(dispatcher.times_called(&step.operation), 0, "{} ran after failure", step.name);
    }

    assert!(outcome.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { step, .. } if *step == failing_name
    )));
    assert!(matches!(
        outcome.events.last(),
        Some(ExecutionEvent::RunFinished { status: ExecutionStatus::Failed, .. })
    ));
}

#[tokio::test]
async fn test_continue_after_failure_resumes_at_failed_step() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(3, dir.path());
    let mut pipeline = build(&config);
    let total = pipeline.len();
    let failing = 9;

    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let broken = MockDispatcher::failing_at(&pipeline.steps[failing].operation);
    let first = run(&mut pipeline, broken, store.clone(), ResumeMode::FreshStart).await;
    assert!(first.result.is_err());

    let mut pipeline = build(&config);
    let healthy = MockDispatcher::new();
    let second = run(&mut pipeline, healthy.clone(), store.clone(), ResumeMode::Continue).await;

    assert_eq!(second.report().skipped_steps, failing);
    assert_eq!(second.started_steps(), names(&pipeline, failing..total));
    assert_eq!(healthy.call_count(), total - failing);
    assert_eq!(logged_steps(&store).await, names(&pipeline, 0..total));
}

#[tokio::test]
async fn test_controller_state_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(1, dir.path());
    let mut pipeline = build(&config);
    let failing_name = pipeline.steps[2].name.clone();

    let dispatcher = MockDispatcher::failing_at(&pipeline.steps[2].operation);
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let mut controller = RunController::new(dispatcher, store);
    assert_eq!(controller.state(), &ControllerState::Idle);

    let result = controller.run(&mut pipeline, &options(ResumeMode::FreshStart)).await;
    assert!(result.is_err());
    match controller.state() {
        ControllerState::Failed { step, .. } => assert_eq!(step, &failing_name),
        other => panic!("expected failed state, got {:?}", other),
    }
    assert_eq!(pipeline.completed_count(), 2);
}

#[tokio::test]
async fn test_checkpoint_write_failure_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let config = projmatch_config(2, dir.path());
    let mut pipeline = build(&config);
    let rejected = pipeline.steps[3].name.clone();

    let store = Arc::new(RejectingStore {
        inner: InMemoryCheckpointStore::new(),
        reject: rejected.clone(),
    });
    let dispatcher = MockDispatcher::new();
    let mut controller = RunController::new(dispatcher.clone(), store.clone());
    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = events.clone();
    controller.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let result = controller.run(&mut pipeline, &options(ResumeMode::FreshStart)).await;

    assert!(matches!(result, Err(PipelineError::Storage(_))));
    assert_eq!(dispatcher.call_count(), 4);
    match controller.state() {
        ControllerState::Failed { step, diagnostic, .. } => {
            assert_eq!(step, &rejected);
            assert!(diagnostic.contains("disk full"));
        }
        other => panic!("expected failed state, got {:?}", other),
    }

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { step, exit_code: Some(0), .. } if *step == rejected
    )));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished { status: ExecutionStatus::Failed, .. })
    ));
    assert_eq!(store.entries().await.unwrap().len(), 3);
    assert!(!pipeline.steps[3].completed);
}
