//! Persistence layer for step checkpoints
//!
//! A checkpoint entry is written after a step's dispatcher call succeeds and
//! is the only evidence the controller trusts when deciding what to re-run.

pub mod lock;
pub mod log;
#[cfg(feature = "sqlite")]
pub mod store;

pub use lock::RunLock;
pub use log::JsonlCheckpointLog;
#[cfg(feature = "sqlite")]
pub use store::SqliteCheckpointStore;

use crate::core::config::{CheckpointBackend, RunConfig};
use crate::core::error::PipelineError;
use crate::core::step::StepRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Durable record that a step finished successfully
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub step: String,
    pub iteration: Option<usize>,
    pub position: usize,
    pub completed_at: DateTime<Utc>,
    pub exit_code: i32,
}

impl CheckpointEntry {
    pub fn for_step(step: &StepRecord, exit_code: i32) -> Self {
        Self {
            step: step.name.clone(),
            iteration: step.iteration,
            position: step.position,
            completed_at: Utc::now(),
            exit_code,
        }
    }
}

/// Trait for checkpoint backends
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Every entry, in the order it was written
    async fn entries(&self) -> Result<Vec<CheckpointEntry>, PipelineError>;

    async fn has(&self, step: &str) -> Result<bool, PipelineError>;

    /// Record a successful step
    ///
    /// Re-marking with the same exit code is a no-op; a different exit code
    /// means the log disagrees with itself and is reported as corruption.
    async fn mark_complete(&self, step: &StepRecord, exit_code: i32) -> Result<(), PipelineError>;

    /// Remove every entry
    async fn clear(&self) -> Result<(), PipelineError>;

    /// Remove entries at `position` and after
    async fn discard_from(&self, position: usize) -> Result<usize, PipelineError>;

    /// Highest iteration among completed entries, 0 if there is none
    async fn latest_completed_iteration(&self) -> Result<usize, PipelineError> {
        Ok(self
            .entries()
            .await?
            .iter()
            .filter_map(|e| e.iteration)
            .max()
            .unwrap_or(0))
    }
}

/// Decide whether `entry` must be appended given what is already recorded
pub(crate) fn needs_insert(
    existing: Option<&CheckpointEntry>,
    entry: &CheckpointEntry,
) -> Result<bool, PipelineError> {
    match existing {
        None => Ok(true),
        Some(prev) if prev.exit_code == entry.exit_code => Ok(false),
        Some(prev) => Err(PipelineError::CheckpointCorruption(format!(
            "step '{}' already recorded with exit code {}, now {}",
            entry.step, prev.exit_code, entry.exit_code
        ))),
    }
}

/// In-memory checkpoint store (for testing or ephemeral use)
pub struct InMemoryCheckpointStore {
    entries: tokio::sync::RwLock<Vec<CheckpointEntry>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            entries: tokio::sync::RwLock::new(Vec::new()),
        }
    }

    /// Store pre-seeded with entries, as if left by an earlier run
    pub fn with_entries(entries: Vec<CheckpointEntry>) -> Self {
        Self {
            entries: tokio::sync::RwLock::new(entries),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn entries(&self) -> Result<Vec<CheckpointEntry>, PipelineError> {
        Ok(self.entries.read().await.clone())
    }

    async fn has(&self, step: &str) -> Result<bool, PipelineError> {
        Ok(self.entries.read().await.iter().any(|e| e.step == step))
    }

    async fn mark_complete(&self, step: &StepRecord, exit_code: i32) -> Result<(), PipelineError> {
        let entry = CheckpointEntry::for_step(step, exit_code);
        let mut entries = self.entries.write().await;
        if needs_insert(entries.iter().find(|e| e.step == entry.step), &entry)? {
            entries.push(entry);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn discard_from(&self, position: usize) -> Result<usize, PipelineError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.position < position);
        Ok(before - entries.len())
    }
}

/// Open the backend the configuration selects
pub async fn open_store(config: &RunConfig) -> Result<Arc<dyn CheckpointStore>, PipelineError> {
    let path = config.checkpoint_path();
    match config.checkpoint_backend {
        CheckpointBackend::Jsonl => Ok(Arc::new(JsonlCheckpointLog::open(path).await?)),
        #[cfg(feature = "sqlite")]
        CheckpointBackend::Sqlite => {
            Ok(Arc::new(SqliteCheckpointStore::open(&path, &config.run_name).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        CheckpointBackend::Sqlite => Err(PipelineError::invalid(
            "checkpoint_backend 'sqlite' requires the sqlite feature",
        )),
    }
}
