//! Append-only JSON-lines checkpoint log

use crate::core::error::PipelineError;
use crate::core::step::StepRecord;
use crate::persistence::{needs_insert, CheckpointEntry, CheckpointStore};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Checkpoint log stored as one JSON object per line
///
/// Entries are cached after the initial read; every write goes to disk
/// before the cache is updated.
pub struct JsonlCheckpointLog {
    path: PathBuf,
    state: Mutex<LogState>,
}

struct LogState {
    entries: Vec<CheckpointEntry>,
    /// Set when the file on disk could not be parsed; only `clear` recovers
    damaged: Option<String>,
}

impl LogState {
    fn checked(&mut self) -> Result<&mut Vec<CheckpointEntry>, PipelineError> {
        match &self.damaged {
            Some(reason) => Err(PipelineError::CheckpointCorruption(reason.clone())),
            None => Ok(&mut self.entries),
        }
    }
}

impl JsonlCheckpointLog {
    /// Open the log at `path`, reading any entries already present
    ///
    /// An unparsable file does not fail here, so a fresh start can still
    /// clear it; every other operation reports the corruption.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        let parsed = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            parse_entries(&path, &content)
        } else {
            Ok(Vec::new())
        };
        let state = match parsed {
            Ok(entries) => {
                debug!(path = %path.display(), entries = entries.len(), "Checkpoint log opened");
                LogState { entries, damaged: None }
            }
            Err(e) => {
                warn!("Checkpoint log {} is damaged: {}", path.display(), e);
                LogState {
                    entries: Vec::new(),
                    damaged: Some(e.to_string()),
                }
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> Result<(), PipelineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Replace the file contents with `entries` via a temp file and rename
    async fn rewrite(&self, entries: &[CheckpointEntry]) -> Result<(), PipelineError> {
        self.ensure_parent().await?;
        let mut body = String::new();
        for entry in entries {
            body.push_str(&encode(entry)?);
            body.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn encode(entry: &CheckpointEntry) -> Result<String, PipelineError> {
    serde_json::to_string(entry).map_err(|e| PipelineError::Storage(e.to_string()))
}

fn parse_entries(path: &Path, content: &str) -> Result<Vec<CheckpointEntry>, String> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| format!("{}:{}: unparsable record: {}", path.display(), n + 1, e))
        })
        .collect()
}

#[async_trait::async_trait]
impl CheckpointStore for JsonlCheckpointLog {
    async fn entries(&self) -> Result<Vec<CheckpointEntry>, PipelineError> {
        Ok(self.state.lock().await.checked()?.clone())
    }

    async fn has(&self, step: &str) -> Result<bool, PipelineError> {
        Ok(self.state.lock().await.checked()?.iter().any(|e| e.step == step))
    }

    async fn mark_complete(&self, step: &StepRecord, exit_code: i32) -> Result<(), PipelineError> {
        let entry = CheckpointEntry::for_step(step, exit_code);
        let mut state = self.state.lock().await;
        let entries = state.checked()?;
        if !needs_insert(entries.iter().find(|e| e.step == entry.step), &entry)? {
            return Ok(());
        }

        self.ensure_parent().await?;
        let mut line = encode(&entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;

        debug!(step = %entry.step, "Checkpoint written");
        entries.push(entry);
        Ok(())
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        state.entries.clear();
        state.damaged = None;
        Ok(())
    }

    async fn discard_from(&self, position: usize) -> Result<usize, PipelineError> {
        let mut state = self.state.lock().await;
        let entries = state.checked()?;
        let kept: Vec<CheckpointEntry> =
            entries.iter().filter(|e| e.position < position).cloned().collect();
        let removed = entries.len() - kept.len();
        if removed > 0 {
            self.rewrite(&kept).await?;
            *entries = kept;
        }
        Ok(removed)
    }
}
