//! Working-directory state owned by a run

use crate::core::error::PipelineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Deletes artifacts on behalf of the run controller
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Remove everything a previous run left behind
    async fn reset(&self) -> Result<(), PipelineError>;

    /// Remove the artifact directories of `iterations`
    async fn discard_iterations(&self, iterations: &[usize]) -> Result<(), PipelineError>;
}

/// Workspace rooted at a run's working directory
pub struct FsWorkspace {
    root: PathBuf,
    /// Paths that survive a reset (lock file, open checkpoint database)
    preserve: Vec<PathBuf>,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            preserve: Vec::new(),
        }
    }

    pub fn preserve(mut self, path: impl Into<PathBuf>) -> Self {
        self.preserve.push(path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn iteration_dir(&self, iteration: usize) -> PathBuf {
        self.root.join(format!("Iter_{}", iteration))
    }
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

#[async_trait]
impl Workspace for FsWorkspace {
    async fn reset(&self) -> Result<(), PipelineError> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(());
        }
        let mut removed = 0usize;
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if self.preserve.iter().any(|keep| keep == &path) {
                continue;
            }
            remove_path(&path).await?;
            removed += 1;
        }
        info!("Cleared {} item(s) from {}", removed, self.root.display());
        Ok(())
    }

    async fn discard_iterations(&self, iterations: &[usize]) -> Result<(), PipelineError> {
        for &i in iterations {
            let dir = self.iteration_dir(i);
            debug!("Discarding artifacts in {}", dir.display());
            remove_path(&dir).await?;
        }
        Ok(())
    }
}
