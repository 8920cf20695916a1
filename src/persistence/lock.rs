//! Exclusive ownership of a run identity

use crate::core::error::PipelineError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file held for the lifetime of a controller; removed on drop
///
/// The file records the owner's pid. A lock whose owner is no longer running
/// (killed before it could clean up) is taken over on the next acquire.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Where the lock for `run_name` lives
    pub fn path_for(working_dir: &Path, run_name: &str) -> PathBuf {
        working_dir.join(format!(".{}.lock", run_name))
    }

    /// Take the lock for `run_name` inside `working_dir`
    pub fn acquire(working_dir: &Path, run_name: &str) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(working_dir)?;
        let path = Self::path_for(working_dir, run_name);

        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let Some(owner) = read_owner(&path) else {
                    return Err(PipelineError::RunLocked(run_name.to_string()));
                };
                if process_alive(owner) {
                    return Err(PipelineError::RunLocked(run_name.to_string()));
                }

                warn!(
                    "Taking over stale lock {} left by pid {}",
                    path.display(),
                    owner
                );
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                // Another process may have won the race since the removal
                Self::create(&path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => {
                        PipelineError::RunLocked(run_name.to_string())
                    }
                    _ => e.into(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Pid recorded in an existing lock file
///
/// `None` when the file is unreadable or still being written; such a lock is
/// treated as held.
fn read_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let proc_root = Path::new("/proc");
    if proc_root.is_dir() {
        return proc_root.join(pid.to_string()).exists();
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
