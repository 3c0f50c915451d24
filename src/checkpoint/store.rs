//! Durable checkpoint storage with an atomic latest pointer.
//!
//! Snapshots are written as `<uuid>.json` files in the checkpoint
//! directory. Each write first lands in a temp file and is renamed into
//! place, then the `latest` pointer file is updated the same way. A crash
//! at any point leaves the previous `latest` intact; the store never
//! exposes a partially written snapshot as current. Historical snapshots
//! are retained for inspection.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::checkpoint::{Checkpoint, compute_spec_hash};
use crate::errors::ResumeError;

const LATEST_POINTER: &str = "latest";

/// Result of validating a checkpoint against the current spec.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    /// Checkpoint is consistent and matches the current spec.
    Ok,
    /// Checkpoint is consistent but the spec text has changed since it was
    /// written. Resumable, but only with explicit caller confirmation.
    SpecChanged { stored: String, current: String },
}

/// File-backed checkpoint store rooted at one directory.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store over the given directory, creating it if needed.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create checkpoint dir: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Persist a snapshot and move the latest pointer to it.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let content = serde_json::to_string_pretty(checkpoint)
            .context("Failed to serialize checkpoint")?;

        let snapshot_name = format!("{}.json", checkpoint.id);
        let snapshot_path = self.dir.join(&snapshot_name);
        write_atomic(&snapshot_path, &content)?;
        write_atomic(&self.dir.join(LATEST_POINTER), &snapshot_name)?;

        debug!(id = %checkpoint.id, path = %snapshot_path.display(), "checkpoint saved");
        Ok(())
    }

    /// Load the snapshot the latest pointer references.
    pub fn load_latest(&self) -> Result<Checkpoint, ResumeError> {
        let pointer_path = self.dir.join(LATEST_POINTER);
        let snapshot_name = match fs::read_to_string(&pointer_path) {
            Ok(name) => name.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResumeError::NoCheckpoint);
            }
            Err(e) => {
                return Err(ResumeError::SnapshotUnreadable {
                    path: pointer_path,
                    message: e.to_string(),
                });
            }
        };

        let snapshot_path = self.dir.join(&snapshot_name);
        let content =
            fs::read_to_string(&snapshot_path).map_err(|e| ResumeError::SnapshotUnreadable {
                path: snapshot_path.clone(),
                message: e.to_string(),
            })?;

        serde_json::from_str(&content).map_err(|e| ResumeError::SnapshotUnreadable {
            path: snapshot_path,
            message: e.to_string(),
        })
    }

    /// Validate a checkpoint for resuming against the current spec text.
    ///
    /// Spec drift is an outcome, not an error: the caller decides whether to
    /// proceed. Internal inconsistency is a refusal; the stored state cannot
    /// be trusted and a fresh build is required.
    pub fn validate_resume(
        &self,
        checkpoint: &Checkpoint,
        spec_text: &str,
    ) -> Result<ResumeOutcome, ResumeError> {
        if let Some(phase) = &checkpoint.current_phase {
            if checkpoint.completed_phases.contains(phase) {
                return Err(ResumeError::CurrentPhaseCompleted {
                    phase: phase.clone(),
                });
            }
        }

        for (task, deps) in &checkpoint.task_dependencies {
            if !checkpoint.completed_tasks.contains(task) {
                continue;
            }
            for dep in deps {
                if !checkpoint.completed_tasks.contains(dep) {
                    return Err(ResumeError::InconsistentDependency {
                        task: task.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let current = compute_spec_hash(spec_text);
        if current != checkpoint.spec_hash {
            return Ok(ResumeOutcome::SpecChanged {
                stored: checkpoint.spec_hash.clone(),
                current,
            });
        }

        Ok(ResumeOutcome::Ok)
    }

    /// Remove all snapshots and the latest pointer.
    pub fn reset(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).with_context(|| {
                format!("Failed to remove checkpoint dir: {}", self.dir.display())
            })?;
        }
        Ok(())
    }

    /// Whether any checkpoint exists.
    pub fn has_checkpoint(&self) -> bool {
        self.dir.join(LATEST_POINTER).exists()
    }
}

/// Write via temp file + rename so readers never observe partial content.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)
        .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}
