//! Phase definitions and plan persistence for the anvil orchestrator.
//!
//! This module provides:
//! - `RawPhaseDeclaration` — the agent-facing phase declaration
//! - `Phase` struct representing a single build phase
//! - `PlanFile` struct representing the full `.anvil/plan.json` format
//!
//! Phases are created once per build; their task lists are populated after
//! task generation. The plan file is stamped with the spec hash so a stale
//! plan can be detected on reload.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::task::{Task, TaskStatus};

/// Status of a phase in the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Phase is waiting to run
    #[default]
    Pending,
    /// Phase is currently executing its tasks
    InProgress,
    /// All tasks reached a terminal state and none aborted the phase
    Completed,
    /// A high/critical task failed unrecovered
    Failed,
    /// Phase was excluded by the allowlist or a dependency failure
    Skipped,
}

impl PhaseStatus {
    /// Check if the phase is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// A phase declaration as emitted by the task-generation agent.
///
/// Dependencies reference other phase declarations by name; resolution
/// assigns ids and ordering indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPhaseDeclaration {
    /// Display name, unique within well-formed batches
    pub name: String,
    /// Names of phases this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl RawPhaseDeclaration {
    /// Create a declaration.
    pub fn new(name: &str, depends_on: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            depends_on,
        }
    }
}

/// A single build phase: an ordered batch of tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    /// Unique id (e.g., "p-01"), assigned at resolution time
    pub id: String,
    /// Ordering index within the plan (declaration order)
    pub index: usize,
    /// Human-readable name
    pub name: String,
    /// Ids of tasks belonging to this phase, in declaration order
    #[serde(default)]
    pub task_ids: Vec<String>,
    /// Ids of phases this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub status: PhaseStatus,
}

impl Phase {
    /// Completion percentage derived from the contained tasks.
    ///
    /// An empty phase counts as 100% complete.
    pub fn completion_percentage<'a, I>(&self, tasks: I) -> f64
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut total = 0usize;
        let mut done = 0usize;
        for task in tasks {
            if task.phase_id == self.id {
                total += 1;
                if task.status == TaskStatus::Completed {
                    done += 1;
                }
            }
        }
        if total == 0 {
            return 100.0;
        }
        (done as f64 / total as f64) * 100.0
    }
}

/// Represents the full `.anvil/plan.json` file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    /// Hash of the spec text used to generate this plan
    pub spec_hash: String,
    /// Timestamp when the plan was generated
    pub generated_at: String,
    /// Resolved phases
    pub phases: Vec<Phase>,
    /// Resolved tasks
    pub tasks: Vec<Task>,
}

impl PlanFile {
    /// Build a plan file from resolved phases and tasks.
    pub fn new(phases: Vec<Phase>, tasks: Vec<Task>, spec_hash: &str) -> Self {
        Self {
            spec_hash: spec_hash.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            phases,
            tasks,
        }
    }

    /// Load a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

        let plan: PlanFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))?;

        Ok(plan)
    }

    /// Save the plan to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize plan to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))?;

        Ok(())
    }

    /// Get a phase by id.
    pub fn get_phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// Check whether this plan was generated from the given spec hash.
    pub fn matches_spec(&self, spec_hash: &str) -> bool {
        self.spec_hash == spec_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskPriority;
    use tempfile::tempdir;

    fn task(id: &str, phase_id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            name: id.to_string(),
            phase_id: phase_id.to_string(),
            depends_on: vec![],
            status,
            priority: TaskPriority::Medium,
            estimated_effort: 1.0,
            context_sections: vec![],
        }
    }

    fn phase(id: &str, index: usize) -> Phase {
        Phase {
            id: id.to_string(),
            index,
            name: format!("Phase {}", id),
            task_ids: vec![],
            depends_on: vec![],
            status: PhaseStatus::Pending,
        }
    }

    #[test]
    fn test_completion_percentage() {
        let p = phase("p-01", 0);
        let tasks = vec![
            task("t-001", "p-01", TaskStatus::Completed),
            task("t-002", "p-01", TaskStatus::Pending),
            task("t-003", "p-02", TaskStatus::Completed), // other phase, ignored
        ];
        assert_eq!(p.completion_percentage(&tasks), 50.0);
    }

    #[test]
    fn test_completion_percentage_empty_phase() {
        let p = phase("p-01", 0);
        assert_eq!(p.completion_percentage(&[]), 100.0);
    }

    #[test]
    fn test_phase_status_terminal() {
        assert!(PhaseStatus::Completed.is_terminal());
        assert!(PhaseStatus::Failed.is_terminal());
        assert!(PhaseStatus::Skipped.is_terminal());
        assert!(!PhaseStatus::Pending.is_terminal());
        assert!(!PhaseStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_plan_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");

        let mut p1 = phase("p-01", 0);
        p1.task_ids = vec!["t-001".to_string()];
        let mut p2 = phase("p-02", 1);
        p2.depends_on = vec!["p-01".to_string()];

        let tasks = vec![task("t-001", "p-01", TaskStatus::Pending)];
        let plan = PlanFile::new(vec![p1, p2], tasks, "abc123def456");

        plan.save(&path).unwrap();
        let loaded = PlanFile::load(&path).unwrap();

        assert_eq!(loaded.spec_hash, "abc123def456");
        assert_eq!(loaded.phases.len(), 2);
        assert_eq!(loaded.phases[1].depends_on, vec!["p-01"]);
        assert_eq!(loaded.tasks.len(), 1);
        assert!(loaded.matches_spec("abc123def456"));
        assert!(!loaded.matches_spec("other"));
    }

    #[test]
    fn test_plan_file_timestamp_is_rfc3339() {
        let plan = PlanFile::new(vec![], vec![], "hash");
        assert!(chrono::DateTime::parse_from_rfc3339(&plan.generated_at).is_ok());
    }

    #[test]
    fn test_get_phase() {
        let plan = PlanFile::new(vec![phase("p-01", 0)], vec![], "hash");
        assert!(plan.get_phase("p-01").is_some());
        assert!(plan.get_phase("p-99").is_none());
    }
}
