//! Task definitions for the anvil orchestrator.
//!
//! This module provides:
//! - `RawTaskDeclaration` — the agent-facing declaration, dependencies by name
//! - `Task` — the resolved unit of work, dependencies by id
//! - `TaskStatus` and `TaskPriority` closed enums
//!
//! Declarations are produced in batches by the task-generation agent before
//! ids exist, so they reference dependencies by display name. The graph
//! builder resolves names to ids and discards the declarations; `Task` never
//! carries resolution-time leftovers.

use serde::{Deserialize, Serialize};

/// Status of a task in the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting to run
    #[default]
    Pending,
    /// Task is currently executing
    InProgress,
    /// Task completed successfully
    Completed,
    /// Task failed (best-effort continuation for low priorities)
    Failed,
    /// Task was skipped (phase allowlist or dependency failure)
    Skipped,
    /// Task cannot run because a same-phase dependency is unsatisfied
    Blocked,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Check if the task completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Priority of a task.
///
/// Ordering is derived so the scheduler can sort descending; failure policy
/// treats `High` and above as build-aborting when recovery fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Whether a failure at this priority aborts the phase when unrecovered.
    pub fn aborts_on_failure(&self) -> bool {
        *self >= TaskPriority::High
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "critical" => Ok(TaskPriority::Critical),
            _ => anyhow::bail!(
                "Invalid task priority '{}'. Valid values: low, medium, high, critical",
                s
            ),
        }
    }
}

/// A task declaration as emitted by the task-generation agent.
///
/// Dependencies reference other declarations in the same batch by display
/// name; the graph builder resolves them to ids. Short-lived: dropped once
/// resolution produces `Task` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTaskDeclaration {
    /// Display name, unique within well-formed batches
    pub name: String,
    /// Name of the owning phase declaration
    pub phase: String,
    /// Names of tasks this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Estimated effort in hours (or token-equivalent cost units)
    #[serde(default = "default_effort")]
    pub estimated_effort: f64,
    /// Section labels this task wants included in its assembled context
    #[serde(default)]
    pub context_sections: Vec<String>,
}

fn default_effort() -> f64 {
    1.0
}

impl RawTaskDeclaration {
    /// Create a declaration with default priority and effort.
    pub fn new(name: &str, phase: &str, depends_on: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            phase: phase.to_string(),
            depends_on,
            priority: TaskPriority::default(),
            estimated_effort: default_effort(),
            context_sections: Vec::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the estimated effort.
    pub fn with_effort(mut self, effort: f64) -> Self {
        self.estimated_effort = effort;
        self
    }

    /// Set the required context sections.
    pub fn with_context_sections(mut self, sections: Vec<String>) -> Self {
        self.context_sections = sections;
        self
    }
}

/// A resolved unit of work within a phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique id (e.g., "t-001"), assigned at resolution time
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Id of the owning phase
    pub phase_id: String,
    /// Ids of tasks this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Estimated effort in hours (or token-equivalent cost units)
    pub estimated_effort: f64,
    /// Section labels this task wants included in its assembled context
    #[serde(default)]
    pub context_sections: Vec<String>,
}

impl Task {
    /// Check whether `other` shares a direct dependency edge with this task,
    /// in either direction.
    pub fn shares_edge_with(&self, other: &Task) -> bool {
        self.depends_on.contains(&other.id) || other.depends_on.contains(&self.id)
    }
}
