//! Typed error hierarchy for the anvil orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `BuildError` — orchestrator-level failures (budgets, IO, propagation)
//! - `PhaseError` / `TaskError` — per-phase and per-task execution failures
//! - `ResumeError` — checkpoint validation failures on resume
//!
//! Packing warnings, cycle repairs, and dropped dependency names are
//! deliberately NOT errors: they are absorbed locally and surfaced only as
//! `tracing` diagnostics, so a build never stops on malformed agent output.

use thiserror::Error;

/// Errors that abort an entire build.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{resource} budget exceeded: used {used}, limit {limit}")]
    BudgetExceeded {
        resource: String,
        used: String,
        limit: String,
    },

    #[error("Failed to read spec file at {path}: {source}")]
    SpecReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error(transparent)]
    Resume(#[from] ResumeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single phase execution.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Phase {phase} aborted: {source}")]
    TaskAborted {
        phase: String,
        task: String,
        #[source]
        source: TaskError,
    },

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Errors from executing a single task via the external agent.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {task} failed: {message}")]
    ExecutionFailed { task: String, message: String },

    #[error("Agent invocation for task {task} errored: {source}")]
    AgentInvocation {
        task: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors refusing a checkpoint resume.
///
/// Any of these means the stored state is inconsistent; the caller must
/// start a fresh build rather than proceed.
#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("No checkpoint found to resume from")]
    NoCheckpoint,

    #[error("Checkpoint snapshot at {path} is unreadable: {message}")]
    SnapshotUnreadable {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("Checkpoint is inconsistent: current phase {phase} is already in the completed set")]
    CurrentPhaseCompleted { phase: String },

    #[error(
        "Checkpoint is inconsistent: completed task {task} depends on {dependency}, which is not in the completed set"
    )]
    InconsistentDependency { task: String, dependency: String },
}
