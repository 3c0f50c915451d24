//! External collaborator interfaces for the build orchestrator.
//!
//! The orchestrator never talks to a model provider directly; it drives
//! three collaborators behind async traits. Agent invocations are the only
//! suspension points in the whole build. Everything else (packing, graph
//! building, scheduling) is synchronous computation.
//!
//! Collaborators are expected to be idempotent per task: on resume, tasks
//! completed after the last checkpoint are re-attempted.
//!
//! Scripted implementations live here too. They back the `plan` dry run and
//! the integration tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::checkpoint::ResourceUsage;
use crate::phase::RawPhaseDeclaration;
use crate::task::{RawTaskDeclaration, Task};

/// Phase and task declarations produced by the planning collaborator.
#[derive(Debug, Clone, Default)]
pub struct GeneratedPlan {
    pub phases: Vec<RawPhaseDeclaration>,
    pub tasks: Vec<RawTaskDeclaration>,
}

/// Result of one task execution by the external agent.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    /// Paths or identifiers of artifacts the agent produced
    pub artifacts: Vec<String>,
    /// Failure description when `success` is false
    pub error: Option<String>,
    /// Resources consumed by this invocation
    pub usage: ResourceUsage,
}

impl AgentOutcome {
    /// A successful outcome with no artifacts or usage.
    pub fn ok() -> Self {
        Self {
            success: true,
            artifacts: Vec::new(),
            error: None,
            usage: ResourceUsage::default(),
        }
    }

    /// A failed outcome with the given error message.
    pub fn failed(error: &str) -> Self {
        Self {
            success: false,
            artifacts: Vec::new(),
            error: Some(error.to_string()),
            usage: ResourceUsage::default(),
        }
    }

    /// Attach resource usage.
    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Collaborator that analyzes the spec and emits a plan.
#[async_trait]
pub trait PlanningAgent: Send + Sync {
    /// Summarize the spec from the assembled context.
    async fn analyze_spec(&self, context: &str) -> Result<String>;

    /// Emit phase and task declarations from the analysis.
    async fn generate_plan(&self, analysis: &str, context: &str) -> Result<GeneratedPlan>;
}

/// Collaborator that executes a single task.
#[async_trait]
pub trait TaskAgent: Send + Sync {
    /// Execute the task with its assembled context.
    async fn execute(&self, task: &Task, context: &str) -> Result<AgentOutcome>;
}

/// Collaborator consulted when a high-priority task fails.
#[async_trait]
pub trait RecoveryAgent: Send + Sync {
    /// Attempt to recover the failed task. Returns true when the failure
    /// was resolved and the task can be treated as completed.
    async fn recover(&self, task: &Task, error: &str) -> Result<bool>;
}

/// Planning agent that derives a plan from the markdown outline of the
/// assembled context: each `##` heading becomes a phase (chained
/// sequentially), each top-level bullet beneath it becomes a task.
///
/// This is the built-in offline planner the CLI wires in when no external
/// provider is configured. A context without headings yields a single
/// phase with one catch-all task.
pub struct OutlinePlanningAgent;

const MAX_TASK_NAME_LEN: usize = 80;

#[async_trait]
impl PlanningAgent for OutlinePlanningAgent {
    async fn analyze_spec(&self, context: &str) -> Result<String> {
        let headings = context
            .lines()
            .filter(|l| l.trim_start().starts_with("##"))
            .count();
        Ok(format!(
            "{} sections, {} chars of context",
            headings,
            context.len()
        ))
    }

    async fn generate_plan(&self, _analysis: &str, context: &str) -> Result<GeneratedPlan> {
        let mut plan = GeneratedPlan::default();
        let mut current_phase: Option<String> = None;

        for line in context.lines() {
            let trimmed = line.trim();
            if let Some(title) = trimmed.strip_prefix("## ") {
                let name = title.trim().to_string();
                if plan.phases.iter().any(|p| p.name == name) {
                    current_phase = Some(name);
                    continue;
                }
                let deps = plan
                    .phases
                    .last()
                    .map(|p| vec![p.name.clone()])
                    .unwrap_or_default();
                plan.phases.push(RawPhaseDeclaration::new(&name, deps));
                current_phase = Some(name);
            } else if let Some(item) = trimmed.strip_prefix("- ") {
                let Some(phase) = &current_phase else {
                    continue;
                };
                let mut name = item.trim().to_string();
                if name.is_empty() {
                    continue;
                }
                name.truncate(MAX_TASK_NAME_LEN);
                plan.tasks
                    .push(RawTaskDeclaration::new(&name, phase, Vec::new()));
            }
        }

        if plan.phases.is_empty() {
            plan.phases.push(RawPhaseDeclaration::new("build", vec![]));
            plan.tasks
                .push(RawTaskDeclaration::new("implement the spec", "build", vec![]));
        }

        Ok(plan)
    }
}

/// Task agent for dry runs: succeeds immediately, reporting token usage
/// estimated from the context size and zero cost.
pub struct DryRunTaskAgent;

#[async_trait]
impl TaskAgent for DryRunTaskAgent {
    async fn execute(&self, task: &Task, context: &str) -> Result<AgentOutcome> {
        tracing::info!(task = %task.name, context_chars = context.len(), "dry-run execution");
        Ok(AgentOutcome::ok().with_usage(ResourceUsage {
            tokens_used: (context.len() / 4) as u64,
            cost_usd: 0.0,
            api_calls: 0,
        }))
    }
}

/// Planning agent that returns a fixed plan.
pub struct ScriptedPlanningAgent {
    plan: GeneratedPlan,
}

impl ScriptedPlanningAgent {
    pub fn new(plan: GeneratedPlan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl PlanningAgent for ScriptedPlanningAgent {
    async fn analyze_spec(&self, context: &str) -> Result<String> {
        Ok(format!("analysis of {} context chars", context.len()))
    }

    async fn generate_plan(&self, _analysis: &str, _context: &str) -> Result<GeneratedPlan> {
        Ok(self.plan.clone())
    }
}

/// Task agent driven by a per-task-name script.
///
/// Unknown tasks succeed with the default usage; scripted names return the
/// configured outcome. Invocation order is recorded for assertions.
pub struct ScriptedTaskAgent {
    outcomes: HashMap<String, AgentOutcome>,
    default_usage: ResourceUsage,
    invocations: Mutex<Vec<String>>,
}

impl ScriptedTaskAgent {
    pub fn new() -> Self {
        Self {
            outcomes: HashMap::new(),
            default_usage: ResourceUsage {
                tokens_used: 100,
                cost_usd: 0.01,
                api_calls: 1,
            },
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Script a specific outcome for a task name.
    pub fn with_outcome(mut self, task_name: &str, outcome: AgentOutcome) -> Self {
        self.outcomes.insert(task_name.to_string(), outcome);
        self
    }

    /// Override the usage reported by unscripted successes.
    pub fn with_default_usage(mut self, usage: ResourceUsage) -> Self {
        self.default_usage = usage;
        self
    }

    /// Task names in the order they were executed.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Default for ScriptedTaskAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskAgent for ScriptedTaskAgent {
    async fn execute(&self, task: &Task, _context: &str) -> Result<AgentOutcome> {
        if let Ok(mut log) = self.invocations.lock() {
            log.push(task.name.clone());
        }
        match self.outcomes.get(&task.name) {
            Some(outcome) => Ok(outcome.clone()),
            None => Ok(AgentOutcome::ok().with_usage(self.default_usage.clone())),
        }
    }
}

/// Recovery agent that recovers a fixed set of task names.
pub struct ScriptedRecoveryAgent {
    recoverable: Vec<String>,
}

impl ScriptedRecoveryAgent {
    /// Recovers nothing.
    pub fn none() -> Self {
        Self {
            recoverable: Vec::new(),
        }
    }

    /// Recovers exactly the given task names.
    pub fn recovering(names: Vec<String>) -> Self {
        Self { recoverable: names }
    }
}

#[async_trait]
impl RecoveryAgent for ScriptedRecoveryAgent {
    async fn recover(&self, task: &Task, _error: &str) -> Result<bool> {
        Ok(self.recoverable.contains(&task.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskPriority, TaskStatus};

    fn task(name: &str) -> Task {
        Task {
            id: "t-001".to_string(),
            name: name.to_string(),
            phase_id: "p-01".to_string(),
            depends_on: vec![],
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            estimated_effort: 1.0,
            context_sections: vec![],
        }
    }

    #[tokio::test]
    async fn test_scripted_task_agent_defaults_to_success() {
        let agent = ScriptedTaskAgent::new();
        let outcome = agent.execute(&task("anything"), "ctx").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.usage.api_calls, 1);
    }

    #[tokio::test]
    async fn test_scripted_task_agent_scripted_failure() {
        let agent =
            ScriptedTaskAgent::new().with_outcome("bad", AgentOutcome::failed("compile error"));
        let outcome = agent.execute(&task("bad"), "ctx").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("compile error"));
    }

    #[tokio::test]
    async fn test_scripted_task_agent_records_invocations() {
        let agent = ScriptedTaskAgent::new();
        agent.execute(&task("first"), "").await.unwrap();
        agent.execute(&task("second"), "").await.unwrap();
        assert_eq!(agent.invocations(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_scripted_recovery_agent() {
        let agent = ScriptedRecoveryAgent::recovering(vec!["flaky".to_string()]);
        assert!(agent.recover(&task("flaky"), "err").await.unwrap());
        assert!(!agent.recover(&task("solid"), "err").await.unwrap());
    }

    #[tokio::test]
    async fn test_outline_planner_phases_from_headings() {
        let context = "# Title\n\n## Setup\n- create project\n- add deps\n\n## Core\n- build engine\n";
        let plan = OutlinePlanningAgent
            .generate_plan("", context)
            .await
            .unwrap();

        assert_eq!(plan.phases.len(), 2);
        assert_eq!(plan.phases[0].name, "Setup");
        assert_eq!(plan.phases[1].depends_on, vec!["Setup"]);
        assert_eq!(plan.tasks.len(), 3);
        assert_eq!(plan.tasks[0].phase, "Setup");
        assert_eq!(plan.tasks[2].phase, "Core");
    }

    #[tokio::test]
    async fn test_outline_planner_fallback_without_headings() {
        let plan = OutlinePlanningAgent
            .generate_plan("", "just plain text")
            .await
            .unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_agent_estimates_tokens() {
        let outcome = DryRunTaskAgent
            .execute(&task("anything"), &"x".repeat(400))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.usage.tokens_used, 100);
        assert_eq!(outcome.usage.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_scripted_planning_agent_returns_plan() {
        let plan = GeneratedPlan {
            phases: vec![RawPhaseDeclaration::new("core", vec![])],
            tasks: vec![RawTaskDeclaration::new("build", "core", vec![])],
        };
        let agent = ScriptedPlanningAgent::new(plan);
        let analysis = agent.analyze_spec("some context").await.unwrap();
        let generated = agent.generate_plan(&analysis, "some context").await.unwrap();
        assert_eq!(generated.phases.len(), 1);
        assert_eq!(generated.tasks.len(), 1);
    }
}
