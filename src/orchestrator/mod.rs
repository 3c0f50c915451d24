//! Build orchestration: agent seams and the phase-by-phase drive loop.

pub mod agents;
pub mod runner;

pub use agents::{
    AgentOutcome, DryRunTaskAgent, GeneratedPlan, OutlinePlanningAgent, PlanningAgent,
    RecoveryAgent, ScriptedPlanningAgent, ScriptedRecoveryAgent, ScriptedTaskAgent, TaskAgent,
};
pub use runner::{BuildOrchestrator, BuildSummary, PhaseResult, PlanReport};
