//! The build orchestrator: a single coordinating flow of control.
//!
//! Drives the whole pipeline: spec text, chunking, planning, graph
//! building, scheduling, then phase-by-phase task execution with a
//! checkpoint at every phase boundary. Tasks within a phase run
//! sequentially in scheduler order; parallel-group metadata is computed
//! for reporting but never auto-parallelized.
//!
//! The only awaits are agent invocations. A resource ceiling violation is
//! fatal before the next phase starts and is never retried.

use anyhow::Context;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore, ResumeOutcome, compute_spec_hash};
use crate::config::Config;
use crate::errors::{BuildError, PhaseError, TaskError};
use crate::graph::{TaskGraph, TaskGraphBuilder, TaskScheduler};
use crate::orchestrator::agents::{PlanningAgent, RecoveryAgent, TaskAgent};
use crate::packer::ContextPacker;
use crate::phase::{PhaseStatus, PlanFile};
use crate::task::TaskStatus;

/// Outcome of one phase, for the end-of-run summary.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase_id: String,
    pub name: String,
    pub status: PhaseStatus,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Aggregated results of a build run.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub phases: Vec<PhaseResult>,
    pub usage: crate::checkpoint::ResourceUsage,
    pub duration_secs: f64,
}

impl std::fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Build finished in {:.1}s", self.duration_secs)?;
        for phase in &self.phases {
            writeln!(
                f,
                "  {} {:<24} {:?}: {} completed, {} failed, {} skipped",
                phase.phase_id, phase.name, phase.status, phase.completed, phase.failed,
                phase.skipped
            )?;
        }
        write!(
            f,
            "Usage: {} tokens, ${:.4}, {} API calls",
            self.usage.tokens_used, self.usage.cost_usd, self.usage.api_calls
        )
    }
}

/// Plan-time report: what would run, in what order, at what cost.
#[derive(Debug)]
pub struct PlanReport {
    pub plan: PlanFile,
    pub chunk_count: usize,
    pub total_chunk_tokens: usize,
    pub phase_order: Vec<String>,
    /// Scheduled task ids per phase, in phase order
    pub task_order: Vec<(String, Vec<String>)>,
    /// Critical path task ids, root first, with the total effort cost
    pub critical_path: (Vec<String>, f64),
    /// Parallel-group metadata per phase, in phase order
    pub parallel_groups: Vec<(String, Vec<Vec<String>>)>,
}

/// Coordinates planning, scheduling, execution, and checkpointing.
pub struct BuildOrchestrator {
    config: Config,
    planning: Box<dyn PlanningAgent>,
    task_agent: Box<dyn TaskAgent>,
    recovery: Box<dyn RecoveryAgent>,
}

impl BuildOrchestrator {
    pub fn new(
        config: Config,
        planning: Box<dyn PlanningAgent>,
        task_agent: Box<dyn TaskAgent>,
        recovery: Box<dyn RecoveryAgent>,
    ) -> Self {
        Self {
            config,
            planning,
            task_agent,
            recovery,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Generate (or reload) the plan and report scheduling metadata
    /// without executing anything.
    pub async fn plan(&self) -> Result<PlanReport, BuildError> {
        let spec_text = self.read_spec()?;
        let spec_hash = compute_spec_hash(&spec_text);

        let mut packer = ContextPacker::new(&self.config.build);
        packer.chunk_spec(&spec_text);

        let plan = self
            .load_or_generate_plan(&mut packer, &spec_hash, false)
            .await?;
        let graph = TaskGraph::from_resolved(plan.phases.clone(), plan.tasks.clone());

        let scheduler = TaskScheduler::new(&graph);
        let phase_order = scheduler.phase_order();
        let critical = scheduler.critical_path();
        let task_order = phase_order
            .iter()
            .map(|id| (id.clone(), scheduler.task_order(id)))
            .collect();
        let parallel_groups = phase_order
            .iter()
            .map(|id| (id.clone(), scheduler.parallel_groups(id)))
            .collect();

        Ok(PlanReport {
            chunk_count: packer.chunks().len(),
            total_chunk_tokens: packer.chunks().iter().map(|c| c.tokens).sum(),
            phase_order,
            task_order,
            critical_path: (critical.task_ids, critical.total_cost),
            parallel_groups,
            plan,
        })
    }

    /// Run the build, optionally resuming from the latest checkpoint.
    ///
    /// `allow_spec_drift` permits resuming after the spec text changed;
    /// without it, drift is reported and the run refuses to proceed.
    pub async fn run(
        &self,
        resume: bool,
        allow_spec_drift: bool,
    ) -> Result<BuildSummary, BuildError> {
        let started = Instant::now();
        let spec_text = self.read_spec()?;
        let spec_hash = compute_spec_hash(&spec_text);

        self.config
            .ensure_directories()
            .context("Failed to prepare project directories")?;
        let store = CheckpointStore::new(&self.config.checkpoint_dir)
            .context("Failed to open checkpoint store")?;

        let mut checkpoint = if resume {
            let cp = store.load_latest()?;
            match store.validate_resume(&cp, &spec_text)? {
                ResumeOutcome::Ok => {}
                ResumeOutcome::SpecChanged { stored, current } => {
                    if !allow_spec_drift {
                        return Err(BuildError::Other(anyhow::anyhow!(
                            "Spec changed since checkpoint (hash {} -> {}); \
                             re-run with --force to resume anyway, or reset for a fresh build",
                            stored,
                            current
                        )));
                    }
                    warn!(stored = %stored, current = %current, "resuming across spec drift");
                }
            }
            info!(
                completed_phases = cp.completed_phases.len(),
                completed_tasks = cp.completed_tasks.len(),
                "resuming from checkpoint"
            );
            cp
        } else {
            Checkpoint::new(&spec_hash)
        };

        let mut packer = ContextPacker::new(&self.config.build);
        packer.chunk_spec(&spec_text);

        let plan = self
            .load_or_generate_plan(&mut packer, &spec_hash, resume)
            .await?;
        let mut graph = TaskGraph::from_resolved(plan.phases.clone(), plan.tasks.clone());
        restore_statuses(&mut graph, &checkpoint);

        let phase_order = TaskScheduler::new(&graph).phase_order();

        // Phases an executing task may treat as satisfied: completed ones
        // plus allowlist-skipped ones this run.
        let mut satisfied_phases: HashSet<String> = checkpoint.completed_phases.clone();
        let mut results: Vec<PhaseResult> = Vec::new();

        for phase_id in phase_order {
            let Some(phase) = graph.phase(&phase_id) else {
                continue;
            };
            let phase_name = phase.name.clone();
            let task_ids = phase.task_ids.clone();

            if checkpoint.completed_phases.contains(&phase_id) {
                debug!(phase = %phase_name, "already completed; skipping");
                results.push(phase_result(&graph, &phase_id, &phase_name, PhaseStatus::Completed));
                continue;
            }

            if !self.config.build.phase_allowed(&phase_name) {
                info!(phase = %phase_name, "not in allowlist; skipping");
                for task_id in &task_ids {
                    set_task_status(&mut graph, task_id, TaskStatus::Skipped);
                    checkpoint.skipped_tasks.insert(task_id.clone());
                }
                if let Some(phase) = graph.phase_mut(&phase_id) {
                    phase.status = PhaseStatus::Skipped;
                }
                satisfied_phases.insert(phase_id.clone());
                checkpoint = checkpoint.next();
                store.save(&checkpoint).context("Failed to save checkpoint")?;
                results.push(phase_result(&graph, &phase_id, &phase_name, PhaseStatus::Skipped));
                continue;
            }

            self.check_ceilings(&checkpoint)?;

            info!(phase = %phase_name, tasks = task_ids.len(), "starting phase");
            if let Some(phase) = graph.phase_mut(&phase_id) {
                phase.status = PhaseStatus::InProgress;
            }
            checkpoint.current_phase = Some(phase_id.clone());
            checkpoint = checkpoint.next();
            store.save(&checkpoint).context("Failed to save checkpoint")?;

            let abort = self
                .run_phase(&phase_id, &phase_name, &mut graph, &mut packer, &mut checkpoint, &satisfied_phases)
                .await;

            match abort {
                None => {
                    if let Some(phase) = graph.phase(&phase_id) {
                        info!(
                            phase = %phase_name,
                            completion = phase.completion_percentage(graph.tasks()),
                            "phase finished"
                        );
                    }
                    if let Some(phase) = graph.phase_mut(&phase_id) {
                        phase.status = PhaseStatus::Completed;
                    }
                    checkpoint.completed_phases.insert(phase_id.clone());
                    satisfied_phases.insert(phase_id.clone());
                    checkpoint.current_phase = None;
                    checkpoint = checkpoint.next();
                    store.save(&checkpoint).context("Failed to save checkpoint")?;
                    results.push(phase_result(&graph, &phase_id, &phase_name, PhaseStatus::Completed));
                }
                Some(err) => {
                    if let Some(phase) = graph.phase_mut(&phase_id) {
                        phase.status = PhaseStatus::Failed;
                    }
                    checkpoint = checkpoint.next();
                    store.save(&checkpoint).context("Failed to save checkpoint")?;
                    return Err(err.into());
                }
            }
        }

        Ok(BuildSummary {
            phases: results,
            usage: checkpoint.usage.clone(),
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// Execute the tasks of one phase sequentially in scheduler order.
    ///
    /// Returns the abort error when a high-priority task failed
    /// unrecovered; `None` means the phase ran to completion (possibly
    /// with best-effort failures).
    async fn run_phase(
        &self,
        phase_id: &str,
        phase_name: &str,
        graph: &mut TaskGraph,
        packer: &mut ContextPacker,
        checkpoint: &mut Checkpoint,
        satisfied_phases: &HashSet<String>,
    ) -> Option<PhaseError> {
        let order = TaskScheduler::new(graph).task_order(phase_id);

        for task_id in order {
            if checkpoint.completed_tasks.contains(&task_id) {
                continue;
            }

            let runnable = TaskScheduler::new(graph).can_execute(
                &task_id,
                &checkpoint.completed_tasks,
                satisfied_phases,
            );
            if !runnable {
                warn!(task = %task_id, "dependencies unsatisfied; skipping");
                set_task_status(graph, &task_id, TaskStatus::Skipped);
                checkpoint.skipped_tasks.insert(task_id.clone());
                continue;
            }

            let Some(task) = graph.task(&task_id).cloned() else {
                continue;
            };
            set_task_status(graph, &task_id, TaskStatus::InProgress);
            debug!(task = %task.name, priority = %task.priority, "executing task");

            let context = packer.assemble_context(phase_name, &task.context_sections);
            let failure = match self.task_agent.execute(&task, &context).await {
                Ok(outcome) => {
                    checkpoint.usage.absorb(&outcome.usage);
                    if outcome.success {
                        None
                    } else {
                        Some(TaskError::ExecutionFailed {
                            task: task.name.clone(),
                            message: outcome
                                .error
                                .unwrap_or_else(|| "agent reported failure".to_string()),
                        })
                    }
                }
                Err(e) => Some(TaskError::AgentInvocation {
                    task: task.name.clone(),
                    source: e,
                }),
            };

            let Some(failure) = failure else {
                set_task_status(graph, &task_id, TaskStatus::Completed);
                checkpoint.record_completed(&task_id, &task.depends_on);
                continue;
            };

            if !task.priority.aborts_on_failure() {
                warn!(task = %task.name, error = %failure, "task failed; continuing best-effort");
                set_task_status(graph, &task_id, TaskStatus::Failed);
                checkpoint.failed_tasks.insert(task_id.clone());
                continue;
            }

            let recovered = match self.recovery.recover(&task, &failure.to_string()).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(task = %task.name, error = %e, "recovery agent errored");
                    false
                }
            };
            if recovered {
                info!(task = %task.name, "task recovered");
                set_task_status(graph, &task_id, TaskStatus::Completed);
                checkpoint.record_completed(&task_id, &task.depends_on);
                continue;
            }

            set_task_status(graph, &task_id, TaskStatus::Failed);
            checkpoint.failed_tasks.insert(task_id.clone());
            return Some(PhaseError::TaskAborted {
                phase: phase_name.to_string(),
                task: task.name.clone(),
                source: failure,
            });
        }

        None
    }

    /// Check global resource ceilings; violations are fatal and never
    /// retried.
    fn check_ceilings(&self, checkpoint: &Checkpoint) -> Result<(), BuildError> {
        if let Some(limit) = self.config.build.max_tokens {
            if checkpoint.usage.tokens_used > limit {
                return Err(BuildError::BudgetExceeded {
                    resource: "token".to_string(),
                    used: checkpoint.usage.tokens_used.to_string(),
                    limit: limit.to_string(),
                });
            }
        }
        if let Some(limit) = self.config.build.max_cost {
            if checkpoint.usage.cost_usd > limit {
                return Err(BuildError::BudgetExceeded {
                    resource: "cost".to_string(),
                    used: format!("{:.4}", checkpoint.usage.cost_usd),
                    limit: format!("{:.4}", limit),
                });
            }
        }
        Ok(())
    }

    fn read_spec(&self) -> Result<String, BuildError> {
        std::fs::read_to_string(&self.config.spec_file).map_err(|source| {
            BuildError::SpecReadFailed {
                path: self.config.spec_file.clone(),
                source,
            }
        })
    }

    /// Reload a matching plan from disk or invoke the planning agent.
    ///
    /// On resume a stale plan is kept (regenerating would reassign ids and
    /// orphan the checkpoint); on a fresh run staleness triggers
    /// regeneration.
    async fn load_or_generate_plan(
        &self,
        packer: &mut ContextPacker,
        spec_hash: &str,
        resume: bool,
    ) -> Result<PlanFile, BuildError> {
        if self.config.plan_file.exists() {
            let plan = PlanFile::load(&self.config.plan_file)?;
            if plan.matches_spec(spec_hash) {
                debug!(path = %self.config.plan_file.display(), "reusing existing plan");
                return Ok(plan);
            }
            if resume {
                warn!(
                    stored = %plan.spec_hash,
                    current = %spec_hash,
                    "plan is stale but kept for resume; task ids must stay stable"
                );
                return Ok(plan);
            }
            info!("plan is stale; regenerating");
        }

        let context = packer.assemble_context("spec analysis", &[]);
        let analysis = self
            .planning
            .analyze_spec(&context)
            .await
            .context("Spec analysis failed")?;
        let generated = self
            .planning
            .generate_plan(&analysis, &context)
            .await
            .context("Plan generation failed")?;

        info!(
            phases = generated.phases.len(),
            tasks = generated.tasks.len(),
            "plan generated"
        );
        let graph = TaskGraphBuilder::new(generated.phases, generated.tasks).build();
        let (phases, tasks) = graph.into_parts();
        let plan = PlanFile::new(phases, tasks, spec_hash);

        self.config
            .ensure_directories()
            .context("Failed to prepare project directories")?;
        plan.save(&self.config.plan_file)?;
        Ok(plan)
    }
}

fn set_task_status(graph: &mut TaskGraph, task_id: &str, status: TaskStatus) {
    if let Some(task) = graph.task_mut(task_id) {
        task.status = status;
    }
}

/// Apply checkpointed progress onto a freshly loaded graph.
fn restore_statuses(graph: &mut TaskGraph, checkpoint: &Checkpoint) {
    let task_ids: Vec<String> = graph.tasks().iter().map(|t| t.id.clone()).collect();
    for id in task_ids {
        let status = if checkpoint.completed_tasks.contains(&id) {
            Some(TaskStatus::Completed)
        } else if checkpoint.failed_tasks.contains(&id) {
            Some(TaskStatus::Failed)
        } else if checkpoint.skipped_tasks.contains(&id) {
            Some(TaskStatus::Skipped)
        } else {
            None
        };
        if let Some(status) = status {
            set_task_status(graph, &id, status);
        }
    }

    let phase_ids: Vec<String> = graph.phases().iter().map(|p| p.id.clone()).collect();
    for id in phase_ids {
        if checkpoint.completed_phases.contains(&id) {
            if let Some(phase) = graph.phase_mut(&id) {
                phase.status = PhaseStatus::Completed;
            }
        }
    }
}

fn phase_result(
    graph: &TaskGraph,
    phase_id: &str,
    phase_name: &str,
    status: PhaseStatus,
) -> PhaseResult {
    let tasks = graph.tasks_in_phase(phase_id);
    PhaseResult {
        phase_id: phase_id.to_string(),
        name: phase_name.to_string(),
        status,
        completed: tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count(),
        failed: tasks.iter().filter(|t| t.status == TaskStatus::Failed).count(),
        skipped: tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Skipped)
            .count(),
    }
}
