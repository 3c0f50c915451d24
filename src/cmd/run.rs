//! Plan, run, and resume commands.

use anyhow::Result;
use std::path::Path;

use anvil::config::Config;
use anvil::orchestrator::{
    BuildOrchestrator, DryRunTaskAgent, OutlinePlanningAgent, ScriptedRecoveryAgent,
};

use crate::Cli;

fn build_orchestrator(cli: &Cli, project_dir: &Path) -> Result<BuildOrchestrator> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, cli.spec_file.clone())?;
    Ok(BuildOrchestrator::new(
        config,
        Box::new(OutlinePlanningAgent),
        Box::new(DryRunTaskAgent),
        Box::new(ScriptedRecoveryAgent::none()),
    ))
}

pub async fn cmd_plan(cli: &Cli, project_dir: &Path) -> Result<()> {
    let orchestrator = build_orchestrator(cli, project_dir)?;
    let report = orchestrator.plan().await?;

    println!(
        "Plan for spec hash {} ({} phases, {} tasks)",
        report.plan.spec_hash,
        report.plan.phases.len(),
        report.plan.tasks.len()
    );
    println!(
        "Chunks: {} ({} estimated tokens)",
        report.chunk_count, report.total_chunk_tokens
    );
    println!();

    for phase_id in &report.phase_order {
        let Some(phase) = report.plan.get_phase(phase_id) else {
            continue;
        };
        println!("{} {}", phase.id, phase.name);
        if let Some((_, order)) = report.task_order.iter().find(|(id, _)| id == phase_id) {
            for task_id in order {
                if let Some(task) = report.plan.tasks.iter().find(|t| &t.id == task_id) {
                    println!(
                        "  {} {} [{}] effort {:.1}",
                        task.id, task.name, task.priority, task.estimated_effort
                    );
                }
            }
        }
        if let Some((_, groups)) = report.parallel_groups.iter().find(|(id, _)| id == phase_id) {
            for group in groups.iter().filter(|g| g.len() > 1) {
                println!("  parallel candidates: {}", group.join(", "));
            }
        }
    }

    let (path, cost) = &report.critical_path;
    println!();
    println!(
        "Critical path ({:.1} effort): {}",
        cost,
        path.join(" -> ")
    );
    Ok(())
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, resume: bool, force: bool) -> Result<()> {
    let orchestrator = build_orchestrator(cli, project_dir)?;
    let summary = orchestrator.run(resume, force || cli.yes).await?;
    println!("{summary}");
    Ok(())
}
