//! Status and reset commands.
//!
//! Both operate on the `.anvil/` state directory alone, so they work even
//! when no spec file is present.

use anyhow::Result;
use std::path::Path;

use anvil::checkpoint::CheckpointStore;
use anvil::config::ProjectPaths;
use anvil::errors::ResumeError;
use anvil::phase::PlanFile;

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    let paths = ProjectPaths::new(project_dir);

    println!();
    println!("Anvil Build Status");
    println!("==================");
    println!();

    if !paths.anvil_dir.exists() {
        println!("No .anvil directory; nothing has been planned or run here.");
        println!("Run 'anvil plan' to generate a plan.");
        return Ok(());
    }

    let plan = if paths.plan_file.exists() {
        Some(PlanFile::load(&paths.plan_file)?)
    } else {
        println!("Plan:       missing (run 'anvil plan')");
        None
    };

    let store = CheckpointStore::new(&paths.checkpoint_dir)?;
    let checkpoint = match store.load_latest() {
        Ok(cp) => Some(cp),
        Err(ResumeError::NoCheckpoint) => {
            println!("Checkpoint: none (run 'anvil run')");
            None
        }
        Err(e) => {
            println!("Checkpoint: unreadable ({e})");
            None
        }
    };

    if let Some(plan) = &plan {
        println!(
            "Plan:       {} phases, {} tasks",
            plan.phases.len(),
            plan.tasks.len()
        );
        println!("Spec hash:  {}", plan.spec_hash);
        println!();
        for phase in &plan.phases {
            let total = phase.task_ids.len();
            let done = match &checkpoint {
                Some(cp) => phase
                    .task_ids
                    .iter()
                    .filter(|id| cp.completed_tasks.contains(*id))
                    .count(),
                None => 0,
            };
            let marker = match &checkpoint {
                Some(cp) if cp.completed_phases.contains(&phase.id) => "done",
                Some(cp) if cp.current_phase.as_deref() == Some(phase.id.as_str()) => {
                    "in progress"
                }
                _ => "pending",
            };
            println!(
                "  {} {:<24} {}/{} tasks ({})",
                phase.id, phase.name, done, total, marker
            );
        }
    }

    if let Some(cp) = &checkpoint {
        println!();
        println!(
            "Usage:      {} tokens, ${:.4}, {} API calls",
            cp.usage.tokens_used, cp.usage.cost_usd, cp.usage.api_calls
        );
        if !cp.failed_tasks.is_empty() {
            let mut failed: Vec<&str> = cp.failed_tasks.iter().map(String::as_str).collect();
            failed.sort();
            println!("Failed:     {}", failed.join(", "));
        }
    }

    println!();
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let paths = ProjectPaths::new(project_dir);

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will delete the plan and all checkpoints. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let store = CheckpointStore::new(&paths.checkpoint_dir)?;
    store.reset()?;

    if paths.plan_file.exists() {
        std::fs::remove_file(&paths.plan_file)?;
    }
    if paths.log_dir.exists() {
        std::fs::remove_dir_all(&paths.log_dir).ok();
    }

    println!("Reset complete");
    Ok(())
}
