//! Checkpoint records for durable build progress.
//!
//! A checkpoint captures everything needed to resume after interruption
//! without redoing completed work: the phase/task progress sets, the
//! dependency ids recorded for each completed task (so resume can verify
//! internal consistency), cumulative resource usage, and the hash of the
//! spec the build was generated from.

pub mod store;

pub use store::{CheckpointStore, ResumeOutcome};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Cumulative resource counters for a build.
///
/// Updated at task and phase boundaries only, never mid-task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub api_calls: u64,
}

impl ResourceUsage {
    /// Fold another usage record into this one.
    pub fn absorb(&mut self, other: &ResourceUsage) {
        self.tokens_used += other.tokens_used;
        self.cost_usd += other.cost_usd;
        self.api_calls += other.api_calls;
    }
}

/// A point-in-time snapshot of build progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique snapshot id
    pub id: String,
    /// RFC 3339 creation timestamp
    pub created_at: String,
    /// Phase being executed when the snapshot was written, if any
    pub current_phase: Option<String>,
    /// Ids of fully completed phases
    #[serde(default)]
    pub completed_phases: HashSet<String>,
    /// Ids of completed tasks
    #[serde(default)]
    pub completed_tasks: HashSet<String>,
    /// Ids of failed tasks (best-effort continuation)
    #[serde(default)]
    pub failed_tasks: HashSet<String>,
    /// Ids of skipped tasks
    #[serde(default)]
    pub skipped_tasks: HashSet<String>,
    /// Dependency ids of each completed task, for resume validation
    #[serde(default)]
    pub task_dependencies: HashMap<String, Vec<String>>,
    /// Cumulative resource counters at snapshot time
    #[serde(default)]
    pub usage: ResourceUsage,
    /// Hash of the spec text the plan was generated from
    pub spec_hash: String,
}

impl Checkpoint {
    /// Create an empty checkpoint for a fresh build.
    pub fn new(spec_hash: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            current_phase: None,
            completed_phases: HashSet::new(),
            completed_tasks: HashSet::new(),
            failed_tasks: HashSet::new(),
            skipped_tasks: HashSet::new(),
            task_dependencies: HashMap::new(),
            usage: ResourceUsage::default(),
            spec_hash: spec_hash.to_string(),
        }
    }

    /// Record a completed task along with its dependency ids.
    ///
    /// A task that failed or was skipped on an earlier attempt leaves
    /// those sets; the three outcome sets stay disjoint.
    pub fn record_completed(&mut self, task_id: &str, depends_on: &[String]) {
        self.failed_tasks.remove(task_id);
        self.skipped_tasks.remove(task_id);
        self.completed_tasks.insert(task_id.to_string());
        self.task_dependencies
            .insert(task_id.to_string(), depends_on.to_vec());
    }

    /// Produce a successor snapshot: same progress, fresh id and timestamp.
    pub fn next(&self) -> Self {
        let mut next = self.clone();
        next.id = uuid::Uuid::new_v4().to_string();
        next.created_at = chrono::Utc::now().to_rfc3339();
        next
    }
}

/// Content hash of the spec text, truncated for display and comparison.
pub fn compute_spec_hash(spec_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(spec_text.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_hash_stable_and_short() {
        let h1 = compute_spec_hash("build a parser");
        let h2 = compute_spec_hash("build a parser");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 12);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_spec_hash_changes_with_content() {
        assert_ne!(compute_spec_hash("v1"), compute_spec_hash("v2"));
    }

    #[test]
    fn test_record_completed_tracks_dependencies() {
        let mut cp = Checkpoint::new("abc123def456");
        cp.record_completed("t-002", &["t-001".to_string()]);
        assert!(cp.completed_tasks.contains("t-002"));
        assert_eq!(cp.task_dependencies["t-002"], vec!["t-001"]);
    }

    #[test]
    fn test_next_keeps_progress_fresh_identity() {
        let mut cp = Checkpoint::new("abc123def456");
        cp.record_completed("t-001", &[]);
        let next = cp.next();
        assert_ne!(next.id, cp.id);
        assert_eq!(next.completed_tasks, cp.completed_tasks);
        assert_eq!(next.spec_hash, cp.spec_hash);
    }

    #[test]
    fn test_usage_absorb() {
        let mut total = ResourceUsage::default();
        total.absorb(&ResourceUsage {
            tokens_used: 100,
            cost_usd: 0.5,
            api_calls: 2,
        });
        total.absorb(&ResourceUsage {
            tokens_used: 50,
            cost_usd: 0.25,
            api_calls: 1,
        });
        assert_eq!(total.tokens_used, 150);
        assert_eq!(total.cost_usd, 0.75);
        assert_eq!(total.api_calls, 3);
    }

    #[test]
    fn test_checkpoint_serde_round_trip() {
        let mut cp = Checkpoint::new("abc123def456");
        cp.current_phase = Some("p-02".to_string());
        cp.record_completed("t-001", &[]);
        cp.failed_tasks.insert("t-003".to_string());
        cp.usage.tokens_used = 1234;

        let json = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.current_phase.as_deref(), Some("p-02"));
        assert!(back.completed_tasks.contains("t-001"));
        assert!(back.failed_tasks.contains("t-003"));
        assert_eq!(back.usage.tokens_used, 1234);
    }
}
