//! Execution ordering over a validated task graph.
//!
//! The scheduler is pure computation: it reads the graph and produces phase
//! order, per-phase task order, critical-path estimates, and parallel-group
//! metadata. It never mutates the graph and never blocks.
//!
//! Every ordering routine terminates on every input. A residual cycle or a
//! dependency that can never complete is handled by appending the remaining
//! items in declaration order with a diagnostic rather than looping.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::graph::builder::TaskGraph;
use crate::task::Task;

/// Critical path through the dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticalPath {
    /// Task ids from root to the most expensive terminal task
    pub task_ids: Vec<String>,
    /// Sum of estimated effort along the path
    pub total_cost: f64,
}

/// Pure scheduling routines over a borrowed graph.
pub struct TaskScheduler<'a> {
    graph: &'a TaskGraph,
}

impl<'a> TaskScheduler<'a> {
    pub fn new(graph: &'a TaskGraph) -> Self {
        Self { graph }
    }

    /// Phase ids in dependency order.
    ///
    /// Topological order over phase dependencies; ready phases are taken in
    /// declaration-index order. If phase declarations are cyclic the
    /// remaining phases are appended in index order with a diagnostic.
    pub fn phase_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let mut placed: HashSet<String> = HashSet::new();
        let mut remaining: Vec<&crate::phase::Phase> = self.graph.phases().iter().collect();

        while !remaining.is_empty() {
            // `remaining` stays in declaration order, so each ready round
            // comes out index-sorted for free.
            let ready: Vec<String> = remaining
                .iter()
                .filter(|p| {
                    p.depends_on
                        .iter()
                        .all(|dep| placed.contains(dep) || self.graph.phase(dep).is_none())
                })
                .map(|p| p.id.clone())
                .collect();

            if ready.is_empty() {
                warn!(
                    stuck = remaining.len(),
                    "phase dependencies are cyclic; appending remaining phases in declaration order"
                );
                for phase in &remaining {
                    order.push(phase.id.clone());
                }
                break;
            }

            for id in ready {
                placed.insert(id.clone());
                order.push(id);
            }
            remaining.retain(|p| !placed.contains(&p.id));
        }

        order
    }

    /// Execution order for the tasks of one phase.
    ///
    /// Rounds of ready tasks (every same-phase dependency already scheduled;
    /// cross-phase dependencies are assumed satisfied by phase ordering),
    /// each round sorted by priority descending then estimated effort
    /// ascending. A stuck round appends the remaining tasks in declaration
    /// order; the scheduler must never hang.
    pub fn task_order(&self, phase_id: &str) -> Vec<String> {
        let phase_tasks: Vec<&Task> = self.graph.tasks_in_phase(phase_id);
        let in_phase: HashSet<&str> = phase_tasks.iter().map(|t| t.id.as_str()).collect();

        let mut order: Vec<String> = Vec::new();
        let mut scheduled: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&Task> = phase_tasks;

        while !remaining.is_empty() {
            let mut ready: Vec<&Task> = remaining
                .iter()
                .filter(|t| {
                    t.depends_on.iter().all(|dep| {
                        scheduled.contains(dep.as_str()) || !in_phase.contains(dep.as_str())
                    })
                })
                .copied()
                .collect();

            if ready.is_empty() {
                warn!(
                    phase = %phase_id,
                    stuck = remaining.len(),
                    "no ready tasks; appending remaining tasks in declaration order"
                );
                for task in &remaining {
                    order.push(task.id.clone());
                }
                break;
            }

            ready.sort_by(|a, b| {
                b.priority.cmp(&a.priority).then(
                    a.estimated_effort
                        .partial_cmp(&b.estimated_effort)
                        .unwrap_or(Ordering::Equal),
                )
            });

            for task in &ready {
                order.push(task.id.clone());
                scheduled.insert(task.id.as_str());
            }
            remaining.retain(|t| !scheduled.contains(t.id.as_str()));
        }

        order
    }

    /// The most expensive dependency chain in the whole graph.
    ///
    /// `cost(t) = effort(t) + max(cost(dep))`, memoized by id. Reporting
    /// only; execution order never consults this.
    pub fn critical_path(&self) -> CriticalPath {
        let mut memo: HashMap<String, f64> = HashMap::new();
        for task in self.graph.tasks() {
            self.cost(&task.id, &mut memo);
        }

        // Global maximum; declaration order breaks ties.
        let Some(end) = self
            .graph
            .tasks()
            .iter()
            .max_by(|a, b| {
                let ca = memo.get(&a.id).copied().unwrap_or(0.0);
                let cb = memo.get(&b.id).copied().unwrap_or(0.0);
                ca.partial_cmp(&cb).unwrap_or(Ordering::Equal)
            })
        else {
            return CriticalPath {
                task_ids: Vec::new(),
                total_cost: 0.0,
            };
        };

        let total_cost = memo.get(&end.id).copied().unwrap_or(0.0);

        // Walk backward following the most expensive dependency.
        let mut path = vec![end.id.clone()];
        let mut current = end;
        loop {
            let next = current
                .depends_on
                .iter()
                .filter_map(|dep| self.graph.task(dep))
                .max_by(|a, b| {
                    let ca = memo.get(&a.id).copied().unwrap_or(0.0);
                    let cb = memo.get(&b.id).copied().unwrap_or(0.0);
                    ca.partial_cmp(&cb).unwrap_or(Ordering::Equal)
                });
            match next {
                Some(task) => {
                    path.push(task.id.clone());
                    current = task;
                }
                None => break,
            }
        }

        path.reverse();
        CriticalPath {
            task_ids: path,
            total_cost,
        }
    }

    fn cost(&self, id: &str, memo: &mut HashMap<String, f64>) -> f64 {
        if let Some(&c) = memo.get(id) {
            return c;
        }
        let Some(task) = self.graph.task(id) else {
            return 0.0;
        };
        // The graph is acyclic after repair, so this recursion terminates.
        let deps_max = task
            .depends_on
            .iter()
            .map(|dep| self.cost(dep, memo))
            .fold(0.0_f64, f64::max);
        let c = task.estimated_effort + deps_max;
        memo.insert(id.to_string(), c);
        c
    }

    /// Candidate groups for concurrent execution within a phase.
    ///
    /// Greedy first-fit over the execution order: a task joins the first
    /// group where it shares no direct dependency edge with any member.
    /// Reported as metadata; the orchestrator runs tasks sequentially.
    pub fn parallel_groups(&self, phase_id: &str) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = Vec::new();

        for id in self.task_order(phase_id) {
            let Some(task) = self.graph.task(&id) else {
                continue;
            };
            let slot = groups.iter().position(|group| {
                group.iter().all(|member| {
                    self.graph
                        .task(member)
                        .map(|m| !task.shares_edge_with(m))
                        .unwrap_or(true)
                })
            });
            match slot {
                Some(i) => groups[i].push(id),
                None => groups.push(vec![id]),
            }
        }

        groups
    }

    /// Whether a task may run right now.
    ///
    /// True iff the task is not already completed and every dependency is
    /// either completed or lives in a different, fully completed phase.
    pub fn can_execute(
        &self,
        task_id: &str,
        completed_tasks: &HashSet<String>,
        completed_phases: &HashSet<String>,
    ) -> bool {
        let Some(task) = self.graph.task(task_id) else {
            return false;
        };
        if completed_tasks.contains(&task.id) {
            return false;
        }

        task.depends_on.iter().all(|dep| {
            if completed_tasks.contains(dep) {
                return true;
            }
            match self.graph.task(dep) {
                Some(d) => d.phase_id != task.phase_id && completed_phases.contains(&d.phase_id),
                None => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::TaskGraphBuilder;
    use crate::phase::RawPhaseDeclaration;
    use crate::task::{RawTaskDeclaration, TaskPriority};

    fn phase_decl(name: &str, deps: Vec<&str>) -> RawPhaseDeclaration {
        RawPhaseDeclaration::new(name, deps.into_iter().map(String::from).collect())
    }

    fn task_decl(name: &str, phase: &str, deps: Vec<&str>) -> RawTaskDeclaration {
        RawTaskDeclaration::new(name, phase, deps.into_iter().map(String::from).collect())
    }

    #[test]
    fn test_task_order_respects_dependencies() {
        let graph = TaskGraphBuilder::new(
            vec![phase_decl("core", vec![])],
            vec![
                task_decl("c", "core", vec!["b"]),
                task_decl("b", "core", vec!["a"]),
                task_decl("a", "core", vec![]),
            ],
        )
        .build();
        let order = TaskScheduler::new(&graph).task_order("p-01");

        // a (t-003) before b (t-002) before c (t-001).
        assert_eq!(order, vec!["t-003", "t-002", "t-001"]);
    }

    #[test]
    fn test_task_order_priority_then_effort() {
        let graph = TaskGraphBuilder::new(
            vec![phase_decl("core", vec![])],
            vec![
                task_decl("slow low", "core", vec![])
                    .with_priority(TaskPriority::Low)
                    .with_effort(5.0),
                task_decl("slow high", "core", vec![])
                    .with_priority(TaskPriority::High)
                    .with_effort(5.0),
                task_decl("fast high", "core", vec![])
                    .with_priority(TaskPriority::High)
                    .with_effort(1.0),
            ],
        )
        .build();
        let order = TaskScheduler::new(&graph).task_order("p-01");

        // High before low; within high, smaller effort first.
        assert_eq!(order, vec!["t-003", "t-002", "t-001"]);
    }

    #[test]
    fn test_task_order_never_hangs_on_unsatisfiable_dependency() {
        // "b" depends on a task in the same phase that was dropped during
        // name resolution, leaving it permanently unready in round terms.
        let graph = TaskGraphBuilder::new(
            vec![phase_decl("core", vec![])],
            vec![
                task_decl("a", "core", vec![]),
                task_decl("b", "core", vec!["a"]),
            ],
        )
        .build();

        // Simulate the residual case directly: give b a dependency on an id
        // in its own phase that is not orderable before it.
        let (phases, mut tasks) = graph.into_parts();
        tasks[1].depends_on = vec!["t-002".to_string()]; // self edge survives reload
        let graph = TaskGraph::from_resolved(phases, tasks);

        let order = TaskScheduler::new(&graph).task_order("p-01");
        assert_eq!(order.len(), 2);
        assert_eq!(order[0], "t-001");
        assert_eq!(order[1], "t-002"); // appended, not dropped
    }

    #[test]
    fn test_cross_phase_dependencies_assumed_satisfied() {
        let graph = TaskGraphBuilder::new(
            vec![phase_decl("core", vec![]), phase_decl("polish", vec!["core"])],
            vec![
                task_decl("base", "core", vec![]),
                task_decl("doc", "polish", vec!["base"]),
            ],
        )
        .build();
        let order = TaskScheduler::new(&graph).task_order("p-02");
        assert_eq!(order, vec!["t-002"]);
    }

    #[test]
    fn test_critical_path_chain() {
        let graph = TaskGraphBuilder::new(
            vec![phase_decl("core", vec![])],
            vec![
                task_decl("a", "core", vec![]).with_effort(1.0),
                task_decl("b", "core", vec!["a"]).with_effort(2.0),
                task_decl("c", "core", vec!["b"]).with_effort(3.0),
                task_decl("side", "core", vec![]).with_effort(4.0),
            ],
        )
        .build();
        let path = TaskScheduler::new(&graph).critical_path();

        assert_eq!(path.task_ids, vec!["t-001", "t-002", "t-003"]);
        assert_eq!(path.total_cost, 6.0);
    }

    #[test]
    fn test_critical_path_picks_heavier_branch() {
        let graph = TaskGraphBuilder::new(
            vec![phase_decl("core", vec![])],
            vec![
                task_decl("light", "core", vec![]).with_effort(1.0),
                task_decl("heavy", "core", vec![]).with_effort(10.0),
                task_decl("join", "core", vec!["light", "heavy"]).with_effort(1.0),
            ],
        )
        .build();
        let path = TaskScheduler::new(&graph).critical_path();

        assert_eq!(path.task_ids, vec!["t-002", "t-003"]);
        assert_eq!(path.total_cost, 11.0);
    }

    #[test]
    fn test_critical_path_empty_graph() {
        let graph = TaskGraphBuilder::new(vec![], vec![]).build();
        let path = TaskScheduler::new(&graph).critical_path();
        assert!(path.task_ids.is_empty());
        assert_eq!(path.total_cost, 0.0);
    }

    #[test]
    fn test_parallel_groups_independent_tasks_share_group() {
        let graph = TaskGraphBuilder::new(
            vec![phase_decl("core", vec![])],
            vec![
                task_decl("a", "core", vec![]),
                task_decl("b", "core", vec![]),
                task_decl("c", "core", vec!["a"]),
            ],
        )
        .build();
        let groups = TaskScheduler::new(&graph).parallel_groups("p-01");

        // a and b are independent; c shares an edge with a.
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec!["t-001", "t-002"]);
        assert_eq!(groups[1], vec!["t-003"]);
    }

    #[test]
    fn test_phase_order_topological_with_index_ties() {
        let graph = TaskGraphBuilder::new(
            vec![
                phase_decl("late", vec!["base"]),
                phase_decl("base", vec![]),
                phase_decl("also base", vec![]),
            ],
            vec![],
        )
        .build();
        let order = TaskScheduler::new(&graph).phase_order();

        // Both root phases come first, in declaration order.
        assert_eq!(order, vec!["p-02", "p-03", "p-01"]);
    }

    #[test]
    fn test_phase_order_cyclic_fallback() {
        let graph = TaskGraphBuilder::new(
            vec![phase_decl("x", vec!["y"]), phase_decl("y", vec!["x"])],
            vec![],
        )
        .build();
        let order = TaskScheduler::new(&graph).phase_order();

        assert_eq!(order, vec!["p-01", "p-02"]);
    }

    #[test]
    fn test_can_execute() {
        let graph = TaskGraphBuilder::new(
            vec![phase_decl("core", vec![]), phase_decl("polish", vec!["core"])],
            vec![
                task_decl("base", "core", vec![]),
                task_decl("next", "core", vec!["base"]),
                task_decl("doc", "polish", vec!["base"]),
            ],
        )
        .build();
        let scheduler = TaskScheduler::new(&graph);

        let none: HashSet<String> = HashSet::new();
        let base_done: HashSet<String> = ["t-001".to_string()].into();
        let core_done: HashSet<String> = ["p-01".to_string()].into();

        // No dependencies: runnable immediately.
        assert!(scheduler.can_execute("t-001", &none, &none));
        // Same-phase dependency unmet.
        assert!(!scheduler.can_execute("t-002", &none, &none));
        assert!(scheduler.can_execute("t-002", &base_done, &none));
        // Cross-phase dependency satisfied by a fully completed phase.
        assert!(scheduler.can_execute("t-003", &none, &core_done));
        assert!(!scheduler.can_execute("t-003", &none, &none));
        // Already completed tasks are never runnable again.
        assert!(!scheduler.can_execute("t-001", &base_done, &none));
        // Unknown ids are never runnable.
        assert!(!scheduler.can_execute("t-099", &none, &none));
    }
}
