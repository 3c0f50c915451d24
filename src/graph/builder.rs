//! Task graph builder: name resolution and cycle repair.
//!
//! Task declarations arrive in batches from the generation agent before ids
//! exist, so dependencies are declared by display name. The builder assigns
//! ids, resolves names within the batch, and repairs dependency cycles.
//!
//! Resolution and repair are soft: an unresolvable name is dropped with a
//! diagnostic and the task keeps its remaining constraints; a cycle is broken
//! by removing the last dependency edge of the task under visit that closed
//! it. That policy is deliberately pragmatic, not a minimum-feedback-arc-set
//! solution: it guarantees termination and an acyclic result, not a "best"
//! one. Builds must never stop on malformed agent output.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::phase::{Phase, RawPhaseDeclaration};
use crate::task::{RawTaskDeclaration, Task};

/// A validated, cycle-free dependency graph of tasks and phases.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    phases: Vec<Phase>,
    task_index: HashMap<String, usize>,
    phase_index: HashMap<String, usize>,
}

impl TaskGraph {
    /// All tasks in declaration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// All phases in declaration order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Get a task by id.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.task_index.get(id).map(|&i| &self.tasks[i])
    }

    /// Get a mutable task by id.
    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        let idx = *self.task_index.get(id)?;
        self.tasks.get_mut(idx)
    }

    /// Get a phase by id.
    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phase_index.get(id).map(|&i| &self.phases[i])
    }

    /// Get a mutable phase by id.
    pub fn phase_mut(&mut self, id: &str) -> Option<&mut Phase> {
        let idx = *self.phase_index.get(id)?;
        self.phases.get_mut(idx)
    }

    /// Tasks belonging to a phase, in declaration order.
    pub fn tasks_in_phase(&self, phase_id: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.phase_id == phase_id)
            .collect()
    }

    /// Check the dependency relation is acyclic (Kahn's algorithm).
    pub fn is_acyclic(&self) -> bool {
        let mut in_degree: HashMap<&str, usize> = self
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), t.depends_on.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in &self.tasks {
            for dep in &task.depends_on {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(task.id.as_str());
            }
        }

        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut processed = 0;

        while let Some(id) = queue.pop() {
            processed += 1;
            if let Some(deps) = dependents.get(id) {
                for &dependent in deps {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push(dependent);
                        }
                    }
                }
            }
        }

        processed == self.tasks.len()
    }

    /// Rebuild the inner tasks/phases from already-resolved values (plan
    /// reload path). Dependencies must already be ids.
    pub fn from_resolved(phases: Vec<Phase>, tasks: Vec<Task>) -> Self {
        let task_index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        let phase_index = phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        Self {
            tasks,
            phases,
            task_index,
            phase_index,
        }
    }

    /// Consume the graph into its phases and tasks.
    pub fn into_parts(self) -> (Vec<Phase>, Vec<Task>) {
        (self.phases, self.tasks)
    }
}

/// Builder turning raw declarations into a validated `TaskGraph`.
pub struct TaskGraphBuilder {
    phase_decls: Vec<RawPhaseDeclaration>,
    task_decls: Vec<RawTaskDeclaration>,
}

impl TaskGraphBuilder {
    /// Create a builder from one generation batch.
    pub fn new(phase_decls: Vec<RawPhaseDeclaration>, task_decls: Vec<RawTaskDeclaration>) -> Self {
        Self {
            phase_decls,
            task_decls,
        }
    }

    /// Build the graph: assign ids, resolve names, repair cycles.
    ///
    /// Infallible by design; every problem is repaired or dropped with a
    /// logged diagnostic.
    pub fn build(self) -> TaskGraph {
        // Phase ids in declaration order; first declaration wins a name.
        let mut phases: Vec<Phase> = Vec::new();
        let mut phase_by_name: HashMap<String, String> = HashMap::new();
        for decl in &self.phase_decls {
            if phase_by_name.contains_key(&decl.name) {
                warn!(phase = %decl.name, "duplicate phase declaration ignored");
                continue;
            }
            let id = format!("p-{:02}", phases.len() + 1);
            phase_by_name.insert(decl.name.clone(), id.clone());
            phases.push(Phase {
                id,
                index: phases.len(),
                name: decl.name.clone(),
                task_ids: Vec::new(),
                depends_on: Vec::new(),
                status: Default::default(),
            });
        }

        // Resolve phase dependency names, using the winning declaration only.
        let mut resolved_phases: HashSet<String> = HashSet::new();
        for decl in &self.phase_decls {
            let Some(phase_id) = phase_by_name.get(&decl.name).cloned() else {
                continue;
            };
            if !resolved_phases.insert(phase_id.clone()) {
                continue;
            }
            let Some(phase) = phases.iter_mut().find(|p| p.id == phase_id) else {
                continue;
            };
            for dep_name in &decl.depends_on {
                match phase_by_name.get(dep_name) {
                    Some(dep_id) if *dep_id != phase.id => {
                        phase.depends_on.push(dep_id.clone());
                    }
                    Some(_) => {
                        warn!(phase = %decl.name, "dropping self-dependency on phase");
                    }
                    None => {
                        warn!(
                            phase = %decl.name,
                            dependency = %dep_name,
                            "unresolved phase dependency name dropped"
                        );
                    }
                }
            }
        }

        // Task ids in declaration order; first declaration wins a name.
        let mut name_to_id: HashMap<String, String> = HashMap::new();
        let mut tasks: Vec<Task> = Vec::new();
        for decl in &self.task_decls {
            let id = format!("t-{:03}", tasks.len() + 1);
            if name_to_id.contains_key(&decl.name) {
                warn!(
                    task = %decl.name,
                    "duplicate task name; dependency references resolve to the first declaration"
                );
            } else {
                name_to_id.insert(decl.name.clone(), id.clone());
            }

            let phase_id = match phase_by_name.get(&decl.phase) {
                Some(id) => id.clone(),
                None => {
                    // A task referencing an undeclared phase keeps its work:
                    // the phase is created implicitly.
                    warn!(task = %decl.name, phase = %decl.phase, "creating implicit phase");
                    let id = format!("p-{:02}", phases.len() + 1);
                    phase_by_name.insert(decl.phase.clone(), id.clone());
                    phases.push(Phase {
                        id: id.clone(),
                        index: phases.len(),
                        name: decl.phase.clone(),
                        task_ids: Vec::new(),
                        depends_on: Vec::new(),
                        status: Default::default(),
                    });
                    id
                }
            };

            tasks.push(Task {
                id,
                name: decl.name.clone(),
                phase_id,
                depends_on: Vec::new(), // resolved below, after all ids exist
                status: Default::default(),
                priority: decl.priority,
                estimated_effort: decl.estimated_effort,
                context_sections: decl.context_sections.clone(),
            });
        }

        // Resolve task dependency names to ids.
        for (task, decl) in tasks.iter_mut().zip(&self.task_decls) {
            for dep_name in &decl.depends_on {
                match name_to_id.get(dep_name) {
                    Some(dep_id) if *dep_id != task.id => {
                        task.depends_on.push(dep_id.clone());
                    }
                    Some(_) => {
                        warn!(task = %task.name, "dropping self-dependency");
                    }
                    None => {
                        warn!(
                            task = %task.name,
                            dependency = %dep_name,
                            "unresolved dependency name dropped"
                        );
                    }
                }
            }
        }

        // Populate phase task lists.
        for task in &tasks {
            if let Some(phase) = phases.iter_mut().find(|p| p.id == task.phase_id) {
                phase.task_ids.push(task.id.clone());
            }
        }

        let mut graph = TaskGraph::from_resolved(phases, tasks);
        repair_cycles(&mut graph);
        debug_assert!(graph.is_acyclic());
        graph
    }
}

/// DFS color state for cycle repair.
#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Remove dependency edges until the task relation is acyclic.
///
/// Depth-first search with an explicit stack; a back-edge (dependency on a
/// gray task) is a cycle, repaired by removing that edge from the task
/// currently being visited, then continuing the scan.
fn repair_cycles(graph: &mut TaskGraph) {
    let ids: Vec<String> = graph.tasks().iter().map(|t| t.id.clone()).collect();
    let mut colors: HashMap<String, Color> = ids.iter().map(|id| (id.clone(), Color::White)).collect();

    for root in &ids {
        if colors[root] != Color::White {
            continue;
        }

        // Stack of (task id, next dependency cursor).
        let mut stack: Vec<(String, usize)> = vec![(root.clone(), 0)];
        colors.insert(root.clone(), Color::Gray);

        while let Some((id, cursor)) = stack.pop() {
            let deps: Vec<String> = graph.task(&id).map(|t| t.depends_on.clone()).unwrap_or_default();

            if cursor >= deps.len() {
                colors.insert(id, Color::Black);
                continue;
            }

            let dep = deps[cursor].clone();
            match colors.get(&dep) {
                Some(Color::Gray) => {
                    // Back edge: this dependency closes a cycle. Drop it and
                    // re-visit the same cursor position (the vec shrank).
                    warn!(task = %id, dependency = %dep, "cycle detected; dropping dependency edge");
                    if let Some(task) = graph.task_mut(&id) {
                        task.depends_on.retain(|d| d != &dep);
                    }
                    stack.push((id, cursor));
                }
                Some(Color::White) => {
                    stack.push((id, cursor + 1));
                    colors.insert(dep.clone(), Color::Gray);
                    stack.push((dep, 0));
                }
                _ => {
                    // Black or unknown id: nothing to do.
                    stack.push((id, cursor + 1));
                }
            }
        }
    }
}
