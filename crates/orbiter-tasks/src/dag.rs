//! Task graph construction

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::task::Task;

/// Index of a task inside the [`TaskGraph`] that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(usize);

impl TaskHandle {
    /// Insertion position of the task
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A node in the task graph
#[derive(Clone)]
pub(crate) struct TaskNode {
    pub(crate) task: Arc<dyn Task>,
    /// Tasks that must succeed before this one, in edge order
    pub(crate) dependencies: Vec<TaskHandle>,
    /// Tasks waiting on this one
    pub(crate) dependents: Vec<TaskHandle>,
}

/// All tasks of one run and their after-success edges.
///
/// Tasks are de-duplicated by name and the relation is kept acyclic at
/// edge-construction time, so a built graph can always be executed.
#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    by_name: HashMap<String, TaskHandle>,
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.nodes.iter().map(|n| n.task.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl TaskGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. A task with the same name already present wins and its
    /// handle is returned.
    pub fn add<T: Task + 'static>(&mut self, task: T) -> TaskHandle {
        self.add_shared(Arc::new(task))
    }

    /// Add a shared task, de-duplicating by name
    pub fn add_shared(&mut self, task: Arc<dyn Task>) -> TaskHandle {
        if let Some(existing) = self.by_name.get(task.name()) {
            debug!(task = task.name(), "task already in graph");
            return *existing;
        }
        let handle = TaskHandle(self.nodes.len());
        self.by_name.insert(task.name().to_string(), handle);
        self.nodes.push(TaskNode {
            task,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        });
        handle
    }

    /// Make `task` run only after `dependency` succeeded.
    ///
    /// Fails with [`DagError::CyclicDependency`] naming the cycle when
    /// `dependency` already depends on `task`, directly or transitively.
    pub fn after_success(&mut self, task: TaskHandle, dependency: TaskHandle) -> Result<(), DagError> {
        self.check(task)?;
        self.check(dependency)?;

        if self.nodes[task.0].dependencies.contains(&dependency) {
            return Ok(());
        }
        if let Some(path) = self.path_between(dependency, task) {
            let mut names = vec![self.name(task).to_string()];
            names.extend(path.iter().map(|h| self.name(*h).to_string()));
            return Err(DagError::CyclicDependency(names.join(" -> ")));
        }

        self.nodes[task.0].dependencies.push(dependency);
        self.nodes[dependency.0].dependents.push(task);
        Ok(())
    }

    fn check(&self, handle: TaskHandle) -> Result<(), DagError> {
        if handle.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(DagError::UnknownTask(handle.0))
        }
    }

    /// Dependency path from `from` to `to` (inclusive), following
    /// dependency edges
    fn path_between(&self, from: TaskHandle, to: TaskHandle) -> Option<Vec<TaskHandle>> {
        let mut stack = vec![vec![from]];
        let mut seen = BTreeSet::new();
        while let Some(path) = stack.pop() {
            let Some(&current) = path.last() else {
                continue;
            };
            if current == to {
                return Some(path);
            }
            if !seen.insert(current) {
                continue;
            }
            for dep in &self.nodes[current.0].dependencies {
                let mut next = path.clone();
                next.push(*dep);
                stack.push(next);
            }
        }
        None
    }

    /// Look up a task by name
    pub fn handle(&self, name: &str) -> Option<TaskHandle> {
        self.by_name.get(name).copied()
    }

    /// Name of a task
    pub fn name(&self, handle: TaskHandle) -> &str {
        self.nodes[handle.0].task.name()
    }

    /// Direct dependencies of a task
    pub fn dependencies(&self, handle: TaskHandle) -> &[TaskHandle] {
        &self.nodes[handle.0].dependencies
    }

    /// Get the total number of tasks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Topological order, ties broken by insertion order (Kahn's algorithm)
    #[instrument(skip_all, fields(node_count = self.nodes.len()))]
    pub fn sorted(&self) -> Vec<TaskHandle> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = ready.pop_first() {
            sorted.push(TaskHandle(idx));
            for dependent in &self.nodes[idx].dependents {
                let degree = &mut in_degree[dependent.0];
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert(dependent.0);
                }
            }
        }
        sorted
    }

    /// Execution waves: a task sits one wave after its latest dependency
    pub fn waves(&self) -> Vec<Vec<TaskHandle>> {
        let mut wave_of = vec![0usize; self.nodes.len()];
        let mut waves: Vec<Vec<TaskHandle>> = Vec::new();

        for handle in self.sorted() {
            let wave = self.nodes[handle.0]
                .dependencies
                .iter()
                .map(|d| wave_of[d.0] + 1)
                .max()
                .unwrap_or(0);
            wave_of[handle.0] = wave;
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(handle);
        }
        waves
    }

    /// Get a human-readable summary of the execution plan
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, wave) in self.waves().iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} tasks):\n", i, wave.len()));
            for handle in wave {
                let node = &self.nodes[handle.0];
                let deps: Vec<&str> = node.dependencies.iter().map(|d| self.name(*d)).collect();
                if deps.is_empty() {
                    plan.push_str(&format!("  {} -> {}\n", node.task.name(), node.task.describe()));
                } else {
                    plan.push_str(&format!(
                        "  {} -> {} (after: {})\n",
                        node.task.name(),
                        node.task.describe(),
                        deps.join(", ")
                    ));
                }
            }
        }
        plan
    }

    pub(crate) fn into_nodes(self) -> Vec<TaskNode> {
        self.nodes
    }
}

/// Errors during graph construction
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// Edge would close a cycle
    #[error("Cyclic dependency detected: {0}")]
    CyclicDependency(String),

    /// Handle does not belong to this graph
    #[error("Task handle {0} does not belong to this graph")]
    UnknownTask(usize),
}
