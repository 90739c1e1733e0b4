//! Task scheduler: bounded-parallel executor using tokio

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::dag::{TaskGraph, TaskNode};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{TaskError, TaskOutput, TaskState};

/// Result of a single task
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// Task name
    pub name: String,
    /// Terminal state
    pub state: TaskState,
    /// How long the body ran (zero when skipped)
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    /// Failure message or skip reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Lines the body reported
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
    /// Whether the result came from a cache
    pub cached: bool,
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl TaskResult {
    fn skipped(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            state: TaskState::Skipped,
            duration: Duration::ZERO,
            reason: Some(reason),
            output: Vec::new(),
            cached: false,
        }
    }
}

/// Aggregate outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Every task, in insertion order
    pub results: Vec<TaskResult>,
    /// Wall-clock duration of the run
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    /// Whether the run was aborted before every task could start
    pub aborted: bool,
}

impl RunReport {
    /// Success only if every task succeeded
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.state == TaskState::Success)
    }

    /// Every task that did not succeed
    pub fn non_success(&self) -> Vec<&TaskResult> {
        self.results
            .iter()
            .filter(|r| r.state != TaskState::Success)
            .collect()
    }

    /// Look up a task result by name
    pub fn get(&self, name: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Number of tasks in `state`
    pub fn count(&self, state: TaskState) -> usize {
        self.results.iter().filter(|r| r.state == state).count()
    }

    /// Number of successful tasks served from a cache
    pub fn cached(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.state == TaskState::Success && r.cached)
            .count()
    }
}

/// Options for the task scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum concurrent tasks
    pub concurrency: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus(),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

type Completion = (usize, Result<TaskOutput, TaskError>, Duration);

/// Executes a [`TaskGraph`] with bounded parallelism.
///
/// A task starts once every dependency succeeded and a slot is free; it is
/// skipped as soon as any dependency failed or was skipped. Among ready
/// tasks, insertion order decides who starts first.
pub struct TaskScheduler {
    options: SchedulerOptions,
    reporter: Arc<dyn TaskReporter>,
}

impl TaskScheduler {
    /// Create a new scheduler
    pub fn new(options: SchedulerOptions, reporter: Arc<dyn TaskReporter>) -> Self {
        Self { options, reporter }
    }

    /// Execute every task in the graph
    pub async fn execute(&self, graph: TaskGraph) -> RunReport {
        self.execute_until(graph, std::future::pending()).await
    }

    /// Execute the graph until done or until `abort` resolves.
    ///
    /// On abort no further task starts, every pending task is skipped with
    /// reason "run aborted" and in-flight tasks are awaited.
    #[instrument(skip_all, fields(tasks = graph.len(), concurrency = self.options.concurrency))]
    pub async fn execute_until<A>(&self, graph: TaskGraph, abort: A) -> RunReport
    where
        A: Future<Output = ()>,
    {
        let start = Instant::now();
        let nodes = graph.into_nodes();
        let mut states = vec![TaskState::Pending; nodes.len()];
        let mut results: Vec<Option<TaskResult>> = (0..nodes.len()).map(|_| None).collect();
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut running: JoinSet<Completion> = JoinSet::new();
        let mut aborted = false;
        let mut supervisor_error = None;
        tokio::pin!(abort);

        loop {
            self.advance(&nodes, &mut states, &mut results, &semaphore, &mut running, aborted);

            if running.is_empty() {
                let reason = supervisor_error
                    .take()
                    .unwrap_or_else(|| "task supervisor failed".to_string());
                if self.fail_orphans(&nodes, &mut states, &mut results, &reason) {
                    continue;
                }
                break;
            }

            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Ok((idx, outcome, duration))) => {
                        self.finish(&nodes[idx], idx, outcome, duration, &mut states, &mut results);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "task supervisor failed");
                        supervisor_error = Some(format!("task supervisor failed: {}", e));
                    }
                    None => {}
                },
                _ = &mut abort, if !aborted => {
                    warn!(in_flight = running.len(), "run aborted, waiting for in-flight tasks");
                    aborted = true;
                }
            }
        }

        let results: Vec<TaskResult> = results
            .into_iter()
            .zip(&nodes)
            .map(|(result, node)| {
                result.unwrap_or_else(|| TaskResult {
                    name: node.task.name().to_string(),
                    state: TaskState::Failure,
                    duration: Duration::ZERO,
                    reason: Some("task did not report a result".to_string()),
                    output: Vec::new(),
                    cached: false,
                })
            })
            .collect();

        let report = RunReport {
            results,
            duration: start.elapsed(),
            aborted,
        };
        self.reporter.report(&TaskEvent::AllCompleted {
            total: report.results.len(),
            succeeded: report.count(TaskState::Success),
            failed: report.count(TaskState::Failure),
            skipped: report.count(TaskState::Skipped),
            cached: report.cached(),
            duration: report.duration,
        });
        info!(
            success = report.is_success(),
            duration_ms = report.duration.as_millis() as u64,
            "run finished"
        );
        report
    }

    /// Skip blocked tasks and start ready ones, in insertion order, until
    /// nothing changes
    fn advance(
        &self,
        nodes: &[TaskNode],
        states: &mut [TaskState],
        results: &mut [Option<TaskResult>],
        semaphore: &Arc<Semaphore>,
        running: &mut JoinSet<Completion>,
        aborted: bool,
    ) {
        let mut changed = true;
        while changed {
            changed = false;
            for (idx, node) in nodes.iter().enumerate() {
                if states[idx] != TaskState::Pending {
                    continue;
                }
                let name = node.task.name();

                let blocker = node
                    .dependencies
                    .iter()
                    .find(|d| states[d.index()].blocks_dependents());
                let reason = match (aborted, blocker) {
                    (true, _) => Some("run aborted".to_string()),
                    (false, Some(dep)) => Some(format!(
                        "dependency {} {}",
                        nodes[dep.index()].task.name(),
                        states[dep.index()]
                    )),
                    (false, None) => None,
                };
                if let Some(reason) = reason {
                    debug!(task = name, %reason, "skipping task");
                    self.reporter.report(&TaskEvent::Skipped {
                        name: name.to_string(),
                        reason: reason.clone(),
                    });
                    states[idx] = TaskState::Skipped;
                    results[idx] = Some(TaskResult::skipped(name, reason));
                    changed = true;
                    continue;
                }

                if !node
                    .dependencies
                    .iter()
                    .all(|d| states[d.index()] == TaskState::Success)
                {
                    continue;
                }
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    continue;
                };

                states[idx] = TaskState::Running;
                self.reporter.report(&TaskEvent::Started {
                    name: name.to_string(),
                    description: node.task.describe(),
                });
                let task = node.task.clone();
                running.spawn(async move {
                    let _permit = permit;
                    let started = Instant::now();
                    // nested spawn turns a panicking body into a failure
                    let outcome = match tokio::spawn(async move { task.execute().await }).await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(TaskError::failed(format!("task panicked: {}", e))),
                    };
                    (idx, outcome, started.elapsed())
                });
            }
        }
    }

    /// Fail every task still marked running once nothing is in flight.
    /// Their supervisors were lost, so no completion will ever arrive.
    /// Returns whether any task was failed.
    fn fail_orphans(
        &self,
        nodes: &[TaskNode],
        states: &mut [TaskState],
        results: &mut [Option<TaskResult>],
        reason: &str,
    ) -> bool {
        let mut failed = false;
        for (idx, node) in nodes.iter().enumerate() {
            if states[idx] != TaskState::Running {
                continue;
            }
            let name = node.task.name();
            self.reporter.report(&TaskEvent::Failed {
                name: name.to_string(),
                duration: Duration::ZERO,
                error: reason.to_string(),
            });
            states[idx] = TaskState::Failure;
            results[idx] = Some(TaskResult {
                name: name.to_string(),
                state: TaskState::Failure,
                duration: Duration::ZERO,
                reason: Some(reason.to_string()),
                output: Vec::new(),
                cached: false,
            });
            failed = true;
        }
        failed
    }

    fn finish(
        &self,
        node: &TaskNode,
        idx: usize,
        outcome: Result<TaskOutput, TaskError>,
        duration: Duration,
        states: &mut [TaskState],
        results: &mut [Option<TaskResult>],
    ) {
        let name = node.task.name().to_string();
        let result = match outcome {
            Ok(output) => {
                for line in &output.lines {
                    self.reporter.report(&TaskEvent::Output {
                        name: name.clone(),
                        line: line.clone(),
                    });
                }
                self.reporter.report(&TaskEvent::Completed {
                    name: name.clone(),
                    duration,
                    cached: output.cached,
                });
                TaskResult {
                    name,
                    state: TaskState::Success,
                    duration,
                    reason: None,
                    output: output.lines,
                    cached: output.cached,
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.reporter.report(&TaskEvent::Failed {
                    name: name.clone(),
                    duration,
                    error: message.clone(),
                });
                TaskResult {
                    name,
                    state: TaskState::Failure,
                    duration,
                    reason: Some(message),
                    output: Vec::new(),
                    cached: false,
                }
            }
        };
        states[idx] = result.state;
        results[idx] = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskHandle;
    use crate::reporter::CollectingReporter;
    use crate::task::task_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records which task bodies ran, in start order
    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn record(&self, name: &str) {
            self.0.lock().unwrap().push(name.to_string());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn ok_task(graph: &mut TaskGraph, journal: &Journal, name: &'static str) -> TaskHandle {
        let journal = journal.clone();
        graph.add(task_fn(name, move || {
            let journal = journal.clone();
            async move {
                journal.record(name);
                tokio::task::yield_now().await;
                Ok(TaskOutput::empty())
            }
        }))
    }

    fn failing_task(graph: &mut TaskGraph, journal: &Journal, name: &'static str) -> TaskHandle {
        let journal = journal.clone();
        graph.add(task_fn(name, move || {
            let journal = journal.clone();
            async move {
                journal.record(name);
                Err(TaskError::failed("adb: device offline"))
            }
        }))
    }

    fn scheduler(concurrency: usize) -> (TaskScheduler, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::default());
        (
            TaskScheduler::new(SchedulerOptions { concurrency }, reporter.clone()),
            reporter,
        )
    }

    #[test]
    fn test_scheduler_options_default() {
        assert!(SchedulerOptions::default().concurrency > 0);
    }

    #[tokio::test]
    async fn test_failed_install_skips_chain_without_running_it() {
        let journal = Journal::default();
        let mut graph = TaskGraph::new();
        let install = failing_task(&mut graph, &journal, "install");
        let compile = ok_task(&mut graph, &journal, "a:compile");
        let push = ok_task(&mut graph, &journal, "a:push");
        let run = ok_task(&mut graph, &journal, "a:run");
        graph.after_success(compile, install).unwrap();
        graph.after_success(push, compile).unwrap();
        graph.after_success(run, push).unwrap();

        let (scheduler, reporter) = scheduler(4);
        let report = scheduler.execute(graph).await;

        assert!(!report.is_success());
        assert_eq!(journal.entries(), vec!["install"]);
        assert_eq!(report.get("install").unwrap().state, TaskState::Failure);
        for name in ["a:compile", "a:push", "a:run"] {
            assert_eq!(report.get(name).unwrap().state, TaskState::Skipped);
        }
        assert_eq!(
            report.get("a:compile").unwrap().reason.as_deref(),
            Some("dependency install failure")
        );
        assert_eq!(
            report.get("a:push").unwrap().reason.as_deref(),
            Some("dependency a:compile skipped")
        );
        assert_eq!(report.non_success().len(), 4);
        assert_eq!(reporter.started(), vec!["install"]);
    }

    #[tokio::test]
    async fn test_chains_sharing_install_both_succeed() {
        let journal = Journal::default();
        let mut graph = TaskGraph::new();
        let install = ok_task(&mut graph, &journal, "install");
        for (compile, run) in [("a:compile", "a:run"), ("b:compile", "b:run")] {
            let c = ok_task(&mut graph, &journal, compile);
            let r = ok_task(&mut graph, &journal, run);
            graph.after_success(c, install).unwrap();
            graph.after_success(r, c).unwrap();
        }

        let (scheduler, _) = scheduler(2);
        let report = scheduler.execute(graph).await;

        assert!(report.is_success());
        assert_eq!(report.count(TaskState::Success), 5);
        let entries = journal.entries();
        assert_eq!(entries[0], "install");
        let pos = |n: &str| entries.iter().position(|e| e == n).unwrap();
        assert!(pos("a:compile") < pos("a:run"));
        assert!(pos("b:compile") < pos("b:run"));
    }

    #[tokio::test]
    async fn test_results_in_insertion_order() {
        let journal = Journal::default();
        let mut graph = TaskGraph::new();
        let run = ok_task(&mut graph, &journal, "run");
        let install = ok_task(&mut graph, &journal, "install");
        graph.after_success(run, install).unwrap();

        let (scheduler, _) = scheduler(1);
        let report = scheduler.execute(graph).await;

        let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["run", "install"]);
        assert_eq!(journal.entries(), vec!["install", "run"]);
    }

    #[tokio::test]
    async fn test_ready_tasks_start_in_insertion_order() {
        let journal = Journal::default();
        let mut graph = TaskGraph::new();
        for name in ["c", "a", "b"] {
            ok_task(&mut graph, &journal, name);
        }

        let (scheduler, reporter) = scheduler(1);
        scheduler.execute(graph).await;
        assert_eq!(reporter.started(), vec!["c", "a", "b"]);
        assert_eq!(journal.entries(), vec!["c", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut graph = TaskGraph::new();
        for i in 0..8 {
            let active = active.clone();
            let peak = peak.clone();
            graph.add(task_fn(format!("t{}", i), move || {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(TaskOutput::empty())
                }
            }));
        }

        let (scheduler, _) = scheduler(3);
        let report = scheduler.execute(graph).await;

        assert!(report.is_success());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let journal = Journal::default();
        let mut graph = TaskGraph::new();
        let bad = failing_task(&mut graph, &journal, "a:compile");
        let bad_run = ok_task(&mut graph, &journal, "a:run");
        let good = ok_task(&mut graph, &journal, "b:compile");
        let good_run = ok_task(&mut graph, &journal, "b:run");
        graph.after_success(bad_run, bad).unwrap();
        graph.after_success(good_run, good).unwrap();

        let (scheduler, _) = scheduler(4);
        let report = scheduler.execute(graph).await;

        assert_eq!(report.get("b:run").unwrap().state, TaskState::Success);
        assert_eq!(report.get("a:run").unwrap().state, TaskState::Skipped);
        let failed: Vec<&str> = report.non_success().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(failed, vec!["a:compile", "a:run"]);
    }

    #[tokio::test]
    async fn test_skip_waits_for_no_other_dependency() {
        // a task with one failed and one slow dependency is skipped at once
        let journal = Journal::default();
        let mut graph = TaskGraph::new();
        let slow = graph.add(task_fn("slow", || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(TaskOutput::empty())
        }));
        let bad = failing_task(&mut graph, &journal, "bad");
        let joined = ok_task(&mut graph, &journal, "joined");
        graph.after_success(joined, slow).unwrap();
        graph.after_success(joined, bad).unwrap();

        let (scheduler, reporter) = scheduler(4);
        let report = scheduler.execute(graph).await;
        assert_eq!(report.get("joined").unwrap().state, TaskState::Skipped);

        let events = reporter.events();
        let skipped_at = events
            .iter()
            .position(|e| matches!(e, TaskEvent::Skipped { name, .. } if name == "joined"))
            .unwrap();
        let slow_done_at = events
            .iter()
            .position(|e| matches!(e, TaskEvent::Completed { name, .. } if name == "slow"))
            .unwrap();
        assert!(skipped_at < slow_done_at);
    }

    #[tokio::test]
    async fn test_panicking_task_is_failure() {
        let journal = Journal::default();
        let mut graph = TaskGraph::new();
        let boom = graph.add(task_fn("boom", || async {
            if true {
                panic!("body exploded");
            }
            Ok(TaskOutput::empty())
        }));
        let after = ok_task(&mut graph, &journal, "after");
        graph.after_success(after, boom).unwrap();

        let (scheduler, _) = scheduler(2);
        let report = scheduler.execute(graph).await;

        let boom = report.get("boom").unwrap();
        assert_eq!(boom.state, TaskState::Failure);
        assert!(boom.reason.as_deref().unwrap().contains("panicked"));
        assert_eq!(report.get("after").unwrap().state, TaskState::Skipped);
    }

    #[tokio::test]
    async fn test_lost_supervisor_fails_task_and_skips_dependents() {
        let journal = Journal::default();
        let mut graph = TaskGraph::new();
        let push = ok_task(&mut graph, &journal, "a:push");
        let run = ok_task(&mut graph, &journal, "a:run");
        graph.after_success(run, push).unwrap();

        let (scheduler, reporter) = scheduler(2);
        let nodes = graph.into_nodes();
        let mut states = vec![TaskState::Running, TaskState::Pending];
        let mut results: Vec<Option<TaskResult>> = vec![None, None];
        let semaphore = Arc::new(Semaphore::new(2));
        let mut running: JoinSet<Completion> = JoinSet::new();

        assert!(scheduler.fail_orphans(&nodes, &mut states, &mut results, "task supervisor failed"));
        scheduler.advance(&nodes, &mut states, &mut results, &semaphore, &mut running, false);

        assert_eq!(states, vec![TaskState::Failure, TaskState::Skipped]);
        assert_eq!(
            results[1].as_ref().unwrap().reason.as_deref(),
            Some("dependency a:push failure")
        );
        assert!(running.is_empty());
        assert!(journal.entries().is_empty());
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, TaskEvent::Failed { name, .. } if name == "a:push")));
        assert!(!scheduler.fail_orphans(&nodes, &mut states, &mut results, "unused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_skips_pending_and_drains_in_flight() {
        let journal = Journal::default();
        let mut graph = TaskGraph::new();
        let long = graph.add(task_fn("long", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(TaskOutput::empty())
        }));
        let next = ok_task(&mut graph, &journal, "next");
        ok_task(&mut graph, &journal, "queued");
        graph.after_success(next, long).unwrap();

        let (scheduler, _) = scheduler(1);
        let report = scheduler
            .execute_until(graph, tokio::time::sleep(Duration::from_secs(1)))
            .await;

        assert!(report.aborted);
        assert_eq!(report.get("long").unwrap().state, TaskState::Success);
        for name in ["next", "queued"] {
            let result = report.get(name).unwrap();
            assert_eq!(result.state, TaskState::Skipped);
            assert_eq!(result.reason.as_deref(), Some("run aborted"));
        }
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_cached_output_is_reported() {
        let mut graph = TaskGraph::new();
        graph.add(task_fn("a:compile", || async { Ok(TaskOutput::cached()) }));
        graph.add(task_fn("a:run", || async {
            Ok(TaskOutput::with_lines(vec!["OK (1 test)".to_string()]))
        }));

        let (scheduler, reporter) = scheduler(2);
        let report = scheduler.execute(graph).await;

        assert_eq!(report.cached(), 1);
        assert_eq!(report.get("a:run").unwrap().output, vec!["OK (1 test)"]);
        assert!(reporter.events().iter().any(|e| matches!(
            e,
            TaskEvent::AllCompleted { total: 2, succeeded: 2, cached: 1, .. }
        )));
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, TaskEvent::Output { line, .. } if line == "OK (1 test)")));
    }

    #[tokio::test]
    async fn test_empty_graph_is_success() {
        let (scheduler, _) = scheduler(1);
        let report = scheduler.execute(TaskGraph::new()).await;
        assert!(report.is_success());
        assert!(report.results.is_empty());
    }

    #[test]
    fn test_report_serializes() {
        let report = RunReport {
            results: vec![TaskResult::skipped("a:run", "run aborted".to_string())],
            duration: Duration::from_millis(1500),
            aborted: true,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["duration"], 1.5);
        assert_eq!(json["results"][0]["state"], "skipped");
        assert_eq!(json["results"][0]["reason"], "run aborted");
    }
}
