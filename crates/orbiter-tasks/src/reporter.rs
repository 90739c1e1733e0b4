//! Task execution reporting

use std::sync::Arc;
use std::time::Duration;

/// Events emitted during task execution
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task is starting execution
    Started {
        name: String,
        description: String,
    },
    /// A task produced output
    Output {
        name: String,
        line: String,
    },
    /// A task completed successfully
    Completed {
        name: String,
        duration: Duration,
        cached: bool,
    },
    /// A task failed
    Failed {
        name: String,
        duration: Duration,
        error: String,
    },
    /// A task was skipped without executing
    Skipped {
        name: String,
        reason: String,
    },
    /// All tasks reached a terminal state
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        cached: usize,
        duration: Duration,
    },
}

impl TaskEvent {
    /// Task the event belongs to, if any
    pub fn task_name(&self) -> Option<&str> {
        match self {
            Self::Started { name, .. }
            | Self::Output { name, .. }
            | Self::Completed { name, .. }
            | Self::Failed { name, .. }
            | Self::Skipped { name, .. } => Some(name),
            Self::AllCompleted { .. } => None,
        }
    }
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { name, description } => {
                tracing::info!(task = %name, "starting: {}", description);
            }
            TaskEvent::Output { name, line } => {
                tracing::debug!(task = %name, "{}", line);
            }
            TaskEvent::Completed {
                name,
                duration,
                cached,
            } => {
                tracing::info!(
                    task = %name,
                    cached,
                    duration_secs = duration.as_secs_f64(),
                    "task completed"
                );
            }
            TaskEvent::Failed {
                name,
                duration,
                error,
            } => {
                tracing::error!(
                    task = %name,
                    duration_secs = duration.as_secs_f64(),
                    "task failed: {}",
                    error
                );
            }
            TaskEvent::Skipped { name, reason } => {
                tracing::info!(task = %name, "task skipped: {}", reason);
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                cached,
                duration,
            } => {
                tracing::info!(
                    total,
                    succeeded,
                    failed,
                    skipped,
                    cached,
                    duration_secs = duration.as_secs_f64(),
                    "all tasks complete"
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: std::sync::Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Names of tasks that reported `Started`, in order
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Started { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// Registry of task reporters, itself a reporter that broadcasts
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    /// Registry holding a [`TracingReporter`]
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    /// Registry with no reporters
    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    pub fn register_shared(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        self.broadcast(event);
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
