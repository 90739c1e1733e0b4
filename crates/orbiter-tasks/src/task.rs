//! Task types and definitions

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use orbiter_remote::RemoteError;
use serde::{Deserialize, Serialize};

use crate::cache::CacheError;

/// Lifecycle state of a task.
///
/// Transitions are `Pending -> Running -> {Success, Failure}` and
/// `Pending -> Skipped`; a terminal state never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting on dependencies or a free slot
    Pending,
    /// Body is executing
    Running,
    /// Body returned successfully
    Success,
    /// Body returned an error
    Failure,
    /// Never executed because a dependency did not succeed
    Skipped,
}

impl TaskState {
    /// Whether the state can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Skipped)
    }

    /// Whether dependents of a task in this state must be skipped
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failure | Self::Skipped)
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful task body produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    /// Output lines worth surfacing (e.g. remote command output)
    pub lines: Vec<String>,
    /// Whether the result was materialized from a cache
    pub cached: bool,
}

impl TaskOutput {
    /// Output with nothing to report
    pub fn empty() -> Self {
        Self::default()
    }

    /// Output served from a cache
    pub fn cached() -> Self {
        Self {
            lines: Vec::new(),
            cached: true,
        }
    }

    /// Output carrying lines
    pub fn with_lines(lines: Vec<String>) -> Self {
        Self {
            lines,
            cached: false,
        }
    }
}

/// Typed failure of a task body
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Remote shell operation failed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Cache store failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Local IO failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Domain failure reported by the task itself
    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    /// Create a domain failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A named unit of work.
///
/// Bodies are expected to be idempotent; the scheduler runs each at most once
/// per run and never retries.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable name within a run
    fn name(&self) -> &str;

    /// One-line description of what the task does, for plans and logs
    fn describe(&self) -> String {
        self.name().to_string()
    }

    /// Run the body
    async fn execute(&self) -> Result<TaskOutput, TaskError>;
}

/// Task whose body is a closure returning a future
pub struct FnTask<F> {
    name: String,
    body: F,
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}

/// Build a task from a name and an async closure
pub fn task_fn<F, Fut>(name: impl Into<String>, body: F) -> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send,
{
    FnTask {
        name: name.into(),
        body,
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, TaskError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        (self.body)().await
    }
}
