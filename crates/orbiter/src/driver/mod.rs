//! Run driver: turns artifacts into a task graph over a remote target

pub mod action;
pub mod compiler;
pub mod context;
pub mod graph;
pub mod tasks;

pub use action::collect_actions;
pub use context::RunContext;
pub use graph::build_graph;
