//! CLI commands

mod cache;
mod doctor;
mod init;
mod plan;
mod run;

pub use cache::CacheCommand;
pub use doctor::DoctorCommand;
pub use init::InitCommand;
pub use plan::PlanCommand;
pub use run::{RunCommand, RunError};
