//! Orbiter Remote - primitives over a restricted remote shell
//!
//! The target is reachable only through a line-oriented shell transport with
//! no recursive `mkdir`, no batching and no transactions. [`RemoteShell`]
//! builds idempotent directory creation, listing, file transfer, removal and
//! timed command execution on top of any [`ShellTransport`].

pub mod error;
pub mod memory;
pub mod path_cache;
pub mod readiness;
pub mod shell;
pub mod transport;

pub use error::RemoteError;
pub use memory::{CommandResponse, MemoryTransport};
pub use path_cache::RemotePathCache;
pub use shell::{parent_dir, RemoteShell};
pub use transport::{AdbTransport, ExecOutput, ShellTransport};
