//! Resources shared by the tasks of one run

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use orbiter_core::{Config, Profiler};
use orbiter_remote::RemoteShell;
use orbiter_tasks::{ContentCache, DeviceCacheStore, LocalCacheStore};

use super::action::Action;
use super::compiler::Compiler;

/// Where things live on the host and on the target
#[derive(Debug, Clone)]
pub struct RunLayout {
    /// Remote run directory, reset by `target:prepare`
    pub device_dir: String,
    /// Host directory for compiled artifacts
    pub work_dir: PathBuf,
    /// Host directory for retrieved files
    pub results_dir: PathBuf,
}

impl RunLayout {
    /// Remote directory of one action
    pub fn action_dir(&self, action: &Action) -> String {
        format!("{}/{}", self.device_dir.trim_end_matches('/'), action.name)
    }

    /// Remote path of the pushed artifact
    pub fn remote_artifact(&self, action: &Action) -> String {
        format!("{}/{}", self.action_dir(action), action.file_name())
    }

    /// Host path of the compiled artifact
    pub fn compiled(&self, action: &Action) -> PathBuf {
        self.work_dir.join(&action.name).join(action.file_name())
    }

    /// Host directory receiving an action's retrieved files
    pub fn results(&self, action: &Action) -> PathBuf {
        self.results_dir.join(&action.name)
    }
}

/// Deadlines applied by the driver's tasks
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub run: Duration,
    pub boot: Duration,
    pub file: Duration,
}

/// Everything a run's tasks share
pub struct RunContext {
    pub shell: RemoteShell,
    pub compiler: Arc<dyn Compiler>,
    pub profiler: Arc<dyn Profiler>,
    pub host_cache: Option<ContentCache>,
    pub device_cache: Option<ContentCache>,
    pub layout: RunLayout,
    pub timeouts: Timeouts,
    /// Command template, see `TargetConfig::run_command`
    pub run_command: String,
    /// Directory whose first entry signals a booted target
    pub ready_dir: String,
    /// Support files pushed by `target:install`
    pub install: Vec<PathBuf>,
    /// File each action leaves in its directory, relative to it
    pub result_file: Option<String>,
}

impl RunContext {
    /// Assemble the context from configuration. Relative host paths resolve
    /// against `root`.
    pub fn from_config(
        config: &Config,
        root: &Path,
        shell: RemoteShell,
        compiler: Arc<dyn Compiler>,
        use_cache: bool,
    ) -> Self {
        let caching = use_cache && config.cache.enabled;
        let host_cache = caching.then(|| {
            ContentCache::new(Arc::new(LocalCacheStore::new(root.join(&config.cache.dir))))
        });
        let device_cache = (caching && config.cache.device).then(|| {
            ContentCache::new(Arc::new(DeviceCacheStore::new(
                shell.clone(),
                config.cache.device_dir.clone(),
            )))
        });
        let work_dir = config
            .compile
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".orbiter/build"));

        Self {
            shell,
            compiler,
            profiler: config.profiler.build(),
            host_cache,
            device_cache,
            layout: RunLayout {
                device_dir: config.target.device_dir.clone(),
                work_dir: root.join(work_dir),
                results_dir: root.join(&config.results.dir),
            },
            timeouts: Timeouts {
                run: Duration::from_secs(config.timeouts.run_secs),
                boot: Duration::from_secs(config.timeouts.boot_secs),
                file: Duration::from_secs(config.timeouts.file_secs),
            },
            run_command: config.target.run_command.clone(),
            ready_dir: config.target.ready_dir.clone(),
            install: config
                .target
                .install
                .iter()
                .map(|p| root.join(p))
                .collect(),
            result_file: config.results.file.clone(),
        }
    }

    /// Remote files an action is expected to leave behind, relative names
    pub fn expected_files(&self) -> Vec<String> {
        self.result_file
            .iter()
            .cloned()
            .chain(self.profiler.output_file().map(str::to_string))
            .collect()
    }
}
