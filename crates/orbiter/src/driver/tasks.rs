//! Concrete tasks of a run

use std::sync::Arc;

use async_trait::async_trait;
use orbiter_remote::readiness::{non_empty, single_file};
use orbiter_tasks::{
    ArtifactLocation, CacheInput, CacheKey, ContentCache, Fingerprint, Task, TaskError, TaskOutput,
};
use tracing::{debug, info, instrument, warn};

use super::action::Action;
use super::context::RunContext;

/// Fingerprint `inputs`, treating an unavailable store as "no cache"
async fn cache_key(
    cache: Option<&ContentCache>,
    inputs: &[CacheInput],
) -> Result<Option<(ContentCache, CacheKey)>, TaskError> {
    let Some(cache) = cache else {
        return Ok(None);
    };
    match cache.fingerprint(inputs).await? {
        Fingerprint::Key(key) => Ok(Some((cache.clone(), key))),
        Fingerprint::Uncacheable => Ok(None),
    }
}

/// Record a fresh artifact; a failed insert only costs a future cache miss
async fn remember(cache: &ContentCache, key: &CacheKey, source: ArtifactLocation) {
    if let Err(e) = cache.insert(key, &source).await {
        warn!(error = %e, cache = %cache.describe(), "failed to record artifact in cache");
    }
}

/// Wait for the target to boot and reset the run directory
pub struct PrepareTarget {
    ctx: Arc<RunContext>,
}

impl PrepareTarget {
    pub const NAME: &'static str = "target:prepare";

    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Task for PrepareTarget {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        format!(
            "wait for {} then reset {}",
            self.ctx.ready_dir, self.ctx.layout.device_dir
        )
    }

    #[instrument(skip_all)]
    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        let shell = &self.ctx.shell;
        shell
            .wait_until(&self.ctx.ready_dir, self.ctx.timeouts.boot, non_empty())
            .await?;
        info!(target = %shell.describe(), "target ready");

        shell.remove(&self.ctx.layout.device_dir).await?;
        // anything memoized under the removed directory is gone now
        shell.path_cache().reset();
        shell.ensure_directory(&self.ctx.layout.device_dir).await?;
        Ok(TaskOutput::empty())
    }
}

/// Push the configured support files into the run directory
pub struct InstallSupport {
    ctx: Arc<RunContext>,
}

impl InstallSupport {
    pub const NAME: &'static str = "target:install";

    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Task for InstallSupport {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        format!("push {} support file(s)", self.ctx.install.len())
    }

    #[instrument(skip_all, fields(files = self.ctx.install.len()))]
    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        let device_dir = &self.ctx.layout.device_dir;
        self.ctx.shell.ensure_directory(device_dir).await?;

        let mut lines = Vec::new();
        for local in &self.ctx.install {
            let file_name = local
                .file_name()
                .ok_or_else(|| TaskError::failed(format!("not a file: {}", local.display())))?;
            let remote = format!("{}/{}", device_dir, file_name.to_string_lossy());
            self.ctx.shell.push(local, &remote).await?;
            lines.push(format!("installed {}", remote));
        }
        Ok(TaskOutput::with_lines(lines))
    }
}

/// Compile one artifact on the host, consulting the host cache
pub struct CompileAction {
    ctx: Arc<RunContext>,
    action: Action,
    name: String,
}

impl CompileAction {
    pub fn new(ctx: Arc<RunContext>, action: Action) -> Self {
        let name = action.task("compile");
        Self { ctx, action, name }
    }
}

#[async_trait]
impl Task for CompileAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.action.artifact.display(), self.ctx.compiler.describe())
    }

    #[instrument(skip_all, fields(action = %self.action.name))]
    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        let output = self.ctx.layout.compiled(&self.action);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut inputs = vec![CacheInput::file(&self.action.artifact)];
        inputs.extend(self.ctx.compiler.cache_inputs());
        let cached = cache_key(self.ctx.host_cache.as_ref(), &inputs).await?;

        let destination = ArtifactLocation::Local(output.clone());
        if let Some((cache, key)) = &cached {
            if cache.try_get(&destination, key).await?.is_hit() {
                return Ok(TaskOutput::cached());
            }
        }

        let lines = self.ctx.compiler.compile(&self.action.artifact, &output).await?;
        if let Some((cache, key)) = &cached {
            remember(cache, key, destination).await;
        }
        Ok(TaskOutput::with_lines(lines))
    }
}

/// Push one compiled artifact, consulting the device cache
pub struct PushAction {
    ctx: Arc<RunContext>,
    action: Action,
    name: String,
}

impl PushAction {
    pub fn new(ctx: Arc<RunContext>, action: Action) -> Self {
        let name = action.task("push");
        Self { ctx, action, name }
    }
}

#[async_trait]
impl Task for PushAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("push to {}", self.ctx.layout.remote_artifact(&self.action))
    }

    #[instrument(skip_all, fields(action = %self.action.name))]
    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        let local = self.ctx.layout.compiled(&self.action);
        let remote = self.ctx.layout.remote_artifact(&self.action);
        self.ctx
            .shell
            .ensure_directory(&self.ctx.layout.action_dir(&self.action))
            .await?;

        let cached = cache_key(self.ctx.device_cache.as_ref(), &[CacheInput::file(&local)]).await?;
        let destination = ArtifactLocation::Remote(remote.clone());
        if let Some((cache, key)) = &cached {
            if cache.try_get(&destination, key).await?.is_hit() {
                return Ok(TaskOutput::cached());
            }
        }

        self.ctx.shell.push(&local, &remote).await?;
        if let Some((cache, key)) = &cached {
            remember(cache, key, destination).await;
        }
        Ok(TaskOutput::empty())
    }
}

/// Expand a run command template into an argument vector.
///
/// A token that is exactly `{vm_args}` expands to zero or more arguments;
/// every other placeholder is substituted in place.
pub fn run_argv(template: &str, artifact: &str, action: &str, dir: &str, vm_args: &[String]) -> Vec<String> {
    let mut argv = Vec::new();
    for token in template.split_whitespace() {
        if token == "{vm_args}" {
            argv.extend(vm_args.iter().cloned());
            continue;
        }
        argv.push(
            token
                .replace("{artifact}", artifact)
                .replace("{action}", action)
                .replace("{dir}", dir)
                .replace("{vm_args}", &vm_args.join(" ")),
        );
    }
    argv
}

/// Execute one action on the target
pub struct RunAction {
    ctx: Arc<RunContext>,
    action: Action,
    name: String,
}

impl RunAction {
    pub fn new(ctx: Arc<RunContext>, action: Action) -> Self {
        let name = action.task("run");
        Self { ctx, action, name }
    }

    fn argv(&self) -> Vec<String> {
        let dir = self.ctx.layout.action_dir(&self.action);
        run_argv(
            &self.ctx.run_command,
            &self.ctx.layout.remote_artifact(&self.action),
            &self.action.name,
            &dir,
            &self.ctx.profiler.vm_args(&dir),
        )
    }
}

#[async_trait]
impl Task for RunAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        self.argv().join(" ")
    }

    #[instrument(skip_all, fields(action = %self.action.name, profiler = self.ctx.profiler.name()))]
    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        let lines = self
            .ctx
            .shell
            .run_with_timeout(&self.argv(), self.ctx.timeouts.run)
            .await?;
        debug!(lines = lines.len(), "action finished");
        Ok(TaskOutput::with_lines(lines))
    }
}

/// Wait for an action's output files and pull them to the host
pub struct RetrieveAction {
    ctx: Arc<RunContext>,
    action: Action,
    name: String,
}

impl RetrieveAction {
    pub fn new(ctx: Arc<RunContext>, action: Action) -> Self {
        let name = action.task("retrieve");
        Self { ctx, action, name }
    }
}

#[async_trait]
impl Task for RetrieveAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("pull {}", self.ctx.expected_files().join(", "))
    }

    #[instrument(skip_all, fields(action = %self.action.name))]
    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        let dir = self.ctx.layout.action_dir(&self.action);
        let local_dir = self.ctx.layout.results(&self.action);
        tokio::fs::create_dir_all(&local_dir).await?;

        let mut lines = Vec::new();
        for file in self.ctx.expected_files() {
            let remote = format!("{}/{}", dir, file);
            self.ctx
                .shell
                .wait_until(&remote, self.ctx.timeouts.file, single_file(remote.clone()))
                .await?;
            let local = local_dir.join(&file);
            self.ctx.shell.pull(&remote, &local).await?;
            lines.push(format!("retrieved {}", local.display()));
        }
        Ok(TaskOutput::with_lines(lines))
    }
}

/// Remove an action's remote directory. Best effort: failures are logged.
pub struct CleanupAction {
    ctx: Arc<RunContext>,
    action: Action,
    name: String,
}

impl CleanupAction {
    pub fn new(ctx: Arc<RunContext>, action: Action) -> Self {
        let name = action.task("cleanup");
        Self { ctx, action, name }
    }
}

#[async_trait]
impl Task for CleanupAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> String {
        format!("remove {}", self.ctx.layout.action_dir(&self.action))
    }

    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        let dir = self.ctx.layout.action_dir(&self.action);
        if let Err(e) = self.ctx.shell.remove(&dir).await {
            warn!(action = %self.action.name, error = %e, "cleanup failed");
        }
        Ok(TaskOutput::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::compiler::{CommandCompiler, Compiler, CopyCompiler};
    use orbiter_core::{Config, ProfilerConfig};
    use orbiter_remote::{CommandResponse, MemoryTransport, RemoteError, RemoteShell};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        root: std::path::PathBuf,
        transport: Arc<MemoryTransport>,
        ctx: Arc<RunContext>,
        action: Action,
    }

    fn fixture(configure: impl FnOnce(&mut Config)) -> Fixture {
        fixture_with(|_| Arc::new(CopyCompiler), configure)
    }

    fn fixture_with(
        compiler: impl FnOnce(&std::path::Path) -> Arc<dyn Compiler>,
        configure: impl FnOnce(&mut Config),
    ) -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        std::fs::write(root.join("Foo.jar"), b"foo classes").unwrap();

        let mut config = Config::default();
        configure(&mut config);
        let transport = Arc::new(MemoryTransport::new());
        transport.create_dir_all("/data/local/tmp");
        transport.create_dir_all("/sdcard");
        let shell = RemoteShell::new(transport.clone()).with_roots(&config.target.roots);
        let ctx = Arc::new(RunContext::from_config(&config, &root, shell, compiler(&root), true));
        let action = Action::from_artifact(&root.join("Foo.jar")).unwrap();
        Fixture {
            _temp: temp,
            root,
            transport,
            ctx,
            action,
        }
    }

    #[test]
    fn test_run_argv_expands_placeholders() {
        let argv = run_argv(
            "dalvikvm {vm_args} -cp {artifact} {action}",
            "/d/Foo/Foo.jar",
            "Foo",
            "/d/Foo",
            &["-Xrunhprof:file=/d/Foo/profile.hprof".to_string()],
        );
        assert_eq!(
            argv,
            vec!["dalvikvm", "-Xrunhprof:file=/d/Foo/profile.hprof", "-cp", "/d/Foo/Foo.jar", "Foo"]
        );

        let argv = run_argv("sh -c cd:{dir} {vm_args}", "a", "b", "/d", &[]);
        assert_eq!(argv, vec!["sh", "-c", "cd:/d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_waits_for_boot_and_resets_run_dir() {
        let f = fixture(|_| {});
        f.transport.create_file("/sdcard/Android", b"");
        f.transport.create_file("/data/local/tmp/orbiter/stale/file", b"old");

        PrepareTarget::new(f.ctx.clone()).execute().await.unwrap();

        assert!(f.transport.has_dir("/data/local/tmp/orbiter"));
        assert!(f.transport.file("/data/local/tmp/orbiter/stale/file").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_times_out_when_target_never_boots() {
        let f = fixture(|c| c.timeouts.boot_secs = 3);

        let err = PrepareTarget::new(f.ctx.clone()).execute().await.unwrap_err();
        assert!(matches!(err, TaskError::Remote(ref e) if e.is_timeout()));
        assert!(f.transport.shell_calls("rm").is_empty());
    }

    #[tokio::test]
    async fn test_install_pushes_support_files() {
        let f = fixture(|c| c.target.install = vec!["support.jar".into()]);
        std::fs::write(f.root.join("support.jar"), b"support").unwrap();

        let output = InstallSupport::new(f.ctx.clone()).execute().await.unwrap();
        assert_eq!(
            f.transport.file("/data/local/tmp/orbiter/support.jar").unwrap(),
            b"support".to_vec()
        );
        assert_eq!(output.lines, vec!["installed /data/local/tmp/orbiter/support.jar"]);
    }

    #[tokio::test]
    async fn test_compile_uses_host_cache_on_second_run() {
        let f = fixture(|_| {});
        let compile = CompileAction::new(f.ctx.clone(), f.action.clone());

        let first = compile.execute().await.unwrap();
        assert!(!first.cached);
        let compiled = f.ctx.layout.compiled(&f.action);
        std::fs::remove_file(&compiled).unwrap();

        let second = compile.execute().await.unwrap();
        assert!(second.cached);
        assert_eq!(std::fs::read(&compiled).unwrap(), b"foo classes");
    }

    #[tokio::test]
    async fn test_compile_recompiles_when_input_changes() {
        let f = fixture(|_| {});
        let compile = CompileAction::new(f.ctx.clone(), f.action.clone());
        compile.execute().await.unwrap();

        std::fs::write(&f.action.artifact, b"changed classes").unwrap();
        let output = compile.execute().await.unwrap();
        assert!(!output.cached);
        assert_eq!(
            std::fs::read(f.ctx.layout.compiled(&f.action)).unwrap(),
            b"changed classes"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compile_recompiles_when_bootclasspath_changes() {
        let f = fixture_with(
            |root| {
                Arc::new(CommandCompiler::new(
                    "cat {bootclasspath} {input} > {output}",
                    vec![root.join("android.jar")],
                    root,
                ))
            },
            |_| {},
        );
        let sdk = f.root.join("android.jar");
        std::fs::write(&sdk, b"sdk-v1 ").unwrap();
        let compile = CompileAction::new(f.ctx.clone(), f.action.clone());
        let compiled = f.ctx.layout.compiled(&f.action);

        assert!(!compile.execute().await.unwrap().cached);
        assert_eq!(std::fs::read(&compiled).unwrap(), b"sdk-v1 foo classes");

        std::fs::write(&sdk, b"sdk-v2 ").unwrap();
        assert!(!compile.execute().await.unwrap().cached);
        assert_eq!(std::fs::read(&compiled).unwrap(), b"sdk-v2 foo classes");

        assert!(compile.execute().await.unwrap().cached);
    }

    #[tokio::test]
    async fn test_push_uses_device_cache() {
        let f = fixture(|_| {});
        CompileAction::new(f.ctx.clone(), f.action.clone())
            .execute()
            .await
            .unwrap();
        let push = PushAction::new(f.ctx.clone(), f.action.clone());

        assert!(!push.execute().await.unwrap().cached);
        f.ctx.shell.remove("/data/local/tmp/orbiter").await.unwrap();
        f.ctx.shell.path_cache().reset();

        assert!(push.execute().await.unwrap().cached);
        assert_eq!(
            f.transport.file("/data/local/tmp/orbiter/Foo/Foo.jar").unwrap(),
            b"foo classes".to_vec()
        );
        let pushes = f.transport.calls().iter().filter(|c| c[0] == "push").count();
        assert_eq!(pushes, 1);
    }

    #[tokio::test]
    async fn test_run_passes_profiler_args() {
        let f = fixture(|c| {
            c.profiler = ProfilerConfig::Sampling {
                interval_ms: 5,
                depth: 8,
            }
        });
        f.transport.respond("dalvikvm", CommandResponse::ok(vec!["OK (2 tests)".to_string()]));

        let output = RunAction::new(f.ctx.clone(), f.action.clone()).execute().await.unwrap();
        assert_eq!(output.lines, vec!["OK (2 tests)"]);

        let call = &f.transport.shell_calls("dalvikvm")[0];
        assert_eq!(
            call[1],
            "-Xrunhprof:cpu=samples,interval=5,depth=8,file=/data/local/tmp/orbiter/Foo/profile.hprof"
        );
        assert_eq!(call.last().unwrap(), "Foo");
    }

    #[tokio::test]
    async fn test_run_fails_when_device_unreachable() {
        let f = fixture(|_| {});
        f.transport.respond(
            "dalvikvm",
            CommandResponse::failed(vec!["adb: no devices/emulators found".to_string()]),
        );

        let err = RunAction::new(f.ctx.clone(), f.action.clone()).execute().await.unwrap_err();
        assert!(matches!(err, TaskError::Remote(RemoteError::Transport { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let f = fixture(|c| c.timeouts.run_secs = 2);
        f.transport.respond(
            "dalvikvm",
            CommandResponse::ok(Vec::new()).with_delay(Duration::from_secs(60)),
        );

        let err = RunAction::new(f.ctx.clone(), f.action.clone()).execute().await.unwrap_err();
        assert!(matches!(err, TaskError::Remote(ref e) if e.is_timeout()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieve_pulls_expected_files() {
        let f = fixture(|c| c.results.file = Some("result.txt".to_string()));
        f.transport
            .create_file("/data/local/tmp/orbiter/Foo/result.txt", b"PASS");

        let output = RetrieveAction::new(f.ctx.clone(), f.action.clone())
            .execute()
            .await
            .unwrap();
        let local = f.root.join(".orbiter/results/Foo/result.txt");
        assert_eq!(std::fs::read(&local).unwrap(), b"PASS");
        assert_eq!(output.lines.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieve_times_out_on_missing_file() {
        let f = fixture(|c| {
            c.results.file = Some("result.txt".to_string());
            c.timeouts.file_secs = 2;
        });

        let err = RetrieveAction::new(f.ctx.clone(), f.action.clone())
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Remote(ref e) if e.is_timeout()));
    }

    #[tokio::test]
    async fn test_cleanup_is_best_effort() {
        let f = fixture(|_| {});
        f.transport.create_file("/data/local/tmp/orbiter/Foo/Foo.jar", b"x");
        let cleanup = CleanupAction::new(f.ctx.clone(), f.action.clone());

        cleanup.execute().await.unwrap();
        assert!(!f.transport.has_dir("/data/local/tmp/orbiter/Foo"));

        // already gone
        cleanup.execute().await.unwrap();
        f.transport.set_offline(true);
        cleanup.execute().await.unwrap();
    }

    #[test]
    fn test_task_names() {
        let f = fixture(|_| {});
        assert_eq!(CompileAction::new(f.ctx.clone(), f.action.clone()).name(), "Foo:compile");
        assert_eq!(CleanupAction::new(f.ctx.clone(), f.action.clone()).name(), "Foo:cleanup");
        assert_eq!(PrepareTarget::new(f.ctx.clone()).name(), "target:prepare");
    }
}
