//! Construction of a run's task graph

use std::sync::Arc;

use orbiter_tasks::{DagError, TaskGraph};
use tracing::{debug, instrument};

use super::action::Action;
use super::context::RunContext;
use super::tasks::{
    CleanupAction, CompileAction, InstallSupport, PrepareTarget, PushAction, RetrieveAction,
    RunAction,
};

/// Build the graph for `actions`.
///
/// `target:prepare` and `target:install` are shared. Every action then gets
/// a compile, push, run chain, a retrieve step when files are expected back,
/// and a cleanup after the last of those.
#[instrument(skip_all, fields(actions = actions.len()))]
pub fn build_graph(ctx: &Arc<RunContext>, actions: &[Action]) -> Result<TaskGraph, DagError> {
    let mut graph = TaskGraph::new();
    let retrieves = !ctx.expected_files().is_empty();

    let prepare = graph.add(PrepareTarget::new(ctx.clone()));
    let install = graph.add(InstallSupport::new(ctx.clone()));
    graph.after_success(install, prepare)?;

    for action in actions {
        let compile = graph.add(CompileAction::new(ctx.clone(), action.clone()));
        let push = graph.add(PushAction::new(ctx.clone(), action.clone()));
        let run = graph.add(RunAction::new(ctx.clone(), action.clone()));
        graph.after_success(compile, install)?;
        graph.after_success(push, compile)?;
        graph.after_success(run, push)?;

        let last = if retrieves {
            let retrieve = graph.add(RetrieveAction::new(ctx.clone(), action.clone()));
            graph.after_success(retrieve, run)?;
            retrieve
        } else {
            run
        };

        let cleanup = graph.add(CleanupAction::new(ctx.clone(), action.clone()));
        graph.after_success(cleanup, last)?;
    }

    debug!(tasks = graph.len(), "built run graph");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::compiler::CopyCompiler;
    use orbiter_core::Config;
    use orbiter_remote::{CommandResponse, MemoryTransport, RemoteShell};
    use orbiter_tasks::{
        CollectingReporter, SchedulerOptions, TaskEvent, TaskScheduler, TaskState,
    };
    use std::path::Path;
    use tempfile::TempDir;

    fn context(root: &Path, transport: &Arc<MemoryTransport>, configure: impl FnOnce(&mut Config)) -> Arc<RunContext> {
        let mut config = Config::default();
        configure(&mut config);
        let shell = RemoteShell::new(transport.clone()).with_roots(&config.target.roots);
        Arc::new(RunContext::from_config(&config, root, shell, Arc::new(CopyCompiler), true))
    }

    fn booted_target() -> Arc<MemoryTransport> {
        let transport = Arc::new(MemoryTransport::new());
        transport.create_dir_all("/data/local/tmp");
        transport.create_file("/sdcard/Android", b"");
        transport
    }

    fn actions(root: &Path, names: &[&str]) -> Vec<Action> {
        names
            .iter()
            .map(|name| {
                let path = root.join(format!("{}.jar", name));
                std::fs::write(&path, name.as_bytes()).unwrap();
                Action::from_artifact(&path).unwrap()
            })
            .collect()
    }

    fn names(graph: &TaskGraph) -> Vec<String> {
        graph
            .sorted()
            .into_iter()
            .map(|h| graph.name(h).to_string())
            .collect()
    }

    #[test]
    fn test_graph_shape_without_retrieve() {
        let temp = TempDir::new().unwrap();
        let ctx = context(temp.path(), &booted_target(), |_| {});
        let graph = build_graph(&ctx, &actions(temp.path(), &["Foo"])).unwrap();

        assert_eq!(
            names(&graph),
            vec![
                "target:prepare",
                "target:install",
                "Foo:compile",
                "Foo:push",
                "Foo:run",
                "Foo:cleanup"
            ]
        );
        let cleanup = graph.handle("Foo:cleanup").unwrap();
        assert_eq!(graph.dependencies(cleanup), &[graph.handle("Foo:run").unwrap()]);
    }

    #[test]
    fn test_graph_retrieves_when_files_expected() {
        let temp = TempDir::new().unwrap();
        let ctx = context(temp.path(), &booted_target(), |c| {
            c.results.file = Some("result.txt".to_string())
        });
        let graph = build_graph(&ctx, &actions(temp.path(), &["Foo", "Bar"])).unwrap();

        assert_eq!(graph.len(), 2 + 2 * 6);
        let cleanup = graph.handle("Bar:cleanup").unwrap();
        assert_eq!(graph.dependencies(cleanup), &[graph.handle("Bar:retrieve").unwrap()]);

        let waves = graph.waves();
        assert_eq!(waves.len(), 7);
        assert_eq!(waves[2].len(), 2);
    }

    #[tokio::test]
    async fn test_full_run_then_cached_rerun() {
        let temp = TempDir::new().unwrap();
        let transport = booted_target();
        transport.respond("dalvikvm", CommandResponse::ok(vec!["OK".to_string()]));
        let ctx = context(temp.path(), &transport, |_| {});
        let actions = actions(temp.path(), &["Foo", "Bar"]);

        let reporter = Arc::new(CollectingReporter::default());
        let scheduler = TaskScheduler::new(SchedulerOptions { concurrency: 2 }, reporter.clone());

        let report = scheduler.execute(build_graph(&ctx, &actions).unwrap()).await;
        assert!(report.is_success(), "{:?}", report.non_success());
        assert_eq!(report.cached(), 0);
        assert_eq!(report.get("Foo:run").unwrap().output, vec!["OK"]);
        assert!(!transport.has_dir("/data/local/tmp/orbiter/Foo"));

        let report = scheduler.execute(build_graph(&ctx, &actions).unwrap()).await;
        assert!(report.is_success());
        assert_eq!(report.cached(), 4);
        assert!(report.get("Bar:compile").unwrap().cached);
        assert!(report.get("Bar:push").unwrap().cached);

        let pushes = transport.calls().iter().filter(|c| c[0] == "push").count();
        assert_eq!(pushes, 2);
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, TaskEvent::AllCompleted { total: 12, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbooted_target_skips_everything() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        transport.create_dir_all("/sdcard");
        let ctx = context(temp.path(), &transport, |c| c.timeouts.boot_secs = 5);

        let scheduler = TaskScheduler::new(
            SchedulerOptions { concurrency: 4 },
            Arc::new(CollectingReporter::default()),
        );
        let report = scheduler
            .execute(build_graph(&ctx, &actions(temp.path(), &["Foo"])).unwrap())
            .await;

        assert_eq!(report.get("target:prepare").unwrap().state, TaskState::Failure);
        assert_eq!(report.count(TaskState::Skipped), 5);
        assert!(transport.shell_calls("dalvikvm").is_empty());
    }

    #[tokio::test]
    async fn test_failed_compile_only_skips_its_action() {
        let temp = TempDir::new().unwrap();
        let transport = booted_target();
        let ctx = context(temp.path(), &transport, |_| {});
        let mut actions = actions(temp.path(), &["Foo"]);
        actions.push(Action::from_artifact(&temp.path().join("Missing.jar")).unwrap());

        let scheduler = TaskScheduler::new(
            SchedulerOptions { concurrency: 4 },
            Arc::new(CollectingReporter::default()),
        );
        let report = scheduler.execute(build_graph(&ctx, &actions).unwrap()).await;

        assert_eq!(report.get("Missing:compile").unwrap().state, TaskState::Failure);
        assert_eq!(report.get("Missing:cleanup").unwrap().state, TaskState::Skipped);
        assert_eq!(report.get("Foo:cleanup").unwrap().state, TaskState::Success);
    }
}
