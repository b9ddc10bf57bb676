//! Bounded-concurrency topological execution
//!
//! `run_script` walks the dependency graph with a per-node
//! remaining-dependency count: a package becomes ready once every package it
//! depends on has completed or been skipped. At most `concurrency` units are
//! in flight at a time; the first non-zero exit aborts the whole run.
//! `run_task` expands a task's `dependsOn` into (filter token, script) units
//! and runs them sequentially through `run_script`.
//!
//! All bookkeeping (degree map, ready queue, completed set) is owned and
//! mutated by the scheduling loop alone; workers only report back through
//! their join handles.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStore, ScriptStatus};
use crate::config::TaskConfig;
use crate::error::{Error, Result};
use crate::filter::{filtered_graph, FilterMode};
use crate::graph::DependencyGraph;
use crate::hasher::fingerprint;
use crate::runner::ProcessSpawner;
use crate::vcs::Vcs;
use crate::workspace::{
    detect_package_manager, Manifest, PackageManager, PackageRegistry, WorkspacePackage,
};

/// Options for one `run_script` call
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub package_manager: PackageManager,
    /// Parallel subprocess bound; unbounded when `None`
    pub concurrency: Option<usize>,
    pub dry_run: bool,
    /// Bypass cache reads
    pub skip_cache: bool,
    /// Do not record results
    pub skip_cache_write: bool,
}

/// Options for `run_task`; the package manager may still need resolving
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub package_manager: Option<PackageManager>,
    pub concurrency: Option<usize>,
    pub dry_run: bool,
    pub skip_cache: bool,
    pub skip_cache_write: bool,
}

struct UnitResult {
    package: String,
}

/// Script orchestrator over explicitly injected collaborators.
///
/// The cache, spawner, and version-control handles are owned here and passed
/// at construction, so substituting any of them (a different store backend, a
/// recording spawner in tests) never touches scheduling logic.
pub struct Scheduler {
    cache: Arc<dyn CacheStore>,
    spawner: Arc<dyn ProcessSpawner>,
    vcs: Arc<dyn Vcs>,
}

impl Scheduler {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        spawner: Arc<dyn ProcessSpawner>,
        vcs: Arc<dyn Vcs>,
    ) -> Self {
        Self {
            cache,
            spawner,
            vcs,
        }
    }

    /// Run `script` on every graph node in dependency order.
    ///
    /// Each package runs at most once. A package without the script is
    /// recorded as skipped and unblocks its dependents. A non-zero exit
    /// aborts the run: no further package starts, completed siblings stay
    /// completed.
    pub async fn run_script(
        &self,
        script: &str,
        packages: &PackageRegistry,
        graph: &DependencyGraph,
        options: &RunOptions,
    ) -> Result<()> {
        if !graph.is_acyclic() {
            return Err(Error::Graph(
                "dependency graph contains a cycle, cannot schedule".into(),
            ));
        }

        let mut remaining: HashMap<String, usize> = HashMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for name in graph.nodes() {
            let degree = graph.out_edges(name).len();
            remaining.insert(name.to_string(), degree);
            if degree == 0 {
                queue.push_back(name.to_string());
            }
        }

        let total = graph.node_count();
        let limit = options.concurrency.unwrap_or(usize::MAX).max(1);
        let mut completed: HashSet<String> = HashSet::new();
        let mut workers: JoinSet<Result<UnitResult>> = JoinSet::new();

        while completed.len() < total {
            while workers.len() < limit {
                let Some(name) = queue.pop_front() else {
                    break;
                };
                let Some(pkg) = packages.get(&name) else {
                    return Err(Error::Configuration(format!(
                        "package '{name}' is missing from the registry"
                    )));
                };
                debug!(package = %name, script, "unit ready");
                workers.spawn(run_unit(
                    pkg.clone(),
                    script.to_string(),
                    options.clone(),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.spawner),
                    Arc::clone(&self.vcs),
                ));
            }

            let Some(joined) = workers.join_next().await else {
                // Unreachable for an acyclic graph; the check above rejects
                // anything that could stall here.
                return Err(Error::Graph("scheduler stalled with work remaining".into()));
            };
            let unit = joined??;

            completed.insert(unit.package.clone());
            for consumer in graph.predecessors(&unit.package) {
                if let Some(degree) = remaining.get_mut(&consumer) {
                    *degree -= 1;
                    if *degree == 0 && !completed.contains(&consumer) {
                        queue.push_back(consumer);
                    }
                }
            }
        }

        Ok(())
    }

    /// Run a named task: expand `dependsOn` into concrete units, run them
    /// one at a time, and finish with the task's own script on every graph
    /// root. Without `dependsOn` this degrades to a plain `run_script`.
    pub async fn run_task(
        &self,
        task_name: &str,
        task: &TaskConfig,
        packages: &PackageRegistry,
        graph: &DependencyGraph,
        root: &Path,
        options: &TaskOptions,
    ) -> Result<()> {
        let package_manager = options
            .package_manager
            .or(task.package_manager)
            .unwrap_or_else(|| detect_package_manager(root));

        let run_options = RunOptions {
            package_manager,
            concurrency: options.concurrency,
            dry_run: options.dry_run,
            skip_cache: options.skip_cache || task.cache.skip_read,
            skip_cache_write: options.skip_cache_write || task.cache.skip_write,
        };

        if task.depends_on.is_empty() {
            return self
                .run_script(task_name, packages, graph, &run_options)
                .await;
        }

        for (token, script) in expand_task_units(task_name, task, graph) {
            let unit_graph =
                filtered_graph(packages, root, self.vcs.as_ref(), &[token], FilterMode::Or)?;
            self.run_script(&script, packages, &unit_graph, &run_options)
                .await?;
        }
        Ok(())
    }
}

/// Expand `dependsOn` into ordered, deduplicated (filter token, script)
/// units. `^s` fans out to every graph root widened downstream (the barrier
/// making prerequisite work finish first), `pkg#s` is an exact unit, and a
/// bare name runs on every node. The task's own script closes the list, once
/// per root.
pub fn expand_task_units(
    task_name: &str,
    task: &TaskConfig,
    graph: &DependencyGraph,
) -> Vec<(String, String)> {
    fn push(units: &mut Vec<(String, String)>, unit: (String, String)) {
        if !units.contains(&unit) {
            units.push(unit);
        }
    }

    let roots = graph.roots();
    let mut units: Vec<(String, String)> = Vec::new();

    for entry in &task.depends_on {
        if let Some(script) = entry.strip_prefix('^') {
            for root in &roots {
                push(&mut units, (format!("{root}..."), script.to_string()));
            }
        } else if let Some((pkg, script)) = entry.split_once('#') {
            push(&mut units, (pkg.to_string(), script.to_string()));
        } else {
            for node in graph.nodes() {
                push(&mut units, (node.to_string(), entry.clone()));
            }
        }
    }

    for root in &roots {
        push(&mut units, (root.clone(), task_name.to_string()));
    }

    units
}

async fn run_unit(
    pkg: WorkspacePackage,
    script: String,
    options: RunOptions,
    cache: Arc<dyn CacheStore>,
    spawner: Arc<dyn ProcessSpawner>,
    vcs: Arc<dyn Vcs>,
) -> Result<UnitResult> {
    let manifest = Manifest::load(&pkg.manifest_path)?;
    if !manifest.scripts.contains_key(&script) {
        println!("⏭  [{}] no '{}' script, skipping", pkg.name, script);
        return Ok(UnitResult { package: pkg.name });
    }

    let digest = {
        let pkg = pkg.clone();
        let script = script.clone();
        let vcs = Arc::clone(&vcs);
        tokio::task::spawn_blocking(move || fingerprint(&pkg, &script, vcs.as_ref())).await??
    };

    if !options.skip_cache {
        match cache.read(&digest) {
            Ok(Some(entry)) if entry.status == ScriptStatus::Success => {
                println!("⚡ [{}] '{}' unchanged, cache hit", pkg.name, script);
                return Ok(UnitResult { package: pkg.name });
            }
            Ok(_) => {}
            Err(err) => {
                warn!(package = %pkg.name, %err, "cache read failed, treating as miss");
            }
        }
    }

    println!("▶  [{}] running '{}'", pkg.name, script);
    let exit_code = if options.dry_run {
        0
    } else {
        let args = vec!["run".to_string(), script.clone()];
        spawner
            .spawn(options.package_manager.command(), &args, &pkg.dir)
            .await?
    };

    if exit_code != 0 {
        return Err(Error::ScriptExecution {
            package: pkg.name,
            script,
            exit_code,
        });
    }

    if !options.skip_cache_write {
        let entry = CacheEntry::new(&pkg.name, &script, ScriptStatus::Success);
        if let Err(err) = cache.write(&digest, &entry) {
            warn!(package = %pkg.name, %err, "cache write failed");
        }
    }

    println!("✓  [{}] '{}' done", pkg.name, script);
    Ok(UnitResult { package: pkg.name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeSpawner {
        log: Mutex<Vec<String>>,
        fail: HashSet<String>,
    }

    impl FakeSpawner {
        fn new(fail: &[&str]) -> Self {
            Self {
                log: Mutex::new(Vec::new()),
                fail: fail.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.log.lock().unwrap().clear();
        }
    }

    #[async_trait::async_trait]
    impl ProcessSpawner for FakeSpawner {
        async fn spawn(&self, _program: &str, args: &[String], cwd: &Path) -> Result<i32> {
            let package = cwd.file_name().unwrap().to_string_lossy().to_string();
            self.log
                .lock()
                .unwrap()
                .push(format!("{package}:{}", args[1]));
            Ok(if self.fail.contains(&package) { 1 } else { 0 })
        }
    }

    struct NoVcs;

    impl Vcs for NoVcs {
        fn tracked_files(&self, _dir: &Path) -> Result<Vec<PathBuf>> {
            Ok(Vec::new())
        }

        fn changed_files(&self, _range: &str) -> Result<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    fn write_package(
        root: &Path,
        name: &str,
        deps: &[&str],
        scripts: &[&str],
    ) -> WorkspacePackage {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();

        let scripts_json = scripts
            .iter()
            .map(|s| format!(r#""{s}": "echo {s}""#))
            .collect::<Vec<_>>()
            .join(", ");
        let deps_json = deps
            .iter()
            .map(|d| format!(r#""{d}": "1.0.0""#))
            .collect::<Vec<_>>()
            .join(", ");
        let manifest = format!(
            r#"{{"name": "{name}", "version": "1.0.0", "scripts": {{{scripts_json}}}, "dependencies": {{{deps_json}}}}}"#
        );
        let manifest_path = dir.join("package.json");
        std::fs::write(&manifest_path, manifest).unwrap();

        WorkspacePackage {
            name: name.to_string(),
            dir,
            manifest_path,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn registry(packages: Vec<WorkspacePackage>) -> PackageRegistry {
        packages.into_iter().map(|p| (p.name.clone(), p)).collect()
    }

    fn scheduler_with(spawner: Arc<FakeSpawner>) -> Scheduler {
        Scheduler::new(
            Arc::new(MemoryStore::default()),
            spawner as Arc<dyn ProcessSpawner>,
            Arc::new(NoVcs),
        )
    }

    fn options(concurrency: Option<usize>) -> RunOptions {
        RunOptions {
            package_manager: PackageManager::Npm,
            concurrency,
            dry_run: false,
            skip_cache: false,
            skip_cache_write: false,
        }
    }

    #[tokio::test]
    async fn chain_runs_dependencies_first() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b"], &["build"]),
            write_package(tmp.path(), "b", &["c"], &["build"]),
            write_package(tmp.path(), "c", &[], &["build"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&[]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        scheduler
            .run_script("build", &packages, &graph, &options(Some(1)))
            .await
            .unwrap();

        assert_eq!(spawner.log(), vec!["c:build", "b:build", "a:build"]);
    }

    #[tokio::test]
    async fn diamond_visits_every_node_once() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b", "c"], &["build"]),
            write_package(tmp.path(), "b", &["d"], &["build"]),
            write_package(tmp.path(), "c", &["d"], &["build"]),
            write_package(tmp.path(), "d", &[], &["build"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&[]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        scheduler
            .run_script("build", &packages, &graph, &options(None))
            .await
            .unwrap();

        let log = spawner.log();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], "d:build");
        assert_eq!(log[3], "a:build");
    }

    #[tokio::test]
    async fn missing_script_is_skipped_not_failed() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b"], &["build"]),
            write_package(tmp.path(), "b", &["c"], &[]),
            write_package(tmp.path(), "c", &[], &["build"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&[]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        scheduler
            .run_script("build", &packages, &graph, &options(Some(1)))
            .await
            .unwrap();

        assert_eq!(spawner.log(), vec!["c:build", "a:build"]);
    }

    #[tokio::test]
    async fn failure_aborts_before_dependents_start() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b"], &["build"]),
            write_package(tmp.path(), "b", &["c"], &["build"]),
            write_package(tmp.path(), "c", &[], &["build"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&["b"]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        let err = scheduler
            .run_script("build", &packages, &graph, &options(Some(1)))
            .await
            .unwrap_err();

        match err {
            Error::ScriptExecution {
                package,
                script,
                exit_code,
            } => {
                assert_eq!(package, "b");
                assert_eq!(script, "build");
                assert_eq!(exit_code, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        // c completed before the failure; a never started
        assert_eq!(spawner.log(), vec!["c:build", "b:build"]);
    }

    #[tokio::test]
    async fn second_run_hits_the_cache() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b"], &["build"]),
            write_package(tmp.path(), "b", &[], &["build"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&[]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        scheduler
            .run_script("build", &packages, &graph, &options(Some(1)))
            .await
            .unwrap();
        assert_eq!(spawner.log().len(), 2);

        spawner.clear();
        scheduler
            .run_script("build", &packages, &graph, &options(Some(1)))
            .await
            .unwrap();
        assert!(spawner.log().is_empty());
    }

    #[tokio::test]
    async fn force_bypasses_cache_reads() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![write_package(tmp.path(), "a", &[], &["build"])]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&[]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        let mut opts = options(None);
        scheduler
            .run_script("build", &packages, &graph, &opts)
            .await
            .unwrap();

        spawner.clear();
        opts.skip_cache = true;
        scheduler
            .run_script("build", &packages, &graph, &opts)
            .await
            .unwrap();
        assert_eq!(spawner.log(), vec!["a:build"]);
    }

    #[tokio::test]
    async fn dry_run_spawns_nothing() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b"], &["build"]),
            write_package(tmp.path(), "b", &[], &["build"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&[]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        let mut opts = options(None);
        opts.dry_run = true;
        scheduler
            .run_script("build", &packages, &graph, &opts)
            .await
            .unwrap();
        assert!(spawner.log().is_empty());
    }

    #[tokio::test]
    async fn cyclic_graph_is_rejected_before_scheduling() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b"], &["build"]),
            write_package(tmp.path(), "b", &["a"], &["build"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&[]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        let err = scheduler
            .run_script("build", &packages, &graph, &options(None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Graph(_)));
        assert!(spawner.log().is_empty());
    }

    #[test]
    fn task_expansion_orders_and_dedups_units() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b"], &["build"]),
            write_package(tmp.path(), "b", &["c"], &["build"]),
            write_package(tmp.path(), "c", &[], &["build"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let task = TaskConfig {
            depends_on: vec!["^build".into(), "lint".into(), "c#test".into()],
            ..TaskConfig::default()
        };

        let units = expand_task_units("deploy", &task, &graph);
        assert_eq!(
            units,
            vec![
                ("a...".to_string(), "build".to_string()),
                ("a".to_string(), "lint".to_string()),
                ("b".to_string(), "lint".to_string()),
                ("c".to_string(), "lint".to_string()),
                ("c".to_string(), "test".to_string()),
                ("a".to_string(), "deploy".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn run_task_runs_prerequisites_then_the_task_itself() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b"], &["build", "release"]),
            write_package(tmp.path(), "b", &["c"], &["build"]),
            write_package(tmp.path(), "c", &[], &["build"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&[]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        let task = TaskConfig {
            depends_on: vec!["^build".into()],
            ..TaskConfig::default()
        };
        let task_options = TaskOptions {
            package_manager: Some(PackageManager::Npm),
            concurrency: Some(1),
            ..TaskOptions::default()
        };

        scheduler
            .run_task("release", &task, &packages, &graph, tmp.path(), &task_options)
            .await
            .unwrap();

        assert_eq!(
            spawner.log(),
            vec!["c:build", "b:build", "a:build", "a:release"]
        );
    }

    #[tokio::test]
    async fn task_without_depends_on_runs_directly() {
        let tmp = TempDir::new().unwrap();
        let packages = registry(vec![
            write_package(tmp.path(), "a", &["b"], &["check"]),
            write_package(tmp.path(), "b", &[], &["check"]),
        ]);
        let graph = DependencyGraph::build(&packages);
        let spawner = Arc::new(FakeSpawner::new(&[]));
        let scheduler = scheduler_with(Arc::clone(&spawner));

        let task_options = TaskOptions {
            package_manager: Some(PackageManager::Npm),
            concurrency: Some(1),
            ..TaskOptions::default()
        };
        scheduler
            .run_task(
                "check",
                &TaskConfig::default(),
                &packages,
                &graph,
                tmp.path(),
                &task_options,
            )
            .await
            .unwrap();

        assert_eq!(spawner.log(), vec!["b:check", "a:check"]);
    }
}
