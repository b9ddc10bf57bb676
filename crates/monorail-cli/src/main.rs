//! Monorail CLI - Monorepo Task Orchestrator
//!
//! Commands:
//! - monorail run [script]  - Run a script or configured task across the workspace
//! - monorail ls            - List packages (plain or json/yaml/toml/xml/csv)
//! - monorail graph         - Print the dependency graph in DOT format
//! - monorail prune         - Copy the filtered workspace into an output directory

mod formats;
mod prune;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use monorail_core::{
    detect_package_manager, filtered_graph, find_workspace_root, load_workspaces, Config,
    DependencyGraph, Error, FilterMode, GitVcs, Manifest, PackageManager, PackageRegistry,
    RunOptions, Scheduler, ShellSpawner, SledStore, TaskOptions,
};
use tracing_subscriber::EnvFilter;

use formats::OutputFormat;

/// Monorail - monorepo task orchestrator
#[derive(Parser)]
#[command(name = "monorail", version, about = "Monorepo task orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Select packages: name, glob, ...upstream, downstream..., !negate, [git-range]
    #[arg(short = 'f', long = "filter", global = true)]
    filter: Vec<String>,

    /// Combine multiple filters by union (or) or intersection (and)
    #[arg(short = 'm', long = "filter-mode", global = true, default_value = "or")]
    filter_mode: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script (or a configured task) across the workspace
    Run {
        /// Script or task name
        #[arg(default_value = "build")]
        script: String,
        /// Max concurrent packages (default: unbounded)
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Resolve everything without spawning processes
        #[arg(short, long)]
        dry_run: bool,
        /// Ignore cached results and run everything
        #[arg(short = 'F', long)]
        force: bool,
        /// Do not record results in the cache
        #[arg(long)]
        skip_cache: bool,
        /// Package manager override (bun, npm, yarn, pnpm)
        #[arg(short, long)]
        package_manager: Option<String>,
    },
    /// List workspace packages with their versions
    Ls {
        /// Output format
        #[arg(short, long)]
        output: Option<OutputFormat>,
    },
    /// Print the dependency graph in DOT format
    Graph,
    /// Copy the filtered workspace into an output directory
    Prune {
        /// Target directory, relative to the workspace root
        #[arg(long, default_value = "out")]
        out_dir: String,
        /// Also materialize a manifest-only tree under <out>/json
        #[arg(long)]
        docker: bool,
        /// Take ignore patterns from .gitignore instead of .monorailignore
        #[arg(long)]
        use_gitignore: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("❌ {err}");
        // A failing package script takes its exit code with it.
        if let Some(Error::ScriptExecution { exit_code, .. }) = err.downcast_ref::<Error>() {
            std::process::exit(*exit_code);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let root = find_workspace_root(&cwd)
        .ok_or_else(|| Error::Configuration("no workspace root found".into()))?;

    let packages = load_workspaces(&root)?;
    let vcs = GitVcs::new(root.clone());
    let mode: FilterMode = cli.filter_mode.parse()?;
    let graph = filtered_graph(&packages, &root, &vcs, &cli.filter, mode)?;
    let config = Config::load(&root)?;

    match cli.command {
        Commands::Ls { output } => ls_command(&packages, &graph, output),
        Commands::Graph => {
            println!("{}", graph.to_dot());
            Ok(())
        }
        Commands::Prune {
            out_dir,
            docker,
            use_gitignore,
        } => prune_command(&root, &packages, &graph, &out_dir, docker, use_gitignore),
        Commands::Run {
            script,
            concurrency,
            dry_run,
            force,
            skip_cache,
            package_manager,
        } => {
            let package_manager: Option<PackageManager> = match package_manager {
                Some(raw) => Some(raw.parse()?),
                None => None,
            };
            run_command(
                &root,
                &config,
                &packages,
                &graph,
                &script,
                package_manager,
                concurrency,
                dry_run,
                force,
                skip_cache,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_command(
    root: &Path,
    config: &Config,
    packages: &PackageRegistry,
    graph: &DependencyGraph,
    script: &str,
    package_manager: Option<PackageManager>,
    concurrency: Option<usize>,
    dry_run: bool,
    force: bool,
    skip_cache: bool,
) -> Result<()> {
    let scheduler = Scheduler::new(
        Arc::new(SledStore::open(root)?),
        Arc::new(ShellSpawner),
        Arc::new(GitVcs::new(root.to_path_buf())),
    );

    println!(
        "🚀 running '{script}' across {} packages",
        graph.node_count()
    );
    let started = Instant::now();

    if let Some(task) = config.tasks.get(script) {
        let options = TaskOptions {
            package_manager,
            concurrency,
            dry_run,
            skip_cache: force,
            skip_cache_write: skip_cache,
        };
        scheduler
            .run_task(script, task, packages, graph, root, &options)
            .await?;
    } else {
        let options = RunOptions {
            package_manager: package_manager.unwrap_or_else(|| detect_package_manager(root)),
            concurrency,
            dry_run,
            skip_cache: force,
            skip_cache_write: skip_cache,
        };
        scheduler
            .run_script(script, packages, graph, &options)
            .await?;
    }

    println!("✅ '{script}' completed in {:?}", started.elapsed());
    Ok(())
}

fn ls_command(
    packages: &PackageRegistry,
    graph: &DependencyGraph,
    output: Option<OutputFormat>,
) -> Result<()> {
    let mut versions = BTreeMap::new();
    for name in graph.nodes() {
        let version = packages
            .get(name)
            .and_then(|pkg| Manifest::load(&pkg.manifest_path).ok())
            .and_then(|manifest| manifest.version)
            .unwrap_or_else(|| "unknown".to_string());
        versions.insert(name.to_string(), version);
    }

    match output {
        Some(format) => println!("{}", formats::render(format, &versions)?),
        None => {
            for (name, version) in &versions {
                println!("- {name}: @{version}");
            }
        }
    }
    println!("Total packages: {}", versions.len());
    Ok(())
}

fn prune_command(
    root: &Path,
    packages: &PackageRegistry,
    graph: &DependencyGraph,
    out_dir_name: &str,
    docker: bool,
    use_gitignore: bool,
) -> Result<()> {
    let mut out_dir = root.join(out_dir_name);
    let out_json_dir = out_dir.join("json");

    if out_dir.is_dir() {
        std::fs::remove_dir_all(&out_dir)?;
    }
    if docker {
        std::fs::create_dir_all(&out_json_dir)?;
        out_dir = out_dir.join("full");
    }
    std::fs::create_dir_all(&out_dir)?;

    let patterns = prune::load_ignore_patterns(root, use_gitignore);
    let matcher = prune::IgnoreMatcher::new(root, &patterns)?;

    println!("Pruning packages to {}...", out_dir.display());

    // Root-level files come along too (lockfiles, configs).
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || matcher.is_ignored(&path, false) {
            continue;
        }
        let file_name = entry.file_name();
        if docker && file_name.to_string_lossy().contains("package.json") {
            std::fs::copy(&path, out_json_dir.join(&file_name))?;
        }
        std::fs::copy(&path, out_dir.join(&file_name))?;
    }

    for name in graph.nodes() {
        let Some(pkg) = packages.get(name) else {
            eprintln!("Package {name} not found.");
            continue;
        };
        let relative = pkg.dir.strip_prefix(root)?;
        if docker {
            let json_dir = out_json_dir.join(relative);
            std::fs::create_dir_all(&json_dir)?;
            std::fs::copy(&pkg.manifest_path, json_dir.join("package.json"))?;
        }
        prune::copy_filtered(&matcher, &pkg.dir, &out_dir.join(relative))?;
    }

    println!("Pruned packages to {}.", out_dir.display());
    Ok(())
}
