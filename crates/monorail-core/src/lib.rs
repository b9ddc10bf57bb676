//! Monorail Core - Monorepo Task Orchestration Engine
//!
//! Features:
//! - Workspace dependency graph with topological scheduling
//! - Filter query language: globs, upstream/downstream closures, git ranges
//! - BLAKE3 content fingerprinting to skip unchanged work
//! - Pluggable fingerprint-keyed verdict cache (sled by default)
//! - Bounded-concurrency script execution with fail-fast semantics
//! - Task expansion (`dependsOn`) across the package graph

pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod graph;
pub mod hasher;
pub mod runner;
pub mod scheduler;
pub mod vcs;
pub mod workspace;

pub use cache::{CacheEntry, CacheStore, MemoryStore, ScriptStatus, SledStore};
pub use config::{Config, TaskConfig, CONFIG_FILE};
pub use error::{Error, Result};
pub use filter::{filtered_graph, resolve_filter, FilterMode};
pub use graph::DependencyGraph;
pub use hasher::fingerprint;
pub use runner::{ProcessSpawner, ShellSpawner};
pub use scheduler::{expand_task_units, RunOptions, Scheduler, TaskOptions};
pub use vcs::{GitVcs, Vcs};
pub use workspace::{
    detect_package_manager, find_workspace_root, load_workspaces, Manifest, PackageManager,
    PackageRegistry, WorkspacePackage,
};
