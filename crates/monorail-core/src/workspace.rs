//! Workspace discovery and manifest access
//!
//! The registry built here is the input to everything else: package name,
//! directory, manifest location, and declared dependency names. Dependency
//! names that do not resolve to a workspace member are kept in the package
//! record but ignored when graph edges are built.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// A member package of the workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePackage {
    pub name: String,
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
    pub dependencies: Vec<String>,
}

/// Ordered registry of workspace packages, keyed by name
pub type PackageRegistry = BTreeMap<String, WorkspacePackage>;

/// Minimal `package.json` view: scripts are a presence check only, commands
/// are never interpreted here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub scripts: HashMap<String, String>,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    pub workspaces: Option<WorkspaceGlobs>,
}

/// Root-manifest `workspaces` field, either a bare list or `{ packages: [...] }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WorkspaceGlobs {
    List(Vec<String>),
    Nested { packages: Vec<String> },
}

impl WorkspaceGlobs {
    fn patterns(&self) -> &[String] {
        match self {
            WorkspaceGlobs::List(patterns) => patterns,
            WorkspaceGlobs::Nested { packages } => packages,
        }
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Supported package managers, in lockfile detection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Bun,
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn command(&self) -> &'static str {
        match self {
            PackageManager::Bun => "bun",
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }

    fn lockfile(&self) -> &'static str {
        match self {
            PackageManager::Bun => "bun.lockb",
            PackageManager::Npm => "package-lock.json",
            PackageManager::Yarn => "yarn.lock",
            PackageManager::Pnpm => "pnpm-lock.yaml",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

impl FromStr for PackageManager {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bun" => Ok(PackageManager::Bun),
            "npm" => Ok(PackageManager::Npm),
            "yarn" => Ok(PackageManager::Yarn),
            "pnpm" => Ok(PackageManager::Pnpm),
            other => Err(Error::Configuration(format!(
                "unknown package manager '{other}'"
            ))),
        }
    }
}

/// Lockfile autodetection, fixed priority order; defaults to npm with a warning.
pub fn detect_package_manager(root: &Path) -> PackageManager {
    for pm in [
        PackageManager::Bun,
        PackageManager::Npm,
        PackageManager::Yarn,
        PackageManager::Pnpm,
    ] {
        if root.join(pm.lockfile()).is_file() {
            return pm;
        }
    }
    warn!(
        root = %root.display(),
        "no package manager lockfile found, defaulting to npm"
    );
    PackageManager::Npm
}

/// Walk upward from `start` to the nearest directory holding a `package.json`.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join("package.json").is_file() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

fn workspace_globs(root: &Path) -> Result<Vec<String>> {
    if detect_package_manager(root) == PackageManager::Pnpm {
        let path = root.join("pnpm-workspace.yaml");
        if path.is_file() {
            #[derive(Deserialize)]
            struct PnpmWorkspace {
                #[serde(default)]
                packages: Vec<String>,
            }
            let contents = fs::read_to_string(&path)?;
            let parsed: PnpmWorkspace = serde_yaml::from_str(&contents)?;
            return Ok(parsed.packages);
        }
        return Ok(Vec::new());
    }

    let manifest = Manifest::load(&root.join("package.json"))?;
    Ok(manifest
        .workspaces
        .map(|globs| globs.patterns().to_vec())
        .unwrap_or_default())
}

/// Expand the workspace member globs and load every member manifest.
/// Directories without a manifest are skipped; a member without a name is
/// skipped with a warning.
pub fn load_workspaces(root: &Path) -> Result<PackageRegistry> {
    let globs = workspace_globs(root)?;
    if globs.is_empty() {
        return Err(Error::Configuration(
            "no workspaces defined in the root manifest".into(),
        ));
    }

    let mut packages = PackageRegistry::new();
    for pattern in &globs {
        let full = root.join(pattern);
        let Some(full_str) = full.to_str() else {
            continue;
        };
        for dir in glob::glob(full_str)?.filter_map(|entry| entry.ok()) {
            if !dir.is_dir() {
                continue;
            }
            let manifest_path = dir.join("package.json");
            if !manifest_path.is_file() {
                continue;
            }
            let manifest = Manifest::load(&manifest_path)?;
            let Some(name) = manifest.name else {
                warn!(dir = %dir.display(), "member manifest has no name, skipping");
                continue;
            };
            let mut dependencies: Vec<String> = manifest.dependencies.into_keys().collect();
            dependencies.sort();
            packages.insert(
                name.clone(),
                WorkspacePackage {
                    name,
                    dir,
                    manifest_path,
                    dependencies,
                },
            );
        }
    }
    Ok(packages)
}
