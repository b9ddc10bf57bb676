//! Version-control collaborator
//!
//! The core needs exactly two query shapes from version control: the tracked
//! files under a package directory (fingerprint input) and the files changed
//! across a revision range (change-based filtering). Both live behind a
//! capability trait so tests can stub them out.

use std::path::{Path, PathBuf};

use git2::Repository;

use crate::error::{Error, Result};

pub trait Vcs: Send + Sync {
    /// Tracked files under `dir`, as absolute paths in stable order.
    fn tracked_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Files changed across a revision range (`a..b` or `a...b`), relative
    /// to the repository root.
    fn changed_files(&self, range: &str) -> Result<Vec<PathBuf>>;
}

/// libgit2-backed implementation rooted at the workspace.
///
/// Holds only the root path; the repository handle is opened per query so
/// the value stays `Send + Sync`.
pub struct GitVcs {
    root: PathBuf,
}

impl GitVcs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn open(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.root)?)
    }
}

impl Vcs for GitVcs {
    fn tracked_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let repo = self.open()?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| Error::Configuration("bare repository has no working tree".into()))?
            .to_path_buf();

        let index = repo.index()?;
        let mut files = Vec::new();
        for entry in index.iter() {
            let rel = String::from_utf8_lossy(&entry.path).to_string();
            let abs = workdir.join(rel);
            if abs.starts_with(dir) {
                files.push(abs);
            }
        }
        files.sort();
        Ok(files)
    }

    fn changed_files(&self, range: &str) -> Result<Vec<PathBuf>> {
        let repo = self.open()?;

        // "a...b" must be checked before "a..b": split_once("..") would cut
        // the triple-dot form in the wrong place.
        let (from, to, symmetric) = if let Some((a, b)) = range.split_once("...") {
            (a, b, true)
        } else if let Some((a, b)) = range.split_once("..") {
            (a, b, false)
        } else {
            (range, "HEAD", true)
        };

        let from_commit = repo.revparse_single(from)?.peel_to_commit()?;
        let to_commit = repo.revparse_single(to)?.peel_to_commit()?;

        let base_commit = if symmetric {
            let base = repo.merge_base(from_commit.id(), to_commit.id())?;
            repo.find_commit(base)?
        } else {
            from_commit
        };

        let diff =
            repo.diff_tree_to_tree(Some(&base_commit.tree()?), Some(&to_commit.tree()?), None)?;

        let mut files = Vec::new();
        for delta in diff.deltas() {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}
