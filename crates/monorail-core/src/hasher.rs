//! Task fingerprinting - BLAKE3 over a script's inputs
//!
//! The digest is fed, in this order: script name, package name, the
//! manifest version when present, then the contents of every tracked file
//! under the package directory in lexicographic path order. Identical
//! inputs always produce the same digest; any tracked-file edit changes it.

use std::fs;

use blake3::Hasher;
use tracing::warn;

use crate::error::Result;
use crate::vcs::Vcs;
use crate::workspace::{Manifest, WorkspacePackage};

pub fn fingerprint(pkg: &WorkspacePackage, script: &str, vcs: &dyn Vcs) -> Result<String> {
    let mut hasher = Hasher::new();
    hasher.update(script.as_bytes());
    hasher.update(pkg.name.as_bytes());

    let manifest = Manifest::load(&pkg.manifest_path)?;
    if let Some(version) = &manifest.version {
        hasher.update(version.as_bytes());
    }

    match vcs.tracked_files(&pkg.dir) {
        Ok(mut files) => {
            files.sort();
            for file in files {
                if let Ok(content) = fs::read(&file) {
                    hasher.update(&content);
                }
            }
        }
        // Best-effort: the digest still covers script, package, and version.
        Err(err) => warn!(package = %pkg.name, %err, "could not list tracked files"),
    }

    Ok(hasher.finalize().to_hex().to_string())
}
