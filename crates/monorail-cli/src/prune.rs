//! Filtered workspace copy for the `prune` command - a standalone helper
//! consuming only filesystem paths and ignore patterns

use std::fs;
use std::path::Path;

use anyhow::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::WalkDir;

const DEFAULT_IGNORES: &[&str] = &[
    "**/__tests__/**",
    "**/*.test.*",
    "**/*.spec.*",
    "**/node_modules/**",
    "**/.git/**",
];

/// Ignore patterns from `.monorailignore` (or `.gitignore` when asked),
/// plus the built-in test and artifact patterns.
pub fn load_ignore_patterns(root: &Path, use_gitignore: bool) -> Vec<String> {
    let file = if use_gitignore {
        ".gitignore"
    } else {
        ".monorailignore"
    };

    let mut patterns: Vec<String> = fs::read_to_string(root.join(file))
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    patterns.extend(DEFAULT_IGNORES.iter().map(|s| s.to_string()));
    patterns
}

/// Gitignore-style matcher rooted at the workspace.
pub struct IgnoreMatcher {
    matcher: Gitignore,
}

impl IgnoreMatcher {
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            builder.add_line(None, pattern)?;
        }
        Ok(Self {
            matcher: builder.build()?,
        })
    }

    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }
}

/// Recursively copy `src` into `dest`, skipping ignored entries. Skipping a
/// directory prunes its whole subtree.
pub fn copy_filtered(matcher: &IgnoreMatcher, src: &Path, dest: &Path) -> Result<()> {
    let walker = WalkDir::new(src)
        .into_iter()
        .filter_entry(|entry| !matcher.is_ignored(entry.path(), entry.file_type().is_dir()));

    for entry in walker {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
