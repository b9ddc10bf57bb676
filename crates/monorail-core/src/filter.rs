//! Filter resolution - compiles filter tokens into a package-name set
//!
//! Token syntax: `name` or `gl*b`, widened with a trailing `...` (the match
//! plus everything it depends on) or a leading `...` (the match plus
//! everything depending on it), negated with a leading `!`, or `[range]` to
//! select the packages owning files changed across a git revision range.
//! Tokens combine by union (`or`, the default) or intersection (`and`).

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use glob::Pattern;

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::vcs::Vcs;
use crate::workspace::PackageRegistry;

/// How multiple filter tokens combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Or,
    And,
}

impl FromStr for FilterMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "or" => Ok(FilterMode::Or),
            "and" => Ok(FilterMode::And),
            other => Err(Error::Filter(format!("unknown filter mode '{other}'"))),
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Closure {
    None,
    /// Follow dependency edges outward: the match plus what it depends on.
    Downstream,
    /// Follow the reverse direction: the match plus what depends on it.
    Upstream,
}

/// Resolve filter tokens into a concrete package-name set.
///
/// Negation removes only matches accumulated within the same token; it never
/// subtracts from other tokens' sets. An empty result is returned as-is here;
/// `filtered_graph` turns it into a hard error.
pub fn resolve_filter(
    tokens: &[String],
    graph: &DependencyGraph,
    packages: &PackageRegistry,
    root: &Path,
    vcs: &dyn Vcs,
    mode: FilterMode,
) -> Result<HashSet<String>> {
    let mut matched_sets: Vec<HashSet<String>> = Vec::new();

    for token in tokens {
        let mut included: HashSet<String> = HashSet::new();
        let mut raw = token.as_str();
        let mut closure = Closure::None;

        if let Some(stripped) = raw.strip_suffix("...") {
            closure = Closure::Downstream;
            raw = stripped;
        } else if let Some(stripped) = raw.strip_prefix("...") {
            closure = Closure::Upstream;
            raw = stripped;
        }

        let negate = match raw.strip_prefix('!') {
            Some(stripped) => {
                raw = stripped;
                true
            }
            None => false,
        };

        if let Some(range) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            included.extend(changed_packages(root, packages, range, vcs)?);
            if !included.is_empty() {
                matched_sets.push(included);
            }
            continue;
        }

        let matching: Vec<&String> = if raw.contains('*') {
            let pattern = Pattern::new(raw)?;
            packages
                .keys()
                .filter(|name| pattern.matches(name.as_str()))
                .collect()
        } else {
            packages.keys().filter(|name| name.as_str() == raw).collect()
        };

        for name in matching {
            if negate {
                included.remove(name.as_str());
                continue;
            }
            included.insert(name.clone());
            match closure {
                Closure::Downstream => included.extend(reachable(graph, name, false)),
                Closure::Upstream => included.extend(reachable(graph, name, true)),
                Closure::None => {}
            }
        }

        if !included.is_empty() {
            matched_sets.push(included);
        }
    }

    Ok(match mode {
        FilterMode::Or => {
            let mut union = HashSet::new();
            for set in matched_sets {
                union.extend(set);
            }
            union
        }
        FilterMode::And => matched_sets
            .into_iter()
            .reduce(|a, b| a.intersection(&b).cloned().collect())
            .unwrap_or_default(),
    })
}

/// Stack-based DFS closure from `start`, deduplicated by a visited set.
fn reachable(graph: &DependencyGraph, start: &str, upstream: bool) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack = vec![start.to_string()];

    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let neighbors = if upstream {
            graph.predecessors(&current)
        } else {
            graph.successors(&current)
        };
        stack.extend(neighbors);
    }

    seen
}

/// Bare refs diff against HEAD; explicit `a..b` / `a...b` are left as given.
fn normalize_range(input: &str) -> String {
    if input.contains("..") {
        input.to_string()
    } else {
        format!("{input}...HEAD")
    }
}

/// Map changed files to their owning packages by directory-prefix containment.
fn changed_packages(
    root: &Path,
    packages: &PackageRegistry,
    range: &str,
    vcs: &dyn Vcs,
) -> Result<HashSet<String>> {
    let range = normalize_range(range);
    let changed = vcs.changed_files(&range)?;

    let mut owners = HashSet::new();
    for file in &changed {
        let abs = root.join(file);
        for (name, pkg) in packages {
            if abs.starts_with(&pkg.dir) {
                owners.insert(name.clone());
            }
        }
    }
    Ok(owners)
}

/// Build the dependency graph, pruned down to the filter selection when one
/// is given. An empty selection is a filter error, never a silent no-op.
pub fn filtered_graph(
    packages: &PackageRegistry,
    root: &Path,
    vcs: &dyn Vcs,
    filter: &[String],
    mode: FilterMode,
) -> Result<DependencyGraph> {
    let graph = DependencyGraph::build(packages);
    if filter.is_empty() {
        return Ok(graph);
    }

    let selected = resolve_filter(filter, &graph, packages, root, vcs, mode)?;
    if selected.is_empty() {
        return Err(Error::Filter(
            "no packages matched the filter, check your filter syntax".into(),
        ));
    }
    Ok(graph.prune(&selected))
}
