//! Pure change-set derivations: directories, trees, and package selection.
//!
//! Paths are git-style (`/`-separated, repository-relative). The repository
//! root directory is spelled `.`.

use std::collections::BTreeSet;

/// Placeholder for the repository root directory.
pub const ROOT_DIR: &str = ".";

/// Change sets computed for one run. Every list is sorted and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Files added, copied, modified, or renamed relative to the diff base.
    pub files: Vec<String>,
    /// Directories holding changed files that still exist on disk.
    pub dirs: Vec<String>,
    /// `dirs` reduced to the shallowest changed ancestors.
    pub trees: Vec<String>,
    /// Build units rooted in one of `dirs`.
    pub packages: Vec<String>,
    /// Files whose working-tree content differs from the index.
    pub locally_changed: Vec<String>,
}

/// Directory containing a repository-relative file path.
pub fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir,
        _ => ROOT_DIR,
    }
}

/// True if `ancestor` is `path` or one of its parent directories.
pub fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    if ancestor == ROOT_DIR || ancestor == path {
        return true;
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Paths named in `git diff -z --name-status` output.
///
/// Fields are NUL-terminated: a status, then one path, or two for renames and
/// copies (`R<score>`, `C<score>`). Both sides of a rename are returned. A
/// status without its paths is returned as the error.
pub fn name_status_paths(output: &str) -> Result<Vec<String>, String> {
    let mut paths = Vec::new();
    let mut fields = output.split('\0').filter(|field| !field.is_empty());
    while let Some(status) = fields.next() {
        let count = if status.starts_with(['R', 'C']) { 2 } else { 1 };
        for _ in 0..count {
            match fields.next() {
                Some(path) => paths.push(path.to_string()),
                None => return Err(status.to_string()),
            }
        }
    }
    Ok(paths)
}

/// Deduplicated, sorted containing directories of `files`.
pub fn containing_dirs<'a>(files: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    files
        .into_iter()
        .map(|file| parent_dir(file).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Minimal subset of `dirs` in which no element is an ancestor of another.
pub fn shortest_prefixes(dirs: &[String]) -> Vec<String> {
    if dirs.iter().any(|dir| dir == ROOT_DIR) {
        return vec![ROOT_DIR.to_string()];
    }
    let sorted: BTreeSet<&String> = dirs.iter().collect();
    let mut kept: Vec<String> = Vec::new();
    for dir in sorted {
        if kept.iter().any(|prefix| is_ancestor_or_self(prefix, dir)) {
            continue;
        }
        kept.push(dir.clone());
    }
    kept.sort();
    kept
}

/// Relative directory for a package identifier under `root_package`.
///
/// The root package maps to `.`; identifiers outside the root are returned as-is.
pub fn package_dir<'a>(root_package: &str, package: &'a str) -> &'a str {
    if package == root_package {
        return ROOT_DIR;
    }
    package
        .strip_prefix(root_package)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(package)
}

/// Packages from `all_packages` whose directory is one of `dirs` (sorted, deduplicated).
pub fn select_packages(
    root_package: &str,
    all_packages: &[String],
    dirs: &[String],
) -> Vec<String> {
    let wanted: BTreeSet<&str> = dirs.iter().map(String::as_str).collect();
    all_packages
        .iter()
        .filter(|package| wanted.contains(package_dir(root_package, package)))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Split line-oriented output into sorted, deduplicated entries.
pub fn sorted_lines(output: &str) -> Vec<String> {
    sorted_set(output.lines().map(str::trim))
}

/// Split NUL-separated (`-z`) git output into sorted, deduplicated paths.
///
/// Entries are taken verbatim; paths may contain spaces, quotes, or newlines.
pub fn sorted_entries(output: &str) -> Vec<String> {
    sorted_set(output.split('\0'))
}

fn sorted_set<'a>(entries: impl Iterator<Item = &'a str>) -> Vec<String> {
    entries
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
