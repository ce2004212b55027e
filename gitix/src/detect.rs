//! Change detection: which files, directories, and packages a run covers.
//!
//! [`ChangeDetector`] answers each query independently against one source
//! root; [`detect_paths`] runs the file, directory, and local-change queries
//! concurrently.

use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, instrument};

use crate::core::changes::{containing_dirs, name_status_paths, select_packages};
use crate::error::DetectionError;
use crate::io::git::{DiffBase, Git};
use crate::io::toolchain::{CommandEnv, Toolchain};

/// Git-backed change queries for one repository.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    git: Git,
    path_spec: Vec<String>,
    base: DiffBase,
}

/// Results of the git-only queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedPaths {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
    pub locally_changed: Vec<String>,
}

impl ChangeDetector {
    pub fn new(source_root: impl Into<PathBuf>, path_spec: Vec<String>, base: DiffBase) -> Self {
        Self {
            git: Git::new(source_root),
            path_spec,
            base,
        }
    }

    pub fn source_root(&self) -> &Path {
        self.git.workdir()
    }

    pub fn base(&self) -> &DiffBase {
        &self.base
    }

    /// Files added, copied, modified, or renamed relative to the diff base.
    #[instrument(skip_all)]
    pub fn updated_files(&self) -> Result<Vec<String>, DetectionError> {
        let files = self.git.changed_files(&self.base, &self.path_spec)?;
        debug!(count = files.len(), "updated files");
        Ok(files)
    }

    /// Files whose working-tree content differs from the index.
    ///
    /// Independent of the diff base.
    pub fn locally_changed_files(&self) -> Result<Vec<String>, DetectionError> {
        Ok(self.git.unstaged_files(&self.path_spec)?)
    }

    /// Directories of changed paths, including deletions and both sides of a
    /// rename, that still exist in the source root.
    #[instrument(skip_all)]
    pub fn updated_dirs(&self) -> Result<Vec<String>, DetectionError> {
        let report = self.git.name_status(&self.base, &self.path_spec)?;
        let paths = name_status_paths(&report).map_err(|entry| DetectionError::Unparseable {
            command: "git diff -z --name-status".to_string(),
            entry,
        })?;
        let root = self.source_root();
        let dirs: Vec<String> = containing_dirs(paths.iter().map(String::as_str))
            .into_iter()
            .filter(|dir| root.join(dir).is_dir())
            .collect();
        debug!(count = dirs.len(), "updated dirs");
        Ok(dirs)
    }

    /// Packages rooted in one of `dirs`, discovered under `effective_root`.
    ///
    /// Skips the toolchain entirely when nothing changed.
    #[instrument(skip_all, fields(root = %effective_root.display(), dirs = dirs.len()))]
    pub fn updated_packages<T: Toolchain + ?Sized>(
        &self,
        toolchain: &T,
        effective_root: &Path,
        env: &CommandEnv,
        root_package: &str,
        dirs: &[String],
    ) -> Result<Vec<String>, DetectionError> {
        if dirs.is_empty() {
            return Ok(Vec::new());
        }
        let all = toolchain.list_packages(effective_root, env)?;
        let packages = select_packages(root_package, &all, dirs);
        debug!(count = packages.len(), "updated packages");
        Ok(packages)
    }
}

/// Run the file, directory, and local-change queries concurrently.
///
/// Fails with the first error in query order.
pub fn detect_paths(detector: &ChangeDetector) -> Result<DetectedPaths, DetectionError> {
    thread::scope(|scope| {
        let files = scope.spawn(|| detector.updated_files());
        let dirs = scope.spawn(|| detector.updated_dirs());
        let local = scope.spawn(|| detector.locally_changed_files());
        Ok(DetectedPaths {
            files: join_query(files)?,
            dirs: join_query(dirs)?,
            locally_changed: join_query(local)?,
        })
    })
}

fn join_query(
    handle: thread::ScopedJoinHandle<'_, Result<Vec<String>, DetectionError>>,
) -> Result<Vec<String>, DetectionError> {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
