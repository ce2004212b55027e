//! Workspace construction: change detection plus an optional isolated snapshot.
//!
//! [`materialize`] is the single blocking entry point. It runs the git change
//! queries and the snapshot staging concurrently, joins them, optionally
//! activates the effective root as the process working directory, and then
//! discovers packages inside the effective root.
//!
//! Isolation happens when a revision range is given or only staged changes
//! are checked. The snapshot lives in a temporary directory owned by the
//! returned [`Workspace`] and removed by [`Workspace::close`].

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, info, instrument, warn};

use crate::core::changes::{ChangeSet, shortest_prefixes};
use crate::detect::{ChangeDetector, DetectedPaths, detect_paths};
use crate::error::{DetectionError, StagingError, WorkspaceError};
use crate::io::document::TemplateData;
use crate::io::git::{DiffBase, Git};
use crate::io::shadow;
use crate::io::toolchain::{CommandEnv, Toolchain};

/// Inputs for [`materialize`].
#[derive(Debug, Clone)]
pub struct MaterializeRequest {
    /// Repository root.
    pub source_root: PathBuf,
    /// Git pathspecs limiting which changes count.
    pub path_spec: Vec<String>,
    /// Revision range to check instead of local changes.
    pub rev_spec: Option<String>,
    /// Check only what is staged in the index.
    pub staging: bool,
    /// Build a plain-staging snapshot from symlinks where supported.
    pub shadow_link: bool,
    /// Make the effective root the process working directory until close.
    pub activate: bool,
}

impl MaterializeRequest {
    pub fn new(source_root: impl Into<PathBuf>, path_spec: Vec<String>) -> Self {
        Self {
            source_root: source_root.into(),
            path_spec,
            rev_spec: None,
            staging: false,
            shadow_link: false,
            activate: false,
        }
    }

    fn base(&self) -> DiffBase {
        DiffBase::new(self.rev_spec.as_deref(), self.staging)
    }
}

/// Roots and change sets for one run.
#[derive(Debug)]
pub struct Workspace {
    source_root: PathBuf,
    effective_root: PathBuf,
    staging_area: Option<PathBuf>,
    owns_staging_area: bool,
    activated: bool,
    closed: bool,
    root_package: String,
    changes: ChangeSet,
    env: CommandEnv,
}

impl Workspace {
    /// The real repository root.
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Where checks run: the source root or the snapshot.
    pub fn effective_root(&self) -> &Path {
        &self.effective_root
    }

    pub fn staging_area(&self) -> Option<&Path> {
        self.staging_area.as_deref()
    }

    pub fn owns_staging_area(&self) -> bool {
        self.owns_staging_area
    }

    /// True when the snapshot lives in its own temporary directory.
    pub fn is_isolated(&self) -> bool {
        self.staging_area.is_some()
    }

    /// Directory holding the snapshot, or the source root when not isolated.
    pub fn work_root(&self) -> &Path {
        self.staging_area.as_deref().unwrap_or(&self.source_root)
    }

    pub fn root_package(&self) -> &str {
        &self.root_package
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Environment every check command needs inside this workspace.
    pub fn env(&self) -> &CommandEnv {
        &self.env
    }

    pub fn template_data(&self) -> TemplateData {
        TemplateData::new(
            &self.changes,
            &self.source_root,
            self.work_root(),
            &self.effective_root,
        )
    }

    /// Restore the working directory and delete an owned staging area.
    ///
    /// Idempotent; the second and later calls do nothing.
    #[instrument(skip_all, fields(root = %self.effective_root.display()))]
    pub fn close(&mut self) -> Result<(), StagingError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let restored = if self.activated {
            self.activated = false;
            std::env::set_current_dir(&self.source_root).map_err(|source| StagingError::Io {
                path: self.source_root.clone(),
                source,
            })
        } else {
            Ok(())
        };
        if let (true, Some(area)) = (self.owns_staging_area, &self.staging_area) {
            self.owns_staging_area = false;
            remove_staging_area(area)?;
            debug!(area = %area.display(), "removed staging area");
        }
        restored
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(err = %err, "workspace cleanup failed");
        }
    }
}

/// A populated snapshot inside a fresh temporary directory.
#[derive(Debug)]
struct Snapshot {
    staging_area: PathBuf,
    effective_root: PathBuf,
}

/// Compute change sets and, when isolating, stage a snapshot to check against.
///
/// Failures leave any partially built staging area on disk; its path is logged.
#[instrument(skip_all, fields(root = %request.source_root.display()))]
pub fn materialize<T: Toolchain + ?Sized>(
    request: &MaterializeRequest,
    toolchain: &T,
) -> Result<Workspace, WorkspaceError> {
    let git = Git::new(&request.source_root);
    git.ensure_work_tree()?;
    let base = request.base();
    let isolate = base != DiffBase::Head;
    let root_package = toolchain.root_package(&request.source_root)?;
    debug!(?base, isolate, root_package = %root_package, "materializing workspace");

    let detector = ChangeDetector::new(&request.source_root, request.path_spec.clone(), base);
    let (detected, snapshot) = thread::scope(|scope| {
        let detection = scope.spawn(|| detect_paths(&detector));
        let staging = isolate.then(|| {
            scope.spawn(|| stage_snapshot(request, toolchain, &git, &root_package))
        });
        let detected = join(detection);
        let snapshot = staging.map(join).transpose();
        (detected, snapshot)
    });

    let snapshot = match (detected.as_ref(), snapshot) {
        (_, Err(err)) => return Err(err),
        (Err(_), Ok(Some(snapshot))) => {
            warn!(
                area = %snapshot.staging_area.display(),
                "change detection failed; staging area left in place"
            );
            None
        }
        (_, Ok(snapshot)) => snapshot,
    };
    let DetectedPaths {
        files,
        dirs,
        locally_changed,
    } = detected?;

    let (effective_root, staging_area, env) = match snapshot {
        Some(snapshot) => {
            let env = toolchain.isolated_env(&snapshot.staging_area);
            (snapshot.effective_root, Some(snapshot.staging_area), env)
        }
        None => (request.source_root.clone(), None, CommandEnv::new()),
    };

    // From here on the workspace owns the staging area, so errors clean it up.
    let mut workspace = Workspace {
        source_root: request.source_root.clone(),
        effective_root,
        owns_staging_area: staging_area.is_some(),
        staging_area,
        activated: false,
        closed: false,
        root_package,
        changes: ChangeSet::default(),
        env,
    };

    if request.activate {
        std::env::set_current_dir(&workspace.effective_root).map_err(|source| {
            StagingError::Io {
                path: workspace.effective_root.clone(),
                source,
            }
        })?;
        workspace.activated = true;
    }

    let packages = detector.updated_packages(
        toolchain,
        &workspace.effective_root,
        &workspace.env,
        &workspace.root_package,
        &dirs,
    )?;
    let trees = shortest_prefixes(&dirs);
    workspace.changes = ChangeSet {
        files,
        dirs,
        trees,
        packages,
        locally_changed,
    };
    info!(
        files = workspace.changes.files.len(),
        packages = workspace.changes.packages.len(),
        isolated = workspace.is_isolated(),
        "workspace ready"
    );
    Ok(workspace)
}

/// Delete `area`, making read-only directories writable if the first attempt is refused.
fn remove_staging_area(area: &Path) -> Result<(), StagingError> {
    let io_error = |path: &Path, source| StagingError::Io {
        path: path.to_path_buf(),
        source,
    };
    match fs::remove_dir_all(area) {
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            debug!(area = %area.display(), "staging area has read-only entries");
            make_dirs_writable(area).map_err(|source| io_error(area, source))?;
            fs::remove_dir_all(area).map_err(|source| io_error(area, source))
        }
        other => other.map_err(|source| io_error(area, source)),
    }
}

/// Add owner write permission to every directory under `dir`. Symlinks are not followed.
fn make_dirs_writable(dir: &Path) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(dir)?;
    if !metadata.is_dir() {
        return Ok(());
    }
    let mut permissions = metadata.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o700);
    }
    #[cfg(not(unix))]
    permissions.set_readonly(false);
    fs::set_permissions(dir, permissions)?;
    for entry in fs::read_dir(dir)? {
        make_dirs_writable(&entry?.path())?;
    }
    Ok(())
}

fn join<R>(handle: thread::ScopedJoinHandle<'_, R>) -> R {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

fn stage_snapshot<T: Toolchain + ?Sized>(
    request: &MaterializeRequest,
    toolchain: &T,
    git: &Git,
    root_package: &str,
) -> Result<Snapshot, WorkspaceError> {
    let temp = tempfile::Builder::new()
        .prefix("gitix-")
        .tempdir()
        .map_err(|source| StagingError::Io {
            path: std::env::temp_dir(),
            source,
        })?
        .keep();
    let staging_area = fs::canonicalize(&temp).map_err(|source| StagingError::Io {
        path: temp.clone(),
        source,
    })?;
    let effective_root = toolchain.snapshot_root(&staging_area, root_package);

    let populated = populate(request, git, &staging_area, &effective_root);
    if let Err(err) = &populated {
        warn!(
            area = %staging_area.display(),
            err = %err,
            "staging failed; staging area left in place"
        );
    }
    populated?;
    Ok(Snapshot {
        staging_area,
        effective_root,
    })
}

#[instrument(skip_all, fields(root = %effective_root.display()))]
fn populate(
    request: &MaterializeRequest,
    git: &Git,
    staging_area: &Path,
    effective_root: &Path,
) -> Result<(), WorkspaceError> {
    fs::create_dir_all(effective_root).map_err(|source| StagingError::Io {
        path: effective_root.to_path_buf(),
        source,
    })?;

    if let DiffBase::Revision(rev_spec) = request.base() {
        let commits = git.rev_list(&rev_spec).map_err(DetectionError::from)?;
        let Some(commit) = commits.first() else {
            return Err(DetectionError::EmptyRange { rev_spec }.into());
        };
        let index_file = staging_area.join("gitix.index");
        git.checkout_commit_into(commit, effective_root, &index_file)
            .map_err(StagingError::from)?;
        debug!(commit = %commit, "checked out revision");
        return Ok(());
    }

    let use_shadow = request.shadow_link && shadow::is_supported();
    if request.shadow_link && !use_shadow {
        warn!("shadow copies are not supported on this platform; using a full checkout");
    }
    if !use_shadow {
        git.checkout_index_all(effective_root)
            .map_err(StagingError::from)?;
        return Ok(());
    }

    shadow::shadow_copy(&request.source_root, effective_root)?;
    let mut refresh = git.modified_or_deleted().map_err(StagingError::from)?;
    refresh.extend(
        git.changed_files(&DiffBase::Index, &request.path_spec)
            .map_err(StagingError::from)?,
    );
    refresh.sort();
    refresh.dedup();
    shadow::unlink_shadowed(effective_root, &refresh)?;
    git.checkout_index_paths(effective_root, &refresh)
        .map_err(StagingError::from)?;
    debug!(refreshed = refresh.len(), "shadow copy refreshed from index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::toolchain::NoPackages;
    use crate::test_support::TestRepo;

    fn request(repo: &TestRepo) -> MaterializeRequest {
        MaterializeRequest::new(repo.path(), vec!["*.go".to_string()])
    }

    #[test]
    fn non_isolating_workspace_uses_source_root() {
        let repo = TestRepo::new();
        repo.write("p/x.go", "package p\n");
        repo.commit_all("init");
        repo.write("p/x.go", "package p // edit\n");

        let mut ws = materialize(&request(&repo), &NoPackages).expect("materialize");

        assert!(!ws.is_isolated());
        assert!(!ws.owns_staging_area());
        assert_eq!(ws.effective_root(), repo.path());
        assert_eq!(ws.work_root(), repo.path());
        assert_eq!(ws.changes().files, vec!["p/x.go".to_string()]);
        assert_eq!(ws.changes().trees, vec!["p".to_string()]);
        ws.close().expect("close");
        ws.close().expect("second close");
        assert!(repo.path().join("p/x.go").exists());
    }

    #[test]
    fn staged_snapshot_holds_index_content_and_is_removed_on_close() {
        let repo = TestRepo::new();
        repo.write("p/x.go", "package p\n");
        repo.commit_all("init");
        repo.write("p/x.go", "package p // staged\n");
        repo.stage_all();
        repo.write("p/x.go", "package p // unstaged\n");

        let mut req = request(&repo);
        req.staging = true;
        let mut ws = materialize(&req, &NoPackages).expect("materialize");

        let area = ws.staging_area().expect("staging area").to_path_buf();
        assert!(ws.owns_staging_area());
        assert!(ws.effective_root().starts_with(&area));
        assert_eq!(
            fs::read_to_string(ws.effective_root().join("p/x.go")).expect("read"),
            "package p // staged\n"
        );
        assert_eq!(ws.changes().locally_changed, vec!["p/x.go".to_string()]);

        ws.close().expect("close");
        assert!(!area.exists());
    }

    #[test]
    fn dropping_workspace_removes_staging_area() {
        let repo = TestRepo::new();
        repo.write("a.go", "package a\n");
        repo.commit_all("init");

        let mut req = request(&repo);
        req.staging = true;
        let ws = materialize(&req, &NoPackages).expect("materialize");
        let area = ws.staging_area().expect("staging area").to_path_buf();
        drop(ws);
        assert!(!area.exists());
    }

    #[cfg(unix)]
    #[test]
    fn close_removes_read_only_trees() {
        use std::os::unix::fs::PermissionsExt;

        let repo = TestRepo::new();
        repo.write("a.go", "package a\n");
        repo.commit_all("init");

        let mut req = request(&repo);
        req.staging = true;
        let mut ws = materialize(&req, &NoPackages).expect("materialize");
        let area = ws.staging_area().expect("staging area").to_path_buf();
        let cache = area.join("pkg/mod/dep");
        fs::create_dir_all(&cache).expect("mkdir");
        fs::write(cache.join("f.go"), "package dep\n").expect("write");
        for dir in [cache.clone(), area.join("pkg/mod")] {
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).expect("chmod");
        }

        ws.close().expect("close");
        assert!(!area.exists());
    }

    #[cfg(unix)]
    #[test]
    fn read_only_cleanup_leaves_symlink_targets_alone() {
        use std::os::unix::fs::PermissionsExt;

        let outside = tempfile::tempdir().expect("tempdir");
        fs::set_permissions(outside.path(), fs::Permissions::from_mode(0o555)).expect("chmod");
        let area = tempfile::tempdir().expect("tempdir").keep();
        let locked = area.join("locked");
        fs::create_dir(&locked).expect("mkdir");
        std::os::unix::fs::symlink(outside.path(), locked.join("link")).expect("symlink");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).expect("chmod");

        remove_staging_area(&area).expect("remove");

        assert!(!area.exists());
        let mode = fs::metadata(outside.path()).expect("stat").permissions().mode();
        assert_eq!(mode & 0o777, 0o555);
        fs::set_permissions(outside.path(), fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    #[test]
    fn template_data_reports_roots() {
        let repo = TestRepo::new();
        repo.write("a.go", "package a\n");
        repo.commit_all("init");

        let mut req = request(&repo);
        req.staging = true;
        let ws = materialize(&req, &NoPackages).expect("materialize");
        let data = ws.template_data();

        assert_eq!(data.git_root, repo.path().display().to_string());
        assert_eq!(
            data.work_root,
            ws.staging_area().expect("area").display().to_string()
        );
        assert_eq!(data.root, ws.effective_root().display().to_string());
    }
}
