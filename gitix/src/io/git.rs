//! Git adapter for change detection and snapshot staging.
//!
//! Every query is a `git` subprocess run against an explicit repository root,
//! so concurrent queries never depend on the process working directory.
//! Path listings use `-z` so names are never C-quoted.

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;

use tracing::{debug, instrument};

use crate::core::changes::sorted_entries;
use crate::error::{CommandError, DetectionError};

/// What a change diff compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffBase {
    /// Working tree against `HEAD` (everything not yet committed).
    Head,
    /// Index against `HEAD` (what is about to be committed).
    Index,
    /// An explicit revision range.
    Revision(String),
}

impl DiffBase {
    /// An explicit range wins over staging; otherwise compare against `HEAD`.
    pub fn new(rev_spec: Option<&str>, staging: bool) -> Self {
        match rev_spec.map(str::trim).filter(|spec| !spec.is_empty()) {
            Some(spec) => DiffBase::Revision(spec.to_string()),
            None if staging => DiffBase::Index,
            None => DiffBase::Head,
        }
    }

    fn arg(&self) -> &str {
        match self {
            DiffBase::Head => "HEAD",
            DiffBase::Index => "--cached",
            DiffBase::Revision(spec) => spec,
        }
    }
}

/// Wrapper for executing git commands against one repository root.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Absolute top-level directory of the work tree containing `workdir`.
    #[instrument(skip_all)]
    pub fn show_toplevel(&self) -> Result<PathBuf, DetectionError> {
        let out = self.run(&["rev-parse", "--show-toplevel"], &[])?;
        let top = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if !out.status.success() || top.is_empty() {
            return Err(DetectionError::NotARepository {
                path: self.workdir.clone(),
            });
        }
        debug!(top = %top, "resolved git root");
        Ok(PathBuf::from(top))
    }

    /// Fail unless `workdir` is inside a git work tree.
    pub fn ensure_work_tree(&self) -> Result<(), DetectionError> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"], &[])?;
        if out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true" {
            return Ok(());
        }
        Err(DetectionError::NotARepository {
            path: self.workdir.clone(),
        })
    }

    /// Added/copied/modified/renamed files relative to `base`, limited to `path_spec`.
    #[instrument(skip_all, fields(base = base.arg()))]
    pub fn changed_files(
        &self,
        base: &DiffBase,
        path_spec: &[String],
    ) -> Result<Vec<String>, CommandError> {
        let mut args = vec![
            "diff",
            "-z",
            "--name-only",
            "--diff-filter=ACMR",
            base.arg(),
            "--",
        ];
        args.extend(path_spec.iter().map(String::as_str));
        let out = self.run_capture(&args)?;
        Ok(sorted_entries(&out))
    }

    /// Raw NUL-separated `--name-status` report (including deletions) relative to `base`.
    #[instrument(skip_all, fields(base = base.arg()))]
    pub fn name_status(
        &self,
        base: &DiffBase,
        path_spec: &[String],
    ) -> Result<String, CommandError> {
        let mut args = vec![
            "diff",
            "-z",
            "--name-status",
            "--diff-filter=ACDMR",
            base.arg(),
            "--",
        ];
        args.extend(path_spec.iter().map(String::as_str));
        self.run_capture(&args)
    }

    /// Files whose working-tree content differs from the index.
    #[instrument(skip_all)]
    pub fn unstaged_files(&self, path_spec: &[String]) -> Result<Vec<String>, CommandError> {
        let mut args = vec!["diff", "-z", "--name-only", "--diff-filter=ACMR", "--"];
        args.extend(path_spec.iter().map(String::as_str));
        let out = self.run_capture(&args)?;
        Ok(sorted_entries(&out))
    }

    /// Tracked files modified or deleted in the working tree (any path).
    pub fn modified_or_deleted(&self) -> Result<Vec<String>, CommandError> {
        let out = self.run_capture(&["ls-files", "-z", "--modified", "--deleted"])?;
        Ok(sorted_entries(&out))
    }

    /// Commits in `rev_spec`, most recent first.
    pub fn rev_list(&self, rev_spec: &str) -> Result<Vec<String>, CommandError> {
        let out = self.run_capture(&["rev-list", rev_spec])?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }

    /// Write every index entry below `dest`.
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub fn checkout_index_all(&self, dest: &Path) -> Result<(), CommandError> {
        let prefix = prefix_arg(dest);
        self.run_checked(&["checkout-index", "-a", "-f", &prefix], &[])?;
        Ok(())
    }

    /// Write the index version of `paths` below `dest`, overwriting what is there.
    ///
    /// Paths are fed NUL-separated on stdin, so any number of them fits.
    #[instrument(skip_all, fields(dest = %dest.display(), count = paths.len()))]
    pub fn checkout_index_paths(
        &self,
        dest: &Path,
        paths: &[String],
    ) -> Result<(), CommandError> {
        if paths.is_empty() {
            return Ok(());
        }
        let prefix = prefix_arg(dest);
        let args = ["checkout-index", "-f", "-z", prefix.as_str(), "--stdin"];
        let mut input = Vec::new();
        for path in paths {
            input.extend_from_slice(path.as_bytes());
            input.push(0);
        }
        self.run_with_input(&args, &input)?;
        Ok(())
    }

    /// Materialize the tree of `commit` into `work_tree`.
    ///
    /// Uses `index_file` as a private index so the repository's own index is untouched.
    #[instrument(skip_all, fields(commit = %commit, work_tree = %work_tree.display()))]
    pub fn checkout_commit_into(
        &self,
        commit: &str,
        work_tree: &Path,
        index_file: &Path,
    ) -> Result<(), CommandError> {
        let work_tree_arg = format!("--work-tree={}", work_tree.display());
        self.run_checked(
            &[work_tree_arg.as_str(), "checkout", commit, "--", "."],
            &[("GIT_INDEX_FILE", index_file.as_os_str())],
        )?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String, CommandError> {
        let output = self.run_checked(args, &[])?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str], envs: &[(&str, &OsStr)]) -> Result<Output, CommandError> {
        let output = self.run(args, envs)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CommandError::Failed {
                command: format!("git {}", args.join(" ")),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    fn run(&self, args: &[&str], envs: &[(&str, &OsStr)]) -> Result<Output, CommandError> {
        debug!(args = %args.join(" "), "git");
        self.command(args)
            .envs(envs.iter().copied())
            .output()
            .map_err(|source| spawn_error(args, source))
    }

    /// Run with `input` written to stdin; fails on non-zero exit.
    fn run_with_input(&self, args: &[&str], input: &[u8]) -> Result<Output, CommandError> {
        debug!(args = %args.join(" "), bytes = input.len(), "git with stdin");
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| spawn_error(args, source))?;
        let stdin = child.stdin.take();
        // Stdin is written while stdout and stderr drain.
        let (output, written) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(input),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            (output, written)
        });
        let output = output.map_err(|source| spawn_error(args, source))?;
        if !output.status.success() {
            return Err(CommandError::Failed {
                command: format!("git {}", args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        written.map_err(|source| spawn_error(args, source))?;
        Ok(output)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-c")
            .arg("core.quotePath=false")
            .args(args)
            .current_dir(&self.workdir);
        cmd
    }
}

fn spawn_error(args: &[&str], source: std::io::Error) -> CommandError {
    CommandError::Spawn {
        command: format!("git {}", args.join(" ")),
        source,
    }
}

fn prefix_arg(dest: &Path) -> String {
    format!("--prefix={}/", dest.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_base_prefers_revision_over_staging() {
        assert_eq!(
            DiffBase::new(Some("a..b"), true),
            DiffBase::Revision("a..b".to_string())
        );
        assert_eq!(DiffBase::new(Some("  "), true), DiffBase::Index);
        assert_eq!(DiffBase::new(None, false), DiffBase::Head);
    }

    #[test]
    fn diff_base_args() {
        assert_eq!(DiffBase::Head.arg(), "HEAD");
        assert_eq!(DiffBase::Index.arg(), "--cached");
        assert_eq!(DiffBase::Revision("main..".to_string()).arg(), "main..");
    }

    #[test]
    fn prefix_has_trailing_slash() {
        assert_eq!(prefix_arg(Path::new("/tmp/snap")), "--prefix=/tmp/snap/");
    }

    #[cfg(unix)]
    #[test]
    fn checkout_index_paths_handles_unusual_names() {
        let repo = crate::test_support::TestRepo::new();
        repo.write("README", "init\n");
        repo.commit_all("init");
        let names = ["a b.go", "we\"ird.go", "tab\there.go", "ünï.go"];
        for name in names {
            repo.write(name, name);
        }
        repo.stage_all();
        let dest = tempfile::tempdir().expect("tempdir");

        let git = Git::new(repo.path());
        let listed = git.changed_files(&DiffBase::Index, &[]);
        let paths: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        git.checkout_index_paths(dest.path(), &paths)
            .expect("checkout-index");

        for name in names {
            let content = std::fs::read_to_string(dest.path().join(name)).expect("read");
            assert_eq!(content, name);
        }
        let mut expected = paths.clone();
        expected.sort();
        assert_eq!(listed.expect("listed"), expected);
    }

    #[test]
    fn checkout_index_paths_takes_many_paths() {
        let repo = crate::test_support::TestRepo::new();
        let paths: Vec<String> = (0..2000)
            .map(|n| format!("deep/{}/file-{n:04}.go", "x".repeat(40)))
            .collect();
        for path in &paths {
            repo.write(path, "package deep\n");
        }
        repo.stage_all();
        let dest = tempfile::tempdir().expect("tempdir");

        Git::new(repo.path())
            .checkout_index_paths(dest.path(), &paths)
            .expect("checkout-index");

        assert!(paths.iter().all(|path| dest.path().join(path).is_file()));
    }

    #[test]
    fn outside_repository_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Git::new(temp.path()).ensure_work_tree().unwrap_err();
        assert!(matches!(err, DetectionError::NotARepository { .. }));
    }
}
