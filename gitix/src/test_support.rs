//! Test-only helpers: throwaway git repositories, a fake toolchain, and a scripted executor.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;

use crate::core::check_tree::RunStep;
use crate::error::{CheckFailure, DetectionError};
use crate::io::executor::{Executor, StepPassed, StepResult};
use crate::io::toolchain::{CommandEnv, Toolchain};

/// A git repository in a temporary directory with a fixed identity.
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = fs::canonicalize(temp.path()).expect("canonicalize");
        let repo = Self { _temp: temp, root };
        repo.git(&["init", "-q"]);
        repo.git(&["config", "user.name", "Gitix Test"]);
        repo.git(&["config", "user.email", "gitix@example.com"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root.join(rel)).expect("read file")
    }

    /// Delete `rel` and any parent directories left empty.
    pub fn remove(&self, rel: &str) {
        let path = self.root.join(rel);
        fs::remove_file(&path).expect("remove file");
        self.prune_empty_parents(&path);
    }

    /// Move `from` to `to` on disk, pruning directories left empty.
    pub fn rename(&self, from: &str, to: &str) {
        let source = self.root.join(from);
        let dest = self.root.join(to);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::rename(&source, &dest).expect("rename");
        self.prune_empty_parents(&source);
    }

    fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    pub fn stage_all(&self) {
        self.git(&["add", "-A"]);
    }

    pub fn commit_all(&self, message: &str) {
        self.stage_all();
        self.git(&["commit", "-q", "--allow-empty", "-m", message]);
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Run git in the repository, panicking on failure. Returns stdout.
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Toolchain that treats every directory holding a `.go` file as a package of `module`.
#[derive(Debug, Clone)]
pub struct ModuleToolchain {
    pub module: String,
}

impl ModuleToolchain {
    pub fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
        }
    }
}

impl Toolchain for ModuleToolchain {
    fn root_package(&self, _root: &Path) -> Result<String, DetectionError> {
        Ok(self.module.clone())
    }

    fn list_packages(&self, root: &Path, _env: &CommandEnv) -> Result<Vec<String>, DetectionError> {
        let mut packages = Vec::new();
        collect_packages(root, root, &self.module, &mut packages);
        packages.sort();
        Ok(packages)
    }
}

fn collect_packages(root: &Path, dir: &Path, module: &str, packages: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut has_source = false;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.file_name().is_some_and(|name| name == ".git") {
            continue;
        }
        if path.is_dir() {
            collect_packages(root, &path, module, packages);
        } else if path.extension().is_some_and(|ext| ext == "go") {
            has_source = true;
        }
    }
    if !has_source {
        return;
    }
    match dir.strip_prefix(root).map(|rel| rel.to_string_lossy().replace('\\', "/")) {
        Ok(rel) if rel.is_empty() => packages.push(module.to_string()),
        Ok(rel) => packages.push(format!("{module}/{rel}")),
        Err(_) => {}
    }
}

/// Executor that records step names and fails the listed ones.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failing: Vec<String>,
    ran: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|name| name.to_string()).collect(),
            ran: Mutex::new(Vec::new()),
        }
    }

    /// Step names in the order they ran.
    pub fn ran(&self) -> Vec<String> {
        self.ran.lock().expect("ran lock").clone()
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, step: &RunStep) -> StepResult {
        self.ran.lock().expect("ran lock").push(step.name.clone());
        if self.failing.contains(&step.name) {
            return Err(CheckFailure {
                name: step.name.clone(),
                command: step.command.clone(),
                status: Some(1),
                output: format!("{} failed", step.name),
            });
        }
        Ok(StepPassed {
            name: step.name.clone(),
            dry_run: false,
            elapsed: Duration::ZERO,
        })
    }
}
