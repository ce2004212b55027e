//! Build-unit discovery.
//!
//! The [`Toolchain`] trait keeps change detection independent of any one
//! language. [`GoToolchain`] shells out to `go list`; [`NoPackages`] is for trees
//! without build units. Tests use a directory-walking fake from `test_support`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, instrument, warn};

use crate::core::changes::sorted_lines;
use crate::error::{CommandError, DetectionError};

/// Environment variables to hand to child processes.
pub type CommandEnv = Vec<(String, OsString)>;

/// Language toolchain adapter for package identity and discovery.
pub trait Toolchain: Send + Sync {
    /// Identifier of the package rooted at `root` (the module identity).
    fn root_package(&self, root: &Path) -> Result<String, DetectionError>;

    /// Every package identifier under `root`, resolved with `env` applied.
    fn list_packages(&self, root: &Path, env: &CommandEnv) -> Result<Vec<String>, DetectionError>;

    /// Environment needed for builds inside a snapshot under `staging_area`.
    fn isolated_env(&self, _staging_area: &Path) -> CommandEnv {
        Vec::new()
    }

    /// Where the snapshot of the repository lives inside `staging_area`.
    fn snapshot_root(&self, staging_area: &Path, root_package: &str) -> PathBuf {
        staging_area.join(root_package)
    }
}

/// Go modules/packages via `go list`.
#[derive(Debug, Clone, Default)]
pub struct GoToolchain;

impl Toolchain for GoToolchain {
    #[instrument(skip_all, fields(root = %root.display()))]
    fn root_package(&self, root: &Path) -> Result<String, DetectionError> {
        let out = go_list(root, &["-e", "."], &Vec::new())?;
        let package = out.trim().to_string();
        debug!(package = %package, "root package");
        Ok(package)
    }

    #[instrument(skip_all, fields(root = %root.display()))]
    fn list_packages(&self, root: &Path, env: &CommandEnv) -> Result<Vec<String>, DetectionError> {
        let out = go_list(root, &["./..."], env)?;
        Ok(sorted_lines(&out))
    }

    /// Prefix `GOPATH` with the staging area so import paths resolve inside the snapshot.
    ///
    /// Module downloads go to the user's own `GOMODCACHE` (resolved before the
    /// `GOPATH` change) and are written with `-modcacherw`, so nothing read-only
    /// lands in the staging area.
    fn isolated_env(&self, staging_area: &Path) -> CommandEnv {
        let mut paths = vec![staging_area.to_path_buf()];
        if let Some(existing) = std::env::var_os("GOPATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        let gopath = std::env::join_paths(paths)
            .unwrap_or_else(|_| staging_area.as_os_str().to_owned());
        let mut env = vec![("GOPATH".to_string(), gopath)];

        match go_env("GOMODCACHE") {
            Some(cache) => env.push(("GOMODCACHE".to_string(), cache)),
            None => warn!("could not resolve GOMODCACHE; relying on -modcacherw"),
        }
        let flags = std::env::var("GOFLAGS").ok();
        env.push((
            "GOFLAGS".to_string(),
            with_go_flag(flags.as_deref(), MODCACHE_RW).into(),
        ));
        env
    }

    fn snapshot_root(&self, staging_area: &Path, root_package: &str) -> PathBuf {
        staging_area.join("src").join(root_package)
    }
}

fn go_list(root: &Path, args: &[&str], env: &CommandEnv) -> Result<String, DetectionError> {
    let command = format!("go list {}", args.join(" "));
    let output = Command::new("go")
        .arg("list")
        .args(args)
        .envs(env.iter().map(|(key, value)| (key, value)))
        .current_dir(root)
        .output()
        .map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(CommandError::Failed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

const MODCACHE_RW: &str = "-modcacherw";

/// Value of `go env <name>` in the caller's environment, if set.
fn go_env(name: &str) -> Option<OsString> {
    let output = Command::new("go").args(["env", name]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then(|| OsString::from(value))
}

/// `existing` GOFLAGS with `flag` appended unless already present.
fn with_go_flag(existing: Option<&str>, flag: &str) -> String {
    let existing = existing.map(str::trim).unwrap_or_default();
    if existing.split_whitespace().any(|present| present == flag) {
        existing.to_string()
    } else if existing.is_empty() {
        flag.to_string()
    } else {
        format!("{existing} {flag}")
    }
}

/// Trees without build units: no packages are ever reported.
#[derive(Debug, Clone, Default)]
pub struct NoPackages;

impl Toolchain for NoPackages {
    fn root_package(&self, root: &Path) -> Result<String, DetectionError> {
        Ok(root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "root".to_string()))
    }

    fn list_packages(
        &self,
        _root: &Path,
        _env: &CommandEnv,
    ) -> Result<Vec<String>, DetectionError> {
        Ok(Vec::new())
    }
}
