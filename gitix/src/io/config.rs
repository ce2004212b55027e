//! Gate settings stored in `.gitix.toml` at the repository root.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings file name, looked up at the git root.
pub const SETTINGS_FILE: &str = ".gitix.toml";

/// Which toolchain discovers build units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainKind {
    #[default]
    Go,
    None,
}

/// Gate settings (TOML).
///
/// Missing fields default to values suited to a Go repository. Command-line
/// flags override what is set here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitixConfig {
    /// Git pathspecs limiting which changes count.
    pub path_spec: Vec<String>,

    pub toolchain: ToolchainKind,

    /// Program and leading arguments used to run each step's command.
    pub shell: Vec<String>,

    /// Truncate each step's captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Stage with a symlinked shadow copy instead of a full index checkout.
    pub shadow_link: bool,
}

impl Default for GitixConfig {
    fn default() -> Self {
        Self {
            path_spec: default_path_spec(),
            toolchain: ToolchainKind::default(),
            shell: vec!["sh".to_string(), "-c".to_string()],
            output_limit_bytes: 1_000_000,
            shadow_link: false,
        }
    }
}

/// All Go sources outside `vendor/`.
pub fn default_path_spec() -> Vec<String> {
    vec!["*.go".to_string(), ":(exclude)vendor/".to_string()]
}

impl GitixConfig {
    pub fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Settings {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if self.path_spec.is_empty() {
            return Err(invalid("path_spec must be a non-empty array"));
        }
        if self.shell.is_empty() || self.shell[0].trim().is_empty() {
            return Err(invalid("shell must be a non-empty array"));
        }
        if self.output_limit_bytes == 0 {
            return Err(invalid("output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `GitixConfig::default()`.
pub fn load_config(path: &Path) -> Result<GitixConfig, ConfigError> {
    if !path.exists() {
        return Ok(GitixConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: GitixConfig = toml::from_str(&contents).map_err(|err| ConfigError::Settings {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    cfg.validate(path)?;
    Ok(cfg)
}
