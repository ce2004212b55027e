//! Error types for workspace construction, step-tree loading, and check runs.
//!
//! Construction errors ([`DetectionError`], [`StagingError`], [`ConfigError`])
//! abort a run before any check executes. [`CheckFailure`] is an execution
//! outcome: it travels on the results channel and the consumer decides whether
//! it is fatal.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A subprocess that could not be spawned or exited unsuccessfully.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("spawn {command}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// A version-control or package query failed while computing change sets.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{} is not inside a git work tree", .path.display())]
    NotARepository { path: PathBuf },

    #[error("could not find any commits in range \"{rev_spec}\"")]
    EmptyRange { rev_spec: String },

    #[error("unexpected output from {command}: '{entry}'")]
    Unparseable { command: String, entry: String },
}

/// A filesystem or checkout step failed while materializing the snapshot.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("I/O error at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk {}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },
}

/// Either half of workspace construction failed.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// The step-tree document or the settings file is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file \"{}\"", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to render config file: {error:#}\n=======\n{template}\n=======")]
    Render {
        template: String,
        error: minijinja::Error,
    },

    #[error("unable to parse config file: {error}\n=======\n{document}\n=======")]
    Parse {
        document: String,
        error: serde_yaml::Error,
    },

    #[error("invalid check at {location}: {reason}")]
    InvalidNode { location: String, reason: String },

    #[error("invalid settings {}: {reason}", .path.display())]
    Settings { path: PathBuf, reason: String },
}

/// A leaf command could not run or exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name} failed: `{}` {}\n{output}", .command.trim(), describe_status(.status))]
pub struct CheckFailure {
    /// Step name from the document.
    pub name: String,
    /// Rendered command line.
    pub command: String,
    /// Exit code, `None` if the process never ran or was killed by a signal.
    pub status: Option<i32>,
    /// Captured stdout and stderr (bounded).
    pub output: String,
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exited with status {code}"),
        None => "did not exit normally".to_string(),
    }
}
