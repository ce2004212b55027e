//! Executor abstraction for leaf steps.
//!
//! The [`Executor`] trait decouples the check engine from how a command is
//! actually run. [`CommandExecutor`] runs it through a shell in the effective
//! root; dry-run is a property of the executor so the same tree can run either
//! way. Tests use scripted executors that never spawn processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::core::check_tree::RunStep;
use crate::error::CheckFailure;
use crate::io::process::capture_output;
use crate::io::toolchain::CommandEnv;

/// A step that passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPassed {
    pub name: String,
    /// True if the command was only reported, not run.
    pub dry_run: bool,
    pub elapsed: Duration,
}

/// Outcome of one leaf step.
pub type StepResult = Result<StepPassed, CheckFailure>;

/// Runs one leaf step and reports its outcome.
pub trait Executor: Send + Sync {
    fn execute(&self, step: &RunStep) -> StepResult;
}

/// Executor that runs each command through a shell.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Log commands instead of running them.
    pub dry_run: bool,
    /// Program and leading arguments; the command text is appended.
    pub shell: Vec<String>,
    /// Working directory for every command (the effective root).
    pub workdir: PathBuf,
    /// Extra environment for every command.
    pub env: CommandEnv,
    pub output_limit_bytes: usize,
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(step = %step.name, dry_run = self.dry_run))]
    fn execute(&self, step: &RunStep) -> StepResult {
        let start = Instant::now();
        if self.dry_run {
            info!(command = %step.command.trim(), "dry run, not executing");
            return Ok(StepPassed {
                name: step.name.clone(),
                dry_run: true,
                elapsed: start.elapsed(),
            });
        }

        let Some((program, leading)) = self.shell.split_first() else {
            return Err(failure(step, None, "no shell configured".to_string()));
        };
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg(&step.command)
            .current_dir(&self.workdir)
            .envs(self.env.iter().map(|(key, value)| (key, value)));

        debug!(command = %step.command.trim(), workdir = %self.workdir.display(), "running step");
        let output = match capture_output(cmd, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "step could not run");
                return Err(failure(step, None, format!("{err:#}")));
            }
        };

        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "step failed");
            return Err(failure(step, output.status.code(), output.report()));
        }

        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "step passed");
        Ok(StepPassed {
            name: step.name.clone(),
            dry_run: false,
            elapsed: start.elapsed(),
        })
    }
}

fn failure(step: &RunStep, status: Option<i32>, output: String) -> CheckFailure {
    CheckFailure {
        name: step.name.clone(),
        command: step.command.clone(),
        status,
        output,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn step(command: &str) -> RunStep {
        RunStep {
            name: "check".to_string(),
            description: None,
            command: command.to_string(),
        }
    }

    fn executor(workdir: PathBuf, dry_run: bool) -> CommandExecutor {
        CommandExecutor {
            dry_run,
            shell: vec!["sh".to_string(), "-c".to_string()],
            workdir,
            env: vec![("GITIX_TEST_VALUE".to_string(), "from-env".into())],
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn dry_run_reports_success_without_running() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = executor(temp.path().to_path_buf(), true);

        let passed = exec.execute(&step("touch ran; exit 1")).expect("dry run passes");

        assert!(passed.dry_run);
        assert!(!temp.path().join("ran").exists());
    }

    #[test]
    fn runs_in_workdir_with_env() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = executor(temp.path().to_path_buf(), false);

        let passed = exec
            .execute(&step("printf %s \"$GITIX_TEST_VALUE\" > out.txt"))
            .expect("step passes");

        assert!(!passed.dry_run);
        let written = std::fs::read_to_string(temp.path().join("out.txt")).expect("read");
        assert_eq!(written, "from-env");
    }

    #[test]
    fn non_zero_exit_is_a_check_failure_with_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = executor(temp.path().to_path_buf(), false);

        let failure = exec
            .execute(&step("echo broken >&2; exit 4"))
            .unwrap_err();

        assert_eq!(failure.name, "check");
        assert_eq!(failure.status, Some(4));
        assert!(failure.output.contains("broken"));
    }

    #[test]
    fn missing_shell_is_a_check_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut exec = executor(temp.path().to_path_buf(), false);
        exec.shell = vec!["gitix-no-such-shell".to_string()];

        let failure = exec.execute(&step("true")).unwrap_err();

        assert_eq!(failure.status, None);
        assert!(failure.output.contains("spawn command"));
    }
}
