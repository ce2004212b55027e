//! Output capture for check steps.
//!
//! A failing step's report shows what the command printed. Both pipes drain on
//! their own threads, and each keeps at most `limit` bytes so a noisy step
//! cannot exhaust memory.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// One stream of a step's output, cut off at the capture limit.
#[derive(Debug, Default)]
pub struct Captured {
    pub kept: Vec<u8>,
    /// Bytes read past the limit and thrown away.
    pub dropped: usize,
}

impl Captured {
    fn append_to(&self, label: &str, report: &mut String) {
        if self.kept.is_empty() && self.dropped == 0 {
            return;
        }
        if !report.is_empty() && !report.ends_with('\n') {
            report.push('\n');
        }
        report.push_str(&String::from_utf8_lossy(&self.kept));
        if self.dropped > 0 {
            report.push_str(&format!("\n[{label}: {} more bytes not shown]\n", self.dropped));
        }
    }
}

/// Exit status and captured output of a finished step.
#[derive(Debug)]
pub struct StepOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
}

impl StepOutput {
    /// Text for a failure report: stdout then stderr.
    pub fn report(&self) -> String {
        let mut report = String::new();
        self.stdout.append_to("stdout", &mut report);
        self.stderr.append_to("stderr", &mut report);
        report
    }
}

/// Run `cmd` with stdin closed and capture up to `limit` bytes of each stream.
#[instrument(skip_all, fields(limit))]
pub fn capture_output(mut cmd: Command, limit: usize) -> Result<StepOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn command")?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?;
    let (status, stdout, stderr) = thread::scope(|scope| {
        let stdout = scope.spawn(move || capture(stdout, limit));
        let stderr = scope.spawn(move || capture(stderr, limit));
        let status = child.wait().context("wait for command");
        (status, finish(stdout), finish(stderr))
    });
    let (status, stdout, stderr) = (status?, stdout.context("stdout")?, stderr.context("stderr")?);

    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "step output over capture limit"
        );
    }
    debug!(exit_code = ?status.code(), "step process exited");
    Ok(StepOutput {
        status,
        stdout,
        stderr,
    })
}

fn finish(handle: thread::ScopedJoinHandle<'_, Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output reader panicked")))
}

/// Read `reader` to the end, keeping the first `limit` bytes.
fn capture<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.kept.len()));
        captured.kept.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}
