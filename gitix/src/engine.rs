//! Check execution: walk a [`CheckNode`] tree and stream leaf outcomes.
//!
//! Every leaf sends exactly one [`StepResult`] on the results channel. Serial
//! groups stop at their first failing child; parallel groups run every child
//! to completion on its own thread. The channel closes once the whole tree has
//! finished, so a consumer can drain it with a plain `for` loop.
//!
//! A panic while running a step is reported as that step's failure.
//!
//! There is no cancellation. A consumer that stops reading after the first
//! failure leaves the remaining branches to finish unobserved.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument};

use crate::core::check_tree::CheckNode;
use crate::error::CheckFailure;
use crate::io::executor::{Executor, StepPassed, StepResult};

/// Evaluate `tree` on a background thread, sending leaf outcomes to `results`.
///
/// `results` is dropped when the whole tree is done, closing the channel once
/// every other sender is gone.
pub fn run_checks(
    tree: Arc<CheckNode>,
    executor: Arc<dyn Executor>,
    results: SyncSender<StepResult>,
) -> JoinHandle<bool> {
    thread::spawn(move || {
        let evaluated = panic::catch_unwind(AssertUnwindSafe(|| {
            evaluate(&tree, executor.as_ref(), &results)
        }));
        let passed = evaluated.unwrap_or_else(|payload| {
            let _ = results.send(Err(panic_failure("check tree", "", payload.as_ref())));
            false
        });
        debug!(passed, "check tree finished");
        passed
    })
}

/// Start evaluating `tree` and return the receiving end of an unbuffered results channel.
pub fn start_checks(tree: Arc<CheckNode>, executor: Arc<dyn Executor>) -> Receiver<StepResult> {
    let (sender, receiver) = mpsc::sync_channel(0);
    // Detached; the channel closing is the completion signal.
    let _handle = run_checks(tree, executor, sender);
    receiver
}

/// True if every leaf that ran passed.
fn evaluate(node: &CheckNode, executor: &dyn Executor, results: &SyncSender<StepResult>) -> bool {
    match node {
        CheckNode::Run(step) => {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(step)))
                .unwrap_or_else(|payload| {
                    Err(panic_failure(&step.name, &step.command, payload.as_ref()))
                });
            let passed = outcome.is_ok();
            // A consumer that stopped reading is not an error here.
            let _ = results.send(outcome);
            passed
        }
        CheckNode::Serial(children) => children
            .iter()
            .all(|child| evaluate(child, executor, results)),
        CheckNode::Parallel(children) => thread::scope(|scope| {
            let handles: Vec<_> = children
                .iter()
                .map(|child| {
                    let results = results.clone();
                    scope.spawn(move || evaluate(child, executor, &results))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|payload| {
                        let failure = panic_failure("parallel branch", "", payload.as_ref());
                        let _ = results.send(Err(failure));
                        false
                    })
                })
                .fold(true, |all, passed| all && passed)
        }),
    }
}

fn panic_failure(name: &str, command: &str, payload: &(dyn Any + Send)) -> CheckFailure {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(step = name, message = %message, "check panicked");
    CheckFailure {
        name: name.to_string(),
        command: command.to_string(),
        status: None,
        output: format!("panicked: {message}"),
    }
}

/// What a fully successful run looked like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub dry_run: usize,
    pub elapsed: Duration,
}

/// Drain `results` until it closes or a failure arrives.
///
/// Returns the first failure without waiting for the rest of the tree.
/// `on_pass` sees every passing step in arrival order.
#[instrument(skip_all)]
pub fn wait_for_first_failure(
    results: Receiver<StepResult>,
    mut on_pass: impl FnMut(&StepPassed),
) -> Result<RunSummary, CheckFailure> {
    let start = Instant::now();
    let mut summary = RunSummary::default();
    for outcome in results {
        let passed = outcome?;
        summary.passed += 1;
        if passed.dry_run {
            summary.dry_run += 1;
        }
        on_pass(&passed);
    }
    summary.elapsed = start.elapsed();
    info!(passed = summary.passed, "all checks passed");
    Ok(summary)
}
