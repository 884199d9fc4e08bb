//! The `Executor` trait — the contract every step implementation must fulfil.

use std::fs::File;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::ExecutorError;

/// Context handed to an executor when it is asked to run.
///
/// Construction-time configuration (argv, script body, working directory,
/// environment) belongs to the concrete executor itself — it is baked in by
/// the registry closure that builds the executor for a given step. `Run`
/// only needs the things that change per-attempt: the cancellation source
/// shared with the scheduler's `signalOnStop`/timeout machinery.
pub struct ExecutorContext {
    /// Cancelled when the scheduler wants this node's process to stop.
    pub cancel: CancellationToken,
    /// Portable signal name (`SIGTERM`, `SIGINT`, `SIGKILL`, …) sent to the
    /// process when `cancel` fires, taken from the step's `signalOnStop`
    /// or the scheduler's configured default.
    pub stop_signal: String,
}

/// The core executor trait.
///
/// All built-in executors (and, in a full product, HTTP/Docker/SSH/mailer
/// executors) implement this. `kill` must be callable concurrently with
/// `run`, and before `run` has even started — a `Kill` that races the
/// process spawn must still prevent it from running to completion.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Redirect stdout to `file`. Must be called before `run`.
    fn set_stdout(&self, file: File);

    /// Redirect stderr to `file`. Must be called before `run`.
    fn set_stderr(&self, file: File);

    /// Send `signal` (a portable name such as `SIGTERM`, `SIGINT`,
    /// `SIGKILL`) to the running (or not-yet-started) process.
    fn kill(&self, signal: &str) -> Result<(), ExecutorError>;

    /// Run to completion. Returns `Ok(())` on exit code 0, otherwise an
    /// `ExecutorError` that carries the non-zero exit code or kill reason.
    async fn run(&self, ctx: &ExecutorContext) -> Result<(), ExecutorError>;

    /// Bytes written to stdout during the run, if the caller wants to
    /// capture it for an `Output: VAR` declaration. Only meaningful after
    /// `run` has returned.
    fn captured_stdout(&self) -> Vec<u8> {
        Vec::new()
    }
}
