//! Executor-level error type.

use thiserror::Error;

/// Errors returned by an [`crate::Executor`]'s `run` method.
///
/// The node runtime (in the `engine` crate) inspects the variant to decide
/// whether the attempt is a retryable failure, a fatal setup error, or a
/// signal-induced cancel.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The process ran to completion with a non-zero exit code.
    #[error("process exited with code {0}")]
    ExitCode(i32),

    /// The process was killed by a signal before it could exit normally.
    #[error("process was killed by signal '{0}'")]
    Killed(String),

    /// Setting up the process (spawning, opening files) failed.
    #[error("executor setup failed: {0}")]
    Setup(String),

    /// An I/O error occurred while the process was running.
    #[error("executor I/O error: {0}")]
    Io(#[from] std::io::Error),
}
