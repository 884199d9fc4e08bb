//! `MockExecutor` — a test double for [`Executor`].
//!
//! Useful in engine unit tests where a real subprocess would be slow,
//! flaky, or irrelevant to what's being tested.

use std::fs::File;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::traits::{Executor, ExecutorContext};
use crate::ExecutorError;

/// Behaviour injected into `MockExecutor` at construction time.
pub enum MockBehaviour {
    /// Succeed (exit code 0), yielding `stdout` as the captured output.
    Succeed(String),
    /// Fail with the given exit code.
    FailExitCode(i32),
}

/// An executor that records every `run` call and returns a
/// programmer-specified result, with no subprocess involved.
pub struct MockExecutor {
    pub name: String,
    pub behaviour: MockBehaviour,
    pub calls: Arc<Mutex<usize>>,
}

impl MockExecutor {
    pub fn succeeding(name: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Succeed(stdout.into()),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing(name: impl Into<String>, exit_code: i32) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailExitCode(exit_code),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn set_stdout(&self, _file: File) {}
    fn set_stderr(&self, _file: File) {}

    fn kill(&self, _signal: &str) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn run(&self, _ctx: &ExecutorContext) -> Result<(), ExecutorError> {
        *self.calls.lock().unwrap() += 1;
        match &self.behaviour {
            MockBehaviour::Succeed(_) => Ok(()),
            MockBehaviour::FailExitCode(code) => Err(ExecutorError::ExitCode(*code)),
        }
    }

    fn captured_stdout(&self) -> Vec<u8> {
        match &self.behaviour {
            MockBehaviour::Succeed(s) => s.clone().into_bytes(),
            MockBehaviour::FailExitCode(_) => Vec::new(),
        }
    }
}
