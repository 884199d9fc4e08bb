//! `CommandExecutor` — the built-in executor for shell-like steps.
//!
//! This is the default `command`/`script` executor: the one concrete
//! executor the core engine ships out of the box, running plain shell
//! invocations (`true`, `false`, `sleep 1`, `cat file`, …) against real
//! subprocesses rather than a mock. HTTP/Docker/SSH/mailer executors
//! remain external collaborators.

use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::Mutex;

use crate::traits::{Executor, ExecutorContext};
use crate::ExecutorError;

/// What a `CommandExecutor` runs: a resolved argv, or a shell script body.
#[derive(Debug, Clone)]
pub enum CommandBody {
    Argv(Vec<String>),
    Script(String),
}

/// Subprocess-backed executor used for ordinary `command`/`script` steps.
pub struct CommandExecutor {
    body: CommandBody,
    dir: PathBuf,
    env: Vec<(String, String)>,
    stdout_file: StdMutex<Option<File>>,
    stderr_file: StdMutex<Option<File>>,
    captured_stdout: std::sync::Arc<StdMutex<Vec<u8>>>,
    child: Mutex<Option<Child>>,
    kill_requested: StdMutex<Option<String>>,
}

impl CommandExecutor {
    pub fn new(body: CommandBody, dir: PathBuf, env: Vec<(String, String)>) -> Self {
        Self {
            body,
            dir,
            env,
            stdout_file: StdMutex::new(None),
            stderr_file: StdMutex::new(None),
            captured_stdout: std::sync::Arc::new(StdMutex::new(Vec::new())),
            child: Mutex::new(None),
            kill_requested: StdMutex::new(None),
        }
    }

    fn build_command(&self) -> tokio::process::Command {
        let mut cmd = match &self.body {
            CommandBody::Argv(argv) => {
                let mut c = tokio::process::Command::new(&argv[0]);
                c.args(&argv[1..]);
                c
            }
            CommandBody::Script(script) => {
                let mut c = tokio::process::Command::new("sh");
                c.arg("-c").arg(script);
                c
            }
        };
        cmd.current_dir(&self.dir);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    fn set_stdout(&self, file: File) {
        *self.stdout_file.lock().unwrap() = Some(file);
    }

    fn set_stderr(&self, file: File) {
        *self.stderr_file.lock().unwrap() = Some(file);
    }

    fn kill(&self, signal: &str) -> Result<(), ExecutorError> {
        let mut guard = self.child.try_lock();
        if let Ok(ref mut child_slot) = guard {
            if let Some(child) = child_slot.as_mut() {
                return send_signal(child, signal);
            }
        }
        // Not started yet (or lock contended mid-spawn): remember the
        // request so `run` aborts before the process is ever spawned.
        *self.kill_requested.lock().unwrap() = Some(signal.to_string());
        Ok(())
    }

    async fn run(&self, ctx: &ExecutorContext) -> Result<(), ExecutorError> {
        if let Some(signal) = self.kill_requested.lock().unwrap().clone() {
            return Err(ExecutorError::Killed(signal));
        }

        let mut command = self.build_command();
        let mut child = command
            .spawn()
            .map_err(|e| ExecutorError::Setup(format!("failed to spawn process: {e}")))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        // A kill requested between construction and spawn (lock contention
        // above) still wins: check again now that the child is stored.
        let late_kill = self.kill_requested.lock().unwrap().clone();
        if let Some(signal) = late_kill {
            let _ = send_signal(&mut child, &signal);
            let _ = child.wait().await;
            return Err(ExecutorError::Killed(signal));
        }

        let stdout_file = self.stdout_file.lock().unwrap().take();
        let stderr_file = self.stderr_file.lock().unwrap().take();
        let captured = self.captured_stdout.clone();

        let stdout_task = tokio::spawn(async move {
            if let Some(mut pipe) = stdout_pipe.take() {
                let mut buf = [0u8; 8192];
                let mut file = stdout_file;
                loop {
                    let n = pipe.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    captured.lock().unwrap().extend_from_slice(&buf[..n]);
                    if let Some(f) = file.as_mut() {
                        use std::io::Write;
                        let _ = f.write_all(&buf[..n]);
                    }
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            if let Some(mut pipe) = stderr_pipe.take() {
                let mut buf = [0u8; 8192];
                let mut file = stderr_file;
                loop {
                    let n = pipe.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    if let Some(f) = file.as_mut() {
                        use std::io::Write;
                        let _ = f.write_all(&buf[..n]);
                    }
                }
            }
        });

        *self.child.lock().await = Some(child);

        let status = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                let mut guard = self.child.lock().await;
                if let Some(child) = guard.as_mut() {
                    if send_signal(child, &ctx.stop_signal).is_err() {
                        let _ = child.start_kill();
                    }
                    let _ = child.wait().await;
                }
                None
            }
            status = async {
                let mut guard = self.child.lock().await;
                guard.as_mut().expect("spawned above").wait().await
            } => Some(status),
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        match status {
            None => Err(ExecutorError::Killed("cancel".to_string())),
            Some(Ok(status)) => {
                if status.success() {
                    Ok(())
                } else {
                    Err(ExecutorError::ExitCode(status.code().unwrap_or(-1)))
                }
            }
            Some(Err(e)) => Err(ExecutorError::Io(e)),
        }
    }

    fn captured_stdout(&self) -> Vec<u8> {
        self.captured_stdout.lock().unwrap().clone()
    }
}

#[cfg(unix)]
fn send_signal(child: &mut Child, signal: &str) -> Result<(), ExecutorError> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let sig = match signal {
        "SIGTERM" => libc::SIGTERM,
        "SIGINT" => libc::SIGINT,
        "SIGKILL" => libc::SIGKILL,
        "SIGHUP" => libc::SIGHUP,
        "SIGQUIT" => libc::SIGQUIT,
        _ => libc::SIGTERM,
    };
    // SAFETY: `pid` is a valid process id owned by `child`; sending a
    // signal to it is the documented way to request graceful shutdown.
    let rc = unsafe { libc::kill(pid as i32, sig) };
    if rc != 0 {
        return Err(ExecutorError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _signal: &str) -> Result<(), ExecutorError> {
    child
        .start_kill()
        .map_err(ExecutorError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ExecutorContext;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ExecutorContext {
        ExecutorContext {
            cancel: CancellationToken::new(),
            stop_signal: "SIGTERM".to_string(),
        }
    }

    #[tokio::test]
    async fn true_command_succeeds() {
        let exec = CommandExecutor::new(
            CommandBody::Argv(vec!["true".to_string()]),
            PathBuf::from("."),
            vec![],
        );
        assert!(exec.run(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn false_command_returns_exit_code() {
        let exec = CommandExecutor::new(
            CommandBody::Argv(vec!["false".to_string()]),
            PathBuf::from("."),
            vec![],
        );
        let err = exec.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ExitCode(1)));
    }

    #[tokio::test]
    async fn captures_stdout() {
        let exec = CommandExecutor::new(
            CommandBody::Argv(vec!["echo".to_string(), "hello".to_string()]),
            PathBuf::from("."),
            vec![],
        );
        exec.run(&ctx()).await.unwrap();
        assert_eq!(String::from_utf8(exec.captured_stdout()).unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn cancellation_kills_sleep() {
        let exec = std::sync::Arc::new(CommandExecutor::new(
            CommandBody::Argv(vec!["sleep".to_string(), "5".to_string()]),
            PathBuf::from("."),
            vec![],
        ));
        let token = CancellationToken::new();
        let ctx = ExecutorContext { cancel: token.clone(), stop_signal: "SIGTERM".to_string() };
        let exec2 = exec.clone();
        let handle = tokio::spawn(async move { exec2.run(&ctx).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        token.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("should finish promptly after cancel")
            .unwrap();
        assert!(result.is_err());
    }
}
