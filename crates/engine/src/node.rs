//! Node Runtime: the per-attempt lifecycle for a single node (§4.6).

use std::fs::File;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use nodes::{ExecutorContext, ExecutorRegistry, ExecutorSpec};

use crate::condition::{self, output_matches};
use crate::graph::{Node, NodeStatus};
use crate::model::{RepeatMode, RepeatPredicate, Step, StepBody};
use crate::vars::{OutputVars, VarScope};

/// Everything the node runtime needs that isn't carried on the `Step`
/// itself — run identity, logging location, and the cancellation source
/// shared with the scheduler.
pub struct NodeContext {
    pub dag_name: String,
    pub run_id: String,
    pub log_dir: PathBuf,
    pub dag_env: Vec<(String, String)>,
    pub predecessor_vars: OutputVars,
    pub cancel: CancellationToken,
    pub max_output_size: usize,
}

pub struct NodeOutcome {
    pub status: NodeStatus,
    pub error: Option<String>,
}

struct AttemptResult {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

enum AttemptError {
    Setup(String),
    Cancelled,
    OutputTooLarge,
}

fn build_scope(node: &Node, ctx: &NodeContext) -> VarScope {
    VarScope {
        step_env: node.step.env.clone(),
        output_vars: node.state().output_variables,
        dag_env: ctx.dag_env.clone(),
    }
}

async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> Result<(), ()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(()),
    }
}

fn log_file_path(ctx: &NodeContext, step_name: &str, stream: &str) -> PathBuf {
    ctx.log_dir.join(format!("{}.{}.{}.log", ctx.run_id, step_name, stream))
}

async fn resolve_body(step: &Step, scope: &VarScope) -> (Option<Vec<String>>, Option<String>) {
    match &step.body {
        StepBody::Command(argv) => {
            let mut resolved = Vec::with_capacity(argv.len());
            for a in argv {
                resolved.push(scope.substitute(a).await);
            }
            (Some(resolved), None)
        }
        StepBody::Script(script) => (None, Some(scope.substitute(script).await)),
        StepBody::ChildDag { name, params } => (Some(vec![name.clone(), scope.substitute(params).await]), None),
        StepBody::Pure => (None, None),
    }
}

/// Setup + Run phases (§4.6 steps 2-3) for a single attempt.
async fn run_attempt(
    node: &Node,
    ctx: &NodeContext,
    registry: &ExecutorRegistry,
    scope: &VarScope,
) -> Result<AttemptResult, AttemptError> {
    let step = &node.step;

    if !step.dir.exists() {
        return Err(AttemptError::Setup(format!(
            "working directory '{}' does not exist",
            step.dir.display()
        )));
    }

    let (argv, script) = resolve_body(step, scope).await;

    let mut env = ctx.dag_env.clone();
    env.extend(step.env.clone());
    env.push(("DAG_NAME".to_string(), ctx.dag_name.clone()));
    env.push(("DAG_RUN_ID".to_string(), ctx.run_id.clone()));
    env.push(("DAG_RUN_STEP_NAME".to_string(), step.name.clone()));

    let exec_spec = ExecutorSpec {
        dir: &step.dir,
        env: &env,
        argv: argv.as_deref(),
        script: script.as_deref(),
        config: &step.executor.config,
    };

    let executor = registry
        .build(&step.executor.kind, &exec_spec)
        .map_err(AttemptError::Setup)?;

    let stdout_path = step.stdout.clone().unwrap_or_else(|| log_file_path(ctx, &step.name, "stdout"));
    let stderr_path = step.stderr.clone().unwrap_or_else(|| log_file_path(ctx, &step.name, "stderr"));

    if let Some(parent) = stdout_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AttemptError::Setup(e.to_string()))?;
    }
    let stdout_file = File::create(&stdout_path).map_err(|e| AttemptError::Setup(e.to_string()))?;
    let stderr_file = File::create(&stderr_path).map_err(|e| AttemptError::Setup(e.to_string()))?;
    executor.set_stdout(stdout_file);
    executor.set_stderr(stderr_file);

    node.with_state_mut(|s| {
        s.stdout_file = Some(stdout_path.clone());
        s.stderr_file = Some(stderr_path.clone());
    });

    let exec_ctx = ExecutorContext {
        cancel: ctx.cancel.clone(),
        stop_signal: step.signal_on_stop.clone().unwrap_or_else(|| "SIGTERM".to_string()),
    };

    let run_result = executor.run(&exec_ctx).await;

    let captured = executor.captured_stdout();
    if captured.len() > ctx.max_output_size {
        return Err(AttemptError::OutputTooLarge);
    }
    let stdout = String::from_utf8_lossy(&captured).trim().to_string();
    let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default().trim().to_string();

    match run_result {
        Ok(()) => Ok(AttemptResult { exit_code: 0, stdout, stderr }),
        Err(nodes::ExecutorError::ExitCode(code)) => Ok(AttemptResult { exit_code: code, stdout, stderr }),
        Err(nodes::ExecutorError::Killed(_)) => Err(AttemptError::Cancelled),
        Err(e) => Err(AttemptError::Setup(e.to_string())),
    }
}

async fn repeat_should_continue(predicate: &RepeatPredicate, mode: RepeatMode, scope: &VarScope, last_exit_code: i32) -> bool {
    let predicate_holds = match predicate {
        RepeatPredicate::Condition(cond) => condition::eval(scope, cond).await.unwrap_or(false),
        RepeatPredicate::ExitCode(codes) => codes.contains(&last_exit_code),
        RepeatPredicate::None => true,
    };
    match mode {
        RepeatMode::While => predicate_holds,
        RepeatMode::Until => !predicate_holds,
    }
}

fn record_success(node: &Node, result: &AttemptResult) {
    let step = &node.step;
    if let Some(var_name) = &step.output {
        node.with_state_mut(|s| s.output_variables.set(var_name.clone(), result.stdout.clone()));
    }
    node.with_state_mut(|s| {
        s.status = NodeStatus::Success;
        s.exit_code = Some(0);
        s.error = None;
        s.finished_at = Some(Instant::now());
    });
}

fn record_failure(node: &Node, result: &AttemptResult, error: Option<String>) {
    let step = &node.step;
    let tolerated = step.continue_on.failure
        || step.continue_on.exit_code.contains(&result.exit_code)
        || output_matches(&step.continue_on.output, &result.stdout, &result.stderr);
    let status = if tolerated && step.continue_on.mark_success {
        NodeStatus::Success
    } else {
        NodeStatus::Error
    };
    if status == NodeStatus::Success {
        if let Some(var_name) = &step.output {
            node.with_state_mut(|s| s.output_variables.set(var_name.clone(), result.stdout.clone()));
        }
    }
    node.with_state_mut(|s| {
        s.status = status;
        s.exit_code = Some(result.exit_code);
        s.error = error.clone();
        s.failure_tolerated = tolerated;
        s.finished_at = Some(Instant::now());
    });
}

fn record_cancel(node: &Node) {
    node.with_state_mut(|s| {
        s.status = NodeStatus::Cancel;
        s.finished_at = Some(Instant::now());
    });
}

fn record_skipped(node: &Node, reason: String) {
    node.with_state_mut(|s| {
        s.status = NodeStatus::Skipped;
        s.error = Some(reason.clone());
        s.finished_at = Some(Instant::now());
    });
}

/// Drive one node through preconditions, the retry loop, and the repeat
/// loop, mutating its `NodeState` in place and returning the final status.
#[instrument(skip(node, ctx, registry), fields(step = %node.step.name))]
pub async fn run_node(node: &Node, ctx: &NodeContext, registry: &ExecutorRegistry) -> NodeOutcome {
    let step = &node.step;

    node.with_state_mut(|s| {
        s.started_at = Some(Instant::now());
        s.output_variables.merge_from(&ctx.predecessor_vars);
    });

    let scope = build_scope(node, ctx);

    for (i, cond) in step.preconditions.iter().enumerate() {
        match condition::eval(&scope, cond).await {
            Ok(true) => {}
            Ok(false) => {
                record_skipped(node, format!("precondition {i} did not match"));
                return NodeOutcome { status: NodeStatus::Skipped, error: None };
            }
            Err(e) => {
                record_skipped(node, e.to_string());
                return NodeOutcome { status: NodeStatus::Skipped, error: Some(e.to_string()) };
            }
        }
    }

    node.with_state_mut(|s| s.status = NodeStatus::Running);

    let mut retry_count: u32 = 0;
    let mut done_count: u32 = 0;

    loop {
        if ctx.cancel.is_cancelled() {
            record_cancel(node);
            return NodeOutcome { status: NodeStatus::Cancel, error: None };
        }

        let scope = build_scope(node, ctx);
        let attempt = run_attempt(node, ctx, registry, &scope).await;

        let result = match attempt {
            Ok(result) => result,
            Err(AttemptError::Cancelled) => {
                record_cancel(node);
                return NodeOutcome { status: NodeStatus::Cancel, error: None };
            }
            Err(AttemptError::OutputTooLarge) => {
                let dummy = AttemptResult { exit_code: -1, stdout: String::new(), stderr: String::new() };
                record_failure(node, &dummy, Some("captured output exceeded maxOutputSize".to_string()));
                return NodeOutcome {
                    status: node.status(),
                    error: Some("captured output exceeded maxOutputSize".to_string()),
                };
            }
            Err(AttemptError::Setup(msg)) => {
                if let Some(retry) = &step.retry_policy {
                    if retry.should_retry(retry_count, -1) {
                        retry_count += 1;
                        node.with_state_mut(|s| {
                            s.retry_count = retry_count;
                            s.retried_at = Some(Instant::now());
                        });
                        let delay = retry.delay_for_attempt(retry_count - 1);
                        if sleep_cancellable(delay, &ctx.cancel).await.is_err() {
                            record_cancel(node);
                            return NodeOutcome { status: NodeStatus::Cancel, error: None };
                        }
                        continue;
                    }
                }
                let dummy = AttemptResult { exit_code: -1, stdout: String::new(), stderr: String::new() };
                record_failure(node, &dummy, Some(msg.clone()));
                return NodeOutcome { status: node.status(), error: Some(msg) };
            }
        };

        if result.exit_code != 0 {
            if let Some(retry) = &step.retry_policy {
                if retry.should_retry(retry_count, result.exit_code) {
                    retry_count += 1;
                    node.with_state_mut(|s| {
                        s.retry_count = retry_count;
                        s.retried_at = Some(Instant::now());
                    });
                    let delay = retry.delay_for_attempt(retry_count - 1);
                    if sleep_cancellable(delay, &ctx.cancel).await.is_err() {
                        record_cancel(node);
                        return NodeOutcome { status: NodeStatus::Cancel, error: None };
                    }
                    continue;
                }
            }
            record_failure(node, &result, None);
            return NodeOutcome { status: node.status(), error: None };
        }

        // Success-equivalent outcome: consider the repeat policy.
        match &step.repeat_policy {
            None => {
                record_success(node, &result);
                return NodeOutcome { status: NodeStatus::Success, error: None };
            }
            Some(repeat) => {
                done_count += 1;
                node.with_state_mut(|s| s.done_count = done_count);
                if let Some(var_name) = &step.output {
                    node.with_state_mut(|s| s.output_variables.set(var_name.clone(), result.stdout.clone()));
                }

                if ctx.cancel.is_cancelled() {
                    record_cancel(node);
                    return NodeOutcome { status: NodeStatus::Cancel, error: None };
                }

                let scope = build_scope(node, ctx);
                let should_continue =
                    repeat_should_continue(&repeat.predicate, repeat.mode, &scope, result.exit_code).await;

                let limit_reached = repeat.limit.map(|l| done_count >= l).unwrap_or(false);

                if !should_continue || limit_reached {
                    record_success(node, &result);
                    return NodeOutcome { status: NodeStatus::Success, error: None };
                }

                let delay = repeat.delay_for_cycle(done_count);
                if sleep_cancellable(delay, &ctx.cancel).await.is_err() {
                    record_cancel(node);
                    return NodeOutcome { status: NodeStatus::Cancel, error: None };
                }
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContinueOn, ExecutorConfig, RetryPolicy};
    use nodes::ExecutorRegistry;
    use std::time::Duration as StdDuration;

    fn make_node(body: crate::model::StepBody) -> Node {
        let step = Step {
            name: "s".to_string(),
            id: None,
            dir: PathBuf::from("."),
            executor: ExecutorConfig::command(),
            body,
            stdout: None,
            stderr: None,
            output: None,
            depends: vec![],
            env: vec![],
            continue_on: ContinueOn::default(),
            retry_policy: None,
            repeat_policy: None,
            preconditions: vec![],
            signal_on_stop: None,
            parallel_items: None,
        };
        Node {
            index: crate::graph::NodeIndex(0),
            step,
            state: std::sync::Mutex::new(crate::graph::NodeState::default()),
        }
    }

    fn test_ctx(log_dir: PathBuf) -> NodeContext {
        NodeContext {
            dag_name: "test".to_string(),
            run_id: "run1".to_string(),
            log_dir,
            dag_env: vec![],
            predecessor_vars: OutputVars::new(),
            cancel: CancellationToken::new(),
            max_output_size: 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn successful_command_terminates_success() {
        let node = make_node(StepBody::Command(vec!["true".to_string()]));
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let registry = ExecutorRegistry::with_defaults();
        let outcome = run_node(&node, &ctx, &registry).await;
        assert_eq!(outcome.status, NodeStatus::Success);
    }

    #[tokio::test]
    async fn failing_command_with_tolerated_exit_code_and_mark_success() {
        let mut node = make_node(StepBody::Command(vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()]));
        node.step.continue_on = ContinueOn {
            failure: false,
            skipped: false,
            exit_code: vec![1],
            output: vec![],
            mark_success: true,
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let registry = ExecutorRegistry::with_defaults();
        let outcome = run_node(&node, &ctx, &registry).await;
        assert_eq!(outcome.status, NodeStatus::Success);
    }

    #[tokio::test]
    async fn retry_policy_retries_until_limit() {
        let mut node = make_node(StepBody::Command(vec!["false".to_string()]));
        node.step.retry_policy = Some(RetryPolicy {
            limit: 2,
            interval: StdDuration::from_millis(1),
            exit_codes: vec![],
            backoff: None,
            max_interval: None,
        });
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());
        let registry = ExecutorRegistry::with_defaults();
        let outcome = run_node(&node, &ctx, &registry).await;
        assert_eq!(outcome.status, NodeStatus::Error);
        assert_eq!(node.state().retry_count, 2);
    }
}
