//! Core domain models for the DAG execution engine.
//!
//! These are the *compiled* types: the output of [`crate::compiler::Compiler`].
//! They are the source of truth for what a DAG looks like once validated —
//! nothing downstream (graph, scheduler, node runtime) ever looks at the
//! loosely-typed [`crate::spec`] input again.

use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

/// Reserved step/handler names that cannot be used as a user step name or ID.
pub const RESERVED_WORDS: &[&str] = &["env", "params", "onExit", "onSuccess", "onFailure", "onCancel"];

/// Step names longer than this are rejected at compile time.
pub const MAX_STEP_NAME_LEN: usize = 255;

pub const DEFAULT_HIST_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_MAX_CLEANUP_TIME: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ACTIVE_RUNS: u32 = 1;
pub const DEFAULT_MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Whether unspecified step dependencies default to the previous step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionType {
    /// Unspecified `depends` defaults to the previous step (§4.1 pass 8).
    Chain,
    /// No implicit wiring; every step's `depends` is exactly what was given.
    Graph,
}

impl Default for ExecutionType {
    fn default() -> Self {
        ExecutionType::Chain
    }
}

/// A single `KEY=VALUE` DAG-level environment entry, in declaration order.
#[derive(Debug, Clone)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// Positional and named default parameters (§4.1 pass 3).
#[derive(Debug, Clone, Default)]
pub struct Params {
    /// `$1`, `$2`, … in declaration order.
    pub positional: Vec<String>,
    /// Named parameters, insertion-ordered so environment export order is
    /// deterministic.
    pub named: IndexMap<String, String>,
}

/// A `{command, expected}` pair evaluated by the condition evaluator.
#[derive(Debug, Clone)]
pub struct Condition {
    pub command: String,
    /// `None` → truth via exit code == 0. `Some("re:...")` → regex match.
    /// `Some(other)` → equality match.
    pub expected: Option<String>,
}

/// `{limit, interval, exitCodes, backoff, maxInterval}` (§3 RetryPolicy).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub limit: u32,
    pub interval: Duration,
    /// Empty ⇒ retry on any non-zero exit code.
    pub exit_codes: Vec<i32>,
    /// `backoff > 1.0` multiplier; `None` ⇒ constant `interval`.
    pub backoff: Option<f64>,
    pub max_interval: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 0,
            interval: Duration::from_secs(0),
            exit_codes: Vec::new(),
            backoff: None,
            max_interval: None,
        }
    }
}

impl RetryPolicy {
    /// `min(interval × backoff^n, maxInterval)` when backoff is set, else
    /// a constant `interval`. `n` is 0-indexed per §3.
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        match self.backoff {
            Some(b) if b > 1.0 => {
                let secs = self.interval.as_secs_f64() * b.powi(n as i32);
                let capped = match self.max_interval {
                    Some(max) => secs.min(max.as_secs_f64()),
                    None => secs,
                };
                Duration::from_secs_f64(capped.max(0.0))
            }
            _ => self.interval,
        }
    }

    /// Whether attempt number `attempt` (the count of attempts already
    /// made, 0-indexed) should be retried given the terminating exit code.
    pub fn should_retry(&self, attempts_made: u32, exit_code: i32) -> bool {
        if attempts_made >= self.limit {
            return false;
        }
        if self.exit_codes.is_empty() {
            exit_code != 0
        } else {
            self.exit_codes.contains(&exit_code)
        }
    }
}

/// `while` continues as long as the predicate holds; `until` continues
/// until it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    While,
    Until,
}

/// What decides whether a repeat cycle continues.
#[derive(Debug, Clone)]
pub enum RepeatPredicate {
    Condition(Condition),
    ExitCode(Vec<i32>),
    /// Legacy boolean-only repeat: loop until canceled or failure.
    None,
}

/// `{mode, condition|exitCode, interval, limit, backoff, maxInterval}`.
#[derive(Debug, Clone)]
pub struct RepeatPolicy {
    pub mode: RepeatMode,
    pub predicate: RepeatPredicate,
    pub interval: Duration,
    pub limit: Option<u32>,
    pub backoff: Option<f64>,
    pub max_interval: Option<Duration>,
}

impl RepeatPolicy {
    /// The legacy boolean form: `repeat: true` ⇒ `while` with no predicate.
    pub fn legacy(interval: Duration) -> Self {
        Self {
            mode: RepeatMode::While,
            predicate: RepeatPredicate::None,
            interval,
            limit: None,
            backoff: None,
            max_interval: None,
        }
    }

    pub fn delay_for_cycle(&self, cycle: u32) -> Duration {
        match self.backoff {
            Some(b) if b > 1.0 => {
                let secs = self.interval.as_secs_f64() * b.powi(cycle as i32);
                let capped = match self.max_interval {
                    Some(max) => secs.min(max.as_secs_f64()),
                    None => secs,
                };
                Duration::from_secs_f64(capped.max(0.0))
            }
            _ => self.interval,
        }
    }
}

/// `{failure, skipped, exitCode[], output[], markSuccess}` (§3 ContinueOn).
#[derive(Debug, Clone, Default)]
pub struct ContinueOn {
    pub failure: bool,
    pub skipped: bool,
    pub exit_code: Vec<i32>,
    /// Patterns matched against captured stdout OR stderr; `re:`-prefixed
    /// entries are regexes (§9 open question (c): both streams checked).
    pub output: Vec<String>,
    pub mark_success: bool,
}

/// The executor's type tag plus its free-form typed configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub kind: String,
    pub config: Value,
}

impl ExecutorConfig {
    pub fn command() -> Self {
        Self {
            kind: "command".to_string(),
            config: Value::Null,
        }
    }
}

/// A step carries exactly one of these — illegal states (both a command and
/// a script, or neither) are unrepresentable once compiled.
#[derive(Debug, Clone)]
pub enum StepBody {
    Command(Vec<String>),
    Script(String),
    ChildDag { name: String, params: String },
    /// A step whose behaviour is entirely defined by its executor config
    /// (e.g. an `http`/`mailer` executor with no shell command).
    Pure,
}

/// A single unit of work within a DAG.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub id: Option<String>,
    pub dir: PathBuf,
    pub executor: ExecutorConfig,
    pub body: StepBody,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub output: Option<String>,
    pub depends: Vec<String>,
    /// Step-level `KEY=VALUE` overrides, highest-precedence entry in the
    /// variable scope (§4.2: "step env > output vars > DAG env > process env").
    pub env: Vec<(String, String)>,
    pub continue_on: ContinueOn,
    pub retry_policy: Option<RetryPolicy>,
    pub repeat_policy: Option<RepeatPolicy>,
    pub preconditions: Vec<Condition>,
    pub signal_on_stop: Option<String>,
    /// `parallel` fan-out descriptor, opaque at this layer: a list of JSON
    /// items this step is instantiated once per item for. Left as raw JSON
    /// because expanding it is a compiler concern external callers may
    /// special-case; the scheduler treats each expansion as its own `Step`.
    pub parallel_items: Option<Vec<Value>>,
}

/// Parsed cron schedule, data-only — execution is an external collaborator.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub start: Vec<String>,
    pub stop: Vec<String>,
    pub restart: Vec<String>,
}

/// A complete, validated workflow definition.
#[derive(Debug, Clone)]
pub struct Dag {
    pub name: String,
    pub group: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub execution_type: ExecutionType,
    pub steps: Vec<Step>,
    pub on_exit: Option<Step>,
    pub on_success: Option<Step>,
    pub on_failure: Option<Step>,
    pub on_cancel: Option<Step>,
    pub preconditions: Vec<Condition>,
    pub schedule: Option<Schedule>,
    pub params: Params,
    pub env: Vec<EnvVar>,
    pub timeout: Option<Duration>,
    pub delay: Option<Duration>,
    pub restart_wait: Option<Duration>,
    pub max_active_steps: u32,
    pub max_active_runs: u32,
    pub max_cleanup_time: Duration,
    pub hist_retention_days: u32,
    pub max_output_size: usize,
    pub nested: IndexMap<String, Dag>,
}

impl Dag {
    pub fn step_by_name(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}
