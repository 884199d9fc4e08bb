//! Loosely-typed specification input.
//!
//! `spec.md` §9 calls the source format's free-form maps out explicitly:
//! command/executor/depends/schedule each accept a scalar, a sequence, or a
//! map. The `*Spec` types here are the "idiomatic substitute" — a
//! discriminated union per dynamic field — that [`crate::compiler::Compiler`]
//! normalizes into the uniform [`crate::model`] types. YAML parsing itself
//! is out of scope (§1); these types are what a surface-syntax layer would
//! deserialize into, or what a caller builds up directly.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A field that accepts either a single value or a sequence of values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

/// A value that may be a literal or a string expression resolved at
/// runtime against parameters/environment (§3 RetryPolicy: "limit and
/// interval may be literal or string-typed expressions").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarOrExpr {
    Int(i64),
    Expr(String),
}

/// `backoff` accepts a bare boolean (`true` ≡ `2.0`) or a numeric multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackoffSpec {
    Bool(bool),
    Factor(f64),
}

impl BackoffSpec {
    pub fn as_factor(&self) -> Option<f64> {
        match self {
            BackoffSpec::Bool(true) => Some(2.0),
            BackoffSpec::Bool(false) => None,
            BackoffSpec::Factor(f) => Some(*f),
        }
    }
}

/// `command` accepts a scalar string (split shell-style) or a sequence
/// (first element is the program, the rest are args, string-coerced).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandInput {
    Scalar(String),
    Seq(Vec<Value>),
}

/// `executor` accepts a scalar (type only) or a map `{type, config}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutorInput {
    Scalar(String),
    Map {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        config: Value,
    },
}

/// `depends` accepts a scalar, a sequence, or is entirely absent.
pub type DependsInput = OneOrMany<String>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConditionSpec {
    pub condition: String,
    #[serde(default)]
    pub expected: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContinueOnSpec {
    #[serde(default)]
    pub failure: Option<bool>,
    #[serde(default)]
    pub skipped: Option<bool>,
    #[serde(rename = "exitCode", default)]
    pub exit_code: Option<OneOrMany<i32>>,
    #[serde(default)]
    pub output: Option<OneOrMany<String>>,
    #[serde(rename = "markSuccess", default)]
    pub mark_success: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryPolicySpec {
    #[serde(default)]
    pub limit: Option<ScalarOrExpr>,
    #[serde(default)]
    pub interval: Option<ScalarOrExpr>,
    #[serde(rename = "exitCodes", default)]
    pub exit_codes: Option<OneOrMany<i32>>,
    #[serde(default)]
    pub backoff: Option<BackoffSpec>,
    #[serde(rename = "maxInterval", default)]
    pub max_interval: Option<ScalarOrExpr>,
}

/// `repeat` accepts a bare boolean (legacy) or an explicit mode string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatInput {
    Bool(bool),
    Mode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepeatPolicySpec {
    #[serde(default)]
    pub repeat: Option<RepeatInput>,
    #[serde(default)]
    pub condition: Option<ConditionSpec>,
    #[serde(rename = "exitCode", default)]
    pub exit_code: Option<OneOrMany<i32>>,
    #[serde(default)]
    pub interval: Option<ScalarOrExpr>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub backoff: Option<BackoffSpec>,
    #[serde(rename = "maxInterval", default)]
    pub max_interval: Option<ScalarOrExpr>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub executor: Option<ExecutorInput>,
    #[serde(default)]
    pub command: Option<CommandInput>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub depends: Option<DependsInput>,
    #[serde(rename = "continueOn", default)]
    pub continue_on: Option<ContinueOnSpec>,
    #[serde(rename = "retryPolicy", default)]
    pub retry_policy: Option<RetryPolicySpec>,
    #[serde(rename = "repeatPolicy", default)]
    pub repeat_policy: Option<RepeatPolicySpec>,
    #[serde(rename = "mailOnError", default)]
    pub mail_on_error: Option<bool>,
    #[serde(default)]
    pub preconditions: Vec<ConditionSpec>,
    #[serde(rename = "signalOnStop", default)]
    pub signal_on_stop: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default)]
    pub parallel: Option<Value>,
    #[serde(default)]
    pub env: Vec<Value>,
    #[serde(rename = "workerSelector", default)]
    pub worker_selector: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HandlersSpec {
    #[serde(default)]
    pub exit: Option<StepSpec>,
    #[serde(default)]
    pub success: Option<StepSpec>,
    #[serde(default)]
    pub failure: Option<StepSpec>,
    #[serde(default)]
    pub cancel: Option<StepSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleSpec {
    Scalar(String),
    List(Vec<String>),
    Map {
        #[serde(default)]
        start: Option<OneOrMany<String>>,
        #[serde(default)]
        stop: Option<OneOrMany<String>>,
        #[serde(default)]
        restart: Option<OneOrMany<String>>,
    },
}

/// Named parameters as either a shell-quoted key=value string or a
/// sequence of single-key maps (§4.1 pass 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamsSpec {
    Str(String),
    List(Vec<IndexMap<String, String>>),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DagSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
    #[serde(rename = "skipIfSuccessful", default)]
    pub skip_if_successful: bool,
    #[serde(default)]
    pub env: Vec<Value>,
    #[serde(rename = "logDir", default)]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub params: Option<ParamsSpec>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(rename = "handlerOn", default)]
    pub handler_on: Option<HandlersSpec>,
    #[serde(default)]
    pub preconditions: Vec<ConditionSpec>,
    #[serde(rename = "mailOn", default)]
    pub mail_on: Option<Value>,
    #[serde(rename = "errorMail", default)]
    pub error_mail: Option<Value>,
    #[serde(rename = "infoMail", default)]
    pub info_mail: Option<Value>,
    #[serde(default)]
    pub smtp: Option<Value>,
    #[serde(rename = "timeoutSec", default)]
    pub timeout_sec: Option<u64>,
    #[serde(rename = "delaySec", default)]
    pub delay_sec: Option<u64>,
    #[serde(rename = "restartWaitSec", default)]
    pub restart_wait_sec: Option<u64>,
    #[serde(rename = "maxActiveSteps", default)]
    pub max_active_steps: Option<u32>,
    #[serde(rename = "maxActiveRuns", default)]
    pub max_active_runs: Option<u32>,
    #[serde(rename = "maxCleanUpTimeSec", default)]
    pub max_clean_up_time_sec: Option<u64>,
    #[serde(rename = "histRetentionDays", default)]
    pub hist_retention_days: Option<u32>,
    #[serde(rename = "maxOutputSize", default)]
    pub max_output_size: Option<usize>,
    #[serde(default)]
    pub nested: IndexMap<String, DagSpec>,
    /// Source file path, used for name defaulting (§4.1 pass 1) and
    /// working-directory defaulting (§4.1 pass 12). Not a YAML field —
    /// set by the loader that produced this spec.
    #[serde(skip)]
    pub file_path: Option<String>,
    #[serde(rename = "noEval", default)]
    pub no_eval: bool,
    /// Resolved env entries from a shared base-config file, layered beneath
    /// this DAG's own `env` (§4.1 pass 2). Not a YAML field on the DAG
    /// itself — set by whatever loader merges a base-config file in,
    /// mirroring `file_path`.
    #[serde(skip, default)]
    pub base_env: Vec<(String, String)>,
}
