//! Engine-level error types.
//!
//! Three distinct error types, matching `spec.md` §7's category split:
//! compile-time configuration errors, condition-evaluation errors, and
//! runtime engine errors.

use thiserror::Error;

/// A single configuration problem found while compiling a [`crate::spec::DagSpec`].
///
/// The compiler accumulates these rather than stopping at the first one
/// (§4.1), except for [`CompileError::Structural`] which short-circuits the
/// remaining passes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("dag name is empty after defaulting")]
    EmptyName,

    #[error("step '{0}' depends on unknown step '{1}'")]
    MissingDependency(String, String),

    #[error("step name '{0}' is used by more than one step")]
    DuplicateStepName(String),

    #[error("step id '{0}' is used by more than one step")]
    DuplicateStepId(String),

    #[error("step name '{0}' exceeds the maximum length of {1}")]
    StepNameTooLong(String, usize),

    #[error("step id '{0}' does not match the required pattern ^[A-Za-z][A-Za-z0-9_-]*$")]
    InvalidStepId(String),

    #[error("step id '{0}' is a reserved word")]
    ReservedStepId(String),

    #[error("step id '{0}' collides with a different step's name")]
    IdNameCollision(String),

    #[error("step '{0}' must declare exactly one of command, script, child-dag reference, or pure executor invocation")]
    AmbiguousStepBody(String),

    #[error("step '{0}' has no command, script, child-dag reference, or executor invocation")]
    EmptyStepBody(String),

    #[error("unknown executor type '{0}' referenced by step '{1}'")]
    UnknownExecutorType(String, String),

    #[error("executor '{0}' rejects field '{1}' on step '{2}'")]
    ExecutorValidation(String, String, String),

    #[error("invalid schedule expression '{0}': {1}")]
    InvalidSchedule(String, String),

    #[error("invalid environment entry '{0}'")]
    InvalidEnvValue(String),

    #[error("invalid parameter entry '{0}'")]
    InvalidParameter(String),

    #[error("repeat policy on step '{0}' needs a condition or exitCode for mode '{1}'")]
    RepeatPolicyNeedsPredicate(String, &'static str),

    #[error("maxActiveSteps must be >= 0")]
    InvalidMaxActiveSteps,

    #[error("maxOutputSize must be > 0")]
    InvalidMaxOutputSize,

    #[error("handler step name '{0}' collides with a reserved handler name")]
    ReservedHandlerName(String),

    #[error("invalid signal '{0}' on step '{1}'")]
    InvalidSignal(String, String),

    #[error("the dag definition could not be decoded: {0}")]
    Structural(String),

    #[error("nested dag '{0}': {1}")]
    NestedDag(String, Box<CompileError>),
}

/// Errors from [`crate::condition::eval`].
///
/// Distinct from a condition *mismatch* (which is a normal `Ok(false)`):
/// these are failures to evaluate the condition at all (shell invocation
/// failed, the `re:` pattern didn't compile, …).
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("failed to evaluate condition command '{0}': {1}")]
    CommandFailed(String, String),

    #[error("invalid regex in expected value 're:{0}': {1}")]
    InvalidRegex(String, String),
}

/// Runtime errors surfaced by the engine (scheduler setup and fatal
/// propagation). Per-node failures are captured on the `Node`'s state
/// rather than returned as an `EngineError` — see `spec.md` §7.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dag compilation failed: {0:?}")]
    Compile(Vec<CompileError>),

    #[error("workflow graph contains a cycle")]
    CycleDetected,

    #[error("step '{0}' depends on unknown step '{1}'")]
    UnknownDependency(String, String),

    #[error("failed to create log directory '{0}': {1}")]
    LogDirCreation(String, String),

    #[error("dag precondition failed: {0}")]
    DagPreconditionFailed(String),

    #[error("unknown node name '{0}'")]
    UnknownNode(String),

    #[error("dag run finished with aggregate status error")]
    AggregateError,
}
