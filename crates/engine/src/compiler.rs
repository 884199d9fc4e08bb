//! Compiler: transforms a loosely-typed [`crate::spec::DagSpec`] into a
//! validated [`crate::model::Dag`] through the twelve ordered passes of §4.1.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::CompileError;
use crate::model::{
    Condition, ContinueOn, Dag, EnvVar, ExecutionType, ExecutorConfig, Params, RepeatMode, RepeatPolicy,
    RepeatPredicate, RetryPolicy, Schedule, Step, StepBody, DEFAULT_HIST_RETENTION_DAYS, DEFAULT_MAX_ACTIVE_RUNS,
    DEFAULT_MAX_CLEANUP_TIME, DEFAULT_MAX_OUTPUT_SIZE, MAX_STEP_NAME_LEN, RESERVED_WORDS,
};
use crate::spec::{
    BackoffSpec, CommandInput, ConditionSpec, ContinueOnSpec, DagSpec, DependsInput, ExecutorInput, OneOrMany,
    ParamsSpec, RepeatInput, RepeatPolicySpec, RetryPolicySpec, ScalarOrExpr, ScheduleSpec, StepSpec,
};

const VALID_SIGNALS: &[&str] = &["SIGTERM", "SIGINT", "SIGKILL", "SIGHUP", "SIGQUIT"];

/// Executor-specific validator, consulted in pass 10.
pub type ExecutorValidator = fn(&Step) -> Result<(), CompileError>;

/// A single step built by [`build_step`], plus whether `depends` was
/// explicit in the source spec (needed by chain-mode wiring, pass 8).
struct BuiltStep {
    step: Step,
    depends_explicit: bool,
}

pub struct Compiler {
    executor_validators: HashMap<&'static str, ExecutorValidator>,
    known_executor_kinds: std::collections::HashSet<&'static str>,
}

impl Default for Compiler {
    fn default() -> Self {
        let mut c = Self { executor_validators: HashMap::new(), known_executor_kinds: std::collections::HashSet::new() };
        c.register_executor_kind("command");
        c.register_executor_kind("child-dag");
        c.register_executor_kind("ssh");
        c.register_executor_validator("ssh", |step| {
            if matches!(step.body, StepBody::Script(_)) {
                Err(CompileError::ExecutorValidation(
                    "ssh".to_string(),
                    "script".to_string(),
                    step.name.clone(),
                ))
            } else {
                Ok(())
            }
        });
        c
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `kind` as a recognized executor tag, without attaching a
    /// validator — used for kinds that only need a presence check in pass
    /// 10 (§6: "unknown tags fail at compile time").
    pub fn register_executor_kind(&mut self, kind: &'static str) {
        self.known_executor_kinds.insert(kind);
    }

    pub fn register_executor_validator(&mut self, kind: &'static str, validator: ExecutorValidator) {
        self.known_executor_kinds.insert(kind);
        self.executor_validators.insert(kind, validator);
    }

    pub fn compile(&self, spec: DagSpec) -> Result<Dag, Vec<CompileError>> {
        let mut errors: Vec<CompileError> = Vec::new();

        // Pass 1: top-level defaulting.
        let name = spec
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                spec.file_path
                    .as_deref()
                    .and_then(|p| Path::new(p).file_stem())
                    .map(|s| s.to_string_lossy().to_string())
            })
            .unwrap_or_default();
        if name.is_empty() {
            errors.push(CompileError::EmptyName);
        }
        let execution_type = match spec.kind.as_deref() {
            Some("graph") => ExecutionType::Graph,
            Some("chain") | None => ExecutionType::Chain,
            Some(_) => ExecutionType::Chain,
        };
        let hist_retention_days = spec.hist_retention_days.unwrap_or(DEFAULT_HIST_RETENTION_DAYS);
        let max_cleanup_time = spec
            .max_clean_up_time_sec
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MAX_CLEANUP_TIME);
        let max_active_runs = spec.max_active_runs.unwrap_or(DEFAULT_MAX_ACTIVE_RUNS);
        let max_output_size = spec.max_output_size.unwrap_or(DEFAULT_MAX_OUTPUT_SIZE);
        if max_output_size == 0 {
            errors.push(CompileError::InvalidMaxOutputSize);
        }
        let max_active_steps = spec.max_active_steps.unwrap_or(0);

        // Pass 2: DAG-level environment resolution. Base-config entries are
        // in scope for the DAG's own `$VAR` substitutions, and a base key
        // survives in the final vector unless the DAG redefines it (§4.1
        // pass 2: "base-config keys are preserved only if absent from the
        // child").
        let dag_only_env = resolve_env_entries(&spec.env, spec.no_eval, &spec.base_env, &mut errors);
        let dag_env = merge_base_and_child_env(&spec.base_env, dag_only_env);

        // Pass 3: parameter build.
        let dag_env_pairs: Vec<(String, String)> = dag_env.iter().map(|e| (e.key.clone(), e.value.clone())).collect();
        let params = build_params(spec.params.as_ref(), &dag_env_pairs, &mut errors);
        let param_env: Vec<(String, String)> = params.named.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut scope_env = dag_env_pairs;
        scope_env.extend(param_env);

        // Pass 4: schedule build.
        let schedule = spec.schedule.as_ref().map(|s| build_schedule(s, &mut errors));

        let base_dir_for_steps = spec
            .file_path
            .as_deref()
            .and_then(|p| Path::new(p).parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        // Pass 5: per-step build.
        let mut built_steps: Vec<BuiltStep> = Vec::with_capacity(spec.steps.len());
        for (i, step_spec) in spec.steps.iter().enumerate() {
            match build_step(step_spec, i, None, &scope_env, spec.no_eval, &mut errors) {
                Some(built) => built_steps.push(built),
                None => {}
            }
        }

        // Pass 6: name & ID validation.
        validate_names_and_ids(&built_steps, &mut errors);

        // Pass 7: dependency resolution (ID -> name rewriting).
        let id_to_name: HashMap<String, String> = built_steps
            .iter()
            .filter_map(|b| b.step.id.clone().map(|id| (id, b.step.name.clone())))
            .collect();
        for built in &mut built_steps {
            for dep in &mut built.step.depends {
                if let Some(name) = id_to_name.get(dep) {
                    *dep = name.clone();
                }
            }
        }

        // Pass 8: chain-mode wiring.
        if execution_type == ExecutionType::Chain {
            let mut previous: Option<String> = None;
            for built in &mut built_steps {
                if !built.depends_explicit {
                    built.step.depends = previous.clone().into_iter().collect();
                }
                previous = Some(built.step.name.clone());
            }
        }

        // Pass 9: existence check.
        let known_names: std::collections::HashSet<&str> =
            built_steps.iter().map(|b| b.step.name.as_str()).collect();
        for built in &built_steps {
            for dep in &built.step.depends {
                if !known_names.contains(dep.as_str()) {
                    errors.push(CompileError::MissingDependency(built.step.name.clone(), dep.clone()));
                }
            }
        }

        // Pass 10: executor-specific validation.
        for built in &built_steps {
            let kind = built.step.executor.kind.as_str();
            if !self.known_executor_kinds.contains(kind) {
                errors.push(CompileError::UnknownExecutorType(kind.to_string(), built.step.name.clone()));
                continue;
            }
            if let Some(validator) = self.executor_validators.get(kind) {
                if let Err(e) = validator(&built.step) {
                    errors.push(e);
                }
            }
        }

        // Pass 11: handler wiring.
        let handler_spec = spec.handler_on.as_ref();
        let on_exit = build_handler(handler_spec.and_then(|h| h.exit.as_ref()), "onExit", &scope_env, spec.no_eval, &mut errors);
        let on_success =
            build_handler(handler_spec.and_then(|h| h.success.as_ref()), "onSuccess", &scope_env, spec.no_eval, &mut errors);
        let on_failure =
            build_handler(handler_spec.and_then(|h| h.failure.as_ref()), "onFailure", &scope_env, spec.no_eval, &mut errors);
        let on_cancel =
            build_handler(handler_spec.and_then(|h| h.cancel.as_ref()), "onCancel", &scope_env, spec.no_eval, &mut errors);

        // Pass 12: working-directory defaulting.
        for built in &mut built_steps {
            if built.step.dir.as_os_str().is_empty() {
                built.step.dir = base_dir_for_steps.clone();
            }
        }
        let fix_dir = |step: &mut Option<Step>| {
            if let Some(s) = step {
                if s.dir.as_os_str().is_empty() {
                    s.dir = base_dir_for_steps.clone();
                }
            }
        };
        let mut on_exit = on_exit;
        let mut on_success = on_success;
        let mut on_failure = on_failure;
        let mut on_cancel = on_cancel;
        fix_dir(&mut on_exit);
        fix_dir(&mut on_success);
        fix_dir(&mut on_failure);
        fix_dir(&mut on_cancel);

        let preconditions: Vec<Condition> = spec.preconditions.iter().map(condition_from_spec).collect();

        // Pass 13: nested DAGs, compiled recursively so a multi-document
        // spec's `run:` targets resolve against fully-validated definitions
        // rather than raw spec trees (§3).
        let mut nested: IndexMap<String, Dag> = IndexMap::new();
        for (nested_name, nested_spec) in &spec.nested {
            match self.compile(nested_spec.clone()) {
                Ok(nested_dag) => {
                    nested.insert(nested_name.clone(), nested_dag);
                }
                Err(nested_errors) => {
                    errors.extend(
                        nested_errors
                            .into_iter()
                            .map(|e| CompileError::NestedDag(nested_name.clone(), Box::new(e))),
                    );
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Dag {
            name,
            group: spec.group.clone(),
            description: spec.description.clone(),
            tags: spec.tags.clone(),
            execution_type,
            steps: built_steps.into_iter().map(|b| b.step).collect(),
            on_exit,
            on_success,
            on_failure,
            on_cancel,
            preconditions,
            schedule,
            params,
            env: dag_env,
            timeout: spec.timeout_sec.map(Duration::from_secs),
            delay: spec.delay_sec.map(Duration::from_secs),
            restart_wait: spec.restart_wait_sec.map(Duration::from_secs),
            max_active_steps,
            max_active_runs,
            max_cleanup_time,
            hist_retention_days,
            max_output_size,
            nested,
        })
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn condition_from_spec(c: &ConditionSpec) -> Condition {
    Condition { command: c.condition.clone(), expected: c.expected.clone() }
}

/// Synchronous backtick substitution for compile-time-only evaluation
/// (DAG env/params/retry expressions). The node runtime's own condition
/// evaluator (`crate::condition`) is async and used for everything that
/// runs after compilation.
fn eval_backticks_sync(input: &str) -> String {
    let mut out = String::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            if let Some(end) = input[i + 1..].find('`') {
                let cmd = &input[i + 1..i + 1 + end];
                let output = std::process::Command::new("sh").arg("-c").arg(cmd).output();
                if let Ok(output) = output {
                    out.push_str(String::from_utf8_lossy(&output.stdout).trim());
                }
                i += end + 2;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn substitute_sync(input: &str, scope: &[(String, String)]) -> String {
    let with_backticks = eval_backticks_sync(input);
    let mut out = String::with_capacity(with_backticks.len());
    let bytes = with_backticks.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
                if let Some(end) = with_backticks[i + 2..].find('}') {
                    let name = &with_backticks[i + 2..i + 2 + end];
                    out.push_str(&lookup_sync(name, scope));
                    i += 2 + end + 1;
                    continue;
                }
            } else if i + 1 < bytes.len() && (bytes[i + 1].is_ascii_alphabetic() || bytes[i + 1] == b'_') {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                out.push_str(&lookup_sync(&with_backticks[start..end], scope));
                i = end;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn lookup_sync(name: &str, scope: &[(String, String)]) -> String {
    scope
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
        .or_else(|| std::env::var(name).ok())
        .unwrap_or_default()
}

/// Merge resolved base-config entries with the DAG's own resolved env: the
/// child's value wins for a shared key, but a base-only key is kept.
fn merge_base_and_child_env(base: &[(String, String)], child: Vec<EnvVar>) -> Vec<EnvVar> {
    let mut merged: IndexMap<String, String> = base.iter().cloned().collect();
    for e in child {
        merged.insert(e.key, e.value);
    }
    merged.into_iter().map(|(key, value)| EnvVar { key, value }).collect()
}

/// Resolve a base-config file's own `env` entries (same shape as a DAG
/// spec's `env` field) against process env only, for a loader to call
/// before setting [`DagSpec::base_env`].
pub fn resolve_base_env(entries: &[Value], no_eval: bool) -> Vec<(String, String)> {
    let mut scratch = Vec::new();
    resolve_env_entries(entries, no_eval, &[], &mut scratch)
        .into_iter()
        .map(|e| (e.key, e.value))
        .collect()
}

fn resolve_env_entries(
    entries: &[Value],
    no_eval: bool,
    scope: &[(String, String)],
    _errors: &mut Vec<CompileError>,
) -> Vec<EnvVar> {
    let mut resolved: IndexMap<String, String> = IndexMap::new();
    let mut running_scope = scope.to_vec();
    for entry in entries {
        let (key, raw_value) = match entry {
            Value::String(s) => match s.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (s.clone(), String::new()),
            },
            Value::Object(map) => match map.iter().next() {
                Some((k, v)) => (k.clone(), value_to_string(v)),
                None => continue,
            },
            _ => continue,
        };
        let value = if no_eval { raw_value } else { substitute_sync(&raw_value, &running_scope) };
        running_scope.push((key.clone(), value.clone()));
        resolved.insert(key, value); // last occurrence wins
    }
    resolved.into_iter().map(|(key, value)| EnvVar { key, value }).collect()
}

fn build_params(spec: Option<&ParamsSpec>, scope: &[(String, String)], errors: &mut Vec<CompileError>) -> Params {
    let mut positional = Vec::new();
    let mut named = IndexMap::new();

    match spec {
        None => {}
        Some(ParamsSpec::Str(s)) => match shlex::split(s) {
            Some(tokens) => {
                for token in tokens {
                    match token.split_once('=') {
                        Some((k, v)) => {
                            named.insert(k.to_string(), substitute_sync(v, scope));
                        }
                        None => positional.push(substitute_sync(&token, scope)),
                    }
                }
            }
            None => errors.push(CompileError::InvalidParameter(s.clone())),
        },
        Some(ParamsSpec::List(entries)) => {
            for entry in entries {
                for (k, v) in entry {
                    named.insert(k.clone(), substitute_sync(v, scope));
                }
            }
        }
    }

    Params { positional, named }
}

fn build_schedule(spec: &ScheduleSpec, errors: &mut Vec<CompileError>) -> Schedule {
    let validate = |expr: &str, errors: &mut Vec<CompileError>| {
        if expr.split_whitespace().count() != 5 {
            errors.push(CompileError::InvalidSchedule(expr.to_string(), "expected a 5-field cron expression".to_string()));
        }
    };

    match spec {
        ScheduleSpec::Scalar(s) => {
            validate(s, errors);
            Schedule { start: vec![s.clone()], stop: vec![], restart: vec![] }
        }
        ScheduleSpec::List(list) => {
            for s in list {
                validate(s, errors);
            }
            Schedule { start: list.clone(), stop: vec![], restart: vec![] }
        }
        ScheduleSpec::Map { start, stop, restart } => {
            let expand = |field: &Option<OneOrMany<String>>, errors: &mut Vec<CompileError>| -> Vec<String> {
                let values = field.clone().map(OneOrMany::into_vec).unwrap_or_default();
                for v in &values {
                    validate(v, errors);
                }
                values
            };
            Schedule {
                start: expand(start, errors),
                stop: expand(stop, errors),
                restart: expand(restart, errors),
            }
        }
    }
}

fn resolve_duration(expr: &ScalarOrExpr, scope: &[(String, String)], errors: &mut Vec<CompileError>) -> Duration {
    match expr {
        ScalarOrExpr::Int(n) => Duration::from_secs((*n).max(0) as u64),
        ScalarOrExpr::Expr(s) => {
            let resolved = substitute_sync(s, scope);
            humantime::parse_duration(resolved.trim())
                .or_else(|_| resolved.trim().parse::<u64>().map(Duration::from_secs))
                .unwrap_or_else(|_| {
                    errors.push(CompileError::InvalidParameter(s.clone()));
                    Duration::from_secs(0)
                })
        }
    }
}

fn resolve_u32(expr: &ScalarOrExpr, scope: &[(String, String)], errors: &mut Vec<CompileError>) -> u32 {
    match expr {
        ScalarOrExpr::Int(n) => (*n).max(0) as u32,
        ScalarOrExpr::Expr(s) => {
            let resolved = substitute_sync(s, scope);
            resolved.trim().parse::<u32>().unwrap_or_else(|_| {
                errors.push(CompileError::InvalidParameter(s.clone()));
                0
            })
        }
    }
}

fn build_retry_policy(spec: &RetryPolicySpec, scope: &[(String, String)], errors: &mut Vec<CompileError>) -> RetryPolicy {
    let limit = spec.limit.as_ref().map(|l| resolve_u32(l, scope, errors)).unwrap_or(0);
    let interval = spec
        .interval
        .as_ref()
        .map(|i| resolve_duration(i, scope, errors))
        .unwrap_or(Duration::from_secs(0));
    let exit_codes = spec.exit_codes.clone().map(OneOrMany::into_vec).unwrap_or_default();
    let backoff = spec.backoff.as_ref().and_then(BackoffSpec::as_factor);
    let max_interval = spec.max_interval.as_ref().map(|i| resolve_duration(i, scope, errors));
    RetryPolicy { limit, interval, exit_codes, backoff, max_interval }
}

fn build_repeat_policy(
    spec: &RepeatPolicySpec,
    step_name: &str,
    scope: &[(String, String)],
    errors: &mut Vec<CompileError>,
) -> Option<RepeatPolicy> {
    let mode = match &spec.repeat {
        None => return None,
        Some(RepeatInput::Bool(false)) => return None,
        Some(RepeatInput::Bool(true)) => RepeatMode::While,
        Some(RepeatInput::Mode(m)) if m == "while" => RepeatMode::While,
        Some(RepeatInput::Mode(m)) if m == "until" => RepeatMode::Until,
        Some(RepeatInput::Mode(_)) => RepeatMode::While,
    };

    let predicate = match (&spec.condition, &spec.exit_code) {
        (Some(cond), _) => RepeatPredicate::Condition(condition_from_spec(cond)),
        (None, Some(codes)) => RepeatPredicate::ExitCode(codes.clone().into_vec()),
        (None, None) => {
            if matches!(spec.repeat, Some(RepeatInput::Mode(_))) {
                errors.push(CompileError::RepeatPolicyNeedsPredicate(
                    step_name.to_string(),
                    if mode == RepeatMode::While { "while" } else { "until" },
                ));
            }
            RepeatPredicate::None
        }
    };

    let interval = spec.interval.as_ref().map(|i| resolve_duration(i, scope, errors)).unwrap_or(Duration::from_secs(0));
    let backoff = spec.backoff.as_ref().and_then(BackoffSpec::as_factor);
    let max_interval = spec.max_interval.as_ref().map(|i| resolve_duration(i, scope, errors));

    Some(RepeatPolicy { mode, predicate, interval, limit: spec.limit, backoff, max_interval })
}

fn build_continue_on(spec: &ContinueOnSpec) -> ContinueOn {
    ContinueOn {
        failure: spec.failure.unwrap_or(false),
        skipped: spec.skipped.unwrap_or(false),
        exit_code: spec.exit_code.clone().map(OneOrMany::into_vec).unwrap_or_default(),
        output: spec.output.clone().map(OneOrMany::into_vec).unwrap_or_default(),
        mark_success: spec.mark_success.unwrap_or(false),
    }
}

fn auto_name(step_spec: &StepSpec, index: usize) -> String {
    if step_spec.command.is_some() {
        format!("cmd_{index}")
    } else if step_spec.script.is_some() {
        format!("script_{index}")
    } else if let Some(ExecutorInput::Scalar(kind)) = &step_spec.executor {
        format!("{kind}_{index}")
    } else if let Some(ExecutorInput::Map { kind, .. }) = &step_spec.executor {
        format!("{kind}_{index}")
    } else {
        format!("step_{index}")
    }
}

fn build_step(
    step_spec: &StepSpec,
    index: usize,
    forced_name: Option<&str>,
    scope: &[(String, String)],
    no_eval: bool,
    errors: &mut Vec<CompileError>,
) -> Option<BuiltStep> {
    let name = forced_name
        .map(|s| s.to_string())
        .or_else(|| step_spec.name.clone())
        .unwrap_or_else(|| auto_name(step_spec, index));

    let executor_input = step_spec.executor.clone();
    let has_command = step_spec.command.is_some();
    let has_script = step_spec.script.is_some();
    let has_run = step_spec.run.is_some();

    let exclusive_count = [has_command, has_script, has_run].iter().filter(|b| **b).count();
    if exclusive_count > 1 {
        errors.push(CompileError::AmbiguousStepBody(name.clone()));
        return None;
    }

    let (body, executor_kind_default) = if has_run {
        let run_name = step_spec.run.clone().unwrap();
        let params = step_spec.params.clone().unwrap_or_default();
        (StepBody::ChildDag { name: run_name, params }, "child-dag".to_string())
    } else if has_command {
        let argv = match step_spec.command.as_ref().unwrap() {
            CommandInput::Scalar(s) => shlex::split(s).unwrap_or_else(|| vec![s.clone()]),
            CommandInput::Seq(values) => values.iter().map(value_to_string).collect(),
        };
        (StepBody::Command(argv), "command".to_string())
    } else if has_script {
        (StepBody::Script(step_spec.script.clone().unwrap()), "command".to_string())
    } else if executor_input.is_some() {
        (StepBody::Pure, String::new())
    } else {
        errors.push(CompileError::EmptyStepBody(name.clone()));
        return None;
    };

    let executor = match executor_input {
        Some(ExecutorInput::Scalar(kind)) => ExecutorConfig { kind, config: Value::Null },
        Some(ExecutorInput::Map { kind, config }) => ExecutorConfig { kind, config },
        None => ExecutorConfig { kind: executor_kind_default, config: Value::Null },
    };

    let env = resolve_env_entries(&step_spec.env, no_eval, scope, errors);
    let step_scope: Vec<(String, String)> =
        scope.iter().cloned().chain(env.iter().map(|e| (e.key.clone(), e.value.clone()))).collect();

    let retry_policy = step_spec.retry_policy.as_ref().map(|r| build_retry_policy(r, &step_scope, errors));
    let repeat_policy = step_spec
        .repeat_policy
        .as_ref()
        .and_then(|r| build_repeat_policy(r, &name, &step_scope, errors));
    let continue_on = step_spec.continue_on.as_ref().map(build_continue_on).unwrap_or_default();
    let preconditions = step_spec.preconditions.iter().map(condition_from_spec).collect();

    if let Some(signal) = &step_spec.signal_on_stop {
        if !VALID_SIGNALS.contains(&signal.as_str()) {
            errors.push(CompileError::InvalidSignal(signal.clone(), name.clone()));
        }
    }

    let depends_explicit = step_spec.depends.is_some();
    let depends = step_spec.depends.clone().map(DependsInput::into_vec).unwrap_or_default();

    let parallel_items = step_spec.parallel.as_ref().map(|v| match v {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    });

    let step = Step {
        name,
        id: step_spec.id.clone(),
        dir: step_spec.dir.clone().map(PathBuf::from).unwrap_or_default(),
        executor,
        body,
        stdout: step_spec.stdout.clone().map(PathBuf::from),
        stderr: step_spec.stderr.clone().map(PathBuf::from),
        output: step_spec.output.clone(),
        depends,
        env,
        continue_on,
        retry_policy,
        repeat_policy,
        preconditions,
        signal_on_stop: step_spec.signal_on_stop.clone(),
        parallel_items,
    };

    Some(BuiltStep { step, depends_explicit })
}

fn build_handler(
    spec: Option<&StepSpec>,
    reserved_name: &str,
    scope: &[(String, String)],
    no_eval: bool,
    errors: &mut Vec<CompileError>,
) -> Option<Step> {
    let spec = spec?;
    build_step(spec, 0, Some(reserved_name), scope, no_eval, errors).map(|b| b.step)
}

fn validate_names_and_ids(built_steps: &[BuiltStep], errors: &mut Vec<CompileError>) {
    let mut seen_names: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut seen_ids: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let all_names: std::collections::HashSet<&str> = built_steps.iter().map(|b| b.step.name.as_str()).collect();

    for built in built_steps {
        let step = &built.step;
        if step.name.len() > MAX_STEP_NAME_LEN {
            errors.push(CompileError::StepNameTooLong(step.name.clone(), MAX_STEP_NAME_LEN));
        }
        if !seen_names.insert(step.name.as_str()) {
            errors.push(CompileError::DuplicateStepName(step.name.clone()));
        }
        if RESERVED_WORDS.contains(&step.name.as_str()) {
            errors.push(CompileError::ReservedHandlerName(step.name.clone()));
        }

        if let Some(id) = &step.id {
            if !seen_ids.insert(id.as_str()) {
                errors.push(CompileError::DuplicateStepId(id.clone()));
            }
            if !is_valid_id(id) {
                errors.push(CompileError::InvalidStepId(id.clone()));
            }
            if RESERVED_WORDS.contains(&id.as_str()) {
                errors.push(CompileError::ReservedStepId(id.clone()));
            }
            if id != &step.name && all_names.contains(id.as_str()) {
                errors.push(CompileError::IdNameCollision(id.clone()));
            }
        }
    }
}

fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{CommandInput, DagSpec, StepSpec};

    fn step_spec(name: &str, command: &str) -> StepSpec {
        StepSpec {
            name: Some(name.to_string()),
            command: Some(CommandInput::Scalar(command.to_string())),
            ..Default::default()
        }
    }

    #[test]
    fn compiles_simple_chain() {
        let spec = DagSpec {
            name: Some("mydag".to_string()),
            steps: vec![step_spec("a", "true"), step_spec("b", "true"), step_spec("c", "true")],
            ..Default::default()
        };
        let dag = Compiler::new().compile(spec).unwrap();
        assert_eq!(dag.steps.len(), 3);
        assert_eq!(dag.steps[1].depends, vec!["a".to_string()]);
        assert_eq!(dag.steps[2].depends, vec!["b".to_string()]);
    }

    #[test]
    fn rejects_missing_dependency() {
        let mut b_step = step_spec("b", "true");
        b_step.depends = Some(DependsInput::One("missing".to_string()));
        let spec = DagSpec {
            name: Some("mydag".to_string()),
            steps: vec![step_spec("a", "true"), b_step],
            ..Default::default()
        };
        let errs = Compiler::new().compile(spec).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, CompileError::MissingDependency(_, _))));
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let spec = DagSpec {
            name: Some("mydag".to_string()),
            steps: vec![step_spec("a", "true"), step_spec("a", "false")],
            ..Default::default()
        };
        let errs = Compiler::new().compile(spec).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, CompileError::DuplicateStepName(_))));
    }

    #[test]
    fn ssh_executor_rejects_script_body() {
        let mut s = StepSpec {
            name: Some("a".to_string()),
            script: Some("echo hi".to_string()),
            executor: Some(ExecutorInput::Scalar("ssh".to_string())),
            ..Default::default()
        };
        s.command = None;
        let spec = DagSpec { name: Some("mydag".to_string()), steps: vec![s], ..Default::default() };
        let errs = Compiler::new().compile(spec).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, CompileError::ExecutorValidation(_, _, _))));
    }

    #[test]
    fn base_env_survives_unless_overridden_by_dag_env() {
        let mut spec = DagSpec {
            name: Some("mydag".to_string()),
            steps: vec![step_spec("a", "true")],
            ..Default::default()
        };
        spec.base_env = vec![("SHARED".to_string(), "base".to_string()), ("ONLY_BASE".to_string(), "b".to_string())];
        spec.env = vec![Value::String("SHARED=child".to_string())];
        let dag = Compiler::new().compile(spec).unwrap();
        let env: std::collections::HashMap<_, _> = dag.env.iter().map(|e| (e.key.clone(), e.value.clone())).collect();
        assert_eq!(env.get("SHARED").unwrap(), "child");
        assert_eq!(env.get("ONLY_BASE").unwrap(), "b");
    }

    #[test]
    fn nested_dags_compile_recursively() {
        let inner = DagSpec {
            name: Some("inner".to_string()),
            steps: vec![step_spec("x", "true")],
            ..Default::default()
        };
        let mut spec = DagSpec {
            name: Some("outer".to_string()),
            steps: vec![step_spec("a", "true")],
            ..Default::default()
        };
        spec.nested.insert("inner".to_string(), inner);
        let dag = Compiler::new().compile(spec).unwrap();
        let inner_dag = dag.nested.get("inner").expect("nested dag compiled");
        assert_eq!(inner_dag.steps.len(), 1);
        assert_eq!(inner_dag.steps[0].name, "x");
    }

    #[test]
    fn nested_dag_errors_propagate_wrapped() {
        let inner = DagSpec {
            name: Some("inner".to_string()),
            steps: vec![step_spec("a", "true"), step_spec("a", "false")],
            ..Default::default()
        };
        let mut spec = DagSpec { name: Some("outer".to_string()), ..Default::default() };
        spec.nested.insert("inner".to_string(), inner);
        let errs = Compiler::new().compile(spec).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, CompileError::NestedDag(name, inner) if name == "inner" && matches!(**inner, CompileError::DuplicateStepName(_)))));
    }

    #[test]
    fn unknown_executor_kind_fails_to_compile() {
        let s = StepSpec {
            name: Some("a".to_string()),
            executor: Some(ExecutorInput::Scalar("carrier-pigeon".to_string())),
            ..Default::default()
        };
        let spec = DagSpec { name: Some("mydag".to_string()), steps: vec![s], ..Default::default() };
        let errs = Compiler::new().compile(spec).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, CompileError::UnknownExecutorType(kind, step) if kind == "carrier-pigeon" && step == "a")));
    }

    #[test]
    fn graph_mode_does_not_imply_chain_wiring() {
        let spec = DagSpec {
            name: Some("mydag".to_string()),
            kind: Some("graph".to_string()),
            steps: vec![step_spec("a", "true"), step_spec("b", "true")],
            ..Default::default()
        };
        let dag = Compiler::new().compile(spec).unwrap();
        assert!(dag.steps[1].depends.is_empty());
    }
}
