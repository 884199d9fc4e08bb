//! Executor registry — maps an executor type tag to a constructor closure.
//!
//! Built once at process start-up and treated as an immutable map for the
//! lifetime of the process (see `spec.md` §5, "the executor registry is a
//! process-wide immutable map after init").

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::traits::Executor;

/// Everything a factory needs to build a boxed executor for one step,
/// handed in by the caller's own step representation (the registry itself
/// is command-agnostic).
pub struct ExecutorSpec<'a> {
    pub dir: &'a Path,
    pub env: &'a [(String, String)],
    pub argv: Option<&'a [String]>,
    pub script: Option<&'a str>,
    pub config: &'a serde_json::Value,
}

/// A constructor for a boxed executor, given an [`ExecutorSpec`].
pub type ExecutorFactory =
    Arc<dyn Fn(&ExecutorSpec) -> Result<Box<dyn Executor>, String> + Send + Sync>;

/// Maps `executor type` strings (`command`, `http`, `docker`, `ssh`, …) to
/// the factory that builds a boxed [`Executor`] for a step using that type.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `kind`. Re-registering a kind replaces the
    /// previous factory — useful for tests that swap in a mock executor.
    pub fn register(&mut self, kind: impl Into<String>, factory: ExecutorFactory) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn build(&self, kind: &str, spec: &ExecutorSpec) -> Result<Box<dyn Executor>, String> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| format!("unknown executor type: '{kind}'"))?;
        factory(spec)
    }

    /// A registry seeded with the built-in `command` executor, for callers
    /// that don't need to register any others.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "command",
            Arc::new(|spec: &ExecutorSpec| -> Result<Box<dyn Executor>, String> {
                let body = match (spec.argv, spec.script) {
                    (Some(argv), _) if !argv.is_empty() => {
                        crate::command::CommandBody::Argv(argv.to_vec())
                    }
                    (_, Some(script)) => crate::command::CommandBody::Script(script.to_string()),
                    _ => return Err("command executor needs argv or a script body".to_string()),
                };
                Ok(Box::new(crate::command::CommandExecutor::new(
                    body,
                    spec.dir.to_path_buf(),
                    spec.env.to_vec(),
                )))
            }),
        );
        registry
    }
}
