//! Output-variable store and variable-scope resolution.
//!
//! `spec.md` §3/§9: a thread-safe map keyed by variable name, storing
//! pre-formatted `KEY=VALUE` strings so descendants can splice them
//! directly into a child process's environment without re-quoting.

use dashmap::DashMap;
use std::sync::Arc;

/// Per-node output-variable map, cheaply cloneable (shares the backing
/// `DashMap` via `Arc`) so descendants can merge their predecessors' maps.
#[derive(Debug, Clone, Default)]
pub struct OutputVars {
    inner: Arc<DashMap<String, String>>,
}

impl OutputVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `name=value` as a pre-formatted `KEY=VALUE` entry.
    pub fn set(&self, name: impl Into<String>, value: impl AsRef<str>) {
        let name = name.into();
        let formatted = format!("{name}={}", value.as_ref());
        self.inner.insert(name, formatted);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.get(name).map(|e| e.value().clone())
    }

    /// Merge `other`'s entries into `self`, without overriding keys `self`
    /// already has (§3: "inherits the union of its predecessors' output
    /// maps (without overriding its own)").
    pub fn merge_from(&self, other: &OutputVars) {
        for entry in other.inner.iter() {
            self.inner.entry(entry.key().clone()).or_insert_with(|| entry.value().clone());
        }
    }

    /// All entries as pre-formatted `KEY=VALUE` strings, suitable for
    /// direct use as process environment entries.
    pub fn as_env_pairs(&self) -> Vec<String> {
        self.inner.iter().map(|e| e.value().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Resolves backtick command substitution and `${NAME}`/`$NAME` tokens
/// against the precedence chain defined in `spec.md` §4.2: step env >
/// output vars > DAG env > process env, left-to-right, with each
/// substituted value not re-substituted.
#[derive(Debug, Clone)]
pub struct VarScope {
    pub step_env: Vec<(String, String)>,
    pub output_vars: OutputVars,
    pub dag_env: Vec<(String, String)>,
}

impl VarScope {
    pub fn lookup(&self, name: &str) -> Option<String> {
        if let Some((_, v)) = self.step_env.iter().find(|(k, _)| k == name) {
            return Some(v.clone());
        }
        if let Some(v) = self.output_vars.get(name) {
            // stored as "NAME=value"; strip the "NAME=" prefix.
            return v.splitn(2, '=').nth(1).map(|s| s.to_string());
        }
        if let Some((_, v)) = self.dag_env.iter().find(|(k, _)| k == name) {
            return Some(v.clone());
        }
        std::env::var(name).ok()
    }

    /// Run every `` `cmd` `` segment in `input` through the system shell,
    /// replacing it with its trimmed stdout (§4.2 "Backtick segments in
    /// command or condition strings are executed via the system shell;
    /// stdout is trimmed").
    async fn eval_backticks(&self, input: &str) -> String {
        let mut out = String::new();
        let bytes = input.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'`' {
                if let Some(end) = input[i + 1..].find('`') {
                    let cmd = &input[i + 1..i + 1 + end];
                    let output = tokio::process::Command::new("sh").arg("-c").arg(cmd).output().await;
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

    /// Expand backtick command substitution, then `${NAME}` and `$NAME`
    /// tokens, in `input`. A substituted value is never itself re-scanned
    /// for further substitution.
    pub async fn substitute(&self, input: &str) -> String {
        let with_backticks = self.eval_backticks(input).await;
        let mut out = String::with_capacity(with_backticks.len());
        let bytes = with_backticks.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
                    if let Some(end) = with_backticks[i + 2..].find('}') {
                        let name = &with_backticks[i + 2..i + 2 + end];
                        out.push_str(&self.lookup(name).unwrap_or_default());
                        i += 2 + end + 1;
                        continue;
                    }
                } else if i + 1 < bytes.len() && (bytes[i + 1].is_ascii_alphabetic() || bytes[i + 1] == b'_') {
                    let start = i + 1;
                    let mut end = start;
                    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                        end += 1;
                    }
                    let name = &with_backticks[start..end];
                    out.push_str(&self.lookup(name).unwrap_or_default());
                    i = end;
                    continue;
                }
            }
            out.push(bytes[i] as char);
            i += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_vars_merge_does_not_override_existing() {
        let a = OutputVars::new();
        a.set("X", "from_a");
        let b = OutputVars::new();
        b.set("X", "from_b");
        b.set("Y", "from_b_y");

        a.merge_from(&b);
        assert_eq!(a.get("X").unwrap(), "X=from_a");
        assert_eq!(a.get("Y").unwrap(), "Y=from_b_y");
    }

    #[tokio::test]
    async fn substitute_prefers_step_env_over_dag_env() {
        let scope = VarScope {
            step_env: vec![("NAME".to_string(), "step".to_string())],
            output_vars: OutputVars::new(),
            dag_env: vec![("NAME".to_string(), "dag".to_string())],
        };
        assert_eq!(scope.substitute("hello ${NAME}").await, "hello step");
    }

    #[tokio::test]
    async fn substitute_falls_back_through_chain() {
        let scope = VarScope {
            step_env: vec![],
            output_vars: OutputVars::new(),
            dag_env: vec![("NAME".to_string(), "dag".to_string())],
        };
        assert_eq!(scope.substitute("$NAME").await, "dag");
    }

    #[tokio::test]
    async fn substitute_runs_backtick_commands() {
        let scope = VarScope {
            step_env: vec![],
            output_vars: OutputVars::new(),
            dag_env: vec![],
        };
        assert_eq!(scope.substitute("`echo -n hello`").await, "hello");
    }
}
