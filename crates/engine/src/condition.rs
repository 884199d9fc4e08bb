//! Condition evaluation: preconditions, repeat predicates, and the
//! `continueOn` output matcher all reduce to this single evaluator.

use regex::Regex;
use tokio::process::Command;

use crate::error::ConditionError;
use crate::model::Condition;
use crate::vars::VarScope;

/// Evaluate a single condition against `scope`.
///
/// - `expected: None` → the command's exit code must be 0.
/// - `expected: Some("re:<pattern>")` → the command's trimmed stdout must
///   match the regex.
/// - `expected: Some(other)` → the command's trimmed stdout must equal
///   `other` exactly (after variable substitution).
///
/// A `command` that is itself a single backtick expression (e.g.
/// `` `cat file` ``) is never re-executed as a shell command: `VarScope`
/// already runs the inner command and substitutes its trimmed stdout, so
/// running the result a second time would try to execute that stdout text
/// as a new command line instead of comparing it to `expected`.
pub async fn eval(scope: &VarScope, cond: &Condition) -> Result<bool, ConditionError> {
    match &cond.expected {
        None => {
            let command = scope.substitute(&cond.command).await;
            let status = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .status()
                .await
                .map_err(|e| ConditionError::CommandFailed(command.clone(), e.to_string()))?;
            Ok(status.success())
        }
        Some(expected) => {
            let stdout = if is_pure_backtick(&cond.command) {
                scope.substitute(&cond.command).await
            } else {
                let command = scope.substitute(&cond.command).await;
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(&command)
                    .output()
                    .await
                    .map_err(|e| ConditionError::CommandFailed(command.clone(), e.to_string()))?;
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            };
            let expected = scope.substitute(expected).await;

            if let Some(pattern) = expected.strip_prefix("re:") {
                let re = Regex::new(pattern)
                    .map_err(|e| ConditionError::InvalidRegex(pattern.to_string(), e.to_string()))?;
                Ok(re.is_match(&stdout))
            } else {
                Ok(stdout == expected)
            }
        }
    }
}

/// True if `s`, trimmed, is a single backtick-wrapped expression with no
/// other content (`` `cat file` `` but not `` prefix `cat file` ``).
fn is_pure_backtick(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 2 && t.starts_with('`') && t.ends_with('`') && !t[1..t.len() - 1].contains('`')
}

/// Evaluate a list of conditions, short-circuiting on the first mismatch
/// (all must hold — §4.1/§4.6 precondition semantics). Returns the index
/// of the first failing condition, if any.
pub async fn eval_all(scope: &VarScope, conditions: &[Condition]) -> Result<Option<usize>, ConditionError> {
    for (i, cond) in conditions.iter().enumerate() {
        if !eval(scope, cond).await? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// Match a `continueOn.output` pattern against either captured stream
/// (§9 open question (c): both stdout and stderr are checked).
pub fn output_matches(patterns: &[String], stdout: &str, stderr: &str) -> bool {
    patterns.iter().any(|p| match p.strip_prefix("re:") {
        Some(pattern) => Regex::new(pattern)
            .map(|re| re.is_match(stdout) || re.is_match(stderr))
            .unwrap_or(false),
        None => stdout.contains(p.as_str()) || stderr.contains(p.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::OutputVars;

    fn empty_scope() -> VarScope {
        VarScope {
            step_env: vec![],
            output_vars: OutputVars::new(),
            dag_env: vec![],
        }
    }

    #[tokio::test]
    async fn exit_code_condition_true_on_success() {
        let scope = empty_scope();
        let cond = Condition {
            command: "true".to_string(),
            expected: None,
        };
        assert!(eval(&scope, &cond).await.unwrap());
    }

    #[tokio::test]
    async fn exit_code_condition_false_on_failure() {
        let scope = empty_scope();
        let cond = Condition {
            command: "false".to_string(),
            expected: None,
        };
        assert!(!eval(&scope, &cond).await.unwrap());
    }

    #[tokio::test]
    async fn equality_condition_matches_stdout() {
        let scope = empty_scope();
        let cond = Condition {
            command: "echo -n hello".to_string(),
            expected: Some("hello".to_string()),
        };
        assert!(eval(&scope, &cond).await.unwrap());
    }

    #[tokio::test]
    async fn regex_condition_matches_stdout() {
        let scope = empty_scope();
        let cond = Condition {
            command: "echo -n hello123".to_string(),
            expected: Some("re:^hello[0-9]+$".to_string()),
        };
        assert!(eval(&scope, &cond).await.unwrap());
    }

    #[tokio::test]
    async fn pure_backtick_condition_compares_substituted_value_directly() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("state");
        std::fs::write(&file, "ready").unwrap();
        let scope = empty_scope();
        let cond = Condition {
            command: format!("`cat {}`", file.display()),
            expected: Some("ready".to_string()),
        };
        assert!(eval(&scope, &cond).await.unwrap());
    }

    #[test]
    fn output_matches_checks_both_streams() {
        assert!(output_matches(&["needle".to_string()], "a needle here", ""));
        assert!(output_matches(&["needle".to_string()], "", "a needle here"));
        assert!(!output_matches(&["needle".to_string()], "nope", "nope"));
    }
}
