//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types live in the `engine` crate; a `DagRow`'s `spec` column is
//! compiled into an `engine::Dag` on read, it is never stored compiled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// dags
// ---------------------------------------------------------------------------

/// A persisted DAG definition row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DagRow {
    pub id: Uuid,
    pub name: String,
    /// The loosely-typed `engine::spec::DagSpec`, stored as JSON.
    pub spec: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// dag_runs
// ---------------------------------------------------------------------------

/// Possible statuses for a dag-run, mirroring `engine::graph::NodeStatus`'s
/// aggregate outcomes (§4.4 step 7) plus `Pending` for a queued-not-started run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum DagRunStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancel,
}

impl std::fmt::Display for DagRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancel => "cancel",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DagRunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "cancel" => Ok(Self::Cancel),
            other => Err(format!("unknown dag-run status: {other}")),
        }
    }
}

/// A persisted dag-run row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DagRunRow {
    pub id: Uuid,
    pub dag_name: String,
    pub run_id: String,
    pub root_ref: Option<String>,
    pub status: String,
    pub params: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// node_runs
// ---------------------------------------------------------------------------

/// A persisted node-run row: one per step's final attempt-set outcome.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRunRow {
    pub id: Uuid,
    pub dag_run_id: Uuid,
    pub step_name: String,
    pub status: String,
    pub exit_code: Option<i32>,
    pub retry_count: i32,
    pub error: Option<String>,
    pub stdout_file: Option<String>,
    pub stderr_file: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// output_variables
// ---------------------------------------------------------------------------

/// A single output variable produced by a node, scoped to its dag-run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutputVariableRow {
    pub dag_run_id: Uuid,
    pub key: String,
    pub value: String,
}
