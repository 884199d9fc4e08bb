//! The "Database contract" collaborator (§6), defined here so `engine`
//! depends on a trait object rather than naming the concrete `db` crate —
//! persistence is explicitly out of the core's scope (§1).

use async_trait::async_trait;

use crate::model::Dag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildDagRunStatus {
    Running,
    Success,
    Error,
    Cancel,
    Unknown,
}

/// What the engine needs from persistence, used only when a DAG contains
/// `run:` (child-DAG) steps — otherwise no implementation need be supplied.
#[async_trait]
pub trait DagStore: Send + Sync {
    async fn get_dag(&self, name: &str) -> Result<Dag, String>;
    async fn get_child_dag_run_status(&self, run_id: &str, root_ref: &str) -> Result<ChildDagRunStatus, String>;
    async fn is_child_dag_run_completed(&self, run_id: &str, root_ref: &str) -> Result<bool, String>;
}
