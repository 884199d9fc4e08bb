//! `db` crate — Postgres persistence for DAG definitions, dag-runs,
//! node-runs and output variables.
//!
//! Implements `engine::store::DagStore` so the engine can depend on a
//! trait object without depending on `sqlx`/Postgres itself: the
//! dependency points from `db` to `engine`, not the other way around.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::DbError;
pub use pool::DbPool;

use async_trait::async_trait;
use engine::{ChildDagRunStatus, Compiler, Dag, DagStore};

/// Postgres-backed `DagStore`: compiles the stored `DagSpec` JSON on every
/// `get_dag` call, so a definition edited between runs always takes effect.
#[derive(Clone)]
pub struct PostgresStore {
    pool: DbPool,
}

impl PostgresStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DagStore for PostgresStore {
    async fn get_dag(&self, name: &str) -> Result<Dag, String> {
        let row = repository::dags::get_dag_row(&self.pool, name).await.map_err(|e| e.to_string())?;
        let spec: engine::spec::DagSpec =
            serde_json::from_value(row.spec).map_err(|e| DbError::InvalidStoredSpec(name.to_string(), e).to_string())?;
        Compiler::new()
            .compile(spec)
            .map_err(|errs| DbError::CompileFailed(name.to_string(), errs).to_string())
    }

    async fn get_child_dag_run_status(&self, run_id: &str, root_ref: &str) -> Result<ChildDagRunStatus, String> {
        let row = repository::dag_runs::find_child_dag_run(&self.pool, run_id, root_ref)
            .await
            .map_err(|e| e.to_string())?;
        match row {
            None => Ok(ChildDagRunStatus::Unknown),
            Some(row) => match row.status.parse::<models::DagRunStatus>() {
                Ok(models::DagRunStatus::Pending) | Ok(models::DagRunStatus::Running) => Ok(ChildDagRunStatus::Running),
                Ok(models::DagRunStatus::Success) => Ok(ChildDagRunStatus::Success),
                Ok(models::DagRunStatus::Error) => Ok(ChildDagRunStatus::Error),
                Ok(models::DagRunStatus::Cancel) => Ok(ChildDagRunStatus::Cancel),
                Err(_) => Ok(ChildDagRunStatus::Unknown),
            },
        }
    }

    async fn is_child_dag_run_completed(&self, run_id: &str, root_ref: &str) -> Result<bool, String> {
        let status = self.get_child_dag_run_status(run_id, root_ref).await?;
        Ok(!matches!(status, ChildDagRunStatus::Running | ChildDagRunStatus::Unknown))
    }
}
