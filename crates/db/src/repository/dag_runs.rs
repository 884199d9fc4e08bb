//! Dag-run and node-run repository functions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{DagRunRow, NodeRunRow},
    DbError,
};

// ---------------------------------------------------------------------------
// dag_runs
// ---------------------------------------------------------------------------

/// Create a new dag-run record in `pending` status.
pub async fn create_dag_run(
    pool: &PgPool,
    dag_name: &str,
    run_id: &str,
    root_ref: Option<&str>,
    params: serde_json::Value,
) -> Result<DagRunRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        DagRunRow,
        r#"
        INSERT INTO dag_runs (id, dag_name, run_id, root_ref, status, params, started_at)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6)
        RETURNING id, dag_name, run_id, root_ref, status, params, started_at, finished_at
        "#,
        id,
        dag_name,
        run_id,
        root_ref,
        params,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Update the `status` (and optionally `finished_at`) of a dag-run.
pub async fn update_dag_run_status(pool: &PgPool, run_id: &str, status: &str, finished: bool) -> Result<(), DbError> {
    if finished {
        sqlx::query!(
            r#"UPDATE dag_runs SET status = $1, finished_at = $2 WHERE run_id = $3"#,
            status,
            Utc::now(),
            run_id,
        )
        .execute(pool)
        .await?;
    } else {
        sqlx::query!(r#"UPDATE dag_runs SET status = $1 WHERE run_id = $2"#, status, run_id,)
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Fetch a dag-run row by its `run_id`.
pub async fn get_dag_run(pool: &PgPool, run_id: &str) -> Result<DagRunRow, DbError> {
    let row = sqlx::query_as!(
        DagRunRow,
        r#"SELECT id, dag_name, run_id, root_ref, status, params, started_at, finished_at FROM dag_runs WHERE run_id = $1"#,
        run_id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Claim one `pending` dag-run for a standalone worker, atomically flipping
/// it to `running` under `FOR UPDATE SKIP LOCKED` so two worker processes
/// polling concurrently never pick up the same row.
pub async fn claim_pending_dag_run(pool: &PgPool) -> Result<Option<DagRunRow>, DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as!(
        DagRunRow,
        r#"
        SELECT id, dag_name, run_id, root_ref, status, params, started_at, finished_at
        FROM dag_runs
        WHERE status = 'pending'
        ORDER BY started_at ASC
        FOR UPDATE SKIP LOCKED
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = &row {
        sqlx::query!(r#"UPDATE dag_runs SET status = 'running' WHERE id = $1"#, row.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(row)
}

/// Find a dag-run that is a child of `root_ref`, if any is associated with
/// `run_id`. Used by `engine::store::DagStore::get_child_dag_run_status`.
pub async fn find_child_dag_run(pool: &PgPool, run_id: &str, root_ref: &str) -> Result<Option<DagRunRow>, DbError> {
    let row = sqlx::query_as!(
        DagRunRow,
        r#"
        SELECT id, dag_name, run_id, root_ref, status, params, started_at, finished_at
        FROM dag_runs
        WHERE run_id = $1 AND root_ref = $2
        "#,
        run_id,
        root_ref,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

// ---------------------------------------------------------------------------
// node_runs
// ---------------------------------------------------------------------------

/// Insert a completed node-run record.
#[allow(clippy::too_many_arguments)]
pub async fn insert_node_run(
    pool: &PgPool,
    dag_run_id: Uuid,
    step_name: &str,
    status: &str,
    exit_code: Option<i32>,
    retry_count: i32,
    error: Option<&str>,
    stdout_file: Option<&str>,
    stderr_file: Option<&str>,
    started_at: chrono::DateTime<Utc>,
) -> Result<NodeRunRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        NodeRunRow,
        r#"
        INSERT INTO node_runs
            (id, dag_run_id, step_name, status, exit_code, retry_count, error, stdout_file, stderr_file, started_at, finished_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id, dag_run_id, step_name, status, exit_code, retry_count, error, stdout_file, stderr_file, started_at, finished_at
        "#,
        id,
        dag_run_id,
        step_name,
        status,
        exit_code,
        retry_count,
        error,
        stdout_file,
        stderr_file,
        started_at,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Every node-run recorded for a dag-run, in insertion order.
pub async fn list_node_runs(pool: &PgPool, dag_run_id: Uuid) -> Result<Vec<NodeRunRow>, DbError> {
    let rows = sqlx::query_as!(
        NodeRunRow,
        r#"
        SELECT id, dag_run_id, step_name, status, exit_code, retry_count, error, stdout_file, stderr_file, started_at, finished_at
        FROM node_runs
        WHERE dag_run_id = $1
        ORDER BY started_at ASC
        "#,
        dag_run_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
