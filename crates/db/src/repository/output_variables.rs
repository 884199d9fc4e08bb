//! Output-variable persistence, scoped to a single dag-run.
//!
//! Mirrors `engine::vars::OutputVars`: one `KEY` -> `VALUE` pair per row,
//! upserted as nodes complete so a later `run:` child-dag lookup or a crash
//! restart can recover the variable set without replaying the run.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::OutputVariableRow, DbError};

/// Upsert a single output variable for a dag-run.
pub async fn set_output_variable(pool: &PgPool, dag_run_id: Uuid, key: &str, value: &str) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        INSERT INTO output_variables (dag_run_id, key, value)
        VALUES ($1, $2, $3)
        ON CONFLICT (dag_run_id, key) DO UPDATE SET value = EXCLUDED.value
        "#,
        dag_run_id,
        key,
        value,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Every output variable recorded for a dag-run.
pub async fn list_output_variables(pool: &PgPool, dag_run_id: Uuid) -> Result<Vec<OutputVariableRow>, DbError> {
    let rows = sqlx::query_as!(
        OutputVariableRow,
        r#"SELECT dag_run_id, key, value FROM output_variables WHERE dag_run_id = $1"#,
        dag_run_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
