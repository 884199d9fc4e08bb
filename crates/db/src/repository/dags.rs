//! DAG definition CRUD operations.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::DagRow, DbError};

/// Insert a new DAG definition, keyed by its unique `name`.
///
/// `spec` must be a JSON object deserializable into `engine::spec::DagSpec`.
pub async fn create_dag(pool: &PgPool, name: &str, spec: serde_json::Value) -> Result<DagRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        DagRow,
        r#"
        INSERT INTO dags (id, name, spec, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, name, spec, created_at
        "#,
        id,
        name,
        spec,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a DAG definition row by name.
pub async fn get_dag_row(pool: &PgPool, name: &str) -> Result<DagRow, DbError> {
    let row = sqlx::query_as!(
        DagRow,
        r#"SELECT id, name, spec, created_at FROM dags WHERE name = $1"#,
        name,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return all DAG definitions ordered by creation time (newest first).
pub async fn list_dags(pool: &PgPool) -> Result<Vec<DagRow>, DbError> {
    let rows = sqlx::query_as!(DagRow, r#"SELECT id, name, spec, created_at FROM dags ORDER BY created_at DESC"#,)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Permanently delete a DAG definition by name.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_dag(pool: &PgPool, name: &str) -> Result<(), DbError> {
    let result = sqlx::query!("DELETE FROM dags WHERE name = $1", name).execute(pool).await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
