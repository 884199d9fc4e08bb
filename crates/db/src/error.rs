//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("stored dag spec for '{0}' is not valid JSON for a DagSpec: {1}")]
    InvalidStoredSpec(String, serde_json::Error),

    #[error("stored dag spec for '{0}' failed to compile: {1:?}")]
    CompileFailed(String, Vec<engine::CompileError>),
}
