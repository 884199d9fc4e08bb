use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::AppState;
use db::repository::dags as dag_repo;
use engine::Compiler;

#[derive(serde::Deserialize)]
pub struct CreateDagDto {
    pub name: String,
    /// JSON for `engine::spec::DagSpec`.
    pub spec: Value,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<db::models::DagRow>>, StatusCode> {
    match dag_repo::list_dags(&state.pool).await {
        Ok(dags) => Ok(Json(dags)),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn get(Path(name): Path<String>, State(state): State<AppState>) -> Result<Json<db::models::DagRow>, StatusCode> {
    match dag_repo::get_dag_row(&state.pool, &name).await {
        Ok(row) => Ok(Json(row)),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateDagDto>,
) -> Result<(StatusCode, Json<db::models::DagRow>), StatusCode> {
    let spec: engine::spec::DagSpec = match serde_json::from_value(payload.spec.clone()) {
        Ok(s) => s,
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    };
    if Compiler::new().compile(spec).is_err() {
        return Err(StatusCode::BAD_REQUEST);
    }

    match dag_repo::create_dag(&state.pool, &payload.name, payload.spec).await {
        Ok(row) => Ok((StatusCode::CREATED, Json(row))),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn delete(Path(name): Path<String>, State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    match dag_repo::delete_dag(&state.pool, &name).await {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
