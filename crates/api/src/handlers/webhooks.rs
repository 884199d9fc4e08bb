use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::AppState;
use db::repository::{dag_runs as run_repo, dags as dag_repo};
use queue::DagRunJob;

/// Webhook intake: `path` names the dag to trigger directly. External
/// collaborators that need path-to-dag indirection (secret verification,
/// per-source routing) sit in front of this handler.
pub async fn handle_webhook(
    Path(path): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    if dag_repo::get_dag_row(&state.pool, &path).await.is_err() {
        return Err(StatusCode::NOT_FOUND);
    }

    let job = DagRunJob::new(&path, payload.clone());

    if run_repo::create_dag_run(&state.pool, &path, &job.run_id, None, payload).await.is_err() {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if state.queue.try_enqueue(job).is_err() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({"message": "webhook accepted"}))))
}
