use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::AppState;
use db::repository::{dag_runs as run_repo, dags as dag_repo};
use queue::DagRunJob;

#[derive(serde::Deserialize)]
pub struct StartDagRunDto {
    #[serde(default)]
    pub params: Value,
}

/// Create a dag-run row and enqueue it for a worker to pick up.
pub async fn start(
    Path(name): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<StartDagRunDto>,
) -> Result<(StatusCode, Json<db::models::DagRunRow>), StatusCode> {
    if dag_repo::get_dag_row(&state.pool, &name).await.is_err() {
        return Err(StatusCode::NOT_FOUND);
    }

    let job = DagRunJob::new(&name, payload.params.clone());

    let row = match run_repo::create_dag_run(&state.pool, &name, &job.run_id, None, payload.params).await {
        Ok(row) => row,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    if state.queue.try_enqueue(job).is_err() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok((StatusCode::ACCEPTED, Json(row)))
}

/// Request cancellation of a dag-run.
///
/// The API process does not hold the running `Scheduler` itself (that lives
/// in whichever `worker` process picked up the job), so this only flips the
/// persisted status; the worker's scheduler loop is expected to poll it and
/// call `Scheduler::cancel()` on its own `CancellationToken` when it sees
/// the request. A future iteration could instead route this through the
/// queue as a priority control message.
pub async fn cancel(Path(run_id): Path<String>, State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    // `finished: false` — the run hasn't actually stopped yet, only been
    // asked to. Whichever worker is driving it will overwrite `status` and
    // set `finished_at` for real once its `Scheduler::schedule` call returns.
    match run_repo::update_dag_run_status(&state.pool, &run_id, "cancel", false).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Fetch a dag-run's status plus every node-run recorded for it so far.
pub async fn get(Path(run_id): Path<String>, State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let run = match run_repo::get_dag_run(&state.pool, &run_id).await {
        Ok(row) => row,
        Err(db::DbError::NotFound) => return Err(StatusCode::NOT_FOUND),
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let node_runs = run_repo::list_node_runs(&state.pool, run.id).await.unwrap_or_default();

    Ok(Json(serde_json::json!({ "run": run, "nodes": node_runs })))
}
