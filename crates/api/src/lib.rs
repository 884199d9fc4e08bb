//! `api` crate — HTTP REST API layer
//!
//! Exposes:
//!   GET    /api/v1/dags
//!   POST   /api/v1/dags
//!   GET    /api/v1/dags/:name
//!   DELETE /api/v1/dags/:name
//!   POST   /api/v1/dags/:name/start
//!   GET    /api/v1/runs/:run_id
//!   POST   /api/v1/runs/:run_id/cancel
//!   POST   /webhook/:path

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use db::DbPool;
use queue::JobQueue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub queue: JobQueue,
}

pub async fn serve(bind: &str, pool: DbPool, queue: JobQueue) -> Result<(), std::io::Error> {
    let state = AppState { pool, queue };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api_router = Router::new()
        .route("/dags", get(handlers::dags::list).post(handlers::dags::create))
        .route("/dags/:name", get(handlers::dags::get).delete(handlers::dags::delete))
        .route("/dags/:name/start", post(handlers::dag_runs::start))
        .route("/runs/:run_id", get(handlers::dag_runs::get))
        .route("/runs/:run_id/cancel", post(handlers::dag_runs::cancel));

    let app = Router::new()
        .nest("/api/v1", api_router)
        .route("/webhook/:path", post(handlers::webhooks::handle_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
