//! Shared dag-run processing: load a compiled dag, drive it through the
//! `Scheduler`, and persist node-run / output-variable rows as it goes.
//!
//! Used by both `serve`'s in-process worker loop and the standalone
//! `worker` subcommand's database-polling loop.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use engine::{DagStore, ExecutionGraph, NodeStatus, ProgressEvent, Scheduler, SchedulerConfig};
use nodes::ExecutorRegistry;
use tokio::sync::mpsc;
use tracing::{info, warn};

use db::repository::{dag_runs as run_repo, output_variables as var_repo};
use db::{DbPool, PostgresStore};
use queue::DagRunJob;

fn status_str(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Success => "success",
        NodeStatus::Error => "error",
        NodeStatus::Cancel => "cancel",
        NodeStatus::Skipped => "skipped",
        NodeStatus::Running | NodeStatus::None | NodeStatus::Queued => "running",
    }
}

/// Load `job`'s dag, run it to completion, and persist every node-run and
/// output-variable row produced along the way.
pub async fn process_job(
    pool: &DbPool,
    store: &PostgresStore,
    registry: Arc<ExecutorRegistry>,
    log_dir: PathBuf,
    job: DagRunJob,
) -> anyhow::Result<()> {
    let dag = store.get_dag(&job.dag_name).await.map_err(anyhow::Error::msg)?;
    let run_row = run_repo::get_dag_run(pool, &job.run_id).await?;
    run_repo::update_dag_run_status(pool, &job.run_id, "running", false).await?;

    let graph = Arc::new(ExecutionGraph::new(&dag.steps)?);

    let scheduler = Scheduler::new(
        SchedulerConfig {
            log_dir,
            run_id: job.run_id.clone(),
            timeout: dag.timeout,
            max_active_steps: dag.max_active_steps,
            max_cleanup_time: dag.max_cleanup_time,
            dry: false,
        },
        registry,
    );

    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(64);
    let persist_pool = pool.clone();
    let persist_graph = graph.clone();
    let dag_run_id = run_row.id;
    let persist_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let node = persist_graph.node(event.node_index);
            let state = node.state();
            let result = run_repo::insert_node_run(
                &persist_pool,
                dag_run_id,
                &event.step_name,
                status_str(event.status),
                state.exit_code,
                state.retry_count as i32,
                state.error.as_deref(),
                state.stdout_file.as_ref().map(|p| p.display().to_string()).as_deref(),
                state.stderr_file.as_ref().map(|p| p.display().to_string()).as_deref(),
                Utc::now(),
            )
            .await;
            if let Err(e) = result {
                warn!(step = %event.step_name, error = %e, "failed to persist node-run");
            }
        }
    });

    let result = scheduler.schedule(&dag, graph.clone(), tx).await;
    let _ = persist_task.await;

    let final_status = status_str(graph.status());
    run_repo::update_dag_run_status(pool, &job.run_id, final_status, true).await?;

    for node in graph.nodes() {
        for pair in node.state().output_variables.as_env_pairs() {
            let Some((key, value)) = pair.split_once('=') else { continue };
            if let Err(e) = var_repo::set_output_variable(pool, dag_run_id, key, value).await {
                warn!(key, error = %e, "failed to persist output variable");
            }
        }
    }

    match result {
        Ok(()) => info!(dag = %dag.name, run_id = %job.run_id, "dag run completed"),
        Err(e) => warn!(dag = %dag.name, run_id = %job.run_id, error = %e, "dag run finished with errors"),
    }

    Ok(())
}
