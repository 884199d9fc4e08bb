pub mod dag_runs;
pub mod dags;
pub mod webhooks;
