//! Scheduler: the concurrent driver that takes one `ExecutionGraph` to
//! completion (§4.4).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nodes::ExecutorRegistry;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::EngineError;
use crate::graph::{ExecutionGraph, NodeIndex, NodeStatus};
use crate::model::Dag;
use crate::node::{run_node, NodeContext};
use crate::vars::OutputVars;

pub struct SchedulerConfig {
    pub log_dir: PathBuf,
    pub run_id: String,
    pub timeout: Option<Duration>,
    /// 0 = unbounded.
    pub max_active_steps: u32,
    pub max_cleanup_time: Duration,
    pub dry: bool,
}

/// A terminal-node notification delivered over the progress sink.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub node_index: NodeIndex,
    pub step_name: String,
    pub status: NodeStatus,
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<ExecutorRegistry>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            config,
            registry,
            cancel: CancellationToken::new(),
        }
    }

    /// Cooperative cancellation — safe to call from any task, any number of
    /// times (§5 "Cancel and Signal are idempotent").
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `graph` to completion, publishing a `ProgressEvent` for every
    /// terminal node transition. Returns `Err` iff the aggregate status is
    /// `error` (§4.4 "Schedule ... returns non-nil iff the aggregate status
    /// is error").
    #[instrument(skip(self, dag, graph, progress_tx), fields(dag = %dag.name, run_id = %self.config.run_id))]
    pub async fn schedule(
        &self,
        dag: &Dag,
        graph: Arc<ExecutionGraph>,
        progress_tx: mpsc::Sender<ProgressEvent>,
    ) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.config.log_dir)
            .map_err(|e| EngineError::LogDirCreation(self.config.log_dir.display().to_string(), e.to_string()))?;

        if let Some(precondition_failure) = self.check_dag_preconditions(dag).await {
            self.cancel_all_nodes(&graph);
            return Err(EngineError::DagPreconditionFailed(precondition_failure));
        }

        let semaphore = if self.config.max_active_steps == 0 {
            None
        } else {
            Some(Arc::new(Semaphore::new(self.config.max_active_steps as usize)))
        };

        let timeout_token = self.cancel.child_token();
        if let Some(timeout) = self.config.timeout {
            let token = timeout_token.clone();
            let scheduler_cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        warn!("dag timeout elapsed, cancelling in-flight nodes");
                        scheduler_cancel.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            });
        }

        let mut join_set: JoinSet<(NodeIndex, NodeStatus)> = JoinSet::new();
        let mut dispatched: HashSet<usize> = HashSet::new();

        loop {
            self.dispatch_ready_nodes(dag, &graph, &semaphore, &mut dispatched, &mut join_set, &progress_tx);

            if dispatched.len() == graph.nodes().len() && join_set.is_empty() {
                break;
            }
            if join_set.is_empty() {
                // Nothing ready and nothing running: remaining nodes are
                // unreachable (their predecessors were cancelled/skipped in
                // a way that leaves them permanently blocked). Mark them
                // cancelled so the graph still reaches a terminal state.
                self.cancel_unreachable(&graph, &dispatched);
                if dispatched.len() == graph.nodes().len() {
                    break;
                }
            }

            let Some(joined) = join_set.join_next().await else {
                continue;
            };
            let (index, status) = joined.expect("node task should not panic");
            let node = graph.node(index);
            self.propagate(&graph, index);
            let _ = progress_tx
                .send(ProgressEvent { node_index: index, step_name: node.step.name.clone(), status })
                .await;
            info!(step = %node.step.name, ?status, "node terminated");
        }

        self.drain_with_deadline(&mut join_set).await;

        match graph.status() {
            NodeStatus::Error => Err(EngineError::AggregateError),
            _ => Ok(()),
        }
    }

    async fn check_dag_preconditions(&self, dag: &Dag) -> Option<String> {
        if dag.preconditions.is_empty() {
            return None;
        }
        let scope = crate::vars::VarScope {
            step_env: vec![],
            output_vars: OutputVars::new(),
            dag_env: dag.env.iter().map(|e| (e.key.clone(), e.value.clone())).collect(),
        };
        match crate::condition::eval_all(&scope, &dag.preconditions).await {
            Ok(None) => None,
            Ok(Some(i)) => Some(format!("precondition {i} did not match")),
            Err(e) => Some(e.to_string()),
        }
    }

    fn cancel_all_nodes(&self, graph: &ExecutionGraph) {
        for node in graph.nodes() {
            node.with_state_mut(|s| s.status = NodeStatus::Cancel);
        }
    }

    fn cancel_unreachable(&self, graph: &ExecutionGraph, dispatched: &HashSet<usize>) {
        for node in graph.nodes() {
            if !dispatched.contains(&node.index.0) && node.status() == NodeStatus::None {
                node.with_state_mut(|s| s.status = NodeStatus::Cancel);
            }
        }
    }

    /// Ready-set scan + dispatch (§4.4 steps 2-3): launch every node whose
    /// predecessors are all terminal and whose propagation state still
    /// permits it to run, bounded by the semaphore. Each dispatched node
    /// runs on its own tokio task, holding a clone of `graph`'s `Arc` so the
    /// task can safely outlive this call's stack frame.
    fn dispatch_ready_nodes(
        &self,
        dag: &Dag,
        graph: &Arc<ExecutionGraph>,
        semaphore: &Option<Arc<Semaphore>>,
        dispatched: &mut HashSet<usize>,
        join_set: &mut JoinSet<(NodeIndex, NodeStatus)>,
        progress_tx: &mpsc::Sender<ProgressEvent>,
    ) {
        for node in graph.nodes() {
            let idx = node.index;
            if dispatched.contains(&idx.0) {
                continue;
            }
            if node.status() != NodeStatus::None {
                // Already resolved by propagation (cancel/skip) before ever
                // being dispatched — still a terminal transition worth a
                // progress notification.
                dispatched.insert(idx.0);
                let _ = progress_tx.try_send(ProgressEvent {
                    node_index: idx,
                    step_name: node.step.name.clone(),
                    status: node.status(),
                });
                continue;
            }
            if !graph.predecessors_terminal(idx) {
                continue;
            }

            let permit = match semaphore {
                None => None,
                Some(sem) => match sem.clone().try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => continue,
                },
            };

            dispatched.insert(idx.0);

            if self.config.dry {
                node.with_state_mut(|s| s.status = NodeStatus::Success);
                continue;
            }

            // Union of terminal predecessors' output variables, copied in
            // before dispatch (§5 "writes by a predecessor happen-before
            // reads by any descendant").
            let predecessor_vars = OutputVars::new();
            for pred in graph.predecessors(idx) {
                predecessor_vars.merge_from(&graph.node(*pred).state().output_variables);
            }

            let ctx = NodeContext {
                dag_name: dag.name.clone(),
                run_id: self.config.run_id.clone(),
                log_dir: self.config.log_dir.clone(),
                dag_env: dag.env.iter().map(|e| (e.key.clone(), e.value.clone())).collect(),
                predecessor_vars,
                cancel: self.cancel.child_token(),
                max_output_size: dag.max_output_size,
            };

            let registry = self.registry.clone();
            let graph = graph.clone();
            join_set.spawn(async move {
                let outcome = run_node(graph.node(idx), &ctx, &registry).await;
                let _keep_permit_alive = permit;
                (idx, outcome.status)
            });
        }
    }

    /// Apply §4.5 propagation: a non-tolerated `error` or a `cancel`/
    /// un-tolerated `skipped` predecessor cancels not-yet-started
    /// descendants, transitively.
    fn propagate(&self, graph: &ExecutionGraph, from: NodeIndex) {
        let node = graph.node(from);
        let status = node.status();
        let continue_on = &node.step.continue_on;

        let propagates = match status {
            NodeStatus::Cancel => true,
            // `record_failure` already decided tolerance — including the
            // output-pattern case — and stamped it on `NodeState`, so a
            // tolerated failure doesn't cancel descendants even without
            // `markSuccess`.
            NodeStatus::Error => !node.state().failure_tolerated,
            NodeStatus::Skipped => !continue_on.skipped,
            _ => false,
        };
        if !propagates {
            return;
        }

        let mut stack: Vec<NodeIndex> = graph.dependents(from).to_vec();
        while let Some(idx) = stack.pop() {
            let descendant = graph.node(idx);
            if descendant.status() == NodeStatus::None {
                descendant.with_state_mut(|s| s.status = NodeStatus::Cancel);
                stack.extend(graph.dependents(idx));
            }
        }
    }

    /// §5 "the driver waits up to `MaxCleanUpTime` for in-flight nodes to
    /// exit, then proceeds regardless" — in-flight tasks are left detached,
    /// never force-aborted, so teardown always runs to completion.
    async fn drain_with_deadline(&self, join_set: &mut JoinSet<(NodeIndex, NodeStatus)>) {
        let deadline = self.config.max_cleanup_time;
        let _ = tokio::time::timeout(deadline, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContinueOn, ExecutorConfig, Step, StepBody};
    use nodes::ExecutorRegistry;
    use std::path::PathBuf;

    fn step(name: &str, depends: &[&str], body: StepBody) -> Step {
        Step {
            name: name.to_string(),
            id: None,
            dir: PathBuf::from("."),
            executor: ExecutorConfig::command(),
            body,
            stdout: None,
            stderr: None,
            output: None,
            depends: depends.iter().map(|s| s.to_string()).collect(),
            env: vec![],
            continue_on: ContinueOn::default(),
            retry_policy: None,
            repeat_policy: None,
            preconditions: vec![],
            signal_on_stop: None,
            parallel_items: None,
        }
    }

    fn test_dag(steps: Vec<Step>) -> Dag {
        Dag {
            name: "test".to_string(),
            group: None,
            description: None,
            tags: vec![],
            execution_type: crate::model::ExecutionType::Graph,
            steps,
            on_exit: None,
            on_success: None,
            on_failure: None,
            on_cancel: None,
            preconditions: vec![],
            schedule: None,
            params: Default::default(),
            env: vec![],
            timeout: None,
            delay: None,
            restart_wait: None,
            max_active_steps: 0,
            max_active_runs: 1,
            max_cleanup_time: Duration::from_secs(5),
            hist_retention_days: 30,
            max_output_size: 1024 * 1024,
            nested: Default::default(),
        }
    }

    #[tokio::test]
    async fn sequential_chain_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let dag = test_dag(vec![
            step("a", &[], StepBody::Command(vec!["true".to_string()])),
            step("b", &["a"], StepBody::Command(vec!["true".to_string()])),
            step("c", &["b"], StepBody::Command(vec!["true".to_string()])),
        ]);
        let graph = Arc::new(ExecutionGraph::new(&dag.steps).unwrap());
        let scheduler = Scheduler::new(
            SchedulerConfig {
                log_dir: dir.path().to_path_buf(),
                run_id: "run1".to_string(),
                timeout: None,
                max_active_steps: 0,
                max_cleanup_time: Duration::from_secs(5),
                dry: false,
            },
            Arc::new(ExecutorRegistry::with_defaults()),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let result = scheduler.schedule(&dag, graph.clone(), tx).await;
        drop(rx.try_recv());
        assert!(result.is_ok());
        assert_eq!(graph.status(), NodeStatus::Success);
    }

    #[tokio::test]
    async fn failure_propagates_to_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let dag = test_dag(vec![
            step("a", &[], StepBody::Command(vec!["true".to_string()])),
            step("b", &["a"], StepBody::Command(vec!["true".to_string()])),
            step("c", &["b"], StepBody::Command(vec!["false".to_string()])),
            step("d", &["c"], StepBody::Command(vec!["true".to_string()])),
        ]);
        let graph = Arc::new(ExecutionGraph::new(&dag.steps).unwrap());
        let scheduler = Scheduler::new(
            SchedulerConfig {
                log_dir: dir.path().to_path_buf(),
                run_id: "run1".to_string(),
                timeout: None,
                max_active_steps: 0,
                max_cleanup_time: Duration::from_secs(5),
                dry: false,
            },
            Arc::new(ExecutorRegistry::with_defaults()),
        );
        let (tx, _rx) = mpsc::channel(16);
        let result = scheduler.schedule(&dag, graph.clone(), tx).await;
        assert!(result.is_err());
        assert_eq!(graph.node_by_name("a").unwrap().status(), NodeStatus::Success);
        assert_eq!(graph.node_by_name("b").unwrap().status(), NodeStatus::Success);
        assert_eq!(graph.node_by_name("c").unwrap().status(), NodeStatus::Error);
        assert_eq!(graph.node_by_name("d").unwrap().status(), NodeStatus::Cancel);
    }
}
