//! Execution Graph: the runtime structure for one dag-run.
//!
//! Built once from a compiled [`crate::model::Dag`]'s steps, then driven to
//! completion by [`crate::scheduler::Scheduler`]. Distinct from `Dag`/`Step`
//! themselves — this is the part that lives for one run only (§3).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use crate::error::EngineError;
use crate::model::Step;
use crate::vars::OutputVars;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    None,
    Running,
    Success,
    Error,
    Cancel,
    Skipped,
    /// Reserved for external queue integrations; treated as `None` by the
    /// scheduler (§4.6 state machine).
    Queued,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Error | NodeStatus::Cancel | NodeStatus::Skipped)
    }
}

/// Mutable per-run state for a single node. Cheap fields only; the
/// `OutputVars` it holds is itself an `Arc`-backed handle.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub status: NodeStatus,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub retry_count: u32,
    pub done_count: u32,
    pub retried_at: Option<Instant>,
    /// Set by `node::record_failure` when an `Error` status was tolerated by
    /// `continueOn` (failure, exitCode, or output pattern) regardless of
    /// whether `markSuccess` then flipped the status to `Success` — lets
    /// `Scheduler::propagate` know not to cancel descendants without
    /// recomputing the output-pattern match itself.
    pub failure_tolerated: bool,
    pub output_variables: OutputVars,
    pub stdout_file: Option<std::path::PathBuf>,
    pub stderr_file: Option<std::path::PathBuf>,
    pub log_file: Option<std::path::PathBuf>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            status: NodeStatus::None,
            started_at: None,
            finished_at: None,
            error: None,
            exit_code: None,
            retry_count: 0,
            done_count: 0,
            retried_at: None,
            failure_tolerated: false,
            output_variables: OutputVars::new(),
            stdout_file: None,
            stderr_file: None,
            log_file: None,
        }
    }
}

/// The runtime counterpart of a `Step` inside an `ExecutionGraph`.
#[derive(Debug)]
pub struct Node {
    pub index: NodeIndex,
    pub step: Step,
    pub(crate) state: Mutex<NodeState>,
}

impl Node {
    pub fn state(&self) -> NodeState {
        self.state.lock().unwrap().clone()
    }

    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn status(&self) -> NodeStatus {
        self.state.lock().unwrap().status
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GraphMetrics {
    pub success: usize,
    pub error: usize,
    pub cancel: usize,
    pub skipped: usize,
    pub running: usize,
    pub pending: usize,
}

/// The runtime node set plus its dependency edges, built once per run.
pub struct ExecutionGraph {
    nodes: Vec<Node>,
    name_to_index: HashMap<String, NodeIndex>,
    /// `depends_on[i]` = indices of `i`'s predecessors.
    depends_on: Vec<Vec<NodeIndex>>,
    /// `dependents[i]` = indices of `i`'s descendants (inverse edges).
    dependents: Vec<Vec<NodeIndex>>,
    started_at: Instant,
}

impl ExecutionGraph {
    /// Build a graph from a step list, validating dependency references
    /// exist and that the resulting graph is acyclic (§4.3).
    pub fn new(steps: &[Step]) -> Result<Self, EngineError> {
        let mut name_to_index = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            name_to_index.insert(step.name.clone(), NodeIndex(i));
        }

        let mut depends_on = vec![Vec::new(); steps.len()];
        let mut dependents = vec![Vec::new(); steps.len()];

        for (i, step) in steps.iter().enumerate() {
            for dep_name in &step.depends {
                let dep_idx = *name_to_index
                    .get(dep_name)
                    .ok_or_else(|| EngineError::UnknownDependency(step.name.clone(), dep_name.clone()))?;
                depends_on[i].push(dep_idx);
                dependents[dep_idx.0].push(NodeIndex(i));
            }
        }

        Self::check_acyclic(&depends_on)?;

        let nodes = steps
            .iter()
            .enumerate()
            .map(|(i, step)| Node {
                index: NodeIndex(i),
                step: step.clone(),
                state: Mutex::new(NodeState::default()),
            })
            .collect();

        Ok(Self {
            nodes,
            name_to_index,
            depends_on,
            dependents,
            started_at: Instant::now(),
        })
    }

    /// Kahn's algorithm: a topological order exists iff every node is
    /// eventually dequeued.
    fn check_acyclic(depends_on: &[Vec<NodeIndex>]) -> Result<(), EngineError> {
        let n = depends_on.len();
        let mut in_degree = vec![0usize; n];
        let mut out_edges: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, deps) in depends_on.iter().enumerate() {
            in_degree[i] = deps.len();
            for dep in deps {
                out_edges[dep.0].push(i);
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;
        while let Some(i) = queue.pop_front() {
            visited += 1;
            for &next in &out_edges[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited == n {
            Ok(())
        } else {
            Err(EngineError::CycleDetected)
        }
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.name_to_index.get(name).map(|idx| &self.nodes[idx.0])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx.0]
    }

    pub fn predecessors(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.depends_on[idx.0]
    }

    pub fn dependents(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.dependents[idx.0]
    }

    /// Every predecessor of `idx` has reached a terminal status.
    pub fn predecessors_terminal(&self, idx: NodeIndex) -> bool {
        self.depends_on[idx.0].iter().all(|p| self.node(*p).status().is_terminal())
    }

    /// Aggregate status over all nodes, per §4.4 step 7.
    pub fn status(&self) -> NodeStatus {
        let statuses: Vec<NodeStatus> = self.nodes.iter().map(|n| n.status()).collect();
        if statuses.iter().any(|s| *s == NodeStatus::Error) {
            NodeStatus::Error
        } else if statuses.iter().any(|s| *s == NodeStatus::Cancel) {
            NodeStatus::Cancel
        } else if statuses.iter().all(|s| s.is_terminal()) {
            NodeStatus::Success
        } else {
            NodeStatus::Running
        }
    }

    pub fn metrics(&self) -> GraphMetrics {
        let mut m = GraphMetrics::default();
        for node in &self.nodes {
            match node.status() {
                NodeStatus::Success => m.success += 1,
                NodeStatus::Error => m.error += 1,
                NodeStatus::Cancel => m.cancel += 1,
                NodeStatus::Skipped => m.skipped += 1,
                NodeStatus::Running => m.running += 1,
                NodeStatus::None | NodeStatus::Queued => m.pending += 1,
            }
        }
        m
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContinueOn, ExecutorConfig, StepBody};
    use std::path::PathBuf;

    fn step(name: &str, depends: &[&str]) -> Step {
        Step {
            name: name.to_string(),
            id: None,
            dir: PathBuf::from("."),
            executor: ExecutorConfig::command(),
            body: StepBody::Command(vec!["true".to_string()]),
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

    #[test]
    fn rejects_dangling_dependency() {
        let steps = vec![step("a", &["missing"])];
        assert!(matches!(ExecutionGraph::new(&steps), Err(EngineError::UnknownDependency(_, _))));
    }

    #[test]
    fn rejects_cycle() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert!(matches!(ExecutionGraph::new(&steps), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn builds_linear_chain() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        let graph = ExecutionGraph::new(&steps).unwrap();
        assert_eq!(graph.nodes().len(), 3);
        let c = graph.node_by_name("c").unwrap();
        assert_eq!(graph.predecessors(c.index).len(), 1);
    }

    #[test]
    fn aggregate_status_is_running_until_all_terminal() {
        let steps = vec![step("a", &[])];
        let graph = ExecutionGraph::new(&steps).unwrap();
        assert_eq!(graph.status(), NodeStatus::Running);
        graph.node(NodeIndex(0)).with_state_mut(|s| s.status = NodeStatus::Success);
        assert_eq!(graph.status(), NodeStatus::Success);
    }
}
