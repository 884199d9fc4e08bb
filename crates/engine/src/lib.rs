//! `engine` crate — DAG compilation, the execution graph, the node
//! runtime, and the concurrent scheduler that drives them.

pub mod compiler;
pub mod condition;
pub mod control;
pub mod error;
pub mod graph;
pub mod model;
pub mod node;
pub mod scheduler;
pub mod spec;
pub mod store;
pub mod vars;

pub use compiler::Compiler;
pub use condition::{eval as eval_condition, eval_all as eval_conditions, output_matches};
pub use control::socket_path;
pub use error::{CompileError, ConditionError, EngineError};
pub use graph::{ExecutionGraph, GraphMetrics, Node, NodeIndex, NodeState, NodeStatus};
pub use model::{
    Condition, ContinueOn, Dag, EnvVar, ExecutionType, ExecutorConfig, Params, RepeatMode, RepeatPolicy,
    RepeatPredicate, RetryPolicy, Schedule, Step, StepBody,
};
pub use node::{run_node, NodeContext, NodeOutcome};
pub use scheduler::{ProgressEvent, Scheduler, SchedulerConfig};
pub use store::{ChildDagRunStatus, DagStore};
pub use vars::{OutputVars, VarScope};
