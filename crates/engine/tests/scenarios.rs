//! End-to-end scheduler scenarios, run against the real `command` executor
//! (no mocking of the executor boundary) so these exercise the actual
//! dispatch barrier, propagation, and timeout code paths.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use engine::graph::{ExecutionGraph, NodeStatus};
use engine::model::{
    Condition, ContinueOn, Dag, ExecutionType, ExecutorConfig, Params, RepeatMode, RepeatPolicy, RepeatPredicate,
    Step, StepBody,
};
use engine::scheduler::{Scheduler, SchedulerConfig};
use nodes::ExecutorRegistry;
use tokio::sync::mpsc;

fn cmd_step(name: &str, depends: &[&str], argv: &[&str]) -> Step {
    Step {
        name: name.to_string(),
        id: None,
        dir: PathBuf::from("."),
        executor: ExecutorConfig::command(),
        body: StepBody::Command(argv.iter().map(|s| s.to_string()).collect()),
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

fn test_dag(steps: Vec<Step>, timeout: Option<Duration>) -> Dag {
    Dag {
        name: "scenario".to_string(),
        group: None,
        description: None,
        tags: vec![],
        execution_type: ExecutionType::Graph,
        steps,
        on_exit: None,
        on_success: None,
        on_failure: None,
        on_cancel: None,
        preconditions: vec![],
        schedule: None,
        params: Params::default(),
        env: vec![],
        timeout,
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

fn scheduler_with(timeout: Option<Duration>) -> Scheduler {
    Scheduler::new(
        SchedulerConfig {
            log_dir: std::env::temp_dir().join("dagforge-scenario-logs"),
            run_id: "scenario-run".to_string(),
            timeout,
            max_active_steps: 0,
            max_cleanup_time: Duration::from_secs(5),
            dry: false,
        },
        Arc::new(ExecutorRegistry::with_defaults()),
    )
}

async fn run(dag: &Dag, timeout: Option<Duration>) -> (Result<(), engine::EngineError>, Arc<ExecutionGraph>) {
    let graph = Arc::new(ExecutionGraph::new(&dag.steps).unwrap());
    let scheduler = scheduler_with(timeout);
    let (tx, mut rx) = mpsc::channel(16);
    let result = scheduler.schedule(dag, graph.clone(), tx).await;
    drop(rx.try_recv());
    (result, graph)
}

#[tokio::test]
async fn sequential_chain_all_terminate_success() {
    let dag = test_dag(
        vec![
            cmd_step("A", &[], &["true"]),
            cmd_step("B", &["A"], &["true"]),
            cmd_step("C", &["B"], &["true"]),
        ],
        None,
    );
    let (result, graph) = run(&dag, None).await;

    assert!(result.is_ok());
    assert_eq!(graph.node_by_name("A").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.node_by_name("B").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.node_by_name("C").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.status(), NodeStatus::Success);
}

#[tokio::test]
async fn failure_propagates_to_all_descendants() {
    let dag = test_dag(
        vec![
            cmd_step("A", &[], &["true"]),
            cmd_step("B", &["A"], &["true"]),
            cmd_step("C", &["B"], &["false"]),
            cmd_step("D", &["C"], &["true"]),
        ],
        None,
    );
    let (result, graph) = run(&dag, None).await;

    assert!(result.is_err());
    assert_eq!(graph.node_by_name("A").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.node_by_name("B").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.node_by_name("C").unwrap().status(), NodeStatus::Error);
    assert_eq!(graph.node_by_name("D").unwrap().status(), NodeStatus::Cancel);
    assert_eq!(graph.status(), NodeStatus::Error);
}

#[tokio::test]
async fn continue_on_exit_code_tolerates_failure_without_mark_success() {
    let mut a = cmd_step("A", &[], &["sh", "-c", "exit 1"]);
    a.continue_on = ContinueOn { failure: false, skipped: false, exit_code: vec![1], output: vec![], mark_success: false };
    let dag = test_dag(vec![a, cmd_step("B", &["A"], &["true"])], None);
    let (result, graph) = run(&dag, None).await;

    // tolerated (not propagated to B) but still an error node, so the
    // aggregate is error per spec.md §8 scenario 3 absent markSuccess.
    assert!(result.is_err());
    assert_eq!(graph.node_by_name("A").unwrap().status(), NodeStatus::Error);
    assert_eq!(graph.node_by_name("B").unwrap().status(), NodeStatus::Success);
}

#[tokio::test]
async fn continue_on_exit_code_with_mark_success_yields_success_aggregate() {
    let mut a = cmd_step("A", &[], &["sh", "-c", "exit 1"]);
    a.continue_on = ContinueOn { failure: false, skipped: false, exit_code: vec![1], output: vec![], mark_success: true };
    let dag = test_dag(vec![a, cmd_step("B", &["A"], &["true"])], None);
    let (result, graph) = run(&dag, None).await;

    assert!(result.is_ok());
    assert_eq!(graph.node_by_name("A").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.node_by_name("B").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.status(), NodeStatus::Success);
}

#[tokio::test]
async fn precondition_skip_with_continue_on_skipped_does_not_cancel_descendant() {
    let mut b = cmd_step("B", &[], &["echo", "hi"]);
    b.preconditions = vec![Condition { command: "echo 1".to_string(), expected: Some("0".to_string()) }];
    b.continue_on = ContinueOn { failure: false, skipped: true, exit_code: vec![], output: vec![], mark_success: false };
    let dag = test_dag(vec![cmd_step("A", &[], &["true"]), b, cmd_step("C", &["B"], &["true"])], None);
    let (result, graph) = run(&dag, None).await;

    assert!(result.is_ok());
    assert_eq!(graph.node_by_name("A").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.node_by_name("B").unwrap().status(), NodeStatus::Skipped);
    assert_eq!(graph.node_by_name("C").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.status(), NodeStatus::Success);
}

#[tokio::test]
async fn timeout_mid_run_cancels_in_flight_and_pending_nodes() {
    let dag = test_dag(
        vec![
            cmd_step("A", &[], &["sleep", "1"]),
            cmd_step("B", &["A"], &["sleep", "10"]),
            cmd_step("C", &["B"], &["true"]),
        ],
        Some(Duration::from_secs(2)),
    );
    let (result, graph) = run(&dag, Some(Duration::from_secs(2))).await;

    assert!(result.is_err());
    assert_eq!(graph.node_by_name("A").unwrap().status(), NodeStatus::Success);
    assert_eq!(graph.node_by_name("B").unwrap().status(), NodeStatus::Cancel);
    assert_eq!(graph.node_by_name("C").unwrap().status(), NodeStatus::Cancel);
    assert_eq!(graph.status(), NodeStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn repeat_until_condition_succeeds_once_file_reads_ready() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("state");
    std::fs::write(&file_path, "").unwrap();
    let file_str = file_path.display().to_string();

    let mut s = cmd_step("S", &[], &["cat", &file_str]);
    s.repeat_policy = Some(RepeatPolicy {
        mode: RepeatMode::Until,
        predicate: RepeatPredicate::Condition(Condition {
            command: format!("`cat {file_str}`"),
            expected: Some("ready".to_string()),
        }),
        interval: Duration::from_millis(100),
        limit: None,
        backoff: None,
        max_interval: None,
    });
    let dag = test_dag(vec![s], None);
    let graph = Arc::new(ExecutionGraph::new(&dag.steps).unwrap());
    let scheduler = scheduler_with(None);
    let (tx, mut rx) = mpsc::channel(16);

    let writer_path = file_path.clone();
    let writer = tokio::spawn(async move {
        // Past the first two 100ms poll cycles before the predicate starts
        // reading "ready".
        tokio::time::sleep(Duration::from_millis(250)).await;
        std::fs::write(&writer_path, "ready").unwrap();
    });
    let advancer = tokio::spawn(async move {
        for _ in 0..200 {
            tokio::time::advance(Duration::from_millis(20)).await;
        }
    });

    let result = scheduler.schedule(&dag, graph.clone(), tx).await;
    drop(rx.try_recv());
    writer.await.unwrap();
    advancer.abort();

    assert!(result.is_ok());
    assert_eq!(graph.status(), NodeStatus::Success);
    let state = graph.node_by_name("S").unwrap().state();
    assert!(state.done_count >= 2, "expected at least 2 repeat cycles, got {}", state.done_count);
}
