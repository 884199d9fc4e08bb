//! `queue` crate — in-process async job queue.
//!
//! Stands in for "the distributed coordinator that dispatches work to
//! remote workers": the `serve` command enqueues a `DagRunJob` per
//! triggered run, and one or more `worker` processes drain it. Built on
//! the same `tokio::sync::mpsc` bounded-channel pattern the engine's
//! scheduler uses for its progress sink.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is at capacity")]
    Full,

    #[error("queue is closed")]
    Closed,
}

/// A unit of work: "run this dag, under this run id, with these params."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagRunJob {
    pub dag_name: String,
    pub run_id: String,
    pub root_ref: Option<String>,
    pub params: serde_json::Value,
}

impl DagRunJob {
    pub fn new(dag_name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            dag_name: dag_name.into(),
            run_id: Uuid::new_v4().to_string(),
            root_ref: None,
            params,
        }
    }
}

/// The producer half. Cheaply `Clone`, safe to share across API handlers.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<DagRunJob>,
}

/// The consumer half. Exactly one worker loop drains this at a time —
/// `mpsc::Receiver` is not `Clone`, so ownership enforces that.
pub struct JobReceiver {
    rx: mpsc::Receiver<DagRunJob>,
}

impl JobQueue {
    /// Create a bounded queue. `capacity` is the number of jobs that may sit
    /// enqueued before `try_enqueue` starts rejecting work.
    pub fn new(capacity: usize) -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, JobReceiver { rx })
    }

    /// Enqueue a job, waiting for room if the queue is full.
    pub async fn enqueue(&self, job: DagRunJob) -> Result<(), QueueError> {
        self.tx.send(job).await.map_err(|_| QueueError::Closed)
    }

    /// Enqueue a job without waiting; fails immediately if the queue is full.
    pub fn try_enqueue(&self, job: DagRunJob) -> Result<(), QueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

impl JobReceiver {
    /// Wait for the next job. Returns `None` once every `JobQueue` handle
    /// has been dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<DagRunJob> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_receive_preserves_order() {
        let (queue, mut rx) = JobQueue::new(4);
        queue.enqueue(DagRunJob::new("a", serde_json::json!({}))).await.unwrap();
        queue.enqueue(DagRunJob::new("b", serde_json::json!({}))).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.dag_name, "a");
        assert_eq!(second.dag_name, "b");
    }

    #[tokio::test]
    async fn try_enqueue_rejects_when_full() {
        let (queue, _rx) = JobQueue::new(1);
        queue.try_enqueue(DagRunJob::new("a", serde_json::json!({}))).unwrap();
        let err = queue.try_enqueue(DagRunJob::new("b", serde_json::json!({}))).unwrap_err();
        assert!(matches!(err, QueueError::Full));
    }

    #[tokio::test]
    async fn recv_returns_none_after_all_senders_dropped() {
        let (queue, mut rx) = JobQueue::new(1);
        drop(queue);
        assert!(rx.recv().await.is_none());
    }
}
