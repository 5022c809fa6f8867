//! Queue types for the scheduler

use std::cmp::{Ordering, Reverse};
use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::Priority;

use super::error::SubmitError;

/// Channel half that settles a caller's `TaskHandle`
pub(crate) type Reply<T, E> = oneshot::Sender<Result<T, SubmitError<E>>>;

/// A finished task whose outcome has not been handed to the caller yet
pub(crate) struct Settled {
    pub(crate) failed: bool,
    deliver: Box<dyn FnOnce() + Send>,
}

impl Settled {
    pub(crate) fn deliver(self) {
        (self.deliver)()
    }
}

/// Type-erased task plus the channel its outcome goes to
pub(crate) trait Job: Send {
    /// Invoke the task; resolves once it has settled
    fn run(self: Box<Self>) -> BoxFuture<'static, Settled>;

    /// Settle the caller with `QueueCleared` without running the task
    fn reject(self: Box<Self>);
}

pub(crate) struct TaskJob<F, T, E> {
    task: F,
    reply: Reply<T, E>,
}

impl<F, T, E> TaskJob<F, T, E> {
    pub(crate) fn new(task: F, reply: Reply<T, E>) -> Self {
        Self { task, reply }
    }
}

impl<F, Fut, T, E> Job for TaskJob<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, Settled> {
        let TaskJob { task, reply } = *self;
        async move {
            let outcome = task().await;
            Settled {
                failed: outcome.is_err(),
                deliver: Box::new(move || {
                    // The caller may have dropped its handle
                    let _ = reply.send(outcome.map_err(SubmitError::Task));
                }),
            }
        }
        .boxed()
    }

    fn reject(self: Box<Self>) {
        let _ = self.reply.send(Err(SubmitError::QueueCleared));
    }
}

/// A task waiting in the queue
pub(crate) struct ScheduledRequest {
    pub(crate) id: Uuid,
    pub(crate) priority: Priority,
    /// Monotonic submission counter, the FIFO tie-break
    pub(crate) seq: u64,
    pub(crate) submitted_at: Instant,
    pub(crate) job: Box<dyn Job>,
}

impl ScheduledRequest {
    fn sort_key(&self) -> (Priority, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }
}

impl std::fmt::Debug for ScheduledRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledRequest")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl Eq for ScheduledRequest {}

impl PartialEq for ScheduledRequest {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for ScheduledRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence number
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ScheduledRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Bookkeeping for an admitted task
#[derive(Debug, Clone)]
pub(crate) struct RunningRequest {
    pub(crate) priority: Priority,
    pub(crate) seq: u64,
    pub(crate) started_at: Instant,
}

/// Point-in-time scheduler snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub rate_limit_remaining: usize,
    pub max_concurrent: usize,
}

/// Counters accumulated over the scheduler's lifetime
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerMetrics {
    pub total_submitted: u64,
    pub total_admitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_rate_limited: u64,
    pub total_cleared: u64,
    pub peak_queue_depth: usize,
    pub peak_concurrent: usize,
}

/// One row of `Scheduler::queue_details`
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub priority: Priority,
    pub status: QueueEntryStatus,
    /// Time spent in the current status
    pub elapsed: Duration,
}

/// Status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueEntryStatus {
    Running,
    Queued,
}
