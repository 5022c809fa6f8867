//! Scheduler implementation

use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::Priority;

use super::config::{ConfigError, SchedulerConfig};
use super::error::SubmitError;
use super::queue::{
    Job, QueueEntry, QueueEntryStatus, RunningRequest, ScheduledRequest, SchedulerMetrics, SchedulerStats, TaskJob,
};
use super::window::AdmissionWindow;

/// Internal state protected by mutex
struct SchedulerInner {
    /// Priority queue of waiting requests
    queue: BinaryHeap<ScheduledRequest>,

    /// Currently running requests
    running: HashMap<Uuid, RunningRequest>,

    /// Admission timestamps for rate limiting (sliding window)
    window: AdmissionWindow,

    /// Next submission sequence number
    next_seq: u64,

    /// Lifetime counters
    metrics: SchedulerMetrics,

    /// Set by shutdown; no further submissions are queued
    closed: bool,
}

impl SchedulerInner {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty()
    }
}

struct Shared {
    config: SchedulerConfig,
    inner: Mutex<SchedulerInner>,
    idle: Notify,
}

/// The Scheduler admits submitted tasks in priority order, bounded by a
/// concurrency ceiling and a sliding-window rate limit.
///
/// `Scheduler` is a cheap handle; clones share one queue. Tasks run on the
/// Tokio runtime, so submissions must happen inside one.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        debug!(?config, "Scheduler::new: called");
        config.validate()?;

        let window = AdmissionWindow::new(config.rate_window(), config.max_requests_per_window);
        info!(
            max_concurrent = config.max_concurrent,
            max_requests_per_window = config.max_requests_per_window,
            rate_window_ms = config.rate_window_ms,
            "Scheduler created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(SchedulerInner {
                    queue: BinaryHeap::new(),
                    running: HashMap::new(),
                    window,
                    next_seq: 0,
                    metrics: SchedulerMetrics::default(),
                    closed: false,
                }),
                idle: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Submit a task at the configured default priority
    pub fn submit<F, Fut, T, E>(&self, task: F) -> TaskHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit_with_priority(task, self.shared.config.default_priority)
    }

    /// Submit a task at an explicit priority
    ///
    /// All bookkeeping happens before this returns: the task is either
    /// rejected or queued, and dispatch has run. The returned handle
    /// resolves once the task's outcome is known. After `shutdown` every
    /// submission is rejected with `QueueCleared`.
    pub fn submit_with_priority<F, Fut, T, E>(&self, task: F, priority: Priority) -> TaskHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let id = Uuid::now_v7();
        debug!(%id, %priority, "Scheduler::submit: called");
        let now = Instant::now();
        let mut inner = self.lock();
        inner.metrics.total_submitted += 1;

        if inner.closed {
            inner.metrics.total_cleared += 1;
            drop(inner);
            debug!(%id, %priority, "Scheduler::submit: closed, rejecting");
            return TaskHandle {
                id,
                priority,
                state: HandleState::Rejected(Some(SubmitError::QueueCleared)),
            };
        }

        if inner.window.is_saturated(now) {
            let retry_after = inner.window.retry_after(now);
            let admissions = inner.window.len();
            inner.metrics.total_rate_limited += 1;
            drop(inner);
            warn!(%id, %priority, admissions, ?retry_after, "Rate limited");
            return TaskHandle {
                id,
                priority,
                state: HandleState::Rejected(Some(SubmitError::RateLimited { retry_after })),
            };
        }

        let (reply, rx) = oneshot::channel();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(ScheduledRequest {
            id,
            priority,
            seq,
            submitted_at: now,
            job: Box::new(TaskJob::new(task, reply)),
        });
        inner.metrics.peak_queue_depth = inner.metrics.peak_queue_depth.max(inner.queue.len());
        debug!(%id, seq, queued = inner.queue.len(), "Scheduler::submit: queued");
        drop(inner);

        self.dispatch();
        TaskHandle {
            id,
            priority,
            state: HandleState::Waiting(rx),
        }
    }

    /// Get a point-in-time snapshot of queue and window usage
    pub fn stats(&self) -> SchedulerStats {
        let mut inner = self.lock();
        let rate_limit_remaining = inner.window.remaining(Instant::now());
        SchedulerStats {
            queued: inner.queue.len(),
            running: inner.running.len(),
            rate_limit_remaining,
            max_concurrent: self.shared.config.max_concurrent,
        }
    }

    /// Get the lifetime counters
    pub fn metrics(&self) -> SchedulerMetrics {
        self.lock().metrics.clone()
    }

    /// List running tasks, then pending tasks in admission order
    pub fn queue_details(&self) -> Vec<QueueEntry> {
        debug!("Scheduler::queue_details: called");
        let inner = self.lock();
        let now = Instant::now();

        let mut running: Vec<_> = inner.running.iter().collect();
        running.sort_by_key(|(_, r)| r.seq);

        let mut pending: Vec<_> = inner.queue.iter().collect();
        pending.sort_by(|a, b| b.cmp(a));

        running
            .into_iter()
            .map(|(id, r)| QueueEntry {
                id: *id,
                priority: r.priority,
                status: QueueEntryStatus::Running,
                elapsed: now.saturating_duration_since(r.started_at),
            })
            .chain(pending.into_iter().map(|r| QueueEntry {
                id: r.id,
                priority: r.priority,
                status: QueueEntryStatus::Queued,
                elapsed: now.saturating_duration_since(r.submitted_at),
            }))
            .collect()
    }

    /// Reject every pending task with `QueueCleared`
    ///
    /// Running tasks are left alone and settle normally. Returns how many
    /// tasks were rejected.
    pub fn clear(&self) -> usize {
        debug!("Scheduler::clear: called");
        let mut inner = self.lock();
        let mut discarded = Vec::with_capacity(inner.queue.len());
        while let Some(request) = inner.queue.pop() {
            discarded.push(request);
        }
        inner.metrics.total_cleared += discarded.len() as u64;
        let idle = inner.is_idle();
        drop(inner);

        let count = discarded.len();
        for request in discarded {
            debug!(id = %request.id, priority = %request.priority, "Scheduler::clear: rejecting");
            request.job.reject();
        }
        if idle {
            self.shared.idle.notify_waiters();
        }

        info!(count, "Queue cleared");
        count
    }

    /// Wait until nothing is queued or running
    pub async fn wait_idle(&self) {
        debug!("Scheduler::wait_idle: called");
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// True once `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Stop accepting work, discard pending tasks, and wait for running
    /// ones to settle
    pub async fn shutdown(&self) -> usize {
        info!("Scheduler shutting down");
        self.lock().closed = true;
        let cleared = self.clear();
        self.wait_idle().await;
        info!(cleared, "Scheduler shut down");
        cleared
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        // Bookkeeping never runs task code under the lock, so a poisoned
        // guard still holds consistent state
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit queued tasks while there is capacity
    fn dispatch(&self) {
        let mut admitted = Vec::new();
        {
            let mut inner = self.lock();
            while inner.running.len() < self.shared.config.max_concurrent {
                let Some(request) = inner.queue.pop() else {
                    break;
                };
                let now = Instant::now();
                inner.window.record(now);
                inner.running.insert(
                    request.id,
                    RunningRequest {
                        priority: request.priority,
                        seq: request.seq,
                        started_at: now,
                    },
                );
                inner.metrics.total_admitted += 1;
                inner.metrics.peak_concurrent = inner.metrics.peak_concurrent.max(inner.running.len());
                debug!(
                    id = %request.id,
                    priority = %request.priority,
                    running = inner.running.len(),
                    queued = inner.queue.len(),
                    "Scheduler::dispatch: admitted"
                );
                admitted.push((request.id, request.job));
            }
        }

        for (id, job) in admitted {
            self.spawn(id, job);
        }
    }

    fn spawn(&self, id: Uuid, job: Box<dyn Job>) {
        let slot = Slot {
            scheduler: self.clone(),
            id,
            released: false,
        };
        tokio::spawn(async move {
            // The task's future, and with it the reply channel, is gone once
            // this resolves; a panicked task's caller sees `Aborted`
            let outcome = AssertUnwindSafe(job.run()).catch_unwind().await;
            match outcome {
                Ok(settled) => {
                    let scheduler = slot.release(settled.failed);
                    settled.deliver();
                    scheduler.dispatch();
                }
                Err(_) => {
                    warn!(%id, "Task panicked");
                    slot.release(true).dispatch();
                }
            }
        });
    }

    /// Free a running slot
    fn finish(&self, id: Uuid, failed: bool) {
        let mut inner = self.lock();
        if inner.running.remove(&id).is_none() {
            warn!(%id, "Finished task was not running");
        }
        if failed {
            inner.metrics.total_failed += 1;
        } else {
            inner.metrics.total_completed += 1;
        }
        let idle = inner.is_idle();
        debug!(%id, failed, running = inner.running.len(), "Scheduler::finish: slot freed");
        drop(inner);

        if idle {
            self.shared.idle.notify_waiters();
        }
    }
}

/// Running slot owned by a spawned task
///
/// Dropped without `release` only when the runtime tore the task down.
/// The slot is freed but nothing is admitted in its place: a runtime that
/// is shutting down drops newly spawned tasks on the spot.
struct Slot {
    scheduler: Scheduler,
    id: Uuid,
    released: bool,
}

impl Slot {
    fn release(mut self, failed: bool) -> Scheduler {
        self.released = true;
        self.scheduler.finish(self.id, failed);
        self.scheduler.clone()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(id = %self.id, "Task dropped before settling");
        self.scheduler.finish(self.id, true);
    }
}

enum HandleState<T, E> {
    Rejected(Option<SubmitError<E>>),
    Waiting(oneshot::Receiver<Result<T, SubmitError<E>>>),
}

/// Pending outcome of a submitted task
///
/// Resolves exactly once: with the task's value, its own error in
/// `SubmitError::Task`, or a scheduler rejection.
#[must_use = "dropping a TaskHandle discards the outcome; the task still runs"]
pub struct TaskHandle<T, E> {
    id: Uuid,
    priority: Priority,
    state: HandleState<T, E>,
}

// Neither T nor E is ever pinned in place
impl<T, E> Unpin for TaskHandle<T, E> {}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// True if the submission was refused before queueing
    pub fn is_rejected(&self) -> bool {
        matches!(self.state, HandleState::Rejected(_))
    }
}

impl<T, E> std::fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("rejected", &self.is_rejected())
            .finish()
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, SubmitError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            HandleState::Rejected(err) => Poll::Ready(Err(err.take().unwrap_or(SubmitError::Aborted))),
            HandleState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                // Sender dropped without a reply: the task panicked
                Poll::Ready(Err(_)) => Poll::Ready(Err(SubmitError::Aborted)),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
