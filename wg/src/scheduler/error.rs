//! Submission error types

use std::time::Duration;
use thiserror::Error;

/// Ways a submitted task can fail to produce a value
///
/// `E` is the task's own error type. It is carried in `Task` unchanged;
/// the scheduler never inspects it.
#[derive(Debug, Error)]
pub enum SubmitError<E> {
    /// The admission window is saturated; the task was never queued
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The task was still pending when the queue was cleared, or was
    /// submitted after shutdown
    #[error("Task discarded: queue cleared")]
    QueueCleared,

    /// The task panicked or its runtime went away, so no outcome exists
    /// to deliver
    #[error("Task aborted before producing an outcome")]
    Aborted,

    #[error(transparent)]
    Task(E),
}

impl<E> SubmitError<E> {
    /// Check if this is a rate limit rejection
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SubmitError::RateLimited { .. })
    }

    /// Check if the task was discarded by `Scheduler::clear` or `shutdown`
    pub fn is_cleared(&self) -> bool {
        matches!(self, SubmitError::QueueCleared)
    }

    /// Check if the error came from the task itself
    pub fn is_task_error(&self) -> bool {
        matches!(self, SubmitError::Task(_))
    }

    /// Get the retry duration if this is a rate limit rejection
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SubmitError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Take back the task's own error, if that is what this is
    pub fn into_task_error(self) -> Option<E> {
        match self {
            SubmitError::Task(e) => Some(e),
            _ => None,
        }
    }
}
