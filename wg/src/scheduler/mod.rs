//! Scheduler for submitted work
//!
//! Admits opaque async tasks with priority queuing, a concurrency ceiling,
//! and sliding-window rate limiting in a single component.

mod config;
mod core;
mod error;
mod queue;
mod window;

pub use config::{ConfigError, SchedulerConfig};
pub use core::{Scheduler, TaskHandle};
pub use error::SubmitError;
pub use queue::{QueueEntry, QueueEntryStatus, SchedulerMetrics, SchedulerStats};
