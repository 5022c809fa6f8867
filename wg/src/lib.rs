//! Workgate - admission control for asynchronous work
//!
//! A host process constructs one [`Scheduler`] and routes its work through
//! it. The scheduler holds submitted tasks in a priority queue, runs at most
//! `max-concurrent` of them at a time, and refuses new submissions once the
//! sliding rate window is full.
//!
//! # Modules
//!
//! - [`scheduler`] - Priority queue, concurrency gate, and rate window
//! - [`domain`] - Priority levels
//! - [`config`] - Configuration types and loading
//! - [`simulate`] - Synthetic workload driver
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod scheduler;
pub mod simulate;

// Re-export commonly used types
pub use config::Config;
pub use domain::Priority;
pub use scheduler::{
    ConfigError, QueueEntry, QueueEntryStatus, Scheduler, SchedulerConfig, SchedulerMetrics, SchedulerStats,
    SubmitError, TaskHandle,
};
