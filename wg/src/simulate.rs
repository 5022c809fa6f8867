//! Synthetic workload for exercising a scheduler
//!
//! Stands in for a host process: builds a batch of timed tasks with random
//! priorities, routes them through one `Scheduler`, and tallies how each
//! submission settled.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use eyre::{Result, eyre};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::Priority;
use crate::scheduler::{Scheduler, SchedulerMetrics, SchedulerStats, SubmitError};

/// Error produced by a task drawn to fail
#[derive(Debug, Clone, Error)]
#[error("simulated failure in task {index}")]
pub struct SimulatedFailure {
    pub index: usize,
}

/// Shape of a synthetic workload
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub tasks: usize,
    pub min_duration: Duration,
    pub max_duration: Duration,
    /// Probability in [0, 1] that a task fails
    pub fail_rate: f64,
    /// Clear the queue this long after the last submission
    pub clear_after: Option<Duration>,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            tasks: 20,
            min_duration: Duration::from_millis(10),
            max_duration: Duration::from_millis(100),
            fail_rate: 0.0,
            clear_after: None,
        }
    }
}

impl SimulationPlan {
    pub fn validate(&self) -> Result<()> {
        if self.min_duration > self.max_duration {
            return Err(eyre!(
                "min duration {:?} exceeds max duration {:?}",
                self.min_duration,
                self.max_duration
            ));
        }
        if !(0.0..=1.0).contains(&self.fail_rate) {
            return Err(eyre!("fail rate must be within 0.0..=1.0, got {}", self.fail_rate));
        }
        Ok(())
    }

    fn draw(&self) -> Vec<DrawnTask> {
        let mut rng = rand::rng();
        (0..self.tasks)
            .map(|index| DrawnTask {
                index,
                priority: Priority::ALL.choose(&mut rng).copied().unwrap_or_default(),
                duration: rng.random_range(self.min_duration..=self.max_duration),
                fail: rng.random_bool(self.fail_rate),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct DrawnTask {
    index: usize,
    priority: Priority,
    duration: Duration,
    fail: bool,
}

/// How the submissions settled
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Outcomes {
    pub completed: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub cleared: usize,
    pub aborted: usize,
}

impl Outcomes {
    fn record<T>(&mut self, outcome: &Result<T, SubmitError<SimulatedFailure>>) {
        match outcome {
            Ok(_) => self.completed += 1,
            Err(SubmitError::Task(_)) => self.failed += 1,
            Err(SubmitError::RateLimited { .. }) => self.rate_limited += 1,
            Err(SubmitError::QueueCleared) => self.cleared += 1,
            Err(SubmitError::Aborted) => self.aborted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.rate_limited + self.cleared + self.aborted
    }
}

/// Result of one simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub tasks: usize,
    pub outcomes: Outcomes,
    /// Priority of each task in the order its body started
    pub start_order: Vec<Priority>,
    pub stats: SchedulerStats,
    pub metrics: SchedulerMetrics,
    pub elapsed_ms: u64,
}

/// Submit the plan's tasks and wait for every one to settle
pub async fn run(scheduler: &Scheduler, plan: &SimulationPlan) -> Result<SimulationReport> {
    debug!(?plan, "simulate::run: called");
    plan.validate()?;

    let drawn = plan.draw();
    let start_order = Arc::new(Mutex::new(Vec::with_capacity(drawn.len())));
    let start = Instant::now();

    let handles: Vec<_> = drawn
        .into_iter()
        .map(|drawn| {
            let start_order = start_order.clone();
            scheduler.submit_with_priority(
                move || async move {
                    start_order
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(drawn.priority);
                    tokio::time::sleep(drawn.duration).await;
                    if drawn.fail {
                        Err(SimulatedFailure { index: drawn.index })
                    } else {
                        Ok(drawn.duration)
                    }
                },
                drawn.priority,
            )
        })
        .collect();
    info!(tasks = handles.len(), "Simulation submitted");

    let clearer = plan.clear_after.map(|after| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            scheduler.clear()
        })
    });

    let mut outcomes = Outcomes::default();
    for outcome in futures::future::join_all(handles).await {
        outcomes.record(&outcome);
    }
    if let Some(clearer) = clearer {
        clearer.abort();
    }
    scheduler.wait_idle().await;

    let start_order = start_order.lock().unwrap_or_else(PoisonError::into_inner).clone();
    let report = SimulationReport {
        tasks: plan.tasks,
        outcomes,
        start_order,
        stats: scheduler.stats(),
        metrics: scheduler.metrics(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    info!(outcomes = ?report.outcomes, elapsed_ms = report.elapsed_ms, "Simulation finished");
    Ok(report)
}
