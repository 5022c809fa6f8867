//! Sliding admission window for rate limiting

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Timestamps of recent admissions, oldest first
#[derive(Debug)]
pub(crate) struct AdmissionWindow {
    width: Duration,
    limit: usize,
    admissions: VecDeque<Instant>,
}

impl AdmissionWindow {
    pub(crate) fn new(width: Duration, limit: usize) -> Self {
        Self {
            width,
            limit,
            admissions: VecDeque::with_capacity(limit.min(1024)),
        }
    }

    /// Drop admissions that fell out of the window
    ///
    /// The window is `(now - width, now]`: an admission exactly `width` old
    /// no longer counts, matching the instant `retry_after` reaches zero.
    pub(crate) fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.admissions.front() {
            if now.saturating_duration_since(*oldest) < self.width {
                break;
            }
            self.admissions.pop_front();
        }
    }

    /// Prune, then report whether the window is full
    pub(crate) fn is_saturated(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.admissions.len() >= self.limit
    }

    pub(crate) fn record(&mut self, now: Instant) {
        self.admissions.push_back(now);
    }

    /// Admissions still allowed in the current window
    pub(crate) fn remaining(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.limit.saturating_sub(self.admissions.len())
    }

    /// Time until the oldest admission leaves the window
    pub(crate) fn retry_after(&self, now: Instant) -> Duration {
        self.admissions
            .front()
            .map(|oldest| self.width.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.admissions.len()
    }
}
