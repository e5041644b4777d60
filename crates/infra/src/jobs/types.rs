//! Core job types and the retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use filepipe_core::JobId;

/// Number of dispatch attempts a job gets before it stays `failed`.
pub const MAX_ATTEMPTS: u32 = 3;

/// Job lifecycle state.
///
/// `queued → active → {succeeded, failed}`; `failed → queued` while attempts
/// remain. `succeeded` and an exhausted `failed` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// In the backlog, waiting for a concurrency slot
    Queued,
    /// Handed to the handler
    Active,
    /// Handler completed without error
    Succeeded,
    /// Last handler invocation failed
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

/// Retry policy: exponential backoff, fixed attempt budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Unit of backoff; the delay after attempt `n` is `base_delay * 2^n`
    pub base_delay: Duration,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before re-queueing a job that has made `attempts` attempts.
    ///
    /// Yields `2, 4, 8, …` units of `base_delay` for attempts `1, 2, 3, …`.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Check if more attempts are allowed.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque caller data (for ingestion: `{"fileId": "..."}`)
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Dispatch attempts so far; incremented exactly once per dispatch
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Last failure message; present only while `state == failed`
    pub error: Option<String>,
}

impl Job {
    /// Create a new `queued` job.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            payload,
            state: JobState::Queued,
            attempts: 0,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Mark job as handed to the handler.
    pub fn mark_active(&mut self) {
        self.state = JobState::Active;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    /// Mark job as succeeded.
    pub fn mark_succeeded(&mut self) {
        self.state = JobState::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    /// Mark job as failed with the handler's error message.
    pub fn mark_failed(&mut self, error: String) {
        self.state = JobState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Put a failed job back in line for another attempt.
    pub fn requeue(&mut self) {
        self.state = JobState::Queued;
        self.error = None;
    }

    /// No further attempt will follow under `policy`.
    pub fn is_terminal(&self, policy: &RetryPolicy) -> bool {
        match self.state {
            JobState::Succeeded => true,
            JobState::Failed => !policy.should_retry(self.attempts),
            JobState::Queued | JobState::Active => false,
        }
    }
}
