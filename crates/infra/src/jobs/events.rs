//! Job lifecycle notifications.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use filepipe_events::Subscription;

use super::types::Job;

/// Which transition a notification reports.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Queued,
    Started,
    Succeeded,
    Failed,
}

/// A lifecycle notification carrying the job as it was right after the
/// transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: Job,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job: Job) -> Self {
        Self { kind, job }
    }
}

/// Subscriber that writes every lifecycle notification to the log.
///
/// Runs until the dispatcher (and with it the bus) is gone.
pub fn spawn_lifecycle_logger(mut subscription: Subscription<JobEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let job = &event.job;
            match event.kind {
                JobEventKind::Queued => debug!(job_id = %job.id, "job queued"),
                JobEventKind::Started => {
                    debug!(job_id = %job.id, attempt = job.attempts, "job started")
                }
                JobEventKind::Succeeded => {
                    info!(job_id = %job.id, attempt = job.attempts, "job succeeded")
                }
                JobEventKind::Failed => error!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    error = job.error.as_deref().unwrap_or_default(),
                    "job failed"
                ),
            }
        }
    })
}
