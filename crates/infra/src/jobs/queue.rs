//! Bounded-concurrency job dispatcher with retry and backoff.
//!
//! ## Ownership
//!
//! A single tokio task (the dispatcher) owns the job table, the FIFO backlog
//! and the in-flight counter. `JobQueue` handles, handler executions and retry
//! timers only ever *send commands* to it; nothing else mutates job state.
//!
//! ## Admission
//!
//! After every command the dispatcher admits jobs from the head of the
//! backlog while fewer than `concurrency` executions are in flight. There is
//! no polling loop: enqueue, completion and retry-timer commands are the only
//! triggers.
//!
//! ## Failure
//!
//! A handler error or panic marks the job `failed`. While attempts remain a
//! one-shot timer re-queues it at the backlog tail after
//! `base_delay * 2^attempts`.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use filepipe_events::{EventBus, InMemoryEventBus, Subscription};

use super::events::{JobEvent, JobEventKind};
use super::handler::JobHandler;
use super::types::{Job, JobId, JobState, RetryPolicy};

/// Job queue configuration.
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Name for logging
    pub name: String,
    /// Maximum simultaneously active handler executions
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            name: "job-queue".to_string(),
            concurrency: 1,
            retry: RetryPolicy::default(),
        }
    }
}

impl JobQueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Job queue error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("invalid job queue input: {0}")]
    Validation(String),
    #[error("job {0} was already submitted")]
    Duplicate(JobId),
    #[error("job queue has shut down")]
    Closed,
}

enum Command {
    Enqueue(Job),
    Get {
        id: JobId,
        reply: oneshot::Sender<Option<Job>>,
    },
    Finished {
        id: JobId,
        outcome: Result<(), String>,
    },
    RetryDue(JobId),
    WaitIdle(oneshot::Sender<()>),
    Close,
}

/// Handle to a running dispatcher. Cheap to clone.
///
/// When the last handle is dropped the dispatcher stops accepting commands
/// but still drives every admitted job to a terminal state before exiting.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    submitted: Mutex<HashSet<JobId>>,
    events: Arc<InMemoryEventBus<JobEvent>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    /// Spawn a dispatcher on the current tokio runtime.
    pub fn spawn<H>(config: JobQueueConfig, handler: H) -> Result<Self, QueueError>
    where
        H: JobHandler + 'static,
    {
        Self::spawn_shared(config, Arc::new(handler))
    }

    /// Spawn a dispatcher around an already shared handler.
    pub fn spawn_shared(
        config: JobQueueConfig,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, QueueError> {
        if config.concurrency == 0 {
            return Err(QueueError::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(InMemoryEventBus::new());

        let dispatcher = Dispatcher {
            name: config.name.clone(),
            handler,
            concurrency: config.concurrency,
            retry: config.retry,
            jobs: HashMap::new(),
            backlog: VecDeque::new(),
            in_flight: 0,
            pending_retries: 0,
            idle_waiters: Vec::new(),
            closing: false,
            events: Arc::clone(&events),
            commands: tx.clone(),
        };
        tokio::spawn(dispatcher.run(rx));

        Ok(Self {
            inner: Arc::new(Inner {
                name: config.name,
                commands: tx,
                submitted: Mutex::new(HashSet::new()),
                events,
            }),
        })
    }

    /// Admit a new job for `payload` and return it without waiting for execution.
    pub fn enqueue(&self, payload: serde_json::Value) -> Result<Job, QueueError> {
        self.submit(Job::new(payload))
    }

    /// Admit a job built with [`Job::new`].
    ///
    /// Lets the caller record the job id elsewhere before the job can start.
    /// Each job id is admitted once; submitting it again (for example a clone
    /// of the same `Job`) returns [`QueueError::Duplicate`].
    pub fn submit(&self, job: Job) -> Result<Job, QueueError> {
        if job.state != JobState::Queued || job.attempts != 0 {
            return Err(QueueError::Validation(format!(
                "job {} must be fresh (state {}, attempts {})",
                job.id,
                job.state.as_str(),
                job.attempts
            )));
        }

        let mut submitted = self
            .inner
            .submitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !submitted.insert(job.id) {
            return Err(QueueError::Duplicate(job.id));
        }
        if self.inner.commands.send(Command::Enqueue(job.clone())).is_err() {
            submitted.remove(&job.id);
            return Err(QueueError::Closed);
        }
        Ok(job)
    }

    /// Current snapshot of a job, or `None` for an unknown id.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Get { id, reply })
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Resolve once the backlog is empty, nothing is in flight and no retry
    /// is pending.
    pub async fn wait_idle(&self) -> Result<(), QueueError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::WaitIdle(reply))
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Subscribe to lifecycle notifications published from now on.
    pub fn subscribe(&self) -> Subscription<JobEvent> {
        self.inner.events.subscribe()
    }
}

struct Dispatcher {
    name: String,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    retry: RetryPolicy,
    jobs: HashMap<JobId, Job>,
    backlog: VecDeque<JobId>,
    in_flight: usize,
    pending_retries: usize,
    idle_waiters: Vec<oneshot::Sender<()>>,
    closing: bool,
    events: Arc<InMemoryEventBus<JobEvent>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Dispatcher {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(queue = %self.name, concurrency = self.concurrency, "job queue started");

        while let Some(command) = commands.recv().await {
            match command {
                Command::Enqueue(job) => self.admit(job),
                Command::Get { id, reply } => {
                    let _ = reply.send(self.jobs.get(&id).cloned());
                }
                Command::Finished { id, outcome } => self.finish(id, outcome),
                Command::RetryDue(id) => self.requeue(id),
                Command::WaitIdle(reply) => self.idle_waiters.push(reply),
                Command::Close => self.closing = true,
            }

            self.dispatch();

            if self.is_idle() {
                for waiter in self.idle_waiters.drain(..) {
                    let _ = waiter.send(());
                }
                if self.closing {
                    break;
                }
            }
        }

        info!(queue = %self.name, jobs = self.jobs.len(), "job queue stopped");
    }

    fn is_idle(&self) -> bool {
        self.backlog.is_empty() && self.in_flight == 0 && self.pending_retries == 0
    }

    fn admit(&mut self, job: Job) {
        let id = job.id;
        self.jobs.insert(id, job.clone());
        self.backlog.push_back(id);
        self.publish(JobEventKind::Queued, job);
    }

    fn dispatch(&mut self) {
        while self.in_flight < self.concurrency {
            let Some(id) = self.backlog.pop_front() else {
                break;
            };
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };

            job.mark_active();
            let snapshot = job.clone();
            self.in_flight += 1;
            debug!(
                queue = %self.name,
                job_id = %id,
                attempt = snapshot.attempts,
                "dispatching job"
            );
            self.publish(JobEventKind::Started, snapshot.clone());

            let handler = Arc::clone(&self.handler);
            let commands = self.commands.clone();
            tokio::spawn(async move {
                let outcome = match AssertUnwindSafe(handler.handle(snapshot))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(panic) => Err(format!("handler panicked: {}", panic_message(&*panic))),
                };
                let _ = commands.send(Command::Finished { id, outcome });
            });
        }
    }

    fn finish(&mut self, id: JobId, outcome: Result<(), String>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };

        match outcome {
            Ok(()) => {
                job.mark_succeeded();
                let snapshot = job.clone();
                debug!(queue = %self.name, job_id = %id, "job completed successfully");
                self.publish(JobEventKind::Succeeded, snapshot);
            }
            Err(error) => {
                job.mark_failed(error);
                let snapshot = job.clone();
                let attempts = snapshot.attempts;
                let exhausted = snapshot.is_terminal(&self.retry);
                self.publish(JobEventKind::Failed, snapshot);

                if exhausted {
                    warn!(queue = %self.name, job_id = %id, attempts, "job exhausted its attempts");
                } else {
                    self.schedule_retry(id, attempts);
                }
            }
        }
    }

    fn schedule_retry(&mut self, id: JobId, attempts: u32) {
        let delay = self.retry.delay_for_attempt(attempts);
        self.pending_retries += 1;
        debug!(
            queue = %self.name,
            job_id = %id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );

        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::RetryDue(id));
        });
    }

    fn requeue(&mut self, id: JobId) {
        self.pending_retries = self.pending_retries.saturating_sub(1);
        if let Some(job) = self.jobs.get_mut(&id) {
            job.requeue();
            self.backlog.push_back(id);
        }
    }

    fn publish(&self, kind: JobEventKind, job: Job) {
        if let Err(err) = self.events.publish(JobEvent::new(kind, job)) {
            warn!(queue = %self.name, error = ?err, "failed to publish job event");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::jobs::handler::handler_fn;

    fn kinds(events: &[JobEvent]) -> Vec<JobEventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn single_job_succeeds_once() {
        let queue = JobQueue::spawn(
            JobQueueConfig::default().with_concurrency(1),
            handler_fn(|_job| async { Ok(()) }),
        )
        .unwrap();
        let mut sub = queue.subscribe();

        let job = queue.enqueue(serde_json::json!({"fileId": "f1"})).unwrap();
        assert_eq!(job.state, JobState::Queued);
        queue.wait_idle().await.unwrap();

        let job = queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempts, 1);
        assert!(job.finished_at.unwrap() >= job.started_at.unwrap());
        assert!(job.error.is_none());

        let events = sub.drain();
        assert_eq!(
            kinds(&events),
            vec![JobEventKind::Queued, JobEventKind::Started, JobEventKind::Succeeded]
        );
        assert_eq!(events[2].job.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn unknown_job_is_absent() {
        let queue = JobQueue::spawn(
            JobQueueConfig::default(),
            handler_fn(|_job| async { Ok(()) }),
        )
        .unwrap();

        assert!(queue.get_job(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let err = JobQueue::spawn(
            JobQueueConfig::default().with_concurrency(0),
            handler_fn(|_job| async { Ok(()) }),
        )
        .unwrap_err();

        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[tokio::test]
    async fn submit_rejects_a_job_that_already_ran() {
        let queue = JobQueue::spawn(
            JobQueueConfig::default(),
            handler_fn(|_job| async { Ok(()) }),
        )
        .unwrap();

        let mut job = Job::new(serde_json::json!({}));
        job.mark_active();
        assert!(matches!(queue.submit(job), Err(QueueError::Validation(_))));
    }

    #[tokio::test]
    async fn same_job_submitted_twice_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let queue = JobQueue::spawn(
            JobQueueConfig::default(),
            handler_fn(move |_job| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        let job = Job::new(serde_json::json!({"fileId": "f1"}));
        queue.submit(job.clone()).unwrap();
        let err = queue.submit(job.clone()).unwrap_err();
        assert_eq!(err, QueueError::Duplicate(job.id));

        queue.wait_idle().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.get_job(job.id).await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn active_executions_never_exceed_concurrency() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handler = {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handler_fn(move |_job| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let queue =
            JobQueue::spawn(JobQueueConfig::default().with_concurrency(2), handler).unwrap();
        let ids: Vec<_> = (0..10)
            .map(|i| queue.enqueue(serde_json::json!({ "n": i })).unwrap().id)
            .collect();
        queue.wait_idle().await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        for id in ids {
            let job = queue.get_job(id).await.unwrap().unwrap();
            assert_eq!(job.state, JobState::Succeeded);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_backs_off_and_stops_after_three_attempts() {
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let starts = Arc::clone(&starts);
            handler_fn(move |_job| {
                starts.lock().unwrap().push(Instant::now());
                async { Err(anyhow::anyhow!("disk on fire")) }
            })
        };

        let queue = JobQueue::spawn(
            JobQueueConfig::default()
                .with_retry_policy(RetryPolicy::new(Duration::from_secs(1))),
            handler,
        )
        .unwrap();
        let mut sub = queue.subscribe();

        let job = queue.enqueue(serde_json::json!({"fileId": "f1"})).unwrap();
        queue.wait_idle().await.unwrap();

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3, "never dispatched a fourth time");
        let first_gap = starts[1] - starts[0];
        let second_gap = starts[2] - starts[1];
        assert!(first_gap >= Duration::from_secs(2) && first_gap < Duration::from_secs(3));
        assert!(second_gap >= Duration::from_secs(4) && second_gap < Duration::from_secs(5));

        let job = queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.error.as_deref(), Some("disk on fire"));

        let events = sub.drain();
        assert_eq!(
            kinds(&events),
            vec![
                JobEventKind::Queued,
                JobEventKind::Started,
                JobEventKind::Failed,
                JobEventKind::Started,
                JobEventKind::Failed,
                JobEventKind::Started,
                JobEventKind::Failed,
            ]
        );
        let attempts: Vec<u32> = events
            .iter()
            .filter(|e| e.kind == JobEventKind::Started)
            .map(|e| e.job.attempts)
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);

        // Nothing else is scheduled once the budget is spent.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(sub.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retried_job_rejoins_at_the_tail() {
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let order = Arc::clone(&order);
            handler_fn(move |job: Job| {
                let name = job.payload["name"].as_str().unwrap_or_default().to_string();
                order.lock().unwrap().push(name.clone());
                let fail = name == "a" && job.attempts == 1;
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    if fail {
                        anyhow::bail!("transient");
                    }
                    Ok(())
                }
            })
        };

        let queue = JobQueue::spawn(
            JobQueueConfig::default()
                .with_concurrency(1)
                .with_retry_policy(RetryPolicy::new(Duration::from_millis(5))),
            handler,
        )
        .unwrap();

        let a = queue.enqueue(serde_json::json!({"name": "a"})).unwrap();
        queue.enqueue(serde_json::json!({"name": "b"})).unwrap();
        queue.enqueue(serde_json::json!({"name": "c"})).unwrap();
        queue.wait_idle().await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c", "a"]);
        let a = queue.get_job(a.id).await.unwrap().unwrap();
        assert_eq!(a.state, JobState::Succeeded);
        assert_eq!(a.attempts, 2);
        assert!(a.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_is_a_failed_attempt() {
        let handler = handler_fn(|job: Job| async move {
            if job.payload["explode"].as_bool().unwrap_or(false) {
                panic!("kaboom");
            }
            Ok(())
        });
        let queue = JobQueue::spawn(
            JobQueueConfig::default()
                .with_retry_policy(RetryPolicy::new(Duration::from_millis(1))),
            handler,
        )
        .unwrap();

        let bad = queue.enqueue(serde_json::json!({"explode": true})).unwrap();
        let good = queue.enqueue(serde_json::json!({"explode": false})).unwrap();
        queue.wait_idle().await.unwrap();

        let bad = queue.get_job(bad.id).await.unwrap().unwrap();
        assert_eq!(bad.state, JobState::Failed);
        assert_eq!(bad.attempts, 3);
        assert_eq!(bad.error.as_deref(), Some("handler panicked: kaboom"));

        let good = queue.get_job(good.id).await.unwrap().unwrap();
        assert_eq!(good.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn dropping_the_handle_lets_admitted_work_finish() {
        let queue = JobQueue::spawn(
            JobQueueConfig::default(),
            handler_fn(|_job| async {
                tokio::task::yield_now().await;
                Ok(())
            }),
        )
        .unwrap();
        let mut sub = queue.subscribe();
        queue.enqueue(serde_json::json!({})).unwrap();
        drop(queue);

        let mut seen = Vec::new();
        while let Some(event) = sub.recv().await {
            seen.push(event.kind);
        }
        assert_eq!(
            seen,
            vec![JobEventKind::Queued, JobEventKind::Started, JobEventKind::Succeeded]
        );
    }
}
