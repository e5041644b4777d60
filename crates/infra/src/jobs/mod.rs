//! In-process job dispatcher with bounded concurrency, retry and backoff.
//!
//! ## Design
//!
//! - Jobs carry an opaque JSON payload and their own attempt/state lifecycle
//! - One owner task mutates the job table and FIFO backlog; everyone else sends commands
//! - At most `concurrency` handler executions are active at once
//! - Failed attempts are re-queued at the tail after `base * 2^attempts`, up to 3 attempts
//! - Lifecycle notifications (`queued`, `started`, `succeeded`, `failed`) go out on a bus
//!
//! ## Components
//!
//! - `Job`: job record and state transitions
//! - `RetryPolicy`: backoff schedule and attempt budget
//! - `JobHandler`: the work run for each dispatched job
//! - `JobQueue`: handle to the dispatcher task
//! - `JobEvent`: lifecycle notification

pub mod events;
pub mod handler;
pub mod queue;
pub mod types;

pub use events::{JobEvent, JobEventKind, spawn_lifecycle_logger};
pub use handler::{HandlerFn, JobHandler, handler_fn};
pub use queue::{JobQueue, JobQueueConfig, QueueError};
pub use types::{Job, JobId, JobState, MAX_ATTEMPTS, RetryPolicy};
