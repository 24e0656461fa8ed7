//! Durable, at-least-once job queue for the submission and notification
//! pipelines.
//!
//! Provides:
//! - Redis-backed persistence with delayed visibility
//! - Lease-based reservation (a crashed worker's job becomes visible
//!   again once its lease expires)
//! - Exponential backoff retries with bounded dead/failed retention
//! - An explicit `Ack | Retry | Discard` outcome instead of thrown errors
//!
//! # Examples
//!
//! ```no_run
//! use mailengine_queue::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let queue = Queue::new("redis://localhost:6379", QueueName::Notify).await?;
//!
//!     let job_id = queue
//!         .enqueue(serde_json::json!({"event": "messageNew"}), EnqueueOptions::default())
//!         .await?;
//!
//!     let mut worker = Worker::new("notify", queue, |job| async move {
//!         JobOutcome::Ack(None)
//!     });
//!     worker.start().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod job;
pub mod queue;
pub mod worker;

pub use error::{QueueError, QueueResult};
pub use job::{Backoff, EnqueueOptions, Job, JobId, JobPayload, JobState, QueueName};
pub use queue::{FailOutcome, Queue, QueueConfig, QueueKeep};
pub use worker::{JobOutcome, Worker, WorkerConfig};

pub mod prelude {
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::job::{Backoff, EnqueueOptions, Job, JobId, JobPayload, JobState, QueueName};
    pub use crate::queue::{FailOutcome, Queue, QueueConfig, QueueKeep};
    pub use crate::worker::{JobOutcome, Worker, WorkerConfig};
}
