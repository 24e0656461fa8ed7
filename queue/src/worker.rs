//! Polling harness shared by the submission and notification workers
//! (spec 4.5, 4.6). Grounded on the teacher's handler-registry worker,
//! adapted to `reserve`/`ack`/`fail` semantics and an explicit result
//! variant instead of throwing (spec 9, "Exceptions-as-control-flow").

use crate::error::QueueResult;
use crate::job::Job;
use crate::queue::Queue;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of handling one reserved job. The queue engine acts on the
/// variant rather than catching a thrown value.
pub enum JobOutcome {
    /// Terminal success; optional progress payload is stored with the job.
    Ack(Option<serde_json::Value>),
    /// Transient failure; queue applies its retry/backoff policy.
    Retry(String),
    /// Permanent failure; no further retries regardless of attempts left.
    Discard(String),
}

type Handler =
    Arc<dyn Fn(Job) -> Pin<Box<dyn Future<Output = JobOutcome> + Send>> + Send + Sync>;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(250),
            lease: Duration::from_secs(30),
        }
    }
}

/// Polls a [`Queue`] and dispatches reserved jobs to a single handler.
pub struct Worker {
    id: String,
    queue: Queue,
    handler: Handler,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    pub fn new<F, Fut>(id: impl Into<String>, queue: Queue, handler: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        Self::with_config(id, queue, WorkerConfig::default(), handler)
    }

    pub fn with_config<F, Fut>(
        id: impl Into<String>,
        queue: Queue,
        config: WorkerConfig,
        handler: F,
    ) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        let wrapped: Handler = Arc::new(move |job| Box::pin(handler(job)));
        Self {
            id: id.into(),
            queue,
            handler: wrapped,
            config,
            running: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    pub async fn start(&mut self) -> QueueResult<()> {
        self.running.store(true, Ordering::SeqCst);
        info!(worker = %self.id, concurrency = self.config.concurrency, "starting worker pool");

        for shard in 0..self.config.concurrency {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let running = self.running.clone();
            let worker_id = format!("{}-{}", self.id, shard);
            let poll_interval = self.config.poll_interval;
            let lease = self.config.lease;

            let handle = tokio::spawn(async move {
                while running.load(Ordering::Relaxed) {
                    match queue.reserve(&worker_id, lease).await {
                        Ok(Some(job)) => {
                            let job_id = job.id;
                            debug!(worker = %worker_id, job = %job_id, "reserved job");
                            let outcome = handler(job).await;
                            let result = match outcome {
                                JobOutcome::Ack(progress) => queue.ack(job_id, progress).await.map(|_| ()),
                                JobOutcome::Retry(err) => {
                                    queue.fail(job_id, err, true).await.map(|_| ())
                                }
                                JobOutcome::Discard(err) => queue.discard(job_id, err).await,
                            };
                            if let Err(e) = result {
                                error!(worker = %worker_id, job = %job_id, error = %e, "failed to finalize job");
                            }
                        }
                        Ok(None) => {
                            tokio::time::sleep(poll_interval).await;
                        }
                        Err(e) => {
                            warn!(worker = %worker_id, error = %e, "reserve failed");
                            tokio::time::sleep(poll_interval).await;
                        }
                    }
                }
                debug!(worker = %worker_id, "stopped");
            });
            self.handles.push(handle);
        }

        Ok(())
    }

    /// Cooperative shutdown: workers finish their in-flight job, then exit.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.lease, Duration::from_secs(30));
    }
}
