//! Durable queue engine backed by a Redis-compatible key-value store.
//!
//! Each logical queue (spec 4.1) keeps four sorted sets / lists under a
//! `bull:{queue}` prefix, matching the external key layout in spec 6:
//! `pending` (scored by `nextVisibleAt`), `active` (scored by lease
//! expiry), `delayed` (scored by `nextVisibleAt`), and bounded
//! `completed`/`failed` retention lists.

use crate::error::{QueueError, QueueResult};
use crate::job::{Backoff, EnqueueOptions, Job, JobId, JobState, QueueName};
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a [`Queue::fail`] or [`Queue::discard`] call, telling the
/// caller whether the job is now terminal (so it can raise a
/// `jobFailed` notification) or was merely rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Rescheduled,
    Terminal,
}

/// How many terminal job records to retain per queue (spec 9, open
/// question 3): `None`/`Some(0)` retains none, `Some(n)` retains the
/// last `n` completed and the last `n` failed records.
#[derive(Debug, Clone, Copy)]
pub struct QueueKeep(pub Option<u64>);

impl QueueKeep {
    pub fn none() -> Self {
        QueueKeep(Some(0))
    }

    pub fn default_keep() -> Self {
        QueueKeep(Some(1000))
    }

    fn trim_len(&self) -> i64 {
        match self.0 {
            None => 0,
            Some(n) => n as i64,
        }
    }
}

impl Default for QueueKeep {
    fn default() -> Self {
        Self::default_keep()
    }
}

/// Queue engine configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    pub key_prefix: String,
    pub queue_keep: Option<u64>,
}

impl QueueConfig {
    pub fn new(redis_url: impl Into<String>, queue: QueueName) -> Self {
        Self {
            redis_url: redis_url.into(),
            key_prefix: format!("bull:{}", queue.as_str()),
            queue_keep: Some(1000),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_queue_keep(mut self, keep: Option<u64>) -> Self {
        self.queue_keep = keep;
        self
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }
}

/// Durable, at-least-once job queue for one logical queue name.
#[derive(Clone)]
pub struct Queue {
    connection: ConnectionManager,
    config: QueueConfig,
    queue_name: QueueName,
}

impl Queue {
    pub async fn new(redis_url: impl Into<String>, queue_name: QueueName) -> QueueResult<Self> {
        Self::with_config(QueueConfig::new(redis_url, queue_name), queue_name).await
    }

    pub async fn with_config(config: QueueConfig, queue_name: QueueName) -> QueueResult<Self> {
        info!(queue = %queue_name, prefix = %config.key_prefix, "initializing queue");
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::Config(e.to_string()))?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            config,
            queue_name,
        })
    }

    /// `enqueue(queue, payload, opts) → jobId`. Durable write before
    /// returning (spec 4.1).
    pub async fn enqueue(
        &self,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> QueueResult<JobId> {
        let job = Job::new(self.queue_name, payload, &opts);
        self.enqueue_job(job).await
    }

    /// Enqueue a fully-constructed job (used for internal retries).
    pub async fn enqueue_job(&self, job: Job) -> QueueResult<JobId> {
        let job_id = job.id;
        self.save_job(&job).await?;

        let mut conn = self.connection.clone();
        let ready = job.next_visible_at <= Utc::now();
        if ready {
            let score = job.next_visible_at.timestamp_millis() - job.priority;
            let _: () = conn
                .zadd(self.config.key("pending"), job_id.to_string(), score)
                .await?;
        } else {
            let _: () = conn
                .zadd(
                    self.config.key("delayed"),
                    job_id.to_string(),
                    job.next_visible_at.timestamp_millis(),
                )
                .await?;
        }

        debug!(job = %job_id, ready, "enqueued job");
        Ok(job_id)
    }

    /// `reserve(queue, workerId, leaseMs) → job|none`. Atomically moves
    /// the earliest visible pending job into `active` with a lease.
    pub async fn reserve(&self, worker_id: &str, lease: Duration) -> QueueResult<Option<Job>> {
        self.promote_delayed().await?;
        self.reclaim_expired_leases().await?;

        let mut conn = self.connection.clone();
        let now = Utc::now().timestamp_millis();

        let script = redis::Script::new(
            r#"
            local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
            if #ids == 0 then
                return nil
            end
            local id = ids[1]
            redis.call('ZREM', KEYS[1], id)
            redis.call('ZADD', KEYS[2], ARGV[2], id)
            return id
            "#,
        );

        let lease_expires_at = Utc::now() + chrono::Duration::from_std(lease).unwrap_or_default();
        let popped: Option<String> = script
            .key(self.config.key("pending"))
            .key(self.config.key("active"))
            .arg(now)
            .arg(lease_expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        let Some(job_id_str) = popped else {
            return Ok(None);
        };
        let job_id: JobId = job_id_str
            .parse()
            .map_err(|_| QueueError::Deserialization(format!("bad job id: {job_id_str}")))?;

        let Some(mut job) = self.get_job(job_id).await? else {
            warn!(job = %job_id, "reserved job had no stored record, dropping");
            return Ok(None);
        };

        let lease_id = Uuid::new_v4();
        job.status = JobState::Active;
        job.attempts_made += 1;
        job.lease_id = Some(lease_id);
        job.lease_expires_at = Some(lease_expires_at);
        self.save_job(&job).await?;

        debug!(job = %job_id, worker = worker_id, %lease_id, "reserved job");
        Ok(Some(job))
    }

    /// `ack(jobId, progress)`: marks completed, retains per
    /// `queueKeep`, and drops the full payload from storage.
    pub async fn ack(&self, job_id: JobId, progress: Option<serde_json::Value>) -> QueueResult<()> {
        let Some(mut job) = self.get_job(job_id).await? else {
            return Err(QueueError::JobNotFound(job_id.to_string()));
        };

        job.status = JobState::Completed;
        job.progress = progress;
        job.finished_at = Some(Utc::now());
        job.lease_id = None;
        job.lease_expires_at = None;

        let mut conn = self.connection.clone();
        let _: () = conn.zrem(self.config.key("active"), job_id.to_string()).await?;
        let _: () = conn.del(self.config.key(&format!("job:{job_id}"))).await?;
        self.retain(&job, "completed").await?;
        Ok(())
    }

    /// `fail(jobId, error, {retry})`. Reschedules with exponential
    /// backoff when eligible, otherwise terminal-fails and returns
    /// [`FailOutcome::Terminal`] so the caller can raise `jobFailed`.
    pub async fn fail(
        &self,
        job_id: JobId,
        error: impl Into<String>,
        retry: bool,
    ) -> QueueResult<FailOutcome> {
        let error = error.into();
        let Some(mut job) = self.get_job(job_id).await? else {
            return Err(QueueError::JobNotFound(job_id.to_string()));
        };

        let mut conn = self.connection.clone();
        let _: () = conn.zrem(self.config.key("active"), job_id.to_string()).await?;

        job.last_error = Some(error);
        job.lease_id = None;
        job.lease_expires_at = None;

        if retry && job.can_retry() {
            // `attempts_made` was already incremented by `reserve()` for
            // the attempt that just failed, so the *n*th failure must use
            // exponent n-1 (spec 4.1: base·2^0 on the first failure).
            let delay = job.backoff.delay_for(job.attempts_made.saturating_sub(1));
            let next_visible_at = Utc::now() + delay;
            job.status = JobState::Pending;
            job.next_visible_at = next_visible_at;
            self.save_job(&job).await?;
            let _: () = conn
                .zadd(
                    self.config.key("delayed"),
                    job_id.to_string(),
                    next_visible_at.timestamp_millis(),
                )
                .await?;
            debug!(job = %job_id, delay_ms = delay.num_milliseconds(), "job rescheduled");
            Ok(FailOutcome::Rescheduled)
        } else {
            job.status = JobState::Failed;
            job.finished_at = Some(Utc::now());
            self.retain(&job, "failed").await?;
            let _: () = conn.del(self.config.key(&format!("job:{job_id}"))).await?;
            warn!(job = %job_id, "job terminally failed");
            Ok(FailOutcome::Terminal)
        }
    }

    /// `discard(jobId)`: terminal-fails without further retry
    /// regardless of attempts left (spec 4.1, used after permanent
    /// errors).
    pub async fn discard(&self, job_id: JobId, error: impl Into<String>) -> QueueResult<()> {
        let Some(mut job) = self.get_job(job_id).await? else {
            return Err(QueueError::JobNotFound(job_id.to_string()));
        };
        job.max_attempts = job.attempts_made;
        self.save_job(&job).await?;
        self.fail(job_id, error, false).await?;
        Ok(())
    }

    /// Moves jobs whose `nextVisibleAt ≤ now` from `delayed` into
    /// `pending`. Intended to run roughly once a second (spec 4.1).
    pub async fn promote_delayed(&self) -> QueueResult<u32> {
        let mut conn = self.connection.clone();
        let now = Utc::now().timestamp_millis();
        let delayed_key = self.config.key("delayed");

        let ids: Vec<String> = conn.zrangebyscore(&delayed_key, "-inf", now).await?;
        let mut promoted = 0;
        for id_str in ids {
            let Ok(job_id) = id_str.parse::<JobId>() else {
                continue;
            };
            let Some(job) = self.get_job(job_id).await? else {
                let _: () = conn.zrem(&delayed_key, &id_str).await?;
                continue;
            };
            let _: () = conn.zrem(&delayed_key, &id_str).await?;
            let score = job.next_visible_at.timestamp_millis() - job.priority;
            let _: () = conn.zadd(self.config.key("pending"), &id_str, score).await?;
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Returns jobs whose lease has expired back to `pending` (spec
    /// 4.1: "if the lease expires without ack or fail, the job returns
    /// to pending").
    pub async fn reclaim_expired_leases(&self) -> QueueResult<u32> {
        let mut conn = self.connection.clone();
        let now = Utc::now().timestamp_millis();
        let active_key = self.config.key("active");

        let ids: Vec<String> = conn.zrangebyscore(&active_key, "-inf", now).await?;
        let mut reclaimed = 0;
        for id_str in ids {
            let Ok(job_id) = id_str.parse::<JobId>() else {
                continue;
            };
            let _: () = conn.zrem(&active_key, &id_str).await?;
            if let Some(mut job) = self.get_job(job_id).await? {
                job.status = JobState::Pending;
                job.lease_id = None;
                job.lease_expires_at = None;
                job.next_visible_at = Utc::now();
                self.save_job(&job).await?;
                let score = job.next_visible_at.timestamp_millis() - job.priority;
                let _: () = conn.zadd(self.config.key("pending"), &id_str, score).await?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    pub async fn get_job(&self, job_id: JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn.get(self.config.key(&format!("job:{job_id}"))).await?;
        match json {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).map_err(|e| QueueError::Deserialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn save_job(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(job).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let _: () = conn.set(self.config.key(&format!("job:{}", job.id)), json).await?;
        Ok(())
    }

    async fn retain(&self, job: &Job, list: &str) -> QueueResult<()> {
        let keep = self.config.queue_keep.unwrap_or(0);
        let mut conn = self.connection.clone();
        let key = self.config.key(list);
        if keep == 0 {
            return Ok(());
        }
        let record = serde_json::json!({
            "id": job.id,
            "finishedAt": job.finished_at,
            "lastError": job.last_error,
        });
        let _: () = conn.lpush(&key, record.to_string()).await?;
        let _: () = conn.ltrim(&key, 0, keep as isize - 1).await?;
        Ok(())
    }

    pub async fn pending_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection.clone();
        Ok(conn.zcard(self.config.key("pending")).await?)
    }

    pub async fn active_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection.clone();
        Ok(conn.zcard(self.config.key("active")).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_key_prefix_follows_bull_layout() {
        let config = QueueConfig::new("redis://localhost:6379", QueueName::Submit);
        assert_eq!(config.key_prefix, "bull:submit");
        assert_eq!(config.key("pending"), "bull:submit:pending");
    }

    #[test]
    fn custom_prefix_overrides_default() {
        let config =
            QueueConfig::new("redis://localhost:6379", QueueName::Notify).with_key_prefix("test:notify");
        assert_eq!(config.key("active"), "test:notify:active");
    }

    #[test]
    fn queue_keep_zero_means_retain_none() {
        assert_eq!(QueueKeep::none().trim_len(), 0);
        assert_eq!(QueueKeep::default_keep().trim_len(), 1000);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn enqueue_reserve_ack_round_trip() {
        let queue = Queue::new("redis://localhost:6379", QueueName::Submit)
            .await
            .unwrap();
        let job_id = queue
            .enqueue(serde_json::json!({"account": "a1"}), EnqueueOptions::default())
            .await
            .unwrap();
        let reserved = queue
            .reserve("worker-1", Duration::from_secs(30))
            .await
            .unwrap()
            .expect("job should be visible");
        assert_eq!(reserved.id, job_id);
        queue.ack(job_id, None).await.unwrap();
        assert!(queue.get_job(job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn failed_job_reschedules_with_backoff() {
        let queue = Queue::new("redis://localhost:6379", QueueName::Notify)
            .await
            .unwrap();
        let opts = EnqueueOptions {
            max_attempts: 3,
            backoff: Backoff::new(100),
            ..Default::default()
        };
        let job_id = queue
            .enqueue(serde_json::json!({}), opts)
            .await
            .unwrap();
        queue
            .reserve("worker-1", Duration::from_secs(30))
            .await
            .unwrap();
        let outcome = queue.fail(job_id, "boom", true).await.unwrap();
        assert_eq!(outcome, FailOutcome::Rescheduled);
    }
}
