//! Job definition and state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job unique identifier.
pub type JobId = Uuid;

/// Opaque job payload.
pub type JobPayload = serde_json::Value;

/// The two logical queues this engine drives (spec 4: C2 "Drives
/// submission and notification").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Submit,
    Notify,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Submit => "submit",
            QueueName::Notify => "notify",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
}

/// Exponential backoff parameters (spec 3: `backoff {type: exponential, baseDelayMs}`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Backoff {
    pub base_delay_ms: u64,
}

impl Backoff {
    pub fn new(base_delay_ms: u64) -> Self {
        Self { base_delay_ms }
    }

    /// `delay = baseDelayMs · 2^attemptsMade` (spec 4.1, `fail`).
    pub fn delay_for(&self, attempts_made: u32) -> chrono::Duration {
        let millis = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempts_made).unwrap_or(u64::MAX));
        chrono::Duration::milliseconds(millis.min(i64::MAX as u64) as i64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base_delay_ms: 1000 }
    }
}

/// Options accepted by [`crate::Queue::enqueue`] (spec 4.1).
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub delay_ms: u64,
    pub priority: i64,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            delay_ms: 0,
            priority: 0,
        }
    }
}

/// A durable job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub payload: JobPayload,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub priority: i64,
    pub next_visible_at: DateTime<Utc>,
    pub status: JobState,
    pub progress: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lease_id: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(queue: QueueName, payload: JobPayload, opts: &EnqueueOptions) -> Self {
        let now = Utc::now();
        let next_visible_at = now + chrono::Duration::milliseconds(opts.delay_ms as i64);
        Self {
            id: Uuid::new_v4(),
            queue,
            payload,
            attempts_made: 0,
            max_attempts: opts.max_attempts,
            backoff: opts.backoff,
            priority: opts.priority,
            next_visible_at,
            status: JobState::Pending,
            progress: None,
            last_error: None,
            created_at: now,
            finished_at: None,
            lease_id: None,
            lease_expires_at: None,
        }
    }

    /// I3: `attemptsMade ≤ maxAttempts`; when equal and failed, the job is terminal.
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobState::Completed | JobState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_spec_formula() {
        let backoff = Backoff::new(100);
        assert_eq!(backoff.delay_for(0), chrono::Duration::milliseconds(100));
        assert_eq!(backoff.delay_for(1), chrono::Duration::milliseconds(200));
        assert_eq!(backoff.delay_for(2), chrono::Duration::milliseconds(400));
    }

    #[test]
    fn zero_base_delay_means_immediate_retry() {
        let backoff = Backoff::new(0);
        assert_eq!(backoff.delay_for(5), chrono::Duration::milliseconds(0));
    }

    #[test]
    fn new_job_is_pending_and_untouched() {
        let opts = EnqueueOptions::default();
        let job = Job::new(QueueName::Submit, serde_json::json!({"a": 1}), &opts);
        assert_eq!(job.status, JobState::Pending);
        assert_eq!(job.attempts_made, 0);
        assert!(job.can_retry());
        assert!(!job.is_terminal());
    }

    #[test]
    fn max_attempts_one_means_never_retried_after_first_failure() {
        let mut opts = EnqueueOptions::default();
        opts.max_attempts = 1;
        let mut job = Job::new(QueueName::Notify, serde_json::json!({}), &opts);
        job.attempts_made = 1;
        assert!(!job.can_retry());
    }

    #[test]
    fn queue_name_round_trips_through_json() {
        let value = serde_json::to_value(QueueName::Submit).unwrap();
        assert_eq!(value, serde_json::json!("submit"));
        let back: QueueName = serde_json::from_value(value).unwrap();
        assert_eq!(back, QueueName::Submit);
    }
}
