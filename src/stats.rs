//! Metric persistence (spec 4.7: "Metric updates ... also persisted to
//! daily histograms in C1"). The supervisor's in-process counters
//! (`Supervisor::record_metric`) are the live view; this module is the
//! durable one, keyed by `stats:{counter}:{YYYYMMDD}` with a 1-minute
//! resolution subfield and a TTL of retention + 1 day.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use mailengine_kv::KvStore;

const SECS_PER_DAY: u64 = 86_400;

/// Writes metric samples into C1's daily histogram keys.
pub struct StatsRecorder {
    kv: Arc<KvStore>,
    retention: Duration,
}

impl StatsRecorder {
    pub fn new(kv: Arc<KvStore>, retention_days: u64) -> Self {
        Self {
            kv,
            retention: Duration::from_secs(retention_days.saturating_mul(SECS_PER_DAY)),
        }
    }

    fn key_and_field(counter: &str) -> (String, String) {
        let now = Utc::now();
        (
            format!("stats:{counter}:{}", now.format("%Y%m%d")),
            now.format("%H%M").to_string(),
        )
    }

    /// Increments `counter`'s current minute bucket by `value` (spec
    /// 4.7: "counters by status", "histogram of request duration").
    pub async fn record(&self, counter: &str, value: f64) {
        let (key, field) = Self::key_and_field(counter);
        if let Err(e) = self.kv.hincrbyfloat(&key, &field, value).await {
            tracing::warn!(counter, error = %e, "failed to record stat");
            return;
        }
        let ttl = self.retention + Duration::from_secs(SECS_PER_DAY);
        let _ = self.kv.expire(&key, ttl).await;
        let _ = self.kv.sadd("stats:keys", &[key]).await;
    }

    /// Records a count of 1 for `counter` (e.g. `webhook.status.200`).
    pub async fn incr(&self, counter: &str) {
        self.record(counter, 1.0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_matches_spec_4_7() {
        let (key, field) = StatsRecorder::key_and_field("webhook.duration_ms");
        assert!(key.starts_with("stats:webhook.duration_ms:"));
        assert_eq!(key.len(), "stats:webhook.duration_ms:".len() + 8);
        assert_eq!(field.len(), 4);
    }
}
