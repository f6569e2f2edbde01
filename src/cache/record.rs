use serde::{Deserialize, Serialize};

use crate::models::SubjectKind;

/// Persisted mirror of a registered subject's last acknowledged duration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub remote_id: String,
    /// Epoch milliseconds of the sync this record mirrors.
    pub last_update_time: i64,
    /// Seconds.
    pub duration: f64,
}

impl CacheRecord {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.last_update_time)
    }

    pub fn is_fresh(&self, now_ms: i64, freshness_ms: u64) -> bool {
        let age = self.age_ms(now_ms);
        age >= 0 && (age as u64) <= freshness_ms
    }
}

pub fn cache_key(prefix: &str, kind: SubjectKind, subject_id: &str) -> String {
    format!("{prefix}_{}_{subject_id}", kind.as_str())
}
