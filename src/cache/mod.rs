//! Session-resumable snapshots of subject accrual.
//!
//! A record is written only after the backend acknowledged a duration, so a
//! resumed subject never reports more than the backend already has. Records
//! older than the freshness window are never resumed, not even partially.

pub mod record;
pub mod store;

use std::{fmt, sync::Arc};

pub use record::{cache_key, CacheRecord};
pub use store::{MemoryStore, SessionStore};

use crate::{
    clock::Clock,
    error::{TrackerError, TrackerResult},
    models::{Subject, SubjectKind},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Clone)]
pub struct ResumableCache {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
    freshness_ms: u64,
}

impl fmt::Debug for ResumableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumableCache")
            .field("prefix", &self.prefix)
            .field("freshness_ms", &self.freshness_ms)
            .finish_non_exhaustive()
    }
}

impl ResumableCache {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        prefix: impl Into<String>,
        freshness_ms: u64,
    ) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
            freshness_ms,
        }
    }

    /// Mirrors an acknowledged duration. Storage failures are logged and
    /// swallowed; the next successful sync writes again.
    pub fn save(&self, subject: &Subject, duration_secs: f64) -> TrackerResult<()> {
        let remote_id = subject
            .remote_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TrackerError::invalid("remote_id", "subject is not registered"))?;

        let key = cache_key(&self.prefix, subject.kind, &subject.subject_id);
        let record = CacheRecord {
            remote_id,
            last_update_time: self.clock.now_ms(),
            duration: duration_secs.max(0.0),
        };

        match serde_json::to_string(&record) {
            Ok(serialized) => {
                if let Err(err) = self.store.set(&key, &serialized) {
                    log_warn!("failed to persist cache entry {key}: {err:#}");
                } else {
                    log_debug!("cached {key} at {:.1}s", record.duration);
                }
            }
            Err(err) => log_warn!("failed to serialize cache entry {key}: {err}"),
        }
        Ok(())
    }

    /// Fresh record for the subject, or `None` when absent, stale or corrupt.
    pub fn load(&self, kind: SubjectKind, subject_id: &str) -> Option<CacheRecord> {
        let key = cache_key(&self.prefix, kind, subject_id);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                log_warn!("failed to read cache entry {key}: {err:#}");
                return None;
            }
        };

        let record = match parse_record(&key, &raw) {
            Ok(record) => record,
            Err(err) => {
                log_warn!("{err}; discarding");
                self.remove_key(&key);
                return None;
            }
        };

        let now = self.clock.now_ms();
        if !record.is_fresh(now, self.freshness_ms) {
            log_debug!(
                "cache entry {key} is stale ({}ms old); ignoring",
                record.age_ms(now)
            );
            return None;
        }
        Some(record)
    }

    pub fn clear(&self, kind: SubjectKind, subject_id: &str) {
        let key = cache_key(&self.prefix, kind, subject_id);
        self.remove_key(&key);
    }

    fn remove_key(&self, key: &str) {
        if let Err(err) = self.store.remove(key) {
            log_warn!("failed to remove cache entry {key}: {err:#}");
        }
    }
}

fn parse_record(key: &str, raw: &str) -> TrackerResult<CacheRecord> {
    let record: CacheRecord =
        serde_json::from_str(raw).map_err(|err| TrackerError::CacheCorrupt {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
    if record.remote_id.is_empty() || !record.duration.is_finite() || record.duration < 0.0 {
        return Err(TrackerError::CacheCorrupt {
            key: key.to_string(),
            reason: "record fields out of range".into(),
        });
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    fn cache() -> (ManualClock, Arc<MemoryStore>, ResumableCache) {
        let clock = ManualClock::new(NOW);
        let store = Arc::new(MemoryStore::new());
        let cache = ResumableCache::new(store.clone(), Arc::new(clock.clone()), "adflux", 300_000);
        (clock, store, cache)
    }

    fn registered(category: &str, remote: &str) -> Subject {
        let mut subject = Subject::page_view(category);
        subject.remote_id = Some(remote.into());
        subject
    }

    #[test]
    fn save_then_load_round_trips_fresh_record() {
        let (clock, _, cache) = cache();
        cache.save(&registered("news", "v1"), 12.3).unwrap();
        clock.advance(60_000);

        let record = cache.load(SubjectKind::PageView, "news").unwrap();
        assert_eq!(record.remote_id, "v1");
        assert_eq!(record.last_update_time, NOW);
        assert!((record.duration - 12.3).abs() < 1e-9);
    }

    #[test]
    fn record_just_past_freshness_window_is_absent() {
        let (_, store, cache) = cache();
        let raw = serde_json::json!({
            "remoteId": "v1",
            "lastUpdateTime": NOW - 301_000,
            "duration": 40.0,
        });
        store
            .set("adflux_pageView_news", &raw.to_string())
            .unwrap();
        assert!(cache.load(SubjectKind::PageView, "news").is_none());
    }

    #[test]
    fn corrupt_entry_is_deleted() {
        let (_, store, cache) = cache();
        store.set("adflux_pageView_news", "{not json").unwrap();
        assert!(cache.load(SubjectKind::PageView, "news").is_none());
        assert!(store.get("adflux_pageView_news").unwrap().is_none());
    }

    #[test]
    fn out_of_range_fields_count_as_corrupt() {
        let (_, store, cache) = cache();
        let raw = serde_json::json!({"remoteId": "", "lastUpdateTime": NOW, "duration": 4.0});
        store.set("adflux_pageView_news", &raw.to_string()).unwrap();
        assert!(cache.load(SubjectKind::PageView, "news").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn save_requires_remote_id() {
        let (_, store, cache) = cache();
        let err = cache.save(&Subject::page_view("news"), 3.0).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidParameters { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn clear_removes_only_that_subject() {
        let (_, store, cache) = cache();
        cache.save(&registered("news", "v1"), 1.0).unwrap();
        cache.save(&registered("sports", "v2"), 2.0).unwrap();
        cache.clear(SubjectKind::PageView, "news");
        assert!(cache.load(SubjectKind::PageView, "news").is_none());
        assert!(cache.load(SubjectKind::PageView, "sports").is_some());
        assert_eq!(store.len(), 1);
    }
}
