pub mod api;
pub mod cache;
pub mod channel;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod frame;
pub mod host;
pub mod identity;
pub mod models;
pub mod scheduler;
pub mod sync;
pub mod timer;
pub mod utils;
pub mod visibility;

#[cfg(test)]
pub(crate) mod testing;

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};

pub use cache::{CacheRecord, MemoryStore, ResumableCache, SessionStore};
pub use channel::{ChannelMessage, CrossFrameChannel, FramePort, Origin};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use context::TrackerContext;
pub use db::SqliteStore;
pub use error::{TrackerError, TrackerResult};
pub use frame::{FrameParams, TrackerFrame};
pub use host::{AdRenderer, AdSlot, AdVariant, HostPage, HostParams, SlotDisplayState, SlotEvent};
pub use models::{Subject, SubjectKind};
pub use scheduler::{CancelHandle, Scheduler, TokioScheduler};
pub use sync::{FinalizeReason, SubjectController, SubjectSnapshot, SyncState};
pub use timer::DurationAccumulator;
pub use visibility::{VisibilityGate, VisibilitySignals};

/// Installs `env_logger` at info level; `RUST_LOG` overrides. Safe to call
/// more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

/// A context backed by the real clock, HTTP backend and a SQLite session
/// store under `data_dir`.
pub struct NativeRuntime {
    pub ctx: Arc<TrackerContext>,
    pub store: Arc<SqliteStore>,
}

impl std::fmt::Debug for NativeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRuntime")
            .field("ctx", &self.ctx)
            .field("store", &self.store)
            .finish()
    }
}

impl NativeRuntime {
    /// Loads `adflux.json` (defaults when absent) with environment
    /// overrides, then opens `adflux.sqlite3` partitioned by `scope`.
    pub fn open(data_dir: &Path, scope: &str) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let config = TrackerConfig::load(&data_dir.join("adflux.json"))?.with_env();
        config.validate()?;

        let store = Arc::new(SqliteStore::open(data_dir.join("adflux.sqlite3"), scope)?);
        log::info!(
            target: utils::logging::LOG_TARGET,
            "AdFlux tracking core starting (api {}, scope {scope})",
            config.api_host
        );

        let ctx = TrackerContext::native(config, store.clone());
        Ok(Self { ctx, store })
    }

    /// Ends the browsing session this runtime's scope stood for: the track
    /// id and every resumable cache entry go away, so the next session
    /// starts fresh. Returns the number of entries removed.
    pub fn end_session(&self) -> Result<usize> {
        let removed = self.store.clear_scope()?;
        log::info!(
            target: utils::logging::LOG_TARGET,
            "session scope {} ended ({removed} entries dropped)",
            self.store.scope()
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn native_runtime_opens_store_and_context() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = NativeRuntime::open(&dir.path().join("data"), "tab-1").unwrap();
        assert_eq!(runtime.store.scope(), "tab-1");
        assert!(runtime.store.path().exists());

        let track_id = identity::resolve_track_id(
            runtime.store.as_ref(),
            &runtime.ctx.config.track_id_key,
        );
        assert_eq!(
            runtime.store.get(&runtime.ctx.config.track_id_key).unwrap(),
            Some(track_id)
        );
    }

    #[tokio::test]
    async fn ending_the_session_forgets_identity_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let runtime = NativeRuntime::open(&data_dir, "tab-1").unwrap();
        let key = runtime.ctx.config.track_id_key.clone();
        let first = identity::resolve_track_id(runtime.store.as_ref(), &key);
        let mut visit = Subject::page_view("news");
        visit.remote_id = Some("v1".into());
        runtime.ctx.cache.save(&visit, 12.0).unwrap();

        let other = NativeRuntime::open(&data_dir, "tab-2").unwrap();
        let other_id = identity::resolve_track_id(other.store.as_ref(), &key);

        assert_eq!(runtime.end_session().unwrap(), 2);
        assert_eq!(runtime.store.get(&key).unwrap(), None);
        assert!(runtime.ctx.cache.load(SubjectKind::PageView, "news").is_none());
        assert_ne!(identity::resolve_track_id(runtime.store.as_ref(), &key), first);
        assert_eq!(other.store.get(&key).unwrap(), Some(other_id));
    }
}
