use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    api::{HttpApi, TrackingApi},
    cache::{ResumableCache, SessionStore},
    clock::{Clock, SystemClock},
    config::TrackerConfig,
    error::{TrackerError, TrackerResult},
    scheduler::{Scheduler, TokioScheduler},
};

/// Everything one browsing context (the host page or the tracker frame)
/// shares between its subjects. Built once and passed around explicitly.
pub struct TrackerContext {
    pub config: TrackerConfig,
    pub clock: Arc<dyn Clock>,
    pub api: Arc<dyn TrackingApi>,
    pub cache: ResumableCache,
    pub scheduler: Arc<dyn Scheduler>,
    installed: AtomicBool,
}

impl std::fmt::Debug for TrackerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerContext")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("installed", &self.installed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl TrackerContext {
    pub fn new(
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
        api: Arc<dyn TrackingApi>,
        store: Arc<dyn SessionStore>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let cache = ResumableCache::new(
            store,
            clock.clone(),
            config.cache_prefix.clone(),
            config.freshness_ms,
        );
        Arc::new(Self {
            config,
            clock,
            api,
            cache,
            scheduler,
            installed: AtomicBool::new(false),
        })
    }

    /// System clock, HTTP backend at `config.api_host`, tokio timers.
    pub fn native(config: TrackerConfig, store: Arc<dyn SessionStore>) -> Arc<Self> {
        let api = Arc::new(HttpApi::new(config.api_host.clone()));
        Self::new(
            config,
            Arc::new(SystemClock::new()),
            api,
            store,
            Arc::new(TokioScheduler),
        )
    }

    /// Claims this context for a host page or tracker frame. A second claim
    /// is a setup error.
    pub(crate) fn claim(&self, what: &'static str) -> TrackerResult<()> {
        if self.installed.swap(true, Ordering::AcqRel) {
            return Err(TrackerError::DuplicateInitialization(what));
        }
        Ok(())
    }
}
