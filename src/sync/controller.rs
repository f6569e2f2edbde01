use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::{
    api::{
        AdDisplayUpdate, AdResult, AdSlotRequest, ApiError, PageViewInit, PageViewRegistration,
        PageViewUpdate,
    },
    context::TrackerContext,
    error::{TrackerError, TrackerResult},
    models::{Subject, SubjectKind},
    scheduler::CancelHandle,
    visibility::{GateTransition, VisibilityGate, VisibilitySignals},
};

use super::state::{GateOutcome, SubjectTracker, SyncRequest, SyncState};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Register call issued when a subject is created.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    PageView(PageViewInit),
    AdSlot(AdSlotRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Registered {
    PageView(PageViewRegistration),
    Ad(AdResult),
}

impl Registered {
    pub fn remote_id(&self) -> &str {
        match self {
            Registered::PageView(registration) => &registration.visit_id,
            Registered::Ad(result) => &result.display_id,
        }
    }
}

/// How a subject ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// Superseded by a new subject of the same kind; its cache entry is dropped.
    Replaced,
    /// The owning context is going away; the cache keeps the last
    /// acknowledged duration for a reload.
    Teardown,
}

/// Whether a subject's acknowledged durations are mirrored into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Resumable,
    Ephemeral,
}

impl CachePolicy {
    pub fn for_kind(kind: SubjectKind) -> Self {
        match kind {
            SubjectKind::PageView => CachePolicy::Resumable,
            SubjectKind::AdDisplay => CachePolicy::Ephemeral,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSnapshot {
    pub subject: Subject,
    pub state: SyncState,
    pub elapsed: f64,
    pub accruing: bool,
    pub registration_failed: bool,
    pub clicked: bool,
}

struct ControllerInner {
    tracker: Mutex<SubjectTracker>,
    ctx: Arc<TrackerContext>,
    ticker: StdMutex<Option<CancelHandle>>,
    cache_policy: CachePolicy,
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        let ticker = match self.ticker.get_mut() {
            Ok(ticker) => ticker,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = ticker.take() {
            handle.cancel();
        }
    }
}

/// Async driver of one subject: performs register and update calls for the
/// [`SubjectTracker`], owns its periodic ticker and mirrors acknowledged
/// durations into the cache.
///
/// The tracker lock is never held across a network call; results are
/// re-validated against the current state once the call returns.
#[derive(Clone)]
pub struct SubjectController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for SubjectController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectController")
            .field("cache_policy", &self.inner.cache_policy)
            .finish_non_exhaustive()
    }
}

impl SubjectController {
    pub fn new(ctx: Arc<TrackerContext>, subject: Subject, gate: VisibilityGate) -> Self {
        let cache_policy = CachePolicy::for_kind(subject.kind);
        let tracker = SubjectTracker::new(subject, gate, ctx.clock.clone(), ctx.config.debounce_ms);
        Self {
            inner: Arc::new(ControllerInner {
                tracker: Mutex::new(tracker),
                ctx,
                ticker: StdMutex::new(None),
                cache_policy,
            }),
        }
    }

    /// Whether both handles drive the same subject.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn snapshot(&self) -> SubjectSnapshot {
        let tracker = self.inner.tracker.lock().await;
        SubjectSnapshot {
            subject: tracker.subject().clone(),
            state: tracker.state(),
            elapsed: tracker.elapsed(),
            accruing: tracker.is_accruing(),
            registration_failed: tracker.registration_failed(),
            clicked: tracker.clicked(),
        }
    }

    pub async fn state(&self) -> SyncState {
        self.inner.tracker.lock().await.state()
    }

    pub async fn elapsed(&self) -> f64 {
        self.inner.tracker.lock().await.elapsed()
    }

    pub async fn subject(&self) -> Subject {
        self.inner.tracker.lock().await.subject().clone()
    }

    /// Resumes from a fresh cache record when the policy allows one,
    /// registers with the backend otherwise. `Ok(None)` means resumed.
    pub async fn start(&self, registration: Registration) -> TrackerResult<Option<Registered>> {
        if self.resume_from_cache().await {
            return Ok(None);
        }
        self.register(registration).await.map(Some)
    }

    pub async fn resume_from_cache(&self) -> bool {
        if self.inner.cache_policy != CachePolicy::Resumable {
            return false;
        }
        let mut tracker = self.inner.tracker.lock().await;
        let subject = tracker.subject().clone();
        let Some(record) = self.inner.ctx.cache.load(subject.kind, &subject.subject_id) else {
            return false;
        };
        if !tracker.resume(&record) {
            return false;
        }
        log_info!(
            "resumed {} as {} at {:.1}s",
            subject.label(),
            record.remote_id,
            record.duration
        );
        self.reconcile_ticker(tracker.state());
        true
    }

    pub async fn register(&self, registration: Registration) -> TrackerResult<Registered> {
        let label = {
            let mut tracker = self.inner.tracker.lock().await;
            tracker.begin_registration()?;
            tracker.subject().label()
        };

        let api = &self.inner.ctx.api;
        let result = match registration {
            Registration::PageView(body) => api.register_page_view(body).await.map(Registered::PageView),
            Registration::AdSlot(body) => api.fetch_ad_for_slot(body).await.map(Registered::Ad),
        };

        let mut tracker = self.inner.tracker.lock().await;
        match result {
            Ok(registered) if !registered.remote_id().is_empty() => {
                if !tracker.complete_registration(registered.remote_id().to_string()) {
                    log_debug!("{label} finalized while registering; dropping response");
                    return Err(TrackerError::SubjectClosed(label));
                }
                log_info!("registered {label} as {}", registered.remote_id());
                self.reconcile_ticker(tracker.state());
                Ok(registered)
            }
            Ok(_) => {
                tracker.fail_registration();
                let err = ApiError::Decode("empty remote id in register response".into());
                log_error!("registration of {label} failed: {err}");
                Err(TrackerError::RegistrationFailed(err))
            }
            Err(err) => {
                tracker.fail_registration();
                log_error!("registration of {label} failed: {err}");
                Err(TrackerError::RegistrationFailed(err))
            }
        }
    }

    pub async fn set_intersection(&self, ratio: f64) -> GateTransition {
        self.update_gate(|tracker| tracker.set_intersection(ratio)).await
    }

    pub async fn set_document_visible(&self, visible: bool) -> GateTransition {
        self.update_gate(|tracker| tracker.set_document_visible(visible)).await
    }

    pub async fn set_media_active(&self, active: bool) -> GateTransition {
        self.update_gate(|tracker| tracker.set_media_active(active)).await
    }

    pub async fn apply_signals(&self, signals: VisibilitySignals) -> GateTransition {
        self.update_gate(|tracker| tracker.apply_signals(signals)).await
    }

    /// Applies a gate change and sends the sync it forces, if any. Returns
    /// the gate edge the change produced.
    async fn update_gate<F>(&self, update: F) -> GateTransition
    where
        F: FnOnce(&mut SubjectTracker) -> GateOutcome,
    {
        let outcome = {
            let mut tracker = self.inner.tracker.lock().await;
            let outcome = update(&mut *tracker);
            self.reconcile_ticker(tracker.state());
            outcome
        };
        if let Some(request) = outcome.sync {
            self.dispatch(request).await;
        }
        outcome.transition
    }

    /// Periodic entry point; a no-op inside the debounce window.
    pub async fn tick(&self) {
        let request = self.inner.tracker.lock().await.plan_tick();
        if let Some(request) = request {
            self.dispatch(request).await;
        }
    }

    /// Flushes the current duration, unless a sync went out inside the
    /// debounce window; the next tick then carries it.
    pub async fn sync_now(&self) -> TrackerResult<()> {
        let request = self.inner.tracker.lock().await.plan_immediate()?;
        if let Some(request) = request {
            self.dispatch(request).await;
        }
        Ok(())
    }

    pub async fn record_click(&self) -> TrackerResult<()> {
        let request = self.inner.tracker.lock().await.record_click()?;
        if let Some(request) = request {
            self.dispatch(request).await;
        }
        Ok(())
    }

    /// Stops accrual, sends one last best-effort sync and closes the subject.
    pub async fn finalize(&self, reason: FinalizeReason) -> TrackerResult<()> {
        let (request, subject) = {
            let mut tracker = self.inner.tracker.lock().await;
            let request = tracker.begin_finalize()?;
            self.cancel_ticker();
            (request, tracker.subject().clone())
        };

        let mut acknowledged = None;
        if let Some(request) = request {
            match self.send(&request).await {
                Ok(true) => acknowledged = Some(request.duration),
                Ok(false) => log_warn!("final sync for {} not acknowledged", subject.label()),
                Err(err) => log_warn!("final sync for {} failed: {err}", subject.label()),
            }
        }

        if self.inner.cache_policy == CachePolicy::Resumable {
            match reason {
                FinalizeReason::Replaced => self
                    .inner
                    .ctx
                    .cache
                    .clear(subject.kind, &subject.subject_id),
                FinalizeReason::Teardown => {
                    if let Some(duration) = acknowledged {
                        self.inner.ctx.cache.save(&subject, duration)?;
                    }
                }
            }
        }

        self.inner.tracker.lock().await.close();
        log_info!("closed {} ({reason:?})", subject.label());
        Ok(())
    }

    /// Feeds gate signals from an observer channel until the handle is
    /// cancelled or the sender goes away.
    pub fn observe_visibility(&self, mut signals: watch::Receiver<VisibilitySignals>) -> CancelHandle {
        let handle = CancelHandle::new();
        let token = handle.token();
        let this = self.clone();

        tokio::spawn(async move {
            let initial = *signals.borrow_and_update();
            this.apply_signals(initial).await;
            loop {
                tokio::select! {
                    changed = signals.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *signals.borrow_and_update();
                        this.apply_signals(current).await;
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        handle
    }

    async fn dispatch(&self, request: SyncRequest) {
        let label = request.subject.label();
        let result = self.send(&request).await;

        let mut tracker = self.inner.tracker.lock().await;
        match result {
            Ok(true) => {
                let Some(duration) = tracker.complete_sync(&request) else {
                    log_debug!("ignoring stale sync result for {label}");
                    return;
                };
                if self.inner.cache_policy == CachePolicy::Resumable {
                    if let Err(err) = self.inner.ctx.cache.save(tracker.subject(), duration) {
                        log_warn!("could not cache {label}: {err}");
                    }
                }
                log_debug!("synced {label} at {duration:.1}s");
            }
            Ok(false) => log_warn!("sync for {label} was not acknowledged"),
            Err(err) => {
                let err = TrackerError::SyncFailed(err);
                log_warn!("{err} ({label}); retrying on next trigger");
            }
        }
    }

    async fn send(&self, request: &SyncRequest) -> Result<bool, ApiError> {
        let api = &self.inner.ctx.api;
        match request.subject.kind {
            SubjectKind::PageView => {
                api.update_page_view(PageViewUpdate {
                    visit_id: request.remote_id.clone(),
                    duration: request.duration,
                })
                .await
            }
            SubjectKind::AdDisplay => {
                api.update_ad_display(
                    request.remote_id.clone(),
                    AdDisplayUpdate {
                        duration: request.duration,
                        clicked: request.clicked,
                    },
                )
                .await
            }
        }
    }

    /// Keeps exactly one ticker alive while the subject is `Active`.
    fn reconcile_ticker(&self, state: SyncState) {
        let mut ticker = match self.inner.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match (state, ticker.is_some()) {
            (SyncState::Active, false) => {
                let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
                let interval = self.inner.ctx.config.sync_interval();
                let handle = self.inner.ctx.scheduler.schedule_periodic(
                    interval,
                    Box::new(move || {
                        let weak = weak.clone();
                        async move {
                            if let Some(inner) = weak.upgrade() {
                                SubjectController { inner }.tick().await;
                            }
                        }
                        .boxed()
                    }),
                );
                *ticker = Some(handle);
            }
            (SyncState::Active, true) => {}
            (_, true) => {
                if let Some(handle) = ticker.take() {
                    handle.cancel();
                }
            }
            (_, false) => {}
        }
    }

    fn cancel_ticker(&self) {
        self.reconcile_ticker(SyncState::Finalizing);
    }
}
