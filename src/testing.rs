//! In-memory doubles for the injected capabilities, shared by unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use anyhow::{bail, Result};
use futures_util::{
    future::{self, BoxFuture},
    FutureExt,
};
use tokio::sync::oneshot;

use crate::{
    api::{
        AdDisplayUpdate, AdLayout, AdResult, AdSlotRequest, AdType, ApiError, ApiResult,
        PageViewInit, PageViewRegistration, PageViewUpdate, TrackingApi,
    },
    cache::{cache_key, CacheRecord, MemoryStore, SessionStore},
    channel::{FramePort, Origin},
    clock::{Clock, ManualClock},
    config::TrackerConfig,
    context::TrackerContext,
    host::{AdRenderer, SlotDisplayState, SlotEvent},
    models::SubjectKind,
    scheduler::{CancelHandle, PeriodicTask, Scheduler},
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApiCall {
    RegisterPageView(PageViewInit),
    UpdatePageView(PageViewUpdate),
    FetchAd(AdSlotRequest),
    UpdateAdDisplay(String, AdDisplayUpdate),
}

/// Backend double. Page views register as `v1`, `v2`, ...; ads as `d1`,
/// `d2`, ... Every call is recorded in order. With responses held, each
/// call is recorded at once but resolves only when a test releases it.
#[derive(Debug, Default)]
pub(crate) struct MockApi {
    calls: Mutex<Vec<ApiCall>>,
    visits: AtomicUsize,
    displays: AtomicUsize,
    fail_registrations: AtomicBool,
    fail_updates: AtomicBool,
    hold: AtomicBool,
    held: Mutex<Vec<oneshot::Sender<()>>>,
}

impl MockApi {
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ApiCall::UpdatePageView(_) | ApiCall::UpdateAdDisplay(..)))
            .collect()
    }

    pub fn fail_registrations(&self, fail: bool) {
        self.fail_registrations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn hold_responses(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Yields to spawned tasks until `count` responses are parked.
    pub async fn wait_for_held(&self, count: usize) {
        for _ in 0..1_000 {
            if self.held() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {count} held responses, found {}", self.held());
    }

    pub fn release_latest(&self) {
        if let Some(tx) = self.held.lock().unwrap().pop() {
            let _ = tx.send(());
        }
    }

    pub fn release_all(&self) {
        for tx in self.held.lock().unwrap().drain(..) {
            let _ = tx.send(());
        }
    }

    fn respond<T: Send + 'static>(&self, result: T) -> BoxFuture<'static, T> {
        if !self.hold.load(Ordering::SeqCst) {
            return future::ready(result).boxed();
        }
        let (tx, rx) = oneshot::channel();
        self.held.lock().unwrap().push(tx);
        async move {
            let _ = rx.await;
            result
        }
        .boxed()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn registration_error(&self) -> Option<ApiError> {
        self.fail_registrations
            .load(Ordering::SeqCst)
            .then(|| ApiError::Status {
                status: 500,
                message: "register rejected".into(),
            })
    }

    fn update_result(&self) -> ApiResult<bool> {
        if self.fail_updates.load(Ordering::SeqCst) {
            Err(ApiError::Transport("connection reset".into()))
        } else {
            Ok(true)
        }
    }
}

impl TrackingApi for MockApi {
    fn register_page_view(&self, body: PageViewInit) -> BoxFuture<'_, ApiResult<PageViewRegistration>> {
        self.record(ApiCall::RegisterPageView(body));
        let result = match self.registration_error() {
            Some(err) => Err(err),
            None => {
                let n = self.visits.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(PageViewRegistration {
                    visit_id: format!("v{n}"),
                })
            }
        };
        self.respond(result)
    }

    fn update_page_view(&self, body: PageViewUpdate) -> BoxFuture<'_, ApiResult<bool>> {
        self.record(ApiCall::UpdatePageView(body));
        self.respond(self.update_result())
    }

    fn fetch_ad_for_slot(&self, body: AdSlotRequest) -> BoxFuture<'_, ApiResult<AdResult>> {
        let ad_layout = body.ad_layout;
        self.record(ApiCall::FetchAd(body));
        let result = match self.registration_error() {
            Some(err) => Err(err),
            None => {
                let n = self.displays.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(AdResult {
                    display_id: format!("d{n}"),
                    media_url: format!("/media/d{n}.png"),
                    title: format!("Creative d{n}"),
                    landing_page: format!("https://brand.example/d{n}"),
                    ad_layout,
                })
            }
        };
        self.respond(result)
    }

    fn update_ad_display(
        &self,
        display_id: String,
        body: AdDisplayUpdate,
    ) -> BoxFuture<'_, ApiResult<bool>> {
        self.record(ApiCall::UpdateAdDisplay(display_id, body));
        self.respond(self.update_result())
    }
}

type SharedTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Scheduler whose ticks only happen when a test fires them.
#[derive(Default)]
pub(crate) struct ManualScheduler {
    tasks: Mutex<Vec<(SharedTask, CancelHandle)>>,
}

impl ManualScheduler {
    pub fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, handle)| !handle.is_cancelled())
            .count()
    }

    /// Runs one tick of every live task, in scheduling order.
    pub async fn fire_all(&self) {
        let live: Vec<SharedTask> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.retain(|(_, handle)| !handle.is_cancelled());
            tasks.iter().map(|(task, _)| task.clone()).collect()
        };
        for task in live {
            task().await;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_periodic(&self, _interval: Duration, task: PeriodicTask) -> CancelHandle {
        let handle = CancelHandle::new();
        self.tasks
            .lock()
            .unwrap()
            .push((Arc::from(task), handle.clone()));
        handle
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingPort {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingPort {
    /// `(payload, target origin)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl FramePort for RecordingPort {
    fn post_message(&self, payload: &str, target_origin: &Origin) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((payload.to_string(), target_origin.as_str().to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingRenderer {
    rendered: Mutex<Vec<(String, String)>>,
    states: Mutex<Vec<SlotDisplayState>>,
    opened: Mutex<Vec<String>>,
    events: Mutex<Vec<SlotEvent>>,
    fail_render: AtomicBool,
}

impl RecordingRenderer {
    /// `(display id, media url)` per render.
    pub fn rendered(&self) -> Vec<(String, String)> {
        self.rendered.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<SlotDisplayState> {
        self.states.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<SlotEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn fail_render(&self, fail: bool) {
        self.fail_render.store(fail, Ordering::SeqCst);
    }
}

impl AdRenderer for RecordingRenderer {
    fn render(&self, ad: &AdResult, media_url: &str) -> Result<()> {
        if self.fail_render.load(Ordering::SeqCst) {
            bail!("no shadow root");
        }
        self.rendered
            .lock()
            .unwrap()
            .push((ad.display_id.clone(), media_url.to_string()));
        Ok(())
    }

    fn set_display_state(&self, state: SlotDisplayState) {
        self.states.lock().unwrap().push(state);
    }

    fn open_landing_page(&self, url: &str) -> Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn emit(&self, event: SlotEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A context wired to doubles, plus handles to drive them.
pub(crate) struct Harness {
    pub ctx: Arc<TrackerContext>,
    pub clock: ManualClock,
    pub api: Arc<MockApi>,
    pub scheduler: Arc<ManualScheduler>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        let clock = ManualClock::new(1_700_000_000_000);
        let api = Arc::new(MockApi::default());
        let scheduler = Arc::new(ManualScheduler::default());
        let store = Arc::new(MemoryStore::new());
        let ctx = TrackerContext::new(
            config,
            Arc::new(clock.clone()),
            api.clone(),
            store.clone(),
            scheduler.clone(),
        );
        Self {
            ctx,
            clock,
            api,
            scheduler,
            store,
        }
    }

    pub fn clock_now(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn put_cache_record(&self, category: &str, record: &CacheRecord) {
        let key = cache_key(&self.ctx.config.cache_prefix, SubjectKind::PageView, category);
        self.store
            .set(&key, &serde_json::to_string(record).unwrap())
            .unwrap();
    }

    pub fn ad_request(&self) -> AdSlotRequest {
        AdSlotRequest {
            ad_type: AdType::Image,
            ad_layout: AdLayout::Banner,
            track_id: "t1".into(),
            domain: "news.example".into(),
        }
    }
}
