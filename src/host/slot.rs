use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use anyhow::Result;
use serde::Serialize;

use crate::{
    api::{resolve_media_url, AdLayout, AdResult, AdSlotRequest, AdType},
    context::TrackerContext,
    error::{TrackerError, TrackerResult},
    models::Subject,
    sync::{FinalizeReason, Registered, Registration, SubjectController, SubjectSnapshot},
    visibility::{GateTransition, VisibilityGate},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// What kind of creative a slot shows, and how its attention is gated.
#[derive(Debug, Clone, PartialEq)]
pub enum AdVariant {
    /// Gated by viewport intersection and document visibility.
    Image {
        layout_attr: Option<String>,
        width: f64,
        height: f64,
    },
    /// Gated by playback only.
    Video,
}

impl AdVariant {
    pub fn ad_type(&self) -> AdType {
        match self {
            AdVariant::Image { .. } => AdType::Image,
            AdVariant::Video => AdType::Video,
        }
    }

    pub fn layout(&self) -> AdLayout {
        match self {
            AdVariant::Image {
                layout_attr,
                width,
                height,
            } => AdLayout::for_image_slot(layout_attr.as_deref(), *width, *height),
            AdVariant::Video => AdLayout::Video,
        }
    }
}

/// Display indicator exposed to page styling (`is-initialized`,
/// `is-loaded`, `is-error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotDisplayState {
    Initialized,
    Loaded,
    Error,
}

impl SlotDisplayState {
    pub fn css_class(&self) -> &'static str {
        match self {
            SlotDisplayState::Initialized => "is-initialized",
            SlotDisplayState::Loaded => "is-loaded",
            SlotDisplayState::Error => "is-error",
        }
    }
}

/// Events a slot raises to the embedding page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    Finished,
    Error,
}

/// Presentation capability of the embedding page. The slot decides what
/// to show; the renderer decides how.
pub trait AdRenderer: Send + Sync {
    fn render(&self, ad: &AdResult, media_url: &str) -> Result<()>;
    fn set_display_state(&self, state: SlotDisplayState);
    fn open_landing_page(&self, url: &str) -> Result<()>;
    fn emit(&self, event: SlotEvent);
}

#[derive(Debug, Clone)]
pub struct AdSlotSnapshot {
    pub slot_id: String,
    pub display_state: Option<SlotDisplayState>,
    pub ad: Option<AdResult>,
    pub subject: SubjectSnapshot,
}

#[derive(Debug, Default)]
struct SlotInner {
    display_state: Option<SlotDisplayState>,
    ad: Option<AdResult>,
}

/// One ad placement: a tracked ad-display subject plus the renderer that
/// shows its creative.
pub struct AdSlot {
    slot_id: String,
    variant: AdVariant,
    ctx: Arc<TrackerContext>,
    controller: SubjectController,
    renderer: Arc<dyn AdRenderer>,
    inner: StdMutex<SlotInner>,
}

impl std::fmt::Debug for AdSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdSlot")
            .field("slot_id", &self.slot_id)
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

impl AdSlot {
    pub fn new(
        ctx: Arc<TrackerContext>,
        slot_id: impl Into<String>,
        variant: AdVariant,
        renderer: Arc<dyn AdRenderer>,
    ) -> TrackerResult<Self> {
        let slot_id = slot_id.into();
        if slot_id.trim().is_empty() {
            return Err(TrackerError::invalid("slot_id", "blank"));
        }
        let gate = match variant {
            AdVariant::Image { .. } => VisibilityGate::for_ad_slot(ctx.config.ad_visibility_threshold)?,
            AdVariant::Video => VisibilityGate::for_media(),
        };
        let controller = SubjectController::new(ctx.clone(), Subject::ad_display(slot_id.clone()), gate);
        Ok(Self {
            slot_id,
            variant,
            ctx,
            controller,
            renderer,
            inner: StdMutex::new(SlotInner::default()),
        })
    }

    pub fn slot_id(&self) -> &str {
        &self.slot_id
    }

    pub fn variant(&self) -> &AdVariant {
        &self.variant
    }

    pub fn controller(&self) -> &SubjectController {
        &self.controller
    }

    fn lock_inner(&self) -> MutexGuard<'_, SlotInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn display_state(&self) -> Option<SlotDisplayState> {
        self.lock_inner().display_state
    }

    pub fn ad(&self) -> Option<AdResult> {
        self.lock_inner().ad.clone()
    }

    fn set_display_state(&self, state: SlotDisplayState) {
        self.lock_inner().display_state = Some(state);
        self.renderer.set_display_state(state);
    }

    fn fail(&self) {
        self.set_display_state(SlotDisplayState::Error);
        if self.variant == AdVariant::Video {
            self.renderer.emit(SlotEvent::Error);
        }
    }

    /// Fetches a creative for this slot and renders it. Any failure leaves
    /// the slot inert in the `Error` display state.
    pub async fn activate(&self, track_id: &str, domain: &str) -> TrackerResult<()> {
        self.set_display_state(SlotDisplayState::Initialized);
        if track_id.is_empty() {
            self.fail();
            return Err(TrackerError::invalid("track_id", "tracker not ready"));
        }

        let request = AdSlotRequest {
            ad_type: self.variant.ad_type(),
            ad_layout: self.variant.layout(),
            track_id: track_id.to_string(),
            domain: domain.to_string(),
        };
        let ad = match self.controller.register(Registration::AdSlot(request)).await {
            Ok(Registered::Ad(ad)) => ad,
            Ok(Registered::PageView(_)) => {
                self.fail();
                return Err(TrackerError::invalid("registration", "page view for ad slot"));
            }
            Err(err) => {
                self.fail();
                return Err(err);
            }
        };

        let media_url = resolve_media_url(&self.ctx.config.api_host, &ad.media_url);
        self.lock_inner().ad = Some(ad.clone());
        if let Err(err) = self.renderer.render(&ad, &media_url) {
            log_error!("failed to render ad {} in slot {}: {err:#}", ad.display_id, self.slot_id);
            self.fail();
        }
        Ok(())
    }

    pub fn media_loaded(&self) {
        self.set_display_state(SlotDisplayState::Loaded);
    }

    pub fn media_failed(&self) {
        if let Some(ad) = self.ad() {
            log_error!("failed to load ad media from {}", ad.media_url);
        }
        self.fail();
    }

    /// Marks the display clicked, forces a sync carrying the flag and opens
    /// the landing page.
    pub async fn click(&self) -> TrackerResult<()> {
        let Some(ad) = self.ad() else {
            log_debug!("click on slot {} before an ad was shown", self.slot_id);
            return Ok(());
        };
        self.controller.record_click().await?;
        log_info!("ad {} clicked", ad.title);
        if let Err(err) = self.renderer.open_landing_page(&ad.landing_page) {
            log_warn!("failed to open landing page {}: {err:#}", ad.landing_page);
        }
        Ok(())
    }

    pub async fn play(&self) {
        self.controller.set_media_active(true).await;
    }

    /// Pausing reports the current duration even when playback was already
    /// stopped, unless a non-pause sync went out inside the debounce window.
    pub async fn pause(&self) {
        self.stop_playback().await;
    }

    pub async fn ended(&self) {
        self.stop_playback().await;
        self.renderer.emit(SlotEvent::Finished);
    }

    async fn stop_playback(&self) {
        if self.controller.set_media_active(false).await == GateTransition::Unchanged {
            if let Err(err) = self.controller.sync_now().await {
                log_debug!("no sync for slot {}: {err}", self.slot_id);
            }
        }
    }

    pub async fn set_intersection(&self, ratio: f64) {
        self.controller.set_intersection(ratio).await;
    }

    pub async fn set_document_visible(&self, visible: bool) {
        self.controller.set_document_visible(visible).await;
    }

    /// Final sync on removal. Ad displays are never resumed, so there is
    /// nothing to keep in the cache.
    pub async fn finalize(&self) {
        if let Err(err) = self.controller.finalize(FinalizeReason::Teardown).await {
            log_debug!("slot {} already closed: {err}", self.slot_id);
        }
    }

    pub async fn snapshot(&self) -> AdSlotSnapshot {
        let (display_state, ad) = {
            let inner = self.lock_inner();
            (inner.display_state, inner.ad.clone())
        };
        AdSlotSnapshot {
            slot_id: self.slot_id.clone(),
            display_state,
            ad,
            subject: self.controller.snapshot().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::AdDisplayUpdate,
        sync::SyncState,
        testing::{ApiCall, Harness, RecordingRenderer},
    };

    fn image() -> AdVariant {
        AdVariant::Image {
            layout_attr: None,
            width: 300.0,
            height: 600.0,
        }
    }

    fn slot(harness: &Harness, variant: AdVariant) -> (Arc<RecordingRenderer>, AdSlot) {
        let renderer = Arc::new(RecordingRenderer::default());
        let slot = AdSlot::new(harness.ctx.clone(), "slot-1", variant, renderer.clone()).unwrap();
        (renderer, slot)
    }

    fn ad_updates(harness: &Harness) -> Vec<(String, AdDisplayUpdate)> {
        harness
            .api
            .updates()
            .into_iter()
            .map(|call| match call {
                ApiCall::UpdateAdDisplay(id, update) => (id, update),
                other => panic!("unexpected call {other:?}"),
            })
            .collect()
    }

    #[test]
    fn variants_pick_type_and_layout() {
        assert_eq!(image().ad_type(), AdType::Image);
        assert_eq!(image().layout(), AdLayout::Sidebar);
        let banner = AdVariant::Image {
            layout_attr: Some("banner".into()),
            width: 100.0,
            height: 900.0,
        };
        assert_eq!(banner.layout(), AdLayout::Banner);
        assert_eq!(AdVariant::Video.layout(), AdLayout::Video);
        assert_eq!(SlotDisplayState::Error.css_class(), "is-error");
    }

    #[tokio::test]
    async fn activation_fetches_and_renders_with_absolute_media_url() {
        let harness = Harness::new();
        let (renderer, slot) = slot(&harness, image());
        slot.activate("t1", "news.example").await.unwrap();

        match &harness.api.calls()[0] {
            ApiCall::FetchAd(request) => {
                assert_eq!(request.ad_type, AdType::Image);
                assert_eq!(request.ad_layout, AdLayout::Sidebar);
                assert_eq!(request.track_id, "t1");
            }
            other => panic!("unexpected call {other:?}"),
        }
        let rendered = renderer.rendered();
        assert_eq!(rendered.len(), 1);
        assert!(rendered[0].1.starts_with(&harness.ctx.config.api_host));
        assert_eq!(slot.display_state(), Some(SlotDisplayState::Initialized));

        slot.media_loaded();
        assert_eq!(
            renderer.states(),
            vec![SlotDisplayState::Initialized, SlotDisplayState::Loaded]
        );
    }

    #[tokio::test]
    async fn registration_failure_shows_error_and_stays_inert() {
        let harness = Harness::new();
        harness.api.fail_registrations(true);
        let (renderer, slot) = slot(&harness, image());

        let err = slot.activate("t1", "news.example").await.unwrap_err();
        assert!(matches!(err, TrackerError::RegistrationFailed(_)));
        assert_eq!(slot.display_state(), Some(SlotDisplayState::Error));
        assert!(renderer.rendered().is_empty());

        slot.set_intersection(1.0).await;
        harness.clock.advance(5_000);
        assert_eq!(slot.snapshot().await.subject.elapsed, 0.0);
    }

    #[tokio::test]
    async fn image_accrues_only_while_half_visible() {
        let harness = Harness::new();
        let (_renderer, slot) = slot(&harness, image());
        slot.activate("t1", "news.example").await.unwrap();

        slot.set_intersection(0.4).await;
        harness.clock.advance(2_000);
        slot.set_intersection(0.6).await;
        harness.clock.advance(3_000);
        slot.set_intersection(0.1).await;

        let updates = ad_updates(&harness);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "d1");
        assert!((updates[0].1.duration - 3.0).abs() < 1e-9);
        assert!(!updates[0].1.clicked);
    }

    #[tokio::test]
    async fn click_syncs_with_flag_and_opens_landing_page() {
        let harness = Harness::new();
        let (renderer, slot) = slot(&harness, image());
        slot.activate("t1", "news.example").await.unwrap();
        slot.set_intersection(1.0).await;
        harness.clock.advance(1_500);

        slot.click().await.unwrap();

        let updates = ad_updates(&harness);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].1.clicked);
        assert!((updates[0].1.duration - 1.5).abs() < 1e-9);
        assert_eq!(renderer.opened(), vec!["https://brand.example/d1".to_string()]);
        assert!(slot.snapshot().await.subject.clicked);
    }

    #[tokio::test]
    async fn video_is_gated_by_playback() {
        let harness = Harness::new();
        let (renderer, slot) = slot(&harness, AdVariant::Video);
        slot.activate("t1", "news.example").await.unwrap();
        assert_eq!(slot.controller().state().await, SyncState::Suspended);

        slot.play().await;
        harness.clock.advance(4_000);
        slot.pause().await;
        slot.pause().await;
        slot.play().await;
        harness.clock.advance(2_000);
        slot.ended().await;

        let durations: Vec<f64> = ad_updates(&harness).iter().map(|(_, u)| u.duration).collect();
        assert_eq!(durations, vec![4.0, 4.0, 6.0]);
        assert_eq!(renderer.events(), vec![SlotEvent::Finished]);
    }

    #[tokio::test]
    async fn video_media_error_emits_event() {
        let harness = Harness::new();
        let (renderer, slot) = slot(&harness, AdVariant::Video);
        slot.activate("t1", "news.example").await.unwrap();
        slot.media_failed();
        assert_eq!(slot.display_state(), Some(SlotDisplayState::Error));
        assert_eq!(renderer.events(), vec![SlotEvent::Error]);
    }

    #[tokio::test]
    async fn render_failure_marks_error() {
        let harness = Harness::new();
        let (renderer, slot) = slot(&harness, image());
        renderer.fail_render(true);
        slot.activate("t1", "news.example").await.unwrap();
        assert_eq!(slot.display_state(), Some(SlotDisplayState::Error));
    }

    #[tokio::test]
    async fn finalize_sends_last_duration_without_caching() {
        let harness = Harness::new();
        let (_renderer, slot) = slot(&harness, image());
        slot.activate("t1", "news.example").await.unwrap();
        slot.set_intersection(0.9).await;
        harness.clock.advance(2_500);
        slot.finalize().await;
        slot.finalize().await;

        let updates = ad_updates(&harness);
        assert_eq!(updates.len(), 1);
        assert!((updates[0].1.duration - 2.5).abs() < 1e-9);
        assert_eq!(slot.controller().state().await, SyncState::Closed);
        assert!(harness
            .ctx
            .cache
            .load(crate::models::SubjectKind::AdDisplay, "slot-1")
            .is_none());
    }

    #[test]
    fn blank_slot_id_is_rejected() {
        let harness = Harness::new();
        let err = AdSlot::new(
            harness.ctx.clone(),
            " ",
            AdVariant::Video,
            Arc::new(RecordingRenderer::default()),
        )
        .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidParameters { .. }));
    }
}
