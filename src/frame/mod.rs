//! The isolated tracking frame: owns page-view subjects for the host page.

use std::sync::Arc;

use tokio::sync::Mutex;
use url::Url;

use crate::{
    api::PageViewInit,
    cache::SessionStore,
    channel::{ChannelMessage, CrossFrameChannel, FramePort, Origin},
    context::TrackerContext,
    error::{TrackerError, TrackerResult},
    identity::resolve_track_id,
    models::Subject,
    sync::{FinalizeReason, Registration, SubjectController, SubjectSnapshot},
    visibility::VisibilityGate,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Launch parameters the host encodes into the frame URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameParams {
    pub host_origin: Origin,
    pub domain: String,
    pub category: Option<String>,
}

impl FrameParams {
    pub fn from_url(url: &Url) -> TrackerResult<Self> {
        Self::from_query(url.query().unwrap_or_default())
    }

    /// Parses `origin`, `domain` and `category` from a query string.
    /// `origin` and `domain` are required and must not be blank.
    pub fn from_query(query: &str) -> TrackerResult<Self> {
        let mut origin = None;
        let mut domain = None;
        let mut category = None;
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "origin" => origin = Some(value.into_owned()),
                "domain" => domain = Some(value.into_owned()),
                "category" => category = Some(value.into_owned()),
                _ => {}
            }
        }

        let origin = origin
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| TrackerError::invalid("origin", "missing or blank"))?;
        let domain = domain
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| TrackerError::invalid("domain", "missing or blank"))?;

        Ok(Self {
            host_origin: Origin::parse(&origin)?,
            domain,
            category: normalize_category(category),
        })
    }
}

pub(crate) fn normalize_category(category: Option<String>) -> Option<String> {
    category
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Default)]
struct FrameState {
    category: Option<String>,
    page_view: Option<SubjectController>,
    document_visible: bool,
    unloaded: bool,
}

pub struct TrackerFrame {
    ctx: Arc<TrackerContext>,
    params: FrameParams,
    track_id: String,
    channel: CrossFrameChannel,
    state: Mutex<FrameState>,
}

impl std::fmt::Debug for TrackerFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerFrame")
            .field("params", &self.params)
            .field("track_id", &self.track_id)
            .finish_non_exhaustive()
    }
}

impl TrackerFrame {
    /// Resolves identity, announces `ready` to the host and starts tracking
    /// the initial category. Parameter problems abort setup; a failed
    /// page-view registration does not.
    pub async fn start(
        ctx: Arc<TrackerContext>,
        params: FrameParams,
        port: Arc<dyn FramePort>,
        identity_store: &dyn SessionStore,
        document_visible: bool,
    ) -> TrackerResult<Self> {
        ctx.claim("tracker frame")?;

        let track_id = resolve_track_id(identity_store, &ctx.config.track_id_key);
        let channel = CrossFrameChannel::new(params.host_origin.clone(), port);
        let initial_category = params.category.clone();

        let frame = Self {
            ctx,
            params,
            track_id,
            channel,
            state: Mutex::new(FrameState {
                document_visible,
                ..FrameState::default()
            }),
        };

        if let Err(err) = frame.channel.send(&ChannelMessage::Ready {
            track_id: frame.track_id.clone(),
        }) {
            log_error!("failed to announce tracker readiness: {err:#}");
        }

        if let Err(err) = frame.switch_category(initial_category).await {
            log_error!("initial page view not tracked: {err}");
        }
        Ok(frame)
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn params(&self) -> &FrameParams {
        &self.params
    }

    pub async fn category(&self) -> Option<String> {
        self.state.lock().await.category.clone()
    }

    pub async fn page_view(&self) -> Option<SubjectSnapshot> {
        let controller = self.state.lock().await.page_view.clone();
        match controller {
            Some(controller) => Some(controller.snapshot().await),
            None => None,
        }
    }

    /// Entry point for window messages delivered to the frame.
    pub async fn handle_message(&self, origin: &str, payload: &str) {
        let Some(message) = self.channel.receive(origin, payload) else {
            return;
        };
        match message {
            ChannelMessage::CategoryChanged { category } => {
                if let Err(err) = self.switch_category(category).await {
                    log_warn!("category change not tracked: {err}");
                }
            }
            ChannelMessage::Ready { .. } => log_debug!("ignoring ready sent to the tracker frame"),
        }
    }

    /// Finalizes the current page view, then registers one for `category`.
    /// A repeated category is a no-op.
    pub async fn switch_category(&self, category: Option<String>) -> TrackerResult<()> {
        let category = normalize_category(category);
        let (previous, next, document_visible) = {
            let mut state = self.state.lock().await;
            if state.unloaded {
                return Ok(());
            }
            if state.category == category && (state.page_view.is_some() || category.is_none()) {
                return Ok(());
            }
            let previous = state.page_view.take();
            let next = category.as_ref().map(|name| {
                SubjectController::new(
                    self.ctx.clone(),
                    Subject::page_view(name.clone()),
                    VisibilityGate::for_page_view(state.document_visible),
                )
            });
            state.category = category.clone();
            state.page_view = next.clone();
            (previous, next, state.document_visible)
        };

        if let Some(previous) = previous {
            if let Err(err) = previous.finalize(FinalizeReason::Replaced).await {
                log_debug!("previous page view already closed: {err}");
            }
        }

        let (Some(next), Some(name)) = (next, category) else {
            return Ok(());
        };

        // A newer category may have replaced `next` while the previous
        // page view was flushing.
        let still_current = self
            .state
            .lock()
            .await
            .page_view
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&next));
        if !still_current {
            log_debug!("page view for {name} superseded before registering");
            return Ok(());
        }

        log_info!("tracking page view for category {name}");
        let registration = Registration::PageView(PageViewInit {
            domain: self.params.domain.clone(),
            category_name: name,
            track_id: self.track_id.clone(),
        });
        next.start(registration).await?;

        // Visibility may have flipped while the register call was in flight.
        let current_visibility = self.state.lock().await.document_visible;
        if current_visibility != document_visible {
            next.set_document_visible(current_visibility).await;
        }
        Ok(())
    }

    pub async fn set_document_visible(&self, visible: bool) {
        let controller = {
            let mut state = self.state.lock().await;
            state.document_visible = visible;
            state.page_view.clone()
        };
        if let Some(controller) = controller {
            controller.set_document_visible(visible).await;
        }
    }

    /// Best-effort flush when the frame is going away.
    pub async fn unload(&self) {
        let controller = {
            let mut state = self.state.lock().await;
            state.unloaded = true;
            state.page_view.take()
        };
        if let Some(controller) = controller {
            if let Err(err) = controller.finalize(FinalizeReason::Teardown).await {
                log_debug!("page view already closed at unload: {err}");
            }
        }
    }
}
