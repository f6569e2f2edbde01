//! The embedding page: launches the tracker frame, relays category changes
//! to it and owns the ad slots placed on the page.

pub mod slot;

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use futures_util::future::join_all;
use tokio::sync::watch;
use url::Url;

pub use slot::{AdRenderer, AdSlot, AdSlotSnapshot, AdVariant, SlotDisplayState, SlotEvent};

use crate::{
    channel::{ChannelMessage, CrossFrameChannel, FramePort, HandshakeState, Origin},
    context::TrackerContext,
    error::{TrackerError, TrackerResult},
    frame::normalize_category,
    scheduler::CancelHandle,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct HostParams {
    /// URL of the embedding page; supplies the origin and domain.
    pub page_url: Url,
    /// Where the tracker frame is served from; its origin is pinned.
    pub tracker_url: Url,
    pub initial_category: Option<String>,
}

#[derive(Debug, Default)]
struct HostState {
    handshake: HandshakeState,
    category: Option<String>,
    slots: Vec<Arc<AdSlot>>,
    pending: Vec<Arc<AdSlot>>,
    document_visible: bool,
    shut_down: bool,
}

pub struct HostPage {
    ctx: Arc<TrackerContext>,
    channel: CrossFrameChannel,
    launch_url: Url,
    domain: String,
    state: StdMutex<HostState>,
    watcher: StdMutex<Option<CancelHandle>>,
}

impl std::fmt::Debug for HostPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPage")
            .field("launch_url", &self.launch_url.as_str())
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl HostPage {
    /// Sets up the host side. Fails when this context already has a host
    /// or frame installed, or when either URL has no usable origin.
    pub fn install(
        ctx: Arc<TrackerContext>,
        params: HostParams,
        port: Arc<dyn FramePort>,
    ) -> TrackerResult<Arc<Self>> {
        ctx.claim("host page")?;

        let page_origin = Origin::of_url(&params.page_url)?;
        let tracker_origin = Origin::of_url(&params.tracker_url)?;
        let domain = params
            .page_url
            .host_str()
            .map(str::to_string)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| TrackerError::invalid("domain", "page URL has no host"))?;
        let category = normalize_category(params.initial_category);

        let mut launch_url = params.tracker_url.clone();
        launch_url
            .query_pairs_mut()
            .clear()
            .append_pair("origin", page_origin.as_str())
            .append_pair("domain", &domain)
            .append_pair("category", category.as_deref().unwrap_or_default());

        log_info!("installing tracker frame from {tracker_origin}");
        Ok(Arc::new(Self {
            ctx,
            channel: CrossFrameChannel::new(tracker_origin, port),
            launch_url,
            domain,
            state: StdMutex::new(HostState {
                category,
                document_visible: true,
                ..HostState::default()
            }),
            watcher: StdMutex::new(None),
        }))
    }

    /// URL the hidden tracker frame is loaded from.
    pub fn launch_url(&self) -> &Url {
        &self.launch_url
    }

    pub fn tracker_origin(&self) -> &Origin {
        self.channel.counterpart()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn lock_state(&self) -> MutexGuard<'_, HostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn track_id(&self) -> Option<String> {
        self.lock_state().handshake.track_id().map(str::to_string)
    }

    pub fn category(&self) -> Option<String> {
        self.lock_state().category.clone()
    }

    pub fn slots(&self) -> Vec<Arc<AdSlot>> {
        self.lock_state().slots.clone()
    }

    /// Entry point for window messages delivered to the host page.
    pub async fn handle_message(&self, origin: &str, payload: &str) {
        let Some(message) = self.channel.receive(origin, payload) else {
            return;
        };
        match message {
            ChannelMessage::Ready { track_id } => self.on_ready(track_id).await,
            ChannelMessage::CategoryChanged { .. } => {
                log_debug!("ignoring updateCategory sent to the host page")
            }
        }
    }

    async fn on_ready(&self, track_id: String) {
        let pending = {
            let mut state = self.lock_state();
            if state.shut_down || !state.handshake.observe_ready(track_id.clone()) {
                return;
            }
            std::mem::take(&mut state.pending)
        };
        log_info!("tracker ready; activating {} pending ad slot(s)", pending.len());
        join_all(pending.iter().map(|slot| self.activate_slot(slot, &track_id))).await;
    }

    async fn activate_slot(&self, slot: &AdSlot, track_id: &str) {
        if let Err(err) = slot.activate(track_id, &self.domain).await {
            log_error!("ad slot {} failed to activate: {err}", slot.slot_id());
            return;
        }
        let visible = self.lock_state().document_visible;
        if !visible {
            slot.set_document_visible(false).await;
        }
    }

    /// Places an ad slot. Slots created before the tracker is ready wait
    /// and register once `ready` arrives.
    pub async fn create_ad_slot(
        &self,
        slot_id: impl Into<String>,
        variant: AdVariant,
        renderer: Arc<dyn AdRenderer>,
    ) -> TrackerResult<Arc<AdSlot>> {
        let slot = Arc::new(AdSlot::new(self.ctx.clone(), slot_id, variant, renderer)?);
        let track_id = {
            let mut state = self.lock_state();
            if state.shut_down {
                return Err(TrackerError::SubjectClosed(format!("adDisplay:{}", slot.slot_id())));
            }
            state.slots.push(slot.clone());
            let track_id = state.handshake.track_id().map(str::to_string);
            if track_id.is_none() {
                state.pending.push(slot.clone());
            }
            track_id
        };

        match track_id {
            Some(track_id) => self.activate_slot(&slot, &track_id).await,
            None => log_debug!("ad slot {} waiting for tracker", slot.slot_id()),
        }
        Ok(slot)
    }

    /// Takes a slot off the page and finalizes it. A slot still waiting for
    /// `ready` is dropped from the queue and never registers. Returns `false`
    /// when no slot with that id is placed.
    pub async fn remove_ad_slot(&self, slot_id: &str) -> bool {
        let slot = {
            let mut state = self.lock_state();
            let Some(index) = state.slots.iter().position(|slot| slot.slot_id() == slot_id) else {
                return false;
            };
            let slot = state.slots.remove(index);
            state.pending.retain(|pending| !Arc::ptr_eq(pending, &slot));
            slot
        };
        log_debug!("removing ad slot {slot_id}");
        slot.finalize().await;
        true
    }

    /// Forwards a category signal to the tracker frame when it differs from
    /// the last one seen. Returns whether a message was sent.
    pub fn observe_category(&self, category: Option<String>) -> bool {
        let category = normalize_category(category);
        {
            let mut state = self.lock_state();
            if state.shut_down || state.category == category {
                return false;
            }
            state.category = category.clone();
        }

        let message = ChannelMessage::CategoryChanged { category };
        if let Err(err) = self.channel.send(&message) {
            log_warn!("failed to forward category change: {err:#}");
            return false;
        }
        true
    }

    /// Follows the page's category signal until cancelled, the sender
    /// closes or the host shuts down. Replaces any previous watcher.
    pub fn watch_category(self: &Arc<Self>, mut categories: watch::Receiver<Option<String>>) -> CancelHandle {
        let handle = CancelHandle::new();
        let token = handle.token();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let initial = categories.borrow_and_update().clone();
            this.observe_category(initial);
            loop {
                tokio::select! {
                    changed = categories.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = categories.borrow_and_update().clone();
                        this.observe_category(current);
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        let mut watcher = match self.watcher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = watcher.replace(handle.clone()) {
            previous.cancel();
        }
        handle
    }

    pub async fn set_document_visible(&self, visible: bool) {
        let slots = {
            let mut state = self.lock_state();
            state.document_visible = visible;
            state.slots.clone()
        };
        join_all(slots.iter().map(|slot| slot.set_document_visible(visible))).await;
    }

    /// Stops the category watcher and finalizes every ad slot.
    pub async fn shutdown(&self) {
        let watcher = match self.watcher.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(watcher) = watcher {
            watcher.cancel();
        }

        let slots = {
            let mut state = self.lock_state();
            state.shut_down = true;
            state.pending.clear();
            std::mem::take(&mut state.slots)
        };
        log_info!("shutting down host page with {} ad slot(s)", slots.len());
        join_all(slots.iter().map(|slot| slot.finalize())).await;
    }
}
