use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

pub const MIN_AD_THRESHOLD: f64 = 0.5;
pub const MAX_AD_THRESHOLD: f64 = 1.0;

/// Raw signals feeding the gate, as delivered by the page's observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisibilitySignals {
    pub intersection_ratio: f64,
    pub document_visible: bool,
}

impl Default for VisibilitySignals {
    fn default() -> Self {
        Self {
            intersection_ratio: 0.0,
            document_visible: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    Opened,
    Closed,
    Unchanged,
}

/// Combines intersection, document visibility, registration and media
/// playback into a single `should_accrue` flag. Transitions are reported
/// on edges only, so a repeated signal never restarts or re-syncs anything.
#[derive(Debug, Clone)]
pub struct VisibilityGate {
    /// `None` for page-view subjects, which have no intersection input.
    threshold: Option<f64>,
    intersection_ratio: f64,
    document_visible: bool,
    has_remote_id: bool,
    media_active: bool,
    open: bool,
}

impl VisibilityGate {
    pub fn for_page_view(document_visible: bool) -> Self {
        Self {
            threshold: None,
            intersection_ratio: 0.0,
            document_visible,
            has_remote_id: false,
            media_active: true,
            open: false,
        }
    }

    pub fn for_ad_slot(threshold: f64) -> TrackerResult<Self> {
        if !(MIN_AD_THRESHOLD..=MAX_AD_THRESHOLD).contains(&threshold) {
            return Err(TrackerError::invalid(
                "threshold",
                format!("{threshold} outside [{MIN_AD_THRESHOLD}, {MAX_AD_THRESHOLD}]"),
            ));
        }
        Ok(Self {
            threshold: Some(threshold),
            intersection_ratio: 0.0,
            document_visible: true,
            has_remote_id: false,
            media_active: true,
            open: false,
        })
    }

    /// Playback-gated gate for video ads: accrues only while playing, with
    /// no viewport requirement.
    pub fn for_media() -> Self {
        Self {
            threshold: None,
            intersection_ratio: 0.0,
            document_visible: true,
            has_remote_id: false,
            media_active: false,
            open: false,
        }
    }

    pub fn should_accrue(&self) -> bool {
        self.open
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn set_intersection(&mut self, ratio: f64) -> GateTransition {
        self.intersection_ratio = if ratio.is_finite() { ratio } else { 0.0 };
        self.recompute()
    }

    pub fn set_document_visible(&mut self, visible: bool) -> GateTransition {
        self.document_visible = visible;
        self.recompute()
    }

    pub fn set_registered(&mut self, registered: bool) -> GateTransition {
        self.has_remote_id = registered;
        self.recompute()
    }

    pub fn set_media_active(&mut self, active: bool) -> GateTransition {
        self.media_active = active;
        self.recompute()
    }

    pub fn apply(&mut self, signals: VisibilitySignals) -> GateTransition {
        self.intersection_ratio = if signals.intersection_ratio.is_finite() {
            signals.intersection_ratio
        } else {
            0.0
        };
        self.document_visible = signals.document_visible;
        self.recompute()
    }

    fn evaluate(&self) -> bool {
        let intersecting = match self.threshold {
            Some(threshold) => self.intersection_ratio >= threshold,
            None => true,
        };
        intersecting && self.document_visible && self.has_remote_id && self.media_active
    }

    fn recompute(&mut self) -> GateTransition {
        let next = self.evaluate();
        let transition = match (self.open, next) {
            (false, true) => GateTransition::Opened,
            (true, false) => GateTransition::Closed,
            _ => GateTransition::Unchanged,
        };
        self.open = next;
        transition
    }
}
