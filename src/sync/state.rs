use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    cache::CacheRecord,
    clock::Clock,
    error::{TrackerError, TrackerResult},
    models::Subject,
    timer::{AccrualState, DurationAccumulator},
    visibility::{GateTransition, VisibilityGate, VisibilitySignals},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    #[default]
    Unregistered,
    Registering,
    Active,
    Suspended,
    Finalizing,
    Closed,
}

impl SyncState {
    pub fn is_live(&self) -> bool {
        matches!(self, SyncState::Active | SyncState::Suspended)
    }
}

/// What caused a sync to be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Tick,
    /// Click or explicit flush, sent only outside the debounce window.
    Immediate,
    /// The gate closed. The next immediate sync may follow it at once.
    AttentionLoss,
    Final,
}

/// One update call to issue. Always carries the absolute duration so the
/// backend can apply it last-write-wins.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub subject: Subject,
    pub remote_id: String,
    pub duration: f64,
    pub clicked: bool,
    pub trigger: SyncTrigger,
    pub issued_at_ms: i64,
}

/// Effect of a gate signal on the subject.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub transition: GateTransition,
    pub sync: Option<SyncRequest>,
}

impl GateOutcome {
    fn unchanged() -> Self {
        Self {
            transition: GateTransition::Unchanged,
            sync: None,
        }
    }
}

/// Synchronous core of one tracked subject: accrual, gating and the
/// registration/sync state machine. The async controller drives it and
/// performs the I/O it asks for.
pub struct SubjectTracker {
    subject: Subject,
    state: SyncState,
    accumulator: DurationAccumulator,
    gate: VisibilityGate,
    clock: Arc<dyn Clock>,
    debounce_ms: u64,
    last_sync_issued_ms: Option<i64>,
    last_trigger: Option<SyncTrigger>,
    acked_duration: Option<f64>,
    clicked: bool,
    registration_failed: bool,
}

impl fmt::Debug for SubjectTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectTracker")
            .field("subject", &self.subject)
            .field("state", &self.state)
            .field("accrual", &self.accumulator.state())
            .field("last_sync_issued_ms", &self.last_sync_issued_ms)
            .field("acked_duration", &self.acked_duration)
            .finish_non_exhaustive()
    }
}

impl SubjectTracker {
    pub fn new(subject: Subject, gate: VisibilityGate, clock: Arc<dyn Clock>, debounce_ms: u64) -> Self {
        Self {
            subject,
            state: SyncState::Unregistered,
            accumulator: DurationAccumulator::new(clock.clone()),
            gate,
            clock,
            debounce_ms,
            last_sync_issued_ms: None,
            last_trigger: None,
            acked_duration: None,
            clicked: false,
            registration_failed: false,
        }
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn elapsed(&self) -> f64 {
        self.accumulator.elapsed()
    }

    pub fn accrual(&self) -> AccrualState {
        self.accumulator.state()
    }

    pub fn is_accruing(&self) -> bool {
        self.accumulator.is_active()
    }

    pub fn registration_failed(&self) -> bool {
        self.registration_failed
    }

    pub fn clicked(&self) -> bool {
        self.clicked
    }

    pub fn acked_duration(&self) -> Option<f64> {
        self.acked_duration
    }

    pub fn begin_registration(&mut self) -> TrackerResult<()> {
        match self.state {
            SyncState::Unregistered => {
                self.state = SyncState::Registering;
                Ok(())
            }
            SyncState::Finalizing | SyncState::Closed => {
                Err(TrackerError::SubjectClosed(self.subject.label()))
            }
            _ => Err(TrackerError::DuplicateInitialization("subject registration")),
        }
    }

    /// Applies a successful register response. Returns `false` when the
    /// subject was finalized while the call was in flight.
    pub fn complete_registration(&mut self, remote_id: String) -> bool {
        if self.state != SyncState::Registering {
            return false;
        }
        self.subject.remote_id = Some(remote_id);
        self.accumulator.reset(0.0);
        self.activate();
        true
    }

    pub fn fail_registration(&mut self) {
        if self.state == SyncState::Registering {
            self.registration_failed = true;
        }
    }

    /// Adopts a fresh cache record instead of registering. No sync is
    /// planned; the first one comes from the gate or the ticker.
    pub fn resume(&mut self, record: &CacheRecord) -> bool {
        if self.state != SyncState::Unregistered {
            return false;
        }
        self.subject.remote_id = Some(record.remote_id.clone());
        self.accumulator.reset(record.duration);
        self.acked_duration = Some(record.duration);
        self.activate();
        true
    }

    fn activate(&mut self) {
        self.gate.set_registered(true);
        if self.gate.should_accrue() {
            self.accumulator.start();
            self.state = SyncState::Active;
        } else {
            self.state = SyncState::Suspended;
        }
    }

    pub fn set_intersection(&mut self, ratio: f64) -> GateOutcome {
        let transition = self.gate.set_intersection(ratio);
        self.on_transition(transition)
    }

    pub fn set_document_visible(&mut self, visible: bool) -> GateOutcome {
        let transition = self.gate.set_document_visible(visible);
        self.on_transition(transition)
    }

    pub fn set_media_active(&mut self, active: bool) -> GateOutcome {
        let transition = self.gate.set_media_active(active);
        self.on_transition(transition)
    }

    pub fn apply_signals(&mut self, signals: VisibilitySignals) -> GateOutcome {
        let transition = self.gate.apply(signals);
        self.on_transition(transition)
    }

    fn on_transition(&mut self, transition: GateTransition) -> GateOutcome {
        if !self.state.is_live() {
            return GateOutcome::unchanged();
        }
        match transition {
            GateTransition::Opened => {
                self.accumulator.start();
                self.state = SyncState::Active;
                GateOutcome {
                    transition,
                    sync: None,
                }
            }
            GateTransition::Closed => {
                self.accumulator.stop();
                self.state = SyncState::Suspended;
                GateOutcome {
                    transition,
                    sync: self.issue(SyncTrigger::AttentionLoss),
                }
            }
            GateTransition::Unchanged => GateOutcome::unchanged(),
        }
    }

    /// Periodic tick: syncs unless another sync was issued inside the
    /// debounce window.
    pub fn plan_tick(&mut self) -> Option<SyncRequest> {
        if self.state != SyncState::Active {
            return None;
        }
        if self.within_debounce() {
            return None;
        }
        self.issue(SyncTrigger::Tick)
    }

    fn within_debounce(&self) -> bool {
        let Some(last) = self.last_sync_issued_ms else {
            return false;
        };
        let since = self.clock.now_ms().saturating_sub(last);
        since >= 0 && (since as u64) < self.debounce_ms
    }

    /// Click or flush. Sends right away only outside the debounce window or
    /// right after an attention-loss sync; otherwise the next tick carries
    /// the state.
    pub fn plan_immediate(&mut self) -> TrackerResult<Option<SyncRequest>> {
        let state = self.state;
        match state {
            SyncState::Closed | SyncState::Finalizing => {
                Err(TrackerError::SubjectClosed(self.subject.label()))
            }
            SyncState::Active | SyncState::Suspended => {
                let after_attention_loss = self.last_trigger == Some(SyncTrigger::AttentionLoss);
                if self.within_debounce() && !after_attention_loss {
                    return Ok(None);
                }
                Ok(self.issue(SyncTrigger::Immediate))
            }
            SyncState::Unregistered | SyncState::Registering => Ok(None),
        }
    }

    pub fn record_click(&mut self) -> TrackerResult<Option<SyncRequest>> {
        if matches!(self.state, SyncState::Closed | SyncState::Finalizing) {
            return Err(TrackerError::SubjectClosed(self.subject.label()));
        }
        self.clicked = true;
        self.plan_immediate()
    }

    fn issue(&mut self, trigger: SyncTrigger) -> Option<SyncRequest> {
        let remote_id = self.subject.remote_id.clone().filter(|id| !id.is_empty())?;
        let now = self.clock.now_ms();
        self.last_sync_issued_ms = Some(now);
        self.last_trigger = Some(trigger);
        Some(SyncRequest {
            subject: self.subject.clone(),
            remote_id,
            duration: self.accumulator.elapsed(),
            clicked: self.clicked,
            trigger,
            issued_at_ms: now,
        })
    }

    /// Records an acknowledged sync. Returns the duration to mirror into the
    /// cache, or `None` when the result is stale: the subject moved on, or a
    /// larger duration was already acknowledged.
    pub fn complete_sync(&mut self, request: &SyncRequest) -> Option<f64> {
        if !self.state.is_live() {
            return None;
        }
        if self.subject.remote_id.as_deref() != Some(request.remote_id.as_str()) {
            return None;
        }
        if self.acked_duration.is_some_and(|acked| acked > request.duration) {
            return None;
        }
        self.acked_duration = Some(request.duration);
        Some(request.duration)
    }

    /// Stops accrual and enters `Finalizing`. Returns the last sync to send,
    /// if the subject ever got a remote id.
    pub fn begin_finalize(&mut self) -> TrackerResult<Option<SyncRequest>> {
        match self.state {
            SyncState::Closed => return Err(TrackerError::SubjectClosed(self.subject.label())),
            SyncState::Finalizing => return Ok(None),
            _ => {}
        }
        self.accumulator.stop();
        self.state = SyncState::Finalizing;
        Ok(self.issue(SyncTrigger::Final))
    }

    pub fn close(&mut self) {
        self.accumulator.stop();
        self.state = SyncState::Closed;
    }
}
