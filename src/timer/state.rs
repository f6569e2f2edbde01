use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccrualState {
    /// Time committed from earlier active windows; combines with
    /// `active_since_ms` to compute the true elapsed duration.
    pub accumulated_ms: u64,
    pub active_since_ms: Option<i64>,
}

impl AccrualState {
    pub fn elapsed_ms_at(&self, now_ms: i64) -> u64 {
        match self.active_since_ms {
            Some(anchor) => self
                .accumulated_ms
                .saturating_add(window_ms(anchor, now_ms)),
            None => self.accumulated_ms,
        }
    }
}

fn window_ms(anchor_ms: i64, now_ms: i64) -> u64 {
    u64::try_from(now_ms.saturating_sub(anchor_ms)).unwrap_or(0)
}

/// Pause/resume accrual. Every call is safe in any order; redundant
/// `start`/`stop` calls never change the result.
#[derive(Clone)]
pub struct DurationAccumulator {
    state: AccrualState,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for DurationAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurationAccumulator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DurationAccumulator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AccrualState::default(),
            clock,
        }
    }

    pub fn start(&mut self) {
        if self.state.active_since_ms.is_none() {
            self.state.active_since_ms = Some(self.clock.now_ms());
        }
    }

    pub fn stop(&mut self) {
        if let Some(anchor) = self.state.active_since_ms.take() {
            let window = window_ms(anchor, self.clock.now_ms());
            self.state.accumulated_ms = self.state.accumulated_ms.saturating_add(window);
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.active_since_ms.is_some()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.state.elapsed_ms_at(self.clock.now_ms())
    }

    /// Total duration in seconds.
    pub fn elapsed(&self) -> f64 {
        self.elapsed_ms() as f64 / 1000.0
    }

    /// Only for cache resumption or a brand-new subject.
    pub fn reset(&mut self, to_seconds: f64) {
        let seconds = if to_seconds.is_finite() {
            to_seconds.max(0.0)
        } else {
            0.0
        };
        self.state = AccrualState {
            accumulated_ms: (seconds * 1000.0).round() as u64,
            active_since_ms: None,
        };
    }

    pub fn state(&self) -> AccrualState {
        self.state
    }
}
