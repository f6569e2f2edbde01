//! Origin-pinned messaging between the host page and the tracker frame.
//!
//! Each side knows its counterpart's origin up front. Inbound messages from
//! any other origin are dropped without a reply or side effect.

pub mod message;
pub mod origin;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use message::ChannelMessage;
pub use origin::Origin;

use crate::error::{TrackerError, TrackerResult};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// The `postMessage` capability of the embedding runtime.
pub trait FramePort: Send + Sync {
    fn post_message(&self, payload: &str, target_origin: &Origin) -> Result<()>;
}

#[derive(Clone)]
pub struct CrossFrameChannel {
    counterpart: Origin,
    port: Arc<dyn FramePort>,
}

impl std::fmt::Debug for CrossFrameChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossFrameChannel")
            .field("counterpart", &self.counterpart)
            .finish_non_exhaustive()
    }
}

impl CrossFrameChannel {
    pub fn new(counterpart: Origin, port: Arc<dyn FramePort>) -> Self {
        Self { counterpart, port }
    }

    pub fn counterpart(&self) -> &Origin {
        &self.counterpart
    }

    pub fn send(&self, message: &ChannelMessage) -> Result<()> {
        let payload = serde_json::to_string(message)
            .with_context(|| format!("failed to encode {} message", message.kind()))?;
        self.port
            .post_message(&payload, &self.counterpart)
            .with_context(|| format!("failed to post {} to {}", message.kind(), self.counterpart))
    }

    /// Validates and decodes an inbound message.
    pub fn accept(&self, origin: &str, payload: &str) -> TrackerResult<ChannelMessage> {
        if !self.counterpart.matches(origin) {
            return Err(TrackerError::OriginRejected(origin.to_string()));
        }
        serde_json::from_str(payload)
            .map_err(|err| TrackerError::invalid("message", err.to_string()))
    }

    /// Like [`accept`](Self::accept), but failures vanish: foreign origins
    /// are never answered, and malformed payloads are only logged.
    pub fn receive(&self, origin: &str, payload: &str) -> Option<ChannelMessage> {
        match self.accept(origin, payload) {
            Ok(message) => Some(message),
            Err(TrackerError::OriginRejected(_)) => None,
            Err(err) => {
                log_warn!("dropping message from {origin}: {err}");
                None
            }
        }
    }
}

/// Host-side view of the readiness handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    AwaitingReady,
    Ready {
        track_id: String,
    },
}

impl HandshakeState {
    pub fn track_id(&self) -> Option<&str> {
        match self {
            HandshakeState::Ready { track_id } => Some(track_id),
            HandshakeState::AwaitingReady => None,
        }
    }

    /// Records `ready`. Returns `false` for repeats, which change nothing.
    pub fn observe_ready(&mut self, track_id: String) -> bool {
        match self {
            HandshakeState::AwaitingReady if !track_id.is_empty() => {
                *self = HandshakeState::Ready { track_id };
                true
            }
            HandshakeState::AwaitingReady => {
                log_debug!("ignoring ready without track id");
                false
            }
            HandshakeState::Ready { .. } => false,
        }
    }
}
