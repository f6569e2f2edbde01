use thiserror::Error;

use crate::api::ApiError;

/// Failures surfaced by the tracking core.
///
/// Network and storage trouble during normal operation is absorbed and
/// logged; only registration failures and setup errors reach callers.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Remote register call failed; the subject stays inert.
    #[error("registration failed: {0}")]
    RegistrationFailed(#[source] ApiError),
    /// Periodic or triggered update failed; accrual continues locally.
    #[error("sync failed: {0}")]
    SyncFailed(#[source] ApiError),
    /// Stored snapshot could not be parsed.
    #[error("cache entry {key} is corrupt: {reason}")]
    CacheCorrupt { key: String, reason: String },
    /// Inbound cross-frame message from an origin other than the pinned one.
    #[error("message from unexpected origin {0}")]
    OriginRejected(String),
    /// Missing or malformed setup parameter.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameters { name: &'static str, reason: String },
    #[error("{0} is already initialized in this context")]
    DuplicateInitialization(&'static str),
    #[error("subject {0} is closed")]
    SubjectClosed(String),
}

impl TrackerError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        TrackerError::InvalidParameters {
            name,
            reason: reason.into(),
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
