//! Module-gated logging macros, all routed to the `adflux` log target.
//!
//! Usage:
//! ```ignore
//! // Each calling module defines the switch:
//! const ENABLE_LOGS: bool = true;
//!
//! // The macros are exported at the crate root:
//! use crate::{log_debug, log_info, log_warn, log_error};
//!
//! log_info!("subject {} registered", subject_id);
//! ```
//!
//! Silencing a module only needs the const flipped to `false`; the
//! `RUST_LOG` filter set up by [`crate::init_logging`] still applies on top.

/// Target shared by every record emitted through these macros.
pub const LOG_TARGET: &str = "adflux";

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!(target: $crate::utils::logging::LOG_TARGET, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!(target: $crate::utils::logging::LOG_TARGET, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!(target: $crate::utils::logging::LOG_TARGET, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!(target: $crate::utils::logging::LOG_TARGET, $($arg)*);
        }
    };
}
