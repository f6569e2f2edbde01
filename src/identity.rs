use uuid::Uuid;

use crate::cache::SessionStore;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Returns the visitor's persisted track id, minting and storing a UUID v4
/// when none exists. A store that cannot be read or written still yields a
/// usable (unpersisted) id.
pub fn resolve_track_id(store: &dyn SessionStore, key: &str) -> String {
    match store.get(key) {
        Ok(Some(existing)) if !existing.trim().is_empty() => return existing,
        Ok(_) => {}
        Err(err) => log_warn!("failed to read track id: {err:#}"),
    }

    let track_id = Uuid::new_v4().to_string();
    match store.set(key, &track_id) {
        Ok(()) => log_info!("issued new track id"),
        Err(err) => log_warn!("track id could not be persisted: {err:#}"),
    }
    track_id
}
