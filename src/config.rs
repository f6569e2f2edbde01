use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const PRODUCTION_SYNC_INTERVAL_MS: u64 = 5_000;
pub const DEBUG_SYNC_INTERVAL_MS: u64 = 500;
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;
pub const DEFAULT_FRESHNESS_MS: u64 = 5 * 60 * 1_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Base URL of the tracking backend; relative media URLs resolve against it.
    pub api_host: String,
    pub debug: bool,
    /// Explicit tick interval. When absent it follows `debug`.
    pub sync_interval_ms: Option<u64>,
    pub debounce_ms: u64,
    pub freshness_ms: u64,
    pub cache_prefix: String,
    pub track_id_key: String,
    pub ad_visibility_threshold: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_host: "http://localhost:8080/api".into(),
            debug: false,
            sync_interval_ms: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            freshness_ms: DEFAULT_FRESHNESS_MS,
            cache_prefix: "adflux".into(),
            track_id_key: "AdFluxTrackId".into(),
            ad_visibility_threshold: 0.5,
        }
    }
}

impl TrackerConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tracker config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse tracker config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays `ADFLUX_DEBUG` and `ADFLUX_API_HOST` onto `self`.
    pub fn with_env(mut self) -> Self {
        if let Ok(value) = std::env::var("ADFLUX_DEBUG") {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Ok(host) = std::env::var("ADFLUX_API_HOST") {
            if !host.trim().is_empty() {
                self.api_host = host;
            }
        }
        self
    }

    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_host.trim().is_empty() {
            bail!("apiHost must not be empty");
        }
        if self.debounce_ms == 0 {
            bail!("debounceMs must be greater than zero");
        }
        if self.freshness_ms == 0 {
            bail!("freshnessMs must be greater than zero");
        }
        if matches!(self.sync_interval_ms, Some(0)) {
            bail!("syncIntervalMs must be greater than zero");
        }
        if !(0.5..=1.0).contains(&self.ad_visibility_threshold) {
            bail!(
                "adVisibilityThreshold {} outside [0.5, 1.0]",
                self.ad_visibility_threshold
            );
        }
        if self.cache_prefix.trim().is_empty() {
            bail!("cachePrefix must not be empty");
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        let ms = self.sync_interval_ms.unwrap_or(if self.debug {
            DEBUG_SYNC_INTERVAL_MS
        } else {
            PRODUCTION_SYNC_INTERVAL_MS
        });
        Duration::from_millis(ms)
    }
}
