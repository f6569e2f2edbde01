use std::fmt;

use url::Url;

use crate::error::{TrackerError, TrackerResult};

/// A tuple origin (`scheme://host[:port]`) as used by window messaging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    /// Parses an origin or any URL and keeps only its origin part.
    pub fn parse(input: &str) -> TrackerResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TrackerError::invalid("origin", "blank origin"));
        }
        let url = Url::parse(trimmed)
            .map_err(|err| TrackerError::invalid("origin", format!("{trimmed}: {err}")))?;
        Self::of_url(&url)
    }

    pub fn of_url(url: &Url) -> TrackerResult<Self> {
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(TrackerError::invalid(
                "origin",
                format!("{url} has an opaque origin"),
            ));
        }
        Ok(Self(origin.ascii_serialization()))
    }

    /// Exact comparison against an origin string as reported by the
    /// messaging layer. No normalization is applied to `declared`.
    pub fn matches(&self, declared: &str) -> bool {
        self.0 == declared
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
