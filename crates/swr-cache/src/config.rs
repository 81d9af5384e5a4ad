use std::time::Duration;

use serde::Deserialize;

use crate::error::SwrError;

/// The freshness window used when none is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// The sweep period used when none is configured.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Timing options of a [`SwrCache`](crate::SwrCache).
///
/// Durations are given in humantime format when deserialized, e.g. `ttl: 30s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a resolved value is considered fresh.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How often all entries are swept for staleness.
    ///
    /// This has to be strictly larger than [`ttl`](Self::ttl).
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl CacheConfig {
    /// Checks that the options can be used to construct a cache.
    pub fn validate(&self) -> Result<(), SwrError> {
        if self.refresh_interval <= self.ttl {
            return Err(SwrError::Config(format!(
                "`refresh_interval` ({:?}) must be larger than `ttl` ({:?})",
                self.refresh_interval, self.ttl
            )));
        }
        Ok(())
    }
}
