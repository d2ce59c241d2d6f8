//! Sketch configuration.
//!
//! `SketchConfig` controls how a [`Sketch`](crate::sketch::Sketch) waits for
//! its host, how many converted images it keeps, and which callbacks are timed
//! from the moment the sketch starts.
//!
//! `SketchConfig` provides defaults via [`Default`], a fluent
//! [`SketchConfig::builder()`] with validation, and can be read from the
//! environment or a JSON file.
//!
//! # Examples
//!
//! ```rust
//! use sketch_bridge::config::SketchConfig;
//! use sketch_bridge::event::SketchEvent;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = SketchConfig::builder()
//!     .poll_interval_ms(100)
//!     .image_cache_capacity(64)
//!     .profile(SketchEvent::Draw)
//!     .build()?;
//! assert_eq!(cfg.poll_interval().as_millis(), 100);
//! # Ok(()) }
//! ```
//!
//! # Fields
//! - `poll_interval_ms`: how often a blocking `run` checks whether the host stopped (default: 250).
//! - `image_cache_capacity`: maximum number of cached images, `None` for unbounded (default: `None`).
//! - `profile`: callbacks to time from the start of the run (default: none).
//!
//! # Environment
//! - `SKETCH_POLL_INTERVAL_MS`
//! - `SKETCH_IMAGE_CACHE_CAPACITY` (`0` or unparsable values are ignored)

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::errors::BridgeError;
use crate::event::SketchEvent;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

const ENV_POLL_INTERVAL: &str = "SKETCH_POLL_INTERVAL_MS";
const ENV_IMAGE_CACHE_CAPACITY: &str = "SKETCH_IMAGE_CACHE_CAPACITY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SketchConfig {
    pub poll_interval_ms: u64,
    pub image_cache_capacity: Option<usize>,
    pub profile: Vec<SketchEvent>,
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            image_cache_capacity: None,
            profile: Vec::new(),
        }
    }
}

impl SketchConfig {
    pub fn builder() -> SketchConfigBuilder {
        SketchConfigBuilder::default()
    }

    /// Polling period for `run(true)` and `wait_stopped`, never shorter than 1 ms.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Capacity of the image cache, `None` when unbounded.
    pub fn image_cache_capacity(&self) -> Option<NonZeroUsize> {
        self.image_cache_capacity.and_then(NonZeroUsize::new)
    }

    /// Defaults overridden by any `SKETCH_*` environment variables that are set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(ms) = env_number(ENV_POLL_INTERVAL).filter(|&n| n > 0) {
            cfg.poll_interval_ms = ms as u64;
        }
        if let Some(cap) = env_number(ENV_IMAGE_CACHE_CAPACITY).filter(|&n| n > 0) {
            cfg.image_cache_capacity = Some(cap);
        }

        cfg
    }

    /// Reads and validates a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let cfg: SketchConfig = crate::json::load_json(path)?;
        validate(&cfg)?;
        Ok(cfg)
    }
}

fn env_number(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<usize>().ok())
}

/// Builder for [`SketchConfig`].
#[derive(Debug, Clone, Default)]
pub struct SketchConfigBuilder {
    inner: SketchConfig,
}

impl SketchConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut SketchConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn poll_interval_ms(self, ms: u64) -> Self { self.map(|c| c.poll_interval_ms = ms) }
    pub fn poll_interval(self, interval: Duration) -> Self { self.map(|c| c.poll_interval_ms = interval.as_millis() as u64) }
    pub fn image_cache_capacity(self, n: usize) -> Self { self.map(|c| c.image_cache_capacity = Some(n)) }
    pub fn unbounded_image_cache(self) -> Self { self.map(|c| c.image_cache_capacity = None) }
    pub fn profile(self, event: SketchEvent) -> Self { self.map(|c| c.profile.push(event)) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut SketchConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<SketchConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    ZeroPollInterval,
    ZeroCacheCapacity,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroPollInterval =>
                write!(f, "poll_interval_ms must be at least 1"),
            ConfigError::ZeroCacheCapacity =>
                write!(f, "image_cache_capacity must be at least 1 (omit it for an unbounded cache)"),
        }
    }
}
impl std::error::Error for ConfigError {}

pub(crate) fn validate(c: &SketchConfig) -> Result<(), ConfigError> {
    if c.poll_interval_ms == 0 {
        return Err(ConfigError::ZeroPollInterval);
    }
    if c.image_cache_capacity == Some(0) {
        return Err(ConfigError::ZeroCacheCapacity);
    }
    Ok(())
}
