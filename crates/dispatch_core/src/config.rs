//! Tunables for the clock and scheduler, loadable from TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Handlers executed in one synchronous pass before the rest of a due batch
/// is deferred to the next host turn.
pub const DEFAULT_BURST_LIMIT: usize = 1000;

/// Divisor floor when converting simulation delays to real delays.
pub const DEFAULT_MIN_SPEED: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// `None` drains every due event in one pass, even on timer fires.
    pub burst_limit: Option<usize>,
    /// Floor applied to the clock speed in `dt_sim / speed`.
    pub min_speed: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            burst_limit: Some(DEFAULT_BURST_LIMIT),
            min_speed: DEFAULT_MIN_SPEED,
        }
    }
}

impl SchedulerConfig {
    pub fn with_burst_limit(mut self, limit: Option<usize>) -> Self {
        self.burst_limit = limit.map(|n| n.max(1));
        self
    }

    pub fn with_min_speed(mut self, min_speed: f64) -> Self {
        self.min_speed = if min_speed > 0.0 {
            min_speed
        } else {
            DEFAULT_MIN_SPEED
        };
        self
    }
}

/// Initial state of a [crate::clock::VirtualClock].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub start_ms: f64,
    pub speed: f64,
    pub paused: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start_ms: 0.0,
            speed: 1.0,
            paused: true,
        }
    }
}

impl ClockConfig {
    pub fn with_start_ms(mut self, start_ms: f64) -> Self {
        self.start_ms = start_ms;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed.max(0.0);
        self
    }

    pub fn playing(mut self) -> Self {
        self.paused = false;
        self
    }
}

/// `[clock]` and `[scheduler]` tables of a core config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub clock: ClockConfig,
    pub scheduler: SchedulerConfig,
}

impl CoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
