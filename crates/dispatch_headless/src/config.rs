//! Scenario parameters for a headless training run, loadable from TOML.

use std::path::Path;

use dispatch_core::config::SchedulerConfig;
use dispatch_core::error::ConfigError;
use serde::{Deserialize, Serialize};

use crate::route::{GeoPoint, RouteConfig};

const MINUTE_MS: f64 = 60_000.0;
const HOUR_MS: f64 = 60.0 * MINUTE_MS;

/// Bounding box calls and vehicle bases are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Region {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl Default for Region {
    fn default() -> Self {
        Self {
            lat_min: 48.12,
            lat_max: 48.32,
            lng_min: 16.18,
            lng_max: 16.58,
        }
    }
}

impl Region {
    /// Bounds must be finite and non-inverted; a degenerate box (min == max)
    /// is allowed and pins every point to one line.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [self.lat_min, self.lat_max, self.lng_min, self.lng_max];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(invalid(format!("region bounds must be finite, got {self:?}")));
        }
        if self.lat_min > self.lat_max {
            return Err(invalid(format!(
                "region lat_min {} exceeds lat_max {}",
                self.lat_min, self.lat_max
            )));
        }
        if self.lng_min > self.lng_max {
            return Err(invalid(format!(
                "region lng_min {} exceeds lng_max {}",
                self.lng_min, self.lng_max
            )));
        }
        Ok(())
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.lat_min + self.lat_max) * 0.5,
            (self.lng_min + self.lng_max) * 0.5,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub seed: u64,
    pub vehicles: usize,
    /// Mean rate of incoming calls (Poisson process).
    pub calls_per_hour: f64,
    /// Simulation time after which no new calls arrive. Missions already
    /// under way still finish.
    pub duration_ms: f64,
    /// Call-taking time before a triaged call can be dispatched.
    pub triage_delay_ms: f64,
    /// Wait before retrying triage when no vehicle is available.
    pub retry_delay_ms: f64,
    pub on_scene_ms: f64,
    /// Clock speed for realtime runs.
    pub speed: f64,
    pub region: Region,
    pub route: RouteConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            vehicles: 12,
            calls_per_hour: 30.0,
            duration_ms: 4.0 * HOUR_MS,
            triage_delay_ms: 90_000.0,
            retry_delay_ms: MINUTE_MS,
            on_scene_ms: 20.0 * MINUTE_MS,
            speed: 60.0,
            region: Region::default(),
            route: RouteConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ScenarioConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would panic while seeding the store or keep a run
    /// from reaching its horizon.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.region.validate()?;
        if !(self.calls_per_hour.is_finite() && self.calls_per_hour >= 0.0) {
            return Err(invalid(format!(
                "calls_per_hour must be finite and non-negative, got {}",
                self.calls_per_hour
            )));
        }
        if !(self.duration_ms.is_finite() && self.duration_ms >= 0.0) {
            return Err(invalid(format!(
                "duration_ms must be finite and non-negative, got {}",
                self.duration_ms
            )));
        }
        // A retry at the current instant would chain forever within one pass.
        if !(self.retry_delay_ms.is_finite() && self.retry_delay_ms > 0.0) {
            return Err(invalid(format!(
                "retry_delay_ms must be positive, got {}",
                self.retry_delay_ms
            )));
        }
        for (name, value) in [
            ("triage_delay_ms", self.triage_delay_ms),
            ("on_scene_ms", self.on_scene_ms),
            ("route.min_duration_ms", self.route.min_duration_ms),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if !(self.route.speed_kmh.is_finite() && self.route.speed_kmh > 0.0) {
            return Err(invalid(format!(
                "route.speed_kmh must be positive, got {}",
                self.route.speed_kmh
            )));
        }
        if !self.speed.is_finite() {
            return Err(invalid(format!("speed must be finite, got {}", self.speed)));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_vehicles(mut self, vehicles: usize) -> Self {
        self.vehicles = vehicles;
        self
    }

    pub fn with_calls_per_hour(mut self, rate: f64) -> Self {
        self.calls_per_hour = rate.max(0.0);
        self
    }

    /// Set the call window in minutes.
    pub fn with_duration_minutes(mut self, minutes: f64) -> Self {
        self.duration_ms = minutes.max(0.0) * MINUTE_MS;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed.max(0.0);
        self
    }

    /// Mean gap between calls in ms; infinite when no calls are generated.
    pub fn mean_call_gap_ms(&self) -> f64 {
        if self.calls_per_hour <= 0.0 {
            f64::INFINITY
        } else {
            HOUR_MS / self.calls_per_hour
        }
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}
