//! Route estimation for dispatched vehicles.
//!
//! Estimates are an async dependency of the `VehicleDispatched` handler: the
//! handler spawns the lookup and schedules arrival once it resolves, so a slow
//! estimator never holds up the rest of the event batch. The default
//! [StraightLineEstimator] resolves immediately from haversine distance.

use std::fmt;

use anyhow::ensure;
use futures::future::{self, LocalBoxFuture};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A point on the map, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lon1) = (self.lat.to_radians(), self.lng.to_radians());
        let (lat2, lon2) = (other.lat.to_radians(), other.lng.to_radians());
        let sin_dlat = ((lat2 - lat1) * 0.5).sin();
        let sin_dlon = ((lon2 - lon1) * 0.5).sin();
        let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
        let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
        EARTH_RADIUS_KM * c
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lng)
    }
}

/// Result of a route query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteEstimate {
    /// Road distance in kilometres.
    pub distance_km: f64,
    /// Travel time in simulation milliseconds.
    pub duration_ms: f64,
}

/// Routing backend. Futures run on the scheduler's host, so they need not be
/// `Send`.
pub trait RouteEstimator {
    fn estimate(&self, from: GeoPoint, to: GeoPoint)
        -> LocalBoxFuture<'static, anyhow::Result<RouteEstimate>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Average emergency driving speed.
    pub speed_kmh: f64,
    /// Road distance over straight-line distance.
    pub detour_factor: f64,
    /// Lower bound on any trip (turnout time).
    pub min_duration_ms: f64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            speed_kmh: 60.0,
            detour_factor: 1.3,
            min_duration_ms: 60_000.0,
        }
    }
}

/// Haversine distance times a detour factor, driven at constant speed.
#[derive(Debug, Clone)]
pub struct StraightLineEstimator {
    config: RouteConfig,
}

impl StraightLineEstimator {
    pub fn new(config: RouteConfig) -> Self {
        Self { config }
    }

    pub fn estimate_now(&self, from: GeoPoint, to: GeoPoint) -> anyhow::Result<RouteEstimate> {
        ensure!(
            self.config.speed_kmh > 0.0,
            "route speed must be positive, got {}",
            self.config.speed_kmh
        );
        let distance_km = from.distance_km(&to) * self.config.detour_factor.max(1.0);
        let hours = distance_km / self.config.speed_kmh;
        Ok(RouteEstimate {
            distance_km,
            duration_ms: (hours * 3_600_000.0).max(self.config.min_duration_ms),
        })
    }
}

impl Default for StraightLineEstimator {
    fn default() -> Self {
        Self::new(RouteConfig::default())
    }
}

impl RouteEstimator for StraightLineEstimator {
    fn estimate(
        &self,
        from: GeoPoint,
        to: GeoPoint,
    ) -> LocalBoxFuture<'static, anyhow::Result<RouteEstimate>> {
        Box::pin(future::ready(self.estimate_now(from, to)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let a = GeoPoint::new(48.2082, 16.3738);
        let b = GeoPoint::new(48.1486, 17.1077);
        assert_eq!(a.distance_km(&a), 0.0);
        let ab = a.distance_km(&b);
        assert!((ab - b.distance_km(&a)).abs() < 1e-9);
        // Vienna to Bratislava is roughly 55 km as the crow flies.
        assert!((50.0..60.0).contains(&ab), "got {ab}");
    }

    #[test]
    fn short_trips_respect_minimum_duration() {
        let estimator = StraightLineEstimator::default();
        let here = GeoPoint::new(48.2, 16.37);
        let estimate = block_on(estimator.estimate(here, here)).expect("estimate");
        assert_eq!(estimate.duration_ms, 60_000.0);
    }

    #[test]
    fn duration_scales_with_speed() {
        let from = GeoPoint::new(48.20, 16.30);
        let to = GeoPoint::new(48.30, 16.45);
        let slow = StraightLineEstimator::new(RouteConfig {
            speed_kmh: 30.0,
            min_duration_ms: 0.0,
            ..RouteConfig::default()
        });
        let fast = StraightLineEstimator::new(RouteConfig {
            speed_kmh: 60.0,
            min_duration_ms: 0.0,
            ..RouteConfig::default()
        });
        let slow = slow.estimate_now(from, to).expect("slow");
        let fast = fast.estimate_now(from, to).expect("fast");
        assert!((slow.duration_ms - 2.0 * fast.duration_ms).abs() < 1e-6);
    }

    #[test]
    fn zero_speed_is_an_error() {
        let estimator = StraightLineEstimator::new(RouteConfig {
            speed_kmh: 0.0,
            ..RouteConfig::default()
        });
        let here = GeoPoint::new(0.0, 0.0);
        assert!(estimator.estimate_now(here, here).is_err());
    }
}
