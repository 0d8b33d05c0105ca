//! Headless embedding of the dispatch scheduling core: a synthetic EMS call
//! flow over an ECS store, run either fast (deterministic stepping) or in
//! realtime on tokio timers.

pub mod config;
pub mod report;
pub mod route;
pub mod runner;
pub mod scenario;
pub mod store;

pub use config::{Region, ScenarioConfig};
pub use report::RunReport;
pub use route::{GeoPoint, RouteConfig, RouteEstimate, RouteEstimator, StraightLineEstimator};
pub use runner::{run, run_fast, run_realtime, RunMode};
pub use scenario::{DispatchApp, DispatchEvent, DispatchScheduler};
pub use store::{DispatchStats, DispatchStore};
