//! End-of-run summary, logged and optionally written as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::runner::RunMode;
use crate::scenario::DispatchScheduler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub seed: u64,
    pub vehicles: usize,
    /// Simulation time when the run stopped.
    pub sim_end_ms: f64,
    pub wall_ms: f64,
    pub calls_received: u64,
    pub calls_triaged: u64,
    pub missions_dispatched: u64,
    pub missions_completed: u64,
    pub triage_retries: u64,
    pub route_failures: u64,
    /// Calls not yet closed when the run stopped.
    pub open_calls: usize,
    /// Events still queued when the run stopped.
    pub pending_events: usize,
    pub mean_response_ms: Option<f64>,
    pub p90_response_ms: Option<f64>,
    pub events_fired: u64,
    pub handler_faults: u64,
    pub events_by_kind: BTreeMap<String, u64>,
}

impl RunReport {
    pub fn collect(mode: RunMode, scheduler: &DispatchScheduler, wall: Duration) -> Self {
        let app = scheduler.app();
        let metrics = scheduler.metrics();
        let mut store = app.store_mut();
        let open_calls = store.open_calls();
        let stats = store.stats().clone();
        Self {
            mode,
            seed: app.config().seed,
            vehicles: app.config().vehicles,
            sim_end_ms: scheduler.clock().now(),
            wall_ms: wall.as_secs_f64() * 1000.0,
            calls_received: stats.calls_received,
            calls_triaged: stats.calls_triaged,
            missions_dispatched: stats.missions_dispatched,
            missions_completed: stats.missions_completed,
            triage_retries: stats.triage_retries,
            route_failures: stats.route_failures,
            open_calls,
            pending_events: scheduler.size(),
            mean_response_ms: stats.mean_response_ms(),
            p90_response_ms: stats.response_percentile_ms(90.0),
            events_fired: metrics.events_fired,
            handler_faults: metrics.handler_faults,
            events_by_kind: metrics.events_by_kind.into_iter().collect(),
        }
    }

    pub fn log(&self) {
        info!(
            mode = ?self.mode,
            seed = self.seed,
            sim_end_min = self.sim_end_ms / 60_000.0,
            wall_ms = self.wall_ms,
            calls = self.calls_received,
            completed = self.missions_completed,
            retries = self.triage_retries,
            open_calls = self.open_calls,
            mean_response_min = self.mean_response_ms.map(|ms| ms / 60_000.0),
            p90_response_min = self.p90_response_ms.map(|ms| ms / 60_000.0),
            handler_faults = self.handler_faults,
            "run finished"
        );
        for (kind, count) in &self.events_by_kind {
            info!(kind = %kind, count, "events by kind");
        }
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("serializing run report")?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "run report written");
        Ok(())
    }
}
