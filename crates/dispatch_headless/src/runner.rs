//! Fast (deterministic stepping) and realtime (tokio timers) runs.

use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::ValueEnum;
use dispatch_core::clock::VirtualClock;
use dispatch_core::config::ClockConfig;
use dispatch_core::host::{Host, ManualHost, TokioHost};
use dispatch_core::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use tokio::task::LocalSet;
use tracing::{debug, info};

use crate::config::ScenarioConfig;
use crate::report::RunReport;
use crate::scenario::{start_call_flow, DispatchApp, DispatchScheduler};

/// Simulation time allowed after the call window for missions to wind down.
pub const DRAIN_MS: f64 = 6.0 * 60.0 * 60_000.0;

const REALTIME_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Step from event to event with no real waiting.
    Fast,
    /// Real timers, clock playing at the configured speed.
    Realtime,
}

pub fn build_scheduler(
    config: &ScenarioConfig,
    clock: VirtualClock,
    host: Rc<dyn Host>,
) -> DispatchScheduler {
    let app = DispatchApp::with_straight_line_routes(config.clone());
    Scheduler::with_config(clock, host, app, config.scheduler.clone())
}

pub fn run(config: &ScenarioConfig, mode: RunMode) -> anyhow::Result<RunReport> {
    match mode {
        RunMode::Fast => run_fast(config),
        RunMode::Realtime => run_realtime(config),
    }
}

/// Jump the paused clock from one event time to the next with `run_until`,
/// letting spawned route lookups settle between steps. Seeded runs are
/// reproducible.
pub fn run_fast(config: &ScenarioConfig) -> anyhow::Result<RunReport> {
    config.validate()?;
    let started = Instant::now();
    let host = Rc::new(ManualHost::new());
    let clock = VirtualClock::with_config(host.real_clock(), &ClockConfig::default());
    let scheduler = build_scheduler(config, clock, host.clone());
    start_call_flow(&scheduler)?;

    let horizon = config.duration_ms + DRAIN_MS;
    let mut steps = 0u64;
    while let Some(next) = scheduler.next_event_time() {
        if next > horizon {
            debug!(next, horizon, "stopping at drain horizon");
            break;
        }
        scheduler.run_until(next)?;
        host.run_tasks();
        steps += 1;
    }
    info!(steps, "fast run complete");

    let report = RunReport::collect(RunMode::Fast, &scheduler, started.elapsed());
    scheduler.metrics().log_summary();
    scheduler.dispose();
    Ok(report)
}

/// Drive the scenario off real tokio timers on a current-thread runtime.
pub fn run_realtime(config: &ScenarioConfig) -> anyhow::Result<RunReport> {
    config.validate()?;
    if config.speed <= 0.0 {
        bail!("realtime runs need a positive speed, got {}", config.speed);
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("building tokio runtime")?;
    let local = LocalSet::new();
    local.block_on(&runtime, realtime_session(config.clone()))
}

async fn realtime_session(config: ScenarioConfig) -> anyhow::Result<RunReport> {
    let started = Instant::now();
    let host = Rc::new(TokioHost::new());
    let clock = VirtualClock::monotonic(&ClockConfig::default().with_speed(config.speed));
    let scheduler = build_scheduler(&config, clock.clone(), host);
    start_call_flow(&scheduler)?;
    clock.play();
    info!(speed = config.speed, "realtime run started");

    let horizon = config.duration_ms + DRAIN_MS;
    let mut ticker = tokio::time::interval(REALTIME_TICK);
    let mut last_hour = 0u64;
    loop {
        ticker.tick().await;
        let now = clock.now();
        let hour = (now / 3_600_000.0) as u64;
        if hour > last_hour {
            last_hour = hour;
            let stats = scheduler.app().store().stats().clone();
            info!(
                sim_hour = hour,
                calls = stats.calls_received,
                completed = stats.missions_completed,
                "progress"
            );
        }
        let settled = now >= config.duration_ms
            && scheduler.is_empty()
            && scheduler.app().store_mut().open_calls() == 0;
        if settled || now >= horizon {
            break;
        }
    }
    clock.pause();

    let report = RunReport::collect(RunMode::Realtime, &scheduler, started.elapsed());
    scheduler.metrics().log_summary();
    scheduler.dispose();
    Ok(report)
}
