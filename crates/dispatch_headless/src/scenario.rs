//! The synthetic EMS call flow, expressed as scheduler events.
//!
//! ```text
//! CallReceived ──► TriageCompleted ──► VehicleDispatched ──► VehicleArrived ──► MissionCompleted
//!      │                  │ (no vehicle: retry)   (async route)
//!      └─► next CallReceived
//! ```
//!
//! Handlers read and write the [DispatchStore] through [DispatchApp]; the
//! payload of every event except `CallReceived` is the call or mission
//! entity it concerns.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use anyhow::{anyhow, Context};
use bevy_ecs::prelude::Entity;
use dispatch_core::event::{EventSpec, Handler, HandlerError};
use dispatch_core::scheduler::Scheduler;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ScenarioConfig;
use crate::route::{GeoPoint, RouteEstimator, StraightLineEstimator};
use crate::store::{random_point, DispatchStore, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatchEvent {
    CallReceived,
    TriageCompleted,
    VehicleDispatched,
    VehicleArrived,
    MissionCompleted,
}

pub type DispatchScheduler = Scheduler<DispatchApp, DispatchEvent, Entity>;
pub type DispatchHandler = Handler<DispatchApp, DispatchEvent, Entity>;
pub type DispatchSpec = EventSpec<DispatchApp, DispatchEvent, Entity>;

/// Application context handed to every handler.
pub struct DispatchApp {
    config: ScenarioConfig,
    store: RefCell<DispatchStore>,
    rng: RefCell<StdRng>,
    router: Rc<dyn RouteEstimator>,
}

impl DispatchApp {
    /// Seed the store with the configured fleet, drawing bases from the
    /// scenario RNG so a seed fixes the whole run.
    pub fn new(config: ScenarioConfig, router: Rc<dyn RouteEstimator>) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut store = DispatchStore::new();
        store.seed_vehicles(&mut rng, &config.region, config.vehicles);
        Self {
            config,
            store: RefCell::new(store),
            rng: RefCell::new(rng),
            router,
        }
    }

    pub fn with_straight_line_routes(config: ScenarioConfig) -> Self {
        let router = Rc::new(StraightLineEstimator::new(config.route));
        Self::new(config, router)
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn store(&self) -> Ref<'_, DispatchStore> {
        self.store.borrow()
    }

    pub fn store_mut(&self) -> RefMut<'_, DispatchStore> {
        self.store.borrow_mut()
    }

    /// Exponential inter-arrival gap for the next call.
    fn next_call_gap(&self) -> f64 {
        let mean = self.config.mean_call_gap_ms();
        if !mean.is_finite() {
            return f64::INFINITY;
        }
        let u: f64 = self.rng.borrow_mut().gen();
        -u.max(1e-10).ln() * mean
    }

    fn random_location(&self) -> GeoPoint {
        random_point(&mut *self.rng.borrow_mut(), &self.config.region)
    }

    fn sample_priority(&self) -> Priority {
        Priority::sample(&mut *self.rng.borrow_mut())
    }
}

/// Queue the first call. Nothing is scheduled when the rate is zero or the
/// first gap already falls outside the call window.
pub fn start_call_flow(scheduler: &DispatchScheduler) -> anyhow::Result<()> {
    let app = scheduler.app();
    let first = scheduler.clock().now() + app.next_call_gap();
    if first < app.config.duration_ms {
        scheduler.schedule(first, call_received())?;
    }
    Ok(())
}

pub fn call_received() -> DispatchSpec {
    EventSpec::new(
        DispatchEvent::CallReceived,
        DispatchHandler::sync(|ctx, event| {
            let app = ctx.app();
            let location = app.random_location();
            let call = app.store_mut().receive_call(location, event.time);
            debug!(?call, %location, time = event.time, "call received");

            ctx.scheduler().schedule(
                event.time + app.config.triage_delay_ms,
                triage_completed(call),
            )?;
            let next = event.time + app.next_call_gap();
            if next < app.config.duration_ms {
                ctx.scheduler().schedule(next, call_received())?;
            }
            Ok(())
        }),
    )
}

pub fn triage_completed(call: Entity) -> DispatchSpec {
    EventSpec::new(
        DispatchEvent::TriageCompleted,
        DispatchHandler::sync(|ctx, event| {
            let app = ctx.app();
            let call = event
                .payload
                .ok_or_else(|| anyhow!("triage event without a call"))?;

            let mission = {
                let mut store = app.store_mut();
                let record = *store
                    .call(call)
                    .ok_or_else(|| anyhow!("call {call:?} no longer exists"))?;
                if record.priority.is_none() {
                    store.triage(call, app.sample_priority());
                }
                match store.nearest_available(record.location) {
                    Some(vehicle) => store.assign(call, vehicle, event.time),
                    None => {
                        store.record_retry();
                        None
                    }
                }
            };

            match mission {
                Some(mission) => {
                    debug!(?call, ?mission, time = event.time, "vehicle assigned");
                    ctx.scheduler()
                        .schedule(event.time, vehicle_dispatched(mission))?;
                }
                None => {
                    debug!(?call, time = event.time, "no vehicle available, retrying triage");
                    ctx.scheduler().schedule(
                        event.time + app.config.retry_delay_ms,
                        triage_completed(call),
                    )?;
                }
            }
            Ok(())
        }),
    )
    .with_payload(call)
}

/// From and to of a dispatched mission.
#[derive(Debug, Clone, Copy)]
struct Leg {
    mission: Entity,
    from: GeoPoint,
    to: GeoPoint,
}

fn mission_leg(app: &DispatchApp, mission: Option<Entity>) -> anyhow::Result<Leg> {
    let mission = mission.ok_or_else(|| anyhow!("dispatch event without a mission"))?;
    let store = app.store();
    let record = store
        .mission(mission)
        .ok_or_else(|| anyhow!("mission {mission:?} no longer exists"))?;
    let from = store
        .vehicle(record.vehicle)
        .map(|vehicle| vehicle.position)
        .ok_or_else(|| anyhow!("vehicle {:?} missing", record.vehicle))?;
    let to = store
        .call(record.call)
        .map(|call| call.location)
        .ok_or_else(|| anyhow!("call {:?} missing", record.call))?;
    Ok(Leg { mission, from, to })
}

pub fn vehicle_dispatched(mission: Entity) -> DispatchSpec {
    EventSpec::new(
        DispatchEvent::VehicleDispatched,
        DispatchHandler::spawn(|ctx, event| {
            let leg = mission_leg(ctx.app(), event.payload);
            let router = Rc::clone(&ctx.app().router);
            Box::pin(drive_leg(ctx.scheduler().clone(), router, leg, event.time))
        }),
    )
    .with_payload(mission)
}

/// Await the route estimate, then schedule arrival relative to the dispatch
/// time. A failed estimate hands the call back to triage.
async fn drive_leg(
    scheduler: DispatchScheduler,
    router: Rc<dyn RouteEstimator>,
    leg: anyhow::Result<Leg>,
    dispatched_at: f64,
) -> Result<(), HandlerError> {
    let leg = leg?;
    match router.estimate(leg.from, leg.to).await {
        Ok(route) => {
            scheduler
                .app()
                .store_mut()
                .set_route(leg.mission, route.distance_km);
            debug!(
                mission = ?leg.mission,
                distance_km = route.distance_km,
                duration_ms = route.duration_ms,
                "route estimated"
            );
            scheduler.schedule(
                dispatched_at + route.duration_ms,
                vehicle_arrived(leg.mission),
            )?;
            Ok(())
        }
        Err(err) => {
            let call = scheduler.app().store_mut().abort_mission(leg.mission);
            if let Some(call) = call {
                warn!(?call, mission = ?leg.mission, "route estimate failed, returning call to triage");
                let retry = scheduler.app().config.retry_delay_ms;
                scheduler.schedule_in(retry, triage_completed(call))?;
            }
            Err(err).with_context(|| format!("route estimate for mission {:?}", leg.mission))
        }
    }
}

pub fn vehicle_arrived(mission: Entity) -> DispatchSpec {
    EventSpec::new(
        DispatchEvent::VehicleArrived,
        DispatchHandler::sync(|ctx, event| {
            let app = ctx.app();
            let mission = event
                .payload
                .ok_or_else(|| anyhow!("arrival event without a mission"))?;
            let response_ms = app
                .store_mut()
                .arrive(mission, event.time)
                .ok_or_else(|| anyhow!("mission {mission:?} no longer exists"))?;
            debug!(?mission, response_ms, time = event.time, "vehicle on scene");
            ctx.scheduler().schedule(
                event.time + app.config.on_scene_ms,
                mission_completed(mission),
            )?;
            Ok(())
        }),
    )
    .with_payload(mission)
}

pub fn mission_completed(mission: Entity) -> DispatchSpec {
    EventSpec::new(
        DispatchEvent::MissionCompleted,
        DispatchHandler::sync(|ctx, event| {
            let mission = event
                .payload
                .ok_or_else(|| anyhow!("completion event without a mission"))?;
            if !ctx.app().store_mut().complete(mission, event.time) {
                return Err(anyhow!("mission {mission:?} no longer exists"));
            }
            debug!(?mission, time = event.time, "mission completed");
            Ok(())
        }),
    )
    .with_payload(mission)
}
