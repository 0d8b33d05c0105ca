//! ECS-backed state store for calls, vehicles and missions.
//!
//! Event handlers are the only writers. Each operation here is one state
//! transition of the dispatch flow and keeps [DispatchStats] in step.

use bevy_ecs::prelude::{Component, Entity, Resource, World};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Region;
use crate::route::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Immediate,
    Urgent,
    Routine,
}

impl Priority {
    /// Draw a priority with a 20/50/30 split.
    pub fn sample<R: Rng>(rng: &mut R) -> Self {
        let roll: f64 = rng.gen();
        if roll < 0.2 {
            Priority::Immediate
        } else if roll < 0.7 {
            Priority::Urgent
        } else {
            Priority::Routine
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Received, call-taker still on the line.
    Taking,
    /// Triaged, waiting for a free vehicle.
    Queued,
    Assigned,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Component)]
pub struct Call {
    pub number: u64,
    pub location: GeoPoint,
    pub received_at: f64,
    pub priority: Option<Priority>,
    pub state: CallState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleState {
    Available,
    EnRoute,
    OnScene,
}

#[derive(Debug, Clone, PartialEq, Component)]
pub struct Vehicle {
    pub callsign: String,
    pub state: VehicleState,
    pub position: GeoPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Component)]
pub struct Mission {
    pub call: Entity,
    pub vehicle: Entity,
    pub dispatched_at: f64,
    pub distance_km: Option<f64>,
    pub arrived_at: Option<f64>,
    pub completed_at: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Resource)]
pub struct DispatchStats {
    pub calls_received: u64,
    pub calls_triaged: u64,
    pub missions_dispatched: u64,
    pub missions_completed: u64,
    /// Triage attempts that found no available vehicle.
    pub triage_retries: u64,
    pub route_failures: u64,
    /// Call received to vehicle on scene, one entry per arrival.
    pub response_times_ms: Vec<f64>,
}

impl DispatchStats {
    pub fn mean_response_ms(&self) -> Option<f64> {
        if self.response_times_ms.is_empty() {
            return None;
        }
        Some(self.response_times_ms.iter().sum::<f64>() / self.response_times_ms.len() as f64)
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`.
    pub fn response_percentile_ms(&self, p: f64) -> Option<f64> {
        if self.response_times_ms.is_empty() {
            return None;
        }
        let mut sorted = self.response_times_ms.clone();
        sorted.sort_by(f64::total_cmp);
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }
}

/// Uniform random point inside `region`.
pub fn random_point<R: Rng>(rng: &mut R, region: &Region) -> GeoPoint {
    GeoPoint::new(
        rng.gen_range(region.lat_min..=region.lat_max),
        rng.gen_range(region.lng_min..=region.lng_max),
    )
}

pub struct DispatchStore {
    world: World,
    next_call_number: u64,
}

impl DispatchStore {
    pub fn new() -> Self {
        let mut world = World::new();
        world.insert_resource(DispatchStats::default());
        Self {
            world,
            next_call_number: 1,
        }
    }

    /// Station `count` vehicles at random bases inside `region`.
    pub fn seed_vehicles<R: Rng>(&mut self, rng: &mut R, region: &Region, count: usize) {
        for index in 0..count {
            let position = random_point(rng, region);
            self.world.spawn(Vehicle {
                callsign: format!("MED-{:02}", index + 1),
                state: VehicleState::Available,
                position,
            });
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn stats(&self) -> &DispatchStats {
        self.world.resource::<DispatchStats>()
    }

    pub fn call(&self, call: Entity) -> Option<&Call> {
        self.world.get::<Call>(call)
    }

    pub fn vehicle(&self, vehicle: Entity) -> Option<&Vehicle> {
        self.world.get::<Vehicle>(vehicle)
    }

    pub fn mission(&self, mission: Entity) -> Option<&Mission> {
        self.world.get::<Mission>(mission)
    }

    pub fn receive_call(&mut self, location: GeoPoint, now: f64) -> Entity {
        let number = self.next_call_number;
        self.next_call_number += 1;
        self.world.resource_mut::<DispatchStats>().calls_received += 1;
        self.world
            .spawn(Call {
                number,
                location,
                received_at: now,
                priority: None,
                state: CallState::Taking,
            })
            .id()
    }

    /// Record the triage outcome. Only the first triage counts; retries keep
    /// the original priority.
    pub fn triage(&mut self, call: Entity, priority: Priority) -> bool {
        let Some(mut record) = self.world.get_mut::<Call>(call) else {
            return false;
        };
        if record.priority.is_some() {
            return false;
        }
        record.priority = Some(priority);
        record.state = CallState::Queued;
        self.world.resource_mut::<DispatchStats>().calls_triaged += 1;
        true
    }

    pub fn record_retry(&mut self) {
        self.world.resource_mut::<DispatchStats>().triage_retries += 1;
    }

    /// Closest available vehicle to `point`. Ties go to the earliest spawned.
    pub fn nearest_available(&mut self, point: GeoPoint) -> Option<Entity> {
        let mut query = self.world.query::<(Entity, &Vehicle)>();
        let mut candidates: Vec<(Entity, f64)> = query
            .iter(&self.world)
            .filter(|(_, vehicle)| vehicle.state == VehicleState::Available)
            .map(|(entity, vehicle)| (entity, vehicle.position.distance_km(&point)))
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        candidates.first().map(|(entity, _)| *entity)
    }

    /// Create a mission pairing `call` with `vehicle`. `None` if either is
    /// gone or the vehicle is no longer available.
    pub fn assign(&mut self, call: Entity, vehicle: Entity, now: f64) -> Option<Entity> {
        self.world.get::<Call>(call)?;
        {
            let mut unit = self.world.get_mut::<Vehicle>(vehicle)?;
            if unit.state != VehicleState::Available {
                return None;
            }
            unit.state = VehicleState::EnRoute;
        }
        let mut record = self.world.get_mut::<Call>(call)?;
        record.state = CallState::Assigned;
        self.world.resource_mut::<DispatchStats>().missions_dispatched += 1;
        Some(
            self.world
                .spawn(Mission {
                    call,
                    vehicle,
                    dispatched_at: now,
                    distance_km: None,
                    arrived_at: None,
                    completed_at: None,
                })
                .id(),
        )
    }

    /// Undo an assignment whose route could not be estimated: the vehicle
    /// becomes available and the call goes back to the queue.
    pub fn abort_mission(&mut self, mission: Entity) -> Option<Entity> {
        let record = *self.world.get::<Mission>(mission)?;
        if let Some(mut unit) = self.world.get_mut::<Vehicle>(record.vehicle) {
            unit.state = VehicleState::Available;
        }
        if let Some(mut call) = self.world.get_mut::<Call>(record.call) {
            call.state = CallState::Queued;
        }
        self.world.despawn(mission);
        self.world.resource_mut::<DispatchStats>().route_failures += 1;
        Some(record.call)
    }

    pub fn set_route(&mut self, mission: Entity, distance_km: f64) {
        if let Some(mut record) = self.world.get_mut::<Mission>(mission) {
            record.distance_km = Some(distance_km);
        }
    }

    /// Vehicle reached the scene: move it to the call and record the
    /// response time. Returns that response time.
    pub fn arrive(&mut self, mission: Entity, now: f64) -> Option<f64> {
        let record = {
            let mut record = self.world.get_mut::<Mission>(mission)?;
            record.arrived_at = Some(now);
            *record
        };
        let call = *self.world.get::<Call>(record.call)?;
        if let Some(mut unit) = self.world.get_mut::<Vehicle>(record.vehicle) {
            unit.state = VehicleState::OnScene;
            unit.position = call.location;
        }
        let response = now - call.received_at;
        self.world
            .resource_mut::<DispatchStats>()
            .response_times_ms
            .push(response);
        Some(response)
    }

    pub fn complete(&mut self, mission: Entity, now: f64) -> bool {
        let record = {
            let Some(mut record) = self.world.get_mut::<Mission>(mission) else {
                return false;
            };
            record.completed_at = Some(now);
            *record
        };
        if let Some(mut unit) = self.world.get_mut::<Vehicle>(record.vehicle) {
            unit.state = VehicleState::Available;
        }
        if let Some(mut call) = self.world.get_mut::<Call>(record.call) {
            call.state = CallState::Closed;
        }
        self.world.resource_mut::<DispatchStats>().missions_completed += 1;
        true
    }

    pub fn count_vehicles(&mut self, state: VehicleState) -> usize {
        let mut query = self.world.query::<&Vehicle>();
        query
            .iter(&self.world)
            .filter(|vehicle| vehicle.state == state)
            .count()
    }

    pub fn open_calls(&mut self) -> usize {
        let mut query = self.world.query::<&Call>();
        query
            .iter(&self.world)
            .filter(|call| call.state != CallState::Closed)
            .count()
    }
}

impl Default for DispatchStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn store_with_vehicles(count: usize) -> DispatchStore {
        let mut rng = StdRng::seed_from_u64(1);
        let mut store = DispatchStore::new();
        store.seed_vehicles(&mut rng, &Region::default(), count);
        store
    }

    #[test]
    fn full_mission_lifecycle_updates_stats() {
        let mut store = store_with_vehicles(2);
        let location = Region::default().center();
        let call = store.receive_call(location, 1_000.0);
        assert!(store.triage(call, Priority::Urgent));
        assert!(!store.triage(call, Priority::Routine));

        let vehicle = store.nearest_available(location).expect("vehicle");
        let mission = store.assign(call, vehicle, 2_000.0).expect("mission");
        assert_eq!(store.count_vehicles(VehicleState::EnRoute), 1);

        assert_eq!(store.arrive(mission, 9_000.0), Some(8_000.0));
        assert_eq!(store.vehicle(vehicle).map(|v| v.position), Some(location));
        assert!(store.complete(mission, 20_000.0));

        let stats = store.stats();
        assert_eq!(stats.calls_received, 1);
        assert_eq!(stats.calls_triaged, 1);
        assert_eq!(stats.missions_dispatched, 1);
        assert_eq!(stats.missions_completed, 1);
        assert_eq!(stats.response_times_ms, vec![8_000.0]);
        assert_eq!(store.count_vehicles(VehicleState::Available), 2);
        assert_eq!(store.open_calls(), 0);
    }

    #[test]
    fn busy_vehicles_are_skipped() {
        let mut store = store_with_vehicles(1);
        let location = Region::default().center();
        let first = store.receive_call(location, 0.0);
        let second = store.receive_call(location, 0.0);
        let vehicle = store.nearest_available(location).expect("vehicle");
        assert!(store.assign(first, vehicle, 0.0).is_some());
        assert!(store.nearest_available(location).is_none());
        assert!(store.assign(second, vehicle, 0.0).is_none());
    }

    #[test]
    fn nearest_vehicle_wins() {
        let mut store = DispatchStore::new();
        let near = store
            .world
            .spawn(Vehicle {
                callsign: "NEAR".into(),
                state: VehicleState::Available,
                position: GeoPoint::new(48.20, 16.37),
            })
            .id();
        store.world.spawn(Vehicle {
            callsign: "FAR".into(),
            state: VehicleState::Available,
            position: GeoPoint::new(48.30, 16.50),
        });
        assert_eq!(store.nearest_available(GeoPoint::new(48.21, 16.37)), Some(near));
    }

    #[test]
    fn aborted_mission_requeues_the_call() {
        let mut store = store_with_vehicles(1);
        let location = Region::default().center();
        let call = store.receive_call(location, 0.0);
        let vehicle = store.nearest_available(location).expect("vehicle");
        let mission = store.assign(call, vehicle, 0.0).expect("mission");
        assert_eq!(store.abort_mission(mission), Some(call));
        assert!(store.mission(mission).is_none());
        assert_eq!(store.call(call).map(|c| c.state), Some(CallState::Queued));
        assert_eq!(store.count_vehicles(VehicleState::Available), 1);
        assert_eq!(store.stats().route_failures, 1);
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let stats = DispatchStats {
            response_times_ms: vec![40.0, 10.0, 30.0, 20.0],
            ..Default::default()
        };
        assert_eq!(stats.mean_response_ms(), Some(25.0));
        assert_eq!(stats.response_percentile_ms(50.0), Some(20.0));
        assert_eq!(stats.response_percentile_ms(90.0), Some(40.0));
        assert_eq!(DispatchStats::default().response_percentile_ms(90.0), None);
    }
}
