//! Scripted replay simulator for deterministic testing.
//!
//! Replays a fixed sequence of per-tick vehicle frames and records every
//! mutation the core requests, so tests can assert on both the trajectory
//! log and the side effects sent to the simulator.

use crate::error::{MutationFailure, SimError};
use crate::simulator::TrafficSimulator;
use crate::types::{EdgeId, KinematicsSnapshot, LaneId, Position, SpeedCommand, VehicleId};
use std::collections::{HashMap, HashSet};

/// One vehicle's state within one scripted frame.
#[derive(Debug, Clone)]
pub struct VehicleFrame {
    pub id: VehicleId,
    pub position: Position,
    pub speed: f64,
    pub max_speed: f64,
    pub waiting_time: f64,
    pub road_id: EdgeId,
    pub lane_index: u32,
    pub lane_count: u32,
    pub route: Option<Vec<EdgeId>>,
}

impl VehicleFrame {
    /// A stationary vehicle on a single-lane edge `E0`.
    pub fn new(id: &str, x: f64, y: f64) -> Self {
        Self {
            id: VehicleId::from(id),
            position: Position::new(x, y),
            speed: 0.0,
            max_speed: 13.89,
            waiting_time: 0.0,
            road_id: EdgeId::from("E0"),
            lane_index: 0,
            lane_count: 1,
            route: None,
        }
    }

    pub fn speed(mut self, speed: f64, max_speed: f64) -> Self {
        self.speed = speed;
        self.max_speed = max_speed;
        self
    }

    pub fn waiting(mut self, secs: f64) -> Self {
        self.waiting_time = secs;
        self
    }

    pub fn on_road(mut self, road: &str, lane_index: u32, lane_count: u32) -> Self {
        self.road_id = EdgeId::from(road);
        self.lane_index = lane_index;
        self.lane_count = lane_count;
        self
    }

    pub fn route(mut self, edges: &[&str]) -> Self {
        self.route = Some(edges.iter().map(|e| EdgeId::from(*e)).collect());
        self
    }
}

/// Category of a mutation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    LaneChange,
    Route,
    Speed,
}

/// A mutation the core asked the simulator to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationRequest {
    LaneChange { target_index: u32, urgency: f64 },
    Route(Vec<EdgeId>),
    Speed(SpeedCommand),
}

impl MutationRequest {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationRequest::LaneChange { .. } => MutationKind::LaneChange,
            MutationRequest::Route(_) => MutationKind::Route,
            MutationRequest::Speed(_) => MutationKind::Speed,
        }
    }
}

/// Log entry of an accepted or rejected mutation request.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    /// Frame index the request arrived in
    pub tick: u64,
    pub vehicle: VehicleId,
    pub request: MutationRequest,
    pub accepted: bool,
}

/// Fixed-replay implementation of [`TrafficSimulator`].
///
/// Frame `n` becomes current after the `n+1`-th call to `advance_tick`, so it
/// lines up with driver tick `n`. Advancing past the last frame yields an
/// empty network.
#[derive(Debug, Default)]
pub struct ScriptedSimulator {
    frames: Vec<Vec<VehicleFrame>>,

    /// Number of completed `advance_tick` calls
    advanced: u64,

    /// Routes replaced via `set_route`, persisting across frames
    route_overrides: HashMap<VehicleId, Vec<EdgeId>>,

    rejections: HashSet<(VehicleId, MutationKind)>,

    fail_advance_at: Option<u64>,

    mutations: Vec<MutationRecord>,

    closed: bool,
}

impl ScriptedSimulator {
    pub fn new(frames: Vec<Vec<VehicleFrame>>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// Repeats the same frame for `ticks` ticks.
    pub fn repeating(frame: Vec<VehicleFrame>, ticks: usize) -> Self {
        Self::new(vec![frame; ticks])
    }

    /// Makes every mutation of `kind` for `vehicle` fail with `Rejected`.
    pub fn reject(mut self, vehicle: &str, kind: MutationKind) -> Self {
        self.rejections.insert((VehicleId::from(vehicle), kind));
        self
    }

    /// Makes the `n`-th advance (0-based) fail.
    pub fn fail_advance_at(mut self, n: u64) -> Self {
        self.fail_advance_at = Some(n);
        self
    }

    /// All mutation requests received so far, in arrival order.
    pub fn mutations(&self) -> &[MutationRecord] {
        &self.mutations
    }

    /// Accepted mutation requests for one vehicle.
    pub fn accepted_for(&self, vehicle: &str) -> Vec<&MutationRecord> {
        self.mutations
            .iter()
            .filter(|m| m.accepted && m.vehicle.as_str() == vehicle)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn current_tick(&self) -> u64 {
        self.advanced.saturating_sub(1)
    }

    fn current_frame(&self) -> &[VehicleFrame] {
        if self.advanced == 0 {
            return &[];
        }
        self.frames
            .get(self.current_tick() as usize)
            .map(|f| f.as_slice())
            .unwrap_or(&[])
    }

    fn vehicle(&self, id: &VehicleId) -> Result<&VehicleFrame, SimError> {
        if self.closed {
            return Err(SimError::Closed);
        }
        self.current_frame()
            .iter()
            .find(|v| &v.id == id)
            .ok_or_else(|| SimError::query(id, "vehicle not in network"))
    }

    fn record(
        &mut self,
        id: &VehicleId,
        request: MutationRequest,
    ) -> Result<(), MutationFailure> {
        let outcome = self.check(id, &request);
        self.mutations.push(MutationRecord {
            tick: self.current_tick(),
            vehicle: id.clone(),
            request: request.clone(),
            accepted: outcome.is_ok(),
        });

        if outcome.is_ok() {
            if let MutationRequest::Route(edges) = request {
                self.route_overrides.insert(id.clone(), edges);
            }
        }
        outcome
    }

    fn check(&self, id: &VehicleId, request: &MutationRequest) -> Result<(), MutationFailure> {
        let vehicle = self
            .vehicle(id)
            .map_err(|_| MutationFailure::UnknownVehicle(id.clone()))?;

        if self.rejections.contains(&(id.clone(), request.kind())) {
            return Err(MutationFailure::Rejected(format!(
                "scripted rejection of {:?}",
                request.kind()
            )));
        }

        match request {
            MutationRequest::LaneChange { target_index, .. } => {
                if *target_index >= vehicle.lane_count {
                    return Err(MutationFailure::InvalidLane {
                        requested: *target_index as i64,
                        lane_count: vehicle.lane_count,
                    });
                }
            }
            MutationRequest::Route(edges) => {
                if edges.is_empty() {
                    return Err(MutationFailure::Rejected("empty route".into()));
                }
            }
            MutationRequest::Speed(SpeedCommand::Override(v)) => {
                if !v.is_finite() || *v < 0.0 {
                    return Err(MutationFailure::InvalidSpeed(*v));
                }
            }
            MutationRequest::Speed(SpeedCommand::Release) => {}
        }
        Ok(())
    }
}

impl TrafficSimulator for ScriptedSimulator {
    fn advance_tick(&mut self) -> Result<(), SimError> {
        if self.closed {
            return Err(SimError::Closed);
        }
        if self.fail_advance_at == Some(self.advanced) {
            return Err(SimError::Advance {
                tick: self.advanced,
                reason: "scripted failure".into(),
            });
        }
        self.advanced += 1;
        Ok(())
    }

    fn active_vehicles(&mut self) -> Result<Vec<VehicleId>, SimError> {
        if self.closed {
            return Err(SimError::Closed);
        }
        Ok(self.current_frame().iter().map(|v| v.id.clone()).collect())
    }

    fn position(&mut self, id: &VehicleId) -> Result<Position, SimError> {
        Ok(self.vehicle(id)?.position)
    }

    fn speed(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        Ok(self.vehicle(id)?.speed)
    }

    fn waiting_time(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        Ok(self.vehicle(id)?.waiting_time)
    }

    fn lane_id(&mut self, id: &VehicleId) -> Result<LaneId, SimError> {
        let v = self.vehicle(id)?;
        Ok(LaneId::on_edge(&v.road_id, v.lane_index))
    }

    fn max_speed(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        Ok(self.vehicle(id)?.max_speed)
    }

    fn lane_index(&mut self, id: &VehicleId) -> Result<u32, SimError> {
        Ok(self.vehicle(id)?.lane_index)
    }

    fn road_id(&mut self, id: &VehicleId) -> Result<EdgeId, SimError> {
        Ok(self.vehicle(id)?.road_id.clone())
    }

    fn lane_count(&mut self, road: &EdgeId) -> Result<u32, SimError> {
        self.current_frame()
            .iter()
            .chain(self.frames.iter().flatten())
            .find(|v| &v.road_id == road)
            .map(|v| v.lane_count)
            .ok_or_else(|| SimError::query(road, "unknown edge"))
    }

    fn route(&mut self, id: &VehicleId) -> Result<Vec<EdgeId>, SimError> {
        let v = self.vehicle(id)?;
        if let Some(route) = self.route_overrides.get(id) {
            return Ok(route.clone());
        }
        Ok(v.route.clone().unwrap_or_else(|| vec![v.road_id.clone()]))
    }

    fn request_lane_change(
        &mut self,
        id: &VehicleId,
        target_index: u32,
        urgency: f64,
    ) -> Result<(), MutationFailure> {
        self.record(id, MutationRequest::LaneChange { target_index, urgency })
    }

    fn set_route(&mut self, id: &VehicleId, edges: &[EdgeId]) -> Result<(), MutationFailure> {
        self.record(id, MutationRequest::Route(edges.to_vec()))
    }

    fn set_speed(&mut self, id: &VehicleId, command: SpeedCommand) -> Result<(), MutationFailure> {
        self.record(id, MutationRequest::Speed(command))
    }

    fn snapshot(&mut self, id: &VehicleId) -> Result<KinematicsSnapshot, SimError> {
        let route = self.route(id)?;
        let v = self.vehicle(id)?;
        Ok(KinematicsSnapshot {
            position: v.position,
            speed: v.speed,
            waiting_time: v.waiting_time,
            lane_id: LaneId::on_edge(&v.road_id, v.lane_index),
            max_speed: v.max_speed,
            road_id: v.road_id.clone(),
            lane_index: v.lane_index,
            lane_count: v.lane_count,
            route,
        })
    }

    fn close(&mut self) -> Result<(), SimError> {
        self.closed = true;
        Ok(())
    }
}
