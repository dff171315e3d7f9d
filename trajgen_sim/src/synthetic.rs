//! In-process synthetic traffic for runs without an external SUMO install.
//!
//! Models a straight signalised corridor of edges laid end to end along the
//! x axis. Vehicles are inserted by seeded flows, follow their leader on the
//! same lane, queue at red signals (which is where waiting time comes from)
//! and leave the network at the end of their route.
//!
//! ```text
//!   E1 (3 lanes)      ▐ E2 (3 lanes)      ▐ E3 (2 lanes)      ▐ E4 (1 lane) ──► exit
//!   x=0 ─────────────►▐──────────────────►▐──────────────────►▐─────────────
//!                  signal              signal              signal
//! ```
//!
//! Reversed edges (`-E2`) share the geometry of their forward edge, mirrored
//! below the x axis, so a wrong-way detour is visible in the trajectory log.

use nalgebra::Point2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use trajgen_env::{
    EdgeId, KinematicsSnapshot, LaneId, MutationFailure, Position, SimError, SpeedCommand,
    TrafficSimulator, VehicleId,
};

/// Lateral distance between lane centre lines (m).
pub const LANE_WIDTH: f64 = 3.2;

/// Simulated seconds per tick.
const STEP_LENGTH: f64 = 1.0;

/// Standstill distance kept to the leader (m).
const MIN_GAP: f64 = 2.5;

/// Below this a vehicle counts as waiting (m/s), as in SUMO.
const HALTING_SPEED: f64 = 0.1;

/// Vehicle class of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Car,
    Bike,
}

impl VehicleClass {
    pub fn length(&self) -> f64 {
        match self {
            VehicleClass::Car => 5.0,
            VehicleClass::Bike => 2.2,
        }
    }

    /// Type-level maximum speed (m/s).
    pub fn max_speed(&self) -> f64 {
        match self {
            VehicleClass::Car => 16.0,
            VehicleClass::Bike => 18.0,
        }
    }

    pub fn accel(&self) -> f64 {
        match self {
            VehicleClass::Car => 2.6,
            VehicleClass::Bike => 3.2,
        }
    }
}

/// One forward edge of the corridor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub id: String,
    /// Length (m)
    pub length: f64,
    pub lanes: u32,
    /// Speed limit (m/s)
    pub speed_limit: f64,
}

impl EdgeSpec {
    pub fn new(id: &str, length: f64, lanes: u32, speed_limit: f64) -> Self {
        Self {
            id: id.to_string(),
            length,
            lanes,
            speed_limit,
        }
    }
}

/// A seeded vehicle source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
    /// Flow name, used as the vehicle id prefix (`<name>.<n>`)
    pub name: String,
    pub class: VehicleClass,
    /// Insertion probability per tick
    pub rate: f64,
    /// Edge ids to traverse, in order
    pub route: Vec<String>,
}

impl FlowSpec {
    pub fn new(name: &str, class: VehicleClass, rate: f64, route: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            class,
            rate,
            route: route.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Layout and demand of a synthetic run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub edges: Vec<EdgeSpec>,
    pub flows: Vec<FlowSpec>,
    /// Signal cycle length (ticks)
    pub signal_cycle: u64,
    /// Share of the cycle that is green
    pub green_ratio: f64,
    /// Std-dev of the per-vehicle speed factor (mean 1.0)
    pub speed_factor_dev: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        let route = ["E1", "E2", "E3", "E4"];
        Self {
            edges: vec![
                EdgeSpec::new("E1", 200.0, 3, 13.89),
                EdgeSpec::new("E2", 200.0, 3, 13.89),
                EdgeSpec::new("E3", 150.0, 2, 11.11),
                EdgeSpec::new("E4", 150.0, 1, 8.33),
            ],
            flows: vec![
                FlowSpec::new("morning_cars", VehicleClass::Car, 0.35, &route),
                FlowSpec::new("morning_bikes", VehicleClass::Bike, 0.15, &route),
            ],
            signal_cycle: 60,
            green_ratio: 0.5,
            speed_factor_dev: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
struct EdgeGeometry {
    spec: EdgeSpec,
    /// Position of the edge in the corridor
    index: usize,
    start_x: f64,
}

#[derive(Debug, Clone)]
struct SyntheticVehicle {
    id: VehicleId,
    class: VehicleClass,
    route: Vec<EdgeId>,
    route_index: usize,
    lane: u32,
    /// Distance travelled along the current edge (m)
    offset: f64,
    speed: f64,
    speed_factor: f64,
    waiting: f64,
    speed_override: Option<f64>,
    lane_request: Option<u32>,
}

impl SyntheticVehicle {
    fn edge(&self) -> &EdgeId {
        &self.route[self.route_index]
    }
}

#[derive(Debug, Clone, Default)]
struct FlowState {
    /// Vehicles emitted so far
    emitted: u64,
    /// Vehicles waiting for a free insertion slot
    backlog: u32,
}

/// Seeded corridor model implementing [`TrafficSimulator`].
pub struct SyntheticTraffic {
    config: SyntheticConfig,
    edges: HashMap<String, EdgeGeometry>,
    rng: ChaCha8Rng,
    speed_factor: Normal<f64>,
    flows: Vec<FlowState>,
    vehicles: Vec<SyntheticVehicle>,
    index: HashMap<VehicleId, usize>,
    /// Completed steps
    steps: u64,
    closed: bool,
}

impl SyntheticTraffic {
    /// Builds the corridor. Fails with `SimError::Startup` on a bad layout.
    pub fn new(config: SyntheticConfig, seed: u64) -> Result<Self, SimError> {
        if config.edges.is_empty() {
            return Err(SimError::startup("synthetic layout has no edges"));
        }
        if config.signal_cycle == 0 || !(0.0..=1.0).contains(&config.green_ratio) {
            return Err(SimError::startup("signal cycle must be > 0 with green ratio in [0, 1]"));
        }

        let mut edges = HashMap::new();
        let mut start_x = 0.0;
        for (index, spec) in config.edges.iter().enumerate() {
            if spec.lanes == 0 || spec.length <= 0.0 || spec.id.starts_with(EdgeId::REVERSE_MARKER) {
                return Err(SimError::startup(format!("invalid edge {}", spec.id)));
            }
            edges.insert(
                spec.id.clone(),
                EdgeGeometry {
                    spec: spec.clone(),
                    index,
                    start_x,
                },
            );
            start_x += spec.length;
        }

        for flow in &config.flows {
            if flow.route.is_empty() {
                return Err(SimError::startup(format!("flow {} has an empty route", flow.name)));
            }
            if let Some(edge) = flow.route.iter().find(|e| !edges.contains_key(*e)) {
                return Err(SimError::startup(format!(
                    "flow {} routes over unknown edge {}",
                    flow.name, edge
                )));
            }
        }

        let speed_factor = Normal::new(1.0, config.speed_factor_dev)
            .map_err(|e| SimError::startup(format!("speed factor distribution: {}", e)))?;

        debug!(
            "Synthetic corridor: {} edges, {} flows, {:.0} m",
            config.edges.len(),
            config.flows.len(),
            start_x
        );

        Ok(Self {
            flows: vec![FlowState::default(); config.flows.len()],
            rng: ChaCha8Rng::seed_from_u64(seed),
            edges,
            speed_factor,
            config,
            vehicles: Vec::new(),
            index: HashMap::new(),
            steps: 0,
            closed: false,
        })
    }

    /// Number of completed steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn geometry(&self, edge: &EdgeId) -> Option<(&EdgeGeometry, bool)> {
        if edge.is_reversed() {
            self.edges.get(edge.reversed().as_str()).map(|g| (g, true))
        } else {
            self.edges.get(edge.as_str()).map(|g| (g, false))
        }
    }

    /// True if the signal at the downstream end of `edge` shows green at
    /// `step`. The last corridor edge and reversed edges are unsignalised.
    fn signal_green(&self, edge: &EdgeId, step: u64) -> bool {
        match self.geometry(edge) {
            Some((geometry, false)) if geometry.index + 1 < self.config.edges.len() => {
                // Offset consecutive signals by a quarter cycle (green wave)
                let shift = geometry.index as u64 * self.config.signal_cycle / 4;
                let phase = (step + shift) % self.config.signal_cycle;
                (phase as f64) < self.config.green_ratio * self.config.signal_cycle as f64
            }
            _ => true,
        }
    }

    fn vehicle(&self, id: &VehicleId) -> Result<&SyntheticVehicle, SimError> {
        self.index
            .get(id)
            .map(|&i| &self.vehicles[i])
            .ok_or_else(|| SimError::query(id, "vehicle not in network"))
    }

    fn vehicle_mut(&mut self, id: &VehicleId) -> Result<&mut SyntheticVehicle, MutationFailure> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.vehicles[i]),
            None => Err(MutationFailure::UnknownVehicle(id.clone())),
        }
    }

    fn ensure_open(&self) -> Result<(), SimError> {
        if self.closed {
            Err(SimError::Closed)
        } else {
            Ok(())
        }
    }

    /// Gap (m) from each vehicle to its leader on the same edge and lane.
    fn leader_gaps(&self) -> Vec<f64> {
        let mut lanes: BTreeMap<(&str, u32), Vec<(f64, usize)>> = BTreeMap::new();
        for (i, v) in self.vehicles.iter().enumerate() {
            lanes
                .entry((v.edge().as_str(), v.lane))
                .or_default()
                .push((v.offset, i));
        }

        let mut gaps = vec![f64::INFINITY; self.vehicles.len()];
        for queue in lanes.values_mut() {
            queue.sort_by(|a, b| a.0.total_cmp(&b.0));
            for pair in queue.windows(2) {
                let (follower_offset, follower) = pair[0];
                let (leader_offset, leader) = pair[1];
                gaps[follower] =
                    leader_offset - self.vehicles[leader].class.length() - follower_offset;
            }
        }
        gaps
    }

    fn move_vehicles(&mut self) {
        let gaps = self.leader_gaps();
        let step = self.steps;

        let mut next = Vec::with_capacity(self.vehicles.len());
        let vehicles = std::mem::take(&mut self.vehicles);
        for (mut v, gap) in vehicles.into_iter().zip(gaps) {
            let Some((geometry, _)) = self.geometry(v.edge()) else {
                continue;
            };
            let length = geometry.spec.length;
            let lanes = geometry.spec.lanes;

            if let Some(target) = v.lane_request.take() {
                v.lane = target.min(lanes - 1);
            }

            let mut room = gap - MIN_GAP;
            if !self.signal_green(v.edge(), step) {
                room = room.min(length - v.offset - MIN_GAP);
            }

            let target = v.speed_override.unwrap_or_else(|| {
                v.class.max_speed().min(geometry.spec.speed_limit) * v.speed_factor
            });
            let speed = (v.speed + v.class.accel() * STEP_LENGTH)
                .min(target)
                .min(room.max(0.0) / STEP_LENGTH)
                .max(0.0);

            v.speed = speed;
            v.offset += speed * STEP_LENGTH;
            v.waiting = if speed < HALTING_SPEED {
                v.waiting + STEP_LENGTH
            } else {
                0.0
            };

            if self.carry_over(&mut v) {
                next.push(v);
            } else {
                debug!("{} reached the end of its route", v.id);
            }
        }
        self.vehicles = next;
    }

    /// Moves a vehicle past the end of its edge onto the next route edge.
    /// Returns false once the route is exhausted.
    fn carry_over(&self, v: &mut SyntheticVehicle) -> bool {
        loop {
            let Some((geometry, _)) = self.geometry(v.edge()) else {
                return false;
            };
            if v.offset < geometry.spec.length {
                return true;
            }
            if v.route_index + 1 >= v.route.len() {
                return false;
            }
            v.offset -= geometry.spec.length;
            v.route_index += 1;
            if let Some((next, _)) = self.geometry(v.edge()) {
                v.lane = v.lane.min(next.spec.lanes - 1);
            }
        }
    }

    fn insert_vehicles(&mut self) {
        for flow_idx in 0..self.config.flows.len() {
            let rate = self.config.flows[flow_idx].rate.clamp(0.0, 1.0);
            if self.rng.gen_bool(rate) {
                self.flows[flow_idx].backlog += 1;
            }
            if self.flows[flow_idx].backlog == 0 {
                continue;
            }

            let flow = &self.config.flows[flow_idx];
            let entry = EdgeId::new(&flow.route[0]);
            let Some(lanes) = self.geometry(&entry).map(|(g, _)| g.spec.lanes) else {
                continue;
            };
            let lane = self.rng.gen_range(0..lanes);
            let clearance = flow.class.length() + 2.0 * MIN_GAP;
            let blocked = self
                .vehicles
                .iter()
                .any(|v| v.edge() == &entry && v.lane == lane && v.offset < clearance);
            if blocked {
                continue;
            }

            let state = &mut self.flows[flow_idx];
            let id = VehicleId::new(format!("{}.{}", flow.name, state.emitted));
            state.emitted += 1;
            state.backlog -= 1;

            let factor = self.speed_factor.sample(&mut self.rng).clamp(0.8, 1.2);
            self.vehicles.push(SyntheticVehicle {
                id,
                class: flow.class,
                route: flow.route.iter().map(EdgeId::new).collect(),
                route_index: 0,
                lane,
                offset: 0.0,
                speed: 0.0,
                speed_factor: factor,
                waiting: 0.0,
                speed_override: None,
                lane_request: None,
            });
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .vehicles
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id.clone(), i))
            .collect();
    }

    fn edge_lanes(&self, edge: &EdgeId) -> Result<u32, MutationFailure> {
        self.geometry(edge)
            .map(|(g, _)| g.spec.lanes)
            .ok_or_else(|| MutationFailure::UnknownEdge(edge.clone()))
    }
}

impl TrafficSimulator for SyntheticTraffic {
    fn advance_tick(&mut self) -> Result<(), SimError> {
        self.ensure_open()?;
        self.move_vehicles();
        self.insert_vehicles();
        self.reindex();
        self.steps += 1;
        Ok(())
    }

    fn active_vehicles(&mut self) -> Result<Vec<VehicleId>, SimError> {
        self.ensure_open()?;
        Ok(self.vehicles.iter().map(|v| v.id.clone()).collect())
    }

    fn position(&mut self, id: &VehicleId) -> Result<Position, SimError> {
        let v = self.vehicle(id)?;
        let (geometry, reversed) = self
            .geometry(v.edge())
            .ok_or_else(|| SimError::query(id, format!("vehicle on unknown edge {}", v.edge())))?;
        let lane_y = (v.lane as f64 + 0.5) * LANE_WIDTH;
        Ok(if reversed {
            Point2::new(geometry.start_x + geometry.spec.length - v.offset, -lane_y)
        } else {
            Point2::new(geometry.start_x + v.offset, lane_y)
        })
    }

    fn speed(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        Ok(self.vehicle(id)?.speed)
    }

    fn waiting_time(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        Ok(self.vehicle(id)?.waiting)
    }

    fn lane_id(&mut self, id: &VehicleId) -> Result<LaneId, SimError> {
        let v = self.vehicle(id)?;
        Ok(LaneId::on_edge(v.edge(), v.lane))
    }

    fn max_speed(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        Ok(self.vehicle(id)?.class.max_speed())
    }

    fn lane_index(&mut self, id: &VehicleId) -> Result<u32, SimError> {
        Ok(self.vehicle(id)?.lane)
    }

    fn road_id(&mut self, id: &VehicleId) -> Result<EdgeId, SimError> {
        Ok(self.vehicle(id)?.edge().clone())
    }

    fn lane_count(&mut self, road: &EdgeId) -> Result<u32, SimError> {
        self.geometry(road)
            .map(|(g, _)| g.spec.lanes)
            .ok_or_else(|| SimError::query(road, "unknown edge"))
    }

    fn route(&mut self, id: &VehicleId) -> Result<Vec<EdgeId>, SimError> {
        Ok(self.vehicle(id)?.route.clone())
    }

    fn request_lane_change(
        &mut self,
        id: &VehicleId,
        target_index: u32,
        _urgency: f64,
    ) -> Result<(), MutationFailure> {
        let edge = self.vehicle_mut(id)?.edge().clone();
        let lanes = self.edge_lanes(&edge)?;
        if target_index >= lanes {
            return Err(MutationFailure::InvalidLane {
                requested: target_index as i64,
                lane_count: lanes,
            });
        }
        self.vehicle_mut(id)?.lane_request = Some(target_index);
        Ok(())
    }

    fn set_route(&mut self, id: &VehicleId, edges: &[EdgeId]) -> Result<(), MutationFailure> {
        let Some(first) = edges.first() else {
            return Err(MutationFailure::Rejected("empty route".into()));
        };
        for edge in edges {
            self.edge_lanes(edge)?;
        }
        let first_lanes = self.edge_lanes(first)?;
        let first_length = self
            .geometry(first)
            .map(|(g, _)| g.spec.length)
            .unwrap_or_default();

        let v = self.vehicle_mut(id)?;
        let current = v.edge().clone();
        if &current != first {
            // Turning onto the opposite direction keeps the vehicle in place
            v.offset = if current.reversed() == *first {
                (first_length - v.offset).max(0.0)
            } else {
                0.0
            };
            v.lane = v.lane.min(first_lanes - 1);
            v.lane_request = None;
        }
        v.route = edges.to_vec();
        v.route_index = 0;
        Ok(())
    }

    fn set_speed(&mut self, id: &VehicleId, command: SpeedCommand) -> Result<(), MutationFailure> {
        let v = self.vehicle_mut(id)?;
        match command {
            SpeedCommand::Override(speed) if !speed.is_finite() || speed < 0.0 => {
                Err(MutationFailure::InvalidSpeed(speed))
            }
            SpeedCommand::Override(speed) => {
                v.speed_override = Some(speed);
                Ok(())
            }
            SpeedCommand::Release => {
                v.speed_override = None;
                Ok(())
            }
        }
    }

    fn snapshot(&mut self, id: &VehicleId) -> Result<KinematicsSnapshot, SimError> {
        let position = self.position(id)?;
        let v = self.vehicle(id)?;
        let road_id = v.edge().clone();
        let lane_count = self
            .geometry(&road_id)
            .map(|(g, _)| g.spec.lanes)
            .ok_or_else(|| SimError::query(&road_id, "unknown edge"))?;

        Ok(KinematicsSnapshot {
            position,
            speed: v.speed,
            waiting_time: v.waiting,
            lane_id: LaneId::on_edge(&road_id, v.lane),
            max_speed: v.class.max_speed(),
            lane_index: v.lane,
            lane_count,
            route: v.route.clone(),
            road_id,
        })
    }

    fn close(&mut self) -> Result<(), SimError> {
        self.closed = true;
        self.vehicles.clear();
        self.index.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn single_car_config() -> SyntheticConfig {
        SyntheticConfig {
            edges: vec![
                EdgeSpec::new("E1", 100.0, 2, 10.0),
                EdgeSpec::new("E2", 50.0, 1, 10.0),
            ],
            flows: vec![FlowSpec::new("morning_cars", VehicleClass::Car, 1.0, &["E1", "E2"])],
            signal_cycle: 60,
            green_ratio: 1.0,
            speed_factor_dev: 0.0,
        }
    }

    fn run(sim: &mut SyntheticTraffic, ticks: usize) {
        for _ in 0..ticks {
            sim.advance_tick().unwrap();
        }
    }

    #[test]
    fn test_flow_ids_follow_naming() {
        let mut sim = SyntheticTraffic::new(SyntheticConfig::default(), 7).unwrap();
        run(&mut sim, 50);

        let ids = sim.active_vehicles().unwrap();
        assert!(!ids.is_empty());
        for id in ids {
            let (flow, n) = id.as_str().split_once('.').unwrap();
            assert!(flow == "morning_cars" || flow == "morning_bikes");
            assert!(n.parse::<u64>().is_ok());
        }
    }

    #[test]
    fn test_same_seed_same_traffic() {
        let mut a = SyntheticTraffic::new(SyntheticConfig::default(), 11).unwrap();
        let mut b = SyntheticTraffic::new(SyntheticConfig::default(), 11).unwrap();
        run(&mut a, 120);
        run(&mut b, 120);

        let ids = a.active_vehicles().unwrap();
        assert_eq!(ids, b.active_vehicles().unwrap());
        for id in &ids {
            assert_eq!(a.snapshot(id).unwrap(), b.snapshot(id).unwrap());
        }
    }

    #[test]
    fn test_vehicle_accelerates_and_retires() {
        let mut sim = SyntheticTraffic::new(single_car_config(), 1).unwrap();
        sim.advance_tick().unwrap();
        let id = VehicleId::from("morning_cars.0");

        let snapshot = sim.snapshot(&id).unwrap();
        assert_relative_eq!(snapshot.speed, 0.0);
        assert_eq!(snapshot.road_id, EdgeId::from("E1"));
        assert_eq!(snapshot.max_speed, 16.0);

        sim.advance_tick().unwrap();
        assert_relative_eq!(sim.speed(&id).unwrap(), 2.6);

        // 150 m at <= 10 m/s; gone well before 40 ticks
        run(&mut sim, 40);
        assert!(sim.snapshot(&id).is_err());
    }

    #[test]
    fn test_route_keeps_passed_edges() {
        let mut sim = SyntheticTraffic::new(single_car_config(), 1).unwrap();
        let id = VehicleId::from("morning_cars.0");
        let mut on_second_edge = false;
        for _ in 0..30 {
            sim.advance_tick().unwrap();
            if sim.road_id(&id).unwrap() == EdgeId::from("E2") {
                on_second_edge = true;
                break;
            }
        }
        assert!(on_second_edge);

        let route = sim.route(&id).unwrap();
        assert_eq!(route, vec![EdgeId::from("E1"), EdgeId::from("E2")]);
    }

    #[test]
    fn test_red_signal_builds_waiting_time() {
        let mut config = single_car_config();
        config.green_ratio = 0.0;
        let mut sim = SyntheticTraffic::new(config, 3).unwrap();
        run(&mut sim, 60);

        let id = VehicleId::from("morning_cars.0");
        let snapshot = sim.snapshot(&id).unwrap();
        assert_eq!(snapshot.road_id, EdgeId::from("E1"));
        assert!(snapshot.waiting_time > 10.0);
        assert!(snapshot.position.x < 100.0);
    }

    #[test]
    fn test_lane_change_validation() {
        let mut sim = SyntheticTraffic::new(single_car_config(), 1).unwrap();
        sim.advance_tick().unwrap();
        let id = VehicleId::from("morning_cars.0");

        let err = sim.request_lane_change(&id, 2, 3.0).unwrap_err();
        assert_eq!(
            err,
            MutationFailure::InvalidLane {
                requested: 2,
                lane_count: 2
            }
        );

        let current = sim.lane_index(&id).unwrap();
        sim.request_lane_change(&id, 1 - current, 3.0).unwrap();
        sim.advance_tick().unwrap();
        assert_eq!(sim.lane_index(&id).unwrap(), 1 - current);

        let ghost = VehicleId::from("ghost.0");
        assert!(matches!(
            sim.request_lane_change(&ghost, 0, 3.0),
            Err(MutationFailure::UnknownVehicle(_))
        ));
    }

    #[test]
    fn test_reversed_route_turns_vehicle_around() {
        let mut sim = SyntheticTraffic::new(single_car_config(), 1).unwrap();
        run(&mut sim, 4);
        let id = VehicleId::from("morning_cars.0");
        let before = sim.position(&id).unwrap();

        sim.set_route(&id, &[EdgeId::from("-E1"), EdgeId::from("E2")])
            .unwrap();
        let after = sim.position(&id).unwrap();
        assert_eq!(sim.road_id(&id).unwrap(), EdgeId::from("-E1"));
        assert_relative_eq!(after.x, before.x, epsilon = 1e-9);
        assert!(after.y < 0.0);
        assert_eq!(sim.lane_count(&EdgeId::from("-E1")).unwrap(), 2);

        assert_eq!(
            sim.set_route(&id, &[EdgeId::from("E9")]),
            Err(MutationFailure::UnknownEdge(EdgeId::from("E9")))
        );
    }

    #[test]
    fn test_speed_override_and_release() {
        let mut sim = SyntheticTraffic::new(single_car_config(), 1).unwrap();
        run(&mut sim, 6);
        let id = VehicleId::from("morning_cars.0");

        sim.set_speed(&id, SpeedCommand::Override(1.0)).unwrap();
        sim.advance_tick().unwrap();
        assert!(sim.speed(&id).unwrap() <= 1.0);

        sim.set_speed(&id, SpeedCommand::Release).unwrap();
        sim.advance_tick().unwrap();
        assert!(sim.speed(&id).unwrap() > 1.0);

        assert_eq!(
            sim.set_speed(&id, SpeedCommand::Override(-2.0)),
            Err(MutationFailure::InvalidSpeed(-2.0))
        );
    }

    #[test]
    fn test_bad_layout_is_startup_error() {
        let mut config = single_car_config();
        config.flows[0].route = vec!["E7".into()];
        assert!(matches!(
            SyntheticTraffic::new(config, 1),
            Err(SimError::Startup(_))
        ));
    }

    #[test]
    fn test_closed_simulator_refuses_steps() {
        let mut sim = SyntheticTraffic::new(single_car_config(), 1).unwrap();
        sim.close().unwrap();
        assert!(matches!(sim.advance_tick(), Err(SimError::Closed)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_kinematics_stay_physical(seed in any::<u64>()) {
            let mut sim = SyntheticTraffic::new(SyntheticConfig::default(), seed).unwrap();
            for _ in 0..150 {
                sim.advance_tick().unwrap();
                for id in sim.active_vehicles().unwrap() {
                    let s = sim.snapshot(&id).unwrap();
                    prop_assert!(s.speed >= 0.0 && s.speed <= 18.0 * 1.2);
                    prop_assert!(s.position.x >= 0.0 && s.position.x <= 700.0);
                    prop_assert!(s.lane_index < s.lane_count);
                }
            }
        }
    }
}
