//! The capability surface the injection core needs from a traffic simulator.

use crate::error::{MutationFailure, SimError};
use crate::types::{EdgeId, KinematicsSnapshot, LaneId, Position, SpeedCommand, VehicleId};

/// The central interface to the external microscopic simulator.
///
/// All calls are blocking; the simulator is advanced one tick at a time and
/// every vehicle is processed sequentially within a tick.
///
/// # Implementations
///
/// - **SUMO**: `TraciClient` - TraCI over TCP to a launched `sumo` process
/// - **Synthetic**: `SyntheticTraffic` - seeded in-process corridor model
/// - **Scripted**: [`ScriptedSimulator`](crate::ScriptedSimulator) - fixed replay
///
/// # Errors
///
/// Reads return [`SimError`] and are treated as fatal by the driver.
/// Mutations return [`MutationFailure`] and are recovered locally.
pub trait TrafficSimulator {
    /// Advances the simulation by exactly one tick.
    fn advance_tick(&mut self) -> Result<(), SimError>;

    /// Vehicles currently in the network, in the simulator's reported order.
    fn active_vehicles(&mut self) -> Result<Vec<VehicleId>, SimError>;

    fn position(&mut self, id: &VehicleId) -> Result<Position, SimError>;

    fn speed(&mut self, id: &VehicleId) -> Result<f64, SimError>;

    fn waiting_time(&mut self, id: &VehicleId) -> Result<f64, SimError>;

    fn lane_id(&mut self, id: &VehicleId) -> Result<LaneId, SimError>;

    fn max_speed(&mut self, id: &VehicleId) -> Result<f64, SimError>;

    fn lane_index(&mut self, id: &VehicleId) -> Result<u32, SimError>;

    fn road_id(&mut self, id: &VehicleId) -> Result<EdgeId, SimError>;

    /// Number of lanes on a road.
    fn lane_count(&mut self, road: &EdgeId) -> Result<u32, SimError>;

    /// Current planned route (ordered edge ids).
    fn route(&mut self, id: &VehicleId) -> Result<Vec<EdgeId>, SimError>;

    /// Asks the vehicle to move to `target_index` on its current road.
    ///
    /// `urgency` is the duration (s) the simulator should try to hold the
    /// requested lane.
    fn request_lane_change(
        &mut self,
        id: &VehicleId,
        target_index: u32,
        urgency: f64,
    ) -> Result<(), MutationFailure>;

    /// Replaces the vehicle's route.
    fn set_route(&mut self, id: &VehicleId, edges: &[EdgeId]) -> Result<(), MutationFailure>;

    /// Overrides or releases the vehicle's speed.
    fn set_speed(&mut self, id: &VehicleId, command: SpeedCommand) -> Result<(), MutationFailure>;

    /// Reads the full per-tick kinematics of one vehicle.
    fn snapshot(&mut self, id: &VehicleId) -> Result<KinematicsSnapshot, SimError> {
        let road_id = self.road_id(id)?;
        let lane_count = self.lane_count(&road_id)?;

        Ok(KinematicsSnapshot {
            position: self.position(id)?,
            speed: self.speed(id)?,
            waiting_time: self.waiting_time(id)?,
            lane_id: self.lane_id(id)?,
            max_speed: self.max_speed(id)?,
            lane_index: self.lane_index(id)?,
            route: self.route(id)?,
            road_id,
            lane_count,
        })
    }

    /// Shuts the simulator down. Further calls may fail with [`SimError::Closed`].
    fn close(&mut self) -> Result<(), SimError> {
        Ok(())
    }
}

impl<S: TrafficSimulator + ?Sized> TrafficSimulator for Box<S> {
    fn advance_tick(&mut self) -> Result<(), SimError> {
        (**self).advance_tick()
    }

    fn active_vehicles(&mut self) -> Result<Vec<VehicleId>, SimError> {
        (**self).active_vehicles()
    }

    fn position(&mut self, id: &VehicleId) -> Result<Position, SimError> {
        (**self).position(id)
    }

    fn speed(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        (**self).speed(id)
    }

    fn waiting_time(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        (**self).waiting_time(id)
    }

    fn lane_id(&mut self, id: &VehicleId) -> Result<LaneId, SimError> {
        (**self).lane_id(id)
    }

    fn max_speed(&mut self, id: &VehicleId) -> Result<f64, SimError> {
        (**self).max_speed(id)
    }

    fn lane_index(&mut self, id: &VehicleId) -> Result<u32, SimError> {
        (**self).lane_index(id)
    }

    fn road_id(&mut self, id: &VehicleId) -> Result<EdgeId, SimError> {
        (**self).road_id(id)
    }

    fn lane_count(&mut self, road: &EdgeId) -> Result<u32, SimError> {
        (**self).lane_count(road)
    }

    fn route(&mut self, id: &VehicleId) -> Result<Vec<EdgeId>, SimError> {
        (**self).route(id)
    }

    fn request_lane_change(
        &mut self,
        id: &VehicleId,
        target_index: u32,
        urgency: f64,
    ) -> Result<(), MutationFailure> {
        (**self).request_lane_change(id, target_index, urgency)
    }

    fn set_route(&mut self, id: &VehicleId, edges: &[EdgeId]) -> Result<(), MutationFailure> {
        (**self).set_route(id, edges)
    }

    fn set_speed(&mut self, id: &VehicleId, command: SpeedCommand) -> Result<(), MutationFailure> {
        (**self).set_speed(id, command)
    }

    fn snapshot(&mut self, id: &VehicleId) -> Result<KinematicsSnapshot, SimError> {
        (**self).snapshot(id)
    }

    fn close(&mut self) -> Result<(), SimError> {
        (**self).close()
    }
}
