//! Common types for the simulator abstraction.

use serde::{Deserialize, Serialize};

/// Planar position in the simulator's network coordinates (meters).
pub type Position = nalgebra::Point2<f64>;

/// Identifier of a simulated vehicle as reported by the simulator.
///
/// SUMO flow vehicles look like `morning_bikes.17`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a road (edge) in the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    /// Marker prefix for the opposite-direction twin of an edge.
    pub const REVERSE_MARKER: char = '-';

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the opposite-direction alias by toggling the leading marker.
    ///
    /// `"239840578#0"` becomes `"-239840578#0"` and vice versa.
    pub fn reversed(&self) -> Self {
        match self.0.strip_prefix(Self::REVERSE_MARKER) {
            Some(forward) => Self(forward.to_string()),
            None => Self(format!("{}{}", Self::REVERSE_MARKER, self.0)),
        }
    }

    /// True if this id carries the reverse marker.
    pub fn is_reversed(&self) -> bool {
        self.0.starts_with(Self::REVERSE_MARKER)
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EdgeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a single lane (`<edge>_<index>` in SUMO).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneId(pub String);

impl LaneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the conventional lane id for an edge and lane index.
    pub fn on_edge(edge: &EdgeId, index: u32) -> Self {
        Self(format!("{}_{}", edge.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Speed request sent to the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpeedCommand {
    /// Hold the vehicle at this speed (m/s) until released.
    Override(f64),

    /// Hand speed control back to the simulator's car-following model.
    Release,
}

impl SpeedCommand {
    /// Wire value used by TraCI, where any negative speed releases the override.
    pub fn wire_value(&self) -> f64 {
        match self {
            SpeedCommand::Override(v) => *v,
            SpeedCommand::Release => -1.0,
        }
    }
}

/// Per-vehicle, per-tick kinematics read from the simulator.
///
/// Owned by the simulator; the core only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KinematicsSnapshot {
    pub position: Position,

    /// Current speed (m/s)
    pub speed: f64,

    /// Accumulated time spent below the halting threshold (s)
    pub waiting_time: f64,

    pub lane_id: LaneId,

    /// Desired / maximum speed of the vehicle (m/s)
    pub max_speed: f64,

    pub road_id: EdgeId,

    pub lane_index: u32,

    /// Number of lanes on `road_id`
    pub lane_count: u32,

    /// Full planned route from the departure edge, including edges
    /// already passed
    pub route: Vec<EdgeId>,
}
