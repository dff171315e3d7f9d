//! Error types for the simulator abstraction.

use crate::types::{EdgeId, VehicleId};
use thiserror::Error;

/// Failures that break the link to the simulator.
///
/// These are fatal to a run: the driver aborts and no further rows are written.
#[derive(Debug, Error)]
pub enum SimError {
    /// Simulator could not be launched, reached, or is misconfigured
    #[error("Simulator startup failed: {0}")]
    Startup(String),

    /// Advancing the simulation by one tick failed
    #[error("Simulation step failed at tick {tick}: {reason}")]
    Advance { tick: u64, reason: String },

    /// A read query was rejected or returned garbage
    #[error("Query {what} failed: {reason}")]
    Query { what: String, reason: String },

    /// Socket / pipe level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed response from the simulator
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The simulator has already been closed
    #[error("Simulator connection closed")]
    Closed,
}

impl SimError {
    /// Creates a query error.
    pub fn query(what: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::Query {
            what: what.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a startup error.
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// A rejected vehicle mutation (lane change, reroute, speed set).
///
/// Recovered locally: the generator that asked for it drops its label and
/// side effect, and processing continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationFailure {
    #[error("vehicle {0} is not known to the simulator")]
    UnknownVehicle(VehicleId),

    #[error("edge {0} does not exist")]
    UnknownEdge(EdgeId),

    #[error("lane {requested} out of range (edge has {lane_count} lanes)")]
    InvalidLane { requested: i64, lane_count: u32 },

    #[error("speed {0} is not a valid override")]
    InvalidSpeed(f64),

    #[error("simulator rejected request: {0}")]
    Rejected(String),

    #[error("transport failed during mutation: {0}")]
    Transport(String),
}

impl MutationFailure {
    /// Short stable label, used as a metrics key.
    pub fn reason(&self) -> &'static str {
        match self {
            MutationFailure::UnknownVehicle(_) => "unknown_vehicle",
            MutationFailure::UnknownEdge(_) => "unknown_edge",
            MutationFailure::InvalidLane { .. } => "invalid_lane",
            MutationFailure::InvalidSpeed(_) => "invalid_speed",
            MutationFailure::Rejected(_) => "rejected",
            MutationFailure::Transport(_) => "transport",
        }
    }
}

impl From<SimError> for MutationFailure {
    fn from(e: SimError) -> Self {
        match e {
            SimError::Transport(msg) => Self::Transport(msg),
            other => Self::Rejected(other.to_string()),
        }
    }
}
