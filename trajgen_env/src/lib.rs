//! trajgen Simulator Abstraction Layer
//!
//! This crate provides the seam between the anomaly injection core and the
//! microscopic traffic simulator that actually moves the vehicles. The core
//! only ever talks to a [`TrafficSimulator`]; concrete backends are:
//!
//! - **SUMO** (via TraCI, in `trajgen_sim`)
//! - **Synthetic** (in-process corridor model, in `trajgen_sim`)
//! - **Scripted** ([`ScriptedSimulator`], fixed replay for deterministic tests)
//!
//! # Capability Surface
//!
//! ```text
//!   advance_tick()            position / speed / waiting_time
//!   active_vehicles()         lane_id / lane_index / road_id / lane_count
//!   max_speed() / route()     request_lane_change / set_route / set_speed
//! ```
//!
//! Reads return [`SimError`] (a broken simulator link, fatal to a run).
//! Mutations return [`MutationFailure`] (a rejected request, recovered locally).
//!
//! # Example
//!
//! ```ignore
//! use trajgen_env::{TrafficSimulator, CancelToken};
//!
//! fn drive<S: TrafficSimulator>(sim: &mut S, cancel: &CancelToken) -> Result<(), SimError> {
//!     while !cancel.is_cancelled() {
//!         sim.advance_tick()?;
//!         for id in sim.active_vehicles()? {
//!             let snapshot = sim.snapshot(&id)?;
//!             // ...
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod cancel;
mod error;
mod scripted;
mod simulator;
mod types;

pub use cancel::CancelToken;
pub use error::{MutationFailure, SimError};
pub use scripted::{MutationKind, MutationRecord, MutationRequest, ScriptedSimulator, VehicleFrame};
pub use simulator::TrafficSimulator;
pub use types::{EdgeId, KinematicsSnapshot, LaneId, Position, SpeedCommand, VehicleId};
