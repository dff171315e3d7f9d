//! trajgen Simulator Backends and Harness
//!
//! Concrete [`TrafficSimulator`](trajgen_env::TrafficSimulator)s for the
//! injection driver, plus the pieces the `trajgen` binary is assembled from.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      trajgen (CLI)                        │
//! │   clap args ─► InjectionConfig ─► Driver ─► RunReport     │
//! │                                    │                      │
//! │               ┌────────────────────┴──────────┐           │
//! │          ┌────▼────────────┐        ┌─────────▼───────┐   │
//! │          │ SyntheticTraffic│        │   TraciClient   │   │
//! │          │ (seeded corridor)│        │  (TCP ◄─► sumo) │   │
//! │          └─────────────────┘        └─────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trajgen_core::{Driver, InjectionConfig, MemorySink};
//! use trajgen_env::CancelToken;
//! use trajgen_sim::{traffic_seed, ScenarioId, SyntheticTraffic};
//!
//! let config = InjectionConfig::default().with_seed(42);
//! let sim = SyntheticTraffic::new(ScenarioId::PeakCorridor.synthetic_config(), traffic_seed(42))?;
//! let mut driver = Driver::new(config, sim, MemorySink::new())?;
//! let summary = driver.run(&CancelToken::new())?;
//! ```

mod exporter;
pub mod scenarios;
pub mod synthetic;
pub mod traci;

pub use exporter::RunReport;
pub use scenarios::ScenarioId;
pub use synthetic::{EdgeSpec, FlowSpec, SyntheticConfig, SyntheticTraffic, VehicleClass};
pub use traci::{TraciClient, TraciConfig};

/// Seed for the traffic model, derived from the master seed.
///
/// Kept separate from the injection streams so that changing injection
/// settings never changes the underlying traffic.
pub fn traffic_seed(master_seed: u64) -> u64 {
    master_seed.wrapping_mul(0x9e3779b97f4a7c15)
}
