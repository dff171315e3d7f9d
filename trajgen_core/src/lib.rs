//! trajgen Core - Behavioral Anomaly Injection Engine
//!
//! Overlays rare, socially-propagating driving violations onto a running
//! traffic simulation and records a labelled trajectory log:
//! 1. **Latent traits**: per-vehicle aggressiveness and capability, fixed at first sight
//! 2. **Pressure**: congestion, speed deficit and nearby violations folded into one score
//! 3. **Generators**: aggressive lane change, short wrong-way detour, speed surge
//! 4. **Expiry**: temporary effects reversed strictly after their deadline
//!
//! The [`Driver`] ties these together over any [`trajgen_env::TrafficSimulator`].

pub mod config;
pub mod contagion;
pub mod decision;
pub mod driver;
pub mod expiry;
pub mod metrics;
pub mod pressure;
pub mod registry;
pub mod streams;
pub mod trajectory;

// Re-export key types for convenience
pub use config::{BehaviorToggles, CapabilityConfig, ConfigError, InjectionConfig};
pub use contagion::{ContagionBuffer, ViolationEvent};
pub use decision::{Decision, DecisionContext, DecisionEngine, ViolationType};
pub use driver::{Driver, DriverError, RunOutcome, RunSummary};
pub use expiry::{Effect, ExpiryManager, ExpiryOutcome};
pub use metrics::InjectionMetrics;
pub use pressure::{PressureBreakdown, PressureModel};
pub use registry::{CapabilityClassifier, EntityRegistry, VehicleState};
pub use streams::{Generator, RngStreams};
pub use trajectory::{
    CsvSink, JsonLinesSink, MemorySink, SinkError, TrajectoryRow, TrajectorySink, CSV_HEADER,
};
