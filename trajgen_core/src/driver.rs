//! Driver Loop - ticks the simulator and orchestrates the injection engine.
//!
//! # Per-tick flow
//!
//! ```text
//! advance_tick() ──► active_vehicles() ──► contagion.prune(tick)
//!                                               │
//!        ┌──────────────────────────────────────┘
//!        ▼  for each vehicle, in simulator order
//!   snapshot ─► registry.get_or_create ─► expiry.process
//!            ─► pressure.evaluate ─► engine.evaluate ─► sink.write_row
//!        │
//!        ▼
//!   expiry.sweep_departed ─► registry.prune ─► tick += 1
//! ```
//!
//! The loop runs exactly `total_ticks` ticks unless cancelled. Simulator
//! read/advance failures and sink failures abort the run; rejected
//! mutations never do.

use crate::config::{CapabilityConfig, ConfigError, InjectionConfig};
use crate::contagion::ContagionBuffer;
use crate::decision::{DecisionContext, DecisionEngine};
use crate::expiry::ExpiryManager;
use crate::metrics::InjectionMetrics;
use crate::pressure::PressureModel;
use crate::registry::{CapabilityClassifier, EntityRegistry};
use crate::streams::RngStreams;
use crate::trajectory::{SinkError, TrajectoryRow, TrajectorySink};

use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, trace, warn};
use trajgen_env::{CancelToken, SimError, TrafficSimulator, VehicleId};

/// Fatal errors of a run.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Simulator startup failed: {0}")]
    Startup(#[source] SimError),

    #[error("Advancing to tick {tick} failed: {source}")]
    Advance {
        tick: u64,
        #[source]
        source: SimError,
    },

    #[error("Reading {vehicle} at tick {tick} failed: {source}")]
    Query {
        tick: u64,
        vehicle: String,
        #[source]
        source: SimError,
    },

    #[error("Trajectory log write failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    Completed,
    Cancelled { at_tick: u64 },
}

/// Result of a finished (or cancelled) run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub metrics: InjectionMetrics,
}

/// Owns every piece of run state and drives it tick by tick.
pub struct Driver<S, K, C = CapabilityConfig>
where
    S: TrafficSimulator,
    K: TrajectorySink,
    C: CapabilityClassifier,
{
    config: InjectionConfig,
    sim: S,
    sink: K,
    registry: EntityRegistry<C>,
    contagion: ContagionBuffer,
    pressure: PressureModel,
    engine: DecisionEngine,
    expiry: ExpiryManager,
    metrics: InjectionMetrics,
    tick: u64,
}

impl<S, K> Driver<S, K>
where
    S: TrafficSimulator,
    K: TrajectorySink,
{
    /// Creates a driver over an already started simulator, classifying
    /// vehicles with the config's capability settings.
    pub fn new(config: InjectionConfig, sim: S, sink: K) -> Result<Self, DriverError> {
        let classifier = config.capability.clone();
        Self::with_classifier(config, sim, sink, classifier)
    }
}

impl<S, K, C> Driver<S, K, C>
where
    S: TrafficSimulator,
    K: TrajectorySink,
    C: CapabilityClassifier,
{
    /// Creates a driver with a custom capability classifier.
    pub fn with_classifier(
        config: InjectionConfig,
        sim: S,
        sink: K,
        classifier: C,
    ) -> Result<Self, DriverError> {
        config.validate()?;

        let streams = RngStreams::new(config.seed);
        Ok(Self {
            registry: EntityRegistry::new(streams, classifier),
            contagion: ContagionBuffer::new(config.contagion_duration),
            pressure: PressureModel::from_config(&config),
            engine: DecisionEngine::new(&config, streams),
            expiry: ExpiryManager::new(),
            metrics: InjectionMetrics::new(),
            tick: 0,
            config,
            sim,
            sink,
        })
    }

    /// Runs until `total_ticks` ticks have been processed or `cancel` fires.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<RunSummary, DriverError> {
        info!(
            "Starting injection run: {} ticks (seed={})",
            self.config.total_ticks, self.config.seed
        );

        while self.tick < self.config.total_ticks {
            if cancel.is_cancelled() {
                warn!("Run cancelled at tick {}", self.tick);
                self.sink.flush()?;
                return Ok(self.summary(RunOutcome::Cancelled { at_tick: self.tick }));
            }
            self.step()?;
        }

        self.sink.flush()?;
        info!(
            "Run complete: {} ticks, {} rows, mean violation rate {:.4}",
            self.metrics.ticks_executed,
            self.metrics.rows_written,
            self.metrics.mean_violation_rate()
        );
        Ok(self.summary(RunOutcome::Completed))
    }

    /// Processes exactly one tick.
    pub fn step(&mut self) -> Result<(), DriverError> {
        let tick = self.tick;

        self.sim
            .advance_tick()
            .map_err(|source| DriverError::Advance { tick, source })?;
        let vehicles = self
            .sim
            .active_vehicles()
            .map_err(|source| DriverError::Advance { tick, source })?;

        self.contagion.prune(tick);

        let mut violating = 0u64;
        for id in &vehicles {
            let snapshot = self.sim.snapshot(id).map_err(|source| DriverError::Query {
                tick,
                vehicle: id.to_string(),
                source,
            })?;

            let state = self.registry.get_or_create(id);

            let expired = self.expiry.process(tick, id, state, &mut self.sim);
            self.metrics.record_expiry(&expired);

            let pressure = self.pressure.evaluate(&snapshot, &self.contagion);

            let decision = self.engine.evaluate(
                DecisionContext {
                    tick,
                    vehicle: id,
                    snapshot: &snapshot,
                    pressure,
                },
                &mut self.sim,
                state,
                &mut self.contagion,
            );

            self.sink
                .write_row(&TrajectoryRow::new(tick, id, &snapshot, decision.label))?;

            if decision.label.is_violation() {
                violating += 1;
            }
            self.metrics.record_decision(&decision);
        }

        let active: HashSet<VehicleId> = vehicles.iter().cloned().collect();
        let swept = self
            .expiry
            .sweep_departed(tick, &mut self.registry, &active, &mut self.sim);
        self.metrics.record_expiry(&swept);
        self.metrics.pruned_states += self.registry.prune(&active) as u64;

        self.metrics
            .record_peaks(self.registry.peak_len(), self.contagion.peak_len());
        self.metrics.record_tick(vehicles.len() as u64, violating);

        trace!(
            "tick {} | vehicles={} | violations={} | tracked={} | contagion={}",
            tick,
            vehicles.len(),
            violating,
            self.registry.len(),
            self.contagion.len()
        );

        self.tick += 1;
        Ok(())
    }

    fn summary(&self, outcome: RunOutcome) -> RunSummary {
        RunSummary {
            outcome,
            metrics: self.metrics.clone(),
        }
    }

    /// Next tick to be processed.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &InjectionConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry<C> {
        &self.registry
    }

    pub fn contagion(&self) -> &ContagionBuffer {
        &self.contagion
    }

    pub fn metrics(&self) -> &InjectionMetrics {
        &self.metrics
    }

    pub fn simulator(&self) -> &S {
        &self.sim
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Tears the driver down, returning the simulator and sink.
    pub fn into_parts(self) -> (S, K) {
        (self.sim, self.sink)
    }
}
