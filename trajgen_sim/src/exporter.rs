//! JSON run report.
//!
//! Everything needed to reproduce and audit one trajectory log: which
//! backend produced it, the effective configuration and what the injection
//! engine did.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use trajgen_core::{InjectionConfig, RunSummary};
use uuid::Uuid;

/// Complete report of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique id of this run
    pub run_id: Uuid,

    /// `synthetic` or `sumo`
    pub backend: String,

    /// Synthetic preset, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,

    pub seed: u64,

    /// Trajectory log path
    pub output: String,

    pub config: InjectionConfig,

    pub summary: RunSummary,
}

impl RunReport {
    /// Creates a report with a fresh run id.
    pub fn new(backend: &str, output: &str, config: InjectionConfig, summary: RunSummary) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            backend: backend.to_string(),
            scenario: None,
            seed: config.seed,
            output: output.to_string(),
            config,
            summary,
        }
    }

    pub fn with_scenario(mut self, scenario: &str) -> Self {
        self.scenario = Some(scenario.to_string());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
