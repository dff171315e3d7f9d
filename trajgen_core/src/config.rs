//! Injection configuration.
//!
//! Every tunable of the anomaly injection engine lives in [`InjectionConfig`].
//! The defaults reproduce the conservative-realism calibration used to
//! generate the reference trajectory logs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SIMULATION_STEPS: u64 = 1800;

pub const AGGRESSION_SCALE: f64 = 0.20;

pub const CONTAGION_RADIUS: f64 = 15.0;
pub const CONTAGION_DURATION: u64 = 4;
pub const CONTAGION_MULTIPLIER: f64 = 1.10;

pub const WRONG_WAY_PROB_SCALE: f64 = 0.005;
pub const WRONG_WAY_DURATION: u64 = 2;

pub const SURGE_MULTIPLIER: f64 = 1.05;
pub const SURGE_DURATION: u64 = 2;
pub const SURGE_COOLDOWN: u64 = 20;
pub const SURGE_PRESSURE_THRESHOLD: f64 = 1.3;
pub const SURGE_PROB_SCALE: f64 = 0.1;

pub const PRESSURE_CAP: f64 = 2.0;
pub const WAITING_SATURATION_SECS: f64 = 60.0;

/// Duration hint (s) passed with aggressive lane-change requests.
pub const LANE_CHANGE_URGENCY: f64 = 3.0;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-behavior enable switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorToggles {
    pub aggression: bool,
    pub contagion: bool,
    pub wrong_way: bool,
    pub speed_surge: bool,
}

impl Default for BehaviorToggles {
    fn default() -> Self {
        Self {
            aggression: true,
            contagion: true,
            wrong_way: true,
            speed_surge: true,
        }
    }
}

/// Vehicle-class capability classifier settings.
///
/// A vehicle whose id contains `marker` gets `marked`, every other vehicle
/// gets `default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    pub marker: String,
    pub marked: f64,
    pub default: f64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            marker: "bike".to_string(),
            marked: 1.0,
            default: 0.6,
        }
    }
}

/// Complete configuration for an injection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Master seed for every random stream
    pub seed: u64,

    /// Number of ticks to simulate
    pub total_ticks: u64,

    pub toggles: BehaviorToggles,

    pub capability: CapabilityConfig,

    pub aggression_scale: f64,

    /// Contagion radius (m)
    pub contagion_radius: f64,
    /// Contagion window (ticks)
    pub contagion_duration: u64,
    pub contagion_multiplier: f64,

    pub wrong_way_prob_scale: f64,
    pub wrong_way_duration: u64,

    pub surge_multiplier: f64,
    pub surge_duration: u64,
    pub surge_cooldown: u64,
    pub surge_pressure_threshold: f64,
    pub surge_prob_scale: f64,

    pub pressure_cap: f64,
    pub waiting_saturation_secs: f64,
    pub lane_change_urgency: f64,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            total_ticks: SIMULATION_STEPS,
            toggles: BehaviorToggles::default(),
            capability: CapabilityConfig::default(),
            aggression_scale: AGGRESSION_SCALE,
            contagion_radius: CONTAGION_RADIUS,
            contagion_duration: CONTAGION_DURATION,
            contagion_multiplier: CONTAGION_MULTIPLIER,
            wrong_way_prob_scale: WRONG_WAY_PROB_SCALE,
            wrong_way_duration: WRONG_WAY_DURATION,
            surge_multiplier: SURGE_MULTIPLIER,
            surge_duration: SURGE_DURATION,
            surge_cooldown: SURGE_COOLDOWN,
            surge_pressure_threshold: SURGE_PRESSURE_THRESHOLD,
            surge_prob_scale: SURGE_PROB_SCALE,
            pressure_cap: PRESSURE_CAP,
            waiting_saturation_secs: WAITING_SATURATION_SECS,
            lane_change_urgency: LANE_CHANGE_URGENCY,
        }
    }
}

impl InjectionConfig {
    /// Loads a config from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the tick count.
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.total_ticks = ticks;
        self
    }

    /// Replaces the behavior switches.
    pub fn with_toggles(mut self, toggles: BehaviorToggles) -> Self {
        self.toggles = toggles;
        self
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("aggression_scale", self.aggression_scale),
            ("wrong_way_prob_scale", self.wrong_way_prob_scale),
            ("surge_prob_scale", self.surge_prob_scale),
            ("surge_pressure_threshold", self.surge_pressure_threshold),
            ("lane_change_urgency", self.lane_change_urgency),
            ("capability.marked", self.capability.marked),
            ("capability.default", self.capability.default),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("{} must be a finite value >= 0", value)));
            }
        }

        let positive = [
            ("contagion_radius", self.contagion_radius),
            ("pressure_cap", self.pressure_cap),
            ("waiting_saturation_secs", self.waiting_saturation_secs),
            ("surge_multiplier", self.surge_multiplier),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(field, format!("{} must be a finite value > 0", value)));
            }
        }

        if !self.contagion_multiplier.is_finite() || self.contagion_multiplier < 1.0 {
            return Err(invalid(
                "contagion_multiplier",
                format!("{} must be >= 1.0", self.contagion_multiplier),
            ));
        }

        if self.capability.marker.is_empty() {
            return Err(invalid("capability.marker", "must not be empty".to_string()));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = InjectionConfig::default();
        assert_eq!(config.total_ticks, 1800);
        assert_eq!(config.aggression_scale, 0.20);
        assert_eq!(config.contagion_duration, 4);
        assert_eq!(config.surge_cooldown, 20);
        assert_eq!(config.pressure_cap, 2.0);
        assert!(config.toggles.contagion);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "seed": 7, "toggles": { "wrong_way": false }, "surge_cooldown": 30 }"#;
        let config: InjectionConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.surge_cooldown, 30);
        assert!(!config.toggles.wrong_way);
        assert!(config.toggles.aggression);
        assert_eq!(config.contagion_radius, CONTAGION_RADIUS);
        assert_eq!(config.capability.marker, "bike");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = InjectionConfig::default();
        config.contagion_multiplier = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "contagion_multiplier", .. })
        ));

        let mut config = InjectionConfig::default();
        config.contagion_radius = 0.0;
        assert!(config.validate().is_err());

        let mut config = InjectionConfig::default();
        config.aggression_scale = f64::NAN;
        assert!(config.validate().is_err());
    }
}
