//! Named synthetic traffic presets.

use crate::synthetic::{EdgeSpec, FlowSpec, SyntheticConfig, VehicleClass};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Four-edge corridor narrowing 3 → 1 lanes, mixed peak demand
    PeakCorridor,

    /// Long red phases and heavy car demand: queues and waiting time
    ArterialJam,

    /// Bike-dominated demand (capability 1.0 vehicles)
    BikeSwarm,

    /// Single-lane road: only speed surges can fire
    SingleLane,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::PeakCorridor,
            ScenarioId::ArterialJam,
            ScenarioId::BikeSwarm,
            ScenarioId::SingleLane,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::PeakCorridor => "peak_corridor",
            ScenarioId::ArterialJam => "arterial_jam",
            ScenarioId::BikeSwarm => "bike_swarm",
            ScenarioId::SingleLane => "single_lane",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::PeakCorridor => "Morning peak on a 700 m corridor, 3-3-2-1 lanes",
            ScenarioId::ArterialJam => "Signalised arterial with 35% green, heavy car demand",
            ScenarioId::BikeSwarm => "Two-wheeler heavy demand on the peak corridor",
            ScenarioId::SingleLane => "Single-lane road, no lateral manoeuvres possible",
        }
    }

    /// Layout and demand for the synthetic backend.
    pub fn synthetic_config(&self) -> SyntheticConfig {
        let corridor = ["E1", "E2", "E3", "E4"];
        match self {
            ScenarioId::PeakCorridor => SyntheticConfig::default(),
            ScenarioId::ArterialJam => SyntheticConfig {
                edges: vec![
                    EdgeSpec::new("E1", 300.0, 2, 13.89),
                    EdgeSpec::new("E2", 300.0, 2, 13.89),
                    EdgeSpec::new("E3", 200.0, 2, 11.11),
                    EdgeSpec::new("E4", 200.0, 1, 11.11),
                ],
                flows: vec![
                    FlowSpec::new("morning_cars", VehicleClass::Car, 0.6, &corridor),
                    FlowSpec::new("morning_bikes", VehicleClass::Bike, 0.1, &corridor),
                ],
                signal_cycle: 90,
                green_ratio: 0.35,
                ..SyntheticConfig::default()
            },
            ScenarioId::BikeSwarm => SyntheticConfig {
                flows: vec![
                    FlowSpec::new("morning_cars", VehicleClass::Car, 0.15, &corridor),
                    FlowSpec::new("morning_bikes", VehicleClass::Bike, 0.5, &corridor),
                ],
                ..SyntheticConfig::default()
            },
            ScenarioId::SingleLane => SyntheticConfig {
                edges: vec![
                    EdgeSpec::new("E1", 250.0, 1, 13.89),
                    EdgeSpec::new("E2", 250.0, 1, 11.11),
                ],
                flows: vec![
                    FlowSpec::new("morning_cars", VehicleClass::Car, 0.3, &["E1", "E2"]),
                    FlowSpec::new("morning_bikes", VehicleClass::Bike, 0.1, &["E1", "E2"]),
                ],
                ..SyntheticConfig::default()
            },
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "peak_corridor" | "peak" => Ok(ScenarioId::PeakCorridor),
            "arterial_jam" | "jam" => Ok(ScenarioId::ArterialJam),
            "bike_swarm" | "bikes" => Ok(ScenarioId::BikeSwarm),
            "single_lane" => Ok(ScenarioId::SingleLane),
            _ => Err(format!(
                "Unknown scenario: {} (expected one of: {})",
                s,
                ScenarioId::all()
                    .iter()
                    .map(|id| id.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticTraffic;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().unwrap(), id);
            assert_eq!(id.to_string(), id.name());
        }
        assert_eq!("Bike-Swarm".parse::<ScenarioId>().unwrap(), ScenarioId::BikeSwarm);
        assert!("gridlock".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_every_preset_builds() {
        for id in ScenarioId::all() {
            assert!(SyntheticTraffic::new(id.synthetic_config(), 1).is_ok(), "{}", id);
        }
    }

    #[test]
    fn test_single_lane_has_no_multi_lane_edges() {
        let config = ScenarioId::SingleLane.synthetic_config();
        assert!(config.edges.iter().all(|e| e.lanes == 1));
    }
}
