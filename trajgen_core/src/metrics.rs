//! Run metrics for the injection engine.
//!
//! Counters collected by the driver while it writes the trajectory log. They
//! summarise what the log contains and what was silently dropped along the
//! way (compounded labels, rejected mutations).

use crate::decision::{Decision, ViolationType};
use crate::expiry::ExpiryOutcome;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InjectionMetrics {
    pub ticks_executed: u64,

    pub rows_written: u64,

    /// Rows per logged label (`none` included)
    pub labels: BTreeMap<ViolationType, u64>,

    /// Generator firings, counting every generator of a compounded row
    pub fires: BTreeMap<ViolationType, u64>,

    /// Rows where more than one generator fired
    pub compounded_rows: u64,

    /// Swallowed mutation failures keyed by `<generator>:<reason>`
    pub mutation_failures: BTreeMap<String, u64>,

    /// Effects reversed by the expiry manager
    pub expired_effects: u64,

    /// Vehicle states dropped after leaving the network
    pub pruned_states: u64,

    pub peak_registry_size: usize,

    pub peak_contagion_events: usize,

    /// Sum of per-tick violation rates (for the mean)
    violation_rate_sum: f64,

    /// Ticks with at least one active vehicle
    populated_ticks: u64,
}

impl InjectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the label and firings of one row.
    pub fn record_decision(&mut self, decision: &Decision) {
        self.rows_written += 1;
        *self.labels.entry(decision.label).or_insert(0) += 1;

        for fired in &decision.fired {
            *self.fires.entry(*fired).or_insert(0) += 1;
        }
        if decision.compounded() {
            self.compounded_rows += 1;
        }
        for (generator, failure) in &decision.failures {
            let key = format!("{}:{}", generator.name(), failure.reason());
            *self.mutation_failures.entry(key).or_insert(0) += 1;
        }
    }

    pub fn record_expiry(&mut self, outcome: &ExpiryOutcome) {
        self.expired_effects += outcome.expired.len() as u64;
        for (effect, failure) in &outcome.failures {
            let key = format!("expire_{}:{}", effect.name(), failure.reason());
            *self.mutation_failures.entry(key).or_insert(0) += 1;
        }
    }

    /// Closes a tick with its row and violating-row counts.
    pub fn record_tick(&mut self, rows: u64, violating_rows: u64) {
        self.ticks_executed += 1;
        if rows > 0 {
            self.populated_ticks += 1;
            self.violation_rate_sum += violating_rows as f64 / rows as f64;
        }
    }

    pub fn record_peaks(&mut self, registry_size: usize, contagion_events: usize) {
        self.peak_registry_size = self.peak_registry_size.max(registry_size);
        self.peak_contagion_events = self.peak_contagion_events.max(contagion_events);
    }

    /// Rows carrying `label`.
    pub fn label_count(&self, label: ViolationType) -> u64 {
        self.labels.get(&label).copied().unwrap_or(0)
    }

    /// Total swallowed mutation failures.
    pub fn total_mutation_failures(&self) -> u64 {
        self.mutation_failures.values().sum()
    }

    /// Mean over populated ticks of (violating rows / rows).
    pub fn mean_violation_rate(&self) -> f64 {
        if self.populated_ticks == 0 {
            0.0
        } else {
            self.violation_rate_sum / self.populated_ticks as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::Generator;
    use approx::assert_relative_eq;
    use trajgen_env::MutationFailure;

    #[test]
    fn test_mean_violation_rate_skips_empty_ticks() {
        let mut m = InjectionMetrics::new();
        m.record_tick(4, 1);
        m.record_tick(0, 0);
        m.record_tick(2, 1);

        assert_eq!(m.ticks_executed, 3);
        assert_relative_eq!(m.mean_violation_rate(), (0.25 + 0.5) / 2.0);
    }

    #[test]
    fn test_decision_counters() {
        let mut m = InjectionMetrics::new();
        m.record_decision(&Decision {
            label: ViolationType::SpeedSurge,
            fired: vec![ViolationType::AggressiveLaneChange, ViolationType::SpeedSurge],
            failures: vec![(
                Generator::WrongWay,
                MutationFailure::Rejected("no".into()),
            )],
        });

        assert_eq!(m.rows_written, 1);
        assert_eq!(m.label_count(ViolationType::SpeedSurge), 1);
        assert_eq!(m.label_count(ViolationType::AggressiveLaneChange), 0);
        assert_eq!(m.fires[&ViolationType::AggressiveLaneChange], 1);
        assert_eq!(m.compounded_rows, 1);
        assert_eq!(m.mutation_failures["wrong_way:rejected"], 1);
        assert_eq!(m.total_mutation_failures(), 1);
    }

    #[test]
    fn test_serializes_label_keys() {
        let mut m = InjectionMetrics::new();
        m.labels.insert(ViolationType::None, 2);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["labels"]["none"], 2);
    }
}
