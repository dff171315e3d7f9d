//! Entity State Registry.
//!
//! Owns the persistent per-vehicle state: fixed behavioral traits and the
//! timers of time-limited effects. State is created lazily on first sight of
//! a vehicle id and pruned once the vehicle has left the network with no
//! timer pending.

use crate::config::CapabilityConfig;
use crate::streams::RngStreams;
use rand::Rng;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use trajgen_env::VehicleId;

/// Maps a vehicle id to its capability factor.
pub trait CapabilityClassifier {
    fn capability(&self, id: &VehicleId) -> f64;
}

impl CapabilityClassifier for CapabilityConfig {
    fn capability(&self, id: &VehicleId) -> f64 {
        if id.as_str().contains(self.marker.as_str()) {
            self.marked
        } else {
            self.default
        }
    }
}

/// Persistent state of one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleState {
    aggressiveness: f64,
    capability: f64,
    surge_cooldown_until: u64,
    wrong_way_active_until: Option<u64>,
    surge_active_until: Option<u64>,
}

impl VehicleState {
    /// Fresh state with the given fixed traits and no timers.
    pub fn new(aggressiveness: f64, capability: f64) -> Self {
        Self {
            aggressiveness,
            capability,
            surge_cooldown_until: 0,
            wrong_way_active_until: None,
            surge_active_until: None,
        }
    }

    /// Fixed trait in `[0, 1)`.
    pub fn aggressiveness(&self) -> f64 {
        self.aggressiveness
    }

    /// Fixed vehicle-class factor.
    pub fn capability(&self) -> f64 {
        self.capability
    }

    pub fn surge_cooldown_until(&self) -> u64 {
        self.surge_cooldown_until
    }

    pub fn wrong_way_active_until(&self) -> Option<u64> {
        self.wrong_way_active_until
    }

    pub fn surge_active_until(&self) -> Option<u64> {
        self.surge_active_until
    }

    /// True while any expiry timer is armed.
    pub fn has_pending_timer(&self) -> bool {
        self.wrong_way_active_until.is_some() || self.surge_active_until.is_some()
    }

    pub fn wrong_way_active(&self) -> bool {
        self.wrong_way_active_until.is_some()
    }

    /// True once the surge cooldown has elapsed.
    pub fn surge_ready(&self, tick: u64) -> bool {
        tick >= self.surge_cooldown_until
    }

    pub(crate) fn arm_wrong_way(&mut self, until: u64) {
        self.wrong_way_active_until = Some(until);
    }

    /// Arms the surge timer and pushes the cooldown forward. The cooldown
    /// never moves backwards.
    pub(crate) fn arm_surge(&mut self, active_until: u64, cooldown_until: u64) {
        self.surge_active_until = Some(active_until);
        self.surge_cooldown_until = self.surge_cooldown_until.max(cooldown_until);
    }

    /// Clears the wrong-way timer if `tick` is strictly past it.
    pub(crate) fn take_due_wrong_way(&mut self, tick: u64) -> bool {
        match self.wrong_way_active_until {
            Some(until) if tick > until => {
                self.wrong_way_active_until = None;
                true
            }
            _ => false,
        }
    }

    /// Clears the surge timer if `tick` is strictly past it.
    pub(crate) fn take_due_surge(&mut self, tick: u64) -> bool {
        match self.surge_active_until {
            Some(until) if tick > until => {
                self.surge_active_until = None;
                true
            }
            _ => false,
        }
    }
}

/// Registry of all vehicle states for one run.
///
/// Owned by the driver and passed explicitly to every component.
pub struct EntityRegistry<C: CapabilityClassifier = CapabilityConfig> {
    states: HashMap<VehicleId, VehicleState>,
    streams: RngStreams,
    classifier: C,
    peak_len: usize,
}

impl<C: CapabilityClassifier> EntityRegistry<C> {
    pub fn new(streams: RngStreams, classifier: C) -> Self {
        Self {
            states: HashMap::new(),
            streams,
            classifier,
            peak_len: 0,
        }
    }

    /// Returns the vehicle's state, creating it on first sight.
    pub fn get_or_create(&mut self, id: &VehicleId) -> &mut VehicleState {
        let len = self.states.len();
        match self.states.entry(id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let aggressiveness = self.streams.trait_rng(id).gen::<f64>();
                let capability = self.classifier.capability(id);
                self.peak_len = self.peak_len.max(len + 1);
                entry.insert(VehicleState::new(aggressiveness, capability))
            }
        }
    }

    pub fn get(&self, id: &VehicleId) -> Option<&VehicleState> {
        self.states.get(id)
    }

    pub fn get_mut(&mut self, id: &VehicleId) -> Option<&mut VehicleState> {
        self.states.get_mut(id)
    }

    /// Ids no longer reported active that still have an armed timer,
    /// sorted so that any follow-up simulator calls happen in a fixed order.
    pub fn departed_with_timers(&self, active: &HashSet<VehicleId>) -> Vec<VehicleId> {
        let mut ids: Vec<VehicleId> = self
            .states
            .iter()
            .filter(|(id, state)| !active.contains(*id) && state.has_pending_timer())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drops state of vehicles that left the network and have no pending
    /// timer. Returns how many were removed.
    pub fn prune(&mut self, active: &HashSet<VehicleId>) -> usize {
        let before = self.states.len();
        self.states
            .retain(|id, state| active.contains(id) || state.has_pending_timer());
        before - self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Largest number of states held at once.
    pub fn peak_len(&self) -> usize {
        self.peak_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(RngStreams::new(42), CapabilityConfig::default())
    }

    #[test]
    fn test_capability_classifier() {
        let classifier = CapabilityConfig::default();
        assert_eq!(classifier.capability(&VehicleId::from("morning_bikes.3")), 1.0);
        assert_eq!(classifier.capability(&VehicleId::from("morning_cars.3")), 0.6);
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let mut reg = registry();
        let id = VehicleId::from("morning_cars.0");

        let first = reg.get_or_create(&id).clone();
        assert!((0.0..1.0).contains(&first.aggressiveness()));
        assert_eq!(first.capability(), 0.6);
        assert_eq!(first.surge_cooldown_until(), 0);
        assert!(!first.has_pending_timer());

        let again = reg.get_or_create(&id).clone();
        assert_eq!(first, again);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_traits_do_not_depend_on_creation_order() {
        let mut a = registry();
        let mut b = registry();
        let x = VehicleId::from("x");
        let y = VehicleId::from("y");

        a.get_or_create(&x);
        a.get_or_create(&y);
        b.get_or_create(&y);
        b.get_or_create(&x);

        assert_eq!(
            a.get(&x).unwrap().aggressiveness(),
            b.get(&x).unwrap().aggressiveness()
        );
    }

    #[test]
    fn test_cooldown_never_decreases() {
        let mut reg = registry();
        let id = VehicleId::from("v");
        let state = reg.get_or_create(&id);

        state.arm_surge(7, 25);
        assert_eq!(state.surge_cooldown_until(), 25);

        state.arm_surge(12, 10);
        assert_eq!(state.surge_cooldown_until(), 25);
        assert_eq!(state.surge_active_until(), Some(12));
    }

    #[test]
    fn test_timers_clear_strictly_after() {
        let mut reg = registry();
        let id = VehicleId::from("v");
        let state = reg.get_or_create(&id);
        state.arm_wrong_way(12);

        assert!(!state.take_due_wrong_way(11));
        assert!(!state.take_due_wrong_way(12));
        assert!(state.take_due_wrong_way(13));
        assert!(!state.take_due_wrong_way(14));
        assert!(state.wrong_way_active_until().is_none());
    }

    #[test]
    fn test_prune_keeps_active_and_pending() {
        let mut reg = registry();
        let active_id = VehicleId::from("active");
        let gone = VehicleId::from("gone");
        let gone_pending = VehicleId::from("gone_pending");

        reg.get_or_create(&active_id);
        reg.get_or_create(&gone);
        reg.get_or_create(&gone_pending).arm_wrong_way(5);

        let active: HashSet<VehicleId> = [active_id.clone()].into_iter().collect();

        assert_eq!(reg.departed_with_timers(&active), vec![gone_pending.clone()]);
        assert_eq!(reg.prune(&active), 1);
        assert!(reg.get(&gone).is_none());
        assert!(reg.get(&gone_pending).is_some());
        assert_eq!(reg.peak_len(), 3);

        reg.get_mut(&gone_pending).unwrap().take_due_wrong_way(6);
        assert_eq!(reg.prune(&active), 1);
        assert_eq!(reg.len(), 1);
    }
}
