//! Effect Expiry Manager.
//!
//! Reverses time-limited mutations once their timer has passed: a wrong-way
//! detour gets its route re-applied, a speed surge hands speed control back
//! to the simulator. Timers are cleared on the first tick strictly greater
//! than their value, whether or not the reversal succeeds, so a rejected
//! reversal is never retried.
//!
//! Route restoration re-applies the route read at expiry time. That is the
//! route currently driven (including the detour edge if the simulator kept
//! it), not a snapshot saved when the detour started.

use crate::registry::{CapabilityClassifier, EntityRegistry, VehicleState};
use std::collections::HashSet;
use tracing::debug;
use trajgen_env::{MutationFailure, SpeedCommand, TrafficSimulator, VehicleId};

/// A time-limited effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    WrongWay,
    SpeedSurge,
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Effect::WrongWay => "wrong_way",
            Effect::SpeedSurge => "speed_surge",
        }
    }
}

/// What one expiry pass did for one vehicle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpiryOutcome {
    /// Effects whose timers were cleared this pass
    pub expired: Vec<Effect>,

    /// Reversals the simulator rejected
    pub failures: Vec<(Effect, MutationFailure)>,
}

impl ExpiryOutcome {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty()
    }
}

/// Stateless reverser of due effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryManager;

impl ExpiryManager {
    pub fn new() -> Self {
        Self
    }

    /// Reverses any effect of `vehicle` that is due at `tick`.
    pub fn process<S: TrafficSimulator + ?Sized>(
        &self,
        tick: u64,
        vehicle: &VehicleId,
        state: &mut VehicleState,
        sim: &mut S,
    ) -> ExpiryOutcome {
        let mut outcome = ExpiryOutcome::default();

        if state.take_due_wrong_way(tick) {
            outcome.expired.push(Effect::WrongWay);
            let restored = sim
                .route(vehicle)
                .map_err(MutationFailure::from)
                .and_then(|route| sim.set_route(vehicle, &route));
            if let Err(e) = restored {
                debug!("tick {} {}: wrong-way restore dropped: {}", tick, vehicle, e);
                outcome.failures.push((Effect::WrongWay, e));
            }
        }

        if state.take_due_surge(tick) {
            outcome.expired.push(Effect::SpeedSurge);
            if let Err(e) = sim.set_speed(vehicle, SpeedCommand::Release) {
                debug!("tick {} {}: surge release dropped: {}", tick, vehicle, e);
                outcome.failures.push((Effect::SpeedSurge, e));
            }
        }

        outcome
    }

    /// Expires due timers of vehicles that left the network, so the
    /// registry can prune them. Reversal is still attempted; the simulator
    /// will usually reject it for a departed vehicle.
    pub fn sweep_departed<S, C>(
        &self,
        tick: u64,
        registry: &mut EntityRegistry<C>,
        active: &HashSet<VehicleId>,
        sim: &mut S,
    ) -> ExpiryOutcome
    where
        S: TrafficSimulator + ?Sized,
        C: CapabilityClassifier,
    {
        let mut total = ExpiryOutcome::default();
        for id in registry.departed_with_timers(active) {
            if let Some(state) = registry.get_mut(&id) {
                let outcome = self.process(tick, &id, state, sim);
                total.expired.extend(outcome.expired);
                total.failures.extend(outcome.failures);
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CapabilityConfig;
    use crate::streams::RngStreams;
    use trajgen_env::{
        EdgeId, MutationKind, MutationRequest, ScriptedSimulator, VehicleFrame,
    };

    fn sim() -> ScriptedSimulator {
        let frame = VehicleFrame::new("car.1", 0.0, 0.0)
            .on_road("E1", 0, 2)
            .route(&["E1", "E2"]);
        let mut sim = ScriptedSimulator::repeating(vec![frame], 32);
        sim.advance_tick().unwrap();
        sim
    }

    #[test]
    fn test_nothing_due() {
        let mut sim = sim();
        let mut state = VehicleState::new(0.5, 0.6);
        let outcome = ExpiryManager::new().process(3, &VehicleId::from("car.1"), &mut state, &mut sim);

        assert!(outcome.is_empty());
        assert!(sim.mutations().is_empty());
    }

    #[test]
    fn test_wrong_way_restores_current_route() {
        let mut sim = sim();
        let id = VehicleId::from("car.1");
        let detour = vec![EdgeId::from("-E1"), EdgeId::from("E2")];
        sim.set_route(&id, &detour).unwrap();

        let mut state = VehicleState::new(0.5, 0.6);
        state.arm_wrong_way(12);
        let manager = ExpiryManager::new();

        assert!(manager.process(12, &id, &mut state, &mut sim).is_empty());

        let outcome = manager.process(13, &id, &mut state, &mut sim);
        assert_eq!(outcome.expired, vec![Effect::WrongWay]);
        assert!(state.wrong_way_active_until().is_none());

        let last = sim.mutations().last().unwrap();
        assert_eq!(last.request, MutationRequest::Route(detour));
    }

    #[test]
    fn test_surge_release() {
        let mut sim = sim();
        let id = VehicleId::from("car.1");
        let mut state = VehicleState::new(0.5, 0.6);
        state.arm_surge(7, 25);

        let outcome = ExpiryManager::new().process(8, &id, &mut state, &mut sim);
        assert_eq!(outcome.expired, vec![Effect::SpeedSurge]);
        assert_eq!(
            sim.mutations()[0].request,
            MutationRequest::Speed(SpeedCommand::Release)
        );
        assert_eq!(state.surge_cooldown_until(), 25);
    }

    #[test]
    fn test_failed_reversal_still_clears() {
        let mut sim = sim().reject("car.1", MutationKind::Speed);
        let id = VehicleId::from("car.1");
        let mut state = VehicleState::new(0.5, 0.6);
        state.arm_surge(1, 21);

        let outcome = ExpiryManager::new().process(2, &id, &mut state, &mut sim);
        assert_eq!(outcome.failures.len(), 1);
        assert!(state.surge_active_until().is_none());

        let again = ExpiryManager::new().process(3, &id, &mut state, &mut sim);
        assert!(again.is_empty());
    }

    #[test]
    fn test_sweep_departed_vehicle() {
        let mut sim = sim();
        let mut registry = EntityRegistry::new(RngStreams::new(1), CapabilityConfig::default());
        let gone = VehicleId::from("gone.0");
        registry.get_or_create(&gone).arm_wrong_way(4);

        let active: HashSet<VehicleId> = [VehicleId::from("car.1")].into_iter().collect();
        let manager = ExpiryManager::new();

        assert!(manager.sweep_departed(4, &mut registry, &active, &mut sim).is_empty());

        let outcome = manager.sweep_departed(5, &mut registry, &active, &mut sim);
        assert_eq!(outcome.expired, vec![Effect::WrongWay]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(registry.prune(&active), 1);
        assert!(registry.is_empty());
    }
}
