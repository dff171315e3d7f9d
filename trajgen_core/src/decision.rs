//! Violation Decision Engine.
//!
//! Three stochastic generators evaluated per vehicle per tick, in a fixed
//! order:
//!
//! 1. **Aggressive lane change** - always eligible
//! 2. **Wrong-way excursion** - multi-lane roads only, one detour at a time
//! 3. **Speed surge** - after cooldown, under high pressure
//!
//! Each generator decides independently. When several fire in the same tick
//! the row carries the label of the last one, but the simulator-side effects
//! of the earlier ones are kept: effects compound while the log shows a
//! single label.

use crate::config::InjectionConfig;
use crate::contagion::{ContagionBuffer, ViolationEvent};
use crate::registry::VehicleState;
use crate::streams::{Generator, RngStreams};
use serde::{Deserialize, Serialize};
use tracing::debug;
use trajgen_env::{KinematicsSnapshot, MutationFailure, SpeedCommand, TrafficSimulator, VehicleId};

/// Label written to the `violation_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    None,
    AggressiveLaneChange,
    WrongWayShort,
    SpeedSurge,
}

impl ViolationType {
    pub const ALL: [ViolationType; 4] = [
        ViolationType::None,
        ViolationType::AggressiveLaneChange,
        ViolationType::WrongWayShort,
        ViolationType::SpeedSurge,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ViolationType::None => "none",
            ViolationType::AggressiveLaneChange => "aggressive_lane_change",
            ViolationType::WrongWayShort => "wrong_way_short",
            ViolationType::SpeedSurge => "speed_surge",
        }
    }

    pub fn is_violation(&self) -> bool {
        !matches!(self, ViolationType::None)
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Inputs for one vehicle's evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub tick: u64,
    pub vehicle: &'a VehicleId,
    pub snapshot: &'a KinematicsSnapshot,
    pub pressure: f64,
}

/// Outcome of evaluating all generators for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Label of the last generator that fired
    pub label: ViolationType,

    /// Every generator that fired, in evaluation order
    pub fired: Vec<ViolationType>,

    /// Swallowed mutation failures
    pub failures: Vec<(Generator, MutationFailure)>,
}

impl Decision {
    fn none() -> Self {
        Self {
            label: ViolationType::None,
            fired: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn fire(&mut self, label: ViolationType) {
        self.label = label;
        self.fired.push(label);
    }

    /// True when more than one generator fired and the log shows only one.
    pub fn compounded(&self) -> bool {
        self.fired.len() > 1
    }
}

/// The three ordered violation generators.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    streams: RngStreams,
    config: InjectionConfig,
}

impl DecisionEngine {
    pub fn new(config: &InjectionConfig, streams: RngStreams) -> Self {
        Self {
            streams,
            config: config.clone(),
        }
    }

    /// Fire probability of the aggressive lane change.
    pub fn lane_change_probability(&self, state: &VehicleState, pressure: f64) -> f64 {
        state.aggressiveness() * state.capability() * pressure * self.config.aggression_scale
    }

    /// Fire probability of the wrong-way excursion.
    pub fn wrong_way_probability(&self, state: &VehicleState) -> f64 {
        state.aggressiveness() * self.config.wrong_way_prob_scale
    }

    /// Fire probability of the speed surge (once eligible).
    pub fn surge_probability(&self, state: &VehicleState) -> f64 {
        state.aggressiveness() * self.config.surge_prob_scale
    }

    /// True if the surge generator may fire this tick.
    pub fn surge_eligible(&self, state: &VehicleState, tick: u64, pressure: f64) -> bool {
        state.surge_ready(tick)
            && state.surge_active_until().is_none()
            && pressure > self.config.surge_pressure_threshold
    }

    /// Runs all enabled generators for one vehicle.
    pub fn evaluate<S: TrafficSimulator + ?Sized>(
        &self,
        ctx: DecisionContext<'_>,
        sim: &mut S,
        state: &mut VehicleState,
        contagion: &mut ContagionBuffer,
    ) -> Decision {
        let mut decision = Decision::none();

        if self.config.toggles.aggression {
            self.aggressive_lane_change(&ctx, sim, state, contagion, &mut decision);
        }
        if self.config.toggles.wrong_way {
            self.wrong_way(&ctx, sim, state, contagion, &mut decision);
        }
        if self.config.toggles.speed_surge {
            self.speed_surge(&ctx, sim, state, &mut decision);
        }

        if decision.compounded() {
            debug!(
                "tick {} {}: {:?} fired together, logged as {}",
                ctx.tick, ctx.vehicle, decision.fired, decision.label
            );
        }
        decision
    }

    fn rolls(&self, ctx: &DecisionContext<'_>, generator: Generator, probability: f64) -> bool {
        self.streams.draw(ctx.tick, ctx.vehicle, generator) < probability
    }

    fn aggressive_lane_change<S: TrafficSimulator + ?Sized>(
        &self,
        ctx: &DecisionContext<'_>,
        sim: &mut S,
        state: &VehicleState,
        contagion: &mut ContagionBuffer,
        decision: &mut Decision,
    ) {
        let generator = Generator::AggressiveLaneChange;
        if !self.rolls(ctx, generator, self.lane_change_probability(state, ctx.pressure)) {
            return;
        }

        let snapshot = ctx.snapshot;
        if snapshot.lane_count <= 1 {
            return;
        }

        let result = adjacent_lane(snapshot.lane_index, snapshot.lane_count)
            .ok_or(MutationFailure::InvalidLane {
                requested: snapshot.lane_index as i64 - 1,
                lane_count: snapshot.lane_count,
            })
            .and_then(|target| {
                sim.request_lane_change(ctx.vehicle, target, self.config.lane_change_urgency)
            });

        match result {
            Ok(()) => {
                debug!("tick {} {}: aggressive lane change", ctx.tick, ctx.vehicle);
                decision.fire(ViolationType::AggressiveLaneChange);
                contagion.append(ViolationEvent::new(ctx.tick, snapshot.position));
            }
            Err(e) => reject(ctx, generator, e, decision),
        }
    }

    fn wrong_way<S: TrafficSimulator + ?Sized>(
        &self,
        ctx: &DecisionContext<'_>,
        sim: &mut S,
        state: &mut VehicleState,
        contagion: &mut ContagionBuffer,
        decision: &mut Decision,
    ) {
        let generator = Generator::WrongWay;
        let snapshot = ctx.snapshot;
        if snapshot.lane_count <= 1 || state.wrong_way_active() {
            return;
        }
        if !self.rolls(ctx, generator, self.wrong_way_probability(state)) {
            return;
        }

        let route = &snapshot.route;
        if route.len() <= 1 {
            return;
        }

        let mut detour = Vec::with_capacity(route.len());
        detour.push(route[0].reversed());
        detour.extend_from_slice(&route[1..]);

        match sim.set_route(ctx.vehicle, &detour) {
            Ok(()) => {
                debug!(
                    "tick {} {}: wrong-way detour via {}",
                    ctx.tick, ctx.vehicle, detour[0]
                );
                state.arm_wrong_way(ctx.tick + self.config.wrong_way_duration);
                decision.fire(ViolationType::WrongWayShort);
                contagion.append(ViolationEvent::new(ctx.tick, snapshot.position));
            }
            Err(e) => reject(ctx, generator, e, decision),
        }
    }

    fn speed_surge<S: TrafficSimulator + ?Sized>(
        &self,
        ctx: &DecisionContext<'_>,
        sim: &mut S,
        state: &mut VehicleState,
        decision: &mut Decision,
    ) {
        let generator = Generator::SpeedSurge;
        if !self.surge_eligible(state, ctx.tick, ctx.pressure) {
            return;
        }
        if !self.rolls(ctx, generator, self.surge_probability(state)) {
            return;
        }

        let target = ctx.snapshot.speed * self.config.surge_multiplier;
        match sim.set_speed(ctx.vehicle, SpeedCommand::Override(target)) {
            Ok(()) => {
                debug!("tick {} {}: speed surge to {:.2} m/s", ctx.tick, ctx.vehicle, target);
                state.arm_surge(
                    ctx.tick + self.config.surge_duration,
                    ctx.tick + self.config.surge_cooldown,
                );
                decision.fire(ViolationType::SpeedSurge);
            }
            Err(e) => reject(ctx, generator, e, decision),
        }
    }
}

/// The lane to the left if there is one, otherwise the lane to the right.
fn adjacent_lane(index: u32, count: u32) -> Option<u32> {
    if index + 1 < count {
        Some(index + 1)
    } else if index >= 1 {
        Some(index - 1)
    } else {
        None
    }
}

fn reject(
    ctx: &DecisionContext<'_>,
    generator: Generator,
    failure: MutationFailure,
    decision: &mut Decision,
) {
    debug!(
        "tick {} {}: {} dropped: {}",
        ctx.tick,
        ctx.vehicle,
        generator.name(),
        failure
    );
    decision.failures.push((generator, failure));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BehaviorToggles, CapabilityConfig};
    use crate::registry::EntityRegistry;
    use approx::assert_relative_eq;
    use trajgen_env::{EdgeId, MutationKind, MutationRequest, ScriptedSimulator, VehicleFrame};

    /// Forces every enabled generator to fire by pushing its scale high.
    fn eager_config(toggles: BehaviorToggles) -> InjectionConfig {
        let mut config = InjectionConfig::default().with_toggles(toggles);
        config.aggression_scale = 1e6;
        config.wrong_way_prob_scale = 1e6;
        config.surge_prob_scale = 1e6;
        config.capability = CapabilityConfig {
            marker: "car".into(),
            marked: 1.0,
            default: 1.0,
        };
        config
    }

    fn only(aggression: bool, wrong_way: bool, speed_surge: bool) -> BehaviorToggles {
        BehaviorToggles {
            aggression,
            contagion: true,
            wrong_way,
            speed_surge,
        }
    }

    struct Bench {
        sim: ScriptedSimulator,
        registry: EntityRegistry,
        contagion: ContagionBuffer,
        engine: DecisionEngine,
    }

    impl Bench {
        fn new(config: InjectionConfig, frame: VehicleFrame) -> Self {
            let streams = RngStreams::new(config.seed);
            let mut sim = ScriptedSimulator::repeating(vec![frame], 64);
            sim.advance_tick().unwrap();
            Self {
                sim,
                registry: EntityRegistry::new(streams, config.capability.clone()),
                contagion: ContagionBuffer::new(config.contagion_duration),
                engine: DecisionEngine::new(&config, streams),
            }
        }

        fn with_sim(mut self, f: impl FnOnce(ScriptedSimulator) -> ScriptedSimulator) -> Self {
            self.sim = f(self.sim);
            self
        }

        fn run(&mut self, tick: u64, id: &str, pressure: f64) -> Decision {
            let id = VehicleId::from(id);
            let snapshot = self.sim.snapshot(&id).unwrap();
            let state = self.registry.get_or_create(&id);
            self.engine.evaluate(
                DecisionContext {
                    tick,
                    vehicle: &id,
                    snapshot: &snapshot,
                    pressure,
                },
                &mut self.sim,
                state,
                &mut self.contagion,
            )
        }
    }

    fn multilane_car() -> VehicleFrame {
        VehicleFrame::new("car.1", 4.0, 2.0)
            .speed(8.0, 10.0)
            .on_road("E1", 0, 3)
            .route(&["E1", "E2", "E3"])
    }

    #[test]
    fn test_probabilities_follow_traits() {
        let engine = DecisionEngine::new(&InjectionConfig::default(), RngStreams::new(1));
        let state = VehicleState::new(0.9, 1.0);

        // waiting 60s at half the desired speed gives pressure 1.5
        assert_relative_eq!(engine.lane_change_probability(&state, 1.5), 0.27);
        assert_relative_eq!(engine.wrong_way_probability(&state), 0.0045);
        assert_relative_eq!(engine.surge_probability(&state), 0.09);
    }

    #[test]
    fn test_lane_change_moves_left_and_records_contagion() {
        let mut bench = Bench::new(eager_config(only(true, false, false)), multilane_car());
        let decision = bench.run(3, "car.1", 1.0);

        assert_eq!(decision.label, ViolationType::AggressiveLaneChange);
        assert_eq!(bench.contagion.len(), 1);
        let event = bench.contagion.iter().next().unwrap();
        assert_eq!(event.tick, 3);
        assert_eq!(event.position.x, 4.0);

        let muts = bench.sim.accepted_for("car.1");
        assert_eq!(
            muts[0].request,
            MutationRequest::LaneChange { target_index: 1, urgency: 3.0 }
        );
    }

    #[test]
    fn test_lane_change_from_leftmost_goes_right() {
        let frame = multilane_car().on_road("E1", 2, 3);
        let mut bench = Bench::new(eager_config(only(true, false, false)), frame);
        bench.run(0, "car.1", 1.0);

        assert!(matches!(
            bench.sim.accepted_for("car.1")[0].request,
            MutationRequest::LaneChange { target_index: 1, .. }
        ));
    }

    #[test]
    fn test_lane_change_single_lane_does_nothing() {
        let frame = multilane_car().on_road("E9", 0, 1);
        let mut bench = Bench::new(eager_config(only(true, false, false)), frame);
        let decision = bench.run(0, "car.1", 2.0);

        assert_eq!(decision.label, ViolationType::None);
        assert!(decision.failures.is_empty());
        assert!(bench.sim.mutations().is_empty());
        assert!(bench.contagion.is_empty());
    }

    #[test]
    fn test_rejected_lane_change_drops_label_and_event() {
        let mut bench = Bench::new(eager_config(only(true, false, false)), multilane_car())
            .with_sim(|s| s.reject("car.1", MutationKind::LaneChange));
        let decision = bench.run(0, "car.1", 1.0);

        assert_eq!(decision.label, ViolationType::None);
        assert_eq!(decision.failures.len(), 1);
        assert_eq!(decision.failures[0].0, Generator::AggressiveLaneChange);
        assert!(bench.contagion.is_empty());
    }

    #[test]
    fn test_zero_pressure_never_changes_lane() {
        let mut bench = Bench::new(eager_config(only(true, false, false)), multilane_car());
        for tick in 0..50 {
            assert_eq!(bench.run(tick, "car.1", 0.0).label, ViolationType::None);
        }
    }

    #[test]
    fn test_wrong_way_reverses_first_edge() {
        let mut bench = Bench::new(eager_config(only(false, true, false)), multilane_car());
        let decision = bench.run(7, "car.1", 0.0);

        assert_eq!(decision.label, ViolationType::WrongWayShort);
        let state = bench.registry.get(&VehicleId::from("car.1")).unwrap();
        assert_eq!(state.wrong_way_active_until(), Some(9));
        assert_eq!(bench.contagion.len(), 1);

        let expected: Vec<EdgeId> = ["-E1", "E2", "E3"].iter().map(|e| EdgeId::from(*e)).collect();
        assert_eq!(
            bench.sim.accepted_for("car.1")[0].request,
            MutationRequest::Route(expected)
        );
    }

    #[test]
    fn test_wrong_way_needs_multi_edge_route_and_lanes() {
        let short_route = multilane_car().route(&["E1"]);
        let mut bench = Bench::new(eager_config(only(false, true, false)), short_route);
        assert_eq!(bench.run(0, "car.1", 0.0).label, ViolationType::None);

        let single_lane = multilane_car().on_road("E1", 0, 1);
        let mut bench = Bench::new(eager_config(only(false, true, false)), single_lane);
        assert_eq!(bench.run(0, "car.1", 0.0).label, ViolationType::None);
        assert!(bench.sim.mutations().is_empty());
    }

    #[test]
    fn test_wrong_way_not_rearmed_while_active() {
        let mut bench = Bench::new(eager_config(only(false, true, false)), multilane_car());
        assert_eq!(bench.run(0, "car.1", 0.0).label, ViolationType::WrongWayShort);
        assert_eq!(bench.run(1, "car.1", 0.0).label, ViolationType::None);
        assert_eq!(bench.sim.mutations().len(), 1);
    }

    #[test]
    fn test_surge_requires_pressure_above_threshold() {
        let mut bench = Bench::new(eager_config(only(false, false, true)), multilane_car());
        assert_eq!(bench.run(0, "car.1", 1.3).label, ViolationType::None);

        let decision = bench.run(1, "car.1", 1.31);
        assert_eq!(decision.label, ViolationType::SpeedSurge);

        let state = bench.registry.get(&VehicleId::from("car.1")).unwrap();
        assert_eq!(state.surge_active_until(), Some(3));
        assert_eq!(state.surge_cooldown_until(), 21);

        match bench.sim.accepted_for("car.1")[0].request {
            MutationRequest::Speed(SpeedCommand::Override(v)) => assert_relative_eq!(v, 8.0 * 1.05),
            ref other => panic!("unexpected request {:?}", other),
        }
        assert!(bench.contagion.is_empty());
    }

    #[test]
    fn test_surge_cooldown_blocks_until_elapsed() {
        let mut bench = Bench::new(eager_config(only(false, false, true)), multilane_car());
        let id = VehicleId::from("car.1");
        assert_eq!(bench.run(5, "car.1", 1.8).label, ViolationType::SpeedSurge);
        assert_eq!(bench.registry.get(&id).unwrap().surge_cooldown_until(), 25);

        // expiry releases the override at tick 8
        assert!(bench.registry.get_mut(&id).unwrap().take_due_surge(8));

        assert_eq!(bench.run(20, "car.1", 1.8).label, ViolationType::None);
        assert_eq!(bench.run(26, "car.1", 1.8).label, ViolationType::SpeedSurge);
        assert_eq!(bench.sim.accepted_for("car.1").len(), 2);
    }

    #[test]
    fn test_last_label_wins_but_effects_compound() {
        let mut bench = Bench::new(eager_config(only(true, true, true)), multilane_car());
        let decision = bench.run(0, "car.1", 1.8);

        assert_eq!(decision.label, ViolationType::SpeedSurge);
        assert_eq!(
            decision.fired,
            vec![
                ViolationType::AggressiveLaneChange,
                ViolationType::WrongWayShort,
                ViolationType::SpeedSurge,
            ]
        );
        assert!(decision.compounded());
        assert_eq!(bench.sim.accepted_for("car.1").len(), 3);
        assert_eq!(bench.contagion.len(), 2);
    }

    #[test]
    fn test_violation_labels() {
        assert_eq!(ViolationType::None.to_string(), "none");
        assert_eq!(ViolationType::WrongWayShort.label(), "wrong_way_short");
        assert_eq!(
            serde_json::to_string(&ViolationType::AggressiveLaneChange).unwrap(),
            "\"aggressive_lane_change\""
        );
        assert_eq!(
            serde_json::to_string(&ViolationType::WrongWayShort).unwrap(),
            "\"wrong_way_short\""
        );
    }
}
