//! Contagion Event Buffer.
//!
//! Time-windowed log of recent violation locations. Vehicles near a recent
//! violation feel extra pressure ("contagion").
//!
//! Lookups scan in insertion order and stop at the first event inside the
//! radius. This is the earliest-inserted qualifying event, not the nearest
//! one; only the existence of a match affects pressure.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use trajgen_env::Position;

/// A triggered violation at a point in space and time. Immutable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub tick: u64,
    pub position: Position,
}

impl ViolationEvent {
    pub fn new(tick: u64, position: Position) -> Self {
        Self { tick, position }
    }
}

/// Spatial-temporal buffer of recent violations.
#[derive(Debug, Clone)]
pub struct ContagionBuffer {
    events: VecDeque<ViolationEvent>,

    /// Retention window in ticks
    duration: u64,

    /// Largest number of events held at once
    peak_len: usize,
}

impl ContagionBuffer {
    pub fn new(duration: u64) -> Self {
        Self {
            events: VecDeque::new(),
            duration,
            peak_len: 0,
        }
    }

    /// Appends an event at the back (insertion order ≈ chronological).
    pub fn append(&mut self, event: ViolationEvent) {
        self.events.push_back(event);
        self.peak_len = self.peak_len.max(self.events.len());
    }

    /// Drops every event with `current_tick - event.tick > duration`.
    pub fn prune(&mut self, current_tick: u64) -> usize {
        let before = self.events.len();
        let duration = self.duration;
        self.events
            .retain(|e| current_tick.saturating_sub(e.tick) <= duration);
        before - self.events.len()
    }

    /// First event, in insertion order, strictly closer than `radius`.
    pub fn first_within(&self, point: &Position, radius: f64) -> Option<&ViolationEvent> {
        self.events
            .iter()
            .find(|e| nalgebra::distance(&e.position, point) < radius)
    }

    pub fn any_within(&self, point: &Position, radius: f64) -> bool {
        self.first_within(point, radius).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViolationEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn peak_len(&self) -> usize {
        self.peak_len
    }
}
