//! Pressure Model.
//!
//! Pressure is a bounded scalar combining waiting-time buildup, speed
//! deficit, and contagion from nearby recent violations:
//!
//! ```text
//! pressure  = min(waiting / saturation, 1)
//! pressure += max(0, desired - speed) / desired          (desired > 0)
//! pressure *= multiplier                                  (any event within radius, once)
//! pressure  = clamp(pressure, 0, cap)
//! ```

use crate::config::InjectionConfig;
use crate::contagion::ContagionBuffer;
use trajgen_env::KinematicsSnapshot;

/// Contributions that make up a pressure value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureBreakdown {
    pub waiting: f64,
    pub speed_deficit: f64,
    pub contagion_applied: bool,
    pub value: f64,
}

/// Pure pressure function parameterised by the run configuration.
#[derive(Debug, Clone, Copy)]
pub struct PressureModel {
    waiting_saturation_secs: f64,
    cap: f64,
    contagion_enabled: bool,
    contagion_radius: f64,
    contagion_multiplier: f64,
}

impl PressureModel {
    pub fn from_config(config: &InjectionConfig) -> Self {
        Self {
            waiting_saturation_secs: config.waiting_saturation_secs,
            cap: config.pressure_cap,
            contagion_enabled: config.toggles.contagion,
            contagion_radius: config.contagion_radius,
            contagion_multiplier: config.contagion_multiplier,
        }
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    /// Computes the pressure for one vehicle. No side effects.
    pub fn evaluate(&self, snapshot: &KinematicsSnapshot, contagion: &ContagionBuffer) -> f64 {
        self.breakdown(snapshot, contagion).value
    }

    pub fn breakdown(
        &self,
        snapshot: &KinematicsSnapshot,
        contagion: &ContagionBuffer,
    ) -> PressureBreakdown {
        let waiting = (snapshot.waiting_time / self.waiting_saturation_secs).min(1.0);

        let desired = snapshot.max_speed;
        let speed_deficit = if desired > 0.0 {
            (desired - snapshot.speed).max(0.0) / desired
        } else {
            0.0
        };

        let mut pressure = waiting + speed_deficit;

        let contagion_applied = self.contagion_enabled
            && contagion.any_within(&snapshot.position, self.contagion_radius);
        if contagion_applied {
            pressure *= self.contagion_multiplier;
        }

        let value = if pressure.is_nan() {
            0.0
        } else {
            pressure.clamp(0.0, self.cap)
        };

        PressureBreakdown {
            waiting,
            speed_deficit,
            contagion_applied,
            value,
        }
    }
}
