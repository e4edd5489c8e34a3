pub mod engine;

pub use engine::HysteresisEngine;

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Tracked power state of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    #[default]
    On,
    Off,
}

/// Recommended action for a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    None,
    SwitchOff,
    SwitchOn,
}

impl Action {
    pub fn is_none(&self) -> bool {
        matches!(self, Action::None)
    }
}

/// Display hint for dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Gray,
    Amber,
    Red,
    Green,
}

/// Bring a utilization value into [0, 100]. NaN reads as no load.
pub fn clamp_utilization(utilization: f64) -> f64 {
    if utilization.is_nan() {
        0.0
    } else {
        utilization.clamp(0.0, 100.0)
    }
}

/// Hysteresis band. Both bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    low: f64,
    high: f64,
}

impl Thresholds {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if !low.is_finite() || !high.is_finite() {
            return Err(AppError::Config(format!(
                "Thresholds must be finite numbers (low={}, high={})",
                low, high
            )));
        }
        if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) {
            return Err(AppError::Config(format!(
                "Thresholds must be within [0, 100] (low={}, high={})",
                low, high
            )));
        }
        if low >= high {
            return Err(AppError::Config(format!(
                "Low threshold must be below high threshold (low={}, high={})",
                low, high
            )));
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    /// Threshold whose crossing produced `action`
    pub fn threshold_for(&self, action: Action) -> Option<f64> {
        match action {
            Action::SwitchOff => Some(self.low),
            Action::SwitchOn => Some(self.high),
            Action::None => None,
        }
    }

    /// Pure transition function: returns the action and the next state.
    pub fn evaluate(&self, state: PowerState, utilization: f64) -> (Action, PowerState) {
        match state {
            PowerState::On if utilization < self.low => (Action::SwitchOff, PowerState::Off),
            PowerState::Off if utilization > self.high => (Action::SwitchOn, PowerState::On),
            _ => (Action::None, state),
        }
    }

    /// Human-readable explanation and severity for a decision.
    /// `state` is the state after the decision was applied.
    pub fn describe(&self, state: PowerState, action: Action, utilization: f64) -> (String, Severity) {
        match (action, state) {
            (Action::SwitchOff, _) => (
                format!(
                    "Low traffic detected ({:.1}% < {}%). Power saving enabled.",
                    utilization, self.low
                ),
                Severity::Red,
            ),
            (Action::SwitchOn, _) => (
                format!(
                    "High congestion detected ({:.1}% > {}%). Capacity increased.",
                    utilization, self.high
                ),
                Severity::Green,
            ),
            (Action::None, PowerState::On) if utilization >= self.high => (
                format!(
                    "Cell already on, high load ({:.1}% >= {}%).",
                    utilization, self.high
                ),
                Severity::Gray,
            ),
            (Action::None, PowerState::On) if utilization <= self.low => (
                format!(
                    "Utilization {:.1}% not below {}%. Cell stays on.",
                    utilization, self.low
                ),
                Severity::Gray,
            ),
            (Action::None, PowerState::On) => (
                format!(
                    "Utilization within optimal range ({}% - {}%).",
                    self.low, self.high
                ),
                Severity::Gray,
            ),
            (Action::None, PowerState::Off) if utilization < self.low => (
                format!(
                    "Cell already off, low traffic ({:.1}% < {}%).",
                    utilization, self.low
                ),
                Severity::Amber,
            ),
            (Action::None, PowerState::Off) => (
                format!(
                    "Cell off until utilization exceeds {}% (now {:.1}%).",
                    self.high, utilization
                ),
                Severity::Amber,
            ),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: 20.0,
            high: 70.0,
        }
    }
}

/// Result of running one measurement through the hysteresis engine.
/// Immutable once built; this is what subscribers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedUpdate {
    pub cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_cell_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pci: Option<u16>,
    pub utilization: f64,
    pub action: Action,
    pub state: PowerState,
    pub reason: String,
    pub action_color: Severity,
    pub timestamp: String,
}
