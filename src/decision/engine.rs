use super::{clamp_utilization, PowerState, ProcessedUpdate, Thresholds};
use crate::extract::Measurement;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

type Slot = Arc<Mutex<PowerState>>;

/// Per-cell on/off state machine with a hysteresis band.
///
/// Each cell has its own lock, so decisions for different cells never contend
/// beyond the short map lookup, while decisions for the same cell are serialized.
pub struct HysteresisEngine {
    thresholds: Thresholds,
    initial_state: PowerState,
    states: RwLock<HashMap<String, Slot>>,
}

impl HysteresisEngine {
    pub fn new(thresholds: Thresholds, initial_state: PowerState) -> Self {
        Self {
            thresholds,
            initial_state,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Decide for a bare utilization value, stamped with the current time
    pub fn decide(&self, cell_id: &str, utilization: f64) -> ProcessedUpdate {
        let measurement = Measurement::new(cell_id, utilization);
        self.process(&measurement)
    }

    /// Decide for an extracted measurement and apply the state transition
    pub fn process(&self, measurement: &Measurement) -> ProcessedUpdate {
        let utilization = clamp_utilization(measurement.utilization);
        let slot = self.slot(&measurement.cell_id);

        let (action, state) = {
            let mut current = slot.lock().unwrap_or_else(|e| e.into_inner());
            let (action, next) = self.thresholds.evaluate(*current, utilization);
            *current = next;
            (action, next)
        };

        let (reason, action_color) = self.thresholds.describe(state, action, utilization);

        if action.is_none() {
            debug!(cell_id = %measurement.cell_id, utilization, ?state, "no action needed");
        } else {
            info!(cell_id = %measurement.cell_id, utilization, ?action, "{}", reason);
        }

        ProcessedUpdate {
            cell_id: measurement.cell_id.clone(),
            global_cell_id: measurement.global_cell_id.clone(),
            sector_id: measurement.sector_id.clone(),
            pci: measurement.pci,
            utilization,
            action,
            state,
            reason,
            action_color,
            timestamp: measurement.timestamp.clone(),
        }
    }

    /// Current tracked state; `None` for a cell never observed
    pub fn current_state(&self, cell_id: &str) -> Option<PowerState> {
        let slot = {
            let states = self.states.read().unwrap_or_else(|e| e.into_inner());
            states.get(cell_id).cloned()
        }?;
        let state = *slot.lock().unwrap_or_else(|e| e.into_inner());
        Some(state)
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, cell_id: &str) -> Slot {
        if let Some(slot) = self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(cell_id)
        {
            return slot.clone();
        }

        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states
            .entry(cell_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(self.initial_state)))
            .clone()
    }
}

impl Default for HysteresisEngine {
    fn default() -> Self {
        Self::new(Thresholds::default(), PowerState::On)
    }
}
