//! Shared per-simulation state read by every behavior.

use super::integration::{IntegrationMethod, TruncationTolerances};
use super::DEFAULT_TEMPERATURE;

/// Time-domain part of the simulation state.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeState {
    /// Time of the point being computed.
    pub time: f64,
    /// `deltas[0]` is the step being attempted, `deltas[1..]` the previous accepted steps.
    pub deltas: [f64; 4],
    /// Active integration order.
    pub order: usize,
    pub method: IntegrationMethod,
    pub tolerances: TruncationTolerances,
}

impl TimeState {
    pub fn new(method: IntegrationMethod, tolerances: TruncationTolerances, delta: f64) -> Self {
        Self {
            time: 0.0,
            deltas: [delta; 4],
            order: 1,
            method,
            tolerances,
        }
    }

    /// The step being attempted.
    pub fn delta(&self) -> f64 {
        self.deltas[0]
    }

    pub fn set_delta(&mut self, delta: f64) {
        self.deltas[0] = delta;
    }

    /// Record the attempted step as accepted.
    pub fn shift(&mut self) {
        self.deltas.copy_within(0..3, 1);
    }
}

/// Solution vectors and environment of the running analysis.
///
/// Both solution vectors are indexed by external variable index; entry 0 is
/// the ground reference and always zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub solution: Vec<f64>,
    pub old_solution: Vec<f64>,
    /// Newton-Raphson iteration counter, starting at 1.
    pub iteration: usize,
    /// Circuit temperature in kelvin.
    pub temperature: f64,
    /// Temperature at which parameters were measured, in kelvin.
    pub nominal_temperature: f64,
    /// Present during transient analysis only.
    pub time: Option<TimeState>,
}

impl SimulationState {
    /// State for a system of `size` unknowns.
    pub fn new(size: usize) -> Self {
        Self {
            solution: vec![0.0; size + 1],
            old_solution: vec![0.0; size + 1],
            iteration: 0,
            temperature: DEFAULT_TEMPERATURE,
            nominal_temperature: DEFAULT_TEMPERATURE,
            time: None,
        }
    }

    /// Number of unknowns.
    pub fn size(&self) -> usize {
        self.solution.len() - 1
    }

    /// Current value of a variable, zero for ground.
    #[inline]
    pub fn value(&self, index: usize) -> f64 {
        match index {
            0 => 0.0,
            i => self.solution.get(i).copied().unwrap_or(0.0),
        }
    }

    /// Value of a variable at the previous iterate.
    #[inline]
    pub fn old_value(&self, index: usize) -> f64 {
        match index {
            0 => 0.0,
            i => self.old_solution.get(i).copied().unwrap_or(0.0),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.time.is_some()
    }

    /// Copy the environment (not the solution) from another state.
    pub fn sync_environment(&mut self, other: &SimulationState) {
        self.iteration = other.iteration;
        self.temperature = other.temperature;
        self.nominal_temperature = other.nominal_temperature;
        self.time.clone_from(&other.time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_reads_zero() {
        let mut state = SimulationState::new(2);
        state.solution[0] = 5.0;
        state.solution[2] = 1.5;
        assert_eq!(state.value(0), 0.0);
        assert_eq!(state.value(2), 1.5);
        assert_eq!(state.value(9), 0.0);
        assert_eq!(state.size(), 2);
    }

    #[test]
    fn test_shift_keeps_step_history() {
        let mut time = TimeState::new(IntegrationMethod::BackwardEuler, TruncationTolerances::default(), 1.0);
        time.set_delta(0.5);
        time.shift();
        time.set_delta(0.25);
        assert_eq!(time.deltas, [0.25, 0.5, 1.0, 1.0]);
    }
}
