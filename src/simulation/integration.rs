//! Multistep integration formulas and local truncation error.
//!
//! A [`StateDerivative`] tracks one integrated quantity (a capacitor charge,
//! an inductor flux) over the last few time points and produces its time
//! derivative with the active formula:
//!
//! ```text
//! backward Euler (order 1):  dq/dt = (q0 - q1) / h
//! trapezoidal    (order 2):  dq/dt = 2/h (q0 - q1) - dq1/dt
//! ```

use super::TimeState;

/// Time integration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    BackwardEuler,
    #[default]
    Trapezoidal,
}

impl IntegrationMethod {
    /// Highest order the method reaches.
    pub fn max_order(&self) -> usize {
        match self {
            IntegrationMethod::BackwardEuler => 1,
            IntegrationMethod::Trapezoidal => 2,
        }
    }
}

/// Tolerances for local truncation error control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruncationTolerances {
    pub reltol: f64,
    pub abstol: f64,
    /// Charge tolerance.
    pub chgtol: f64,
    /// Overestimation factor of the error estimate.
    pub trtol: f64,
}

impl Default for TruncationTolerances {
    fn default() -> Self {
        Self {
            reltol: 1e-3,
            abstol: 1e-12,
            chgtol: 1e-14,
            trtol: 7.0,
        }
    }
}

/// Error constants of the trapezoidal family, indexed by order - 1.
const TRAP_COEFFICIENTS: [f64; 2] = [0.5, 1.0 / 12.0];

/// History of an integrated state variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDerivative {
    /// Values at the current point and the three previous accepted points.
    values: [f64; 4],
    /// Derivatives at the current point and the previous accepted point.
    derivatives: [f64; 2],
}

impl StateDerivative {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the whole history with a constant value and zero derivative.
    pub fn initialize(&mut self, value: f64) {
        self.values = [value; 4];
        self.derivatives = [0.0; 2];
    }

    /// Set the value at the current point.
    pub fn set(&mut self, value: f64) {
        self.values[0] = value;
    }

    pub fn value(&self) -> f64 {
        self.values[0]
    }

    pub fn derivative(&self) -> f64 {
        self.derivatives[0]
    }

    /// Compute the derivative at the current point.
    ///
    /// Returns the Jacobian factor `d(derivative)/d(value)`.
    pub fn integrate(&mut self, time: &TimeState) -> f64 {
        let h = time.delta();
        let [q0, q1, ..] = self.values;
        match time.order {
            1 => {
                self.derivatives[0] = (q0 - q1) / h;
                1.0 / h
            }
            _ => {
                self.derivatives[0] = 2.0 / h * (q0 - q1) - self.derivatives[1];
                2.0 / h
            }
        }
    }

    /// Shift the history after the current point was accepted.
    pub fn accept(&mut self) {
        self.values.copy_within(0..3, 1);
        self.derivatives[1] = self.derivatives[0];
    }

    /// Largest time step that keeps the local truncation error of this
    /// variable within tolerance.
    ///
    /// The error is estimated from the divided difference of order
    /// `order + 1` over the value history.
    pub fn truncate(&self, time: &TimeState) -> f64 {
        let tol = &time.tolerances;
        let order = time.order.clamp(1, 2);

        let current_tol = tol.abstol
            + tol.reltol * self.derivatives[0].abs().max(self.derivatives[1].abs());
        let charge = self.values[0].abs().max(self.values[1].abs());
        let charge_tol = tol.reltol * charge.max(tol.chgtol) / time.delta();
        let tolerance = current_tol.max(charge_tol);

        let mut diff = self.values;
        let mut deltas = [0.0; 4];
        deltas[..=order].copy_from_slice(&time.deltas[..=order]);
        let mut j = order;
        loop {
            for i in 0..=j {
                diff[i] = (diff[i] - diff[i + 1]) / deltas[i];
            }
            if j == 0 {
                break;
            }
            j -= 1;
            for i in 0..=j {
                deltas[i] = deltas[i + 1] + time.deltas[i];
            }
        }

        let factor = TRAP_COEFFICIENTS[order - 1];
        let limit = tol.trtol * tolerance / tol.abstol.max(factor * diff[0].abs());
        match order {
            1 => limit,
            _ => limit.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn time(order: usize, delta: f64) -> TimeState {
        let mut time = TimeState::new(IntegrationMethod::Trapezoidal, TruncationTolerances::default(), delta);
        time.order = order;
        time
    }

    #[test]
    fn test_backward_euler_derivative() {
        let mut q = StateDerivative::new();
        q.initialize(1.0);
        q.set(3.0);
        let factor = q.integrate(&time(1, 0.5));
        assert_relative_eq!(factor, 2.0);
        assert_relative_eq!(q.derivative(), 4.0);
    }

    #[test]
    fn test_trapezoidal_uses_previous_derivative() {
        let mut q = StateDerivative::new();
        q.initialize(0.0);
        q.set(1.0);
        q.integrate(&time(1, 1.0));
        q.accept();
        // q ramps linearly: the trapezoidal derivative stays at the slope
        q.set(2.0);
        let factor = q.integrate(&time(2, 1.0));
        assert_relative_eq!(factor, 2.0);
        assert_relative_eq!(q.derivative(), 1.0);
    }

    #[test]
    fn test_constant_history_allows_large_steps() {
        let mut q = StateDerivative::new();
        q.initialize(1e-9);
        assert!(q.truncate(&time(1, 1e-6)) > 1e-3);
    }

    #[test]
    fn test_curvature_limits_the_step() {
        // Samples at t = 2, 1, 0 (newest first): a ramp has no second difference
        let mut q = StateDerivative::new();
        q.values = [2.0, 1.0, 0.0, 0.0];
        let ramp = q.truncate(&time(1, 1.0));
        q.values = [4.0, 1.0, 0.0, 0.0];
        let parabola = q.truncate(&time(1, 1.0));
        assert!(parabola.is_finite());
        assert!(parabola < ramp);
    }
}
