//! Transient analysis with local truncation error control.
//!
//! Every candidate time point is solved with the Newton-Raphson controller.
//! A point is rejected, and retried from the same time with a smaller step,
//! when Newton-Raphson fails to converge or when a behavior's truncation
//! error estimate asks for a step well below the one just taken. Steps are
//! clipped to waveform breakpoints; integration restarts at first order
//! after each breakpoint.

use log::{debug, trace};

use crate::error::{NodalError, Result};

use super::{NewtonRaphson, Simulation, TimeState, TransientConfig};

/// A truncation estimate must allow at least this fraction of the step just taken.
const ACCEPT_RATIO: f64 = 0.9;

/// Step reduction after a failed Newton-Raphson solve.
const NONCONVERGENCE_SHRINK: f64 = 8.0;

/// Growth limit of consecutive steps.
const MAX_GROWTH: f64 = 2.0;

/// An accepted time point.
#[derive(Debug, Clone, PartialEq)]
pub struct TimePoint {
    pub time: f64,
    /// Solution indexed by variable; entry 0 is ground.
    pub solution: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NonConvergence,
    Truncation,
}

/// Outcome of one attempted step, in attempt order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The point at `time` was accepted after a step of `delta`.
    Accepted { time: f64, delta: f64 },
    /// The point at `time` was rejected; the step of `delta` was retried smaller.
    Rejected {
        time: f64,
        delta: f64,
        reason: RejectReason,
    },
}

impl StepOutcome {
    pub fn time(&self) -> f64 {
        match *self {
            StepOutcome::Accepted { time, .. } | StepOutcome::Rejected { time, .. } => time,
        }
    }

    pub fn delta(&self) -> f64 {
        match *self {
            StepOutcome::Accepted { delta, .. } | StepOutcome::Rejected { delta, .. } => delta,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, StepOutcome::Accepted { .. })
    }
}

/// Accepted points and the history of step decisions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransientResult {
    pub points: Vec<TimePoint>,
    pub outcomes: Vec<StepOutcome>,
}

impl TransientResult {
    /// `(time, value)` pairs of one variable.
    pub fn series(&self, index: usize) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|point| (point.time, point.solution.get(index).copied().unwrap_or(0.0)))
            .collect()
    }

    pub fn rejected(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_accepted()).count()
    }
}

impl Simulation {
    /// Integrate from the operating point to `config.stop`.
    pub fn transient(&mut self, config: &TransientConfig) -> Result<TransientResult> {
        config.check()?;
        self.operating_point()?;

        let stop = config.stop;
        let max_step = config.max_step();
        let min_step = config.min_step();
        let method = config.method;
        let newton = NewtonRaphson::from_config(&self.config, self.config.transient_max_iterations);

        let mut delta = max_step.min(config.step) / 10.0;
        self.state.time = Some(TimeState::new(method, config.tolerances(&self.config), delta));
        self.behaviors.initialize_states(&self.state)?;

        let mut result = TransientResult::default();
        result.points.push(TimePoint {
            time: 0.0,
            solution: self.state.solution.clone(),
        });

        let mut accepted = self.state.solution.clone();
        let mut time = 0.0;
        let mut order = 1;

        while stop - time > 0.5 * min_step {
            let requested = delta;
            let breakpoint = self.behaviors.next_breakpoint(time);
            let mut target = time + delta;
            let mut at_breakpoint = false;
            if let Some(breakpoint) = breakpoint.filter(|&b| b <= target) {
                target = breakpoint;
                at_breakpoint = true;
            }
            if target >= stop {
                target = stop;
            }
            delta = target - time;

            if let Some(time_state) = self.state.time.as_mut() {
                time_state.time = target;
                time_state.set_delta(delta);
                time_state.order = order;
            }

            let solved = newton.iterate(
                &mut self.real,
                &mut self.behaviors,
                &mut self.state,
                &self.variables,
            );
            let reason = match solved {
                Ok(_) => {
                    let limit = self.behaviors.truncate(&self.state);
                    if limit > ACCEPT_RATIO * delta {
                        self.behaviors.accept(&self.state);
                        if let Some(time_state) = self.state.time.as_mut() {
                            time_state.shift();
                        }
                        time = target;
                        accepted.copy_from_slice(&self.state.solution);
                        result.points.push(TimePoint {
                            time,
                            solution: accepted.clone(),
                        });
                        result.outcomes.push(StepOutcome::Accepted { time, delta });
                        trace!("accepted t = {time:.6e} (step {delta:.3e}, order {order})");

                        let grown = limit.min(MAX_GROWTH * delta).min(max_step);
                        if at_breakpoint {
                            let gap = self
                                .behaviors
                                .next_breakpoint(time)
                                .map_or(f64::INFINITY, |next| next - time);
                            delta = grown.min(0.1 * requested.min(gap));
                            order = 1;
                        } else {
                            delta = grown;
                            order = method.max_order();
                        }
                        continue;
                    }
                    delta = limit;
                    RejectReason::Truncation
                }
                Err(err) if err.is_recoverable() => {
                    delta /= NONCONVERGENCE_SHRINK;
                    order = 1;
                    RejectReason::NonConvergence
                }
                Err(err) => return Err(err),
            };

            debug!(
                "rejected t = {target:.6e} (step {:.3e}, {reason:?}), retrying with {delta:.3e}",
                target - time
            );
            result.outcomes.push(StepOutcome::Rejected {
                time: target,
                delta: target - time,
                reason,
            });
            self.state.solution.copy_from_slice(&accepted);
            if delta < min_step {
                return Err(NodalError::TimestepTooSmall { time, step: delta });
            }
        }

        debug!(
            "transient finished: {} points, {} rejected steps",
            result.points.len(),
            result.rejected()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;
    use crate::components::{Capacitor, Resistor, VoltageSource};
    use crate::simulation::{BiasingConfig, IntegrationMethod};

    fn rc(step: bool) -> Circuit {
        let mut circuit = Circuit::new();
        let source = if step {
            VoltageSource::new("V1", "in", "0", 0.0).with_pulse(0.0, 1.0, 0.0, 1e-9, 1e-9, 1.0, 0.0)
        } else {
            VoltageSource::new("V1", "in", "0", 1.0)
        };
        circuit
            .add(source)
            .unwrap()
            .add(Resistor::new("R1", "in", "out", 1e3))
            .unwrap()
            .add(Capacitor::new("C1", "out", "0", 1e-6))
            .unwrap();
        circuit
    }

    #[test]
    fn test_steady_state_stays_put() {
        let mut sim = Simulation::new(&rc(false), BiasingConfig::default()).unwrap();
        let result = sim.transient(&TransientConfig::new(1e-4, 1e-3)).unwrap();
        let out = sim.variables().get("out").unwrap().index();
        for (_, v) in result.series(out) {
            assert!((v - 1.0).abs() < 1e-6);
        }
        let last = result.points.last().map_or(0.0, |p| p.time);
        assert!((last - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_rc_charging_curve() {
        for method in [IntegrationMethod::BackwardEuler, IntegrationMethod::Trapezoidal] {
            let mut sim = Simulation::new(&rc(true), BiasingConfig::default()).unwrap();
            let config = TransientConfig::new(1e-5, 5e-3).with_method(method);
            let result = sim.transient(&config).unwrap();
            let out = sim.variables().get("out").unwrap().index();
            for (t, v) in result.series(out).into_iter().filter(|(t, _)| *t > 1e-4) {
                let expected = 1.0 - (-(t - 1e-9) * 1e3).exp();
                assert!((v - expected).abs() < 2e-2, "{method:?} at t = {t}: {v} vs {expected}");
            }
        }
    }

    #[test]
    fn test_time_points_are_increasing() {
        let mut sim = Simulation::new(&rc(true), BiasingConfig::default()).unwrap();
        let result = sim.transient(&TransientConfig::new(1e-5, 1e-3)).unwrap();
        assert!(result.points.windows(2).all(|w| w[1].time > w[0].time));
        // The rising edge is a breakpoint
        assert!(result.points.iter().any(|p| (p.time - 1e-9).abs() < 1e-18));
    }
}
