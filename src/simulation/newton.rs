//! Newton-Raphson iteration over a bound behavior list.

use std::mem;

use log::{debug, trace};

use crate::algebra::SparseSolver;
use crate::behaviors::BehaviorGroup;
use crate::circuit::{VariableKind, VariableSet};
use crate::error::{NodalError, Result};

use super::{BiasingConfig, SimulationState};

/// Newton-Raphson controller.
///
/// Each iteration reloads every behavior at the current iterate, factors,
/// solves, and compares the new solution to the previous one. An unknown is
/// converged when `|new - old| <= reltol * max(|new|, |old|) + abstol`, with
/// the absolute tolerance chosen by the unknown's kind.
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonRaphson {
    pub max_iterations: usize,
    pub reltol: f64,
    pub abstol: f64,
    pub current_abstol: f64,
}

impl NewtonRaphson {
    /// Controller with the tolerances of `config` and the given iteration limit.
    pub fn from_config(config: &BiasingConfig, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            reltol: config.reltol,
            abstol: config.abstol,
            current_abstol: config.current_abstol,
        }
    }

    /// Iterate from `state.solution` until convergence.
    ///
    /// Returns the number of iterations used. Running out of iterations is
    /// reported as [`NodalError::ConvergenceFailure`]; solver failures are
    /// returned as-is.
    pub fn iterate(
        &self,
        solver: &mut SparseSolver<f64>,
        behaviors: &mut BehaviorGroup,
        state: &mut SimulationState,
        variables: &VariableSet,
    ) -> Result<usize> {
        let mut max_diff = f64::INFINITY;

        for iteration in 1..=self.max_iterations {
            state.iteration = iteration;
            solver.reset();
            behaviors.load(state, solver)?;
            solver.factor()?;

            mem::swap(&mut state.solution, &mut state.old_solution);
            // Trailing entries not owned by the solver keep the previous iterate
            state.solution.copy_from_slice(&state.old_solution);
            solver.solve(&mut state.solution)?;

            let (worst, diff) = self.residual(state, variables);
            max_diff = diff;
            // Behaviors are always asked so they can update their limiting state
            let accepted = behaviors.is_convergent(state);
            trace!(
                "iteration {iteration}: max |dx| = {diff:.3e}, normalized {worst:.3e}, behaviors {}",
                if accepted { "converged" } else { "pending" }
            );

            if worst <= 1.0 && accepted {
                return Ok(iteration);
            }
        }

        debug!(
            "no convergence after {} iterations (max |dx| = {max_diff:.3e})",
            self.max_iterations
        );
        Err(NodalError::convergence_failure(self.max_iterations, max_diff))
    }

    /// Largest normalized and absolute change between the last two iterates.
    fn residual(&self, state: &SimulationState, variables: &VariableSet) -> (f64, f64) {
        variables
            .iter()
            .fold((0.0_f64, 0.0_f64), |(worst, largest), variable| {
                let index = variable.index();
                let (new, old) = (state.solution[index], state.old_solution[index]);
                let abstol = match variable.kind() {
                    VariableKind::Current => self.current_abstol,
                    VariableKind::Voltage | VariableKind::Internal => self.abstol,
                };
                let tolerance = self.reltol * new.abs().max(old.abs()) + abstol;
                let diff = (new - old).abs();
                (worst.max(diff / tolerance), largest.max(diff))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::{ConductanceStamp, CurrentStamp, StampSink};
    use crate::behaviors::{Behavior, BehaviorContainer, BiasingBehavior, ParallelFlags};

    /// A square-law conductor to ground: i = k * v^2, driven by a current source.
    struct SquareLaw {
        stamp: ConductanceStamp,
        source: CurrentStamp,
        node: usize,
        k: f64,
        drive: f64,
    }

    impl BiasingBehavior for SquareLaw {
        fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
            let v = state.value(self.node).max(0.0);
            let g = (2.0 * self.k * v).max(1e-3);
            let i = self.k * v * v;
            self.stamp.add(sink, g);
            // Linearized: g * v_new = drive - (i - g * v)
            self.source.add(sink, i - g * v - self.drive);
            Ok(())
        }
    }

    impl Behavior for SquareLaw {
        fn name(&self) -> &str {
            "square"
        }

        fn as_biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
            Some(self)
        }
    }

    fn setup(max_iterations: usize) -> (NewtonRaphson, SparseSolver<f64>, BehaviorGroup, VariableSet) {
        let mut variables = VariableSet::new();
        let node = variables.map_node("a", VariableKind::Voltage).index();
        let mut solver = SparseSolver::new();
        let behavior = SquareLaw {
            stamp: ConductanceStamp::new(&mut solver, node, 0),
            source: CurrentStamp::new(&mut solver, node, 0),
            node,
            k: 1.0,
            drive: 4.0,
        };
        let mut group = BehaviorGroup::new(ParallelFlags::none());
        group.push(BehaviorContainer::new("square").with(behavior));
        let newton = NewtonRaphson::from_config(&BiasingConfig::default(), max_iterations);
        (newton, solver, group, variables)
    }

    #[test]
    fn test_converges_to_square_root() {
        let (newton, mut solver, mut group, variables) = setup(50);
        let mut state = SimulationState::new(1);
        let iterations = newton.iterate(&mut solver, &mut group, &mut state, &variables).unwrap();
        assert!(iterations > 2);
        assert!((state.value(1) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_iteration_limit_is_recoverable_failure() {
        let (newton, mut solver, mut group, variables) = setup(2);
        let mut state = SimulationState::new(1);
        let err = newton.iterate(&mut solver, &mut group, &mut state, &variables).unwrap_err();
        assert!(matches!(err, NodalError::ConvergenceFailure { iterations: 2, .. }));
        assert!(err.is_recoverable());
    }
}
