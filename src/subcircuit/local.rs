//! Local composition: the children of an instance are solved by a private
//! solver whose elimination stops at the pins.
//!
//! Pin variables take the leading indices of the private variable set and are
//! deferred to the end of the elimination order. After factoring the internal
//! block, the unreduced pin rows hold the Schur complement
//!
//! ```text
//! A_pp - A_pi * inv(A_ii) * A_ip      b_p - A_pi * inv(A_ii) * b_i
//! ```
//!
//! which is stamped into the parent at the pins' parent locations. Once the
//! parent has solved for the pin values, back-substitution recovers the
//! internal unknowns.

use std::collections::HashMap;

use log::{debug, trace, warn};
use num_complex::Complex64;

use crate::algebra::{MatrixHandle, ReducedEquation, RhsHandle, Scalar, SparseSolver, StampSink};
use crate::behaviors::{
    AcceptBehavior, Behavior, BehaviorGroup, BiasingBehavior, FrequencyBehavior,
    TemperatureBehavior, TimeBehavior,
};
use crate::circuit::{VariableKind, VariableSet};
use crate::error::{NodalError, Result};
use crate::simulation::{BindingContext, BranchRegistry, FrequencyState, SimulationState};

use super::Subcircuit;

/// Parent locations of the reduced pin equations.
struct Reduction {
    /// Keyed by local (row, column) pin pair.
    elements: HashMap<(usize, usize), MatrixHandle>,
    /// Keyed by local pin row.
    rhs: HashMap<usize, RhsHandle>,
}

impl Reduction {
    fn new<T: Scalar>(parent: &mut SparseSolver<T>, pins: &[(usize, usize)]) -> Self {
        let mut elements = HashMap::new();
        let mut rhs = HashMap::new();
        for &(local_row, parent_row) in pins {
            rhs.insert(local_row, parent.get_or_create_rhs(parent_row));
            for &(local_column, parent_column) in pins {
                elements.insert(
                    (local_row, local_column),
                    parent.get_or_create_element(parent_row, parent_column),
                );
            }
        }
        Self { elements, rhs }
    }

    fn stamp<T: Scalar>(&self, equations: &[ReducedEquation<T>], sink: &mut dyn StampSink<T>) {
        for equation in equations {
            if let Some(rhs) = self.rhs.get(&equation.row) {
                rhs.add(sink, equation.rhs);
            }
            for &(column, value) in &equation.entries {
                if let Some(element) = self.elements.get(&(equation.row, column)) {
                    element.add(sink, value);
                }
            }
        }
    }
}

pub(super) struct LocalBehavior {
    name: String,
    group: BehaviorGroup,
    real: SparseSolver<f64>,
    complex: SparseSolver<Complex64>,
    state: SimulationState,
    /// (local, parent) index of every pin.
    pins: Vec<(usize, usize)>,
    real_reduction: Reduction,
    complex_reduction: Reduction,
    reltol: f64,
    /// Absolute tolerance per local variable, by kind.
    abstol: Vec<f64>,
}

impl LocalBehavior {
    fn sync_pins(&mut self, parent: &SimulationState) {
        for &(local, outer) in &self.pins {
            self.state.solution[local] = parent.value(outer);
        }
    }

    fn is_pin(&self, local: usize) -> bool {
        self.pins.iter().any(|&(pin, _)| pin == local)
    }

    /// A singular internal block has no equivalent at the pins.
    fn factor_error(&self, err: NodalError) -> NodalError {
        match err {
            NodalError::SingularMatrix { index } => {
                warn!("internal block of '{}' is singular at local index {index:?}", self.name);
                NodalError::NoEquivalentSubcircuit {
                    name: self.name.clone(),
                }
            }
            other => other,
        }
    }

    /// Whether the internal unknowns moved less than the tolerances.
    fn internals_settled(&self) -> bool {
        (1..self.state.solution.len())
            .filter(|&index| !self.is_pin(index))
            .all(|index| {
                let new = self.state.solution[index];
                let old = self.state.old_solution[index];
                (new - old).abs() <= self.reltol * new.abs().max(old.abs()) + self.abstol[index]
            })
    }
}

impl TemperatureBehavior for LocalBehavior {
    fn temperature(&mut self, state: &SimulationState) -> Result<()> {
        self.state.sync_environment(state);
        self.group.temperature(&self.state)
    }
}

impl BiasingBehavior for LocalBehavior {
    fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        self.state.sync_environment(state);
        self.sync_pins(state);

        self.real.reset();
        self.group.load(&self.state, &mut self.real)?;
        if let Err(err) = self.real.factor() {
            return Err(self.factor_error(err));
        }
        let equations = self.real.reduced_equations()?;
        trace!("'{}' contributes {} reduced equations", self.name, equations.len());
        self.real_reduction.stamp(&equations, sink);
        Ok(())
    }

    fn is_convergent(&mut self, state: &SimulationState) -> bool {
        self.sync_pins(state);
        self.state.old_solution.clone_from(&self.state.solution);
        if let Err(err) = self.real.solve(&mut self.state.solution) {
            warn!("cannot solve internals of '{}': {err}", self.name);
            return false;
        }
        let settled = self.internals_settled();
        let children = self.group.is_convergent(&self.state);
        settled && children
    }
}

impl TimeBehavior for LocalBehavior {
    fn initialize_states(&mut self, state: &SimulationState) -> Result<()> {
        self.state.sync_environment(state);
        self.sync_pins(state);
        self.group.initialize_states(&self.state)
    }

    fn truncate(&mut self, state: &SimulationState) -> f64 {
        self.state.sync_environment(state);
        self.group.truncate(&self.state)
    }

    fn next_breakpoint(&mut self, time: f64) -> Option<f64> {
        self.group.next_breakpoint(time)
    }
}

impl AcceptBehavior for LocalBehavior {
    fn accept(&mut self, state: &SimulationState) {
        self.state.sync_environment(state);
        self.sync_pins(state);
        self.group.accept(&self.state);
    }
}

impl FrequencyBehavior for LocalBehavior {
    fn load_frequency(
        &mut self,
        state: &SimulationState,
        frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        self.state.sync_environment(state);
        self.complex.reset();
        self.group
            .load_frequency(&self.state, frequency, &mut self.complex)?;
        if let Err(err) = self.complex.factor() {
            return Err(self.factor_error(err));
        }
        let equations = self.complex.reduced_equations()?;
        self.complex_reduction.stamp(&equations, sink);
        Ok(())
    }
}

impl Behavior for LocalBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_temperature(&mut self) -> Option<&mut dyn TemperatureBehavior> {
        Some(self)
    }

    fn as_biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn as_time(&mut self) -> Option<&mut dyn TimeBehavior> {
        Some(self)
    }

    fn as_accept(&mut self) -> Option<&mut dyn AcceptBehavior> {
        Some(self)
    }

    fn as_frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }

    fn unbind(&mut self) {
        self.group.unbind();
        self.real.clear();
        self.complex.clear();
    }
}

/// Bind the children of `entity` into private solvers.
///
/// Fails with [`NodalError::NoEquivalentSubcircuit`] when the internal block
/// is structurally singular, e.g. a voltage source fixing a pin with nothing
/// else inside.
pub(super) fn bind(
    entity: &Subcircuit,
    name: &str,
    context: &mut BindingContext<'_>,
) -> Result<LocalBehavior> {
    let config = context.config();
    let mut real = SparseSolver::with_config(config.pivot_config());
    let mut complex = SparseSolver::with_config(config.pivot_config());
    let mut variables = VariableSet::new();
    let mut branches = BranchRegistry::new();

    // Pins take the leading local indices; a ground pin is no unknown
    let parent_nodes = context.nodes(&entity.nodes);
    let pins: Vec<(usize, usize)> = entity
        .definition
        .pins
        .iter()
        .map(|pin| variables.map_node(pin, VariableKind::Voltage).index())
        .zip(parent_nodes)
        .filter(|&(local, _)| local != 0)
        .collect();

    let group = {
        let scope = context.scope().local(&entity.name);
        let mut local = BindingContext::new(
            &mut real,
            &mut complex,
            &mut variables,
            &mut branches,
            context.factories(),
            config,
        )
        .with_scope(scope);
        local.bind_circuit(&entity.definition.circuit, entity.parallel)?
    };
    branches.check()?;

    let size = variables.len();
    real.ensure_size(size);
    complex.ensure_size(size);
    let mut deferred: Vec<usize> = pins.iter().map(|&(local, _)| local).collect();
    deferred.sort_unstable();
    deferred.dedup();
    real.defer(&deferred);
    complex.defer(&deferred);
    if let Some(row) = real.structural_deficiency() {
        debug!(
            "'{name}': local equation of '{}' cannot be eliminated",
            variables.at(row).map_or("?", |v| v.name())
        );
        return Err(NodalError::NoEquivalentSubcircuit {
            name: name.to_string(),
        });
    }

    let mut abstol = vec![config.abstol; size + 1];
    for variable in variables.iter() {
        if variable.kind() == VariableKind::Current {
            abstol[variable.index()] = config.current_abstol;
        }
    }

    debug!(
        "local subcircuit '{name}': {} unknowns reduced to {} pins",
        size,
        deferred.len()
    );

    let mut state = SimulationState::new(size);
    state.temperature = config.temperature;
    state.nominal_temperature = config.nominal_temperature;

    Ok(LocalBehavior {
        name: name.to_string(),
        group,
        real,
        complex,
        state,
        real_reduction: Reduction::new(context.real(), &pins),
        complex_reduction: Reduction::new(context.complex(), &pins),
        pins,
        reltol: config.reltol,
        abstol,
    })
}
