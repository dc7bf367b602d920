//! Simulation: binding a circuit and driving its behaviors.
//!
//! A [`Simulation`] binds every entity of a [`Circuit`] once, through a
//! [`BindingContext`], and then runs analyses over the resulting behavior
//! list:
//!
//! - [`Simulation::operating_point`] - Newton-Raphson DC solution
//! - [`Simulation::transient`] - time-domain integration with step control
//! - [`Simulation::ac`] - small-signal frequency sweep around the operating point

mod config;
mod context;
mod frequency;
mod integration;
mod newton;
mod state;
mod transient;

pub use config::{
    BiasingConfig, TransientConfig, DEFAULT_ABSTOL, DEFAULT_CURRENT_ABSTOL,
    DEFAULT_MAX_ITERATIONS, DEFAULT_RELTOL, DEFAULT_TRANSIENT_MAX_ITERATIONS,
};
pub use context::{BindingContext, BranchRegistry, Factory, FactoryTable};
pub use frequency::{AcResult, FrequencyState, FrequencySweep};
pub use integration::{IntegrationMethod, StateDerivative, TruncationTolerances};
pub use newton::NewtonRaphson;
pub use state::{SimulationState, TimeState};
pub use transient::{RejectReason, StepOutcome, TimePoint, TransientResult};

use log::{debug, warn};
use num_complex::Complex64;

use crate::algebra::SparseSolver;
use crate::behaviors::BehaviorGroup;
use crate::circuit::{Circuit, VariableSet};
use crate::error::{NodalError, Result};

/// Default circuit and nominal temperature (27 °C) in kelvin.
pub const DEFAULT_TEMPERATURE: f64 = 300.15;

/// A bound circuit ready for analysis.
pub struct Simulation {
    real: SparseSolver<f64>,
    complex: SparseSolver<Complex64>,
    variables: VariableSet,
    branches: BranchRegistry,
    behaviors: BehaviorGroup,
    state: SimulationState,
    config: BiasingConfig,
    temperature_done: bool,
    bound: bool,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("variables", &self.variables.len())
            .field("behaviors", &self.behaviors.len())
            .field("solver", &self.real)
            .finish()
    }
}

impl Simulation {
    /// Bind a circuit with the standard component factories.
    pub fn new(circuit: &Circuit, config: BiasingConfig) -> Result<Self> {
        Self::with_factories(circuit, config, &FactoryTable::standard())
    }

    /// Bind a circuit with a custom factory table.
    pub fn with_factories(
        circuit: &Circuit,
        config: BiasingConfig,
        factories: &FactoryTable,
    ) -> Result<Self> {
        if config.validate {
            circuit.validate()?;
        }
        config.check()?;

        let mut real = SparseSolver::with_config(config.pivot_config());
        let mut complex = SparseSolver::with_config(config.pivot_config());
        let mut variables = VariableSet::new();
        let mut branches = BranchRegistry::new();

        let behaviors = {
            let mut context = BindingContext::new(
                &mut real,
                &mut complex,
                &mut variables,
                &mut branches,
                factories,
                &config,
            );
            context.bind_circuit(circuit, config.parallel)?
        };
        branches.check()?;

        // Unknowns that nothing stamps still need a (singular) row
        real.ensure_size(variables.len());
        complex.ensure_size(variables.len());

        let mut state = SimulationState::new(variables.len());
        state.temperature = config.temperature;
        state.nominal_temperature = config.nominal_temperature;

        debug!(
            "bound {} entities: {} unknowns, {} matrix elements",
            behaviors.len(),
            variables.len(),
            real.matrix().element_count()
        );

        Ok(Self {
            real,
            complex,
            variables,
            branches,
            behaviors,
            state,
            config,
            temperature_done: false,
            bound: true,
        })
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub fn solver(&self) -> &SparseSolver<f64> {
        &self.real
    }

    /// Mutable solver access, e.g. to subscribe observers.
    pub fn solver_mut(&mut self) -> &mut SparseSolver<f64> {
        &mut self.real
    }

    pub fn complex_solver(&self) -> &SparseSolver<Complex64> {
        &self.complex
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn config(&self) -> &BiasingConfig {
        &self.config
    }

    pub fn behaviors(&self) -> &BehaviorGroup {
        &self.behaviors
    }

    /// Voltage of a node in the latest solution.
    pub fn voltage(&self, node: &str) -> Option<f64> {
        self.variables
            .get(node)
            .map(|variable| self.state.value(variable.index()))
    }

    /// Branch current of a voltage source or inductor in the latest solution.
    ///
    /// Positive current flows into the positive terminal and through the element.
    pub fn current(&self, entity: &str) -> Option<f64> {
        self.branches
            .get(entity)
            .map(|variable| self.state.value(variable.index()))
    }

    /// Run the temperature behaviors once.
    fn prepare(&mut self) -> Result<()> {
        if !self.temperature_done {
            self.behaviors.temperature(&self.state)?;
            self.temperature_done = true;
        }
        Ok(())
    }

    fn apply_nodesets(&mut self) {
        for (node, value) in &self.config.nodesets {
            match self.variables.get(node) {
                Some(variable) if !variable.is_ground() => {
                    self.state.solution[variable.index()] = *value;
                }
                Some(_) => warn!("ignoring nodeset on the ground node"),
                None => warn!("ignoring nodeset on unknown node '{node}'"),
            }
        }
    }

    /// Solve for the DC operating point.
    ///
    /// Returns the number of Newton-Raphson iterations used.
    pub fn operating_point(&mut self) -> Result<usize> {
        self.check_bound()?;
        self.prepare()?;
        self.state.time = None;
        self.state.solution.fill(0.0);
        self.apply_nodesets();

        let newton = NewtonRaphson::from_config(&self.config, self.config.max_iterations);
        let iterations = newton.iterate(
            &mut self.real,
            &mut self.behaviors,
            &mut self.state,
            &self.variables,
        )?;
        debug!("operating point converged in {iterations} iterations");
        Ok(iterations)
    }

    /// Release every behavior. Further analyses are not possible.
    pub fn unbind(&mut self) {
        if self.bound {
            self.behaviors.unbind();
            self.bound = false;
        }
    }

    fn check_bound(&self) -> Result<()> {
        if self.bound {
            Ok(())
        } else {
            Err(NodalError::invalid_simulation("simulation has been unbound"))
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.unbind();
    }
}
