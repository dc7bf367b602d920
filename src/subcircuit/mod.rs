//! Hierarchical circuits.
//!
//! A [`SubcircuitDefinition`] is a circuit with a list of pin names. A
//! [`Subcircuit`] places one instance of a definition into a parent circuit,
//! connecting each pin to a parent node. Two compositions are supported:
//!
//! - [`Composition::Flat`] - the children bind straight into the parent's
//!   solver; internal nodes are prefixed with the instance path (`X1/b`).
//! - [`Composition::Local`] - the children bind into a private solver that
//!   eliminates every internal unknown and stamps the reduced pin equations
//!   into the parent.

mod local;

use std::any::Any;
use std::sync::Arc;

use num_complex::Complex64;

use crate::algebra::StampSink;
use crate::behaviors::{
    AcceptBehavior, Behavior, BehaviorContainer, BehaviorGroup, BiasingBehavior,
    FrequencyBehavior, ParallelFlags, TemperatureBehavior, TimeBehavior,
};
use crate::circuit::{Circuit, Entity, Scope, ValidationRules};
use crate::error::{NodalError, Result};
use crate::simulation::{BindingContext, FactoryTable, FrequencyState, SimulationState};

/// A reusable circuit with named pins.
///
/// The circuit is shared between all instances.
#[derive(Debug, Clone)]
pub struct SubcircuitDefinition {
    circuit: Arc<Circuit>,
    pins: Vec<String>,
}

impl SubcircuitDefinition {
    pub fn new<I, S>(circuit: Circuit, pins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            circuit: Arc::new(circuit),
            pins: pins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn pins(&self) -> &[String] {
        &self.pins
    }
}

/// How a subcircuit instance is combined with its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Composition {
    #[default]
    Flat,
    Local,
}

/// An instance of a [`SubcircuitDefinition`].
#[derive(Debug, Clone)]
pub struct Subcircuit {
    name: String,
    definition: SubcircuitDefinition,
    nodes: Vec<String>,
    composition: Composition,
    parallel: ParallelFlags,
}

impl Subcircuit {
    pub fn new<I, S>(name: impl Into<String>, definition: &SubcircuitDefinition, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            definition: definition.clone(),
            nodes: nodes.into_iter().map(Into::into).collect(),
            composition: Composition::Flat,
            parallel: ParallelFlags::none(),
        }
    }

    pub fn with_composition(mut self, composition: Composition) -> Self {
        self.composition = composition;
        self
    }

    /// Parallel flags for the behaviors of the children.
    pub fn with_parallel(mut self, flags: ParallelFlags) -> Self {
        self.parallel = flags;
        self
    }

    pub fn definition(&self) -> &SubcircuitDefinition {
        &self.definition
    }

    pub fn composition(&self) -> Composition {
        self.composition
    }

    fn check_pins(&self, path: &str) -> Result<()> {
        let expected = self.definition.pins.len();
        if self.nodes.len() != expected {
            return Err(NodalError::PinCountMismatch {
                name: path.to_string(),
                expected,
                actual: self.nodes.len(),
            });
        }
        Ok(())
    }
}

impl Entity for Subcircuit {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Checks the children as if they were flattened into the parent.
    fn apply_rules(&self, rules: &mut ValidationRules, scope: &Scope) -> Result<()> {
        self.check_pins(&scope.entity(&self.name))?;
        // A pin nothing inside touches still has to be connected
        for node in &self.nodes {
            rules.declare(&scope.node(node));
        }
        let inner = scope.flat(&self.name, &self.definition.pins, &self.nodes);
        for entity in self.definition.circuit.iter() {
            entity.apply_rules(rules, &inner)?;
        }
        Ok(())
    }
}

/// The children of a flat instance, bound into the parent's solver.
struct FlatBehavior {
    name: String,
    group: BehaviorGroup,
}

impl TemperatureBehavior for FlatBehavior {
    fn temperature(&mut self, state: &SimulationState) -> Result<()> {
        self.group.temperature(state)
    }
}

impl BiasingBehavior for FlatBehavior {
    fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        self.group.load(state, sink)
    }

    fn is_convergent(&mut self, state: &SimulationState) -> bool {
        self.group.is_convergent(state)
    }
}

impl TimeBehavior for FlatBehavior {
    fn initialize_states(&mut self, state: &SimulationState) -> Result<()> {
        self.group.initialize_states(state)
    }

    fn truncate(&mut self, state: &SimulationState) -> f64 {
        self.group.truncate(state)
    }

    fn next_breakpoint(&mut self, time: f64) -> Option<f64> {
        self.group.next_breakpoint(time)
    }
}

impl AcceptBehavior for FlatBehavior {
    fn accept(&mut self, state: &SimulationState) {
        self.group.accept(state);
    }
}

impl FrequencyBehavior for FlatBehavior {
    fn load_frequency(
        &mut self,
        state: &SimulationState,
        frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        self.group.load_frequency(state, frequency, sink)
    }
}

impl Behavior for FlatBehavior {
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
    }
}

pub(crate) fn bind_subcircuit(
    entity: &Subcircuit,
    context: &mut BindingContext<'_>,
) -> Result<BehaviorContainer> {
    let name = context.scope().entity(&entity.name);
    entity.check_pins(&name)?;
    match entity.composition {
        Composition::Flat => {
            let scope = context
                .scope()
                .flat(&entity.name, &entity.definition.pins, &entity.nodes);
            let group = context
                .child(scope)
                .bind_circuit(&entity.definition.circuit, entity.parallel)?;
            Ok(BehaviorContainer::new(name.clone()).with(FlatBehavior { name, group }))
        }
        Composition::Local => {
            let behavior = local::bind(entity, &name, context)?;
            Ok(BehaviorContainer::new(name).with(behavior))
        }
    }
}

/// Register the subcircuit factory.
pub fn register(table: &mut FactoryTable) {
    table.register(bind_subcircuit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Resistor, VoltageSource};
    use crate::simulation::{BiasingConfig, Simulation};
    use approx::assert_relative_eq;

    fn divider() -> SubcircuitDefinition {
        let mut inner = Circuit::new();
        inner
            .add(Resistor::new("R1", "a", "b", 1e3))
            .unwrap()
            .add(Resistor::new("R2", "b", "0", 1e3))
            .unwrap();
        SubcircuitDefinition::new(inner, ["a", "b"])
    }

    #[test]
    fn test_flat_instance_prefixes_internal_names() {
        let mut inner = Circuit::new();
        inner
            .add(Resistor::new("R1", "a", "mid", 1e3))
            .unwrap()
            .add(Resistor::new("R2", "mid", "0", 1e3))
            .unwrap();
        let definition = SubcircuitDefinition::new(inner, ["a"]);

        let mut circuit = Circuit::new();
        circuit
            .add(VoltageSource::new("V1", "in", "0", 2.0))
            .unwrap()
            .add(Subcircuit::new("X1", &definition, ["in"]))
            .unwrap();
        let mut sim = Simulation::new(&circuit, BiasingConfig::default()).unwrap();
        sim.operating_point().unwrap();
        assert_relative_eq!(sim.voltage("X1/mid").unwrap(), 1.0, epsilon = 1e-9);
        assert_eq!(sim.voltage("mid"), None);
    }

    #[test]
    fn test_nested_flat_instances() {
        let definition = divider();
        let mut middle = Circuit::new();
        middle
            .add(Subcircuit::new("X2", &definition, ["p", "q"]))
            .unwrap()
            .add(Resistor::new("R3", "q", "0", 1e3))
            .unwrap();
        let outer = SubcircuitDefinition::new(middle, ["p", "q"]);

        let mut circuit = Circuit::new();
        circuit
            .add(VoltageSource::new("V1", "in", "0", 3.0))
            .unwrap()
            .add(Subcircuit::new("X1", &outer, ["in", "out"]))
            .unwrap();
        let mut sim = Simulation::new(&circuit, BiasingConfig::default()).unwrap();
        sim.operating_point().unwrap();
        // 1k in series with 1k || 1k
        assert_relative_eq!(sim.voltage("out").unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pin_count_mismatch() {
        let mut circuit = Circuit::new();
        circuit
            .add(VoltageSource::new("V1", "in", "0", 1.0))
            .unwrap()
            .add(Subcircuit::new("X1", &divider(), ["in"]))
            .unwrap();
        let expected = NodalError::PinCountMismatch {
            name: "X1".into(),
            expected: 2,
            actual: 1,
        };
        assert_eq!(
            Simulation::new(&circuit, BiasingConfig::default()).unwrap_err(),
            expected
        );
        let unchecked = BiasingConfig::default().without_validation();
        assert_eq!(Simulation::new(&circuit, unchecked).unwrap_err(), expected);
    }
}
