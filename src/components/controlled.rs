//! Current-controlled current source.

use std::any::Any;

use num_complex::Complex64;

use crate::algebra::{MatrixHandle, StampSink};
use crate::behaviors::{Behavior, BehaviorContainer, BiasingBehavior, FrequencyBehavior};
use crate::circuit::{Entity, ParameterSet, Scope, ValidationRules};
use crate::error::Result;
use crate::simulation::{BindingContext, FrequencyState, SimulationState};

/// A current source of `gain` times the branch current of another entity
/// (a voltage source or inductor in the same scope).
#[derive(Debug, Clone)]
pub struct Cccs {
    name: String,
    nodes: [String; 2],
    control: String,
    params: ParameterSet,
}

impl Cccs {
    pub fn new(
        name: impl Into<String>,
        pos: impl Into<String>,
        neg: impl Into<String>,
        control: impl Into<String>,
        gain: f64,
    ) -> Self {
        Self {
            name: name.into(),
            nodes: [pos.into(), neg.into()],
            control: control.into(),
            params: ParameterSet::new().with("gain", gain),
        }
    }

    pub fn control(&self) -> &str {
        &self.control
    }
}

impl Entity for Cccs {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn apply_rules(&self, rules: &mut ValidationRules, scope: &Scope) -> Result<()> {
        rules.connect(&[scope.node(&self.nodes[0]), scope.node(&self.nodes[1])]);
        Ok(())
    }
}

struct CccsBehavior {
    name: String,
    gain: f64,
    pos_control: MatrixHandle,
    neg_control: MatrixHandle,
    ac_pos_control: MatrixHandle,
    ac_neg_control: MatrixHandle,
}

impl BiasingBehavior for CccsBehavior {
    fn load(&mut self, _state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        self.pos_control.add(sink, self.gain);
        self.neg_control.subtract(sink, self.gain);
        Ok(())
    }
}

impl FrequencyBehavior for CccsBehavior {
    fn load_frequency(
        &mut self,
        _state: &SimulationState,
        _frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        let gain = Complex64::new(self.gain, 0.0);
        self.ac_pos_control.add(sink, gain);
        self.ac_neg_control.subtract(sink, gain);
        Ok(())
    }
}

impl Behavior for CccsBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn as_frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

pub(crate) fn bind_cccs(entity: &Cccs, context: &mut BindingContext<'_>) -> Result<BehaviorContainer> {
    let name = context.scope().entity(&entity.name);
    let gain = entity.params.require(&name, "gain")?;
    let pos = context.node(&entity.nodes[0]);
    let neg = context.node(&entity.nodes[1]);
    let control = context.branch_of(&entity.control);
    let behavior = CccsBehavior {
        gain,
        pos_control: context.real().get_or_create_element(pos, control),
        neg_control: context.real().get_or_create_element(neg, control),
        ac_pos_control: context.complex().get_or_create_element(pos, control),
        ac_neg_control: context.complex().get_or_create_element(neg, control),
        name: name.clone(),
    };
    Ok(BehaviorContainer::new(name).with(behavior))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;
    use crate::components::{Resistor, VoltageSource};
    use crate::error::NodalError;
    use crate::simulation::{BiasingConfig, Simulation};
    use approx::assert_relative_eq;

    #[test]
    fn test_mirrors_controlling_current() {
        let mut circuit = Circuit::new();
        // The controlled source is added before the source it senses
        circuit
            .add(Cccs::new("F1", "0", "out", "V1", 2.0))
            .unwrap()
            .add(Resistor::new("R2", "out", "0", 500.0))
            .unwrap()
            .add(VoltageSource::new("V1", "in", "0", 1.0))
            .unwrap()
            .add(Resistor::new("R1", "in", "0", 1e3))
            .unwrap();
        let mut sim = Simulation::new(&circuit, BiasingConfig::default()).unwrap();
        sim.operating_point().unwrap();
        // i(V1) = -1 mA, so 2 mA * -1 flows from out to ground through F1
        assert_relative_eq!(sim.current("V1").unwrap(), -1e-3, epsilon = 1e-12);
        assert_relative_eq!(sim.voltage("out").unwrap(), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unknown_control_fails_binding() {
        let mut circuit = Circuit::new();
        circuit
            .add(Cccs::new("F1", "out", "0", "Vnone", 1.0))
            .unwrap()
            .add(Resistor::new("R1", "out", "0", 1e3))
            .unwrap();
        let err = Simulation::new(&circuit, BiasingConfig::default()).unwrap_err();
        assert_eq!(err, NodalError::EntityNotFound { name: "Vnone".into() });
    }

    #[test]
    fn test_control_without_branch_fails_binding() {
        let mut circuit = Circuit::new();
        circuit
            .add(VoltageSource::new("V1", "in", "0", 1.0))
            .unwrap()
            .add(Resistor::new("R1", "in", "0", 1e3))
            .unwrap()
            .add(Cccs::new("F1", "out", "0", "R1", 1.0))
            .unwrap()
            .add(Resistor::new("R2", "out", "0", 1e3))
            .unwrap();
        let err = Simulation::new(&circuit, BiasingConfig::default()).unwrap_err();
        assert_eq!(
            err,
            NodalError::MissingBehavior {
                entity: "R1".into(),
                capability: "branch current".into(),
            }
        );
    }
}
