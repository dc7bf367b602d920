//! Linear passive components: Resistor, Capacitor, Inductor.

use std::any::Any;

use num_complex::Complex64;

use crate::algebra::{BranchStamp, ConductanceStamp, CurrentStamp, MatrixHandle, RhsHandle, StampSink};
use crate::behaviors::{
    AcceptBehavior, Behavior, BehaviorContainer, BiasingBehavior, FrequencyBehavior,
    TemperatureBehavior, TimeBehavior,
};
use crate::circuit::{Entity, ParameterSet, Scope, ValidationRules};
use crate::error::{NodalError, Result};
use crate::simulation::{BindingContext, FrequencyState, SimulationState, StateDerivative};

/// A resistor.
///
/// Parameters: `resistance` (ohms), optional temperature coefficients `tc1`
/// (1/K) and `tc2` (1/K²) around `tnom` (kelvin, defaults to the simulation's
/// nominal temperature).
#[derive(Debug, Clone)]
pub struct Resistor {
    name: String,
    nodes: [String; 2],
    params: ParameterSet,
}

impl Resistor {
    pub fn new(name: impl Into<String>, pos: impl Into<String>, neg: impl Into<String>, resistance: f64) -> Self {
        Self {
            name: name.into(),
            nodes: [pos.into(), neg.into()],
            params: ParameterSet::new().with("resistance", resistance),
        }
    }

    /// Set any parameter.
    pub fn with_param(mut self, name: &str, value: f64) -> Self {
        self.params.set(name, value);
        self
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }
}

impl Entity for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ResistorBehavior {
    name: String,
    stamp: ConductanceStamp,
    ac_stamp: ConductanceStamp,
    resistance: f64,
    tc1: f64,
    tc2: f64,
    tnom: Option<f64>,
    conductance: f64,
}

impl TemperatureBehavior for ResistorBehavior {
    fn temperature(&mut self, state: &SimulationState) -> Result<()> {
        let difference = state.temperature - self.tnom.unwrap_or(state.nominal_temperature);
        let factor = 1.0 + self.tc1 * difference + self.tc2 * difference * difference;
        if factor <= 0.0 {
            return Err(NodalError::invalid_parameter(
                &self.name,
                "tc1",
                format!("resistance is not positive at {} K", state.temperature),
            ));
        }
        self.conductance = 1.0 / (self.resistance * factor);
        Ok(())
    }
}

impl BiasingBehavior for ResistorBehavior {
    fn load(&mut self, _state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        self.stamp.add(sink, self.conductance);
        Ok(())
    }
}

impl FrequencyBehavior for ResistorBehavior {
    fn load_frequency(
        &mut self,
        _state: &SimulationState,
        _frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        self.ac_stamp.add(sink, Complex64::new(self.conductance, 0.0));
        Ok(())
    }
}

impl Behavior for ResistorBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_temperature(&mut self) -> Option<&mut dyn TemperatureBehavior> {
        Some(self)
    }

    fn as_biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn as_frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

pub(crate) fn bind_resistor(entity: &Resistor, context: &mut BindingContext<'_>) -> Result<BehaviorContainer> {
    let name = context.scope().entity(&entity.name);
    let resistance = entity.params.positive(&name, "resistance")?;
    let pos = context.node(&entity.nodes[0]);
    let neg = context.node(&entity.nodes[1]);
    let behavior = ResistorBehavior {
        stamp: ConductanceStamp::new(context.real(), pos, neg),
        ac_stamp: ConductanceStamp::new(context.complex(), pos, neg),
        resistance,
        tc1: entity.params.get_or("tc1", 0.0),
        tc2: entity.params.get_or("tc2", 0.0),
        tnom: entity.params.get("tnom"),
        conductance: 1.0 / resistance,
        name: name.clone(),
    };
    Ok(BehaviorContainer::new(name).with(behavior))
}

/// A capacitor. Parameter: `capacitance` (farads).
///
/// Open at DC. In the time domain the charge `q = C * v` is integrated with
/// the active method, giving the companion model
///
/// ```text
/// i = geq * v + ieq,   geq = C * ag,   ieq = dq/dt - geq * v
/// ```
#[derive(Debug, Clone)]
pub struct Capacitor {
    name: String,
    nodes: [String; 2],
    params: ParameterSet,
}

impl Capacitor {
    pub fn new(name: impl Into<String>, pos: impl Into<String>, neg: impl Into<String>, capacitance: f64) -> Self {
        Self {
            name: name.into(),
            nodes: [pos.into(), neg.into()],
            params: ParameterSet::new().with("capacitance", capacitance),
        }
    }
}

impl Entity for Capacitor {
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

struct CapacitorBehavior {
    name: String,
    pos: usize,
    neg: usize,
    capacitance: f64,
    stamp: ConductanceStamp,
    current: CurrentStamp,
    ac_stamp: ConductanceStamp,
    charge: StateDerivative,
}

impl CapacitorBehavior {
    fn voltage(&self, state: &SimulationState) -> f64 {
        state.value(self.pos) - state.value(self.neg)
    }
}

impl BiasingBehavior for CapacitorBehavior {
    fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        let Some(time) = &state.time else {
            return Ok(());
        };
        let v = self.voltage(state);
        self.charge.set(self.capacitance * v);
        let geq = self.capacitance * self.charge.integrate(time);
        let ieq = self.charge.derivative() - geq * v;
        self.stamp.add(sink, geq);
        self.current.add(sink, ieq);
        Ok(())
    }
}

impl TimeBehavior for CapacitorBehavior {
    fn initialize_states(&mut self, state: &SimulationState) -> Result<()> {
        self.charge.initialize(self.capacitance * self.voltage(state));
        Ok(())
    }

    fn truncate(&mut self, state: &SimulationState) -> f64 {
        state
            .time
            .as_ref()
            .map_or(f64::INFINITY, |time| self.charge.truncate(time))
    }
}

impl AcceptBehavior for CapacitorBehavior {
    fn accept(&mut self, _state: &SimulationState) {
        self.charge.accept();
    }
}

impl FrequencyBehavior for CapacitorBehavior {
    fn load_frequency(
        &mut self,
        _state: &SimulationState,
        frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        self.ac_stamp.add(sink, frequency.laplace * self.capacitance);
        Ok(())
    }
}

impl Behavior for CapacitorBehavior {
    fn name(&self) -> &str {
        &self.name
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
}

pub(crate) fn bind_capacitor(entity: &Capacitor, context: &mut BindingContext<'_>) -> Result<BehaviorContainer> {
    let name = context.scope().entity(&entity.name);
    let capacitance = entity.params.positive(&name, "capacitance")?;
    let pos = context.node(&entity.nodes[0]);
    let neg = context.node(&entity.nodes[1]);
    let behavior = CapacitorBehavior {
        pos,
        neg,
        capacitance,
        stamp: ConductanceStamp::new(context.real(), pos, neg),
        current: CurrentStamp::new(context.real(), pos, neg),
        ac_stamp: ConductanceStamp::new(context.complex(), pos, neg),
        charge: StateDerivative::new(),
        name: name.clone(),
    };
    Ok(BehaviorContainer::new(name).with(behavior))
}

/// An inductor. Parameter: `inductance` (henries).
///
/// Adds a branch current unknown `i` and the branch equation
/// `v(pos) - v(neg) = d(L * i)/dt`, which is a short circuit at DC.
#[derive(Debug, Clone)]
pub struct Inductor {
    name: String,
    nodes: [String; 2],
    params: ParameterSet,
}

impl Inductor {
    pub fn new(name: impl Into<String>, pos: impl Into<String>, neg: impl Into<String>, inductance: f64) -> Self {
        Self {
            name: name.into(),
            nodes: [pos.into(), neg.into()],
            params: ParameterSet::new().with("inductance", inductance),
        }
    }
}

impl Entity for Inductor {
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
        rules.fix_voltage(
            &scope.entity(&self.name),
            &scope.node(&self.nodes[0]),
            &scope.node(&self.nodes[1]),
        )
    }
}

struct InductorBehavior {
    name: String,
    branch: usize,
    inductance: f64,
    incidence: BranchStamp,
    branch_branch: MatrixHandle,
    branch_rhs: RhsHandle,
    ac_incidence: BranchStamp,
    ac_branch_branch: MatrixHandle,
    flux: StateDerivative,
}

impl BiasingBehavior for InductorBehavior {
    fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        self.incidence.add(sink);
        let Some(time) = &state.time else {
            return Ok(());
        };
        let i = state.value(self.branch);
        self.flux.set(self.inductance * i);
        let req = self.inductance * self.flux.integrate(time);
        self.branch_branch.subtract(sink, req);
        self.branch_rhs.add(sink, self.flux.derivative() - req * i);
        Ok(())
    }
}

impl TimeBehavior for InductorBehavior {
    fn initialize_states(&mut self, state: &SimulationState) -> Result<()> {
        self.flux
            .initialize(self.inductance * state.value(self.branch));
        Ok(())
    }

    fn truncate(&mut self, state: &SimulationState) -> f64 {
        state
            .time
            .as_ref()
            .map_or(f64::INFINITY, |time| self.flux.truncate(time))
    }
}

impl AcceptBehavior for InductorBehavior {
    fn accept(&mut self, _state: &SimulationState) {
        self.flux.accept();
    }
}

impl FrequencyBehavior for InductorBehavior {
    fn load_frequency(
        &mut self,
        _state: &SimulationState,
        frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        self.ac_incidence.add(sink);
        self.ac_branch_branch
            .subtract(sink, frequency.laplace * self.inductance);
        Ok(())
    }
}

impl Behavior for InductorBehavior {
    fn name(&self) -> &str {
        &self.name
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
}

pub(crate) fn bind_inductor(entity: &Inductor, context: &mut BindingContext<'_>) -> Result<BehaviorContainer> {
    let name = context.scope().entity(&entity.name);
    let inductance = entity.params.positive(&name, "inductance")?;
    let pos = context.node(&entity.nodes[0]);
    let neg = context.node(&entity.nodes[1]);
    let branch = context.create_branch(&entity.name)?;
    let behavior = InductorBehavior {
        branch,
        inductance,
        incidence: BranchStamp::new(context.real(), pos, neg, branch),
        branch_branch: context.real().get_or_create_element(branch, branch),
        branch_rhs: context.real().get_or_create_rhs(branch),
        ac_incidence: BranchStamp::new(context.complex(), pos, neg, branch),
        ac_branch_branch: context.complex().get_or_create_element(branch, branch),
        flux: StateDerivative::new(),
        name: name.clone(),
    };
    Ok(BehaviorContainer::new(name).with(behavior))
}
