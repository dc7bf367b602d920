//! Diode model.
//!
//! Uses the Shockley diode equation:
//!   I = Is * (exp(V / (n * Vt)) - 1)
//!
//! For Newton-Raphson iteration, we linearize around the current operating point:
//!   I ≈ I0 + G_d * (V - V0)
//!
//! where G_d = dI/dV = Is/(n*Vt) * exp(V0/(n*Vt))

use std::any::Any;

use num_complex::Complex64;

use crate::algebra::{ConductanceStamp, CurrentStamp, StampSink};
use crate::behaviors::{Behavior, BehaviorContainer, BiasingBehavior, FrequencyBehavior, TemperatureBehavior};
use crate::circuit::{Entity, ParameterSet};
use crate::error::Result;
use crate::simulation::{BindingContext, FrequencyState, SimulationState};

/// Boltzmann constant over the elementary charge (V/K).
const K_OVER_Q: f64 = 8.617_333_262e-5;

/// Minimum conductance in parallel with the junction.
const GMIN: f64 = 1e-12;

/// Junction model at one temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiodeModel {
    /// Saturation current (Is), typically 1e-14 to 1e-12 A
    pub is: f64,
    /// Ideality factor (n), typically 1.0 to 2.0
    pub n: f64,
    /// Thermal voltage kT/q
    pub vt: f64,
    /// Above this voltage the exponential is continued linearly
    pub v_crit: f64,
}

impl DiodeModel {
    pub fn new(is: f64, n: f64, temperature: f64) -> Self {
        let vt = K_OVER_Q * temperature;
        let n_vt = n * vt;
        Self {
            is,
            n,
            vt,
            v_crit: n_vt * (n_vt / (std::f64::consts::SQRT_2 * is)).ln(),
        }
    }

    /// Thermal voltage times ideality factor.
    pub fn n_vt(&self) -> f64 {
        self.n * self.vt
    }

    /// Calculate the diode current at a given voltage.
    pub fn current(&self, v: f64) -> f64 {
        let n_vt = self.n_vt();
        if v > self.v_crit {
            // Linear extrapolation for high forward bias
            let i_crit = self.is * ((self.v_crit / n_vt).exp() - 1.0);
            i_crit + self.conductance(self.v_crit) * (v - self.v_crit)
        } else if v < -5.0 * n_vt {
            // Deep reverse bias - just use saturation current
            -self.is
        } else {
            self.is * ((v / n_vt).exp() - 1.0)
        }
    }

    /// Calculate the conductance (dI/dV) at a given voltage.
    pub fn conductance(&self, v: f64) -> f64 {
        let n_vt = self.n_vt();
        let v = v.min(self.v_crit);
        if v < -5.0 * n_vt {
            0.0
        } else {
            self.is / n_vt * (v / n_vt).exp()
        }
    }

    /// Linearized model around `v`: (conductance G, equivalent current I_eq)
    /// such that I ≈ G * V + I_eq.
    pub fn linearize(&self, v: f64) -> (f64, f64) {
        let g = self.conductance(v) + GMIN;
        let i = self.current(v) + GMIN * v;
        (g, i - g * v)
    }

    /// Limit the voltage step between iterations.
    pub fn limit_voltage_step(&self, v_old: f64, v_new: f64) -> f64 {
        let max_step = self.v_crit.max(0.5);
        if (v_new - v_old).abs() > max_step {
            if v_new > v_old {
                v_old + max_step
            } else {
                v_old - max_step
            }
        } else {
            v_new
        }
    }
}

/// A junction diode. Parameters: `is` (default 1e-14 A), `n` (default 1).
#[derive(Debug, Clone)]
pub struct Diode {
    name: String,
    nodes: [String; 2],
    params: ParameterSet,
}

impl Diode {
    pub fn new(name: impl Into<String>, anode: impl Into<String>, cathode: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: [anode.into(), cathode.into()],
            params: ParameterSet::new().with("is", 1e-14).with("n", 1.0),
        }
    }

    pub fn with_param(mut self, name: &str, value: f64) -> Self {
        self.params.set(name, value);
        self
    }
}

impl Entity for Diode {
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

struct DiodeBehavior {
    name: String,
    anode: usize,
    cathode: usize,
    is: f64,
    n: f64,
    model: DiodeModel,
    stamp: ConductanceStamp,
    current: CurrentStamp,
    ac_stamp: ConductanceStamp,
    reltol: f64,
    abstol: f64,
    /// Junction voltage, current and conductance of the last load
    voltage: f64,
    junction_current: f64,
    conductance: f64,
    limited: bool,
}

impl DiodeBehavior {
    fn junction_voltage(&self, state: &SimulationState) -> f64 {
        state.value(self.anode) - state.value(self.cathode)
    }
}

impl TemperatureBehavior for DiodeBehavior {
    fn temperature(&mut self, state: &SimulationState) -> Result<()> {
        self.model = DiodeModel::new(self.is, self.n, state.temperature);
        Ok(())
    }
}

impl BiasingBehavior for DiodeBehavior {
    fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        let proposed = self.junction_voltage(state);
        let v = self.model.limit_voltage_step(self.voltage, proposed);
        self.limited = v != proposed;

        let (g, i_eq) = self.model.linearize(v);
        self.voltage = v;
        self.conductance = g;
        self.junction_current = g * v + i_eq;

        self.stamp.add(sink, g);
        self.current.add(sink, i_eq);
        Ok(())
    }

    fn is_convergent(&mut self, state: &SimulationState) -> bool {
        if self.limited {
            return false;
        }
        let v = self.junction_voltage(state);
        let predicted = self.junction_current + self.conductance * (v - self.voltage);
        let actual = self.model.current(v) + GMIN * v;
        let tolerance = self.reltol * predicted.abs().max(actual.abs()) + self.abstol;
        (predicted - actual).abs() <= tolerance
    }
}

impl FrequencyBehavior for DiodeBehavior {
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

impl Behavior for DiodeBehavior {
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

pub(crate) fn bind_diode(entity: &Diode, context: &mut BindingContext<'_>) -> Result<BehaviorContainer> {
    let name = context.scope().entity(&entity.name);
    let is = entity.params.positive(&name, "is")?;
    let n = entity.params.positive(&name, "n")?;
    let config = context.config();
    let anode = context.node(&entity.nodes[0]);
    let cathode = context.node(&entity.nodes[1]);
    let behavior = DiodeBehavior {
        anode,
        cathode,
        is,
        n,
        model: DiodeModel::new(is, n, config.temperature),
        stamp: ConductanceStamp::new(context.real(), anode, cathode),
        current: CurrentStamp::new(context.real(), anode, cathode),
        ac_stamp: ConductanceStamp::new(context.complex(), anode, cathode),
        reltol: config.reltol,
        abstol: config.current_abstol,
        voltage: 0.0,
        junction_current: 0.0,
        conductance: GMIN,
        limited: false,
        name: name.clone(),
    };
    Ok(BehaviorContainer::new(name).with(behavior))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;
    use crate::components::{Resistor, VoltageSource};
    use crate::simulation::{BiasingConfig, Simulation, DEFAULT_TEMPERATURE};

    #[test]
    fn test_diode_forward_bias() {
        let d = DiodeModel::new(1e-14, 1.0, DEFAULT_TEMPERATURE);

        // At 0V, current should be approximately 0
        assert!(d.current(0.0).abs() < 1e-10);

        // At forward bias, current should increase exponentially
        let i_small = d.current(0.3);
        let i_large = d.current(0.6);
        assert!(i_large > i_small * 100.0);
    }

    #[test]
    fn test_diode_reverse_bias() {
        let d = DiodeModel::new(1e-14, 1.0, DEFAULT_TEMPERATURE);

        // In reverse bias, current should approach -Is
        let i_rev = d.current(-1.0);
        assert!(i_rev < 0.0);
        assert!(i_rev > -2.0 * d.is);
    }

    #[test]
    fn test_extrapolation_is_continuous() {
        let d = DiodeModel::new(1e-14, 1.0, DEFAULT_TEMPERATURE);
        let below = d.current(d.v_crit - 1e-9);
        let above = d.current(d.v_crit + 1e-9);
        assert!((above - below).abs() < 1e-6 * above.abs());
    }

    #[test]
    fn test_forward_biased_diode_circuit() {
        let mut circuit = Circuit::new();
        circuit
            .add(VoltageSource::new("V1", "in", "0", 5.0))
            .unwrap()
            .add(Resistor::new("R1", "in", "a", 1e3))
            .unwrap()
            .add(Diode::new("D1", "a", "0"))
            .unwrap();
        let mut sim = Simulation::new(&circuit, BiasingConfig::default()).unwrap();
        let iterations = sim.operating_point().unwrap();
        assert!(iterations > 2);

        let va = sim.voltage("a").unwrap();
        assert!(va > 0.55 && va < 0.75, "junction voltage {va}");
        // KCL at the anode
        let model = DiodeModel::new(1e-14, 1.0, DEFAULT_TEMPERATURE);
        let resistor_current = (5.0 - va) / 1e3;
        let diode_current = model.current(va) + GMIN * va;
        assert!((resistor_current - diode_current).abs() < 2e-3 * resistor_current);
    }
}
