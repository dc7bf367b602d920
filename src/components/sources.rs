//! Independent voltage and current sources.

use std::any::Any;

use num_complex::Complex64;

use crate::algebra::{BranchStamp, CurrentStamp, RhsHandle, StampSink};
use crate::behaviors::{Behavior, BehaviorContainer, BiasingBehavior, FrequencyBehavior, TimeBehavior};
use crate::circuit::{Entity, ParameterSet, Scope, ValidationRules};
use crate::error::Result;
use crate::simulation::{BindingContext, FrequencyState, SimulationState};

/// Breakpoints closer than this to the current time are considered reached.
const BREAKPOINT_RESOLUTION: f64 = 1e-15;

/// A trapezoidal pulse train.
///
/// ```text
///        ____pw____
///   v2  /          \
///      /tr        tf\
/// v1 _/              \______
///    |td|
/// ```
///
/// A period of zero means a single pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pulse {
    pub v1: f64,
    pub v2: f64,
    pub td: f64,
    pub tr: f64,
    pub tf: f64,
    pub pw: f64,
    pub per: f64,
}

impl Pulse {
    fn is_periodic(&self) -> bool {
        self.per > 0.0 && self.per.is_finite()
    }

    /// Value at time `t`.
    pub fn value(&self, t: f64) -> f64 {
        if t < self.td {
            return self.v1;
        }
        let mut local = t - self.td;
        if self.is_periodic() {
            local -= (local / self.per).floor() * self.per;
        }
        if local < self.tr {
            self.v1 + (self.v2 - self.v1) * local / self.tr
        } else if local < self.tr + self.pw {
            self.v2
        } else if local < self.tr + self.pw + self.tf {
            self.v2 + (self.v1 - self.v2) * (local - self.tr - self.pw) / self.tf
        } else {
            self.v1
        }
    }

    /// First corner of the waveform strictly after `time`.
    pub fn next_breakpoint(&self, time: f64) -> Option<f64> {
        let resolution = BREAKPOINT_RESOLUTION.max(time.abs() * 1e-12);
        if self.td - time > resolution {
            return Some(self.td);
        }
        let corners = [
            0.0,
            self.tr,
            self.tr + self.pw,
            self.tr + self.pw + self.tf,
        ];
        let first_period = if self.is_periodic() {
            ((time - self.td) / self.per).floor().max(0.0)
        } else {
            0.0
        };
        let periods = if self.is_periodic() { 2 } else { 1 };
        (0..periods)
            .flat_map(|k| {
                let start = self.td + (first_period + k as f64) * self.per.max(0.0);
                corners.iter().map(move |corner| start + corner)
            })
            .find(|&t| t - time > resolution)
    }
}

/// An independent voltage source.
///
/// Parameters: `dc`, `acmag`, `acphase` (degrees). Adds the branch current
/// unknown of the source; positive current enters the positive terminal.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    name: String,
    nodes: [String; 2],
    params: ParameterSet,
    pulse: Option<Pulse>,
}

impl VoltageSource {
    pub fn new(name: impl Into<String>, pos: impl Into<String>, neg: impl Into<String>, dc: f64) -> Self {
        Self {
            name: name.into(),
            nodes: [pos.into(), neg.into()],
            params: ParameterSet::new().with("dc", dc),
            pulse: None,
        }
    }

    /// Small-signal excitation.
    pub fn with_ac(mut self, magnitude: f64, phase_degrees: f64) -> Self {
        self.params.set("acmag", magnitude);
        self.params.set("acphase", phase_degrees);
        self
    }

    /// Replace the DC value by a pulse waveform in the time domain.
    ///
    /// The operating point uses the waveform's value at time zero.
    #[allow(clippy::too_many_arguments)]
    pub fn with_pulse(mut self, v1: f64, v2: f64, td: f64, tr: f64, tf: f64, pw: f64, per: f64) -> Self {
        self.pulse = Some(Pulse {
            v1,
            v2,
            td,
            tr,
            tf,
            pw,
            per,
        });
        self
    }

    pub fn pulse(&self) -> Option<&Pulse> {
        self.pulse.as_ref()
    }
}

impl Entity for VoltageSource {
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

fn phasor(params: &ParameterSet) -> Complex64 {
    Complex64::from_polar(
        params.get_or("acmag", 0.0),
        params.get_or("acphase", 0.0).to_radians(),
    )
}

struct VoltageSourceBehavior {
    name: String,
    dc: f64,
    ac: Complex64,
    pulse: Option<Pulse>,
    incidence: BranchStamp,
    rhs: RhsHandle,
    ac_incidence: BranchStamp,
    ac_rhs: RhsHandle,
}

impl VoltageSourceBehavior {
    fn value(&self, state: &SimulationState) -> f64 {
        match (&self.pulse, &state.time) {
            (Some(pulse), Some(time)) => pulse.value(time.time),
            (Some(pulse), None) => pulse.value(0.0),
            (None, _) => self.dc,
        }
    }
}

impl BiasingBehavior for VoltageSourceBehavior {
    fn load(&mut self, state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        self.incidence.add(sink);
        self.rhs.add(sink, self.value(state));
        Ok(())
    }
}

impl TimeBehavior for VoltageSourceBehavior {
    fn initialize_states(&mut self, _state: &SimulationState) -> Result<()> {
        Ok(())
    }

    fn next_breakpoint(&mut self, time: f64) -> Option<f64> {
        self.pulse.and_then(|pulse| pulse.next_breakpoint(time))
    }
}

impl FrequencyBehavior for VoltageSourceBehavior {
    fn load_frequency(
        &mut self,
        _state: &SimulationState,
        _frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        self.ac_incidence.add(sink);
        self.ac_rhs.add(sink, self.ac);
        Ok(())
    }
}

impl Behavior for VoltageSourceBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn as_time(&mut self) -> Option<&mut dyn TimeBehavior> {
        Some(self)
    }

    fn as_frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

pub(crate) fn bind_voltage_source(
    entity: &VoltageSource,
    context: &mut BindingContext<'_>,
) -> Result<BehaviorContainer> {
    let name = context.scope().entity(&entity.name);
    let pos = context.node(&entity.nodes[0]);
    let neg = context.node(&entity.nodes[1]);
    let branch = context.create_branch(&entity.name)?;
    let behavior = VoltageSourceBehavior {
        dc: entity.params.get_or("dc", 0.0),
        ac: phasor(&entity.params),
        pulse: entity.pulse,
        incidence: BranchStamp::new(context.real(), pos, neg, branch),
        rhs: context.real().get_or_create_rhs(branch),
        ac_incidence: BranchStamp::new(context.complex(), pos, neg, branch),
        ac_rhs: context.complex().get_or_create_rhs(branch),
        name: name.clone(),
    };
    Ok(BehaviorContainer::new(name).with(behavior))
}

/// An independent current source.
///
/// Parameters: `dc`, `acmag`, `acphase` (degrees). Positive current flows
/// from the positive node through the source into the negative node.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    name: String,
    nodes: [String; 2],
    params: ParameterSet,
}

impl CurrentSource {
    pub fn new(name: impl Into<String>, pos: impl Into<String>, neg: impl Into<String>, dc: f64) -> Self {
        Self {
            name: name.into(),
            nodes: [pos.into(), neg.into()],
            params: ParameterSet::new().with("dc", dc),
        }
    }

    pub fn with_ac(mut self, magnitude: f64, phase_degrees: f64) -> Self {
        self.params.set("acmag", magnitude);
        self.params.set("acphase", phase_degrees);
        self
    }
}

impl Entity for CurrentSource {
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

struct CurrentSourceBehavior {
    name: String,
    dc: f64,
    ac: Complex64,
    stamp: CurrentStamp,
    ac_stamp: CurrentStamp,
}

impl BiasingBehavior for CurrentSourceBehavior {
    fn load(&mut self, _state: &SimulationState, sink: &mut dyn StampSink<f64>) -> Result<()> {
        self.stamp.add(sink, self.dc);
        Ok(())
    }
}

impl FrequencyBehavior for CurrentSourceBehavior {
    fn load_frequency(
        &mut self,
        _state: &SimulationState,
        _frequency: &FrequencyState,
        sink: &mut dyn StampSink<Complex64>,
    ) -> Result<()> {
        self.ac_stamp.add(sink, self.ac);
        Ok(())
    }
}

impl Behavior for CurrentSourceBehavior {
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

pub(crate) fn bind_current_source(
    entity: &CurrentSource,
    context: &mut BindingContext<'_>,
) -> Result<BehaviorContainer> {
    let name = context.scope().entity(&entity.name);
    let pos = context.node(&entity.nodes[0]);
    let neg = context.node(&entity.nodes[1]);
    let behavior = CurrentSourceBehavior {
        dc: entity.params.get_or("dc", 0.0),
        ac: phasor(&entity.params),
        stamp: CurrentStamp::new(context.real(), pos, neg),
        ac_stamp: CurrentStamp::new(context.complex(), pos, neg),
        name: name.clone(),
    };
    Ok(BehaviorContainer::new(name).with(behavior))
}
