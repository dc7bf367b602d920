//! Integration tests for transient step control.

use std::any::Any;

use nodal_core::algebra::StampSink;
use nodal_core::behaviors::{Behavior, BehaviorContainer, BiasingBehavior};
use nodal_core::circuit::Entity;
use nodal_core::components::{Capacitor, Resistor, VoltageSource};
use nodal_core::simulation::{
    BindingContext, FactoryTable, RejectReason, SimulationState, StepOutcome, TransientResult,
};
use nodal_core::{BiasingConfig, Circuit, Result, Simulation, TransientConfig};

/// Time window in which large steps never converge.
const WINDOW: (f64, f64) = (2e-5, 4e-5);

/// Largest step that converges inside the window.
const MAX_DELTA: f64 = 5e-7;

/// Pulse start and width; the width is far below the requested step.
const TD: f64 = 5e-5;
const PW: f64 = 2e-7;

/// An entity without equations that refuses convergence for large steps.
#[derive(Debug)]
struct Stubborn {
    name: String,
}

impl Entity for Stubborn {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &[]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct StubbornBehavior {
    name: String,
}

impl BiasingBehavior for StubbornBehavior {
    fn load(&mut self, _state: &SimulationState, _sink: &mut dyn StampSink<f64>) -> Result<()> {
        Ok(())
    }

    fn is_convergent(&mut self, state: &SimulationState) -> bool {
        match &state.time {
            Some(time) if (WINDOW.0..WINDOW.1).contains(&time.time) => time.delta() <= MAX_DELTA,
            _ => true,
        }
    }
}

impl Behavior for StubbornBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }
}

fn bind_stubborn(entity: &Stubborn, context: &mut BindingContext<'_>) -> Result<BehaviorContainer> {
    let name = context.scope().entity(&entity.name);
    Ok(BehaviorContainer::new(name.clone()).with(StubbornBehavior { name }))
}

fn run() -> (Simulation, TransientResult) {
    let mut circuit = Circuit::new();
    circuit
        .add(VoltageSource::new("V1", "in", "0", 0.0).with_pulse(0.0, 1.0, TD, 1e-9, 1e-9, PW, 0.0))
        .unwrap()
        .add(Resistor::new("R1", "in", "out", 1e3))
        .unwrap()
        .add(Capacitor::new("C1", "out", "0", 1e-9))
        .unwrap()
        .add(Stubborn { name: "S1".into() })
        .unwrap();

    let mut factories = FactoryTable::standard();
    factories.register(bind_stubborn);
    let mut sim = Simulation::with_factories(&circuit, BiasingConfig::default(), &factories).unwrap();
    let result = sim.transient(&TransientConfig::new(1e-5, 1e-4)).unwrap();
    (sim, result)
}

#[test]
fn test_rejected_steps_are_retried_smaller_from_the_same_time() {
    let (_, result) = run();
    let rejected = result.rejected();
    assert!(rejected > 0, "the window must force rejections");
    assert!(result.outcomes.iter().any(|o| matches!(
        o,
        StepOutcome::Rejected {
            reason: RejectReason::NonConvergence,
            ..
        }
    )));

    for pair in result.outcomes.windows(2) {
        if let StepOutcome::Rejected { time, delta, .. } = pair[0] {
            let start = time - delta;
            let retry = pair[1];
            assert!(
                retry.delta() < delta,
                "step after rejection at {time:e} grew: {} >= {delta}",
                retry.delta()
            );
            assert!(
                (retry.time() - retry.delta() - start).abs() < 1e-15,
                "retry after rejection at {time:e} did not restart from {start:e}"
            );
        }
    }
}

#[test]
fn test_time_only_advances_through_accepted_points() {
    let (_, result) = run();
    let mut time = 0.0;
    for outcome in &result.outcomes {
        let start = outcome.time() - outcome.delta();
        assert!((start - time).abs() < 1e-15, "attempt from {start:e}, last accepted {time:e}");
        if outcome.is_accepted() {
            time = outcome.time();
        }
    }
    assert_eq!(result.points.len(), result.outcomes.len() - result.rejected() + 1);
    assert!((time - 1e-4).abs() < 1e-15);
}

#[test]
fn test_narrow_pulse_is_resolved() {
    let (sim, result) = run();
    let input = sim.variables().get("in").unwrap().index();
    let series = result.series(input);
    assert!(series
        .iter()
        .any(|&(t, v)| t > TD && t < TD + 3e-9 + PW && (v - 1.0).abs() < 1e-9));
    assert!(series.iter().any(|&(t, _)| (t - (TD + 1e-9)).abs() < 1e-18));
}
