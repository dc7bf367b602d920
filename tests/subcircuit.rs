//! Integration tests comparing flat and locally solved subcircuits.

use approx::assert_abs_diff_eq;
use nodal_core::components::{Capacitor, Diode, Resistor, VoltageSource};
use nodal_core::{
    BiasingConfig, Circuit, Composition, FrequencySweep, NodalError, Simulation, Subcircuit,
    SubcircuitDefinition, TransientConfig,
};

const MODES: [Composition; 2] = [Composition::Flat, Composition::Local];

fn definition(pins: &[&str], build: impl FnOnce(&mut Circuit)) -> SubcircuitDefinition {
    let mut inner = Circuit::new();
    build(&mut inner);
    SubcircuitDefinition::new(inner, pins.iter().copied())
}

/// Two-resistor divider with pins (a, b).
fn divider() -> SubcircuitDefinition {
    definition(&["a", "b"], |c| {
        c.add(Resistor::new("R1", "a", "b", 1e3))
            .unwrap()
            .add(Resistor::new("R2", "b", "0", 1e3))
            .unwrap();
    })
}

/// Drive an instance of `definition` on (in, out) from a 1 V source.
fn driven(definition: &SubcircuitDefinition, composition: Composition) -> Circuit {
    let mut circuit = Circuit::new();
    circuit
        .add(VoltageSource::new("V1", "in", "0", 1.0).with_ac(1.0, 0.0))
        .unwrap()
        .add(Subcircuit::new("X1", definition, ["in", "out"]).with_composition(composition))
        .unwrap();
    circuit
}

fn operating_point(circuit: &Circuit) -> Simulation {
    let mut sim = Simulation::new(circuit, BiasingConfig::default()).unwrap();
    sim.operating_point().unwrap();
    sim
}

#[test]
fn test_divider_halves_the_input() {
    for composition in MODES {
        let sim = operating_point(&driven(&divider(), composition));
        assert_abs_diff_eq!(sim.voltage("out").unwrap(), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(sim.current("V1").unwrap(), -0.5e-3, epsilon = 1e-12);
    }
}

#[test]
fn test_internal_node_is_eliminated() {
    // a --R1-- c --R3-- b, c --R2-- gnd, loaded by 1k at b
    let tee = definition(&["a", "b"], |c| {
        c.add(Resistor::new("R1", "a", "c", 1e3))
            .unwrap()
            .add(Resistor::new("R2", "c", "0", 1e3))
            .unwrap()
            .add(Resistor::new("R3", "c", "b", 1e3))
            .unwrap();
    });
    for composition in MODES {
        let mut circuit = driven(&tee, composition);
        circuit.add(Resistor::new("RL", "out", "0", 1e3)).unwrap();
        let sim = operating_point(&circuit);
        assert_abs_diff_eq!(sim.voltage("out").unwrap(), 0.2, epsilon = 1e-9);

        // Internal nodes only exist in the parent when flattened
        let internal = sim.voltage("X1/c");
        match composition {
            Composition::Flat => assert_abs_diff_eq!(internal.unwrap(), 0.4, epsilon = 1e-9),
            Composition::Local => assert_eq!(internal, None),
        }
    }
}

#[test]
fn test_fixed_internal_source_has_no_equivalent() {
    let source = definition(&["a"], |c| {
        c.add(VoltageSource::new("V1", "a", "0", 1.0)).unwrap();
    });
    let build = |composition: Composition| {
        let mut circuit = Circuit::new();
        circuit
            .add(Resistor::new("R1", "in", "out", 1e3))
            .unwrap()
            .add(Resistor::new("R2", "out", "0", 1e3))
            .unwrap()
            .add(Subcircuit::new("X1", &source, ["in"]).with_composition(composition))
            .unwrap();
        circuit
    };

    let flat = operating_point(&build(Composition::Flat));
    assert_abs_diff_eq!(flat.voltage("out").unwrap(), 0.5, epsilon = 1e-9);

    let err = Simulation::new(&build(Composition::Local), BiasingConfig::default()).unwrap_err();
    assert_eq!(err, NodalError::NoEquivalentSubcircuit { name: "X1".into() });
}

#[test]
fn test_local_nonlinear_subcircuit_matches_flat() {
    let clamp = definition(&["a"], |c| {
        c.add(Resistor::new("R1", "a", "m", 1e3))
            .unwrap()
            .add(Diode::new("D1", "m", "0"))
            .unwrap();
    });
    let voltages: Vec<f64> = MODES
        .iter()
        .map(|&composition| {
            let mut circuit = Circuit::new();
            circuit
                .add(VoltageSource::new("V1", "s", "0", 5.0))
                .unwrap()
                .add(Resistor::new("R0", "s", "in", 1e3))
                .unwrap()
                .add(Subcircuit::new("X1", &clamp, ["in"]).with_composition(composition))
                .unwrap();
            operating_point(&circuit).voltage("in").unwrap()
        })
        .collect();
    assert!(voltages[0] > 2.5 && voltages[0] < 3.0, "V(in) = {}", voltages[0]);
    assert_abs_diff_eq!(voltages[0], voltages[1], epsilon = 1e-3);
}

#[test]
fn test_ac_divider_is_flat_over_frequency() {
    let sweep = FrequencySweep::Decade {
        start: 1.0,
        stop: 100.0,
        points_per_decade: 3,
    };
    for composition in MODES {
        let mut sim = Simulation::new(&driven(&divider(), composition), BiasingConfig::default()).unwrap();
        let result = sim.ac(&sweep).unwrap();
        let out = sim.variables().get("out").unwrap().index();
        let series = result.series(out);
        assert_eq!(series.len(), 7);
        for (_, value) in series {
            assert_abs_diff_eq!(value.re, 0.5, epsilon = 1e-12);
            assert_abs_diff_eq!(value.im, 0.0, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_ac_lowpass_matches_flat() {
    let lowpass = definition(&["a", "b"], |c| {
        c.add(Resistor::new("R1", "a", "m", 500.0))
            .unwrap()
            .add(Resistor::new("R2", "m", "b", 500.0))
            .unwrap()
            .add(Capacitor::new("C1", "b", "0", 1e-6))
            .unwrap();
    });
    let sweep = FrequencySweep::Decade {
        start: 10.0,
        stop: 1e5,
        points_per_decade: 5,
    };
    let responses: Vec<_> = MODES
        .iter()
        .map(|&composition| {
            let mut sim = Simulation::new(&driven(&lowpass, composition), BiasingConfig::default()).unwrap();
            let result = sim.ac(&sweep).unwrap();
            let out = sim.variables().get("out").unwrap().index();
            result.series(out)
        })
        .collect();
    for ((f, flat), (_, local)) in responses[0].iter().zip(&responses[1]) {
        let expected = 1.0 / (1.0 + (2.0 * std::f64::consts::PI * f * 1e-3) * num_complex::Complex64::i());
        assert_abs_diff_eq!((flat - expected).norm(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!((flat - local).norm(), 0.0, epsilon = 1e-9);
    }
}

#[test]
fn test_local_rc_transient_charges() {
    let rc = definition(&["a", "b"], |c| {
        c.add(Resistor::new("R1", "a", "b", 1e3))
            .unwrap()
            .add(Capacitor::new("C1", "b", "0", 1e-6))
            .unwrap();
    });
    let mut circuit = Circuit::new();
    circuit
        .add(VoltageSource::new("V1", "in", "0", 0.0).with_pulse(0.0, 1.0, 0.0, 1e-9, 1e-9, 1.0, 0.0))
        .unwrap()
        .add(Subcircuit::new("X1", &rc, ["in", "out"]).with_composition(Composition::Local))
        .unwrap();

    let mut sim = Simulation::new(&circuit, BiasingConfig::default()).unwrap();
    let result = sim.transient(&TransientConfig::new(1e-5, 5e-3)).unwrap();
    let out = sim.variables().get("out").unwrap().index();
    for (t, v) in result.series(out).into_iter().filter(|(t, _)| *t > 1e-4) {
        let expected = 1.0 - (-(t - 1e-9) * 1e3).exp();
        assert!((v - expected).abs() < 2e-2, "at t = {t}: {v} vs {expected}");
    }
}
