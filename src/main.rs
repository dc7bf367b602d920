//! Nodal - run the built-in demonstration circuits.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug nodal ladder --mode local --analysis ac
//! nodal rc-pulse --analysis tran --step 1e-5 --stop 5e-3
//! ```

use clap::{Parser, ValueEnum};
use log::info;

use nodal_core::behaviors::ParallelFlags;
use nodal_core::components::{Capacitor, Diode, Resistor, VoltageSource};
use nodal_core::error::Result;
use nodal_core::{
    BiasingConfig, Circuit, Composition, FrequencySweep, Simulation, Subcircuit,
    SubcircuitDefinition, TransientConfig,
};

/// Number of sections in the ladder demo
const LADDER_SECTIONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Demo {
    /// Two-resistor divider
    Divider,
    /// R-2R ladder built from subcircuit sections
    Ladder,
    /// RC low-pass subcircuit driven by a pulse
    RcPulse,
    /// Forward-biased diode behind a resistor
    Diode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Analysis {
    Op,
    Tran,
    Ac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Flatten subcircuits into the top-level solver
    Flat,
    /// Solve subcircuits locally and reduce them to their pins
    Local,
    /// Flatten and dispatch behaviors over the thread pool
    Parallel,
}

/// Circuit equation engine demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Demonstration circuit
    #[arg(value_enum, default_value_t = Demo::Divider)]
    circuit: Demo,

    /// Analysis to run
    #[arg(short, long, value_enum, default_value_t = Analysis::Op)]
    analysis: Analysis,

    /// Subcircuit composition and dispatch
    #[arg(short, long, value_enum, default_value_t = Mode::Flat)]
    mode: Mode,

    /// Transient time step in seconds
    #[arg(long, default_value_t = 1e-5)]
    step: f64,

    /// Transient stop time in seconds
    #[arg(long, default_value_t = 5e-3)]
    stop: f64,

    /// AC sweep start frequency in Hz
    #[arg(long, default_value_t = 1.0)]
    fstart: f64,

    /// AC sweep stop frequency in Hz
    #[arg(long, default_value_t = 1e6)]
    fstop: f64,

    /// AC sweep points per decade
    #[arg(long, default_value_t = 10)]
    points: usize,
}

fn composition(mode: Mode) -> Composition {
    match mode {
        Mode::Local => Composition::Local,
        Mode::Flat | Mode::Parallel => Composition::Flat,
    }
}

fn build(demo: Demo, mode: Mode) -> Result<Circuit> {
    let mut circuit = Circuit::new();
    match demo {
        Demo::Divider => {
            circuit
                .add(VoltageSource::new("V1", "in", "0", 10.0).with_ac(1.0, 0.0))?
                .add(Resistor::new("R1", "in", "out", 1e3))?
                .add(Resistor::new("R2", "out", "0", 1e3))?;
        }
        Demo::Ladder => {
            let mut section = Circuit::new();
            section
                .add(Resistor::new("R1", "a", "b", 1e3))?
                .add(Resistor::new("R2", "b", "0", 2e3))?;
            let section = SubcircuitDefinition::new(section, ["a", "b"]);

            circuit.add(VoltageSource::new("V1", "n0", "0", 1.0).with_ac(1.0, 0.0))?;
            for k in 0..LADDER_SECTIONS {
                let right = if k + 1 == LADDER_SECTIONS {
                    "out".to_string()
                } else {
                    format!("n{}", k + 1)
                };
                circuit.add(
                    Subcircuit::new(format!("X{}", k + 1), &section, [format!("n{k}"), right])
                        .with_composition(composition(mode)),
                )?;
            }
            circuit.add(Resistor::new("RL", "out", "0", 2e3))?;
        }
        Demo::RcPulse => {
            let mut filter = Circuit::new();
            filter
                .add(Resistor::new("R1", "a", "b", 1e3))?
                .add(Capacitor::new("C1", "b", "0", 1e-6))?;
            let filter = SubcircuitDefinition::new(filter, ["a", "b"]);
            circuit
                .add(
                    VoltageSource::new("V1", "in", "0", 0.0)
                        .with_ac(1.0, 0.0)
                        .with_pulse(0.0, 1.0, 1e-4, 1e-6, 1e-6, 2e-3, 4e-3),
                )?
                .add(Subcircuit::new("X1", &filter, ["in", "out"]).with_composition(composition(mode)))?;
        }
        Demo::Diode => {
            circuit
                .add(VoltageSource::new("V1", "in", "0", 5.0).with_ac(1.0, 0.0))?
                .add(Resistor::new("R1", "in", "out", 1e3))?
                .add(Diode::new("D1", "out", "0"))?;
        }
    }
    Ok(circuit)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let circuit = build(args.circuit, args.mode)?;
    let mut config = BiasingConfig::default();
    if args.mode == Mode::Parallel {
        config = config.with_parallel(ParallelFlags::all());
    }
    let mut sim = Simulation::new(&circuit, config)?;
    info!("{:?} bound in {:?} mode", args.circuit, args.mode);

    match args.analysis {
        Analysis::Op => {
            let iterations = sim.operating_point()?;
            println!("# converged in {iterations} iterations");
            for variable in sim.variables().iter() {
                println!("{}\t{:.9e}", variable.name(), sim.state().value(variable.index()));
            }
        }
        Analysis::Tran => {
            let result = sim.transient(&TransientConfig::new(args.step, args.stop))?;
            println!(
                "# {} points, {} rejected steps",
                result.points.len(),
                result.rejected()
            );
            let out = output_index(&sim);
            for (time, value) in result.series(out) {
                println!("{time:.9e}\t{value:.9e}");
            }
        }
        Analysis::Ac => {
            let sweep = FrequencySweep::Decade {
                start: args.fstart,
                stop: args.fstop,
                points_per_decade: args.points,
            };
            let result = sim.ac(&sweep)?;
            let out = output_index(&sim);
            println!("# frequency\tmagnitude (dB)\tphase (deg)");
            for (frequency, value) in result.series(out) {
                println!(
                    "{frequency:.6e}\t{:.4}\t{:.3}",
                    20.0 * value.norm().log10(),
                    value.arg().to_degrees()
                );
            }
        }
    }
    Ok(())
}

/// Every demo names its probe node `out`.
fn output_index(sim: &Simulation) -> usize {
    sim.variables().get("out").map_or(0, |variable| variable.index())
}
