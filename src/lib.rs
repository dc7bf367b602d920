//! # Nodal Core
//!
//! A sparse circuit-equation engine.
//!
//! This library provides:
//! - A Markowitz-ordered sparse LU solver over real and complex scalars
//! - Handle-based stamping, so behaviors resolve matrix locations once
//! - Newton-Raphson operating point, transient and AC analyses
//! - Hierarchical subcircuits, either flattened or solved locally and
//!   reduced to their pins
//! - Parallel dispatch of behavior work over rayon
//!
//! ## Architecture
//!
//! - [`algebra`] - Sparse store, permutations, solver and element handles
//! - [`circuit`] - Entities, variables, name scopes and topology validation
//! - [`behaviors`] - Capability traits and parallel behavior groups
//! - [`components`] - Reference device models (R, L, C, sources, diode)
//! - [`subcircuit`] - Subcircuit definitions and instances
//! - [`simulation`] - Binding, Newton-Raphson and analysis drivers
//!
//! ## Usage
//!
//! ```no_run
//! use nodal_core::components::{Resistor, VoltageSource};
//! use nodal_core::{BiasingConfig, Circuit, Simulation};
//!
//! # fn main() -> nodal_core::Result<()> {
//! let mut circuit = Circuit::new();
//! circuit
//!     .add(VoltageSource::new("V1", "in", "0", 10.0))?
//!     .add(Resistor::new("R1", "in", "out", 1e3))?
//!     .add(Resistor::new("R2", "out", "0", 1e3))?;
//!
//! let mut sim = Simulation::new(&circuit, BiasingConfig::default())?;
//! sim.operating_point()?;
//! let out = sim.voltage("out").unwrap_or_default();
//! assert!((out - 5.0).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modified Nodal Analysis
//!
//! Every node voltage and every voltage-defining branch current is one
//! unknown. Index 0 is the ground reference; it is never stored, and handles
//! that touch it drop their contributions. For each Newton-Raphson iteration:
//!
//! 1. Every behavior stamps its linearized contribution through its handles
//! 2. The solver factors the matrix, reusing the previous pivot order
//! 3. The solve yields the next iterate; the behaviors check convergence
//!
//! Reactive elements are discretized with backward Euler or the trapezoidal
//! rule, and the time step is controlled by local truncation error.

pub mod algebra;
pub mod behaviors;
pub mod circuit;
pub mod components;
pub mod error;
pub mod simulation;
pub mod subcircuit;

// Re-export main types for convenience
pub use circuit::Circuit;
pub use error::{NodalError, Result};
pub use simulation::{BiasingConfig, FrequencySweep, Simulation, TransientConfig};
pub use subcircuit::{Composition, Subcircuit, SubcircuitDefinition};
