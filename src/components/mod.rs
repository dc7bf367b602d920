//! Reference component models.
//!
//! This module provides the devices used to exercise the engine:
//! - Linear: Resistor, Capacitor, Inductor
//! - Sources: Voltage Source (DC, AC, pulse), Current Source
//! - Controlled: Current-controlled current source
//! - Nonlinear: Diode
//!
//! Each component is an [`Entity`](crate::circuit::Entity) with a factory
//! that binds its behaviors; [`register`] adds all of them to a table.

mod controlled;
mod diode;
mod linear;
mod sources;

pub use controlled::Cccs;
pub use diode::{Diode, DiodeModel};
pub use linear::{Capacitor, Inductor, Resistor};
pub use sources::{CurrentSource, Pulse, VoltageSource};

use crate::simulation::FactoryTable;

/// Register the factories of every built-in component.
pub fn register(table: &mut FactoryTable) {
    table.register(linear::bind_resistor);
    table.register(linear::bind_capacitor);
    table.register(linear::bind_inductor);
    table.register(sources::bind_voltage_source);
    table.register(sources::bind_current_source);
    table.register(controlled::bind_cccs);
    table.register(diode::bind_diode);
}
