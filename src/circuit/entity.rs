//! The entity abstraction.

use std::any::Any;
use std::fmt;

use super::{Scope, ValidationRules};
use crate::error::Result;

/// Something that can be placed in a [`Circuit`](super::Circuit).
///
/// An entity only describes *what* is connected where. The behaviors that
/// stamp the equations are created by a factory registered for the concrete
/// type in a [`FactoryTable`](crate::simulation::FactoryTable).
pub trait Entity: Any + Send + Sync + fmt::Debug {
    /// Unique name within its circuit.
    fn name(&self) -> &str;

    /// Connected node names, in terminal order.
    fn nodes(&self) -> &[String];

    /// Access to the concrete type, for factory dispatch.
    fn as_any(&self) -> &dyn Any;

    /// Describe the entity's connectivity to the topology checker.
    ///
    /// The default treats every terminal as conducting to every other one.
    fn apply_rules(&self, rules: &mut ValidationRules, scope: &Scope) -> Result<()> {
        let nodes: Vec<String> = self.nodes().iter().map(|node| scope.node(node)).collect();
        rules.conduct(&nodes);
        Ok(())
    }
}
