//! Circuit description: entities, variables, parameters and validation.
//!
//! A [`Circuit`] is an ordered list of uniquely named [`Entity`] values. It
//! carries no equations itself; binding it into a
//! [`Simulation`](crate::simulation::Simulation) creates the behaviors.

mod entity;
mod parameters;
mod scope;
mod validate;
mod variables;

pub use entity::Entity;
pub use parameters::ParameterSet;
pub use scope::Scope;
pub use validate::{validate_circuit, ValidationRules};
pub use variables::{is_ground_name, Variable, VariableKind, VariableSet, GROUND};

use std::collections::HashMap;

use crate::error::{NodalError, Result};

/// An ordered collection of entities.
#[derive(Debug, Default)]
pub struct Circuit {
    entities: Vec<Box<dyn Entity>>,
    lookup: HashMap<String, usize>,
}

impl Circuit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a circuit from a list of entities.
    pub fn from_entities<I>(entities: I) -> Result<Self>
    where
        I: IntoIterator<Item = Box<dyn Entity>>,
    {
        let mut circuit = Self::new();
        for entity in entities {
            circuit.add_boxed(entity)?;
        }
        Ok(circuit)
    }

    /// Add an entity. Names must be unique.
    pub fn add<E: Entity>(&mut self, entity: E) -> Result<&mut Self> {
        self.add_boxed(Box::new(entity))
    }

    pub fn add_boxed(&mut self, entity: Box<dyn Entity>) -> Result<&mut Self> {
        let name = entity.name().to_string();
        if self.lookup.contains_key(&name) {
            return Err(NodalError::DuplicateEntity { name });
        }
        self.lookup.insert(name, self.entities.len());
        self.entities.push(entity);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Entity> {
        self.lookup.get(name).map(|&i| self.entities[i].as_ref())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Entity> {
        self.entities.iter().map(|e| e.as_ref())
    }

    /// Run the topology checks.
    pub fn validate(&self) -> Result<()> {
        validate_circuit(self)
    }
}
