//! Name resolution for nested subcircuits.

use std::collections::HashMap;

use super::variables::{is_ground_name, GROUND};

/// Resolves entity and node names of one nesting level to the names used by
/// the variable set that level binds into.
///
/// Pins are bridged to the names of the nodes they connect to. Other nodes
/// are either prefixed with the instance path (`X1/b`) when they share the
/// parent's variable set, or kept as-is when the level owns a private set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    prefix: String,
    bridges: HashMap<String, String>,
    private: bool,
}

impl Scope {
    /// The top-level scope: every name resolves to itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// The instance path, e.g. `X1/X2/`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    /// Resolve a node name.
    pub fn node(&self, name: &str) -> String {
        if is_ground_name(name) {
            return GROUND.to_string();
        }
        if let Some(bridged) = self.bridges.get(name) {
            return bridged.clone();
        }
        if self.private {
            name.to_string()
        } else {
            format!("{}{}", self.prefix, name)
        }
    }

    /// Resolve an entity name to its full instance path.
    pub fn entity(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Scope of a subcircuit instance merged into this scope's variable set.
    ///
    /// `pins` are the definition's pin names and `connections` the nodes, in
    /// this scope, they are connected to.
    pub fn flat(&self, instance: &str, pins: &[String], connections: &[String]) -> Self {
        let bridges = pins
            .iter()
            .zip(connections)
            .map(|(pin, node)| (pin.clone(), self.node(node)))
            .collect();
        Self {
            prefix: format!("{}{}/", self.prefix, instance),
            bridges,
            private: false,
        }
    }

    /// Scope of a subcircuit instance that owns a private variable set.
    pub fn local(&self, instance: &str) -> Self {
        Self {
            prefix: format!("{}{}/", self.prefix, instance),
            bridges: HashMap::new(),
            private: true,
        }
    }
}
