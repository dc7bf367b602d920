//! Circuit validation.
//!
//! Topology checks that run before binding:
//! - every node has at least two connections
//! - every node has a DC path to ground
//! - no loop of voltage-defining branches (voltage sources, inductors)
//! - no voltage source shorted onto a single node

use std::collections::HashMap;

use log::debug;

use crate::error::{NodalError, Result};

use super::{Circuit, Scope, GROUND};

/// Disjoint-set forest over node indices.
#[derive(Debug, Clone, Default)]
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn grow(&mut self, size: usize) {
        while self.parent.len() < size {
            self.parent.push(self.parent.len());
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    /// Merge two sets, returning false if they were already joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        self.parent[ra.max(rb)] = ra.min(rb);
        true
    }
}

/// Connectivity facts collected from every entity.
#[derive(Debug, Clone)]
pub struct ValidationRules {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
    connections: Vec<usize>,
    conducting: UnionFind,
    fixed: UnionFind,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationRules {
    pub fn new() -> Self {
        let mut rules = Self {
            names: Vec::new(),
            lookup: HashMap::new(),
            connections: Vec::new(),
            conducting: UnionFind::default(),
            fixed: UnionFind::default(),
        };
        rules.node(GROUND);
        rules
    }

    fn node(&mut self, name: &str) -> usize {
        if let Some(&index) = self.lookup.get(name) {
            return index;
        }
        let index = self.names.len();
        self.names.push(name.to_string());
        self.lookup.insert(name.to_string(), index);
        self.connections.push(0);
        self.conducting.grow(index + 1);
        self.fixed.grow(index + 1);
        index
    }

    /// Make a node known without connecting anything to it.
    pub fn declare(&mut self, name: &str) {
        self.node(name);
    }

    /// Terminals that touch the nodes without a DC path between them
    /// (capacitors, current sources).
    pub fn connect(&mut self, nodes: &[String]) {
        for name in nodes {
            let index = self.node(name);
            self.connections[index] += 1;
        }
    }

    /// Terminals joined by a DC-conducting path.
    pub fn conduct(&mut self, nodes: &[String]) {
        self.connect(nodes);
        let indices: Vec<usize> = nodes.iter().map(|name| self.node(name)).collect();
        for pair in indices.windows(2) {
            self.conducting.union(pair[0], pair[1]);
        }
    }

    /// A branch that fixes the voltage between two nodes.
    pub fn fix_voltage(&mut self, entity: &str, pos: &str, neg: &str) -> Result<()> {
        if pos == neg {
            return Err(NodalError::ShortCircuit {
                entity: entity.to_string(),
                node: pos.to_string(),
            });
        }
        self.conduct(&[pos.to_string(), neg.to_string()]);
        let (a, b) = (self.node(pos), self.node(neg));
        if !self.fixed.union(a, b) {
            return Err(NodalError::VoltageLoop {
                entity: entity.to_string(),
                node_a: pos.to_string(),
                node_b: neg.to_string(),
            });
        }
        Ok(())
    }

    /// Check the collected facts.
    pub fn finish(mut self) -> Result<()> {
        let ground = self.conducting.find(0);
        for index in 1..self.names.len() {
            if self.connections[index] < 2 || self.conducting.find(index) != ground {
                return Err(NodalError::FloatingNode {
                    node: self.names[index].clone(),
                });
            }
        }
        debug!("validated {} nodes", self.names.len() - 1);
        Ok(())
    }
}

/// Validate a circuit for simulation.
pub fn validate_circuit(circuit: &Circuit) -> Result<()> {
    if circuit.is_empty() {
        return Err(NodalError::invalid_simulation("circuit has no entities"));
    }
    let mut rules = ValidationRules::new();
    let scope = Scope::root();
    for entity in circuit.iter() {
        entity.apply_rules(&mut rules, &scope)?;
    }
    rules.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(nodes: &[&str]) -> Vec<String> {
        nodes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_conducting_network_passes() {
        let mut rules = ValidationRules::new();
        rules.fix_voltage("V1", "in", "0").unwrap();
        rules.conduct(&names(&["in", "out"]));
        rules.conduct(&names(&["out", "0"]));
        rules.finish().unwrap();
    }

    #[test]
    fn test_capacitor_only_node_is_floating() {
        let mut rules = ValidationRules::new();
        rules.fix_voltage("V1", "in", "0").unwrap();
        rules.connect(&names(&["in", "mid"]));
        rules.connect(&names(&["mid", "0"]));
        let err = rules.finish().unwrap_err();
        assert_eq!(err, NodalError::FloatingNode { node: "mid".into() });
    }

    #[test]
    fn test_parallel_sources_form_a_loop() {
        let mut rules = ValidationRules::new();
        rules.fix_voltage("V1", "a", "0").unwrap();
        let err = rules.fix_voltage("V2", "0", "a").unwrap_err();
        assert!(matches!(err, NodalError::VoltageLoop { ref entity, .. } if entity == "V2"));
    }

    #[test]
    fn test_declared_node_needs_connections() {
        let mut rules = ValidationRules::new();
        rules.declare("out");
        rules.fix_voltage("V1", "in", "0").unwrap();
        rules.conduct(&names(&["in", "0"]));
        let err = rules.finish().unwrap_err();
        assert_eq!(err, NodalError::FloatingNode { node: "out".into() });
    }

    #[test]
    fn test_shorted_source() {
        let mut rules = ValidationRules::new();
        let err = rules.fix_voltage("V1", "a", "a").unwrap_err();
        assert_eq!(
            err,
            NodalError::ShortCircuit {
                entity: "V1".into(),
                node: "a".into()
            }
        );
    }
}
