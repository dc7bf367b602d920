//! Solver variables and the per-scope variable set.

use std::collections::HashMap;
use std::fmt;

/// What a variable represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    /// A node voltage.
    Voltage,
    /// A branch current (voltage sources, inductors).
    Current,
    /// Any other unknown owned by a behavior.
    Internal,
}

/// A named unknown with its solver index.
///
/// Index 0 is the ground reference and is never part of the solved system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    name: String,
    kind: VariableKind,
    index: usize,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    /// The 1-based external solver index, 0 for ground.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_ground(&self) -> bool {
        self.index == 0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.index)
    }
}

/// Name of the ground node after alias resolution.
pub const GROUND: &str = "0";

/// Whether a node name refers to the ground reference.
pub fn is_ground_name(name: &str) -> bool {
    name == GROUND || name.eq_ignore_ascii_case("gnd")
}

/// All variables of one scope (the whole circuit, or a locally solved subcircuit).
#[derive(Debug, Clone)]
pub struct VariableSet {
    ground: Variable,
    variables: Vec<Variable>,
    lookup: HashMap<String, usize>,
}

impl Default for VariableSet {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableSet {
    pub fn new() -> Self {
        Self {
            ground: Variable {
                name: GROUND.to_string(),
                kind: VariableKind::Voltage,
                index: 0,
            },
            variables: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Number of variables, excluding ground.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// The shared ground variable.
    pub fn ground(&self) -> &Variable {
        &self.ground
    }

    /// Return the variable with this name, creating it if it does not exist yet.
    ///
    /// Ground aliases always resolve to the ground variable.
    pub fn map_node(&mut self, name: &str, kind: VariableKind) -> Variable {
        if is_ground_name(name) {
            return self.ground.clone();
        }
        if let Some(&position) = self.lookup.get(name) {
            return self.variables[position].clone();
        }
        let variable = self.push(name, kind);
        self.lookup.insert(name.to_string(), variable.index - 1);
        variable
    }

    /// Create a new variable that is never returned by [`Self::map_node`].
    ///
    /// The name is only informative; several private variables may share it.
    pub fn create(&mut self, name: &str, kind: VariableKind) -> Variable {
        self.push(name, kind)
    }

    fn push(&mut self, name: &str, kind: VariableKind) -> Variable {
        let variable = Variable {
            name: name.to_string(),
            kind,
            index: self.variables.len() + 1,
        };
        self.variables.push(variable.clone());
        variable
    }

    /// Look up a mapped node by name.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        if is_ground_name(name) {
            return Some(&self.ground);
        }
        self.lookup.get(name).map(|&position| &self.variables[position])
    }

    /// The variable at a solver index.
    pub fn at(&self, index: usize) -> Option<&Variable> {
        match index {
            0 => Some(&self.ground),
            i => self.variables.get(i - 1),
        }
    }

    /// All variables in index order, excluding ground.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }
}
