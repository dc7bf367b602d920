//! Binding: turning entities into behaviors with resolved solver locations.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use log::trace;
use num_complex::Complex64;

use crate::algebra::SparseSolver;
use crate::behaviors::{BehaviorContainer, BehaviorGroup, ParallelFlags};
use crate::circuit::{Circuit, Entity, Scope, Variable, VariableKind, VariableSet};
use crate::error::{NodalError, Result};

use super::BiasingConfig;

/// Creates the behaviors of one entity.
pub type Factory =
    Box<dyn Fn(&dyn Entity, &mut BindingContext<'_>) -> Result<BehaviorContainer> + Send + Sync>;

/// Behavior factories keyed by concrete entity type.
#[derive(Default)]
pub struct FactoryTable {
    factories: HashMap<TypeId, Factory>,
}

impl std::fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryTable")
            .field("types", &self.factories.len())
            .finish()
    }
}

impl FactoryTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with every built-in component and the subcircuit entity.
    pub fn standard() -> Self {
        let mut table = Self::new();
        crate::components::register(&mut table);
        crate::subcircuit::register(&mut table);
        table
    }

    /// Register the factory for entities of type `E`, replacing any previous one.
    pub fn register<E: Entity>(
        &mut self,
        factory: fn(&E, &mut BindingContext<'_>) -> Result<BehaviorContainer>,
    ) {
        let wrapped: Factory = Box::new(move |entity: &dyn Entity, context: &mut BindingContext<'_>| {
            let concrete = entity.as_any().downcast_ref::<E>().ok_or_else(|| {
                NodalError::MissingFactory {
                    entity: entity.name().to_string(),
                }
            })?;
            factory(concrete, context)
        });
        self.factories.insert(TypeId::of::<E>(), wrapped);
    }

    pub fn contains<E: Entity>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<E>())
    }

    /// Create the behaviors of an entity.
    pub fn create(
        &self,
        entity: &dyn Entity,
        context: &mut BindingContext<'_>,
    ) -> Result<BehaviorContainer> {
        let factory = self
            .factories
            .get(&entity.as_any().type_id())
            .ok_or_else(|| NodalError::MissingFactory {
                entity: context.scope().entity(entity.name()),
            })?;
        factory(entity, context)
    }
}

/// Branch current variables by full entity path.
///
/// A branch is created by the entity that owns it, or earlier by a sibling
/// that refers to it (a controlled source sensing a voltage source). Every
/// referenced branch must have been claimed by its owner once binding is done.
#[derive(Debug, Clone, Default)]
pub struct BranchRegistry {
    branches: HashMap<String, Variable>,
    owners: HashSet<String>,
    bound: HashSet<String>,
}

impl BranchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The branch of an entity, if one was created.
    pub fn get(&self, path: &str) -> Option<&Variable> {
        self.branches.get(path)
    }

    fn lookup(&mut self, path: &str, variables: &mut VariableSet) -> Variable {
        self.branches
            .entry(path.to_string())
            .or_insert_with(|| variables.create(&format!("{path}#branch"), VariableKind::Current))
            .clone()
    }

    fn claim(&mut self, path: &str, variables: &mut VariableSet) -> Result<Variable> {
        if !self.owners.insert(path.to_string()) {
            return Err(NodalError::DuplicateEntity {
                name: path.to_string(),
            });
        }
        Ok(self.lookup(path, variables))
    }

    fn mark_bound(&mut self, path: String) {
        self.bound.insert(path);
    }

    /// Fail on a branch that was referred to but never created by its owner.
    ///
    /// An entity that was bound without a branch is reported as missing the
    /// behavior; a name nothing was bound under is reported as not found.
    pub fn check(&self) -> Result<()> {
        let mut dangling: Vec<&String> = self
            .branches
            .keys()
            .filter(|path| !self.owners.contains(*path))
            .collect();
        dangling.sort();
        match dangling.first() {
            Some(path) if self.bound.contains(*path) => Err(NodalError::MissingBehavior {
                entity: (*path).clone(),
                capability: "branch current".into(),
            }),
            Some(path) => Err(NodalError::EntityNotFound {
                name: (*path).clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Everything a factory needs to bind one entity.
///
/// The context resolves node names through its [`Scope`] into the variable
/// set it binds into and hands out the solvers to acquire handles from.
pub struct BindingContext<'a> {
    real: &'a mut SparseSolver<f64>,
    complex: &'a mut SparseSolver<Complex64>,
    variables: &'a mut VariableSet,
    branches: &'a mut BranchRegistry,
    factories: &'a FactoryTable,
    config: &'a BiasingConfig,
    scope: Scope,
}

impl<'a> BindingContext<'a> {
    pub fn new(
        real: &'a mut SparseSolver<f64>,
        complex: &'a mut SparseSolver<Complex64>,
        variables: &'a mut VariableSet,
        branches: &'a mut BranchRegistry,
        factories: &'a FactoryTable,
        config: &'a BiasingConfig,
    ) -> Self {
        Self {
            real,
            complex,
            variables,
            branches,
            factories,
            config,
            scope: Scope::root(),
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn config(&self) -> &'a BiasingConfig {
        self.config
    }

    pub fn factories(&self) -> &'a FactoryTable {
        self.factories
    }

    pub fn real(&mut self) -> &mut SparseSolver<f64> {
        self.real
    }

    pub fn complex(&mut self) -> &mut SparseSolver<Complex64> {
        self.complex
    }

    pub fn variables(&mut self) -> &mut VariableSet {
        self.variables
    }

    /// Solver index of a node, mapping it on first use.
    pub fn node(&mut self, name: &str) -> usize {
        let resolved = self.scope.node(name);
        self.variables
            .map_node(&resolved, VariableKind::Voltage)
            .index()
    }

    /// Solver indices of a list of nodes.
    pub fn nodes(&mut self, names: &[String]) -> Vec<usize> {
        names.iter().map(|name| self.node(name)).collect()
    }

    /// Create the branch current variable owned by `entity`.
    pub fn create_branch(&mut self, entity: &str) -> Result<usize> {
        let path = self.scope.entity(entity);
        Ok(self.branches.claim(&path, self.variables)?.index())
    }

    /// The branch current variable of a sibling entity, which may be bound later.
    pub fn branch_of(&mut self, entity: &str) -> usize {
        let path = self.scope.entity(entity);
        self.branches.lookup(&path, self.variables).index()
    }

    /// Create a private internal variable.
    pub fn create_internal(&mut self, entity: &str, suffix: &str) -> usize {
        let name = format!("{}#{suffix}", self.scope.entity(entity));
        self.variables.create(&name, VariableKind::Internal).index()
    }

    /// A context for a nested scope sharing this context's solvers and variables.
    pub fn child(&mut self, scope: Scope) -> BindingContext<'_> {
        BindingContext {
            real: &mut *self.real,
            complex: &mut *self.complex,
            variables: &mut *self.variables,
            branches: &mut *self.branches,
            factories: self.factories,
            config: self.config,
            scope,
        }
    }

    /// Create the behaviors of one entity.
    pub fn bind_entity(&mut self, entity: &dyn Entity) -> Result<BehaviorContainer> {
        let factories = self.factories;
        let container = factories.create(entity, self)?;
        let path = self.scope.entity(entity.name());
        trace!("bound '{path}' with {} behaviors", container.len());
        self.branches.mark_bound(path);
        Ok(container)
    }

    /// Bind every entity of a circuit, in order.
    pub fn bind_circuit(&mut self, circuit: &Circuit, flags: ParallelFlags) -> Result<BehaviorGroup> {
        let mut group = BehaviorGroup::new(flags);
        for entity in circuit.iter() {
            group.push(self.bind_entity(entity)?);
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Resistor;

    struct Parts {
        real: SparseSolver<f64>,
        complex: SparseSolver<Complex64>,
        variables: VariableSet,
        branches: BranchRegistry,
        config: BiasingConfig,
    }

    impl Parts {
        fn new() -> Self {
            Self {
                real: SparseSolver::new(),
                complex: SparseSolver::new(),
                variables: VariableSet::new(),
                branches: BranchRegistry::new(),
                config: BiasingConfig::default(),
            }
        }

        fn context<'a>(&'a mut self, factories: &'a FactoryTable) -> BindingContext<'a> {
            BindingContext::new(
                &mut self.real,
                &mut self.complex,
                &mut self.variables,
                &mut self.branches,
                factories,
                &self.config,
            )
        }
    }

    #[test]
    fn test_missing_factory() {
        let factories = FactoryTable::new();
        let mut parts = Parts::new();
        let mut context = parts.context(&factories);
        let err = context
            .bind_entity(&Resistor::new("R1", "a", "0", 1.0))
            .unwrap_err();
        assert_eq!(err, NodalError::MissingFactory { entity: "R1".into() });
    }

    #[test]
    fn test_sibling_branch_resolves_before_owner() {
        let factories = FactoryTable::new();
        let mut parts = Parts::new();
        let mut context = parts.context(&factories);
        let sensed = context.branch_of("V1");
        let owned = context.create_branch("V1").unwrap();
        assert_eq!(sensed, owned);
        assert!(context.create_branch("V1").is_err());
        parts.branches.check().unwrap();
    }

    #[test]
    fn test_dangling_branch_reference() {
        let factories = FactoryTable::new();
        let mut parts = Parts::new();
        let mut context = parts.context(&factories);
        context.branch_of("Vmissing");
        let err = parts.branches.check().unwrap_err();
        assert_eq!(err, NodalError::EntityNotFound { name: "Vmissing".into() });
    }

    #[test]
    fn test_child_scope_prefixes_names() {
        let factories = FactoryTable::new();
        let mut parts = Parts::new();
        let mut context = parts.context(&factories);
        let outer = context.node("in");
        let scope = Scope::root().flat("X1", &["a".to_string()], &["in".to_string()]);
        let mut child = context.child(scope);
        assert_eq!(child.node("a"), outer);
        let inner = child.node("b");
        let internal = child.create_internal("R1", "x");
        assert_ne!(inner, outer);
        assert_eq!(parts.variables.get("X1/b").map(Variable::index), Some(inner));
        assert_eq!(parts.variables.at(internal).map(Variable::kind), Some(VariableKind::Internal));
        assert!(parts.variables.get("X1/R1#x").is_none());
    }

    #[test]
    fn test_standard_table_knows_components() {
        let factories = FactoryTable::standard();
        assert!(factories.contains::<Resistor>());
        assert!(factories.contains::<crate::subcircuit::Subcircuit>());
    }
}
