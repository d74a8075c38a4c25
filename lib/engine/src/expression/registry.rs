use rustc_hash::FxHashMap;
use sparflow_model::{NamedNode, Term};
use std::sync::Arc;

/// A user-supplied function: receives the evaluated arguments and returns a
/// term, or `None` to signal failure.
pub type CustomFunction = Arc<dyn Fn(&[Term]) -> Option<Term> + Send + Sync>;

/// Registry of user-supplied functions and aggregates, resolved by IRI.
///
/// Resolution order during compilation is custom aggregates first, then
/// custom functions, then built-ins; an IRI matching none of them fails the
/// compilation with an unknown-function error.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<NamedNode, CustomFunction>,
    aggregates: FxHashMap<NamedNode, CustomFunction>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a scalar function under `name`.
    pub fn register_function(
        &mut self,
        name: NamedNode,
        function: impl Fn(&[Term]) -> Option<Term> + Send + Sync + 'static,
    ) {
        self.functions.insert(name, Arc::new(function));
    }

    /// Registers an aggregate under `name`. The function receives the
    /// collected terms of one group.
    pub fn register_aggregate(
        &mut self,
        name: NamedNode,
        aggregate: impl Fn(&[Term]) -> Option<Term> + Send + Sync + 'static,
    ) {
        self.aggregates.insert(name, Arc::new(aggregate));
    }

    /// Looks up a scalar function.
    pub fn function(&self, name: &NamedNode) -> Option<&CustomFunction> {
        self.functions.get(name)
    }

    /// Looks up an aggregate.
    pub fn aggregate(&self, name: &NamedNode) -> Option<&CustomFunction> {
        self.aggregates.get(name)
    }
}
