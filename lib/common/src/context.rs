use crate::BgpCache;
use rustc_hash::FxHashMap;
use sparflow_model::vocab::hints;
use sparflow_model::{GraphName, NamedNode, Term};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Options controlling the evaluation of a single query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Always uses the index-nested-loop join for BGPs, even against backends
    /// that advertise bulk union evaluation.
    pub force_index_join: bool,
    /// Creates missing named graphs through the dataset factory when a graph
    /// variable resolves to an unknown graph.
    pub auto_create_graphs: bool,
}

/// The per-query evaluation context.
///
/// A context is assembled once during planning (active graphs, slice flag,
/// cache pointer) and then shared by all stages of the query. The only part
/// that stays writable during evaluation is the hint map, which BGP
/// preprocessing fills from magic triples.
#[derive(Clone)]
pub struct ExecutionContext {
    default_graphs: Vec<GraphName>,
    named_graphs: Option<Vec<NamedNode>>,
    hints: Arc<RwLock<FxHashMap<NamedNode, Term>>>,
    options: QueryOptions,
    has_slice: bool,
    cache: Option<Arc<dyn BgpCache>>,
}

impl ExecutionContext {
    /// Creates a context evaluating against the plain default graph.
    pub fn new(options: QueryOptions) -> Self {
        Self {
            default_graphs: vec![GraphName::DefaultGraph],
            named_graphs: None,
            hints: Arc::new(RwLock::new(FxHashMap::default())),
            options,
            has_slice: false,
            cache: None,
        }
    }

    /// Replaces the active default graphs (the `FROM` clauses).
    #[must_use]
    pub fn with_default_graphs(mut self, graphs: Vec<GraphName>) -> Self {
        self.default_graphs = graphs;
        self
    }

    /// Restricts the named graphs available to `GRAPH` patterns (the
    /// `FROM NAMED` clauses).
    #[must_use]
    pub fn with_named_graphs(mut self, graphs: Option<Vec<NamedNode>>) -> Self {
        self.named_graphs = graphs;
        self
    }

    /// Records whether the query carries a `LIMIT` or `OFFSET` modifier.
    #[must_use]
    pub fn with_slice(mut self, has_slice: bool) -> Self {
        self.has_slice = has_slice;
        self
    }

    /// Attaches the semantic cache queries should go through.
    #[must_use]
    pub fn with_cache(mut self, cache: Option<Arc<dyn BgpCache>>) -> Self {
        self.cache = cache;
        self
    }

    /// The active default graphs.
    pub fn default_graphs(&self) -> &[GraphName] {
        &self.default_graphs
    }

    /// The named graphs available to `GRAPH` patterns, or `None` when
    /// unrestricted.
    pub fn named_graphs(&self) -> Option<&[NamedNode]> {
        self.named_graphs.as_deref()
    }

    /// Whether the query carries a `LIMIT` or `OFFSET` modifier.
    ///
    /// A sliced query must not read or write the semantic cache: a partial
    /// result set would poison it.
    pub fn has_slice(&self) -> bool {
        self.has_slice
    }

    /// The semantic cache of this query, unless disabled or suppressed by a
    /// slice.
    pub fn cache(&self) -> Option<&Arc<dyn BgpCache>> {
        if self.has_slice {
            return None;
        }
        self.cache.as_ref()
    }

    /// The evaluation options.
    pub fn options(&self) -> QueryOptions {
        self.options
    }

    /// Whether the bound-join strategy is disabled for this query, either by
    /// option or by hint.
    pub fn force_index_join(&self) -> bool {
        self.options.force_index_join
            || self.hint(&hints::FORCE_INDEX_JOIN.into_owned()).is_some()
    }

    /// Merges a hint extracted from a magic triple into the context.
    pub fn record_hint(&self, predicate: NamedNode, value: Term) {
        if let Ok(mut hints) = self.hints.write() {
            hints.insert(predicate, value);
        }
    }

    /// Looks up a hint by its predicate.
    pub fn hint(&self, predicate: &NamedNode) -> Option<Term> {
        self.hints.read().ok()?.get(predicate).cloned()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(QueryOptions::default())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("default_graphs", &self.default_graphs)
            .field("named_graphs", &self.named_graphs)
            .field("options", &self.options)
            .field("has_slice", &self.has_slice)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_suppresses_cache_access() {
        let ctx = ExecutionContext::default().with_slice(true);
        assert!(ctx.cache().is_none());
    }

    #[test]
    fn hints_are_shared_across_clones() {
        let ctx = ExecutionContext::default();
        let clone = ctx.clone();
        clone.record_hint(
            hints::FORCE_INDEX_JOIN.into_owned(),
            Term::NamedNode(NamedNode::new_unchecked("http://example.com/true")),
        );
        assert!(ctx.force_index_join());
    }
}
