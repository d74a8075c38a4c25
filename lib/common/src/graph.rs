use crate::error::{EvaluationError, GraphError};
use crate::ExecutionContext;
use async_trait::async_trait;
use futures::future::ready;
use futures::stream::{self, BoxStream, StreamExt};
use sparflow_model::pattern::unify_triple;
use sparflow_model::{Bindings, Triple, TriplePattern, Variable};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// A lazy sequence of solution mappings.
pub type BindingsStream = BoxStream<'static, Result<Bindings, EvaluationError>>;

/// A lazy sequence of triples.
pub type TripleStream = BoxStream<'static, Result<Triple, EvaluationError>>;

/// A lazy sequence of full-text-search matches.
pub type FullTextStream = BoxStream<'static, Result<FullTextMatch, EvaluationError>>;

/// One full-text-search result row.
#[derive(Debug, Clone)]
pub struct FullTextMatch {
    /// The matched triple.
    pub triple: Triple,
    /// Relevance score of the match.
    pub score: f64,
    /// Rank of the match, starting at 0 for the most relevant one.
    pub rank: usize,
}

/// Parameters of a full-text search against a graph backend.
#[derive(Debug, Clone, Default)]
pub struct FullTextSearchParams {
    /// The keywords to search for.
    pub keywords: Vec<String>,
    /// Requires all keywords to match instead of any.
    pub match_all: bool,
    /// Lower bound (inclusive) on relevance scores.
    pub min_score: Option<f64>,
    /// Upper bound (inclusive) on relevance scores.
    pub max_score: Option<f64>,
    /// Lower bound (inclusive) on ranks.
    pub min_rank: Option<usize>,
    /// Upper bound (inclusive) on ranks.
    pub max_rank: Option<usize>,
}

/// The set of optional bulk operations a [`Graph`] backend advertises.
///
/// Capabilities form a small bitset. The [`UNION`](Self::UNION) bit opts the
/// backend into the bound-join strategy.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCapabilities(u8);

impl GraphCapabilities {
    /// No optional operation is supported.
    pub const NONE: Self = Self(0);
    /// The backend supports bulk evaluation of a union of BGPs, which enables
    /// bound joins.
    pub const UNION: Self = Self(1);
    /// The backend produces meaningful cardinality estimates.
    pub const ESTIMATE_CARDINALITY: Self = Self(1 << 1);
    /// The backend supports full-text search.
    pub const FULL_TEXT_SEARCH: Self = Self(1 << 2);

    /// Checks whether all capabilities of `other` are present.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The capabilities present in both sets.
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl BitOr for GraphCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for GraphCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.contains(Self::UNION) {
            set.entry(&"UNION");
        }
        if self.contains(Self::ESTIMATE_CARDINALITY) {
            set.entry(&"ESTIMATE_CARDINALITY");
        }
        if self.contains(Self::FULL_TEXT_SEARCH) {
            set.entry(&"FULL_TEXT_SEARCH");
        }
        set.finish()
    }
}

/// The contract between the engine and a dataset backend.
///
/// A backend must resolve triple patterns via [`find`](Self::find) and accept
/// writes. Everything else is optional: the engine falls back to generic
/// strategies for BGP evaluation, and [`capabilities`](Self::capabilities)
/// advertises what the backend can do better.
///
/// Streams returned by a backend must own their data: they outlive the borrow
/// of `self`, so implementations typically capture a snapshot behind an
/// [`Arc`].
#[async_trait]
pub trait Graph: Send + Sync {
    /// The optional operations this backend supports.
    fn capabilities(&self) -> GraphCapabilities {
        GraphCapabilities::NONE
    }

    /// Returns all triples matching `pattern`. Variables act as wildcards.
    fn find(&self, pattern: &TriplePattern, ctx: &ExecutionContext) -> TripleStream;

    /// Inserts a triple. Returns `false` when the triple was already present.
    async fn insert(&self, triple: &Triple) -> Result<bool, GraphError>;

    /// Removes a triple. Returns `false` when the triple was not present.
    async fn remove(&self, triple: &Triple) -> Result<bool, GraphError>;

    /// Removes all triples.
    async fn clear(&self) -> Result<(), GraphError>;

    /// Estimates how many triples match `pattern`.
    ///
    /// Estimation failures are non-fatal: callers fall back to the textual
    /// pattern order.
    async fn estimate_cardinality(&self, pattern: &TriplePattern) -> Result<usize, GraphError> {
        let _ = pattern;
        Err(GraphError::Unsupported("cardinality estimation"))
    }

    /// Backend-specific bulk evaluation of a BGP.
    ///
    /// Returning `None` selects the engine's default strategy: iterate the
    /// leftmost pattern via [`find`](Self::find), substitute each match into
    /// the remaining patterns and recurse.
    fn eval_bgp(
        &self,
        patterns: &[TriplePattern],
        ctx: &ExecutionContext,
    ) -> Option<BindingsStream> {
        let _ = (patterns, ctx);
        None
    }

    /// Backend-specific bulk evaluation of a union of BGPs.
    ///
    /// Returning `None` selects the default: a merge of
    /// [`eval_bgp`](Self::eval_bgp) over each BGP.
    fn eval_union(
        &self,
        bgps: &[Vec<TriplePattern>],
        ctx: &ExecutionContext,
    ) -> Option<BindingsStream> {
        let _ = (bgps, ctx);
        None
    }

    /// Searches literals matching `pattern` for the given keywords.
    ///
    /// `variable` names the position of `pattern` the search applies to. Rows
    /// are emitted by decreasing relevance.
    fn full_text_search(
        &self,
        pattern: &TriplePattern,
        variable: &Variable,
        params: &FullTextSearchParams,
        ctx: &ExecutionContext,
    ) -> Result<FullTextStream, GraphError> {
        let _ = (pattern, variable, params, ctx);
        Err(GraphError::Unsupported("full-text search"))
    }
}

/// Evaluates a BGP against `graph`, preferring the backend's bulk
/// implementation over the default strategy.
pub fn eval_bgp(
    graph: &Arc<dyn Graph>,
    patterns: &[TriplePattern],
    ctx: &ExecutionContext,
) -> BindingsStream {
    match graph.eval_bgp(patterns, ctx) {
        Some(stream) => stream,
        None => default_eval_bgp(Arc::clone(graph), patterns.to_vec(), ctx.clone()),
    }
}

/// Evaluates a union of BGPs against `graph`, preferring the backend's bulk
/// implementation over a merge of per-BGP evaluations.
pub fn eval_union(
    graph: &Arc<dyn Graph>,
    bgps: &[Vec<TriplePattern>],
    ctx: &ExecutionContext,
) -> BindingsStream {
    match graph.eval_union(bgps, ctx) {
        Some(stream) => stream,
        None => stream::select_all(bgps.iter().map(|bgp| eval_bgp(graph, bgp, ctx))).boxed(),
    }
}

/// The default BGP evaluation strategy: index nested loops over
/// [`Graph::find`].
fn default_eval_bgp(
    graph: Arc<dyn Graph>,
    patterns: Vec<TriplePattern>,
    ctx: ExecutionContext,
) -> BindingsStream {
    let Some((first, rest)) = patterns.split_first() else {
        return stream::once(ready(Ok(Bindings::new()))).boxed();
    };

    let first = first.clone();
    let rest = rest.to_vec();
    let matches = graph.find(&first, &ctx);
    matches
        .map(move |triple| {
            let triple = match triple {
                Ok(triple) => triple,
                Err(e) => return stream::once(ready(Err(e))).boxed(),
            };
            let Some(solution) = unify_triple(&first, &triple) else {
                return stream::empty().boxed();
            };
            if rest.is_empty() {
                return stream::once(ready(Ok(solution))).boxed();
            }

            let bound_rest = rest.iter().map(|p| solution.bound(p)).collect::<Vec<_>>();
            default_eval_bgp(Arc::clone(&graph), bound_rest, ctx.clone())
                .map(move |nested| nested.map(|nested| solution.union(&nested)))
                .boxed()
        })
        .flatten()
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_bitset() {
        let caps = GraphCapabilities::UNION | GraphCapabilities::FULL_TEXT_SEARCH;
        assert!(caps.contains(GraphCapabilities::UNION));
        assert!(caps.contains(GraphCapabilities::NONE));
        assert!(!caps.contains(GraphCapabilities::ESTIMATE_CARDINALITY));
        assert_eq!(
            caps.intersection(GraphCapabilities::UNION),
            GraphCapabilities::UNION
        );
    }
}
