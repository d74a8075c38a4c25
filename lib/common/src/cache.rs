use async_trait::async_trait;
use sparflow_model::{Bindings, GraphName, TriplePattern};
use std::sync::atomic::{AtomicU64, Ordering};

/// The canonical cache key of a basic graph pattern.
///
/// Patterns are sorted by their textual form, so two BGPs listing the same
/// patterns in different order are equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBgp {
    patterns: Vec<TriplePattern>,
    graph: GraphName,
}

impl CanonicalBgp {
    /// Builds the canonical key of the given patterns against `graph`.
    pub fn new(patterns: impl IntoIterator<Item = TriplePattern>, graph: GraphName) -> Self {
        let mut patterns: Vec<_> = patterns.into_iter().collect();
        patterns.sort_by_cached_key(ToString::to_string);
        patterns.dedup();
        Self { patterns, graph }
    }

    /// The sorted triple patterns of this BGP.
    pub fn patterns(&self) -> &[TriplePattern] {
        &self.patterns
    }

    /// The graph this BGP is evaluated against.
    pub fn graph(&self) -> &GraphName {
        &self.graph
    }

    /// Checks whether this BGP covers a subset of the patterns of `other`
    /// against the same graph.
    pub fn is_subset_of(&self, other: &CanonicalBgp) -> bool {
        self.graph == other.graph
            && self
                .patterns
                .iter()
                .all(|pattern| other.patterns.contains(pattern))
    }

    /// The patterns of `other` that this BGP does not cover.
    pub fn missing_from<'a>(&self, other: &'a CanonicalBgp) -> Vec<TriplePattern> {
        other
            .patterns
            .iter()
            .filter(|pattern| !self.patterns.contains(pattern))
            .cloned()
            .collect()
    }
}

/// Identifies one producer writing into the semantic cache.
///
/// Several queries may evaluate the same BGP concurrently. Each evaluation
/// stages its rows under its own writer id; the first writer to commit wins
/// and the others' staged rows are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriterId(u64);

impl WriterId {
    /// Allocates a process-unique writer id.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A semantic cache of BGP result sets.
///
/// The cache guarantees at most one committed entry per key. Writers stage
/// rows with [`update`](Self::update) and publish them atomically with
/// [`commit`](Self::commit); only the first committer of a key wins. Readers
/// either hit a committed entry, await a commit in progress, or get `None`
/// for keys no writer has touched.
#[async_trait]
pub trait BgpCache: Send + Sync {
    /// Stages one solution for `bgp` under the given writer.
    ///
    /// Calls for already-committed keys are dropped.
    async fn update(&self, bgp: &CanonicalBgp, solution: Bindings, writer: WriterId);

    /// Atomically installs the writer's staged rows as the canonical entry.
    ///
    /// Only the first committer wins; later commits are silently discarded.
    async fn commit(&self, bgp: &CanonicalBgp, writer: WriterId);

    /// Discards the writer's staged rows without committing.
    ///
    /// Called when an evaluation is cancelled mid-stream.
    async fn abandon(&self, bgp: &CanonicalBgp, writer: WriterId);

    /// Returns the committed entry for `bgp`.
    ///
    /// Resolves once some writer commits when staging is in progress, and
    /// immediately with `None` when no writer has touched the key.
    async fn get(&self, bgp: &CanonicalBgp) -> Option<Vec<Bindings>>;

    /// Checks whether a committed entry exists for `bgp`.
    async fn has(&self, bgp: &CanonicalBgp) -> bool;

    /// The number of committed entries.
    async fn count(&self) -> usize;

    /// Removes the entry for `bgp`, committed or not.
    async fn delete(&self, bgp: &CanonicalBgp);

    /// Finds the largest committed BGP whose patterns are a subset of `bgp`'s
    /// against the same graph.
    ///
    /// Returns the matched key together with the patterns of `bgp` it does
    /// not cover. Ties are broken by result cardinality, then by insertion
    /// order.
    async fn find_subset(
        &self,
        bgp: &CanonicalBgp,
    ) -> Option<(CanonicalBgp, Vec<TriplePattern>)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparflow_model::{NamedNode, Variable};
    use spargebra::term::{NamedNodePattern, TermPattern};

    fn pattern(p: &str) -> TriplePattern {
        TriplePattern {
            subject: TermPattern::Variable(Variable::new_unchecked("s")),
            predicate: NamedNodePattern::NamedNode(NamedNode::new_unchecked(format!(
                "http://example.com/{p}"
            ))),
            object: TermPattern::Variable(Variable::new_unchecked("o")),
        }
    }

    #[test]
    fn key_is_order_insensitive() {
        let first = CanonicalBgp::new([pattern("a"), pattern("b")], GraphName::DefaultGraph);
        let second = CanonicalBgp::new([pattern("b"), pattern("a")], GraphName::DefaultGraph);
        assert_eq!(first, second);
    }

    #[test]
    fn subset_requires_same_graph() {
        let small = CanonicalBgp::new([pattern("a")], GraphName::DefaultGraph);
        let big = CanonicalBgp::new([pattern("a"), pattern("b")], GraphName::DefaultGraph);
        let other_graph = CanonicalBgp::new(
            [pattern("a"), pattern("b")],
            NamedNode::new_unchecked("http://example.com/g").into(),
        );

        assert!(small.is_subset_of(&big));
        assert!(!big.is_subset_of(&small));
        assert!(!small.is_subset_of(&other_graph));
        assert_eq!(small.missing_from(&big), vec![pattern("b")]);
    }
}
