use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rustc_hash::{FxHashMap, FxHashSet};
use sparflow_common::{
    ExecutionContext, FullTextMatch, FullTextSearchParams, FullTextStream, Graph,
    GraphCapabilities, GraphError, TripleStream,
};
use sparflow_model::pattern::matches_triple;
use sparflow_model::{NamedNode, Subject, Term, Triple, TriplePattern, Variable};
use spargebra::term::TermPattern;
use std::cmp::Ordering;
use std::sync::{Arc, PoisonError, RwLock};

/// An in-memory [`Graph`] holding triples in three hash indexes.
///
/// The graph advertises [`GraphCapabilities::UNION`], so the engine evaluates
/// batched BGPs against it with the bound-join strategy. Reads snapshot the
/// matching triples under a read lock, so streams handed out by this backend
/// do not observe later writes.
#[derive(Clone, Default)]
pub struct MemoryGraph {
    inner: Arc<RwLock<Indexes>>,
}

#[derive(Default)]
struct Indexes {
    triples: FxHashSet<Triple>,
    by_subject: FxHashMap<Subject, FxHashSet<Triple>>,
    by_predicate: FxHashMap<NamedNode, FxHashSet<Triple>>,
    by_object: FxHashMap<Term, FxHashSet<Triple>>,
}

impl Indexes {
    fn insert(&mut self, triple: Triple) -> bool {
        if !self.triples.insert(triple.clone()) {
            return false;
        }
        self.by_subject
            .entry(triple.subject.clone())
            .or_default()
            .insert(triple.clone());
        self.by_predicate
            .entry(triple.predicate.clone())
            .or_default()
            .insert(triple.clone());
        self.by_object
            .entry(triple.object.clone())
            .or_default()
            .insert(triple);
        true
    }

    fn remove(&mut self, triple: &Triple) -> bool {
        if !self.triples.remove(triple) {
            return false;
        }
        if let Some(set) = self.by_subject.get_mut(&triple.subject) {
            set.remove(triple);
        }
        if let Some(set) = self.by_predicate.get_mut(&triple.predicate) {
            set.remove(triple);
        }
        if let Some(set) = self.by_object.get_mut(&triple.object) {
            set.remove(triple);
        }
        true
    }

    /// Picks the most selective index for `pattern` and filters its
    /// candidates.
    fn find(&self, pattern: &TriplePattern) -> Vec<Triple> {
        let candidates: Option<&FxHashSet<Triple>> = match (&pattern.subject, &pattern.object) {
            (TermPattern::NamedNode(s), _) => {
                return self.filter_candidates(
                    self.by_subject.get(&Subject::NamedNode(s.clone())),
                    pattern,
                )
            }
            (TermPattern::BlankNode(s), _) => {
                return self.filter_candidates(
                    self.by_subject.get(&Subject::BlankNode(s.clone())),
                    pattern,
                )
            }
            // A literal can never be a subject.
            (TermPattern::Literal(_), _) => return Vec::new(),
            (TermPattern::Variable(_), TermPattern::NamedNode(o)) => {
                self.by_object.get(&Term::NamedNode(o.clone()))
            }
            (TermPattern::Variable(_), TermPattern::BlankNode(o)) => {
                self.by_object.get(&Term::BlankNode(o.clone()))
            }
            (TermPattern::Variable(_), TermPattern::Literal(o)) => {
                self.by_object.get(&Term::Literal(o.clone()))
            }
            (TermPattern::Variable(_), TermPattern::Variable(_)) => match &pattern.predicate {
                spargebra::term::NamedNodePattern::NamedNode(p) => self.by_predicate.get(p),
                spargebra::term::NamedNodePattern::Variable(_) => Some(&self.triples),
            },
        };
        self.filter_candidates(candidates, pattern)
    }

    fn filter_candidates(
        &self,
        candidates: Option<&FxHashSet<Triple>>,
        pattern: &TriplePattern,
    ) -> Vec<Triple> {
        candidates
            .map(|set| {
                set.iter()
                    .filter(|triple| matches_triple(pattern, triple))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn estimate(&self, pattern: &TriplePattern) -> usize {
        let mut estimate = self.triples.len();
        match &pattern.subject {
            TermPattern::NamedNode(s) => {
                estimate = estimate.min(
                    self.by_subject
                        .get(&Subject::NamedNode(s.clone()))
                        .map_or(0, FxHashSet::len),
                );
            }
            TermPattern::BlankNode(s) => {
                estimate = estimate.min(
                    self.by_subject
                        .get(&Subject::BlankNode(s.clone()))
                        .map_or(0, FxHashSet::len),
                );
            }
            TermPattern::Literal(_) => return 0,
            TermPattern::Variable(_) => {}
        }
        if let spargebra::term::NamedNodePattern::NamedNode(p) = &pattern.predicate {
            estimate = estimate.min(self.by_predicate.get(p).map_or(0, FxHashSet::len));
        }
        match &pattern.object {
            TermPattern::Variable(_) => {}
            TermPattern::NamedNode(o) => {
                estimate = estimate
                    .min(self.by_object.get(&Term::NamedNode(o.clone())).map_or(0, FxHashSet::len));
            }
            TermPattern::BlankNode(o) => {
                estimate = estimate
                    .min(self.by_object.get(&Term::BlankNode(o.clone())).map_or(0, FxHashSet::len));
            }
            TermPattern::Literal(o) => {
                estimate = estimate
                    .min(self.by_object.get(&Term::Literal(o.clone())).map_or(0, FxHashSet::len));
            }
        }
        estimate
    }
}

impl MemoryGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a graph holding the given triples.
    pub fn from_triples(triples: impl IntoIterator<Item = Triple>) -> Self {
        let graph = Self::new();
        {
            let mut inner = graph.write();
            for triple in triples {
                inner.insert(triple);
            }
        }
        graph
    }

    /// The number of triples in the graph.
    pub fn len(&self) -> usize {
        self.read().triples.len()
    }

    /// Checks whether the graph holds no triples.
    pub fn is_empty(&self) -> bool {
        self.read().triples.is_empty()
    }

    /// A snapshot of all triples.
    pub fn triples(&self) -> Vec<Triple> {
        self.read().triples.iter().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Indexes> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Indexes> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Graph for MemoryGraph {
    fn capabilities(&self) -> GraphCapabilities {
        GraphCapabilities::UNION
            | GraphCapabilities::ESTIMATE_CARDINALITY
            | GraphCapabilities::FULL_TEXT_SEARCH
    }

    fn find(&self, pattern: &TriplePattern, _ctx: &ExecutionContext) -> TripleStream {
        let matches = self.read().find(pattern);
        stream::iter(matches.into_iter().map(Ok)).boxed()
    }

    async fn insert(&self, triple: &Triple) -> Result<bool, GraphError> {
        Ok(self.write().insert(triple.clone()))
    }

    async fn remove(&self, triple: &Triple) -> Result<bool, GraphError> {
        Ok(self.write().remove(triple))
    }

    async fn clear(&self) -> Result<(), GraphError> {
        *self.write() = Indexes::default();
        Ok(())
    }

    async fn estimate_cardinality(&self, pattern: &TriplePattern) -> Result<usize, GraphError> {
        Ok(self.read().estimate(pattern))
    }

    fn full_text_search(
        &self,
        pattern: &TriplePattern,
        variable: &Variable,
        params: &FullTextSearchParams,
        _ctx: &ExecutionContext,
    ) -> Result<FullTextStream, GraphError> {
        let keywords = params
            .keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect::<Vec<_>>();
        if keywords.is_empty() {
            return Ok(stream::empty().boxed());
        }

        let mut scored = Vec::new();
        for triple in self.read().find(pattern) {
            let Some(text) = searched_text(pattern, variable, &triple) else {
                continue;
            };
            let text = text.to_lowercase();
            let matched = keywords.iter().filter(|k| text.contains(k.as_str())).count();
            if matched == 0 || (params.match_all && matched < keywords.len()) {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let score = matched as f64 / keywords.len() as f64;
            scored.push((triple, score));
        }

        // Most relevant matches first; rank follows that order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let params = params.clone();
        let results = scored
            .into_iter()
            .enumerate()
            .map(|(rank, (triple, score))| FullTextMatch { triple, score, rank })
            .filter(move |m| {
                params.min_score.map_or(true, |min| m.score >= min)
                    && params.max_score.map_or(true, |max| m.score <= max)
                    && params.min_rank.map_or(true, |min| m.rank >= min)
                    && params.max_rank.map_or(true, |max| m.rank <= max)
            })
            .map(Ok)
            .collect::<Vec<_>>();
        Ok(stream::iter(results).boxed())
    }
}

/// The lexical form the search applies to: the term filling the position of
/// the query variable in `pattern`. Only literals are searchable.
fn searched_text(pattern: &TriplePattern, variable: &Variable, triple: &Triple) -> Option<String> {
    let term = if pattern.subject == TermPattern::Variable(variable.clone()) {
        Term::from(triple.subject.clone())
    } else if pattern.predicate == spargebra::term::NamedNodePattern::Variable(variable.clone()) {
        Term::from(triple.predicate.clone())
    } else if pattern.object == TermPattern::Variable(variable.clone()) {
        triple.object.clone()
    } else {
        return None;
    };
    match term {
        Term::Literal(literal) => Some(literal.value().to_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spargebra::term::NamedNodePattern;

    fn node(value: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{value}"))
    }

    fn triple(s: &str, p: &str, o: &str) -> Triple {
        Triple::new(node(s), node(p), node(o))
    }

    fn any() -> TriplePattern {
        TriplePattern {
            subject: TermPattern::Variable(Variable::new_unchecked("s")),
            predicate: NamedNodePattern::Variable(Variable::new_unchecked("p")),
            object: TermPattern::Variable(Variable::new_unchecked("o")),
        }
    }

    #[test]
    fn find_uses_subject_index() {
        let graph = MemoryGraph::from_triples([
            triple("a", "p", "b"),
            triple("a", "p", "c"),
            triple("x", "p", "y"),
        ]);

        let pattern = TriplePattern {
            subject: TermPattern::NamedNode(node("a")),
            ..any()
        };
        assert_eq!(graph.read().find(&pattern).len(), 2);
    }

    #[test]
    fn literal_subject_matches_nothing() {
        let graph = MemoryGraph::from_triples([triple("a", "p", "b")]);
        let pattern = TriplePattern {
            subject: TermPattern::Literal(sparflow_model::Literal::new_simple_literal("a")),
            ..any()
        };
        assert!(graph.read().find(&pattern).is_empty());
        assert_eq!(graph.read().estimate(&pattern), 0);
    }

    #[test]
    fn estimates_are_exact_per_position() {
        let graph = MemoryGraph::from_triples([
            triple("a", "p", "b"),
            triple("a", "q", "c"),
            triple("x", "p", "y"),
        ]);

        let by_predicate = TriplePattern {
            predicate: NamedNodePattern::NamedNode(node("p")),
            ..any()
        };
        assert_eq!(graph.read().estimate(&by_predicate), 2);
        assert_eq!(graph.read().estimate(&any()), 3);
    }
}
