use oxrdf::{Literal, Term, TermRef, Variable};
use rustc_hash::{FxHashMap, FxHashSet};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use std::fmt;
use std::fmt::Write;

/// Lexical form of the sentinel bound to a variable when expression evaluation
/// fails inside `BIND`.
const UNBOUND_LEXICAL: &str = "UNBOUND";

/// Returns the sentinel term bound to a variable when expression evaluation
/// fails inside `BIND`.
///
/// The sentinel is distinct from the variable being absent from the domain of
/// a [`Bindings`]: a failed `BIND` still produces a binding for its target
/// variable.
pub fn unbound() -> Term {
    Literal::new_simple_literal(UNBOUND_LEXICAL).into()
}

/// Checks whether `term` is the [`unbound`] sentinel.
pub fn is_unbound(term: TermRef<'_>) -> bool {
    match term {
        TermRef::Literal(literal) => {
            literal.language().is_none()
                && literal.datatype() == oxrdf::vocab::xsd::STRING
                && literal.value() == UNBOUND_LEXICAL
        }
        _ => false,
    }
}

/// A solution mapping: a finite partial function from [`Variable`]s to
/// [`Term`]s.
///
/// Values are always concrete terms (IRIs, blank nodes or literals), never
/// variables. The only synthetic value is the [`unbound`] sentinel produced by
/// failed `BIND` evaluations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    inner: FxHashMap<Variable, Term>,
}

impl Bindings {
    /// Creates an empty solution mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of bound variables.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Checks whether no variable is bound.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the term bound to `variable`, if any.
    pub fn get(&self, variable: &Variable) -> Option<&Term> {
        self.inner.get(variable)
    }

    /// Checks whether `variable` is in the domain of this mapping.
    pub fn contains(&self, variable: &Variable) -> bool {
        self.inner.contains_key(variable)
    }

    /// Binds `variable` to `term`, replacing any previous binding.
    pub fn insert(&mut self, variable: Variable, term: Term) {
        self.inner.insert(variable, term);
    }

    /// Removes the binding for `variable`.
    pub fn remove(&mut self, variable: &Variable) -> Option<Term> {
        self.inner.remove(variable)
    }

    /// Iterates over the (variable, term) pairs of this mapping.
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Term)> {
        self.inner.iter()
    }

    /// Iterates over the domain of this mapping.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.inner.keys()
    }

    /// Compatible extension of two mappings. On conflicting variables the
    /// bindings of `other` overwrite the bindings of `self`.
    pub fn union(&self, other: &Bindings) -> Bindings {
        let mut result = self.clone();
        for (variable, term) in &other.inner {
            result.inner.insert(variable.clone(), term.clone());
        }
        result
    }

    /// Checks whether the two mappings agree on all shared variables.
    pub fn is_compatible(&self, other: &Bindings) -> bool {
        self.inner
            .iter()
            .all(|(variable, term)| other.get(variable).map_or(true, |t| t == term))
    }

    /// Returns the union of the two mappings if they are compatible.
    ///
    /// This is the workhorse of join evaluation: incompatible mappings join to
    /// nothing.
    pub fn merge_compatible(&self, other: &Bindings) -> Option<Bindings> {
        self.is_compatible(other).then(|| self.union(other))
    }

    /// Checks whether every pair of this mapping also occurs in `other`.
    pub fn is_subset(&self, other: &Bindings) -> bool {
        self.inner
            .iter()
            .all(|(variable, term)| other.get(variable) == Some(term))
    }

    /// The pairs occurring in both mappings.
    pub fn intersection(&self, other: &Bindings) -> Bindings {
        self.inner
            .iter()
            .filter(|(variable, term)| other.get(variable) == Some(term))
            .map(|(variable, term)| (variable.clone(), term.clone()))
            .collect()
    }

    /// The pairs of this mapping that do not occur in `other`.
    pub fn difference(&self, other: &Bindings) -> Bindings {
        self.inner
            .iter()
            .filter(|(variable, term)| other.get(variable) != Some(term))
            .map(|(variable, term)| (variable.clone(), term.clone()))
            .collect()
    }

    /// Restricts this mapping to the given variables.
    pub fn project<'a>(&self, variables: impl IntoIterator<Item = &'a Variable>) -> Bindings {
        variables
            .into_iter()
            .filter_map(|v| self.get(v).map(|t| (v.clone(), t.clone())))
            .collect()
    }

    /// Removes the given variables from this mapping.
    pub fn without(&self, variables: &FxHashSet<Variable>) -> Bindings {
        self.inner
            .iter()
            .filter(|(variable, _)| !variables.contains(*variable))
            .map(|(variable, term)| (variable.clone(), term.clone()))
            .collect()
    }

    /// Substitutes every variable of `pattern` that is in the domain of this
    /// mapping with its bound term.
    ///
    /// A variable in predicate position stays a variable when its binding is
    /// not an IRI. Such a pattern cannot match, which the evaluator enforces by
    /// merging results back into the input mapping.
    pub fn bound(&self, pattern: &TriplePattern) -> TriplePattern {
        TriplePattern {
            subject: self.bound_term(&pattern.subject),
            predicate: self.bound_predicate(&pattern.predicate),
            object: self.bound_term(&pattern.object),
        }
    }

    /// Substitutes a single term pattern.
    pub fn bound_term(&self, pattern: &TermPattern) -> TermPattern {
        match pattern {
            TermPattern::Variable(v) => match self.get(v) {
                Some(term) => term_to_pattern(term.clone()),
                None => pattern.clone(),
            },
            _ => pattern.clone(),
        }
    }

    fn bound_predicate(&self, pattern: &NamedNodePattern) -> NamedNodePattern {
        match pattern {
            NamedNodePattern::Variable(v) => match self.get(v) {
                Some(Term::NamedNode(node)) => NamedNodePattern::NamedNode(node.clone()),
                _ => pattern.clone(),
            },
            NamedNodePattern::NamedNode(_) => pattern.clone(),
        }
    }

    /// A canonical textual form of this mapping: variables sorted by name,
    /// terms in their N-Triples serialization. Equal mappings have equal
    /// canonical forms, which `DISTINCT` relies on.
    pub fn canonical_form(&self) -> String {
        let mut pairs = self
            .inner
            .iter()
            .map(|(variable, term)| (variable.as_str(), term))
            .collect::<Vec<_>>();
        pairs.sort_unstable_by_key(|(name, _)| *name);

        let mut result = String::new();
        for (name, term) in pairs {
            // The write cannot fail on a String.
            let _ = write!(result, "?{name}={term};");
        }
        result
    }
}

impl FromIterator<(Variable, Term)> for Bindings {
    fn from_iter<T: IntoIterator<Item = (Variable, Term)>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Bindings {
    type Item = (Variable, Term);
    type IntoIter = std::collections::hash_map::IntoIter<Variable, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl fmt::Display for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (variable, term)) in self.inner.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{variable} -> {term}")?;
        }
        write!(f, "}}")
    }
}

/// Converts a concrete term into the equivalent term pattern.
pub fn term_to_pattern(term: Term) -> TermPattern {
    match term {
        Term::NamedNode(node) => TermPattern::NamedNode(node),
        Term::BlankNode(node) => TermPattern::BlankNode(node),
        Term::Literal(literal) => TermPattern::Literal(literal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::NamedNode;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn iri(value: &str) -> Term {
        NamedNode::new_unchecked(value).into()
    }

    #[test]
    fn union_right_operand_overwrites() {
        let left: Bindings = [(var("a"), iri("http://example.com/1"))].into_iter().collect();
        let right: Bindings = [
            (var("a"), iri("http://example.com/2")),
            (var("b"), iri("http://example.com/3")),
        ]
        .into_iter()
        .collect();

        let union = left.union(&right);
        assert_eq!(union.len(), 2);
        assert_eq!(union.get(&var("a")), Some(&iri("http://example.com/2")));
    }

    #[test]
    fn merge_compatible_rejects_conflicts() {
        let left: Bindings = [(var("a"), iri("http://example.com/1"))].into_iter().collect();
        let right: Bindings = [(var("a"), iri("http://example.com/2"))].into_iter().collect();
        assert!(left.merge_compatible(&right).is_none());

        let other: Bindings = [(var("b"), iri("http://example.com/2"))].into_iter().collect();
        let merged = left.merge_compatible(&other).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn subset_and_set_operations() {
        let small: Bindings = [(var("a"), iri("http://example.com/1"))].into_iter().collect();
        let big = small.union(
            &[(var("b"), iri("http://example.com/2"))]
                .into_iter()
                .collect(),
        );

        assert!(small.is_subset(&big));
        assert!(!big.is_subset(&small));
        assert_eq!(small.intersection(&big), small);
        assert_eq!(
            big.difference(&small),
            [(var("b"), iri("http://example.com/2"))].into_iter().collect()
        );
    }

    #[test]
    fn bound_substitutes_variables() {
        let mapping: Bindings = [(var("s"), iri("http://example.com/s"))].into_iter().collect();
        let pattern = TriplePattern {
            subject: TermPattern::Variable(var("s")),
            predicate: NamedNodePattern::Variable(var("p")),
            object: TermPattern::Variable(var("o")),
        };

        let bound = mapping.bound(&pattern);
        assert_eq!(
            bound.subject,
            TermPattern::NamedNode(NamedNode::new_unchecked("http://example.com/s"))
        );
        assert_eq!(bound.predicate, NamedNodePattern::Variable(var("p")));
    }

    #[test]
    fn unbound_sentinel_roundtrip() {
        let sentinel = unbound();
        assert!(is_unbound(sentinel.as_ref()));
        assert!(!is_unbound(iri("http://example.com/1").as_ref()));
    }

    #[test]
    fn canonical_form_is_order_independent() {
        let first: Bindings = [
            (var("a"), iri("http://example.com/1")),
            (var("b"), iri("http://example.com/2")),
        ]
        .into_iter()
        .collect();
        let second: Bindings = [
            (var("b"), iri("http://example.com/2")),
            (var("a"), iri("http://example.com/1")),
        ]
        .into_iter()
        .collect();
        assert_eq!(first.canonical_form(), second.canonical_form());
    }
}
