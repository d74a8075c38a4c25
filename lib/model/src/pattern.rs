//! Helpers for matching triple patterns against concrete triples.

use crate::Bindings;
use oxrdf::{Term, Triple, Variable};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};

/// Checks whether a term pattern accepts a concrete term. Variables act as
/// wildcards.
pub fn matches_term(pattern: &TermPattern, term: &Term) -> bool {
    match pattern {
        TermPattern::Variable(_) => true,
        TermPattern::NamedNode(node) => matches!(term, Term::NamedNode(t) if t == node),
        TermPattern::BlankNode(node) => matches!(term, Term::BlankNode(t) if t == node),
        TermPattern::Literal(literal) => matches!(term, Term::Literal(t) if t == literal),
    }
}

/// Checks whether a predicate pattern accepts a concrete term.
pub fn matches_predicate(pattern: &NamedNodePattern, term: &Term) -> bool {
    match pattern {
        NamedNodePattern::Variable(_) => true,
        NamedNodePattern::NamedNode(node) => {
            matches!(term, Term::NamedNode(t) if t == node)
        }
    }
}

/// Checks whether a triple pattern accepts a concrete triple, ignoring
/// repeated-variable constraints.
pub fn matches_triple(pattern: &TriplePattern, triple: &Triple) -> bool {
    matches_term(&pattern.subject, &triple.subject.clone().into())
        && matches_predicate(&pattern.predicate, &triple.predicate.clone().into())
        && matches_term(&pattern.object, &triple.object)
}

/// Unifies a triple pattern with a concrete triple.
///
/// Returns the solution mapping binding the pattern's variables, or `None`
/// when the triple does not match. A variable occurring several times in the
/// pattern must unify with the same term everywhere.
pub fn unify_triple(pattern: &TriplePattern, triple: &Triple) -> Option<Bindings> {
    let mut solution = Bindings::new();
    unify_term(&pattern.subject, &triple.subject.clone().into(), &mut solution)?;
    unify_predicate(&pattern.predicate, &triple.predicate.clone().into(), &mut solution)?;
    unify_term(&pattern.object, &triple.object, &mut solution)?;
    Some(solution)
}

fn unify_term(pattern: &TermPattern, term: &Term, solution: &mut Bindings) -> Option<()> {
    match pattern {
        TermPattern::Variable(v) => bind_checked(v, term, solution),
        _ => matches_term(pattern, term).then_some(()),
    }
}

fn unify_predicate(
    pattern: &NamedNodePattern,
    term: &Term,
    solution: &mut Bindings,
) -> Option<()> {
    match pattern {
        NamedNodePattern::Variable(v) => bind_checked(v, term, solution),
        NamedNodePattern::NamedNode(_) => matches_predicate(pattern, term).then_some(()),
    }
}

fn bind_checked(variable: &Variable, term: &Term, solution: &mut Bindings) -> Option<()> {
    match solution.get(variable) {
        Some(bound) if bound != term => None,
        Some(_) => Some(()),
        None => {
            solution.insert(variable.clone(), term.clone());
            Some(())
        }
    }
}

/// Collects the variables of a triple pattern.
pub fn pattern_variables(pattern: &TriplePattern, out: &mut Vec<Variable>) {
    if let TermPattern::Variable(v) = &pattern.subject {
        out.push(v.clone());
    }
    if let NamedNodePattern::Variable(v) = &pattern.predicate {
        out.push(v.clone());
    }
    if let TermPattern::Variable(v) = &pattern.object {
        out.push(v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::NamedNode;

    fn node(value: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{value}"))
    }

    fn triple(s: &str, p: &str, o: &str) -> Triple {
        Triple::new(node(s), node(p), node(o))
    }

    #[test]
    fn unify_binds_variables() {
        let pattern = TriplePattern {
            subject: TermPattern::Variable(Variable::new_unchecked("s")),
            predicate: NamedNodePattern::NamedNode(node("p")),
            object: TermPattern::Variable(Variable::new_unchecked("o")),
        };
        let solution = unify_triple(&pattern, &triple("a", "p", "b")).unwrap();
        assert_eq!(solution.len(), 2);
        assert_eq!(
            solution.get(&Variable::new_unchecked("s")),
            Some(&node("a").into())
        );
    }

    #[test]
    fn unify_rejects_conflicting_repeated_variable() {
        let pattern = TriplePattern {
            subject: TermPattern::Variable(Variable::new_unchecked("x")),
            predicate: NamedNodePattern::NamedNode(node("p")),
            object: TermPattern::Variable(Variable::new_unchecked("x")),
        };
        assert!(unify_triple(&pattern, &triple("a", "p", "b")).is_none());
        assert!(unify_triple(&pattern, &triple("a", "p", "a")).is_some());
    }

    #[test]
    fn unify_rejects_constant_mismatch() {
        let pattern = TriplePattern {
            subject: TermPattern::NamedNode(node("other")),
            predicate: NamedNodePattern::NamedNode(node("p")),
            object: TermPattern::Variable(Variable::new_unchecked("o")),
        };
        assert!(unify_triple(&pattern, &triple("a", "p", "b")).is_none());
    }
}
