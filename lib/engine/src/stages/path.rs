//! Property-path evaluation.
//!
//! Path expressions compile into a Glushkov position automaton: one state
//! per predicate occurrence, follow edges from the classic
//! nullable/first/last/follow construction. Evaluation alternates automaton
//! advancement with single-step triple lookups, with a visited set per
//! source binding bounding transitive operators on cyclic data.

use crate::pipeline;
use crate::planner::Planner;
use crate::stages::{resolve_graphs, ResolvedGraph, Stage, StageBuilder};
use futures::StreamExt;
use rustc_hash::FxHashSet;
use sparflow_common::{
    BindingsStream, EvaluationError, ExecutionContext, Graph,
};
use sparflow_model::{
    term_to_pattern, Bindings, NamedNode, PropertyPathExpression, Term, TriplePattern, Variable,
};
use spargebra::algebra::GraphPattern;
use spargebra::term::{NamedNodePattern, TermPattern};
use std::collections::VecDeque;
use std::sync::Arc;

/// One transition label: a single triple-lookup step.
#[derive(Debug, Clone)]
enum PathStep {
    Forward(NamedNode),
    Backward(NamedNode),
    NegatedForward(Vec<NamedNode>),
    NegatedBackward(Vec<NamedNode>),
}

/// A Glushkov automaton over predicate occurrences.
#[derive(Debug, Clone)]
pub(crate) struct PathAutomaton {
    steps: Vec<PathStep>,
    first: Vec<usize>,
    last: FxHashSet<usize>,
    follow: Vec<Vec<usize>>,
    nullable: bool,
}

struct Fragment {
    nullable: bool,
    first: Vec<usize>,
    last: Vec<usize>,
    range: (usize, usize),
}

impl PathAutomaton {
    pub(crate) fn compile(path: &PropertyPathExpression) -> Self {
        let mut steps = Vec::new();
        let mut follow = Vec::new();
        let fragment = build(path, &mut steps, &mut follow);
        PathAutomaton {
            steps,
            first: fragment.first,
            last: fragment.last.into_iter().collect(),
            follow,
            nullable: fragment.nullable,
        }
    }
}

fn build(
    path: &PropertyPathExpression,
    steps: &mut Vec<PathStep>,
    follow: &mut Vec<Vec<usize>>,
) -> Fragment {
    match path {
        PropertyPathExpression::NamedNode(predicate) => {
            leaf(PathStep::Forward(predicate.clone()), steps, follow)
        }
        PropertyPathExpression::NegatedPropertySet(predicates) => {
            leaf(PathStep::NegatedForward(predicates.clone()), steps, follow)
        }
        PropertyPathExpression::Reverse(inner) => {
            let fragment = build(inner, steps, follow);
            reverse_fragment(fragment, steps, follow)
        }
        PropertyPathExpression::Sequence(a, b) => {
            let a = build(a, steps, follow);
            let b = build(b, steps, follow);
            for &q in &a.last {
                follow[q].extend_from_slice(&b.first);
            }
            let mut first = a.first.clone();
            if a.nullable {
                first.extend_from_slice(&b.first);
            }
            let mut last = b.last.clone();
            if b.nullable {
                last.extend_from_slice(&a.last);
            }
            Fragment {
                nullable: a.nullable && b.nullable,
                first,
                last,
                range: (a.range.0, b.range.1),
            }
        }
        PropertyPathExpression::Alternative(a, b) => {
            let a = build(a, steps, follow);
            let b = build(b, steps, follow);
            let mut first = a.first.clone();
            first.extend_from_slice(&b.first);
            let mut last = a.last.clone();
            last.extend_from_slice(&b.last);
            Fragment {
                nullable: a.nullable || b.nullable,
                first,
                last,
                range: (a.range.0, b.range.1),
            }
        }
        PropertyPathExpression::ZeroOrMore(inner) => {
            let mut fragment = loop_fragment(build(inner, steps, follow), follow);
            fragment.nullable = true;
            fragment
        }
        PropertyPathExpression::OneOrMore(inner) => {
            loop_fragment(build(inner, steps, follow), follow)
        }
        PropertyPathExpression::ZeroOrOne(inner) => {
            let mut fragment = build(inner, steps, follow);
            fragment.nullable = true;
            fragment
        }
    }
}

fn leaf(step: PathStep, steps: &mut Vec<PathStep>, follow: &mut Vec<Vec<usize>>) -> Fragment {
    let position = steps.len();
    steps.push(step);
    follow.push(Vec::new());
    Fragment {
        nullable: false,
        first: vec![position],
        last: vec![position],
        range: (position, position + 1),
    }
}

fn loop_fragment(fragment: Fragment, follow: &mut Vec<Vec<usize>>) -> Fragment {
    for &q in &fragment.last {
        let first = fragment.first.clone();
        follow[q].extend(first);
    }
    fragment
}

/// Reverses a fragment in place: `^(a/b)` is `^b/^a`, so transition
/// directions flip, follow edges invert and first/last swap.
fn reverse_fragment(
    fragment: Fragment,
    steps: &mut [PathStep],
    follow: &mut [Vec<usize>],
) -> Fragment {
    let (lo, hi) = fragment.range;
    for step in &mut steps[lo..hi] {
        *step = match step.clone() {
            PathStep::Forward(p) => PathStep::Backward(p),
            PathStep::Backward(p) => PathStep::Forward(p),
            PathStep::NegatedForward(ps) => PathStep::NegatedBackward(ps),
            PathStep::NegatedBackward(ps) => PathStep::NegatedForward(ps),
        };
    }

    let mut inverted: Vec<Vec<usize>> = vec![Vec::new(); hi - lo];
    for q in lo..hi {
        // Fragment-internal edges only: edges into this fragment from the
        // outside do not exist yet during bottom-up construction.
        for &p in &follow[q] {
            inverted[p - lo].push(q);
        }
    }
    for (offset, edges) in inverted.into_iter().enumerate() {
        follow[lo + offset] = edges;
    }

    Fragment {
        nullable: fragment.nullable,
        first: fragment.last,
        last: fragment.first,
        range: fragment.range,
    }
}

/// The `GraphPattern::Path` stage.
pub(crate) struct PathStageBuilder;

impl StageBuilder for PathStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Path {
            subject,
            path,
            object,
        } = pattern
        else {
            return Err(EvaluationError::internal(
                "the path stage received a foreign pattern",
            ));
        };

        let automaton = Arc::new(PathAutomaton::compile(path));
        let dataset = planner.dataset().clone();
        let ctx = planner.ctx().clone();
        let active = planner.active_graph();
        let subject = subject.clone();
        let object = object.clone();

        Ok(Arc::new(move |input| {
            let dataset = dataset.clone();
            let ctx = ctx.clone();
            let active = active.clone();
            let automaton = Arc::clone(&automaton);
            let subject = subject.clone();
            let object = object.clone();
            pipeline::flat_map(input, move |solution| {
                let targets = match resolve_graphs(&dataset, &ctx, &active, &solution) {
                    Ok(targets) => targets,
                    Err(e) => return pipeline::once_error(e),
                };
                let streams = targets
                    .into_iter()
                    .map(|target| {
                        eval_target(
                            target,
                            solution.clone(),
                            ctx.clone(),
                            Arc::clone(&automaton),
                            subject.clone(),
                            object.clone(),
                        )
                    })
                    .collect::<Vec<_>>();
                pipeline::merge(streams)
            })
        }))
    }
}

fn eval_target(
    target: ResolvedGraph,
    solution: Bindings,
    ctx: ExecutionContext,
    automaton: Arc<PathAutomaton>,
    subject: TermPattern,
    object: TermPattern,
) -> BindingsStream {
    let ResolvedGraph { graph, binding, .. } = target;
    let mut solution = solution;
    if let Some((variable, graph_name)) = binding {
        solution.insert(variable, graph_name.into());
    }

    pipeline::from_future(async move {
        let subject = solution.bound_term(&subject);
        let object = solution.bound_term(&object);

        let starts = match &subject {
            TermPattern::Variable(_) => enumerate_starts(&graph, &ctx, &automaton).await?,
            TermPattern::NamedNode(node) => vec![Term::NamedNode(node.clone())],
            TermPattern::BlankNode(node) => vec![Term::BlankNode(node.clone())],
            TermPattern::Literal(literal) => vec![Term::Literal(literal.clone())],
        };

        let mut results = Vec::new();
        for start in starts {
            let endpoints = walk(&graph, &ctx, &automaton, &start).await?;
            for endpoint in endpoints {
                let mut bindings = Bindings::new();
                if let TermPattern::Variable(v) = &subject {
                    bindings.insert(v.clone(), start.clone());
                }
                match &object {
                    TermPattern::Variable(v) => {
                        // The same variable on both endpoints requires a
                        // cycle back to the start.
                        if let Some(term) = bindings.get(v) {
                            if *term != endpoint {
                                continue;
                            }
                        } else {
                            bindings.insert(v.clone(), endpoint.clone());
                        }
                    }
                    constant => {
                        if term_of_pattern(constant) != Some(endpoint.clone()) {
                            continue;
                        }
                    }
                }
                if let Some(merged) = solution.merge_compatible(&bindings) {
                    results.push(merged);
                }
            }
        }
        Ok(pipeline::from_iter(results))
    })
}

fn term_of_pattern(pattern: &TermPattern) -> Option<Term> {
    match pattern {
        TermPattern::NamedNode(node) => Some(Term::NamedNode(node.clone())),
        TermPattern::BlankNode(node) => Some(Term::BlankNode(node.clone())),
        TermPattern::Literal(literal) => Some(Term::Literal(literal.clone())),
        TermPattern::Variable(_) => None,
    }
}

/// Breadth-first search from one start term: advance the automaton one
/// lookup at a time, deduplicating (state, term) pairs to survive cycles.
async fn walk(
    graph: &Arc<dyn Graph>,
    ctx: &ExecutionContext,
    automaton: &PathAutomaton,
    start: &Term,
) -> Result<Vec<Term>, EvaluationError> {
    let mut endpoints = Vec::new();
    let mut emitted = FxHashSet::default();
    let mut visited: FxHashSet<(usize, String)> = FxHashSet::default();
    let mut queue: VecDeque<(usize, Term)> = VecDeque::new();

    if automaton.nullable && emitted.insert(start.to_string()) {
        endpoints.push(start.clone());
    }

    for &position in &automaton.first {
        for term in step(graph, ctx, &automaton.steps[position], start).await? {
            if visited.insert((position, term.to_string())) {
                queue.push_back((position, term));
            }
        }
    }

    while let Some((position, term)) = queue.pop_front() {
        if automaton.last.contains(&position) && emitted.insert(term.to_string()) {
            endpoints.push(term.clone());
        }
        for &next in &automaton.follow[position] {
            for reached in step(graph, ctx, &automaton.steps[next], &term).await? {
                if visited.insert((next, reached.to_string())) {
                    queue.push_back((next, reached));
                }
            }
        }
    }
    Ok(endpoints)
}

/// One automaton transition: a single triple lookup from `from`.
async fn step(
    graph: &Arc<dyn Graph>,
    ctx: &ExecutionContext,
    step: &PathStep,
    from: &Term,
) -> Result<Vec<Term>, EvaluationError> {
    let free_subject = || TermPattern::Variable(Variable::new_unchecked("sf_path_s"));
    let free_predicate = || NamedNodePattern::Variable(Variable::new_unchecked("sf_path_p"));
    let free_object = || TermPattern::Variable(Variable::new_unchecked("sf_path_o"));

    let (pattern, forward, negated) = match step {
        PathStep::Forward(predicate) => (
            TriplePattern {
                subject: term_to_pattern(from.clone()),
                predicate: NamedNodePattern::NamedNode(predicate.clone()),
                object: free_object(),
            },
            true,
            None,
        ),
        PathStep::Backward(predicate) => (
            TriplePattern {
                subject: free_subject(),
                predicate: NamedNodePattern::NamedNode(predicate.clone()),
                object: term_to_pattern(from.clone()),
            },
            false,
            None,
        ),
        PathStep::NegatedForward(predicates) => (
            TriplePattern {
                subject: term_to_pattern(from.clone()),
                predicate: free_predicate(),
                object: free_object(),
            },
            true,
            Some(predicates),
        ),
        PathStep::NegatedBackward(predicates) => (
            TriplePattern {
                subject: free_subject(),
                predicate: free_predicate(),
                object: term_to_pattern(from.clone()),
            },
            false,
            Some(predicates),
        ),
    };

    // A literal can never be a subject; such a step matches nothing.
    if forward && matches!(pattern.subject, TermPattern::Literal(_)) {
        return Ok(Vec::new());
    }

    let mut matches = graph.find(&pattern, ctx);
    let mut terms = Vec::new();
    while let Some(triple) = matches.next().await {
        let triple = triple?;
        if let Some(negated) = negated {
            if negated.contains(&triple.predicate) {
                continue;
            }
        }
        terms.push(if forward {
            triple.object
        } else {
            triple.subject.into()
        });
    }
    Ok(terms)
}

/// Candidate start terms when the path subject is unbound: sources of the
/// first transitions, plus every graph term for nullable paths (zero-length
/// matches pair a term with itself).
async fn enumerate_starts(
    graph: &Arc<dyn Graph>,
    ctx: &ExecutionContext,
    automaton: &PathAutomaton,
) -> Result<Vec<Term>, EvaluationError> {
    let mut seen = FxHashSet::default();
    let mut starts = Vec::new();
    let mut push = |term: Term, starts: &mut Vec<Term>| {
        if seen.insert(term.to_string()) {
            starts.push(term);
        }
    };

    if automaton.nullable {
        let any = TriplePattern {
            subject: TermPattern::Variable(Variable::new_unchecked("sf_path_s")),
            predicate: NamedNodePattern::Variable(Variable::new_unchecked("sf_path_p")),
            object: TermPattern::Variable(Variable::new_unchecked("sf_path_o")),
        };
        let mut matches = graph.find(&any, ctx);
        while let Some(triple) = matches.next().await {
            let triple = triple?;
            push(triple.subject.into(), &mut starts);
            push(triple.object, &mut starts);
        }
        return Ok(starts);
    }

    for &position in &automaton.first {
        let (pattern, forward) = match &automaton.steps[position] {
            PathStep::Forward(predicate) => (
                TriplePattern {
                    subject: TermPattern::Variable(Variable::new_unchecked("sf_path_s")),
                    predicate: NamedNodePattern::NamedNode(predicate.clone()),
                    object: TermPattern::Variable(Variable::new_unchecked("sf_path_o")),
                },
                true,
            ),
            PathStep::Backward(predicate) => (
                TriplePattern {
                    subject: TermPattern::Variable(Variable::new_unchecked("sf_path_s")),
                    predicate: NamedNodePattern::NamedNode(predicate.clone()),
                    object: TermPattern::Variable(Variable::new_unchecked("sf_path_o")),
                },
                false,
            ),
            PathStep::NegatedForward(_) | PathStep::NegatedBackward(_) => (
                TriplePattern {
                    subject: TermPattern::Variable(Variable::new_unchecked("sf_path_s")),
                    predicate: NamedNodePattern::Variable(Variable::new_unchecked("sf_path_p")),
                    object: TermPattern::Variable(Variable::new_unchecked("sf_path_o")),
                },
                matches!(&automaton.steps[position], PathStep::NegatedForward(_)),
            ),
        };
        let mut matches = graph.find(&pattern, ctx);
        while let Some(triple) = matches.next().await {
            let triple = triple?;
            if forward {
                push(triple.subject.into(), &mut starts);
            } else {
                push(triple.object, &mut starts);
            }
        }
    }
    Ok(starts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{name}"))
    }

    #[test]
    fn sequence_automaton() {
        // a / b
        let path = PropertyPathExpression::Sequence(
            Box::new(PropertyPathExpression::NamedNode(node("a"))),
            Box::new(PropertyPathExpression::NamedNode(node("b"))),
        );
        let automaton = PathAutomaton::compile(&path);
        assert!(!automaton.nullable);
        assert_eq!(automaton.first, vec![0]);
        assert!(automaton.last.contains(&1));
        assert_eq!(automaton.follow[0], vec![1]);
        assert!(automaton.follow[1].is_empty());
    }

    #[test]
    fn kleene_star_loops() {
        // a*
        let path = PropertyPathExpression::ZeroOrMore(Box::new(
            PropertyPathExpression::NamedNode(node("a")),
        ));
        let automaton = PathAutomaton::compile(&path);
        assert!(automaton.nullable);
        assert_eq!(automaton.follow[0], vec![0]);
        assert!(automaton.last.contains(&0));
    }

    #[test]
    fn reverse_flips_sequence() {
        // ^(a / b) behaves like ^b / ^a
        let path = PropertyPathExpression::Reverse(Box::new(PropertyPathExpression::Sequence(
            Box::new(PropertyPathExpression::NamedNode(node("a"))),
            Box::new(PropertyPathExpression::NamedNode(node("b"))),
        )));
        let automaton = PathAutomaton::compile(&path);
        assert_eq!(automaton.first, vec![1]);
        assert!(automaton.last.contains(&0));
        assert!(matches!(automaton.steps[0], PathStep::Backward(_)));
        assert_eq!(automaton.follow[1], vec![0]);
        assert!(automaton.follow[0].is_empty());
    }

    #[test]
    fn alternative_merges_entry_points() {
        // a | ^b
        let path = PropertyPathExpression::Alternative(
            Box::new(PropertyPathExpression::NamedNode(node("a"))),
            Box::new(PropertyPathExpression::Reverse(Box::new(
                PropertyPathExpression::NamedNode(node("b")),
            ))),
        );
        let automaton = PathAutomaton::compile(&path);
        assert_eq!(automaton.first, vec![0, 1]);
        assert_eq!(automaton.last.len(), 2);
        assert!(matches!(automaton.steps[1], PathStep::Backward(_)));
    }
}
