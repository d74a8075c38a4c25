//! Plan-time query rewriting: join reordering, BGP merging and the VALUES
//! rewrite.

use crate::stages::values_row;
use sparflow_model::{Bindings, GroundTerm, NamedNodePattern, Term, TriplePattern, Variable};
use spargebra::algebra::{Expression, GraphPattern};

/// A plan-time rewriting pass over the algebra tree.
pub trait Optimizer: Send + Sync {
    /// Rewrites `pattern` into an equivalent, hopefully cheaper, tree.
    fn optimize(&self, pattern: GraphPattern) -> GraphPattern;
}

/// The default rewriting pipeline: order join operands by cost rank, merge
/// consecutive BGPs, then rewrite VALUES clauses into unions of substituted
/// bodies.
pub struct DefaultOptimizer;

impl Optimizer for DefaultOptimizer {
    fn optimize(&self, pattern: GraphPattern) -> GraphPattern {
        rewrite_values(reorder_joins(pattern))
    }
}

/// Evaluation-cost rank of a join operand: constant-selective producers
/// first, graph variables last.
fn rank(pattern: &GraphPattern) -> u8 {
    match pattern {
        GraphPattern::Bgp { .. } | GraphPattern::Path { .. } => 0,
        GraphPattern::Graph {
            name: NamedNodePattern::NamedNode(_),
            ..
        } => 0,
        GraphPattern::Values { .. } => 3,
        GraphPattern::Graph {
            name: NamedNodePattern::Variable(_),
            ..
        } => 5,
        _ => 1,
    }
}

/// Reorders flattened join trees by rank and merges consecutive BGPs.
pub(crate) fn reorder_joins(pattern: GraphPattern) -> GraphPattern {
    match pattern {
        GraphPattern::Join { .. } => {
            let mut operands = Vec::new();
            flatten_join(pattern, &mut operands);
            let mut operands: Vec<GraphPattern> =
                operands.into_iter().map(reorder_joins).collect();
            operands.sort_by_key(rank);

            let mut merged: Vec<GraphPattern> = Vec::new();
            for operand in operands {
                match (merged.last_mut(), operand) {
                    (
                        Some(GraphPattern::Bgp { patterns }),
                        GraphPattern::Bgp { patterns: more },
                    ) => patterns.extend(more),
                    (_, operand) => merged.push(operand),
                }
            }

            let mut iter = merged.into_iter();
            let first = iter.next().unwrap_or(GraphPattern::Bgp {
                patterns: Vec::new(),
            });
            iter.fold(first, |left, right| GraphPattern::Join {
                left: Box::new(left),
                right: Box::new(right),
            })
        }
        other => map_children(other, reorder_joins),
    }
}

fn flatten_join(pattern: GraphPattern, out: &mut Vec<GraphPattern>) {
    match pattern {
        GraphPattern::Join { left, right } => {
            flatten_join(*left, out);
            flatten_join(*right, out);
        }
        other => out.push(other),
    }
}

/// Rewrites joins containing VALUES clauses: for every row (of the Cartesian
/// product over all VALUES operands), the row is substituted into the
/// remaining operands and the results are extended with the row's bindings.
/// The rewritten query is the union over all rows.
///
/// The VALUES bindings are authoritative: a solution of the substituted body
/// that disagrees with its row is rejected by the single-row VALUES operand
/// kept in each branch.
pub(crate) fn rewrite_values(pattern: GraphPattern) -> GraphPattern {
    let pattern = match pattern {
        GraphPattern::Join { .. } => {
            let mut operands = Vec::new();
            flatten_join(pattern, &mut operands);
            let (values, others): (Vec<_>, Vec<_>) = operands
                .into_iter()
                .partition(|p| matches!(p, GraphPattern::Values { .. }));
            if values.is_empty() || others.is_empty() {
                return rebuild_join(
                    values
                        .into_iter()
                        .chain(others)
                        .map(rewrite_values)
                        .collect(),
                );
            }

            let rows = cartesian_rows(&values);
            let branches: Vec<GraphPattern> = rows
                .into_iter()
                .map(|row| {
                    let body: Vec<GraphPattern> = others
                        .iter()
                        .map(|p| substitute_pattern(p.clone(), &row))
                        .map(rewrite_values)
                        .collect();
                    let mut operands = vec![single_row_values(&row)];
                    operands.extend(body);
                    rebuild_join(operands)
                })
                .collect();

            let mut iter = branches.into_iter();
            let first = iter.next().unwrap_or(GraphPattern::Bgp {
                patterns: Vec::new(),
            });
            return iter.fold(first, |left, right| GraphPattern::Union {
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        other => other,
    };
    map_children(pattern, rewrite_values)
}

fn rebuild_join(operands: Vec<GraphPattern>) -> GraphPattern {
    let mut iter = operands.into_iter();
    let first = iter.next().unwrap_or(GraphPattern::Bgp {
        patterns: Vec::new(),
    });
    iter.fold(first, |left, right| GraphPattern::Join {
        left: Box::new(left),
        right: Box::new(right),
    })
}

/// The Cartesian product of the rows of several VALUES operands, as solution
/// mappings.
fn cartesian_rows(values: &[GraphPattern]) -> Vec<Bindings> {
    let mut rows = vec![Bindings::new()];
    for operand in values {
        let GraphPattern::Values {
            variables,
            bindings,
        } = operand
        else {
            continue;
        };
        let mut next = Vec::with_capacity(rows.len() * bindings.len());
        for row in &rows {
            for cells in bindings {
                let extension = values_row(variables, cells);
                if let Some(combined) = row.merge_compatible(&extension) {
                    next.push(combined);
                }
            }
        }
        rows = next;
    }
    rows
}

/// A VALUES node holding exactly one row.
fn single_row_values(row: &Bindings) -> GraphPattern {
    let mut variables = Vec::with_capacity(row.len());
    let mut cells = Vec::with_capacity(row.len());
    for (variable, term) in row.iter() {
        variables.push(variable.clone());
        cells.push(Some(match term {
            Term::NamedNode(node) => GroundTerm::NamedNode(node.clone()),
            Term::Literal(literal) => GroundTerm::Literal(literal.clone()),
            // Blank nodes cannot appear in VALUES rows.
            Term::BlankNode(_) => return GraphPattern::Values {
                variables: Vec::new(),
                bindings: Vec::new(),
            },
        }));
    }
    GraphPattern::Values {
        variables,
        bindings: vec![cells],
    }
}

/// Deep substitution of a solution mapping into a pattern.
pub(crate) fn substitute_pattern(pattern: GraphPattern, row: &Bindings) -> GraphPattern {
    match pattern {
        GraphPattern::Bgp { patterns } => GraphPattern::Bgp {
            patterns: patterns.iter().map(|p| row.bound(p)).collect(),
        },
        GraphPattern::Path {
            subject,
            path,
            object,
        } => GraphPattern::Path {
            subject: row.bound_term(&subject),
            path,
            object: row.bound_term(&object),
        },
        GraphPattern::Filter { expr, inner } => GraphPattern::Filter {
            expr: substitute_expression(expr, row),
            inner: Box::new(substitute_pattern(*inner, row)),
        },
        GraphPattern::Extend {
            inner,
            variable,
            expression,
        } => GraphPattern::Extend {
            inner: Box::new(substitute_pattern(*inner, row)),
            variable,
            expression: substitute_expression(expression, row),
        },
        GraphPattern::Graph { name, inner } => {
            let name = match name {
                NamedNodePattern::Variable(v) => match row.get(&v) {
                    Some(Term::NamedNode(node)) => NamedNodePattern::NamedNode(node.clone()),
                    _ => NamedNodePattern::Variable(v),
                },
                constant => constant,
            };
            GraphPattern::Graph {
                name,
                inner: Box::new(substitute_pattern(*inner, row)),
            }
        }
        other => map_children(other, |child| substitute_pattern(child, row)),
    }
}

/// Substitutes bound variables in an expression with constant terms.
fn substitute_expression(expression: Expression, row: &Bindings) -> Expression {
    let sub = |e: Box<Expression>| Box::new(substitute_expression(*e, row));
    match expression {
        Expression::Variable(variable) => match row.get(&variable) {
            Some(Term::NamedNode(node)) => Expression::NamedNode(node.clone()),
            Some(Term::Literal(literal)) => Expression::Literal(literal.clone()),
            _ => Expression::Variable(variable),
        },
        Expression::Or(a, b) => Expression::Or(sub(a), sub(b)),
        Expression::And(a, b) => Expression::And(sub(a), sub(b)),
        Expression::Equal(a, b) => Expression::Equal(sub(a), sub(b)),
        Expression::SameTerm(a, b) => Expression::SameTerm(sub(a), sub(b)),
        Expression::Greater(a, b) => Expression::Greater(sub(a), sub(b)),
        Expression::GreaterOrEqual(a, b) => Expression::GreaterOrEqual(sub(a), sub(b)),
        Expression::Less(a, b) => Expression::Less(sub(a), sub(b)),
        Expression::LessOrEqual(a, b) => Expression::LessOrEqual(sub(a), sub(b)),
        Expression::In(a, list) => Expression::In(
            sub(a),
            list.into_iter()
                .map(|e| substitute_expression(e, row))
                .collect(),
        ),
        Expression::Add(a, b) => Expression::Add(sub(a), sub(b)),
        Expression::Subtract(a, b) => Expression::Subtract(sub(a), sub(b)),
        Expression::Multiply(a, b) => Expression::Multiply(sub(a), sub(b)),
        Expression::Divide(a, b) => Expression::Divide(sub(a), sub(b)),
        Expression::UnaryPlus(a) => Expression::UnaryPlus(sub(a)),
        Expression::UnaryMinus(a) => Expression::UnaryMinus(sub(a)),
        Expression::Not(a) => Expression::Not(sub(a)),
        Expression::Exists(pattern) => {
            Expression::Exists(Box::new(substitute_pattern(*pattern, row)))
        }
        Expression::If(c, t, e) => Expression::If(sub(c), sub(t), sub(e)),
        Expression::Coalesce(es) => Expression::Coalesce(
            es.into_iter()
                .map(|e| substitute_expression(e, row))
                .collect(),
        ),
        Expression::FunctionCall(function, args) => Expression::FunctionCall(
            function,
            args.into_iter()
                .map(|e| substitute_expression(e, row))
                .collect(),
        ),
        constant @ (Expression::NamedNode(_) | Expression::Literal(_)) => constant,
        Expression::Bound(variable) => Expression::Bound(variable),
    }
}

/// Rebuilds a node with `f` applied to its direct pattern children.
fn map_children(
    pattern: GraphPattern,
    mut f: impl FnMut(GraphPattern) -> GraphPattern,
) -> GraphPattern {
    match pattern {
        GraphPattern::Join { left, right } => GraphPattern::Join {
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
        },
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => GraphPattern::LeftJoin {
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
            expression,
        },
        GraphPattern::Union { left, right } => GraphPattern::Union {
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
        },
        GraphPattern::Minus { left, right } => GraphPattern::Minus {
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
        },
        GraphPattern::Filter { expr, inner } => GraphPattern::Filter {
            expr,
            inner: Box::new(f(*inner)),
        },
        GraphPattern::Graph { name, inner } => GraphPattern::Graph {
            name,
            inner: Box::new(f(*inner)),
        },
        GraphPattern::Extend {
            inner,
            variable,
            expression,
        } => GraphPattern::Extend {
            inner: Box::new(f(*inner)),
            variable,
            expression,
        },
        GraphPattern::OrderBy { inner, expression } => GraphPattern::OrderBy {
            inner: Box::new(f(*inner)),
            expression,
        },
        GraphPattern::Project { inner, variables } => GraphPattern::Project {
            inner: Box::new(f(*inner)),
            variables,
        },
        GraphPattern::Distinct { inner } => GraphPattern::Distinct {
            inner: Box::new(f(*inner)),
        },
        GraphPattern::Reduced { inner } => GraphPattern::Reduced {
            inner: Box::new(f(*inner)),
        },
        GraphPattern::Slice {
            inner,
            start,
            length,
        } => GraphPattern::Slice {
            inner: Box::new(f(*inner)),
            start,
            length,
        },
        GraphPattern::Group {
            inner,
            variables,
            aggregates,
        } => GraphPattern::Group {
            inner: Box::new(f(*inner)),
            variables,
            aggregates,
        },
        GraphPattern::Service {
            name,
            inner,
            silent,
        } => GraphPattern::Service {
            name,
            inner: Box::new(f(*inner)),
            silent,
        },
        leaf => leaf,
    }
}

/// Checks whether the query carries a LIMIT or OFFSET anywhere, which
/// disables the semantic cache.
pub(crate) fn has_slice(pattern: &GraphPattern) -> bool {
    fn walk(pattern: &GraphPattern, found: &mut bool) {
        if matches!(pattern, GraphPattern::Slice { .. }) {
            *found = true;
        }
        match pattern {
            GraphPattern::Join { left, right }
            | GraphPattern::LeftJoin { left, right, .. }
            | GraphPattern::Union { left, right }
            | GraphPattern::Minus { left, right } => {
                walk(left, found);
                walk(right, found);
            }
            GraphPattern::Filter { inner, .. }
            | GraphPattern::Graph { inner, .. }
            | GraphPattern::Extend { inner, .. }
            | GraphPattern::OrderBy { inner, .. }
            | GraphPattern::Project { inner, .. }
            | GraphPattern::Distinct { inner }
            | GraphPattern::Reduced { inner }
            | GraphPattern::Slice { inner, .. }
            | GraphPattern::Group { inner, .. }
            | GraphPattern::Service { inner, .. } => walk(inner, found),
            _ => {}
        }
    }
    let mut found = false;
    walk(pattern, &mut found);
    found
}

/// The variables a SELECT query projects, read from its projection node.
pub(crate) fn projection_variables(pattern: &GraphPattern) -> Vec<Variable> {
    match pattern {
        GraphPattern::Project { variables, .. } => variables.clone(),
        GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::OrderBy { inner, .. }
        | GraphPattern::Slice { inner, .. } => projection_variables(inner),
        pattern => {
            let mut variables = Vec::new();
            pattern.on_in_scope_variable(|v| variables.push(v.clone()));
            variables
        }
    }
}

/// Rewrites a DESCRIBE query into the equivalent CONSTRUCT: for every
/// described resource, `?s ?p ?o` patterns are joined in and used as the
/// template.
pub(crate) fn describe_to_construct(
    pattern: &GraphPattern,
) -> (GraphPattern, Vec<TriplePattern>) {
    let mut resources = Vec::new();
    pattern.on_in_scope_variable(|v| resources.push(v.clone()));

    let template: Vec<TriplePattern> = resources
        .iter()
        .enumerate()
        .map(|(i, variable)| TriplePattern {
            subject: variable.clone().into(),
            predicate: NamedNodePattern::Variable(Variable::new_unchecked(format!(
                "sf_desc_p_{i}"
            ))),
            object: spargebra::term::TermPattern::Variable(Variable::new_unchecked(format!(
                "sf_desc_o_{i}"
            ))),
        })
        .collect();

    let rewritten = GraphPattern::Join {
        left: Box::new(pattern.clone()),
        right: Box::new(GraphPattern::Bgp {
            patterns: template.clone(),
        }),
    };
    (rewritten, template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparflow_model::NamedNode;
    use spargebra::term::TermPattern;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn bgp(p: &str) -> GraphPattern {
        GraphPattern::Bgp {
            patterns: vec![TriplePattern {
                subject: TermPattern::Variable(var("s")),
                predicate: NamedNodePattern::NamedNode(NamedNode::new_unchecked(format!(
                    "http://example.com/{p}"
                ))),
                object: TermPattern::Variable(var("o")),
            }],
        }
    }

    fn join(left: GraphPattern, right: GraphPattern) -> GraphPattern {
        GraphPattern::Join {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn join_reordering_merges_bgps() {
        let values = GraphPattern::Values {
            variables: vec![var("s")],
            bindings: vec![vec![Some(GroundTerm::NamedNode(NamedNode::new_unchecked(
                "http://example.com/1",
            )))]],
        };
        let reordered = reorder_joins(join(values.clone(), join(bgp("a"), bgp("b"))));

        // Both BGPs merge into one leading operand; VALUES trails.
        let GraphPattern::Join { left, right } = reordered else {
            panic!("expected a join");
        };
        let GraphPattern::Bgp { patterns } = *left else {
            panic!("expected the merged BGP first");
        };
        assert_eq!(patterns.len(), 2);
        assert_eq!(*right, values);
    }

    #[test]
    fn values_rewriting_builds_union_of_substituted_bodies() {
        let values = GraphPattern::Values {
            variables: vec![var("s")],
            bindings: vec![
                vec![Some(GroundTerm::NamedNode(NamedNode::new_unchecked(
                    "http://example.com/1",
                )))],
                vec![Some(GroundTerm::NamedNode(NamedNode::new_unchecked(
                    "http://example.com/2",
                )))],
            ],
        };
        let rewritten = rewrite_values(join(bgp("a"), values));

        let GraphPattern::Union { left, right } = rewritten else {
            panic!("expected a union over the two rows");
        };
        for branch in [*left, *right] {
            let GraphPattern::Join { left, right } = branch else {
                panic!("expected row join");
            };
            assert!(matches!(*left, GraphPattern::Values { .. }));
            let GraphPattern::Bgp { patterns } = *right else {
                panic!("expected the substituted BGP");
            };
            assert!(matches!(patterns[0].subject, TermPattern::NamedNode(_)));
        }
    }

    #[test]
    fn slice_detection() {
        let sliced = GraphPattern::Slice {
            inner: Box::new(bgp("a")),
            start: 0,
            length: Some(10),
        };
        assert!(has_slice(&sliced));
        assert!(!has_slice(&bgp("a")));
    }

    #[test]
    fn substitution_reaches_filters() {
        let row: Bindings = [(
            var("s"),
            Term::from(NamedNode::new_unchecked("http://example.com/1")),
        )]
        .into_iter()
        .collect();
        let pattern = GraphPattern::Filter {
            expr: Expression::Variable(var("s")),
            inner: Box::new(bgp("a")),
        };
        let GraphPattern::Filter { expr, inner } = substitute_pattern(pattern, &row) else {
            panic!("expected a filter");
        };
        assert!(matches!(expr, Expression::NamedNode(_)));
        let GraphPattern::Bgp { patterns } = *inner else {
            panic!("expected a BGP");
        };
        assert!(matches!(patterns[0].subject, TermPattern::NamedNode(_)));
    }
}
