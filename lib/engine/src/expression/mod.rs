//! Compilation and evaluation of SPARQL expressions.
//!
//! Expression trees are compiled once per occurrence into a
//! [`CompiledExpression`]. Function IRIs are resolved at compile time
//! (unknown IRIs are fatal); evaluation errors are not fatal and are handled
//! by the consuming stage: `BIND` binds the unbound sentinel, `FILTER` drops
//! the solution, `HAVING` drops the group.

mod aggregates;
mod builtins;
pub(crate) mod operators;
mod registry;

pub(crate) use aggregates::{compile_aggregate, CompiledAggregate};
pub use operators::order_terms;
pub use registry::{CustomFunction, FunctionRegistry};

use crate::planner::Planner;
use crate::stages::Stage;
use futures::future::BoxFuture;
use futures::FutureExt;
use futures::StreamExt;
use operators::{arithmetic, effective_boolean_value, equals, ArithOp, Numeric};
use sparflow_common::{EvaluationError, ExpressionError};
use sparflow_model::{Bindings, Iri, Literal, NamedNode, Term, Variable};
use spargebra::algebra::{Expression, Function};
use std::cmp::Ordering;
use std::sync::Arc;

/// A SPARQL expression compiled for repeated evaluation against solution
/// mappings.
#[derive(Clone)]
pub struct CompiledExpression(Arc<Expr>);

enum Expr {
    Constant(Term),
    Variable(Variable),
    Or(CompiledExpression, CompiledExpression),
    And(CompiledExpression, CompiledExpression),
    Not(CompiledExpression),
    Compare(Ordering, bool, CompiledExpression, CompiledExpression),
    Equal(CompiledExpression, CompiledExpression),
    SameTerm(CompiledExpression, CompiledExpression),
    In(CompiledExpression, Vec<CompiledExpression>),
    Arith(ArithOp, CompiledExpression, CompiledExpression),
    UnaryPlus(CompiledExpression),
    UnaryMinus(CompiledExpression),
    Bound(Variable),
    If(CompiledExpression, CompiledExpression, CompiledExpression),
    Coalesce(Vec<CompiledExpression>),
    Exists(Stage),
    Builtin(Function, Vec<CompiledExpression>, Option<Iri<String>>),
    Custom(NamedNode, CustomFunction, Vec<CompiledExpression>),
}

/// Compiles an expression tree, resolving function IRIs against the
/// registry. Sub-patterns of `EXISTS` are planned through `planner`.
pub(crate) fn compile_expression(
    planner: &Planner<'_>,
    expression: &Expression,
) -> Result<CompiledExpression, EvaluationError> {
    let compile = |e: &Expression| compile_expression(planner, e);
    let compile_all = |es: &[Expression]| {
        es.iter()
            .map(compile)
            .collect::<Result<Vec<_>, EvaluationError>>()
    };

    let node = match expression {
        Expression::NamedNode(node) => Expr::Constant(node.clone().into()),
        Expression::Literal(literal) => Expr::Constant(literal.clone().into()),
        Expression::Variable(variable) => Expr::Variable(variable.clone()),
        Expression::Or(a, b) => Expr::Or(compile(a)?, compile(b)?),
        Expression::And(a, b) => Expr::And(compile(a)?, compile(b)?),
        Expression::Not(a) => Expr::Not(compile(a)?),
        Expression::Equal(a, b) => Expr::Equal(compile(a)?, compile(b)?),
        Expression::SameTerm(a, b) => Expr::SameTerm(compile(a)?, compile(b)?),
        Expression::Greater(a, b) => Expr::Compare(Ordering::Greater, false, compile(a)?, compile(b)?),
        Expression::GreaterOrEqual(a, b) => {
            Expr::Compare(Ordering::Less, true, compile(a)?, compile(b)?)
        }
        Expression::Less(a, b) => Expr::Compare(Ordering::Less, false, compile(a)?, compile(b)?),
        Expression::LessOrEqual(a, b) => {
            Expr::Compare(Ordering::Greater, true, compile(a)?, compile(b)?)
        }
        Expression::In(a, list) => Expr::In(compile(a)?, compile_all(list)?),
        Expression::Add(a, b) => Expr::Arith(ArithOp::Add, compile(a)?, compile(b)?),
        Expression::Subtract(a, b) => Expr::Arith(ArithOp::Subtract, compile(a)?, compile(b)?),
        Expression::Multiply(a, b) => Expr::Arith(ArithOp::Multiply, compile(a)?, compile(b)?),
        Expression::Divide(a, b) => Expr::Arith(ArithOp::Divide, compile(a)?, compile(b)?),
        Expression::UnaryPlus(a) => Expr::UnaryPlus(compile(a)?),
        Expression::UnaryMinus(a) => Expr::UnaryMinus(compile(a)?),
        Expression::Bound(variable) => Expr::Bound(variable.clone()),
        Expression::If(c, t, e) => Expr::If(compile(c)?, compile(t)?, compile(e)?),
        Expression::Coalesce(es) => Expr::Coalesce(compile_all(es)?),
        Expression::Exists(pattern) => Expr::Exists(planner.plan(pattern)?),
        Expression::FunctionCall(Function::Custom(name), args) => {
            let registry = planner.functions();
            if registry.aggregate(name).is_some() {
                return Err(EvaluationError::AggregationOutsideGroup);
            }
            let function = registry
                .function(name)
                .ok_or_else(|| EvaluationError::UnknownFunction(name.clone()))?;
            Expr::Custom(name.clone(), Arc::clone(function), compile_all(args)?)
        }
        Expression::FunctionCall(function, args) => Expr::Builtin(
            function.clone(),
            compile_all(args)?,
            planner.base_iri().cloned(),
        ),
    };
    Ok(CompiledExpression(Arc::new(node)))
}

impl CompiledExpression {
    /// Evaluates the expression against one solution mapping.
    ///
    /// The future suspends only for `EXISTS` sub-queries; everything else is
    /// computed inline.
    pub fn evaluate<'a>(
        &'a self,
        solution: &'a Bindings,
    ) -> BoxFuture<'a, Result<Term, ExpressionError>> {
        async move {
            match self.0.as_ref() {
                Expr::Constant(term) => Ok(term.clone()),
                Expr::Variable(variable) => solution
                    .get(variable)
                    .cloned()
                    .ok_or_else(|| ExpressionError::UnboundVariable(variable.clone())),
                Expr::Or(a, b) => {
                    // SPARQL three-valued logic: an error on one side is
                    // recoverable if the other side is true.
                    let a = a.ebv(solution).await;
                    if matches!(a, Ok(true)) {
                        return Ok(bool_term(true));
                    }
                    let b = b.ebv(solution).await;
                    match (a, b) {
                        (Ok(true), _) | (_, Ok(true)) => Ok(bool_term(true)),
                        (Ok(false), Ok(false)) => Ok(bool_term(false)),
                        (Err(e), _) | (_, Err(e)) => Err(e),
                    }
                }
                Expr::And(a, b) => {
                    let a = a.ebv(solution).await;
                    if matches!(a, Ok(false)) {
                        return Ok(bool_term(false));
                    }
                    let b = b.ebv(solution).await;
                    match (a, b) {
                        (Ok(false), _) | (_, Ok(false)) => Ok(bool_term(false)),
                        (Ok(true), Ok(true)) => Ok(bool_term(true)),
                        (Err(e), _) | (_, Err(e)) => Err(e),
                    }
                }
                Expr::Not(a) => Ok(bool_term(!a.ebv(solution).await?)),
                Expr::Equal(a, b) => {
                    let a = a.evaluate(solution).await?;
                    let b = b.evaluate(solution).await?;
                    Ok(bool_term(equals(&a, &b)?))
                }
                Expr::SameTerm(a, b) => {
                    let a = a.evaluate(solution).await?;
                    let b = b.evaluate(solution).await?;
                    Ok(bool_term(a == b))
                }
                Expr::Compare(expected, or_equal, a, b) => {
                    let a = a.evaluate(solution).await?;
                    let b = b.evaluate(solution).await?;
                    let ordering = operators::compare(&a, &b)?;
                    let result = if *or_equal {
                        ordering != *expected
                    } else {
                        ordering == *expected
                    };
                    Ok(bool_term(result))
                }
                Expr::In(a, list) => {
                    let a = a.evaluate(solution).await?;
                    let mut error = None;
                    for member in list {
                        match member.evaluate(solution).await.and_then(|m| equals(&a, &m)) {
                            Ok(true) => return Ok(bool_term(true)),
                            Ok(false) => {}
                            Err(e) => error = Some(e),
                        }
                    }
                    match error {
                        Some(e) => Err(e),
                        None => Ok(bool_term(false)),
                    }
                }
                Expr::Arith(op, a, b) => {
                    let a = a.evaluate(solution).await?;
                    let b = b.evaluate(solution).await?;
                    arithmetic(*op, &a, &b)
                }
                Expr::UnaryPlus(a) => {
                    let a = a.evaluate(solution).await?;
                    // Checks that the operand is numeric and normalizes it.
                    Ok(operators::numeric_term(operators::numeric(&a)?))
                }
                Expr::UnaryMinus(a) => {
                    let a = a.evaluate(solution).await?;
                    let negated = match operators::numeric(&a)? {
                        Numeric::Integer(v) => Numeric::Integer(
                            v.checked_neg()
                                .ok_or_else(|| ExpressionError::type_error("integer overflow"))?,
                        ),
                        Numeric::Decimal(v) => Numeric::Decimal(
                            v.checked_neg()
                                .ok_or_else(|| ExpressionError::type_error("decimal overflow"))?,
                        ),
                        Numeric::Float(v) => Numeric::Float(-v),
                        Numeric::Double(v) => Numeric::Double(-v),
                    };
                    Ok(operators::numeric_term(negated))
                }
                Expr::Bound(variable) => Ok(bool_term(solution.contains(variable))),
                Expr::If(c, t, e) => {
                    if c.ebv(solution).await? {
                        t.evaluate(solution).await
                    } else {
                        e.evaluate(solution).await
                    }
                }
                Expr::Coalesce(es) => {
                    for e in es {
                        if let Ok(term) = e.evaluate(solution).await {
                            return Ok(term);
                        }
                    }
                    Err(ExpressionError::type_error("COALESCE had no valid argument"))
                }
                Expr::Exists(stage) => {
                    let mut results = stage(crate::pipeline::once(solution.clone()));
                    match results.next().await {
                        Some(Ok(_)) => Ok(bool_term(true)),
                        Some(Err(e)) => Err(ExpressionError::type_error(format!(
                            "EXISTS evaluation failed: {e}"
                        ))),
                        None => Ok(bool_term(false)),
                    }
                }
                Expr::Builtin(function, args, base_iri) => {
                    let mut evaluated = Vec::with_capacity(args.len());
                    for arg in args {
                        evaluated.push(arg.evaluate(solution).await?);
                    }
                    builtins::evaluate(function, &evaluated, base_iri.as_ref())
                }
                Expr::Custom(name, function, args) => {
                    let mut evaluated = Vec::with_capacity(args.len());
                    for arg in args {
                        evaluated.push(arg.evaluate(solution).await?);
                    }
                    function(&evaluated)
                        .ok_or_else(|| ExpressionError::FunctionFailure(name.clone()))
                }
            }
        }
        .boxed()
    }

    /// Evaluates the expression and reduces the result to its effective
    /// boolean value.
    pub fn ebv<'a>(
        &'a self,
        solution: &'a Bindings,
    ) -> BoxFuture<'a, Result<bool, ExpressionError>> {
        async move {
            let term = self.evaluate(solution).await?;
            effective_boolean_value(&term)
        }
        .boxed()
    }
}

/// The `xsd:boolean` literal term for `value`.
pub(crate) fn bool_term(value: bool) -> Term {
    Literal::from(value).into()
}
