//! Stages for the binary and unary algebra operators: joins, OPTIONAL,
//! UNION, MINUS, FILTER, BIND, VALUES, GRAPH and SERVICE.

use crate::expression::{compile_expression, CompiledExpression};
use crate::pipeline;
use crate::planner::Planner;
use crate::stages::{ActiveGraph, Stage, StageBuilder};
use futures::future::ready;
use futures::StreamExt;
use sparflow_common::EvaluationError;
use sparflow_model::{unbound, Bindings, GroundTerm, NamedNodePattern, Term, Variable};
use spargebra::algebra::GraphPattern;
use std::sync::Arc;

fn unexpected(kind: &str) -> EvaluationError {
    EvaluationError::internal(format!("the {kind} stage received a foreign pattern"))
}

/// Inner join: the right operand consumes the solutions of the left one
/// (index-join substitution semantics).
pub(crate) struct JoinStageBuilder;

impl StageBuilder for JoinStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Join { left, right } = pattern else {
            return Err(unexpected("join"));
        };
        let left = planner.plan(left)?;
        let right = planner.plan(right)?;
        Ok(Arc::new(move |input| right(left(input))))
    }
}

/// `OPTIONAL`: solutions of the left side are kept even when the right side
/// produces no compatible extension.
pub(crate) struct LeftJoinStageBuilder;

impl StageBuilder for LeftJoinStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } = pattern
        else {
            return Err(unexpected("optional"));
        };
        let left = planner.plan(left)?;
        let right = planner.plan(right)?;
        let filter = expression
            .as_ref()
            .map(|e| compile_expression(planner, e))
            .transpose()?;

        Ok(Arc::new(move |input| {
            let right = Arc::clone(&right);
            let filter = filter.clone();
            pipeline::flat_map(left(input), move |solution| {
                let right = Arc::clone(&right);
                let filter = filter.clone();
                pipeline::from_future(async move {
                    let candidates =
                        pipeline::collect(right(pipeline::once(solution.clone()))).await?;
                    let mut matched = Vec::new();
                    for candidate in candidates {
                        if eval_optional_filter(&filter, &candidate).await {
                            matched.push(candidate);
                        }
                    }
                    Ok(if matched.is_empty() {
                        pipeline::once(solution)
                    } else {
                        pipeline::from_iter(matched)
                    })
                })
            })
        }))
    }
}

async fn eval_optional_filter(filter: &Option<CompiledExpression>, solution: &Bindings) -> bool {
    match filter {
        None => true,
        // An error excludes the candidate, like in FILTER.
        Some(expression) => expression.ebv(solution).await.unwrap_or(false),
    }
}

/// `UNION`: both operands see every input solution; their outputs interleave.
pub(crate) struct UnionStageBuilder;

impl StageBuilder for UnionStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Union { left, right } = pattern else {
            return Err(unexpected("union"));
        };
        let left = planner.plan(left)?;
        let right = planner.plan(right)?;

        Ok(Arc::new(move |input| {
            let left = Arc::clone(&left);
            let right = Arc::clone(&right);
            pipeline::flat_map(input, move |solution| {
                pipeline::merge([
                    left(pipeline::once(solution.clone())),
                    right(pipeline::once(solution)),
                ])
            })
        }))
    }
}

/// `MINUS`: removes solutions that are compatible with some right-side
/// solution sharing at least one variable.
pub(crate) struct MinusStageBuilder;

impl StageBuilder for MinusStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Minus { left, right } = pattern else {
            return Err(unexpected("minus"));
        };
        let left = planner.plan(left)?;
        let right = planner.plan(right)?;

        Ok(Arc::new(move |input| {
            let right = Arc::clone(&right);
            let left_out = left(input);
            pipeline::from_future(async move {
                // The right side of MINUS is uncorrelated with the left: it
                // is evaluated once, against no input bindings, and buffered.
                let excluded =
                    pipeline::collect(right(pipeline::once(Bindings::new()))).await?;
                Ok(left_out
                    .filter(move |item| {
                        let keep = match item {
                            Err(_) => true,
                            Ok(solution) => !excluded.iter().any(|other| {
                                shares_domain(solution, other)
                                    && solution.is_compatible(other)
                            }),
                        };
                        ready(keep)
                    })
                    .boxed())
            })
        }))
    }
}

fn shares_domain(a: &Bindings, b: &Bindings) -> bool {
    a.variables().any(|variable| b.contains(variable))
}

/// `FILTER`: keeps the solutions whose effective boolean value is true.
/// Evaluation errors exclude the solution; the query continues.
pub(crate) struct FilterStageBuilder;

impl StageBuilder for FilterStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Filter { expr, inner } = pattern else {
            return Err(unexpected("filter"));
        };
        let inner = planner.plan(inner)?;
        let expression = compile_expression(planner, expr)?;

        Ok(Arc::new(move |input| {
            let expression = expression.clone();
            inner(input)
                .filter_map(move |item| {
                    let expression = expression.clone();
                    async move {
                        match item {
                            Err(e) => Some(Err(e)),
                            Ok(solution) => match expression.ebv(&solution).await {
                                Ok(true) => Some(Ok(solution)),
                                Ok(false) | Err(_) => None,
                            },
                        }
                    }
                })
                .boxed()
        }))
    }
}

/// `BIND`: extends every solution with the evaluated expression. A failed
/// evaluation binds the unbound sentinel; the solution is still emitted.
pub(crate) struct ExtendStageBuilder;

impl StageBuilder for ExtendStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Extend {
            inner,
            variable,
            expression,
        } = pattern
        else {
            return Err(unexpected("bind"));
        };
        let inner = planner.plan(inner)?;
        let expression = compile_expression(planner, expression)?;
        let variable = variable.clone();

        Ok(Arc::new(move |input| {
            let expression = expression.clone();
            let variable = variable.clone();
            inner(input)
                .then(move |item| {
                    let expression = expression.clone();
                    let variable = variable.clone();
                    async move {
                        let mut solution = item?;
                        let term = expression
                            .evaluate(&solution)
                            .await
                            .unwrap_or_else(|_| unbound());
                        solution.insert(variable, term);
                        Ok(solution)
                    }
                })
                .boxed()
        }))
    }
}

/// Inline `VALUES`: joins every input solution with the compatible rows.
pub(crate) struct ValuesStageBuilder;

impl StageBuilder for ValuesStageBuilder {
    fn build(
        &self,
        _planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Values {
            variables,
            bindings,
        } = pattern
        else {
            return Err(unexpected("values"));
        };
        let rows: Vec<Bindings> = bindings
            .iter()
            .map(|row| values_row(variables, row))
            .collect();

        Ok(Arc::new(move |input| {
            let rows = rows.clone();
            pipeline::flat_map(input, move |solution| {
                let joined: Vec<Bindings> = rows
                    .iter()
                    .filter_map(|row| solution.merge_compatible(row))
                    .collect();
                pipeline::from_iter(joined)
            })
        }))
    }
}

/// Converts one `VALUES` row into a solution mapping, skipping UNDEF cells.
pub(crate) fn values_row(variables: &[Variable], row: &[Option<GroundTerm>]) -> Bindings {
    variables
        .iter()
        .zip(row)
        .filter_map(|(variable, term)| {
            term.as_ref().map(|term| {
                let term = match term {
                    GroundTerm::NamedNode(node) => Term::NamedNode(node.clone()),
                    GroundTerm::Literal(literal) => Term::Literal(literal.clone()),
                };
                (variable.clone(), term)
            })
        })
        .collect()
}

/// `GRAPH`: scopes the inner pattern to a named graph or graph variable.
pub(crate) struct GraphStageBuilder;

impl StageBuilder for GraphStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Graph { name, inner } = pattern else {
            return Err(unexpected("graph"));
        };
        let active = match name {
            NamedNodePattern::NamedNode(name) => ActiveGraph::Named(name.clone()),
            NamedNodePattern::Variable(variable) => ActiveGraph::Variable(variable.clone()),
        };
        planner.plan_with_active_graph(active, inner)
    }
}

/// `SERVICE`: delegates the inner pattern to a registered service handler.
pub(crate) struct ServiceStageBuilder;

impl StageBuilder for ServiceStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Service {
            name,
            inner,
            silent,
        } = pattern
        else {
            return Err(unexpected("service"));
        };
        let handlers = planner.service_handlers().clone();
        let name = name.clone();
        let inner = inner.as_ref().clone();
        let silent = *silent;

        Ok(Arc::new(move |input| {
            let handlers = handlers.clone();
            let name = name.clone();
            let inner = inner.clone();
            pipeline::flat_map(input, move |solution| {
                let handlers = handlers.clone();
                let name = name.clone();
                let inner = inner.clone();
                pipeline::from_future(async move {
                    match call_service(&handlers, &name, &inner, &solution).await {
                        Ok(results) => {
                            let joined = results
                                .filter_map(move |item| {
                                    ready(match item {
                                        Err(e) => Some(Err(e)),
                                        Ok(other) => solution.merge_compatible(&other).map(Ok),
                                    })
                                })
                                .boxed();
                            Ok(joined)
                        }
                        // SILENT turns a failed service call into the unit
                        // solution.
                        Err(_) if silent => Ok(pipeline::once(solution)),
                        Err(e) => Err(e),
                    }
                })
            })
        }))
    }
}

async fn call_service(
    handlers: &crate::service::ServiceHandlerRegistry,
    name: &NamedNodePattern,
    pattern: &GraphPattern,
    solution: &Bindings,
) -> Result<sparflow_common::BindingsStream, EvaluationError> {
    let service = match name {
        NamedNodePattern::NamedNode(name) => name.clone(),
        NamedNodePattern::Variable(variable) => match solution.get(variable) {
            Some(Term::NamedNode(name)) => name.clone(),
            Some(term) => {
                return Err(EvaluationError::Service(
                    format!("{term} is not a valid service name").into(),
                ))
            }
            None => return Err(EvaluationError::UnboundService),
        },
    };
    let handler = handlers
        .resolve(&service)
        .ok_or_else(|| EvaluationError::UnsupportedService(service.clone()))?;
    handler.handle(&service, pattern).await
}
