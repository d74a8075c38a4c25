//! Solution-modifier stages: projection, DISTINCT/REDUCED, ORDER BY and
//! OFFSET/LIMIT.

use crate::expression::{compile_expression, order_terms, CompiledExpression};
use crate::pipeline;
use crate::planner::Planner;
use crate::stages::{Stage, StageBuilder};
use futures::future::ready;
use futures::StreamExt;
use rustc_hash::FxHashSet;
use sparflow_common::EvaluationError;
use sparflow_model::Term;
use spargebra::algebra::{GraphPattern, OrderExpression};
use std::cmp::Ordering;
use std::sync::Arc;

fn unexpected(kind: &str) -> EvaluationError {
    EvaluationError::internal(format!("the {kind} stage received a foreign pattern"))
}

/// `SELECT` projection. Subquery results are merged back into the outer
/// solution, so correlation variables survive the projection boundary.
pub(crate) struct ProjectStageBuilder;

impl StageBuilder for ProjectStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Project { inner, variables } = pattern else {
            return Err(unexpected("projection"));
        };
        let inner = planner.plan(inner)?;
        let variables = variables.clone();

        Ok(Arc::new(move |input| {
            let inner = Arc::clone(&inner);
            let variables = variables.clone();
            pipeline::flat_map(input, move |solution| {
                let variables = variables.clone();
                let outer = solution.clone();
                pipeline::map(inner(pipeline::once(solution)), move |result| {
                    outer.union(&result.project(&variables))
                })
            })
        }))
    }
}

/// `DISTINCT` and `REDUCED`: set-deduplication by canonical form, keeping
/// the first occurrence.
pub(crate) struct DistinctStageBuilder;

impl StageBuilder for DistinctStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let inner = match pattern {
            GraphPattern::Distinct { inner } | GraphPattern::Reduced { inner } => {
                planner.plan(inner)?
            }
            _ => return Err(unexpected("distinct")),
        };

        Ok(Arc::new(move |input| {
            let inner = Arc::clone(&inner);
            pipeline::flat_map(input, move |solution| {
                let mut seen = FxHashSet::default();
                inner(pipeline::once(solution))
                    .filter(move |item| {
                        let keep = match item {
                            Err(_) => true,
                            Ok(solution) => seen.insert(solution.canonical_form()),
                        };
                        ready(keep)
                    })
                    .boxed()
            })
        }))
    }
}

/// `ORDER BY`: a full-buffer point. The sort is stable, so equal keys keep
/// their source order.
pub(crate) struct OrderByStageBuilder;

impl StageBuilder for OrderByStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::OrderBy { inner, expression } = pattern else {
            return Err(unexpected("order by"));
        };
        let inner = planner.plan(inner)?;
        let comparators: Vec<(bool, CompiledExpression)> = expression
            .iter()
            .map(|e| match e {
                OrderExpression::Asc(e) => compile_expression(planner, e).map(|c| (true, c)),
                OrderExpression::Desc(e) => compile_expression(planner, e).map(|c| (false, c)),
            })
            .collect::<Result<_, _>>()?;
        let comparators = Arc::new(comparators);

        Ok(Arc::new(move |input| {
            let inner = Arc::clone(&inner);
            let comparators = Arc::clone(&comparators);
            pipeline::flat_map(input, move |solution| {
                let inner = Arc::clone(&inner);
                let comparators = Arc::clone(&comparators);
                pipeline::from_future(async move {
                    let rows = pipeline::collect(inner(pipeline::once(solution))).await?;

                    // Decorate each row with its sort keys; an erroring key
                    // sorts like an unbound value.
                    let mut keyed = Vec::with_capacity(rows.len());
                    for row in rows {
                        let mut keys: Vec<Option<Term>> =
                            Vec::with_capacity(comparators.len());
                        for (_, comparator) in comparators.iter() {
                            keys.push(comparator.evaluate(&row).await.ok());
                        }
                        keyed.push((keys, row));
                    }

                    keyed.sort_by(|(a, _), (b, _)| {
                        for (index, (ascending, _)) in comparators.iter().enumerate() {
                            let ordering =
                                order_terms(a[index].as_ref(), b[index].as_ref());
                            let ordering =
                                if *ascending { ordering } else { ordering.reverse() };
                            if ordering != Ordering::Equal {
                                return ordering;
                            }
                        }
                        Ordering::Equal
                    });

                    Ok(pipeline::from_iter(keyed.into_iter().map(|(_, row)| row)))
                })
            })
        }))
    }
}

/// `OFFSET` and `LIMIT`.
pub(crate) struct SliceStageBuilder;

impl StageBuilder for SliceStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Slice {
            inner,
            start,
            length,
        } = pattern
        else {
            return Err(unexpected("slice"));
        };
        let inner = planner.plan(inner)?;
        let start = *start;
        let length = *length;

        Ok(Arc::new(move |input| {
            let inner = Arc::clone(&inner);
            pipeline::flat_map(input, move |solution| {
                let mut stream = inner(pipeline::once(solution));
                if start > 0 {
                    stream = pipeline::skip(stream, start);
                }
                if let Some(length) = length {
                    stream = pipeline::limit(stream, length);
                }
                stream
            })
        }))
    }
}
