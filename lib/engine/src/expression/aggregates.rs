//! Compilation and evaluation of SPARQL aggregates over solution groups.

use super::operators::{self, ArithOp};
use super::registry::CustomFunction;
use super::{compile_expression, CompiledExpression};
use crate::planner::Planner;
use itertools::Itertools;
use sparflow_common::{EvaluationError, ExpressionError};
use sparflow_model::vocab::xsd;
use sparflow_model::{Literal, NamedNode, SolutionGroup, Term};
use spargebra::algebra::{AggregateExpression, AggregateFunction};
use std::sync::Arc;

/// An aggregate compiled for evaluation against one [`SolutionGroup`].
pub(crate) struct CompiledAggregate {
    kind: AggregateKind,
    expr: Option<CompiledExpression>,
    distinct: bool,
    separator: Option<String>,
}

enum AggregateKind {
    CountSolutions,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Sample,
    GroupConcat,
    Custom(NamedNode, CustomFunction),
}

/// Compiles an aggregate expression, resolving custom aggregate IRIs.
pub(crate) fn compile_aggregate(
    planner: &Planner<'_>,
    expression: &AggregateExpression,
) -> Result<CompiledAggregate, EvaluationError> {
    match expression {
        AggregateExpression::CountSolutions { distinct } => Ok(CompiledAggregate {
            kind: AggregateKind::CountSolutions,
            expr: None,
            distinct: *distinct,
            separator: None,
        }),
        AggregateExpression::FunctionCall {
            name,
            expr,
            distinct,
        } => {
            let mut separator = None;
            let kind = match name {
                AggregateFunction::Count => AggregateKind::Count,
                AggregateFunction::Sum => AggregateKind::Sum,
                AggregateFunction::Avg => AggregateKind::Avg,
                AggregateFunction::Min => AggregateKind::Min,
                AggregateFunction::Max => AggregateKind::Max,
                AggregateFunction::Sample => AggregateKind::Sample,
                AggregateFunction::GroupConcat { separator: sep } => {
                    separator = sep.clone();
                    AggregateKind::GroupConcat
                }
                AggregateFunction::Custom(name) => {
                    let aggregate = planner
                        .functions()
                        .aggregate(name)
                        .ok_or_else(|| EvaluationError::UnknownFunction(name.clone()))?;
                    AggregateKind::Custom(name.clone(), Arc::clone(aggregate))
                }
            };
            Ok(CompiledAggregate {
                kind,
                expr: Some(compile_expression(planner, expr)?),
                distinct: *distinct,
                separator,
            })
        }
    }
}

impl CompiledAggregate {
    /// The per-row input expression, absent for `COUNT(*)`.
    pub(crate) fn input(&self) -> Option<&CompiledExpression> {
        self.expr.as_ref()
    }

    /// Reduces the collected column of one group to the aggregate result.
    pub(crate) fn finish(
        &self,
        group: &SolutionGroup,
        column: &[Term],
    ) -> Result<Term, ExpressionError> {
        let column: Vec<&Term> = if self.distinct {
            // DISTINCT deduplicates by the canonical N-Triples form.
            column.iter().unique_by(|term| term.to_string()).collect()
        } else {
            column.iter().collect()
        };

        match &self.kind {
            AggregateKind::CountSolutions => {
                let count = if self.distinct {
                    group.distinct_len()
                } else {
                    group.len()
                };
                Ok(int_term(count))
            }
            AggregateKind::Count => Ok(int_term(column.len())),
            AggregateKind::Sum => {
                let mut sum = int_term(0);
                for term in column {
                    sum = operators::arithmetic(ArithOp::Add, &sum, term)?;
                }
                Ok(sum)
            }
            AggregateKind::Avg => {
                if column.is_empty() {
                    return Ok(int_term(0));
                }
                let count = column.len();
                let mut sum = int_term(0);
                for term in column {
                    sum = operators::arithmetic(ArithOp::Add, &sum, term)?;
                }
                operators::arithmetic(ArithOp::Divide, &sum, &int_term(count))
            }
            AggregateKind::Min => column
                .into_iter()
                .min_by(|a, b| operators::order_terms(Some(*a), Some(*b)))
                .cloned()
                .ok_or_else(|| ExpressionError::type_error("MIN over an empty group")),
            AggregateKind::Max => column
                .into_iter()
                .max_by(|a, b| operators::order_terms(Some(*a), Some(*b)))
                .cloned()
                .ok_or_else(|| ExpressionError::type_error("MAX over an empty group")),
            AggregateKind::Sample => column
                .first()
                .copied()
                .cloned()
                .ok_or_else(|| ExpressionError::type_error("SAMPLE over an empty group")),
            AggregateKind::GroupConcat => {
                let separator = self.separator.as_deref().unwrap_or(" ");
                let joined = column
                    .into_iter()
                    .map(|term| match term {
                        Term::Literal(literal) => literal.value().to_owned(),
                        term => term.to_string(),
                    })
                    .join(separator);
                Ok(Literal::new_simple_literal(joined).into())
            }
            AggregateKind::Custom(name, aggregate) => {
                let column: Vec<Term> = column.into_iter().cloned().collect();
                aggregate(&column).ok_or_else(|| ExpressionError::FunctionFailure(name.clone()))
            }
        }
    }
}

fn int_term(value: usize) -> Term {
    Literal::new_typed_literal(value.to_string(), xsd::INTEGER).into()
}
