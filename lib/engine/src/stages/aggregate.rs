//! The `GROUP BY` / aggregation stage, a full-buffer point.

use crate::expression::CompiledAggregate;
use crate::pipeline;
use crate::planner::Planner;
use crate::stages::{Stage, StageBuilder};
use futures::StreamExt;
use rustc_hash::FxHashMap;
use sparflow_common::EvaluationError;
use sparflow_model::{Bindings, SolutionGroup, Variable};
use spargebra::algebra::GraphPattern;
use std::sync::Arc;

/// Groups the inner solutions by the grouping variables and reduces every
/// group with the compiled aggregates.
///
/// Aggregate input expressions are evaluated per row while the groups are
/// built; rows where an input errors contribute nothing to that aggregate.
/// An aggregate whose reduction fails leaves its target variable unbound.
pub(crate) struct GroupStageBuilder;

impl StageBuilder for GroupStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Group {
            inner,
            variables,
            aggregates,
        } = pattern
        else {
            return Err(EvaluationError::internal(
                "the aggregation stage received a foreign pattern",
            ));
        };
        let inner = planner.plan(inner)?;
        let group_vars = variables.clone();
        let aggregates: Vec<(Variable, CompiledAggregate)> = aggregates
            .iter()
            .map(|(variable, aggregate)| {
                crate::expression::compile_aggregate(planner, aggregate)
                    .map(|compiled| (variable.clone(), compiled))
            })
            .collect::<Result<_, _>>()?;
        let aggregates = Arc::new(aggregates);

        Ok(Arc::new(move |input| {
            let inner = Arc::clone(&inner);
            let group_vars = group_vars.clone();
            let aggregates = Arc::clone(&aggregates);
            pipeline::flat_map(input, move |solution| {
                let inner = Arc::clone(&inner);
                let group_vars = group_vars.clone();
                let aggregates = Arc::clone(&aggregates);
                pipeline::from_future(async move {
                    let mut stream = inner(pipeline::once(solution));
                    let mut groups: Vec<SolutionGroup> = Vec::new();
                    let mut index: FxHashMap<String, usize> = FxHashMap::default();

                    while let Some(row) = stream.next().await {
                        let row = row?;
                        let key = row.project(&group_vars);
                        let slot = *index.entry(key.canonical_form()).or_insert_with(|| {
                            groups.push(SolutionGroup::new(key));
                            groups.len() - 1
                        });
                        let group = &mut groups[slot];
                        group.record_row(&row);
                        for (target, aggregate) in aggregates.iter() {
                            if let Some(expression) = aggregate.input() {
                                if let Ok(term) = expression.evaluate(&row).await {
                                    group.push_term(target.clone(), term);
                                }
                            }
                        }
                    }

                    // Grouping without GROUP BY variables always produces one
                    // group, even over an empty input (COUNT(*) = 0).
                    if groups.is_empty() && group_vars.is_empty() {
                        groups.push(SolutionGroup::new(Bindings::new()));
                    }

                    let mut results = Vec::with_capacity(groups.len());
                    for group in &groups {
                        let mut result = group.key().clone();
                        for (target, aggregate) in aggregates.iter() {
                            match aggregate.finish(group, group.column(target)) {
                                Ok(term) => result.insert(target.clone(), term),
                                Err(_) => {}
                            }
                        }
                        results.push(result);
                    }
                    Ok(pipeline::from_iter(results))
                })
            })
        }))
    }
}
