//! The bound-join strategy: batches of input solutions are rewritten into a
//! single union of renamed BGPs and dispatched to the graph in one bulk
//! call.

use crate::pipeline;
use futures::future::ready;
use futures::StreamExt;
use sparflow_common::{eval_bgp, eval_union, BindingsStream, EvaluationError, ExecutionContext, Graph};
use sparflow_model::pattern::pattern_variables;
use sparflow_model::{Bindings, Term, TriplePattern, Variable};
use spargebra::term::{NamedNodePattern, TermPattern};
use std::sync::Arc;

/// How many input solutions are rewritten into one bulk request.
pub(crate) const BOUND_JOIN_BATCH_SIZE: usize = 15;

/// Separates the original variable name from the batch row index in renamed
/// variables.
const RENAME_MARKER: &str = "_sfbj_";

/// Joins `input` with `patterns` using batched bulk requests against a graph
/// advertising union support.
pub(crate) fn execute(
    input: BindingsStream,
    graph: Arc<dyn Graph>,
    ctx: ExecutionContext,
    patterns: Arc<Vec<TriplePattern>>,
) -> BindingsStream {
    input
        .chunks(BOUND_JOIN_BATCH_SIZE)
        .map(move |batch| process_batch(&graph, &ctx, &patterns, batch))
        .flatten()
        .boxed()
}

fn process_batch(
    graph: &Arc<dyn Graph>,
    ctx: &ExecutionContext,
    patterns: &Arc<Vec<TriplePattern>>,
    batch: Vec<Result<Bindings, EvaluationError>>,
) -> BindingsStream {
    let mut streams: Vec<BindingsStream> = Vec::new();
    let mut rows: Vec<Bindings> = Vec::new();
    let mut renamed: Vec<Vec<TriplePattern>> = Vec::new();

    for item in batch {
        match item {
            Err(e) => streams.push(pipeline::once_error(e)),
            Ok(row) => {
                let bound: Vec<TriplePattern> =
                    patterns.iter().map(|p| row.bound(p)).collect();
                let mut variables = Vec::new();
                for pattern in &bound {
                    pattern_variables(pattern, &mut variables);
                }
                if variables.is_empty() {
                    // A fully bound BGP cannot be multiplexed by variable
                    // renaming; probe it individually.
                    let results = eval_bgp(graph, &bound, ctx);
                    streams.push(pipeline::map(results, move |_| row.clone()));
                } else {
                    let index = renamed.len();
                    renamed.push(bound.iter().map(|p| rename_pattern(p, index)).collect());
                    rows.push(row);
                }
            }
        }
    }

    if !renamed.is_empty() {
        let results = eval_union(graph, &renamed, ctx);
        let rows = Arc::new(rows);
        streams.push(
            results
                .filter_map(move |item| {
                    let result = match item {
                        Err(e) => Some(Err(e)),
                        Ok(solution) => demultiplex(&rows, &solution).transpose(),
                    };
                    ready(result)
                })
                .boxed(),
        );
    }

    pipeline::merge(streams)
}

/// Renames every variable of `pattern` to encode the batch row it belongs
/// to.
fn rename_pattern(pattern: &TriplePattern, index: usize) -> TriplePattern {
    TriplePattern {
        subject: rename_term(&pattern.subject, index),
        predicate: match &pattern.predicate {
            NamedNodePattern::Variable(v) => NamedNodePattern::Variable(rename(v, index)),
            constant => constant.clone(),
        },
        object: rename_term(&pattern.object, index),
    }
}

fn rename_term(pattern: &TermPattern, index: usize) -> TermPattern {
    match pattern {
        TermPattern::Variable(v) => TermPattern::Variable(rename(v, index)),
        constant => constant.clone(),
    }
}

fn rename(variable: &Variable, index: usize) -> Variable {
    Variable::new_unchecked(format!("{}{}{}", variable.as_str(), RENAME_MARKER, index))
}

/// Routes one bulk result back to its batch row and restores the original
/// variable names.
fn demultiplex(
    rows: &[Bindings],
    solution: &Bindings,
) -> Result<Option<Bindings>, EvaluationError> {
    let mut index = None;
    let mut restored = Bindings::new();
    for (variable, term) in solution.iter() {
        let Some((name, suffix)) = variable.as_str().rsplit_once(RENAME_MARKER) else {
            return Err(EvaluationError::internal(format!(
                "the graph backend dropped the bound-join marker from ?{}",
                variable.as_str()
            )));
        };
        let row: usize = suffix.parse().map_err(|_| {
            EvaluationError::internal("malformed bound-join row marker")
        })?;
        match index {
            None => index = Some(row),
            Some(previous) if previous != row => {
                return Err(EvaluationError::internal(
                    "a bulk result mixes bindings of two batch rows",
                ))
            }
            Some(_) => {}
        }
        restored.insert(Variable::new_unchecked(name), term.clone());
    }

    let Some(index) = index else {
        return Ok(None);
    };
    let row = rows.get(index).ok_or_else(|| {
        EvaluationError::internal("bound-join row marker out of range")
    })?;
    Ok(row.merge_compatible(&restored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparflow_model::NamedNode;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    #[test]
    fn rename_roundtrip() {
        let renamed = rename(&var("title"), 7);
        let (name, index) = renamed.as_str().rsplit_once(RENAME_MARKER).unwrap();
        assert_eq!(name, "title");
        assert_eq!(index, "7");
    }

    #[test]
    fn demultiplex_restores_row() {
        let rows = vec![
            Bindings::new(),
            [(var("s"), Term::from(NamedNode::new_unchecked("http://example.com/s")))]
                .into_iter()
                .collect(),
        ];
        let solution: Bindings = [(
            rename(&var("o"), 1),
            Term::from(NamedNode::new_unchecked("http://example.com/o")),
        )]
        .into_iter()
        .collect();

        let restored = demultiplex(&rows, &solution).unwrap().unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(
            restored.get(&var("o")),
            Some(&NamedNode::new_unchecked("http://example.com/o").into())
        );
    }

    #[test]
    fn demultiplex_rejects_foreign_variables() {
        let solution: Bindings = [(
            var("plain"),
            Term::from(NamedNode::new_unchecked("http://example.com/o")),
        )]
        .into_iter()
        .collect();
        assert!(demultiplex(&[], &solution).is_err());
    }
}
