//! The basic-graph-pattern stage.
//!
//! Preprocessing (at plan time): query hints are stripped into the context,
//! full-text-search magic triples are assembled into search queries, and
//! blank nodes are replaced by synthetic variables that are projected away
//! from the emitted solutions.
//!
//! Evaluation (per input solution): the active graph is resolved, the
//! substituted BGP is evaluated either through the semantic cache, through
//! the bound-join strategy (graphs advertising union support) or through a
//! plain index-nested-loop join, and full-text queries join afterwards.

use crate::pipeline;
use crate::planner::Planner;
use crate::stages::full_text::{self, FullTextQuery};
use crate::stages::{bound_join, resolve_graphs, ActiveGraph, ResolvedGraph, Stage, StageBuilder};
use futures::future::ready;
use futures::StreamExt;
use rustc_hash::{FxHashMap, FxHashSet};
use sparflow_common::{
    eval_bgp, BgpCache, BindingsStream, CanonicalBgp, Dataset, EvaluationError,
    ExecutionContext, Graph, GraphCapabilities, WriterId,
};
use sparflow_model::vocab::hints;
use sparflow_model::{BlankNode, Bindings, GraphName, Literal, Term, TriplePattern, Variable};
use spargebra::algebra::GraphPattern;
use spargebra::term::{NamedNodePattern, TermPattern};
use std::sync::Arc;

pub(crate) struct BgpStageBuilder;

impl StageBuilder for BgpStageBuilder {
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let GraphPattern::Bgp { patterns } = pattern else {
            return Err(EvaluationError::internal(
                "the BGP stage received a foreign pattern",
            ));
        };

        let ctx = planner.ctx().clone();
        let patterns = extract_hints(patterns.clone(), &ctx);
        let (patterns, queries) = full_text::extract_full_text_queries(patterns)?;
        let (patterns, synthetic) = replace_blank_nodes(patterns);

        let dataset = planner.dataset().clone();
        let active = planner.active_graph();
        let patterns = Arc::new(patterns);
        let queries: Arc<Vec<Arc<FullTextQuery>>> =
            Arc::new(queries.into_iter().map(Arc::new).collect());
        let synthetic = Arc::new(synthetic);

        Ok(Arc::new(move |input| {
            let out = evaluate(
                input,
                &dataset,
                &ctx,
                &active,
                &patterns,
                &queries,
            );
            project_synthetic(out, Arc::clone(&synthetic))
        }))
    }
}

fn evaluate(
    input: BindingsStream,
    dataset: &Dataset,
    ctx: &ExecutionContext,
    active: &ActiveGraph,
    patterns: &Arc<Vec<TriplePattern>>,
    queries: &Arc<Vec<Arc<FullTextQuery>>>,
) -> BindingsStream {
    // The bound-join strategy needs a solution-independent target graph and
    // runs without the cache; the cache path keys entries per substituted
    // BGP, which requires the per-solution walk.
    let solution_independent = matches!(active, ActiveGraph::Default | ActiveGraph::Named(_));
    if solution_independent && ctx.cache().is_none() && !ctx.force_index_join() {
        match resolve_graphs(dataset, ctx, active, &Bindings::new()) {
            Err(e) => return pipeline::once_error(e),
            Ok(mut targets) => {
                if targets.len() == 1 {
                    let target = targets.remove(0);
                    if target.graph.capabilities().contains(GraphCapabilities::UNION) {
                        let mut out = bound_join::execute(
                            input,
                            Arc::clone(&target.graph),
                            ctx.clone(),
                            Arc::clone(patterns),
                        );
                        for query in queries.iter() {
                            out = full_text::apply(
                                Arc::clone(&target.graph),
                                ctx.clone(),
                                Arc::clone(query),
                                out,
                            );
                        }
                        return out;
                    }
                }
            }
        }
    }

    let dataset = dataset.clone();
    let ctx = ctx.clone();
    let active = active.clone();
    let patterns = Arc::clone(patterns);
    let queries = Arc::clone(queries);
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
                    Arc::clone(&patterns),
                    Arc::clone(&queries),
                )
            })
            .collect::<Vec<_>>();
        pipeline::merge(streams)
    })
}

/// Index-joins one input solution with the BGP against one resolved graph,
/// going through the semantic cache when one is attached.
fn eval_target(
    target: ResolvedGraph,
    solution: Bindings,
    ctx: ExecutionContext,
    patterns: Arc<Vec<TriplePattern>>,
    queries: Arc<Vec<Arc<FullTextQuery>>>,
) -> BindingsStream {
    let ResolvedGraph {
        graph,
        name,
        binding,
    } = target;

    let mut solution = solution;
    if let Some((variable, graph_name)) = binding {
        solution.insert(variable, graph_name.into());
    }

    let bound: Vec<TriplePattern> = patterns.iter().map(|p| solution.bound(p)).collect();
    let cache = ctx.cache().map(Arc::clone);
    let results = {
        let graph = Arc::clone(&graph);
        let ctx = ctx.clone();
        pipeline::from_future(async move {
            let ordered = order_by_cardinality(&graph, bound).await;
            match cache {
                Some(cache) => cached_eval(cache, graph, name, ctx, ordered).await,
                None => Ok(eval_bgp(&graph, &ordered, &ctx)),
            }
        })
    };

    let outer = solution.clone();
    let mut out = results
        .filter_map(move |item| {
            ready(match item {
                Err(e) => Some(Err(e)),
                Ok(found) => outer.merge_compatible(&found).map(Ok),
            })
        })
        .boxed();
    for query in queries.iter() {
        out = full_text::apply(Arc::clone(&graph), ctx.clone(), Arc::clone(query), out);
    }
    out
}

/// Evaluates a BGP through the semantic cache: committed subsets are reused
/// and joined with the missing patterns, misses are staged and committed
/// once the evaluation completes.
async fn cached_eval(
    cache: Arc<dyn BgpCache>,
    graph: Arc<dyn Graph>,
    graph_name: GraphName,
    ctx: ExecutionContext,
    patterns: Vec<TriplePattern>,
) -> Result<BindingsStream, EvaluationError> {
    let key = CanonicalBgp::new(patterns.iter().cloned(), graph_name);

    if let Some((subset, missing)) = cache.find_subset(&key).await {
        tracing::debug!(
            patterns = subset.patterns().len(),
            missing = missing.len(),
            "bgp cache subset hit"
        );
        let rows = cache.get(&subset).await.unwrap_or_default();
        if missing.is_empty() {
            return Ok(pipeline::from_iter(rows));
        }
        let missing = Arc::new(missing);
        return Ok(pipeline::flat_map(
            pipeline::from_iter(rows),
            move |cached| {
                let bound: Vec<TriplePattern> =
                    missing.iter().map(|p| cached.bound(p)).collect();
                let cached = cached.clone();
                eval_bgp(&graph, &bound, &ctx)
                    .filter_map(move |item| {
                        ready(match item {
                            Err(e) => Some(Err(e)),
                            Ok(found) => cached.merge_compatible(&found).map(Ok),
                        })
                    })
                    .boxed()
            },
        ));
    }

    let writer = WriterId::fresh();
    tracing::debug!("bgp cache miss, staging as writer {writer:?}");
    Ok(tee_into_cache(
        eval_bgp(&graph, &patterns, &ctx),
        cache,
        key,
        writer,
    ))
}

/// Streams every produced solution into the cache staging buffer and commits
/// when the source completes. An upstream error abandons the staged rows.
fn tee_into_cache(
    stream: BindingsStream,
    cache: Arc<dyn BgpCache>,
    key: CanonicalBgp,
    writer: WriterId,
) -> BindingsStream {
    futures::stream::unfold(
        (stream, cache, key, writer, false),
        |(mut stream, cache, key, writer, done)| async move {
            if done {
                return None;
            }
            match stream.next().await {
                Some(Ok(solution)) => {
                    cache.update(&key, solution.clone(), writer).await;
                    Some((Ok(solution), (stream, cache, key, writer, false)))
                }
                Some(Err(e)) => {
                    cache.abandon(&key, writer).await;
                    Some((Err(e), (stream, cache, key, writer, true)))
                }
                None => {
                    cache.commit(&key, writer).await;
                    None
                }
            }
        },
    )
    .boxed()
}

/// Orders patterns by estimated cardinality, most selective first.
/// Estimation failures are non-fatal: the textual order is kept.
async fn order_by_cardinality(
    graph: &Arc<dyn Graph>,
    patterns: Vec<TriplePattern>,
) -> Vec<TriplePattern> {
    if patterns.len() <= 1
        || !graph
            .capabilities()
            .contains(GraphCapabilities::ESTIMATE_CARDINALITY)
    {
        return patterns;
    }
    let mut estimates = Vec::with_capacity(patterns.len());
    for pattern in &patterns {
        match graph.estimate_cardinality(pattern).await {
            Ok(estimate) => estimates.push(estimate),
            Err(_) => return patterns,
        }
    }
    let mut indexed: Vec<(usize, TriplePattern)> = patterns.into_iter().enumerate().collect();
    indexed.sort_by_key(|(index, _)| (estimates[*index], *index));
    indexed.into_iter().map(|(_, pattern)| pattern).collect()
}

/// Strips query-hint triples from the BGP, merging their values into the
/// context hint map.
fn extract_hints(patterns: Vec<TriplePattern>, ctx: &ExecutionContext) -> Vec<TriplePattern> {
    patterns
        .into_iter()
        .filter(|pattern| {
            let NamedNodePattern::NamedNode(predicate) = &pattern.predicate else {
                return true;
            };
            if !predicate.as_str().starts_with(hints::NAMESPACE) {
                return true;
            }
            let value = match &pattern.object {
                TermPattern::NamedNode(node) => Term::NamedNode(node.clone()),
                TermPattern::Literal(literal) => Term::Literal(literal.clone()),
                // A hint without a concrete value is just a flag.
                _ => Literal::from(true).into(),
            };
            ctx.record_hint(predicate.clone(), value);
            false
        })
        .collect()
}

/// Replaces blank nodes with fresh variables, returning the set of synthetic
/// variables to project away from final solutions.
fn replace_blank_nodes(
    patterns: Vec<TriplePattern>,
) -> (Vec<TriplePattern>, FxHashSet<Variable>) {
    let mut mapping: FxHashMap<BlankNode, Variable> = FxHashMap::default();
    let patterns = patterns
        .into_iter()
        .map(|pattern| TriplePattern {
            subject: replace_blank_term(pattern.subject, &mut mapping),
            predicate: pattern.predicate,
            object: replace_blank_term(pattern.object, &mut mapping),
        })
        .collect();
    (patterns, mapping.into_values().collect())
}

fn replace_blank_term(
    pattern: TermPattern,
    mapping: &mut FxHashMap<BlankNode, Variable>,
) -> TermPattern {
    match pattern {
        TermPattern::BlankNode(node) => {
            let next = mapping.len();
            let variable = mapping
                .entry(node)
                .or_insert_with(|| Variable::new_unchecked(format!("sf_bnode_{next}")))
                .clone();
            TermPattern::Variable(variable)
        }
        other => other,
    }
}

fn project_synthetic(
    stream: BindingsStream,
    synthetic: Arc<FxHashSet<Variable>>,
) -> BindingsStream {
    if synthetic.is_empty() {
        return stream;
    }
    pipeline::map(stream, move |solution| solution.without(&synthetic))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    #[test]
    fn blank_nodes_become_fresh_variables() {
        let blank = BlankNode::new_unchecked("b0");
        let pattern = TriplePattern {
            subject: TermPattern::BlankNode(blank.clone()),
            predicate: NamedNodePattern::Variable(var("p")),
            object: TermPattern::BlankNode(blank),
        };
        let (patterns, synthetic) = replace_blank_nodes(vec![pattern]);
        assert_eq!(synthetic.len(), 1);
        let TermPattern::Variable(subject) = &patterns[0].subject else {
            panic!("expected a variable");
        };
        assert_eq!(patterns[0].object, TermPattern::Variable(subject.clone()));
        assert!(synthetic.contains(subject));
    }

    #[test]
    fn hint_triples_are_stripped_and_recorded() {
        let ctx = ExecutionContext::default();
        let hint = TriplePattern {
            subject: TermPattern::Variable(var("s")),
            predicate: NamedNodePattern::NamedNode(hints::FORCE_INDEX_JOIN.into_owned()),
            object: TermPattern::Literal(Literal::from(true)),
        };
        let data = TriplePattern {
            subject: TermPattern::Variable(var("s")),
            predicate: NamedNodePattern::Variable(var("p")),
            object: TermPattern::Variable(var("o")),
        };
        let remaining = extract_hints(vec![hint, data.clone()], &ctx);
        assert_eq!(remaining, vec![data]);
        assert!(ctx.force_index_join());
    }
}
