#![allow(dead_code)]

use sparflow::model::{Bindings, Literal, NamedNode, Triple};
use sparflow::{Dataset, EvaluationError, MemoryGraph, PlanBuilder, QueryOptions, QueryResults};
use std::sync::Arc;

pub fn node(name: &str) -> NamedNode {
    NamedNode::new_unchecked(format!("http://example.com/{name}"))
}

pub fn triple(s: &str, p: &str, o: &str) -> Triple {
    Triple::new(node(s), node(p), node(o))
}

pub fn literal_triple(s: &str, p: &str, o: Literal) -> Triple {
    Triple::new(node(s), node(p), o)
}

pub fn dataset_with(triples: impl IntoIterator<Item = Triple>) -> Dataset {
    Dataset::new(Arc::new(MemoryGraph::from_triples(triples)))
        .with_factory(Arc::new(|_| Arc::new(MemoryGraph::new())))
}

pub async fn select(
    builder: &PlanBuilder,
    query: &str,
) -> Result<Vec<Bindings>, EvaluationError> {
    select_with_options(builder, query, QueryOptions::default()).await
}

pub async fn select_with_options(
    builder: &PlanBuilder,
    query: &str,
    options: QueryOptions,
) -> Result<Vec<Bindings>, EvaluationError> {
    let query = spargebra::Query::parse(query, None)?;
    match builder.build_query(&query, options).await? {
        QueryResults::Solutions(solutions) => solutions.try_collect_to_vec().await,
        _ => panic!("expected solutions"),
    }
}

/// Order-insensitive comparison key for result multisets.
pub fn canonical(mut rows: Vec<Bindings>) -> Vec<String> {
    let mut keys: Vec<String> = rows.drain(..).map(|r| r.canonical_form()).collect();
    keys.sort();
    keys
}
