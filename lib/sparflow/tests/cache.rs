mod common;

use common::*;
use sparflow::model::{GraphName, TriplePattern, Variable};
use sparflow::{BgpCache, CanonicalBgp, PlanBuilder, QueryOptions};
use spargebra::term::{NamedNodePattern, TermPattern};

fn spo_pattern() -> TriplePattern {
    TriplePattern {
        subject: TermPattern::Variable(Variable::new_unchecked("s")),
        predicate: NamedNodePattern::Variable(Variable::new_unchecked("p")),
        object: TermPattern::Variable(Variable::new_unchecked("o")),
    }
}

fn seventeen_triples() -> Vec<sparflow::model::Triple> {
    (0..17)
        .map(|i| triple(&format!("s{i}"), "p", &format!("o{i}")))
        .collect()
}

const UNION_DOUBLING: &str =
    "SELECT ?s ?p ?o WHERE { { ?s ?p ?o } UNION { ?s ?p ?o } }";

#[tokio::test]
async fn union_doubling_fills_the_cache() {
    let mut builder = PlanBuilder::new(dataset_with(seventeen_triples()));
    builder.use_cache();

    let rows = select(&builder, UNION_DOUBLING).await.unwrap();
    assert_eq!(rows.len(), 34);

    let cache = builder.cache().unwrap();
    assert_eq!(cache.count().await, 1);
    let key = CanonicalBgp::new([spo_pattern()], GraphName::DefaultGraph);
    assert!(cache.has(&key).await);
    assert_eq!(cache.get(&key).await.unwrap().len(), 17);
}

#[tokio::test]
async fn second_query_reuses_the_cached_bgp() {
    let mut builder = PlanBuilder::new(dataset_with(seventeen_triples()));
    builder.use_cache();

    select(&builder, "SELECT ?s ?p ?o WHERE { ?s ?p ?o }")
        .await
        .unwrap();
    assert_eq!(builder.cache().unwrap().count().await, 1);

    // A superset BGP finds the cached subset and only evaluates the rest.
    let rows = select(
        &builder,
        "SELECT ?s ?o WHERE { ?s ?p ?o . ?s <http://example.com/p> ?o }",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 17);
}

#[tokio::test]
async fn limit_disables_the_cache() {
    let mut builder = PlanBuilder::new(dataset_with(seventeen_triples()));
    builder.use_cache();

    let rows = select(&builder, &format!("{UNION_DOUBLING} LIMIT 10"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(builder.cache().unwrap().count().await, 0);
}

#[tokio::test]
async fn offset_disables_the_cache_too() {
    let mut builder = PlanBuilder::new(dataset_with(seventeen_triples()));
    builder.use_cache();

    let rows = select(&builder, &format!("{UNION_DOUBLING} OFFSET 30"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(builder.cache().unwrap().count().await, 0);
}

#[tokio::test]
async fn bound_join_matches_index_join_results() {
    let mut triples = seventeen_triples();
    triples.extend((0..17).map(|i| triple(&format!("s{i}"), "q", &format!("v{i}"))));
    let builder = PlanBuilder::new(dataset_with(triples));

    let query = "SELECT ?s ?o ?v WHERE { \
                 ?s <http://example.com/p> ?o . ?s <http://example.com/q> ?v }";

    let bound = select(&builder, query).await.unwrap();
    let index = select_with_options(
        &builder,
        query,
        QueryOptions {
            force_index_join: true,
            ..QueryOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(bound.len(), 17);
    assert_eq!(canonical(bound), canonical(index));
}

#[tokio::test]
async fn force_index_join_hint_is_recorded() {
    let builder = PlanBuilder::new(dataset_with(seventeen_triples()));
    // The magic triple is stripped from the BGP and lands in the context.
    let rows = select(
        &builder,
        "PREFIX hint: <https://sparflow.rs/hints#> \
         SELECT ?s WHERE { ?s ?p ?o . ?s hint:forceIndexJoin true }",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 17);
}
