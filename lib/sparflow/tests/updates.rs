mod common;

use common::*;
use futures::FutureExt;
use sparflow::model::{GraphName, Quad};
use sparflow::{PlanBuilder, Prepared, QueryOptions};
use std::sync::Arc;

async fn run_update(builder: &PlanBuilder, update: &str) -> Result<(), sparflow::EvaluationError> {
    match builder.build(update, QueryOptions::default()).await? {
        Prepared::Update(plan) => plan.execute().await,
        Prepared::Query(_) => panic!("expected an update"),
    }
}

#[tokio::test]
async fn create_graph_registers_it() {
    let builder = PlanBuilder::new(dataset_with([]));
    run_update(&builder, "CREATE GRAPH <http://example.com/g>")
        .await
        .unwrap();
    assert!(builder.dataset().contains_named_graph(&node("g")));

    // Creating it again fails, unless SILENT.
    let result = run_update(&builder, "CREATE GRAPH <http://example.com/g>").await;
    assert!(matches!(
        result,
        Err(sparflow::EvaluationError::GraphAlreadyExists(_))
    ));
    run_update(&builder, "CREATE SILENT GRAPH <http://example.com/g>")
        .await
        .unwrap();
}

#[tokio::test]
async fn insert_data_into_default_and_named_graphs() {
    let builder = PlanBuilder::new(dataset_with([]));
    run_update(
        &builder,
        "INSERT DATA { \
           <http://example.com/a> <http://example.com/p> <http://example.com/b> . \
           GRAPH <http://example.com/g> { \
             <http://example.com/c> <http://example.com/p> <http://example.com/d> } }",
    )
    .await
    .unwrap();

    let rows = select(&builder, "SELECT ?s WHERE { ?s ?p ?o }").await.unwrap();
    assert_eq!(rows.len(), 1);
    let rows = select(
        &builder,
        "SELECT ?s WHERE { GRAPH <http://example.com/g> { ?s ?p ?o } }",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn delete_data_removes_triples() {
    let builder = PlanBuilder::new(dataset_with([triple("a", "p", "b")]));
    run_update(
        &builder,
        "DELETE DATA { <http://example.com/a> <http://example.com/p> <http://example.com/b> }",
    )
    .await
    .unwrap();
    let rows = select(&builder, "SELECT ?s WHERE { ?s ?p ?o }").await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn delete_insert_where_rewrites_predicates() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "old", "x"),
        triple("b", "old", "y"),
    ]));
    run_update(
        &builder,
        "DELETE { ?s <http://example.com/old> ?o } \
         INSERT { ?s <http://example.com/new> ?o } \
         WHERE { ?s <http://example.com/old> ?o }",
    )
    .await
    .unwrap();

    let old = select(&builder, "SELECT ?s WHERE { ?s <http://example.com/old> ?o }")
        .await
        .unwrap();
    assert!(old.is_empty());
    let new = select(&builder, "SELECT ?s WHERE { ?s <http://example.com/new> ?o }")
        .await
        .unwrap();
    assert_eq!(new.len(), 2);
}

#[tokio::test]
async fn drop_and_clear_graphs() {
    let builder = PlanBuilder::new(dataset_with([triple("a", "p", "b")]));
    run_update(
        &builder,
        "INSERT DATA { GRAPH <http://example.com/g> { \
           <http://example.com/c> <http://example.com/p> <http://example.com/d> } }",
    )
    .await
    .unwrap();

    run_update(&builder, "CLEAR DEFAULT").await.unwrap();
    let rows = select(&builder, "SELECT ?s WHERE { ?s ?p ?o }").await.unwrap();
    assert!(rows.is_empty());

    run_update(&builder, "DROP GRAPH <http://example.com/g>")
        .await
        .unwrap();
    assert!(!builder.dataset().contains_named_graph(&node("g")));

    let result = run_update(&builder, "DROP GRAPH <http://example.com/g>").await;
    assert!(matches!(
        result,
        Err(sparflow::EvaluationError::GraphDoesNotExist(_))
    ));
    run_update(&builder, "DROP SILENT GRAPH <http://example.com/g>")
        .await
        .unwrap();
}

#[tokio::test]
async fn load_goes_through_the_injected_loader() {
    let mut builder = PlanBuilder::new(dataset_with([]));
    builder.set_loader(Arc::new(|source| {
        async move {
            if source.as_str().ends_with("ok.ttl") {
                Ok(vec![Quad::new(
                    node("a"),
                    node("p"),
                    node("b"),
                    GraphName::DefaultGraph,
                )])
            } else {
                Err("unreachable document".into())
            }
        }
        .boxed()
    }));

    run_update(&builder, "LOAD <http://example.com/ok.ttl>")
        .await
        .unwrap();
    let rows = select(&builder, "SELECT ?s WHERE { ?s ?p ?o }").await.unwrap();
    assert_eq!(rows.len(), 1);

    let result = run_update(&builder, "LOAD <http://example.com/missing.ttl>").await;
    assert!(matches!(result, Err(sparflow::EvaluationError::Load(_, _))));
    run_update(&builder, "LOAD SILENT <http://example.com/missing.ttl>")
        .await
        .unwrap();
}

#[tokio::test]
async fn failing_operation_aborts_the_remaining_ones() {
    let builder = PlanBuilder::new(dataset_with([]));
    let result = run_update(
        &builder,
        "CREATE GRAPH <http://example.com/g> ; \
         CREATE GRAPH <http://example.com/g> ; \
         CREATE GRAPH <http://example.com/h>",
    )
    .await;

    assert!(result.is_err());
    assert!(builder.dataset().contains_named_graph(&node("g")));
    // The third operation never ran.
    assert!(!builder.dataset().contains_named_graph(&node("h")));
}
