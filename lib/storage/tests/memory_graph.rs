use futures::StreamExt;
use sparflow_common::{
    eval_bgp, ExecutionContext, FullTextSearchParams, Graph, GraphCapabilities,
};
use sparflow_model::{Literal, NamedNode, Triple, TriplePattern, Variable};
use sparflow_storage::MemoryGraph;
use spargebra::term::{NamedNodePattern, TermPattern};
use std::sync::Arc;

fn node(name: &str) -> NamedNode {
    NamedNode::new_unchecked(format!("http://example.com/{name}"))
}

fn triple(s: &str, p: &str, o: &str) -> Triple {
    Triple::new(node(s), node(p), node(o))
}

fn var(name: &str) -> Variable {
    Variable::new_unchecked(name)
}

fn any_pattern() -> TriplePattern {
    TriplePattern {
        subject: TermPattern::Variable(var("s")),
        predicate: NamedNodePattern::Variable(var("p")),
        object: TermPattern::Variable(var("o")),
    }
}

#[tokio::test]
async fn insert_and_find() {
    let graph = MemoryGraph::new();
    assert!(graph.insert(&triple("a", "p", "b")).await.unwrap());
    // Duplicate inserts have no effect.
    assert!(!graph.insert(&triple("a", "p", "b")).await.unwrap());
    assert_eq!(graph.len(), 1);

    let ctx = ExecutionContext::default();
    let found = graph
        .find(&any_pattern(), &ctx)
        .collect::<Vec<_>>()
        .await;
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn remove_and_clear() {
    let graph = MemoryGraph::from_triples([triple("a", "p", "b"), triple("c", "p", "d")]);
    assert!(graph.remove(&triple("a", "p", "b")).await.unwrap());
    assert!(!graph.remove(&triple("a", "p", "b")).await.unwrap());
    assert_eq!(graph.len(), 1);

    graph.clear().await.unwrap();
    assert!(graph.is_empty());
}

#[tokio::test]
async fn advertises_bulk_capabilities() {
    let graph = MemoryGraph::new();
    assert!(graph.capabilities().contains(GraphCapabilities::UNION));
    assert!(graph
        .capabilities()
        .contains(GraphCapabilities::ESTIMATE_CARDINALITY));
}

#[tokio::test]
async fn default_bgp_evaluation_joins_patterns() {
    let graph: Arc<dyn Graph> = Arc::new(MemoryGraph::from_triples([
        triple("a", "knows", "b"),
        triple("b", "name", "n"),
    ]));
    let patterns = vec![
        TriplePattern {
            subject: TermPattern::Variable(var("x")),
            predicate: NamedNodePattern::NamedNode(node("knows")),
            object: TermPattern::Variable(var("y")),
        },
        TriplePattern {
            subject: TermPattern::Variable(var("y")),
            predicate: NamedNodePattern::NamedNode(node("name")),
            object: TermPattern::Variable(var("n")),
        },
    ];

    let ctx = ExecutionContext::default();
    let mut results = eval_bgp(&graph, &patterns, &ctx);
    let first = results.next().await.unwrap().unwrap();
    assert_eq!(first.get(&var("x")), Some(&node("a").into()));
    assert_eq!(first.get(&var("n")), Some(&node("n").into()));
    assert!(results.next().await.is_none());
}

#[tokio::test]
async fn full_text_search_scores_and_ranks() {
    let graph = MemoryGraph::from_triples([
        Triple::new(node("b1"), node("title"), Literal::new_simple_literal("Neil Gaiman")),
        Triple::new(node("b2"), node("title"), Literal::new_simple_literal("Gaiman only")),
        Triple::new(node("b3"), node("title"), Literal::new_simple_literal("unrelated")),
    ]);
    let pattern = TriplePattern {
        subject: TermPattern::Variable(var("s")),
        predicate: NamedNodePattern::NamedNode(node("title")),
        object: TermPattern::Variable(var("t")),
    };

    let ctx = ExecutionContext::default();
    let params = FullTextSearchParams {
        keywords: vec!["neil".into(), "gaiman".into()],
        ..FullTextSearchParams::default()
    };
    let matches = graph
        .full_text_search(&pattern, &var("t"), &params, &ctx)
        .unwrap()
        .collect::<Vec<_>>()
        .await;

    let matches: Vec<_> = matches.into_iter().map(Result::unwrap).collect();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].rank, 0);
    assert!((matches[0].score - 1.0).abs() < f64::EPSILON);
    assert!(matches[0].score > matches[1].score);

    let match_all = FullTextSearchParams {
        match_all: true,
        ..params
    };
    let matches = graph
        .full_text_search(&pattern, &var("t"), &match_all, &ctx)
        .unwrap()
        .collect::<Vec<_>>()
        .await;
    assert_eq!(matches.len(), 1);
}
