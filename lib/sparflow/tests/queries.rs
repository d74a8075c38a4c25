mod common;

use common::*;
use sparflow::model::{is_unbound, Literal, NamedNode, Term, Variable};
use sparflow::{PlanBuilder, QueryOptions, QueryResults};

fn var(name: &str) -> Variable {
    Variable::new_unchecked(name)
}

#[tokio::test]
async fn select_all_triples() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "p", "b"),
        triple("b", "p", "c"),
    ]));
    let rows = select(&builder, "SELECT ?s ?p ?o WHERE { ?s ?p ?o }")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.len(), 3);
    }
}

#[tokio::test]
async fn join_over_two_patterns() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "knows", "b"),
        triple("b", "name", "n1"),
        triple("c", "name", "n2"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?x ?n WHERE { <http://example.com/a> <http://example.com/knows> ?x . \
         ?x <http://example.com/name> ?n }",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(&var("n")), Some(&node("n1").into()));
}

#[tokio::test]
async fn custom_filter_function_keeps_matching_rows() {
    // Three authors match, two do not.
    let builder = {
        let mut builder = PlanBuilder::new(dataset_with([
            literal_triple("p1", "name", Literal::new_simple_literal("Thomas Minier")),
            literal_triple("p2", "name", Literal::new_simple_literal("Thomas Pellissier")),
            literal_triple("p3", "name", Literal::new_simple_literal("Jean Thomas")),
            literal_triple("p4", "name", Literal::new_simple_literal("Arnaud Grall")),
            literal_triple("p5", "name", Literal::new_simple_literal("Pascal Molli")),
        ]));
        builder.register_custom_function(
            NamedNode::new_unchecked("https://example.org/test#CONTAINS_THOMAS"),
            |args| match args.first()? {
                Term::Literal(literal) => Some(Literal::from(literal.value().contains("Thomas")).into()),
                _ => Some(Literal::from(false).into()),
            },
        );
        builder
    };

    let rows = select(
        &builder,
        "SELECT ?s ?o WHERE { ?s ?p ?o \
         FILTER(<https://example.org/test#CONTAINS_THOMAS>(?o)) }",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn custom_bind_function_reverses_language_literal() {
    let mut builder = PlanBuilder::new(dataset_with([literal_triple(
        "author",
        "name",
        Literal::new_language_tagged_literal_unchecked("Thomas Minier", "en"),
    )]));
    builder.register_custom_function(
        NamedNode::new_unchecked("https://example.org/test#REVERSE"),
        |args| match args.first()? {
            Term::Literal(literal) => {
                let reversed: String = literal.value().chars().rev().collect();
                Some(match literal.language() {
                    Some(lang) => {
                        Literal::new_language_tagged_literal_unchecked(reversed, lang).into()
                    }
                    None => Literal::new_simple_literal(reversed).into(),
                })
            }
            _ => None,
        },
    );

    let rows = select(
        &builder,
        "SELECT ?reversed WHERE { ?s ?p ?o . \
         BIND(<https://example.org/test#REVERSE>(?o) AS ?reversed) }",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get(&var("reversed")),
        Some(&Literal::new_language_tagged_literal_unchecked("reiniM samohT", "en").into())
    );
}

#[tokio::test]
async fn failing_bind_function_yields_unbound_sentinel() {
    let mut builder = PlanBuilder::new(dataset_with([
        triple("a", "p", "b"),
        triple("b", "p", "c"),
    ]));
    builder.register_custom_function(
        NamedNode::new_unchecked("https://example.org/test#FAIL"),
        |_| None,
    );

    let rows = select(
        &builder,
        "SELECT ?s ?error WHERE { ?s ?p ?o . \
         BIND(<https://example.org/test#FAIL>(?o) AS ?error) }",
    )
    .await
    .unwrap();

    // One mapping per input; the target variable carries the sentinel.
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let error = row.get(&var("error")).unwrap();
        assert!(is_unbound(error.as_ref()));
    }
}

#[tokio::test]
async fn values_rewriting_unions_substituted_bodies() {
    let builder = PlanBuilder::new(dataset_with([
        triple("1", "p", "a"),
        triple("2", "p", "b"),
        triple("3", "p", "c"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?s ?o WHERE { ?s ?p ?o . \
         VALUES ?s { <http://example.com/1> <http://example.com/2> } }",
    )
    .await
    .unwrap();

    let keys = canonical(rows);
    assert_eq!(keys.len(), 2);
    assert!(keys[0].contains("http://example.com/1"));
    assert!(keys[1].contains("http://example.com/2"));
}

#[tokio::test]
async fn optional_keeps_unmatched_solutions() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "name", "n1"),
        triple("b", "name", "n2"),
        triple("a", "mbox", "m1"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?s ?m WHERE { ?s <http://example.com/name> ?n \
         OPTIONAL { ?s <http://example.com/mbox> ?m } }",
    )
    .await
    .unwrap();

    assert_eq!(rows.len(), 2);
    let with_mbox = rows.iter().filter(|r| r.contains(&var("m"))).count();
    assert_eq!(with_mbox, 1);
}

#[tokio::test]
async fn minus_removes_compatible_solutions() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "p", "x"),
        triple("b", "p", "x"),
        triple("a", "banned", "yes"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?s WHERE { ?s <http://example.com/p> ?o \
         MINUS { ?s <http://example.com/banned> ?y } }",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(&var("s")), Some(&node("b").into()));
}

#[tokio::test]
async fn filter_errors_exclude_solutions_without_aborting() {
    let builder = PlanBuilder::new(dataset_with([
        literal_triple("a", "age", Literal::new_typed_literal("30", sparflow::model::vocab::xsd::INTEGER)),
        triple("b", "age", "not-a-number"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?s WHERE { ?s <http://example.com/age> ?age FILTER(?age > 18) }",
    )
    .await
    .unwrap();
    // The IRI-valued row errors in the comparison and is dropped.
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(&var("s")), Some(&node("a").into()));
}

#[tokio::test]
async fn order_by_sorts_numerics_by_value() {
    let int = |v: &str| {
        Literal::new_typed_literal(v, sparflow::model::vocab::xsd::INTEGER)
    };
    let builder = PlanBuilder::new(dataset_with([
        literal_triple("a", "age", int("10")),
        literal_triple("b", "age", int("2")),
        literal_triple("c", "age", int("30")),
    ]));
    let rows = select(
        &builder,
        "SELECT ?s WHERE { ?s <http://example.com/age> ?age } ORDER BY ?age",
    )
    .await
    .unwrap();
    let order: Vec<_> = rows.iter().map(|r| r.get(&var("s")).cloned().unwrap()).collect();
    assert_eq!(
        order,
        vec![node("b").into(), node("a").into(), node("c").into()]
    );
}

#[tokio::test]
async fn distinct_deduplicates_and_is_idempotent() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "p", "x"),
        triple("b", "p", "y"),
        triple("c", "q", "z"),
    ]));
    let rows = select(&builder, "SELECT DISTINCT ?p WHERE { ?s ?p ?o }")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let again = select(
        &builder,
        "SELECT DISTINCT ?p WHERE { SELECT DISTINCT ?p WHERE { ?s ?p ?o } }",
    )
    .await
    .unwrap();
    assert_eq!(canonical(again), canonical(rows));
}

#[tokio::test]
async fn aggregation_counts_per_group() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "p", "x"),
        triple("a", "p", "y"),
        triple("b", "p", "z"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?s (COUNT(?o) AS ?count) WHERE { ?s ?p ?o } GROUP BY ?s",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);
    let count_of = |s: &str| {
        rows.iter()
            .find(|r| r.get(&var("s")) == Some(&node(s).into()))
            .and_then(|r| r.get(&var("count")).cloned())
    };
    let int = |v: &str| {
        Term::from(Literal::new_typed_literal(v, sparflow::model::vocab::xsd::INTEGER))
    };
    assert_eq!(count_of("a"), Some(int("2")));
    assert_eq!(count_of("b"), Some(int("1")));
}

#[tokio::test]
async fn having_filters_groups() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "p", "x"),
        triple("a", "p", "y"),
        triple("b", "p", "z"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?s WHERE { ?s ?p ?o } GROUP BY ?s HAVING (COUNT(?o) > 1)",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(&var("s")), Some(&node("a").into()));
}

#[tokio::test]
async fn transitive_property_path() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "knows", "b"),
        triple("b", "knows", "c"),
        triple("c", "knows", "a"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?x WHERE { <http://example.com/a> <http://example.com/knows>+ ?x }",
    )
    .await
    .unwrap();
    // The cycle closes back over a itself.
    let keys = canonical(rows);
    assert_eq!(keys.len(), 3);
}

#[tokio::test]
async fn inverse_and_alternative_paths() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "knows", "b"),
        triple("c", "likes", "b"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?x WHERE { <http://example.com/b> ^(<http://example.com/knows>|<http://example.com/likes>) ?x }",
    )
    .await
    .unwrap();
    let keys = canonical(rows);
    assert_eq!(keys.len(), 2);
}

#[tokio::test]
async fn graph_variable_enumerates_named_graphs() {
    let dataset = dataset_with([]);
    let g1 = dataset.create_named_graph(&node("g1")).unwrap();
    g1.insert(&triple("a", "p", "b")).await.unwrap();
    let g2 = dataset.create_named_graph(&node("g2")).unwrap();
    g2.insert(&triple("c", "p", "d")).await.unwrap();

    let builder = PlanBuilder::new(dataset);
    let rows = select(&builder, "SELECT ?g ?s WHERE { GRAPH ?g { ?s ?p ?o } }")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert!(row.contains(&var("g")));
    }
}

#[tokio::test]
async fn ask_short_circuits() {
    let builder = PlanBuilder::new(dataset_with([triple("a", "p", "b")]));
    let query = spargebra::Query::parse("ASK { ?s ?p ?o }", None).unwrap();
    let QueryResults::Boolean(found) = builder
        .build_query(&query, QueryOptions::default())
        .await
        .unwrap()
    else {
        panic!("expected a boolean");
    };
    assert!(found);

    let query =
        spargebra::Query::parse("ASK { ?s <http://example.com/missing> ?o }", None).unwrap();
    let QueryResults::Boolean(found) = builder
        .build_query(&query, QueryOptions::default())
        .await
        .unwrap()
    else {
        panic!("expected a boolean");
    };
    assert!(!found);
}

#[tokio::test]
async fn construct_instantiates_template_and_drops_unbound() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "name", "n1"),
        triple("a", "mbox", "m1"),
        triple("b", "name", "n2"),
    ]));
    let query = spargebra::Query::parse(
        "CONSTRUCT { ?s <http://example.com/contact> ?m } WHERE { \
         ?s <http://example.com/name> ?n OPTIONAL { ?s <http://example.com/mbox> ?m } }",
        None,
    )
    .unwrap();
    let QueryResults::Graph(stream) = builder
        .build_query(&query, QueryOptions::default())
        .await
        .unwrap()
    else {
        panic!("expected triples");
    };
    let triples = stream.try_collect_to_vec().await.unwrap();
    // The solution without ?m cannot instantiate the template.
    assert_eq!(triples.len(), 1);
    assert_eq!(triples[0].object, node("m1").into());
}

#[tokio::test]
async fn describe_returns_resource_triples() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "name", "n1"),
        triple("a", "mbox", "m1"),
        triple("b", "name", "n2"),
    ]));
    let query = spargebra::Query::parse(
        "DESCRIBE ?s WHERE { ?s <http://example.com/name> <http://example.com/n1> }",
        None,
    )
    .unwrap();
    let QueryResults::Graph(stream) = builder
        .build_query(&query, QueryOptions::default())
        .await
        .unwrap()
    else {
        panic!("expected triples");
    };
    let mut triples = stream.try_collect_to_vec().await.unwrap();
    triples.sort_by_key(ToString::to_string);
    assert_eq!(triples.len(), 2);
    assert!(triples.iter().all(|t| t.subject == node("a").into()));
}

#[tokio::test]
async fn full_text_search_binds_relevance() {
    let builder = PlanBuilder::new(dataset_with([
        literal_triple("b1", "title", Literal::new_simple_literal("American Gods by Neil Gaiman")),
        literal_triple("b2", "title", Literal::new_simple_literal("Coraline, a Gaiman story")),
        literal_triple("b3", "title", Literal::new_simple_literal("Something else")),
    ]));
    let rows = select(
        &builder,
        "PREFIX ses: <https://sparflow.rs/search#> \
         SELECT ?s ?title ?score WHERE { \
           ?s <http://example.com/title> ?title . \
           ?title ses:search \"neil gaiman\" . \
           ?title ses:relevance ?score }",
    )
    .await
    .unwrap();

    assert_eq!(rows.len(), 2);
    for row in &rows {
        let Some(Term::Literal(score)) = row.get(&var("score")) else {
            panic!("expected a score literal");
        };
        assert_eq!(score.datatype(), sparflow::model::vocab::xsd::FLOAT);
    }
}

#[tokio::test]
async fn unknown_function_fails_at_build_time() {
    let builder = PlanBuilder::new(dataset_with([triple("a", "p", "b")]));
    let result = select(
        &builder,
        "SELECT ?x WHERE { ?s ?p ?o . BIND(<https://example.org/test#NOPE>(?o) AS ?x) }",
    )
    .await;
    assert!(matches!(
        result,
        Err(sparflow::EvaluationError::UnknownFunction(_))
    ));
}

#[tokio::test]
async fn exists_filter() {
    let builder = PlanBuilder::new(dataset_with([
        triple("a", "p", "x"),
        triple("b", "p", "y"),
        triple("a", "flag", "yes"),
    ]));
    let rows = select(
        &builder,
        "SELECT ?s WHERE { ?s <http://example.com/p> ?o \
         FILTER EXISTS { ?s <http://example.com/flag> ?f } }",
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(&var("s")), Some(&node("a").into()));
}
