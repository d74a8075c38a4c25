//! Extraction and evaluation of full-text-search queries declared through
//! magic triples.

use crate::pipeline;
use futures::future::ready;
use futures::StreamExt;
use rustc_hash::FxHashMap;
use sparflow_common::{
    BindingsStream, EvaluationError, ExecutionContext, FullTextSearchParams, Graph,
};
use sparflow_model::pattern::unify_triple;
use sparflow_model::vocab::{search, xsd};
use sparflow_model::{Literal, NamedNode, TriplePattern, Variable};
use spargebra::term::TermPattern;
use std::sync::Arc;

/// A full-text-search query assembled from magic triples: the real triple
/// pattern being searched, the query variable, the search parameters and the
/// optional score/rank output variables.
#[derive(Debug, Clone)]
pub(crate) struct FullTextQuery {
    pub pattern: TriplePattern,
    pub variable: Variable,
    pub params: FullTextSearchParams,
    pub relevance_variable: Option<Variable>,
    pub rank_variable: Option<Variable>,
}

/// Splits a BGP into classic patterns and full-text-search queries.
///
/// Magic triples carry the query variable as subject and a predicate from the
/// search vocabulary. The first classic pattern mentioning the query variable
/// becomes the searched pattern and is removed from the BGP.
pub(crate) fn extract_full_text_queries(
    patterns: Vec<TriplePattern>,
) -> Result<(Vec<TriplePattern>, Vec<FullTextQuery>), EvaluationError> {
    let (magic, mut classic): (Vec<_>, Vec<_>) = patterns
        .into_iter()
        .partition(|p| magic_predicate(p).is_some());
    if magic.is_empty() {
        return Ok((classic, Vec::new()));
    }

    // Group the magic triples by their query variable.
    let mut grouped: FxHashMap<Variable, Vec<TriplePattern>> = FxHashMap::default();
    let mut order: Vec<Variable> = Vec::new();
    for triple in magic {
        let TermPattern::Variable(variable) = &triple.subject else {
            return Err(EvaluationError::InvalidSearchQuery(format!(
                "the subject of {triple} must be the query variable"
            )));
        };
        if !grouped.contains_key(variable) {
            order.push(variable.clone());
        }
        grouped.entry(variable.clone()).or_default().push(triple);
    }

    let mut queries = Vec::with_capacity(order.len());
    for variable in order {
        let magic = grouped.remove(&variable).unwrap_or_default();
        let position = classic
            .iter()
            .position(|p| mentions_variable(p, &variable))
            .ok_or_else(|| {
                EvaluationError::InvalidSearchQuery(format!(
                    "no triple pattern uses the query variable ?{}",
                    variable.as_str()
                ))
            })?;
        let pattern = classic.remove(position);
        queries.push(build_query(pattern, variable, &magic)?);
    }
    Ok((classic, queries))
}

fn magic_predicate(pattern: &TriplePattern) -> Option<&NamedNode> {
    match &pattern.predicate {
        spargebra::term::NamedNodePattern::NamedNode(node)
            if node.as_str().starts_with(search::NAMESPACE) =>
        {
            Some(node)
        }
        _ => None,
    }
}

fn mentions_variable(pattern: &TriplePattern, variable: &Variable) -> bool {
    pattern.subject == TermPattern::Variable(variable.clone())
        || pattern.predicate == spargebra::term::NamedNodePattern::Variable(variable.clone())
        || pattern.object == TermPattern::Variable(variable.clone())
}

fn build_query(
    pattern: TriplePattern,
    variable: Variable,
    magic: &[TriplePattern],
) -> Result<FullTextQuery, EvaluationError> {
    let mut query = FullTextQuery {
        pattern,
        variable,
        params: FullTextSearchParams::default(),
        relevance_variable: None,
        rank_variable: None,
    };

    for triple in magic {
        let Some(predicate) = magic_predicate(triple) else {
            continue;
        };
        let predicate = predicate.as_ref();
        if predicate == search::SEARCH {
            query.params.keywords = literal_object(triple)?
                .split_whitespace()
                .map(ToOwned::to_owned)
                .collect();
        } else if predicate == search::MATCH_ALL_TERMS {
            query.params.match_all = literal_object(triple)? == "true";
        } else if predicate == search::MIN_RELEVANCE {
            query.params.min_score = Some(float_object(triple)?);
        } else if predicate == search::MAX_RELEVANCE {
            query.params.max_score = Some(float_object(triple)?);
        } else if predicate == search::MIN_RANK {
            query.params.min_rank = Some(rank_object(triple)?);
        } else if predicate == search::MAX_RANK {
            query.params.max_rank = Some(rank_object(triple)?);
        } else if predicate == search::RELEVANCE {
            query.relevance_variable = Some(variable_object(triple)?);
        } else if predicate == search::RANK {
            query.rank_variable = Some(variable_object(triple)?);
        } else {
            return Err(EvaluationError::InvalidSearchQuery(format!(
                "unknown magic predicate {predicate}"
            )));
        }
    }

    if query.params.keywords.is_empty() {
        return Err(EvaluationError::InvalidSearchQuery(
            "a full-text search requires a non-empty search: keyword list".into(),
        ));
    }
    if let (Some(min), Some(max)) = (query.params.min_score, query.params.max_score) {
        if min > max {
            return Err(EvaluationError::InvalidSearchQuery(
                "minRelevance exceeds maxRelevance".into(),
            ));
        }
    }
    if let (Some(min), Some(max)) = (query.params.min_rank, query.params.max_rank) {
        if min > max {
            return Err(EvaluationError::InvalidSearchQuery(
                "minRank exceeds maxRank".into(),
            ));
        }
    }
    Ok(query)
}

fn literal_object(pattern: &TriplePattern) -> Result<String, EvaluationError> {
    match &pattern.object {
        TermPattern::Literal(literal) => Ok(literal.value().to_owned()),
        other => Err(EvaluationError::InvalidSearchQuery(format!(
            "{other} is not a literal"
        ))),
    }
}

fn float_object(pattern: &TriplePattern) -> Result<f64, EvaluationError> {
    let value = literal_object(pattern)?;
    value.parse().map_err(|_| {
        EvaluationError::InvalidSearchQuery(format!("{value} is not a number"))
    })
}

fn rank_object(pattern: &TriplePattern) -> Result<usize, EvaluationError> {
    let value = literal_object(pattern)?;
    value.parse().map_err(|_| {
        EvaluationError::InvalidSearchQuery(format!(
            "{value} is not a non-negative integer"
        ))
    })
}

fn variable_object(pattern: &TriplePattern) -> Result<Variable, EvaluationError> {
    match &pattern.object {
        TermPattern::Variable(variable) => Ok(variable.clone()),
        other => Err(EvaluationError::InvalidSearchQuery(format!(
            "{other} is not a variable"
        ))),
    }
}

/// Joins a stream of solutions with the full-text matches of one query.
///
/// Score and rank bind as `xsd:float` and `xsd:integer` when requested.
pub(crate) fn apply(
    graph: Arc<dyn Graph>,
    ctx: ExecutionContext,
    query: Arc<FullTextQuery>,
    input: BindingsStream,
) -> BindingsStream {
    pipeline::flat_map(input, move |solution| {
        let bound = solution.bound(&query.pattern);
        let matches = match graph.full_text_search(&bound, &query.variable, &query.params, &ctx)
        {
            Ok(matches) => matches,
            Err(e) => return pipeline::once_error(e.into()),
        };

        let query = Arc::clone(&query);
        let solution = solution.clone();
        matches
            .filter_map(move |item| {
                let result = match item {
                    Err(e) => Some(Err(e)),
                    Ok(found) => unify_triple(&query.pattern, &found.triple)
                        .and_then(|bindings| solution.merge_compatible(&bindings))
                        .map(|mut merged| {
                            if let Some(variable) = &query.relevance_variable {
                                merged.insert(
                                    variable.clone(),
                                    Literal::new_typed_literal(
                                        found.score.to_string(),
                                        xsd::FLOAT,
                                    )
                                    .into(),
                                );
                            }
                            if let Some(variable) = &query.rank_variable {
                                merged.insert(
                                    variable.clone(),
                                    Literal::new_typed_literal(
                                        found.rank.to_string(),
                                        xsd::INTEGER,
                                    )
                                    .into(),
                                );
                            }
                            Ok(merged)
                        }),
                };
                ready(result)
            })
            .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spargebra::term::NamedNodePattern;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn magic(subject: &str, predicate: sparflow_model::NamedNodeRef<'_>, object: &str) -> TriplePattern {
        TriplePattern {
            subject: TermPattern::Variable(var(subject)),
            predicate: NamedNodePattern::NamedNode(predicate.into_owned()),
            object: TermPattern::Literal(Literal::new_simple_literal(object)),
        }
    }

    fn data_pattern() -> TriplePattern {
        TriplePattern {
            subject: TermPattern::Variable(var("s")),
            predicate: NamedNodePattern::NamedNode(NamedNode::new_unchecked(
                "http://example.com/label",
            )),
            object: TermPattern::Variable(var("label")),
        }
    }

    #[test]
    fn extracts_query_and_removes_pattern() {
        let (classic, queries) = extract_full_text_queries(vec![
            data_pattern(),
            magic("label", search::SEARCH, "neil gaiman"),
            magic("label", search::MIN_RELEVANCE, "0.25"),
        ])
        .unwrap();

        assert!(classic.is_empty());
        assert_eq!(queries.len(), 1);
        let query = &queries[0];
        assert_eq!(query.variable, var("label"));
        assert_eq!(query.params.keywords, vec!["neil", "gaiman"]);
        assert_eq!(query.params.min_score, Some(0.25));
    }

    #[test]
    fn rejects_unordered_rank_bounds() {
        let result = extract_full_text_queries(vec![
            data_pattern(),
            magic("label", search::SEARCH, "neil"),
            magic("label", search::MIN_RANK, "5"),
            magic("label", search::MAX_RANK, "2"),
        ]);
        assert!(matches!(result, Err(EvaluationError::InvalidSearchQuery(_))));
    }

    #[test]
    fn rejects_malformed_scores() {
        let result = extract_full_text_queries(vec![
            data_pattern(),
            magic("label", search::SEARCH, "neil"),
            magic("label", search::MIN_RELEVANCE, "abc"),
        ]);
        assert!(matches!(result, Err(EvaluationError::InvalidSearchQuery(_))));
    }

    #[test]
    fn plain_bgp_passes_through() {
        let (classic, queries) = extract_full_text_queries(vec![data_pattern()]).unwrap();
        assert_eq!(classic.len(), 1);
        assert!(queries.is_empty());
    }
}
