use futures::stream::{Stream, StreamExt};
use sparflow_common::{BindingsStream, EvaluationError, TripleStream};
use sparflow_model::{Bindings, Triple, Variable};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Results of a SPARQL query.
pub enum QueryResults {
    /// Results of a `SELECT` query: a stream of solution mappings.
    Solutions(QuerySolutionStream),
    /// Results of a `CONSTRUCT` or `DESCRIBE` query: a stream of triples.
    Graph(QueryTripleStream),
    /// Result of an `ASK` query.
    Boolean(bool),
}

impl QueryResults {
    /// Extracts the solution stream of a `SELECT` result.
    pub fn into_solutions(self) -> Option<QuerySolutionStream> {
        match self {
            QueryResults::Solutions(stream) => Some(stream),
            _ => None,
        }
    }
}

/// A stream of solution mappings together with the projected variables.
pub struct QuerySolutionStream {
    variables: Arc<[Variable]>,
    inner: BindingsStream,
}

impl QuerySolutionStream {
    /// Creates a stream over `inner` projecting `variables`.
    pub fn new(variables: Arc<[Variable]>, inner: BindingsStream) -> Self {
        Self { variables, inner }
    }

    /// The variables this query projects.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Drains the stream into a vector. The first error aborts the
    /// collection.
    pub async fn try_collect_to_vec(mut self) -> Result<Vec<Bindings>, EvaluationError> {
        let mut result = Vec::new();
        while let Some(solution) = self.next().await {
            result.push(solution?);
        }
        Ok(result)
    }
}

impl Stream for QuerySolutionStream {
    type Item = Result<Bindings, EvaluationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// A stream of triples produced by a `CONSTRUCT` template.
pub struct QueryTripleStream {
    inner: TripleStream,
}

impl QueryTripleStream {
    /// Creates a triple stream over `inner`.
    pub fn new(inner: TripleStream) -> Self {
        Self { inner }
    }

    /// Drains the stream into a vector. The first error aborts the
    /// collection.
    pub async fn try_collect_to_vec(mut self) -> Result<Vec<Triple>, EvaluationError> {
        let mut result = Vec::new();
        while let Some(triple) = self.next().await {
            result.push(triple?);
        }
        Ok(result)
    }
}

impl Stream for QueryTripleStream {
    type Item = Result<Triple, EvaluationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
