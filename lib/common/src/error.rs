use sparflow_model::{NamedNode, Variable};
use std::convert::Infallible;
use std::error::Error;
use std::io;

/// A SPARQL evaluation error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EvaluationError {
    /// An error in SPARQL parsing.
    #[error(transparent)]
    Parsing(#[from] spargebra::SparqlSyntaxError),
    /// The algebra tree contains a node kind the engine does not know.
    #[error("unsupported pattern: {0}")]
    UnsupportedPattern(String),
    /// The query type has no registered handler.
    #[error("unsupported query type: {0}")]
    UnsupportedQueryType(String),
    /// No stage is registered for an algebra node kind.
    #[error("no stage registered for {0} patterns")]
    MissingStage(&'static str),
    /// An expression references a function IRI that cannot be resolved.
    #[error("unknown function {0}")]
    UnknownFunction(NamedNode),
    /// An aggregate expression is used without an enclosing `GROUP BY`.
    #[error("aggregate used outside of a GROUP BY context")]
    AggregationOutsideGroup,
    /// An error from the graph backend.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A required graph is missing from the dataset.
    #[error("the graph {0} does not exist")]
    GraphDoesNotExist(NamedNode),
    /// Error when `CREATE` tries to create an already existing graph.
    #[error("the graph {0} already exists")]
    GraphAlreadyExists(NamedNode),
    /// Error during `SERVICE` evaluation.
    #[error("{0}")]
    Service(#[source] Box<dyn Error + Send + Sync + 'static>),
    /// The given `SERVICE` is not supported.
    #[error("the service {0} is not supported")]
    UnsupportedService(NamedNode),
    /// The variable storing the `SERVICE` name is unbound.
    #[error("the variable encoding the service name is unbound")]
    UnboundService,
    /// A malformed full-text-search query.
    #[error("invalid full-text search query: {0}")]
    InvalidSearchQuery(String),
    /// An error while executing a `LOAD` operation.
    #[error("cannot load {0}: {1}")]
    Load(NamedNode, #[source] Box<dyn Error + Send + Sync + 'static>),
    /// An internal error that likely indicates a bug in Sparflow.
    #[error("an internal error occurred: {0}")]
    Internal(String),
}

impl EvaluationError {
    /// Builds an internal error from a printable message.
    pub fn internal(cause: impl Into<String>) -> Self {
        EvaluationError::Internal(cause.into())
    }
}

impl From<Infallible> for EvaluationError {
    #[inline]
    fn from(error: Infallible) -> Self {
        match error {}
    }
}

/// An error raised by a graph backend (reads, writes, searches).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GraphError {
    /// Error from the OS I/O layer.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The backend does not support the requested operation.
    #[error("the graph does not support {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Other(#[source] Box<dyn Error + Send + Sync + 'static>),
}

impl GraphError {
    /// Wraps an arbitrary backend error.
    pub fn other(error: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        Self::Other(error.into())
    }
}

/// An error raised while evaluating a SPARQL expression.
///
/// These errors are never fatal on their own: `BIND` converts them into the
/// unbound sentinel, `FILTER` drops the solution, `HAVING` drops the group.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExpressionError {
    /// A variable the expression needs is absent from the solution.
    #[error("the variable {0} is not bound")]
    UnboundVariable(Variable),
    /// The operands have types the operator does not accept.
    #[error("type error: {0}")]
    TypeError(String),
    /// A malformed literal was encountered (e.g. `"abc"^^xsd:integer`).
    #[error("malformed literal: {0}")]
    MalformedLiteral(String),
    /// A custom function signalled failure by returning no term.
    #[error("the function {0} produced no result")]
    FunctionFailure(NamedNode),
}

impl ExpressionError {
    /// Builds a type error from a printable message.
    pub fn type_error(cause: impl Into<String>) -> Self {
        ExpressionError::TypeError(cause.into())
    }
}
