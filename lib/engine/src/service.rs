//! Federated query support: handlers for `SERVICE` patterns.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use sparflow_common::{BindingsStream, EvaluationError};
use sparflow_model::NamedNode;
use spargebra::algebra::GraphPattern;
use std::sync::Arc;

/// Evaluates the inner pattern of a `SERVICE` clause against a remote
/// endpoint.
///
/// The engine ships no HTTP client; a handler owns the transport and result
/// parsing and hands back a stream of solutions.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Evaluates `pattern` against the service `name`.
    async fn handle(
        &self,
        name: &NamedNode,
        pattern: &GraphPattern,
    ) -> Result<BindingsStream, EvaluationError>;
}

/// Registry of [`ServiceHandler`]s keyed by service IRI, with an optional
/// fallback handler.
#[derive(Clone, Default)]
pub struct ServiceHandlerRegistry {
    handlers: FxHashMap<NamedNode, Arc<dyn ServiceHandler>>,
    default: Option<Arc<dyn ServiceHandler>>,
}

impl ServiceHandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for the given service IRI.
    pub fn insert(&mut self, name: NamedNode, handler: Arc<dyn ServiceHandler>) {
        self.handlers.insert(name, handler);
    }

    /// Registers the handler used when no service-specific handler matches.
    pub fn set_default(&mut self, handler: Arc<dyn ServiceHandler>) {
        self.default = Some(handler);
    }

    /// Resolves the handler for `name`, falling back to the default handler.
    pub fn resolve(&self, name: &NamedNode) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers
            .get(name)
            .or(self.default.as_ref())
            .map(Arc::clone)
    }
}
