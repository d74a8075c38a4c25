use crate::error::{EvaluationError, GraphError};
use crate::{
    ExecutionContext, FullTextSearchParams, FullTextStream, Graph, GraphCapabilities, TripleStream,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use sparflow_model::{GraphName, NamedNode, Triple, TriplePattern, Variable};
use std::sync::Arc;

/// Creates graph instances for named graphs that do not exist yet.
pub type GraphFactory = Arc<dyn Fn(&NamedNode) -> Arc<dyn Graph> + Send + Sync>;

/// An RDF dataset: a default graph plus a map from IRIs to named graphs.
///
/// The named-graph map is read-mostly during query evaluation; updates go
/// through the update engine, which holds one graph handle at a time.
#[derive(Clone)]
pub struct Dataset {
    default_graph: Arc<dyn Graph>,
    named: Arc<DashMap<NamedNode, Arc<dyn Graph>>>,
    factory: Option<GraphFactory>,
}

impl Dataset {
    /// Creates a dataset around the given default graph.
    pub fn new(default_graph: Arc<dyn Graph>) -> Self {
        Self {
            default_graph,
            named: Arc::new(DashMap::new()),
            factory: None,
        }
    }

    /// Installs a factory used to create missing named graphs (`CREATE`
    /// updates, and graph variables when auto-creation is enabled).
    #[must_use]
    pub fn with_factory(mut self, factory: GraphFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// The default graph.
    pub fn default_graph(&self) -> &Arc<dyn Graph> {
        &self.default_graph
    }

    /// Returns the named graph registered under `name`.
    pub fn named_graph(&self, name: &NamedNode) -> Option<Arc<dyn Graph>> {
        self.named.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Checks whether a named graph is registered under `name`.
    pub fn contains_named_graph(&self, name: &NamedNode) -> bool {
        self.named.contains_key(name)
    }

    /// Registers `graph` under `name`. Returns `false` when a graph with that
    /// name already existed (the existing graph is kept).
    pub fn insert_named_graph(&self, name: NamedNode, graph: Arc<dyn Graph>) -> bool {
        let mut inserted = false;
        self.named.entry(name).or_insert_with(|| {
            inserted = true;
            graph
        });
        inserted
    }

    /// Creates an empty named graph through the factory and registers it.
    pub fn create_named_graph(&self, name: &NamedNode) -> Result<Arc<dyn Graph>, GraphError> {
        let factory = self
            .factory
            .as_ref()
            .ok_or(GraphError::Unsupported("graph creation"))?;
        let graph = factory(name);
        self.named.entry(name.clone()).or_insert_with(|| Arc::clone(&graph));
        // Someone may have raced us; hand out whatever is registered now.
        Ok(self.named_graph(name).unwrap_or(graph))
    }

    /// Removes the named graph registered under `name`.
    pub fn remove_named_graph(&self, name: &NamedNode) -> Option<Arc<dyn Graph>> {
        self.named.remove(name).map(|(_, graph)| graph)
    }

    /// The names of all registered named graphs.
    pub fn named_graph_names(&self) -> Vec<NamedNode> {
        self.named.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Resolves a graph name to a graph handle.
    ///
    /// Missing named graphs are created through the factory when
    /// `auto_create` is set; otherwise resolution fails with
    /// [`EvaluationError::GraphDoesNotExist`].
    pub fn resolve(
        &self,
        name: &GraphName,
        auto_create: bool,
    ) -> Result<Arc<dyn Graph>, EvaluationError> {
        match name {
            GraphName::DefaultGraph => Ok(Arc::clone(&self.default_graph)),
            GraphName::NamedNode(name) => match self.named_graph(name) {
                Some(graph) => Ok(graph),
                None if auto_create => Ok(self.create_named_graph(name)?),
                None => Err(EvaluationError::GraphDoesNotExist(name.clone())),
            },
            GraphName::BlankNode(_) => Err(EvaluationError::internal(
                "blank node graph names are not supported",
            )),
        }
    }
}

/// A synthetic read-only graph over the union of several member graphs.
///
/// Used when a query selects several `FROM` graphs: triple patterns match the
/// merged triples of all members.
pub struct UnionGraph {
    members: Vec<Arc<dyn Graph>>,
}

impl UnionGraph {
    /// Creates a union over the given members.
    pub fn new(members: Vec<Arc<dyn Graph>>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl Graph for UnionGraph {
    fn capabilities(&self) -> GraphCapabilities {
        // Bulk operations cannot be dispatched through a synthetic union;
        // only estimation survives, and only if every member supports it.
        self.members
            .iter()
            .map(|g| g.capabilities())
            .fold(GraphCapabilities::ESTIMATE_CARDINALITY, |acc, caps| {
                acc.intersection(caps)
            })
    }

    fn find(&self, pattern: &TriplePattern, ctx: &ExecutionContext) -> TripleStream {
        stream::select_all(self.members.iter().map(|g| g.find(pattern, ctx))).boxed()
    }

    async fn insert(&self, _triple: &Triple) -> Result<bool, GraphError> {
        Err(GraphError::Unsupported("writing through a union graph"))
    }

    async fn remove(&self, _triple: &Triple) -> Result<bool, GraphError> {
        Err(GraphError::Unsupported("writing through a union graph"))
    }

    async fn clear(&self) -> Result<(), GraphError> {
        Err(GraphError::Unsupported("writing through a union graph"))
    }

    async fn estimate_cardinality(&self, pattern: &TriplePattern) -> Result<usize, GraphError> {
        let mut total = 0;
        for member in &self.members {
            total += member.estimate_cardinality(pattern).await?;
        }
        Ok(total)
    }

    fn full_text_search(
        &self,
        pattern: &TriplePattern,
        variable: &Variable,
        params: &FullTextSearchParams,
        ctx: &ExecutionContext,
    ) -> Result<FullTextStream, GraphError> {
        let streams = self
            .members
            .iter()
            .map(|g| g.full_text_search(pattern, variable, params, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stream::select_all(streams).boxed())
    }
}

impl UnionGraph {
    /// The number of member graphs.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Checks whether the union has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
