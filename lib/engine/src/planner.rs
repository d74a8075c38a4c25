//! The plan builder: walks a parsed query, dispatches every algebra node to
//! its registered stage and wraps the result in the query-type modifier.

use crate::cache::LruBgpCache;
use crate::expression::FunctionRegistry;
use crate::pipeline;
use crate::results::{QueryResults, QuerySolutionStream, QueryTripleStream};
use crate::rewriting::{self, DefaultOptimizer, Optimizer};
use crate::service::{ServiceHandler, ServiceHandlerRegistry};
use crate::stages::{
    ActiveGraph, BgpStageBuilder, DistinctStageBuilder, ExtendStageBuilder, FilterStageBuilder,
    GraphStageBuilder, GroupStageBuilder, JoinStageBuilder, LeftJoinStageBuilder,
    MinusStageBuilder, OrderByStageBuilder, PathStageBuilder, PatternKind, ProjectStageBuilder,
    ServiceStageBuilder, SliceStageBuilder, Stage, StageBuilder, UnionStageBuilder,
    ValuesStageBuilder,
};
use crate::update::{Loader, UpdatePlan};
use futures::stream::{self, StreamExt};
use rustc_hash::FxHashMap;
use sparflow_common::{
    BgpCache, BindingsStream, Dataset, EvaluationError, ExecutionContext, QueryOptions,
};
use sparflow_model::{
    is_unbound, BlankNode, Bindings, GraphName, Iri, NamedNode, Subject, Term, Triple,
    TriplePattern, Variable,
};
use spargebra::algebra::{GraphPattern, QueryDataset};
use spargebra::term::{NamedNodePattern, TermPattern};
use spargebra::{Query, Update};
use std::cell::RefCell;
use std::sync::Arc;

/// Builds executable plans for SPARQL queries and updates over one
/// [`Dataset`].
///
/// The builder is long-lived: it owns the stage registry, the optimizer, the
/// optional semantic cache and the user-supplied function and service
/// registries. Every [`build`](Self::build) call derives a fresh execution
/// context.
pub struct PlanBuilder {
    dataset: Dataset,
    stages: FxHashMap<PatternKind, Arc<dyn StageBuilder>>,
    optimizer: Arc<dyn Optimizer>,
    cache: Option<Arc<dyn BgpCache>>,
    functions: FunctionRegistry,
    services: ServiceHandlerRegistry,
    loader: Option<Loader>,
}

/// A built request: either query results or an update ready for execution.
pub enum Prepared<'a> {
    /// A query, already evaluating lazily.
    Query(QueryResults),
    /// An update, executed on demand.
    Update(UpdatePlan<'a>),
}

impl PlanBuilder {
    /// Creates a plan builder over `dataset` with the default stages, the
    /// default rewriting passes and no cache.
    pub fn new(dataset: Dataset) -> Self {
        let mut builder = Self {
            dataset,
            stages: FxHashMap::default(),
            optimizer: Arc::new(DefaultOptimizer),
            cache: None,
            functions: FunctionRegistry::new(),
            services: ServiceHandlerRegistry::new(),
            loader: None,
        };
        builder.register_default_stages();
        builder
    }

    fn register_default_stages(&mut self) {
        self.register_stage(PatternKind::Bgp, Arc::new(BgpStageBuilder));
        self.register_stage(PatternKind::Path, Arc::new(PathStageBuilder));
        self.register_stage(PatternKind::Join, Arc::new(JoinStageBuilder));
        self.register_stage(PatternKind::LeftJoin, Arc::new(LeftJoinStageBuilder));
        self.register_stage(PatternKind::Filter, Arc::new(FilterStageBuilder));
        self.register_stage(PatternKind::Union, Arc::new(UnionStageBuilder));
        self.register_stage(PatternKind::Graph, Arc::new(GraphStageBuilder));
        self.register_stage(PatternKind::Extend, Arc::new(ExtendStageBuilder));
        self.register_stage(PatternKind::Minus, Arc::new(MinusStageBuilder));
        self.register_stage(PatternKind::Values, Arc::new(ValuesStageBuilder));
        self.register_stage(PatternKind::OrderBy, Arc::new(OrderByStageBuilder));
        self.register_stage(PatternKind::Project, Arc::new(ProjectStageBuilder));
        self.register_stage(PatternKind::Distinct, Arc::new(DistinctStageBuilder));
        self.register_stage(PatternKind::Reduced, Arc::new(DistinctStageBuilder));
        self.register_stage(PatternKind::Slice, Arc::new(SliceStageBuilder));
        self.register_stage(PatternKind::Group, Arc::new(GroupStageBuilder));
        self.register_stage(PatternKind::Service, Arc::new(ServiceStageBuilder));
    }

    /// Registers or replaces the stage builder for one node kind.
    pub fn register_stage(&mut self, kind: PatternKind, stage: Arc<dyn StageBuilder>) {
        self.stages.insert(kind, stage);
    }

    /// Replaces the plan-time rewriting passes.
    pub fn set_optimizer(&mut self, optimizer: Arc<dyn Optimizer>) {
        self.optimizer = optimizer;
    }

    /// Enables the default LRU semantic cache.
    pub fn use_cache(&mut self) {
        self.cache = Some(Arc::new(LruBgpCache::default()));
    }

    /// Enables a custom semantic cache.
    pub fn use_custom_cache(&mut self, cache: Arc<dyn BgpCache>) {
        self.cache = Some(cache);
    }

    /// Disables the semantic cache.
    pub fn disable_cache(&mut self) {
        self.cache = None;
    }

    /// The currently attached semantic cache.
    pub fn cache(&self) -> Option<&Arc<dyn BgpCache>> {
        self.cache.as_ref()
    }

    /// Registers a custom scalar function, usable by IRI in expressions.
    pub fn register_custom_function(
        &mut self,
        name: NamedNode,
        function: impl Fn(&[Term]) -> Option<Term> + Send + Sync + 'static,
    ) {
        self.functions.register_function(name, function);
    }

    /// Registers a custom aggregate, usable by IRI under `GROUP BY`.
    pub fn register_custom_aggregate(
        &mut self,
        name: NamedNode,
        aggregate: impl Fn(&[Term]) -> Option<Term> + Send + Sync + 'static,
    ) {
        self.functions.register_aggregate(name, aggregate);
    }

    /// Registers a handler for `SERVICE <name>` patterns.
    pub fn register_service_handler(&mut self, name: NamedNode, handler: Arc<dyn ServiceHandler>) {
        self.services.insert(name, handler);
    }

    /// Registers the fallback handler for `SERVICE` patterns.
    pub fn set_default_service_handler(&mut self, handler: Arc<dyn ServiceHandler>) {
        self.services.set_default(handler);
    }

    /// Installs the document loader backing `LOAD` updates.
    pub fn set_loader(&mut self, loader: Loader) {
        self.loader = Some(loader);
    }

    /// The dataset this builder plans against.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub(crate) fn loader(&self) -> Option<&Loader> {
        self.loader.as_ref()
    }

    pub(crate) fn stage(&self, kind: PatternKind) -> Option<&Arc<dyn StageBuilder>> {
        self.stages.get(&kind)
    }

    pub(crate) fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub(crate) fn services(&self) -> &ServiceHandlerRegistry {
        &self.services
    }

    /// Parses and builds a request: queries start evaluating lazily, updates
    /// are returned as a consumable plan.
    pub async fn build<'a>(
        &'a self,
        request: &str,
        options: QueryOptions,
    ) -> Result<Prepared<'a>, EvaluationError> {
        match Query::parse(request, None) {
            Ok(query) => Ok(Prepared::Query(self.build_query(&query, options).await?)),
            Err(query_error) => match Update::parse(request, None) {
                Ok(update) => Ok(Prepared::Update(UpdatePlan::new(self, update, options))),
                Err(_) => Err(query_error.into()),
            },
        }
    }

    /// Builds the result stream for a parsed query.
    pub async fn build_query(
        &self,
        query: &Query,
        options: QueryOptions,
    ) -> Result<QueryResults, EvaluationError> {
        match query {
            Query::Select {
                pattern,
                dataset,
                base_iri,
            } => {
                let (planner, pattern) =
                    self.prepare(pattern, dataset.as_ref(), base_iri.clone(), options);
                let variables: Arc<[Variable]> =
                    rewriting::projection_variables(&pattern).into();
                let stage = planner.plan(&pattern)?;
                tracing::debug!(variables = variables.len(), "built select plan");
                Ok(QueryResults::Solutions(QuerySolutionStream::new(
                    variables,
                    stage(pipeline::once(Bindings::new())),
                )))
            }
            Query::Construct {
                template,
                pattern,
                dataset,
                base_iri,
            } => {
                let (planner, pattern) =
                    self.prepare(pattern, dataset.as_ref(), base_iri.clone(), options);
                let stage = planner.plan(&pattern)?;
                Ok(QueryResults::Graph(construct_stream(
                    template.clone(),
                    stage(pipeline::once(Bindings::new())),
                )))
            }
            Query::Ask {
                pattern,
                dataset,
                base_iri,
            } => {
                let (planner, pattern) =
                    self.prepare(pattern, dataset.as_ref(), base_iri.clone(), options);
                let stage = planner.plan(&pattern)?;
                let mut stream = stage(pipeline::once(Bindings::new()));
                let first = stream.next().await.transpose()?;
                Ok(QueryResults::Boolean(first.is_some()))
            }
            Query::Describe {
                pattern,
                dataset,
                base_iri,
            } => {
                let (rewritten, template) = rewriting::describe_to_construct(pattern);
                let (planner, rewritten) =
                    self.prepare(&rewritten, dataset.as_ref(), base_iri.clone(), options);
                let stage = planner.plan(&rewritten)?;
                Ok(QueryResults::Graph(construct_stream(
                    template,
                    stage(pipeline::once(Bindings::new())),
                )))
            }
        }
    }

    /// Evaluates a `WHERE` pattern to completion. Used by the update engine.
    pub(crate) async fn evaluate_where(
        &self,
        pattern: &GraphPattern,
        dataset: Option<&QueryDataset>,
        options: QueryOptions,
    ) -> Result<Vec<Bindings>, EvaluationError> {
        let (planner, pattern) = self.prepare(pattern, dataset, None, options);
        let stage = planner.plan(&pattern)?;
        pipeline::collect(stage(pipeline::once(Bindings::new()))).await
    }

    fn prepare<'a>(
        &'a self,
        pattern: &GraphPattern,
        dataset: Option<&QueryDataset>,
        base_iri: Option<Iri<String>>,
        options: QueryOptions,
    ) -> (Planner<'a>, GraphPattern) {
        let mut ctx = ExecutionContext::new(options)
            .with_slice(rewriting::has_slice(pattern))
            .with_cache(self.cache.clone());
        if let Some(dataset) = dataset {
            if !dataset.default.is_empty() {
                ctx = ctx.with_default_graphs(
                    dataset.default.iter().cloned().map(GraphName::from).collect(),
                );
            }
            ctx = ctx.with_named_graphs(dataset.named.clone());
        }
        let pattern = self.optimizer.optimize(pattern.clone());
        (Planner::new(self, ctx, base_iri), pattern)
    }
}

/// The per-query planning pass: dispatches algebra nodes to stages while
/// tracking the active graph of `GRAPH` scopes.
pub struct Planner<'a> {
    builder: &'a PlanBuilder,
    ctx: ExecutionContext,
    base_iri: Option<Iri<String>>,
    active_graph: RefCell<ActiveGraph>,
}

impl<'a> Planner<'a> {
    fn new(builder: &'a PlanBuilder, ctx: ExecutionContext, base_iri: Option<Iri<String>>) -> Self {
        Self {
            builder,
            ctx,
            base_iri,
            active_graph: RefCell::new(ActiveGraph::Default),
        }
    }

    /// Compiles one algebra node through the stage registry.
    pub fn plan(&self, pattern: &GraphPattern) -> Result<Stage, EvaluationError> {
        let kind = PatternKind::of(pattern)?;
        let stage = self
            .builder
            .stage(kind)
            .ok_or(EvaluationError::MissingStage(kind.name()))?;
        Arc::clone(stage).build(self, pattern)
    }

    /// Compiles `pattern` with a different active graph, restoring the
    /// previous scope afterwards.
    pub fn plan_with_active_graph(
        &self,
        active: ActiveGraph,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError> {
        let previous = self.active_graph.replace(active);
        let result = self.plan(pattern);
        self.active_graph.replace(previous);
        result
    }

    /// The execution context of this query.
    pub fn ctx(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// The dataset the query runs against.
    pub fn dataset(&self) -> &Dataset {
        self.builder.dataset()
    }

    /// The currently active graph scope.
    pub fn active_graph(&self) -> ActiveGraph {
        self.active_graph.borrow().clone()
    }

    /// The base IRI of the query, if any.
    pub fn base_iri(&self) -> Option<&Iri<String>> {
        self.base_iri.as_ref()
    }

    /// The custom function and aggregate registry.
    pub fn functions(&self) -> &FunctionRegistry {
        self.builder.functions()
    }

    /// The service handler registry.
    pub fn service_handlers(&self) -> &ServiceHandlerRegistry {
        self.builder.services()
    }
}

/// Instantiates a CONSTRUCT template over a solution stream, dropping
/// triples with unbound or ill-placed terms.
fn construct_stream(template: Vec<TriplePattern>, stream: BindingsStream) -> QueryTripleStream {
    let template = Arc::new(template);
    let inner = stream
        .map(move |item| {
            let triples: Vec<Result<Triple, EvaluationError>> = match item {
                Err(e) => vec![Err(e)],
                Ok(solution) => {
                    // Template blank nodes are instantiated fresh per
                    // solution.
                    let mut bnodes: FxHashMap<BlankNode, BlankNode> = FxHashMap::default();
                    template
                        .iter()
                        .filter_map(|pattern| {
                            instantiate_triple(pattern, &solution, &mut bnodes).map(Ok)
                        })
                        .collect()
                }
            };
            stream::iter(triples)
        })
        .flatten()
        .boxed();
    QueryTripleStream::new(inner)
}

fn instantiate_triple(
    pattern: &TriplePattern,
    solution: &Bindings,
    bnodes: &mut FxHashMap<BlankNode, BlankNode>,
) -> Option<Triple> {
    let subject: Subject = match &pattern.subject {
        TermPattern::NamedNode(node) => node.clone().into(),
        TermPattern::BlankNode(node) => bnodes.entry(node.clone()).or_default().clone().into(),
        TermPattern::Literal(_) => return None,
        TermPattern::Variable(variable) => match solution.get(variable)? {
            Term::NamedNode(node) => node.clone().into(),
            Term::BlankNode(node) => node.clone().into(),
            Term::Literal(_) => return None,
        },
    };
    let predicate: NamedNode = match &pattern.predicate {
        NamedNodePattern::NamedNode(node) => node.clone(),
        NamedNodePattern::Variable(variable) => match solution.get(variable)? {
            Term::NamedNode(node) => node.clone(),
            _ => return None,
        },
    };
    let object: Term = match &pattern.object {
        TermPattern::NamedNode(node) => Term::NamedNode(node.clone()),
        TermPattern::BlankNode(node) => {
            Term::BlankNode(bnodes.entry(node.clone()).or_default().clone())
        }
        TermPattern::Literal(literal) => Term::Literal(literal.clone()),
        TermPattern::Variable(variable) => solution.get(variable)?.clone(),
    };
    if is_unbound(object.as_ref()) {
        return None;
    }
    Some(Triple::new(subject, predicate, object))
}
