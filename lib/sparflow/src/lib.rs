#![doc(test(attr(deny(warnings))))]

//! Sparflow: a streaming SPARQL 1.1 query engine.
//!
//! The entry point is [`PlanBuilder`], which compiles parsed queries into
//! lazy streams of solution mappings over a [`Dataset`] of pluggable
//! [`Graph`] backends.
//!
//! ```
//! use sparflow::model::*;
//! use sparflow::{memory_dataset, PlanBuilder, QueryOptions, QueryResults};
//!
//! # tokio_test::block_on(async {
//! let dataset = memory_dataset();
//! let ex = NamedNode::new("http://example.com")?;
//! dataset
//!     .default_graph()
//!     .insert(&Triple::new(ex.clone(), ex.clone(), ex.clone()))
//!     .await?;
//!
//! let builder = PlanBuilder::new(dataset);
//! let query = spargebra::Query::parse("SELECT ?s WHERE { ?s ?p ?o }", None)?;
//! if let QueryResults::Solutions(solutions) =
//!     builder.build_query(&query, QueryOptions::default()).await?
//! {
//!     let solutions = solutions.try_collect_to_vec().await?;
//!     assert_eq!(solutions.len(), 1);
//! }
//! # Result::<_, Box<dyn std::error::Error>>::Ok(())
//! # }).unwrap();
//! ```

pub mod model {
    //! The RDF data model used by the engine.
    pub use sparflow_model::*;
}

pub use sparflow_common::{
    BgpCache, BindingsStream, CanonicalBgp, Dataset, EvaluationError, ExecutionContext,
    ExpressionError, FullTextMatch, FullTextSearchParams, FullTextStream, Graph,
    GraphCapabilities, GraphError, GraphFactory, QueryOptions, TripleStream, UnionGraph,
    WriterId,
};
pub use sparflow_engine::{
    pipeline, ActiveGraph, CacheConfig, CompiledExpression, CustomFunction, DefaultOptimizer,
    FunctionRegistry, Loader, LruBgpCache, Optimizer, PatternKind, PlanBuilder, Planner,
    Prepared, QueryResults, QuerySolutionStream, QueryTripleStream, ServiceHandler,
    ServiceHandlerRegistry, Stage, StageBuilder, UpdatePlan,
};
pub use sparflow_storage::MemoryGraph;

use std::sync::Arc;

/// A dataset backed by in-memory graphs, with a factory creating new
/// in-memory named graphs on demand.
pub fn memory_dataset() -> Dataset {
    Dataset::new(Arc::new(MemoryGraph::new()))
        .with_factory(Arc::new(|_| Arc::new(MemoryGraph::new())))
}
