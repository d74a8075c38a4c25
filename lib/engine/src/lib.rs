#![doc(test(attr(deny(warnings))))]

//! The Sparflow execution core.
//!
//! [`PlanBuilder`] compiles parsed SPARQL queries and updates into pipelines
//! of streaming operators over solution mappings. The crate also contains
//! the expression evaluator, the Glushkov property-path automaton, the
//! bound-join strategy and the BGP semantic cache.

mod cache;
mod expression;
pub mod pipeline;
mod planner;
mod results;
mod rewriting;
mod service;
mod stages;
mod update;

pub use cache::{CacheConfig, LruBgpCache};
pub use expression::{order_terms, CompiledExpression, CustomFunction, FunctionRegistry};
pub use planner::{PlanBuilder, Planner, Prepared};
pub use results::{QueryResults, QuerySolutionStream, QueryTripleStream};
pub use rewriting::{DefaultOptimizer, Optimizer};
pub use service::{ServiceHandler, ServiceHandlerRegistry};
pub use stages::{ActiveGraph, PatternKind, Stage, StageBuilder};
pub use update::{Loader, UpdatePlan};
