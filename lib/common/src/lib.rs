//! Shared contracts between the Sparflow engine and its collaborators.
//!
//! This crate defines the [`Graph`] backend trait and the [`Dataset`] that
//! groups graphs, the per-query [`ExecutionContext`], the write protocol of
//! the BGP semantic cache ([`BgpCache`]) and the error taxonomy of the
//! engine.

mod cache;
mod context;
mod dataset;
pub mod error;
mod graph;

pub use cache::*;
pub use context::*;
pub use dataset::*;
pub use error::{EvaluationError, ExpressionError, GraphError};
pub use graph::*;
