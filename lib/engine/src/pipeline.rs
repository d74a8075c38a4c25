//! The pipeline engine: constructors and combinators over lazy solution
//! streams.
//!
//! All operators of the engine communicate through [`BindingsStream`]s. This
//! module is a plain dispatch surface passed around explicitly; it carries no
//! state, so streams of concurrent queries never interfere.
//!
//! Streams are single-consumer and cooperative: every combinator processes
//! one solution at a time, and only the explicitly buffering stages (ORDER
//! BY, aggregation, the right side of MINUS) hold more than one solution in
//! memory.

use futures::future::ready;
use futures::stream::{self, StreamExt};
use futures::Future;
use sparflow_common::{BindingsStream, EvaluationError};
use sparflow_model::Bindings;

/// A stream without any solution.
pub fn empty() -> BindingsStream {
    stream::empty().boxed()
}

/// A stream of exactly one solution.
pub fn once(solution: Bindings) -> BindingsStream {
    stream::once(ready(Ok(solution))).boxed()
}

/// A stream that fails with `error` immediately.
pub fn once_error(error: EvaluationError) -> BindingsStream {
    stream::once(ready(Err(error))).boxed()
}

/// A stream over already-materialized solutions.
pub fn from_iter(solutions: impl IntoIterator<Item = Bindings>) -> BindingsStream {
    let solutions: Vec<_> = solutions.into_iter().map(Ok).collect();
    stream::iter(solutions).boxed()
}

/// A stream produced by an asynchronous computation.
pub fn from_future(
    producer: impl Future<Output = Result<BindingsStream, EvaluationError>> + Send + 'static,
) -> BindingsStream {
    stream::once(producer)
        .map(|result| match result {
            Ok(stream) => stream,
            Err(e) => once_error(e),
        })
        .flatten()
        .boxed()
}

/// Applies `f` to every solution; errors pass through untouched.
pub fn map(
    stream: BindingsStream,
    mut f: impl FnMut(Bindings) -> Bindings + Send + 'static,
) -> BindingsStream {
    stream.map(move |solution| solution.map(&mut f)).boxed()
}

/// Replaces every solution with the stream `f` produces for it, preserving
/// the order of the source. Errors pass through untouched.
pub fn flat_map(
    stream: BindingsStream,
    mut f: impl FnMut(Bindings) -> BindingsStream + Send + 'static,
) -> BindingsStream {
    stream
        .map(move |solution| match solution {
            Ok(solution) => f(solution),
            Err(e) => once_error(e),
        })
        .flatten()
        .boxed()
}

/// Interleaves several streams. Per-source order is preserved; the interleave
/// across sources follows readiness.
pub fn merge(streams: impl IntoIterator<Item = BindingsStream>) -> BindingsStream {
    stream::select_all(streams).boxed()
}

/// Drops the first `n` solutions.
pub fn skip(stream: BindingsStream, n: usize) -> BindingsStream {
    stream.skip(n).boxed()
}

/// Stops the stream after `n` solutions.
pub fn limit(stream: BindingsStream, n: usize) -> BindingsStream {
    stream.take(n).boxed()
}

/// Drains the stream into a vector. The first error aborts the collection.
pub async fn collect(mut stream: BindingsStream) -> Result<Vec<Bindings>, EvaluationError> {
    let mut result = Vec::new();
    while let Some(solution) = stream.next().await {
        result.push(solution?);
    }
    Ok(result)
}

/// Drains the stream, applying `f` to every solution. The first error aborts
/// the consumption.
pub async fn for_each(
    mut stream: BindingsStream,
    mut f: impl FnMut(Bindings) + Send,
) -> Result<(), EvaluationError> {
    while let Some(solution) = stream.next().await {
        f(solution?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparflow_model::{NamedNode, Variable};

    fn solution(n: u32) -> Bindings {
        [(
            Variable::new_unchecked("x"),
            NamedNode::new_unchecked(format!("http://example.com/{n}")).into(),
        )]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn slicing() {
        let source = from_iter((0..10).map(solution));
        let sliced = limit(skip(source, 2), 3);
        let collected = collect(sliced).await.unwrap();
        assert_eq!(collected, (2..5).map(solution).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn flat_map_preserves_source_order() {
        let source = from_iter((0..3).map(solution));
        let doubled = flat_map(source, |s| from_iter([s.clone(), s]));
        let collected = collect(doubled).await.unwrap();
        assert_eq!(collected.len(), 6);
        assert_eq!(collected[0], solution(0));
        assert_eq!(collected[1], solution(0));
        assert_eq!(collected[4], solution(2));
    }

    #[tokio::test]
    async fn merge_emits_everything() {
        let merged = merge([
            from_iter((0..3).map(solution)),
            from_iter((3..5).map(solution)),
        ]);
        let mut collected = collect(merged).await.unwrap();
        collected.sort_by_key(Bindings::canonical_form);
        assert_eq!(collected.len(), 5);
    }
}
