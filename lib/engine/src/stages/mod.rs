//! The streaming algebra operators of the engine.
//!
//! A compiled [`Stage`] transforms the stream of input solutions into the
//! stream of output solutions. Pattern stages evaluate their operand once per
//! input solution (substitution semantics); the solution-modifier stages at
//! the top of a query see exactly one empty input solution and therefore act
//! globally.

mod aggregate;
mod algebra;
mod bgp;
mod bound_join;
mod full_text;
mod modifiers;
mod path;

pub(crate) use aggregate::GroupStageBuilder;
pub(crate) use algebra::{
    values_row, ExtendStageBuilder, FilterStageBuilder, GraphStageBuilder, JoinStageBuilder,
    LeftJoinStageBuilder, MinusStageBuilder, ServiceStageBuilder, UnionStageBuilder,
    ValuesStageBuilder,
};
pub(crate) use bgp::BgpStageBuilder;
pub(crate) use modifiers::{
    DistinctStageBuilder, OrderByStageBuilder, ProjectStageBuilder, SliceStageBuilder,
};
pub(crate) use path::PathStageBuilder;

use crate::planner::Planner;
use sparflow_common::{
    BindingsStream, Dataset, EvaluationError, ExecutionContext, Graph, UnionGraph,
};
use sparflow_model::{Bindings, GraphName, NamedNode, Term, Variable};
use spargebra::algebra::GraphPattern;
use std::sync::Arc;

/// A compiled streaming operator.
pub type Stage = Arc<dyn Fn(BindingsStream) -> BindingsStream + Send + Sync>;

/// Builds the stage for one algebra node kind.
///
/// The default builders can be replaced per kind on the plan builder, which
/// is the extension point for custom operators.
pub trait StageBuilder: Send + Sync {
    /// Compiles `pattern` into a stage. Operands are planned recursively
    /// through `planner`.
    fn build(
        &self,
        planner: &Planner<'_>,
        pattern: &GraphPattern,
    ) -> Result<Stage, EvaluationError>;
}

/// The algebra node kinds the plan builder dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Bgp,
    Path,
    Join,
    LeftJoin,
    Filter,
    Union,
    Graph,
    Extend,
    Minus,
    Values,
    OrderBy,
    Project,
    Distinct,
    Reduced,
    Slice,
    Group,
    Service,
}

impl PatternKind {
    /// The kind of an algebra node. Unknown nodes are an error, per the
    /// dispatch contract.
    pub fn of(pattern: &GraphPattern) -> Result<Self, EvaluationError> {
        Ok(match pattern {
            GraphPattern::Bgp { .. } => PatternKind::Bgp,
            GraphPattern::Path { .. } => PatternKind::Path,
            GraphPattern::Join { .. } => PatternKind::Join,
            GraphPattern::LeftJoin { .. } => PatternKind::LeftJoin,
            GraphPattern::Filter { .. } => PatternKind::Filter,
            GraphPattern::Union { .. } => PatternKind::Union,
            GraphPattern::Graph { .. } => PatternKind::Graph,
            GraphPattern::Extend { .. } => PatternKind::Extend,
            GraphPattern::Minus { .. } => PatternKind::Minus,
            GraphPattern::Values { .. } => PatternKind::Values,
            GraphPattern::OrderBy { .. } => PatternKind::OrderBy,
            GraphPattern::Project { .. } => PatternKind::Project,
            GraphPattern::Distinct { .. } => PatternKind::Distinct,
            GraphPattern::Reduced { .. } => PatternKind::Reduced,
            GraphPattern::Slice { .. } => PatternKind::Slice,
            GraphPattern::Group { .. } => PatternKind::Group,
            GraphPattern::Service { .. } => PatternKind::Service,
            pattern => {
                return Err(EvaluationError::UnsupportedPattern(format!("{pattern:?}")))
            }
        })
    }

    /// A stable name for error messages.
    pub fn name(self) -> &'static str {
        match self {
            PatternKind::Bgp => "BGP",
            PatternKind::Path => "path",
            PatternKind::Join => "join",
            PatternKind::LeftJoin => "optional",
            PatternKind::Filter => "filter",
            PatternKind::Union => "union",
            PatternKind::Graph => "graph",
            PatternKind::Extend => "bind",
            PatternKind::Minus => "minus",
            PatternKind::Values => "values",
            PatternKind::OrderBy => "order by",
            PatternKind::Project => "projection",
            PatternKind::Distinct => "distinct",
            PatternKind::Reduced => "reduced",
            PatternKind::Slice => "slice",
            PatternKind::Group => "aggregation",
            PatternKind::Service => "service",
        }
    }
}

/// The graph a pattern is evaluated against, tracked while walking `GRAPH`
/// nodes.
#[derive(Debug, Clone)]
pub enum ActiveGraph {
    /// The default graph selection of the query (`FROM` clauses).
    Default,
    /// A concrete named graph (`GRAPH <iri>`).
    Named(NamedNode),
    /// A graph variable (`GRAPH ?g`), resolved per input solution.
    Variable(Variable),
}

/// One resolved evaluation target: the graph handle, its name for cache
/// keying, and the binding produced when a graph variable was resolved.
pub(crate) struct ResolvedGraph {
    pub graph: Arc<dyn Graph>,
    pub name: GraphName,
    pub binding: Option<(Variable, NamedNode)>,
}

/// Resolves the active graph against the dataset for one input solution.
///
/// `GRAPH ?g` yields one target per candidate named graph when `?g` is
/// unbound; everything else yields exactly one target. A missing required
/// graph is a fatal error.
pub(crate) fn resolve_graphs(
    dataset: &Dataset,
    ctx: &ExecutionContext,
    active: &ActiveGraph,
    solution: &Bindings,
) -> Result<Vec<ResolvedGraph>, EvaluationError> {
    match active {
        ActiveGraph::Default => {
            let defaults = ctx.default_graphs();
            let resolved = match defaults {
                [] | [GraphName::DefaultGraph] => ResolvedGraph {
                    graph: Arc::clone(dataset.default_graph()),
                    name: GraphName::DefaultGraph,
                    binding: None,
                },
                [single] => ResolvedGraph {
                    graph: dataset.resolve(single, false)?,
                    name: single.clone(),
                    binding: None,
                },
                many => {
                    let members = many
                        .iter()
                        .map(|name| dataset.resolve(name, false))
                        .collect::<Result<Vec<_>, _>>()?;
                    ResolvedGraph {
                        // A synthetic union over the FROM graphs. Its results
                        // are not keyed in the cache under any single name.
                        graph: Arc::new(UnionGraph::new(members)),
                        name: GraphName::DefaultGraph,
                        binding: None,
                    }
                }
            };
            Ok(vec![resolved])
        }
        ActiveGraph::Named(name) => Ok(vec![ResolvedGraph {
            graph: dataset.resolve(&name.clone().into(), false)?,
            name: name.clone().into(),
            binding: None,
        }]),
        ActiveGraph::Variable(variable) => match solution.get(variable) {
            Some(Term::NamedNode(name)) => {
                let graph = dataset
                    .resolve(&name.clone().into(), ctx.options().auto_create_graphs)?;
                Ok(vec![ResolvedGraph {
                    graph,
                    name: name.clone().into(),
                    binding: None,
                }])
            }
            // A graph name can never be a literal or blank node here.
            Some(_) => Ok(Vec::new()),
            None => {
                let candidates: Vec<NamedNode> = match ctx.named_graphs() {
                    Some(named) => named.to_vec(),
                    None => dataset.named_graph_names(),
                };
                candidates
                    .into_iter()
                    .map(|name| {
                        Ok(ResolvedGraph {
                            graph: dataset.resolve(&name.clone().into(), false)?,
                            name: name.clone().into(),
                            binding: Some((variable.clone(), name)),
                        })
                    })
                    .collect()
            }
        },
    }
}
