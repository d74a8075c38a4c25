//! The update engine: compiles `spargebra::Update` requests into consumable
//! plans executing against the dataset.

use crate::planner::PlanBuilder;
use futures::future::BoxFuture;
use rustc_hash::FxHashMap;
use sparflow_common::{Dataset, EvaluationError, Graph, QueryOptions};
use sparflow_model::{
    BlankNode, Bindings, GraphName, NamedNode, Quad, Subject, Term, Triple,
};
use spargebra::algebra::GraphTarget;
use spargebra::term::{
    GraphNamePattern, GroundQuad, GroundQuadPattern, GroundSubject, GroundTerm,
    GroundTermPattern, NamedNodePattern, QuadPattern, TermPattern,
};
use spargebra::{GraphUpdateOperation, Update};
use std::error::Error;
use std::sync::Arc;

/// Fetches and parses the document behind an IRI for `LOAD` updates.
///
/// The engine carries no HTTP client or RDF parser; the host injects both
/// through this hook.
pub type Loader = Arc<
    dyn Fn(NamedNode) -> BoxFuture<'static, Result<Vec<Quad>, Box<dyn Error + Send + Sync>>>
        + Send
        + Sync,
>;

/// A compiled update request. Operations execute sequentially; the first
/// failure aborts the remaining operations.
pub struct UpdatePlan<'a> {
    builder: &'a PlanBuilder,
    update: Update,
    options: QueryOptions,
}

impl<'a> UpdatePlan<'a> {
    pub(crate) fn new(builder: &'a PlanBuilder, update: Update, options: QueryOptions) -> Self {
        Self {
            builder,
            update,
            options,
        }
    }

    /// The operations this plan will execute.
    pub fn operations(&self) -> &[GraphUpdateOperation] {
        &self.update.operations
    }

    /// Executes all operations of the request.
    pub async fn execute(self) -> Result<(), EvaluationError> {
        for operation in &self.update.operations {
            self.execute_operation(operation).await?;
        }
        Ok(())
    }

    async fn execute_operation(
        &self,
        operation: &GraphUpdateOperation,
    ) -> Result<(), EvaluationError> {
        let dataset = self.builder.dataset();
        match operation {
            GraphUpdateOperation::InsertData { data } => {
                // Blank nodes in INSERT DATA are instantiated fresh.
                let mut bnodes: FxHashMap<BlankNode, BlankNode> = FxHashMap::default();
                let quads: Vec<Quad> = data
                    .iter()
                    .map(spargebra_quad_to_quad)
                    .map(|quad| refresh_blank_nodes(&quad, &mut bnodes))
                    .collect();
                insert_quads(dataset, quads).await
            }
            GraphUpdateOperation::DeleteData { data } => {
                let quads: Vec<Quad> = data.iter().map(ground_quad_to_quad).collect();
                delete_quads(dataset, quads).await
            }
            GraphUpdateOperation::DeleteInsert {
                delete,
                insert,
                using,
                pattern,
            } => {
                let solutions = self
                    .builder
                    .evaluate_where(pattern, using.as_ref(), self.options)
                    .await?;

                let mut deletes = Vec::new();
                let mut inserts = Vec::new();
                for solution in &solutions {
                    for quad in delete {
                        if let Some(quad) = fill_ground_quad_pattern(quad, solution) {
                            deletes.push(quad);
                        }
                    }
                    let mut bnodes: FxHashMap<BlankNode, BlankNode> = FxHashMap::default();
                    for quad in insert {
                        if let Some(quad) = fill_quad_pattern(quad, solution, &mut bnodes) {
                            inserts.push(quad);
                        }
                    }
                }
                tracing::debug!(
                    solutions = solutions.len(),
                    deletes = deletes.len(),
                    inserts = inserts.len(),
                    "executing DELETE/INSERT"
                );

                delete_quads(dataset, deletes).await?;
                insert_quads(dataset, inserts).await
            }
            GraphUpdateOperation::Load {
                silent,
                source,
                destination,
            } => {
                let result = self.load(source, destination).await;
                if *silent {
                    return Ok(());
                }
                result
            }
            GraphUpdateOperation::Clear { silent, graph } => {
                let result = clear(dataset, graph).await;
                if *silent {
                    return Ok(());
                }
                result
            }
            GraphUpdateOperation::Create { silent, graph } => {
                if dataset.contains_named_graph(graph) {
                    if *silent {
                        return Ok(());
                    }
                    return Err(EvaluationError::GraphAlreadyExists(graph.clone()));
                }
                dataset.create_named_graph(graph)?;
                Ok(())
            }
            GraphUpdateOperation::Drop { silent, graph } => {
                let result = drop_target(dataset, graph).await;
                if *silent {
                    return Ok(());
                }
                result
            }
        }
    }

    async fn load(
        &self,
        source: &NamedNode,
        destination: &spargebra::term::GraphName,
    ) -> Result<(), EvaluationError> {
        let destination = spargebra_graph_name_to_graph_name(destination);
        let loader = self.builder.loader().ok_or_else(|| {
            EvaluationError::Load(source.clone(), "no document loader is configured".into())
        })?;
        let quads = loader(source.clone())
            .await
            .map_err(|e| EvaluationError::Load(source.clone(), e))?;
        let quads = quads
            .into_iter()
            .map(|quad| Quad {
                graph_name: destination.clone(),
                ..quad
            })
            .collect();
        insert_quads(self.builder.dataset(), quads).await
    }
}

async fn insert_quads(dataset: &Dataset, quads: Vec<Quad>) -> Result<(), EvaluationError> {
    for quad in quads {
        let graph = resolve_for_write(dataset, &quad.graph_name, true)?;
        graph
            .insert(&Triple::new(quad.subject, quad.predicate, quad.object))
            .await?;
    }
    Ok(())
}

async fn delete_quads(dataset: &Dataset, quads: Vec<Quad>) -> Result<(), EvaluationError> {
    for quad in quads {
        // Deleting from a missing graph is a no-op.
        let Ok(graph) = resolve_for_write(dataset, &quad.graph_name, false) else {
            continue;
        };
        graph
            .remove(&Triple::new(quad.subject, quad.predicate, quad.object))
            .await?;
    }
    Ok(())
}

fn resolve_for_write(
    dataset: &Dataset,
    graph_name: &GraphName,
    create_missing: bool,
) -> Result<Arc<dyn Graph>, EvaluationError> {
    dataset.resolve(graph_name, create_missing)
}

async fn clear(dataset: &Dataset, target: &GraphTarget) -> Result<(), EvaluationError> {
    match target {
        GraphTarget::DefaultGraph => Ok(dataset.default_graph().clear().await?),
        GraphTarget::NamedNode(name) => match dataset.named_graph(name) {
            Some(graph) => Ok(graph.clear().await?),
            None => Err(EvaluationError::GraphDoesNotExist(name.clone())),
        },
        GraphTarget::NamedGraphs => {
            for name in dataset.named_graph_names() {
                if let Some(graph) = dataset.named_graph(&name) {
                    graph.clear().await?;
                }
            }
            Ok(())
        }
        GraphTarget::AllGraphs => {
            dataset.default_graph().clear().await?;
            for name in dataset.named_graph_names() {
                if let Some(graph) = dataset.named_graph(&name) {
                    graph.clear().await?;
                }
            }
            Ok(())
        }
    }
}

async fn drop_target(
    dataset: &Dataset,
    target: &GraphTarget,
) -> Result<(), EvaluationError> {
    match target {
        // Dropping the default graph clears it; the graph itself remains.
        GraphTarget::DefaultGraph => Ok(dataset.default_graph().clear().await?),
        GraphTarget::NamedNode(name) => match dataset.remove_named_graph(name) {
            Some(_) => Ok(()),
            None => Err(EvaluationError::GraphDoesNotExist(name.clone())),
        },
        GraphTarget::NamedGraphs => {
            for name in dataset.named_graph_names() {
                dataset.remove_named_graph(&name);
            }
            Ok(())
        }
        GraphTarget::AllGraphs => {
            dataset.default_graph().clear().await?;
            for name in dataset.named_graph_names() {
                dataset.remove_named_graph(&name);
            }
            Ok(())
        }
    }
}

fn refresh_blank_nodes(quad: &Quad, bnodes: &mut FxHashMap<BlankNode, BlankNode>) -> Quad {
    let subject = match &quad.subject {
        Subject::BlankNode(node) => {
            Subject::BlankNode(bnodes.entry(node.clone()).or_default().clone())
        }
        other => other.clone(),
    };
    let object = match &quad.object {
        Term::BlankNode(node) => {
            Term::BlankNode(bnodes.entry(node.clone()).or_default().clone())
        }
        other => other.clone(),
    };
    Quad {
        subject,
        predicate: quad.predicate.clone(),
        object,
        graph_name: quad.graph_name.clone(),
    }
}

fn spargebra_graph_name_to_graph_name(graph_name: &spargebra::term::GraphName) -> GraphName {
    match graph_name {
        spargebra::term::GraphName::NamedNode(node) => GraphName::NamedNode(node.clone()),
        spargebra::term::GraphName::DefaultGraph => GraphName::DefaultGraph,
    }
}

fn spargebra_quad_to_quad(quad: &spargebra::term::Quad) -> Quad {
    Quad {
        subject: quad.subject.clone(),
        predicate: quad.predicate.clone(),
        object: quad.object.clone(),
        graph_name: spargebra_graph_name_to_graph_name(&quad.graph_name),
    }
}

fn ground_quad_to_quad(quad: &GroundQuad) -> Quad {
    Quad {
        subject: match &quad.subject {
            GroundSubject::NamedNode(node) => Subject::NamedNode(node.clone()),
        },
        predicate: quad.predicate.clone(),
        object: match &quad.object {
            GroundTerm::NamedNode(node) => Term::NamedNode(node.clone()),
            GroundTerm::Literal(literal) => Term::Literal(literal.clone()),
        },
        graph_name: spargebra_graph_name_to_graph_name(&quad.graph_name),
    }
}

fn fill_quad_pattern(
    quad: &QuadPattern,
    solution: &Bindings,
    bnodes: &mut FxHashMap<BlankNode, BlankNode>,
) -> Option<Quad> {
    Some(Quad {
        subject: match fill_term_or_var(&quad.subject, solution, bnodes)? {
            Term::NamedNode(node) => node.into(),
            Term::BlankNode(node) => node.into(),
            Term::Literal(_) => return None,
        },
        predicate: fill_named_node_or_var(&quad.predicate, solution)?,
        object: fill_term_or_var(&quad.object, solution, bnodes)?,
        graph_name: fill_graph_name_or_var(&quad.graph_name, solution)?,
    })
}

fn fill_ground_quad_pattern(quad: &GroundQuadPattern, solution: &Bindings) -> Option<Quad> {
    Some(Quad {
        subject: match fill_ground_term_or_var(&quad.subject, solution)? {
            Term::NamedNode(node) => node.into(),
            Term::BlankNode(node) => node.into(),
            Term::Literal(_) => return None,
        },
        predicate: fill_named_node_or_var(&quad.predicate, solution)?,
        object: fill_ground_term_or_var(&quad.object, solution)?,
        graph_name: fill_graph_name_or_var(&quad.graph_name, solution)?,
    })
}

fn fill_term_or_var(
    term: &TermPattern,
    solution: &Bindings,
    bnodes: &mut FxHashMap<BlankNode, BlankNode>,
) -> Option<Term> {
    Some(match term {
        TermPattern::NamedNode(node) => node.clone().into(),
        TermPattern::BlankNode(node) => bnodes.entry(node.clone()).or_default().clone().into(),
        TermPattern::Literal(literal) => literal.clone().into(),
        TermPattern::Variable(variable) => solution.get(variable)?.clone(),
    })
}

fn fill_ground_term_or_var(term: &GroundTermPattern, solution: &Bindings) -> Option<Term> {
    Some(match term {
        GroundTermPattern::NamedNode(node) => node.clone().into(),
        GroundTermPattern::Literal(literal) => literal.clone().into(),
        GroundTermPattern::Variable(variable) => solution.get(variable)?.clone(),
    })
}

fn fill_named_node_or_var(
    term: &NamedNodePattern,
    solution: &Bindings,
) -> Option<NamedNode> {
    Some(match term {
        NamedNodePattern::NamedNode(node) => node.clone(),
        NamedNodePattern::Variable(variable) => {
            if let Term::NamedNode(node) = solution.get(variable)? {
                node.clone()
            } else {
                return None;
            }
        }
    })
}

fn fill_graph_name_or_var(term: &GraphNamePattern, solution: &Bindings) -> Option<GraphName> {
    Some(match term {
        GraphNamePattern::NamedNode(node) => node.clone().into(),
        GraphNamePattern::DefaultGraph => GraphName::DefaultGraph,
        GraphNamePattern::Variable(variable) => match solution.get(variable)? {
            Term::NamedNode(node) => node.clone().into(),
            Term::BlankNode(node) => node.clone().into(),
            Term::Literal(_) => return None,
        },
    })
}
