#![doc(test(attr(deny(warnings))))]

//! This crate contains the Sparflow data model: solution mappings, grouped
//! solutions for aggregation, and the reserved vocabularies of the engine.
//!
//! Large portions of the available types are re-exported from
//! [Oxigraph](https://github.com/oxigraph/oxigraph).

mod bindings;
mod group;
pub mod pattern;
pub mod vocab;

pub use bindings::*;
pub use group::*;

// Re-export some oxrdf types.
pub use oxiri::Iri;
pub use oxrdf::{
    BlankNode, BlankNodeRef, GraphName, GraphNameRef, IriParseError, Literal, LiteralRef,
    NamedNode, NamedNodeRef, NamedOrBlankNode, NamedOrBlankNodeRef, Quad, QuadRef, Subject,
    SubjectRef, Term, TermParseError, TermRef, Triple, TripleRef, Variable,
    VariableNameParseError, VariableRef,
};
pub use spargebra::algebra::PropertyPathExpression;
pub use spargebra::term::{GroundTerm, NamedNodePattern, TermPattern, TriplePattern};
