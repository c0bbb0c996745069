#![forbid(unsafe_code)]

//! XML node model for the Stocksund canonicalization library.
//!
//! Provides an arena-backed [`Document`] with an append-only builder, a
//! parse bridge over `roxmltree`, and the [`NodeSet`] selection model that
//! document-subset canonicalization consumes.

pub mod document;
pub mod node;
pub mod nodeset;
pub mod parse;
pub mod writer;

pub use document::{Document, Edge, Traverse};
pub use node::{
    Attribute, AttributeType, DocType, DocumentId, Element, NamespaceDecl, NodeId, NodeKind,
    ProcessingInstruction, QName,
};
pub use nodeset::{DocumentSubset, NodeRef, NodeSet};
pub use parse::parsing_options;
