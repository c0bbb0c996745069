#![forbid(unsafe_code)]

//! XML Canonicalization (C14N) for the Stocksund XML library.
//!
//! Implements the four W3C canonicalization variants:
//! - Canonical XML 1.0 (with and without comments)
//! - Exclusive Canonical XML 1.0 (with and without comments)
//!
//! Both whole documents and document subsets ([`NodeSet`]) are supported.

pub mod canonicalizer;
pub mod escape;
pub mod render;
pub mod resolver;

pub use canonicalizer::Canonicalizer;

use stocksund_core::{algorithm, Error};
use stocksund_xml::{Document, NodeSet};

/// The canonicalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C14nMode {
    /// Canonical XML 1.0
    Inclusive,
    /// Canonical XML 1.0 with comments
    InclusiveWithComments,
    /// Exclusive Canonical XML 1.0
    Exclusive,
    /// Exclusive Canonical XML 1.0 with comments
    ExclusiveWithComments,
}

impl C14nMode {
    /// Get the algorithm URI for this mode.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Inclusive => algorithm::C14N,
            Self::InclusiveWithComments => algorithm::C14N_WITH_COMMENTS,
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Parse a C14N mode from an algorithm URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::C14N => Some(Self::Inclusive),
            algorithm::C14N_WITH_COMMENTS => Some(Self::InclusiveWithComments),
            algorithm::EXC_C14N => Some(Self::Exclusive),
            algorithm::EXC_C14N_WITH_COMMENTS => Some(Self::ExclusiveWithComments),
            _ => None,
        }
    }

    /// Pick the variant from its two switches.
    pub fn from_flags(exclusive: bool, with_comments: bool) -> Self {
        match (exclusive, with_comments) {
            (false, false) => Self::Inclusive,
            (false, true) => Self::InclusiveWithComments,
            (true, false) => Self::Exclusive,
            (true, true) => Self::ExclusiveWithComments,
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(self, Self::InclusiveWithComments | Self::ExclusiveWithComments)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }
}

/// Selects the nodes to canonicalize once the document is parsed.
pub type Selector<'s> = &'s dyn Fn(&Document) -> Result<NodeSet, Error>;

/// Canonicalize an XML document.
///
/// - `xml`: the raw XML text
/// - `mode`: which C14N variant to use
/// - `select`: optional node selection (for document-subset canonicalization)
/// - `inclusive_prefixes`: for exclusive C14N, the InclusiveNamespaces PrefixList
pub fn canonicalize(
    xml: &str,
    mode: C14nMode,
    select: Option<Selector<'_>>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let doc = Document::parse(xml)?;
    let node_set = select.map(|f| f(&doc)).transpose()?;
    canonicalize_doc(&doc, mode, node_set.as_ref(), inclusive_prefixes)
}

/// Convenience: canonicalize an already built document.
pub fn canonicalize_doc(
    doc: &Document,
    mode: C14nMode,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let mut c14n = Canonicalizer::with_mode(Vec::new(), mode);
    if !inclusive_prefixes.is_empty() {
        c14n.set_inclusive_namespace_prefix_list(Some(&inclusive_prefixes.join(" ")));
    }
    match node_set {
        Some(set) => c14n.write_subset(doc, set)?,
        None => c14n.write_document(doc)?,
    }
    Ok(c14n.into_inner())
}
