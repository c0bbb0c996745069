#![forbid(unsafe_code)]

//! Node payload types.
//!
//! [`NodeKind`] is the closed set of node variants stored in a
//! [`Document`](crate::Document) arena. Navigation links (parent, children)
//! live in the arena, not here.

use std::fmt;
use std::num::NonZeroU64;

use stocksund_core::ns;

/// Process-unique identity of a [`Document`](crate::Document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub(crate) NonZeroU64);

impl DocumentId {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// A handle to a node inside a particular document.
///
/// Handles are checked against the owning document on every lookup, so a
/// handle from one document never resolves inside another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) doc: DocumentId,
    pub(crate) index: usize,
}

impl NodeId {
    /// The document this node belongs to.
    pub fn document(self) -> DocumentId {
        self.doc
    }

    /// Index of the node inside its document's arena.
    pub fn index(self) -> usize {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.doc.get(), self.index)
    }
}

/// A qualified name: optional prefix plus local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local_name: String,
}

impl QName {
    /// Split `prefix:local` (or `local`) into a `QName`. Does not validate.
    pub fn parse(qname: &str) -> Self {
        match qname.split_once(':') {
            Some((prefix, local)) => Self {
                prefix: Some(prefix.to_owned()),
                local_name: local.to_owned(),
            },
            None => Self {
                prefix: None,
                local_name: qname.to_owned(),
            },
        }
    }

    /// The prefix, with `""` standing for "no prefix".
    pub fn prefix_str(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    /// `prefix:local` or `local`.
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{p}:{}", self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

/// Declared type of an attribute, from the DTD attribute-list declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttributeType {
    Cdata,
    Id,
    IdRef,
    IdRefs,
    NmToken,
    NmTokens,
    Entity,
    Entities,
    Notation,
    Enumeration,
    /// No declaration seen. Treated like CDATA.
    #[default]
    Undeclared,
}

impl AttributeType {
    /// Tokenized types get attribute-value normalization beyond CDATA.
    pub fn is_tokenized(self) -> bool {
        !matches!(self, Self::Cdata | Self::Undeclared)
    }
}

/// An explicit namespace declaration on an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceDecl {
    /// `""` for the default namespace.
    pub prefix: String,
    /// `""` undeclares the default namespace.
    pub uri: String,
}

/// Element payload.
#[derive(Debug, Clone)]
pub struct Element {
    pub name: QName,
    /// `""` when the element is in no namespace.
    pub namespace_uri: String,
    /// Attribute nodes, in insertion order.
    pub attributes: Vec<NodeId>,
    /// Explicit declarations, in insertion order. Bindings implied by the
    /// element's own name and its attributes are not repeated here.
    pub namespaces: Vec<NamespaceDecl>,
}

/// Attribute payload.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: QName,
    pub namespace_uri: String,
    pub value: String,
    pub attr_type: AttributeType,
}

impl Attribute {
    /// Whether this is an `xml:*` attribute such as `xml:lang`.
    pub fn is_xml_attribute(&self) -> bool {
        self.namespace_uri == ns::XML
    }
}

/// Processing instruction payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingInstruction {
    pub target: String,
    pub data: String,
}

/// Document type declaration payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocType {
    pub root_name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    pub internal_subset: Option<String>,
}

/// The kind of a node and its payload.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// The document node; exactly one per arena, always at index 0.
    Document,
    Element(Element),
    Attribute(Attribute),
    Text(String),
    Comment(String),
    ProcessingInstruction(ProcessingInstruction),
    DocType(DocType),
}

impl NodeKind {
    pub fn is_element(&self) -> bool {
        matches!(self, Self::Element(_))
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_attribute(&self) -> Option<&Attribute> {
        match self {
            Self::Attribute(a) => Some(a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_parse() {
        let q = QName::parse("ds:Signature");
        assert_eq!(q.prefix.as_deref(), Some("ds"));
        assert_eq!(q.local_name, "Signature");
        assert_eq!(q.qualified(), "ds:Signature");

        let q = QName::parse("root");
        assert_eq!(q.prefix, None);
        assert_eq!(q.prefix_str(), "");
        assert_eq!(q.to_string(), "root");
    }

    #[test]
    fn test_tokenized_types() {
        assert!(!AttributeType::Cdata.is_tokenized());
        assert!(!AttributeType::Undeclared.is_tokenized());
        assert!(AttributeType::Id.is_tokenized());
        assert!(AttributeType::NmTokens.is_tokenized());
        assert!(AttributeType::Enumeration.is_tokenized());
    }
}
