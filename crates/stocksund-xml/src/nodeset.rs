#![forbid(unsafe_code)]

//! Node sets for document-subset canonicalization.
//!
//! A [`NodeSet`] is an unordered set of node references, typically the
//! result of an XPath-like selection. Including an element says nothing
//! about its children, attributes or namespace nodes: each of those is an
//! independent member. [`NodeSet::document_order`] validates a set against
//! a document and restores document order.

use std::collections::{BTreeMap, HashSet};

use stocksund_core::{ns, Error};

use crate::document::{Document, Edge};
use crate::node::{DocumentId, NodeId, NodeKind};

/// A member of a node set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// Any arena node: document, element, attribute, text, comment, PI.
    Node(NodeId),
    /// The namespace node for `prefix` (`""` = default) on `element`, in
    /// the XPath sense: one exists for every binding in scope there.
    Namespace { element: NodeId, prefix: String },
}

impl NodeRef {
    pub fn namespace(element: NodeId, prefix: &str) -> Self {
        Self::Namespace {
            element,
            prefix: prefix.to_owned(),
        }
    }

    /// The document the referenced node belongs to.
    pub fn document(&self) -> DocumentId {
        match self {
            Self::Node(id) => id.document(),
            Self::Namespace { element, .. } => element.document(),
        }
    }

    /// The arena node carrying this reference: the node itself, or the
    /// owning element of a namespace node.
    pub fn owner(&self) -> NodeId {
        match self {
            Self::Node(id) => *id,
            Self::Namespace { element, .. } => *element,
        }
    }
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

/// An unordered set of node references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    nodes: HashSet<NodeRef>,
}

impl NodeSet {
    /// Create an empty node set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node set from any collection of references.
    pub fn from_refs<I, R>(refs: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<NodeRef>,
    {
        Self {
            nodes: refs.into_iter().map(Into::into).collect(),
        }
    }

    /// Every node of the attached tree, with attributes and namespace nodes.
    pub fn all(doc: &Document) -> Self {
        let mut set = Self::new();
        collect_subtree(doc, doc.root(), true, &mut set);
        set
    }

    /// Every node of the attached tree except comments.
    pub fn all_without_comments(doc: &Document) -> Self {
        let mut set = Self::new();
        collect_subtree(doc, doc.root(), false, &mut set);
        set
    }

    /// A subtree rooted at `root`, with attributes and namespace nodes.
    pub fn tree_with_comments(doc: &Document, root: NodeId) -> Self {
        let mut set = Self::new();
        collect_subtree(doc, root, true, &mut set);
        set
    }

    /// A subtree rooted at `root` without comment nodes.
    pub fn tree_without_comments(doc: &Document, root: NodeId) -> Self {
        let mut set = Self::new();
        collect_subtree(doc, root, false, &mut set);
        set
    }

    pub fn insert(&mut self, node: impl Into<NodeRef>) -> bool {
        self.nodes.insert(node.into())
    }

    pub fn remove(&mut self, node: &NodeRef) -> bool {
        self.nodes.remove(node)
    }

    pub fn contains(&self, node: &NodeRef) -> bool {
        self.nodes.contains(node)
    }

    /// Membership test for an arena node.
    pub fn contains_id(&self, id: NodeId) -> bool {
        self.nodes.contains(&NodeRef::Node(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Compute the union of two node sets.
    pub fn union(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.union(&other.nodes).cloned().collect(),
        }
    }

    /// Compute the intersection of two node sets.
    pub fn intersection(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.intersection(&other.nodes).cloned().collect(),
        }
    }

    /// Compute self - other (subtraction).
    pub fn subtract(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.difference(&other.nodes).cloned().collect(),
        }
    }

    /// Validate the set against `doc` and restore document order.
    ///
    /// All members must belong to `doc` and hang off one root: the document
    /// node, or the root of one detached element subtree. Order within an
    /// element is: the element, its namespace nodes (default first, then by
    /// prefix), its attributes, then its children.
    pub fn document_order(&self, doc: &Document) -> Result<DocumentSubset, Error> {
        if self.nodes.is_empty() {
            return Ok(DocumentSubset {
                root: doc.root(),
                ordered: Vec::new(),
                members: HashSet::new(),
            });
        }

        for node in &self.nodes {
            if node.document() != doc.id() || !doc.contains(node.owner()) {
                return Err(Error::Canonicalization(
                    "nodes come from more than one document".into(),
                ));
            }
        }
        // Every member must be reached by the walk from this root; anything
        // left over hangs off another root or names an unbound prefix.
        let root = self
            .nodes
            .iter()
            .next()
            .map_or_else(|| doc.root(), |node| doc.topmost(node.owner()));
        if root != doc.root() && doc.element(root).is_none() {
            return Err(Error::Canonicalization(
                "detached nodes are not canonicalizable".into(),
            ));
        }

        let mut pending: HashSet<&NodeRef> = self.nodes.iter().collect();
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let mut scope = PrefixScope::new(doc, root);
        for edge in doc.traverse(root) {
            if pending.is_empty() {
                break;
            }
            let id = match edge {
                Edge::Open(id) => id,
                Edge::Close(id) => {
                    if doc.element(id).is_some() {
                        scope.leave();
                    }
                    continue;
                }
            };
            let node = NodeRef::Node(id);
            if pending.remove(&node) {
                ordered.push(node);
            }
            if doc.element(id).is_none() {
                continue;
            }
            scope.enter(doc, id);
            for prefix in scope.prefixes() {
                let ns_node = NodeRef::namespace(id, prefix);
                if pending.remove(&ns_node) {
                    ordered.push(ns_node);
                }
            }
            for &attr in doc.attributes(id) {
                let attr_node = NodeRef::Node(attr);
                if pending.remove(&attr_node) {
                    ordered.push(attr_node);
                }
            }
        }

        if !pending.is_empty() {
            if pending.iter().any(|node| doc.topmost(node.owner()) != root) {
                return Err(Error::Canonicalization(
                    "detached nodes are not canonicalizable".into(),
                ));
            }
            if let Some(stray) = pending.into_iter().next() {
                return Err(Error::Canonicalization(format!(
                    "node {stray:?} is not part of the document tree"
                )));
            }
        }

        Ok(DocumentSubset {
            root,
            members: ordered.iter().cloned().collect(),
            ordered,
        })
    }
}

impl FromIterator<NodeRef> for NodeSet {
    fn from_iter<T: IntoIterator<Item = NodeRef>>(iter: T) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl Extend<NodeRef> for NodeSet {
    fn extend<T: IntoIterator<Item = NodeRef>>(&mut self, iter: T) {
        self.nodes.extend(iter);
    }
}

/// A validated node set in document order.
#[derive(Debug, Clone)]
pub struct DocumentSubset {
    root: NodeId,
    ordered: Vec<NodeRef>,
    members: HashSet<NodeRef>,
}

impl DocumentSubset {
    /// The node a traversal has to start from: the document node, or the
    /// root of the detached fragment the members belong to.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Members in document order.
    pub fn nodes(&self) -> &[NodeRef] {
        &self.ordered
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRef> {
        self.ordered.iter()
    }

    pub fn contains(&self, node: &NodeRef) -> bool {
        self.members.contains(node)
    }

    pub fn contains_id(&self, id: NodeId) -> bool {
        self.members.contains(&NodeRef::Node(id))
    }

    pub fn contains_namespace(&self, element: NodeId, prefix: &str) -> bool {
        self.members.contains(&NodeRef::namespace(element, prefix))
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Collect a subtree, its attributes and its namespace nodes.
fn collect_subtree(doc: &Document, root: NodeId, include_comments: bool, set: &mut NodeSet) {
    let mut scope = PrefixScope::new(doc, root);
    for edge in doc.traverse(root) {
        let id = match edge {
            Edge::Open(id) => id,
            Edge::Close(id) => {
                if doc.element(id).is_some() {
                    scope.leave();
                }
                continue;
            }
        };
        match doc.node_kind(id) {
            Some(NodeKind::Comment(_)) if !include_comments => continue,
            Some(NodeKind::Element(element)) => {
                scope.enter(doc, id);
                set.extend(scope.prefixes().map(|prefix| NodeRef::namespace(id, prefix)));
                set.extend(element.attributes.iter().map(|&a| NodeRef::Node(a)));
            }
            _ => {}
        }
        set.insert(id);
    }
}

/// The prefixes in scope during a walk, one frame per open element.
struct PrefixScope {
    /// Bound URIs per prefix, innermost last.
    bindings: BTreeMap<String, Vec<String>>,
    frames: Vec<Vec<String>>,
}

impl PrefixScope {
    /// The scope just outside `start`: `xml` plus whatever its ancestors
    /// declare.
    fn new(doc: &Document, start: NodeId) -> Self {
        let mut scope = Self {
            bindings: BTreeMap::new(),
            frames: Vec::new(),
        };
        scope
            .bindings
            .insert(ns::XML_PREFIX.to_owned(), vec![ns::XML.to_owned()]);
        let mut chain: Vec<NodeId> = doc.ancestors(start).collect();
        chain.reverse();
        for ancestor in chain {
            scope.enter(doc, ancestor);
        }
        scope
    }

    fn enter(&mut self, doc: &Document, element: NodeId) {
        let mut frame = Vec::new();
        for decl in doc.namespace_declarations(element) {
            self.bindings
                .entry(decl.prefix.clone())
                .or_default()
                .push(decl.uri);
            frame.push(decl.prefix);
        }
        self.frames.push(frame);
    }

    fn leave(&mut self) {
        for prefix in self.frames.pop().unwrap_or_default() {
            if let Some(stack) = self.bindings.get_mut(&prefix) {
                stack.pop();
                if stack.is_empty() {
                    self.bindings.remove(&prefix);
                }
            }
        }
    }

    /// Prefixes with a namespace node on the current element, in namespace
    /// node order. An undeclared default namespace has none.
    fn prefixes(&self) -> impl Iterator<Item = &str> + '_ {
        self.bindings
            .iter()
            .filter(|(prefix, stack)| {
                !(prefix.is_empty() && stack.last().is_some_and(|uri| uri.is_empty()))
            })
            .map(|(prefix, _)| prefix.as_str())
    }
}
