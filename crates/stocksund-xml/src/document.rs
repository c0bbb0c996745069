#![forbid(unsafe_code)]

//! Arena-backed XML document.
//!
//! Every node of a document lives in one `Vec` owned by the [`Document`].
//! Parent links are plain indices, so the tree has no reference cycles.
//! [`NodeId`] handles carry the owning document's identity and are checked
//! on every lookup.
//!
//! The tree is built append-only. Each builder operation checks the
//! invariants it could break (one root element, valid names, consistent
//! prefix bindings, comment and PI content) and fails with
//! [`Error::XmlStructure`] instead of producing a malformed tree.

use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use stocksund_core::{ns, Error};

use crate::node::{
    Attribute, AttributeType, DocType, DocumentId, Element, NamespaceDecl, NodeId, NodeKind,
    ProcessingInstruction, QName,
};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct NodeData {
    parent: Option<usize>,
    children: Vec<usize>,
    kind: NodeKind,
}

/// An XML document: the arena that owns all of its nodes.
///
/// Nodes created through the `create_*` methods start out detached and
/// become part of the tree once appended. Detached element subtrees are
/// still valid canonicalization input on their own.
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    nodes: Vec<NodeData>,
    /// Additional ID attribute names (beyond `Id`, `ID`, `id`).
    extra_id_attrs: Vec<String>,
}

/// One step of a depth-first walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Open(NodeId),
    Close(NodeId),
}

impl Document {
    /// Create an empty document containing only the document node.
    pub fn new() -> Self {
        let raw = NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed);
        let id = DocumentId(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN));
        Self {
            id,
            nodes: vec![NodeData {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
            extra_id_attrs: Vec::new(),
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// The document node.
    pub fn root(&self) -> NodeId {
        self.handle(0)
    }

    /// The single element child of the document node, if appended yet.
    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .find(|&c| matches!(self.node_kind(c), Some(NodeKind::Element(_))))
    }

    /// The document type declaration, if any.
    pub fn doctype(&self) -> Option<NodeId> {
        self.children(self.root())
            .find(|&c| matches!(self.node_kind(c), Some(NodeKind::DocType(_))))
    }

    /// Number of nodes in the arena, detached ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A document always holds its document node, so it is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    fn handle(&self, index: usize) -> NodeId {
        NodeId {
            doc: self.id,
            index,
        }
    }

    fn data(&self, id: NodeId) -> Option<&NodeData> {
        if id.doc != self.id {
            return None;
        }
        self.nodes.get(id.index)
    }

    /// Whether `id` is a handle into this document.
    pub fn contains(&self, id: NodeId) -> bool {
        self.data(id).is_some()
    }

    pub fn node_kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.data(id).map(|d| &d.kind)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.node_kind(id).and_then(NodeKind::as_element)
    }

    pub fn attribute(&self, id: NodeId) -> Option<&Attribute> {
        self.node_kind(id).and_then(NodeKind::as_attribute)
    }

    /// The parent of a node. For an attribute this is its owning element.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).and_then(|d| d.parent).map(|p| self.handle(p))
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let children: &[usize] = self.data(id).map_or(&[], |d| d.children.as_slice());
        children.iter().map(move |&c| self.handle(c))
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.data(id).map_or(0, |d| d.children.len())
    }

    pub fn child(&self, id: NodeId, position: usize) -> Option<NodeId> {
        self.data(id)
            .and_then(|d| d.children.get(position))
            .map(|&c| self.handle(c))
    }

    /// Attribute handles of an element, in insertion order.
    pub fn attributes(&self, id: NodeId) -> &[NodeId] {
        self.element(id).map_or(&[], |e| e.attributes.as_slice())
    }

    /// Ancestors of a node, nearest first, not including the node itself.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    /// The outermost ancestor-or-self. This is the document node for any
    /// attached node and the detached subtree's root otherwise.
    pub fn topmost(&self, id: NodeId) -> NodeId {
        self.ancestors(id).last().unwrap_or(id)
    }

    /// Whether a node is not reachable from the document node.
    pub fn is_detached(&self, id: NodeId) -> bool {
        self.topmost(id) != self.root()
    }

    /// Depth-first walk over `id` and its descendants (not attributes).
    pub fn traverse(&self, id: NodeId) -> Traverse<'_> {
        Traverse {
            doc: self,
            start: self.data(id).map(|_| id.index),
            stack: Vec::new(),
        }
    }

    /// `id` followed by all of its descendants in document order.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.traverse(id).filter_map(|edge| match edge {
            Edge::Open(n) => Some(n),
            Edge::Close(_) => None,
        })
    }

    // ── Namespaces ───────────────────────────────────────────────────

    /// The bindings an element introduces itself: the one implied by its
    /// name, the ones implied by prefixed attributes and its explicit
    /// declarations. The `xml` prefix is never included.
    pub fn namespace_declarations(&self, id: NodeId) -> Vec<NamespaceDecl> {
        let Some(element) = self.element(id) else {
            return Vec::new();
        };
        let mut decls: Vec<NamespaceDecl> = Vec::new();
        let mut push = |prefix: &str, uri: &str| {
            if prefix != ns::XML_PREFIX && !decls.iter().any(|d| d.prefix == prefix) {
                decls.push(NamespaceDecl {
                    prefix: prefix.to_owned(),
                    uri: uri.to_owned(),
                });
            }
        };
        push(element.name.prefix_str(), &element.namespace_uri);
        for &attr_id in &element.attributes {
            if let Some(attr) = self.attribute(attr_id) {
                if let Some(prefix) = &attr.name.prefix {
                    push(prefix, &attr.namespace_uri);
                }
            }
        }
        for decl in &element.namespaces {
            push(&decl.prefix, &decl.uri);
        }
        decls
    }

    /// All bindings in scope on an element, keyed by prefix (`""` for the
    /// default namespace). Includes `xml`; an undeclared default namespace
    /// is absent.
    pub fn in_scope_namespaces(&self, id: NodeId) -> BTreeMap<String, String> {
        let mut result = BTreeMap::new();
        if self.element(id).is_none() {
            return result;
        }
        let chain: Vec<NodeId> = std::iter::once(id).chain(self.ancestors(id)).collect();
        for &n in chain.iter().rev() {
            for decl in self.namespace_declarations(n) {
                result.insert(decl.prefix, decl.uri);
            }
        }
        if result.get("").is_some_and(|uri| uri.is_empty()) {
            result.remove("");
        }
        result.insert(ns::XML_PREFIX.to_owned(), ns::XML.to_owned());
        result
    }

    /// Resolve a prefix (`""` for the default namespace) on an element.
    /// Returns `None` when nothing binds it, which is an ordinary outcome.
    pub fn lookup_namespace_uri(&self, id: NodeId, prefix: &str) -> Option<&str> {
        if prefix == ns::XML_PREFIX {
            return Some(ns::XML);
        }
        for n in std::iter::once(id).chain(self.ancestors(id)) {
            let Some(element) = self.element(n) else {
                continue;
            };
            if let Some(uri) = self.local_binding(element, prefix) {
                return if uri.is_empty() { None } else { Some(uri) };
            }
        }
        None
    }

    fn local_binding<'a>(&'a self, element: &'a Element, prefix: &str) -> Option<&'a str> {
        if element.name.prefix_str() == prefix {
            return Some(&element.namespace_uri);
        }
        for &attr_id in &element.attributes {
            if let Some(attr) = self.attribute(attr_id) {
                if attr.name.prefix.as_deref() == Some(prefix) {
                    return Some(&attr.namespace_uri);
                }
            }
        }
        element
            .namespaces
            .iter()
            .find(|d| d.prefix == prefix)
            .map(|d| d.uri.as_str())
    }

    // ── ID lookup ────────────────────────────────────────────────────

    /// Register an additional ID attribute name (e.g. `"wsu:Id"`).
    pub fn add_id_attr(&mut self, name: &str) {
        self.extra_id_attrs.push(name.to_owned());
    }

    /// First attached element whose ID attribute has the given value.
    ///
    /// ID attributes are `Id`, `ID`, `id`, `xml:id`, any attribute declared
    /// with type ID and the names registered with [`Document::add_id_attr`].
    pub fn find_by_id(&self, value: &str) -> Option<NodeId> {
        self.descendants(self.root()).find(|&n| {
            self.attributes(n).iter().any(|&a| {
                let Some(attr) = self.attribute(a) else {
                    return false;
                };
                if attr.value != value {
                    return false;
                }
                let qname = attr.name.qualified();
                attr.attr_type == AttributeType::Id
                    || matches!(qname.as_str(), "Id" | "ID" | "id" | "xml:id")
                    || self.extra_id_attrs.iter().any(|x| *x == qname)
            })
        })
    }

    // ── Builder ──────────────────────────────────────────────────────

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeData {
            parent: None,
            children: Vec::new(),
            kind,
        });
        self.handle(self.nodes.len() - 1)
    }

    fn check_handle(&self, id: NodeId) -> Result<(), Error> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(Error::XmlStructure(format!(
                "node {id} does not belong to this document"
            )))
        }
    }

    /// Create a detached element. `qname` is `prefix:local` or `local`.
    pub fn create_element(&mut self, qname: &str, namespace_uri: &str) -> Result<NodeId, Error> {
        let name = parse_qname(qname)?;
        match name.prefix.as_deref() {
            Some(ns::XMLNS_PREFIX) => {
                return Err(Error::XmlStructure(format!(
                    "element {qname} uses the reserved xmlns prefix"
                )));
            }
            Some(ns::XML_PREFIX) if namespace_uri != ns::XML => {
                return Err(Error::XmlStructure(format!(
                    "the xml prefix must be bound to {}",
                    ns::XML
                )));
            }
            Some(p) if namespace_uri.is_empty() => {
                return Err(Error::XmlStructure(format!(
                    "prefix {p} of element {qname} must have a namespace URI"
                )));
            }
            _ => {}
        }
        if namespace_uri == ns::XML && name.prefix.as_deref() != Some(ns::XML_PREFIX) {
            return Err(Error::XmlStructure(format!(
                "{} may only be bound to the xml prefix",
                ns::XML
            )));
        }
        if namespace_uri == ns::XMLNS {
            return Err(Error::XmlStructure(format!(
                "element {qname} may not be in the {} namespace",
                ns::XMLNS
            )));
        }
        Ok(self.push(NodeKind::Element(Element {
            name,
            namespace_uri: namespace_uri.to_owned(),
            attributes: Vec::new(),
            namespaces: Vec::new(),
        })))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_owned()))
    }

    pub fn create_comment(&mut self, text: &str) -> Result<NodeId, Error> {
        if text.contains("--") || text.ends_with('-') {
            return Err(Error::XmlStructure(format!(
                "comment text may not contain \"--\" or end with \"-\": {text:?}"
            )));
        }
        Ok(self.push(NodeKind::Comment(text.to_owned())))
    }

    pub fn create_processing_instruction(
        &mut self,
        target: &str,
        data: &str,
    ) -> Result<NodeId, Error> {
        if !is_ncname(target) || target.eq_ignore_ascii_case("xml") {
            return Err(Error::XmlStructure(format!(
                "invalid processing instruction target: {target:?}"
            )));
        }
        if data.contains("?>") {
            return Err(Error::XmlStructure(
                "processing instruction data may not contain \"?>\"".into(),
            ));
        }
        if data.starts_with(|c: char| c.is_ascii_whitespace()) {
            return Err(Error::XmlStructure(
                "processing instruction data may not start with white space".into(),
            ));
        }
        Ok(self.push(NodeKind::ProcessingInstruction(ProcessingInstruction {
            target: target.to_owned(),
            data: data.to_owned(),
        })))
    }

    pub fn create_doctype(&mut self, doctype: DocType) -> Result<NodeId, Error> {
        parse_qname(&doctype.root_name)?;
        Ok(self.push(NodeKind::DocType(doctype)))
    }

    /// Append a detached node as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), Error> {
        self.check_handle(parent)?;
        self.check_handle(child)?;
        if child == self.root() {
            return Err(Error::XmlStructure(
                "the document node cannot be a child".into(),
            ));
        }
        if self.parent(child).is_some() {
            return Err(Error::XmlStructure(format!("node {child} already has a parent")));
        }
        // Only a node with children can be an ancestor of `parent`.
        let creates_cycle = child == parent
            || (self.child_count(child) > 0 && self.ancestors(parent).any(|a| a == child));
        if creates_cycle {
            return Err(Error::XmlStructure(format!(
                "node {child} cannot be appended to its own descendant"
            )));
        }

        let parent_is_document = matches!(self.node_kind(parent), Some(NodeKind::Document));
        let parent_is_element = matches!(self.node_kind(parent), Some(NodeKind::Element(_)));
        let has_root = self.root_element().is_some();
        match self.node_kind(child) {
            Some(NodeKind::Element(_)) if parent_is_document && has_root => {
                return Err(Error::XmlStructure(
                    "a document has exactly one root element".into(),
                ));
            }
            Some(NodeKind::Element(_))
            | Some(NodeKind::Comment(_))
            | Some(NodeKind::ProcessingInstruction(_))
                if parent_is_document || parent_is_element => {}
            Some(NodeKind::Text(_)) if parent_is_element => {}
            Some(NodeKind::DocType(_)) if parent_is_document => {
                if has_root || self.doctype().is_some() {
                    return Err(Error::XmlStructure(
                        "a document type declaration must precede the root element and be unique"
                            .into(),
                    ));
                }
            }
            Some(NodeKind::Attribute(_)) => {
                return Err(Error::XmlStructure(
                    "attributes are added with add_attribute, not appended".into(),
                ));
            }
            _ => {
                return Err(Error::XmlStructure(format!(
                    "node {child} cannot be a child of node {parent}"
                )));
            }
        }

        self.nodes[child.index].parent = Some(parent.index);
        self.nodes[parent.index].children.push(child.index);
        Ok(())
    }

    pub fn append_element(
        &mut self,
        parent: NodeId,
        qname: &str,
        namespace_uri: &str,
    ) -> Result<NodeId, Error> {
        let id = self.create_element(qname, namespace_uri)?;
        self.append_child(parent, id)?;
        Ok(id)
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<NodeId, Error> {
        let id = self.create_text(text);
        self.append_child(parent, id)?;
        Ok(id)
    }

    pub fn append_comment(&mut self, parent: NodeId, text: &str) -> Result<NodeId, Error> {
        let id = self.create_comment(text)?;
        self.append_child(parent, id)?;
        Ok(id)
    }

    pub fn append_processing_instruction(
        &mut self,
        parent: NodeId,
        target: &str,
        data: &str,
    ) -> Result<NodeId, Error> {
        let id = self.create_processing_instruction(target, data)?;
        self.append_child(parent, id)?;
        Ok(id)
    }

    /// Add an attribute of undeclared type. See [`Document::add_attribute_typed`].
    pub fn add_attribute(
        &mut self,
        element: NodeId,
        qname: &str,
        namespace_uri: &str,
        value: &str,
    ) -> Result<NodeId, Error> {
        self.add_attribute_typed(element, qname, namespace_uri, value, AttributeType::Undeclared)
    }

    /// Add an attribute to an element.
    ///
    /// Unprefixed attributes are in no namespace. A prefixed attribute
    /// binds its prefix on the element, so the prefix must not already be
    /// bound there to a different URI.
    pub fn add_attribute_typed(
        &mut self,
        element: NodeId,
        qname: &str,
        namespace_uri: &str,
        value: &str,
        attr_type: AttributeType,
    ) -> Result<NodeId, Error> {
        self.check_handle(element)?;
        let name = parse_qname(qname)?;
        if qname == ns::XMLNS_PREFIX || name.prefix.as_deref() == Some(ns::XMLNS_PREFIX) {
            return Err(Error::XmlStructure(format!(
                "{qname} is a namespace declaration; use declare_namespace"
            )));
        }
        match name.prefix.as_deref() {
            None if !namespace_uri.is_empty() => {
                return Err(Error::XmlStructure(format!(
                    "unprefixed attribute {qname} cannot be in namespace {namespace_uri}"
                )));
            }
            Some(p) if namespace_uri.is_empty() => {
                return Err(Error::XmlStructure(format!(
                    "prefix {p} of attribute {qname} must have a namespace URI"
                )));
            }
            Some(ns::XML_PREFIX) if namespace_uri != ns::XML => {
                return Err(Error::XmlStructure(format!(
                    "the xml prefix must be bound to {}",
                    ns::XML
                )));
            }
            Some(p) if p != ns::XML_PREFIX && namespace_uri == ns::XML => {
                return Err(Error::XmlStructure(format!(
                    "{} may only be bound to the xml prefix",
                    ns::XML
                )));
            }
            _ => {}
        }

        let el = self.element(element).ok_or_else(|| {
            Error::XmlStructure(format!("node {element} is not an element"))
        })?;
        for &existing in &el.attributes {
            if let Some(attr) = self.attribute(existing) {
                if attr.namespace_uri == namespace_uri && attr.name.local_name == name.local_name {
                    return Err(Error::XmlStructure(format!("duplicate attribute {qname}")));
                }
            }
        }
        if let Some(prefix) = name.prefix.as_deref() {
            if prefix != ns::XML_PREFIX {
                if let Some(bound) = self.local_binding(el, prefix) {
                    if bound != namespace_uri {
                        return Err(Error::XmlStructure(format!(
                            "prefix {prefix} is already bound to {bound} on this element"
                        )));
                    }
                }
            }
        }

        let attr_id = self.push(NodeKind::Attribute(Attribute {
            name,
            namespace_uri: namespace_uri.to_owned(),
            value: value.to_owned(),
            attr_type,
        }));
        self.nodes[attr_id.index].parent = Some(element.index);
        if let NodeKind::Element(el) = &mut self.nodes[element.index].kind {
            el.attributes.push(attr_id);
        }
        Ok(attr_id)
    }

    /// Add an explicit namespace declaration to an element.
    ///
    /// `prefix` is `""` for the default namespace; an empty `uri` is only
    /// allowed for the default namespace. Declaring a binding the element
    /// already carries is a no-op.
    pub fn declare_namespace(
        &mut self,
        element: NodeId,
        prefix: &str,
        uri: &str,
    ) -> Result<(), Error> {
        self.check_handle(element)?;
        if prefix == ns::XML_PREFIX {
            return if uri == ns::XML {
                Ok(())
            } else {
                Err(Error::XmlStructure(format!(
                    "the xml prefix must be bound to {}",
                    ns::XML
                )))
            };
        }
        if prefix == ns::XMLNS_PREFIX || uri == ns::XMLNS {
            return Err(Error::XmlStructure(
                "the xmlns prefix and namespace cannot be declared".into(),
            ));
        }
        if uri == ns::XML {
            return Err(Error::XmlStructure(format!(
                "{} may only be bound to the xml prefix",
                ns::XML
            )));
        }
        if !prefix.is_empty() {
            if !is_ncname(prefix) {
                return Err(Error::XmlStructure(format!("invalid prefix: {prefix:?}")));
            }
            if uri.is_empty() {
                return Err(Error::XmlStructure(format!(
                    "prefix {prefix} cannot be undeclared"
                )));
            }
        }

        let el = self.element(element).ok_or_else(|| {
            Error::XmlStructure(format!("node {element} is not an element"))
        })?;
        if let Some(bound) = self.local_binding(el, prefix) {
            return if bound == uri {
                Ok(())
            } else {
                Err(Error::XmlStructure(format!(
                    "prefix {prefix:?} is already bound to {bound} on this element"
                )))
            };
        }
        if let NodeKind::Element(el) = &mut self.nodes[element.index].kind {
            el.namespaces.push(NamespaceDecl {
                prefix: prefix.to_owned(),
                uri: uri.to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit-stack depth-first walk produced by [`Document::traverse`].
pub struct Traverse<'a> {
    doc: &'a Document,
    start: Option<usize>,
    /// `(node index, next child position)` for every open node.
    stack: Vec<(usize, usize)>,
}

impl Iterator for Traverse<'_> {
    type Item = Edge;

    fn next(&mut self) -> Option<Edge> {
        if let Some(start) = self.start.take() {
            self.stack.push((start, 0));
            return Some(Edge::Open(self.doc.handle(start)));
        }
        let (index, position) = self.stack.last_mut()?;
        let node = *index;
        match self.doc.nodes[node].children.get(*position) {
            Some(&child) => {
                *position += 1;
                self.stack.push((child, 0));
                Some(Edge::Open(self.doc.handle(child)))
            }
            None => {
                self.stack.pop();
                Some(Edge::Close(self.doc.handle(node)))
            }
        }
    }
}

fn is_name_start_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || (!c.is_ascii() && c.is_alphabetic())
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || c.is_ascii_digit()
        || matches!(c, '-' | '.' | '\u{B7}')
        || (!c.is_ascii() && c.is_alphanumeric())
}

/// Whether `s` is a non-colonized XML name.
pub(crate) fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char)
}

fn parse_qname(qname: &str) -> Result<QName, Error> {
    let name = QName::parse(qname);
    let prefix_ok = name.prefix.as_deref().map_or(true, is_ncname);
    if !prefix_ok || !is_ncname(&name.local_name) {
        return Err(Error::XmlStructure(format!("invalid qualified name: {qname:?}")));
    }
    Ok(name)
}
