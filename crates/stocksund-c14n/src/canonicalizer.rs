#![forbid(unsafe_code)]

//! The canonical serializer.
//!
//! A [`Canonicalizer`] walks a document (or the traversal root of a
//! document subset) once, in document order, and renders every node that
//! is part of the output. Namespace scopes are pushed and popped in
//! lock-step with the walk, so the cost per element does not depend on
//! its depth.
//!
//! Output is assembled in memory and handed to the sink only after the
//! whole walk succeeded: a failed call writes nothing.

use std::io::Write;

use stocksund_core::{ns, Error};
use stocksund_xml::{Document, DocumentSubset, Edge, NodeId, NodeKind, NodeSet};

use crate::escape;
use crate::render::NsDecl;
use crate::resolver::{self, NamespaceScope};
use crate::C14nMode;

/// Serializes documents and document subsets in canonical form to a sink.
#[derive(Debug)]
pub struct Canonicalizer<W: Write> {
    sink: W,
    mode: C14nMode,
    /// InclusiveNamespaces PrefixList, `""` standing for the default
    /// namespace. Only consulted in exclusive mode.
    inclusive_prefixes: Vec<String>,
}

impl<W: Write> Canonicalizer<W> {
    /// Canonical XML 1.0 with comments.
    pub fn new(sink: W) -> Self {
        Self::with_mode(sink, C14nMode::InclusiveWithComments)
    }

    /// Canonical XML 1.0, with or without comments.
    pub fn with_comments(sink: W, with_comments: bool) -> Self {
        let mode = if with_comments {
            C14nMode::InclusiveWithComments
        } else {
            C14nMode::Inclusive
        };
        Self::with_mode(sink, mode)
    }

    /// Select the variant by algorithm URI.
    pub fn with_algorithm(sink: W, uri: &str) -> Result<Self, Error> {
        let mode =
            C14nMode::from_uri(uri).ok_or_else(|| Error::UnsupportedAlgorithm(uri.to_owned()))?;
        Ok(Self::with_mode(sink, mode))
    }

    pub fn with_mode(sink: W, mode: C14nMode) -> Self {
        Self {
            sink,
            mode,
            inclusive_prefixes: Vec::new(),
        }
    }

    pub fn mode(&self) -> C14nMode {
        self.mode
    }

    /// Set the whitespace-separated InclusiveNamespaces PrefixList used by
    /// exclusive canonicalization. `#default` names the default namespace.
    /// `None` clears the list.
    pub fn set_inclusive_namespace_prefix_list(&mut self, list: Option<&str>) {
        self.inclusive_prefixes = list
            .unwrap_or("")
            .split_whitespace()
            .map(|token| {
                if token == ns::DEFAULT_PREFIX_TOKEN {
                    String::new()
                } else {
                    token.to_owned()
                }
            })
            .collect();
        self.inclusive_prefixes.sort();
        self.inclusive_prefixes.dedup();
    }

    /// The configured prefix list, `""` for `#default`.
    pub fn inclusive_namespace_prefixes(&self) -> &[String] {
        &self.inclusive_prefixes
    }

    /// Canonicalize a whole document.
    pub fn write_document(&mut self, doc: &Document) -> Result<(), Error> {
        tracing::debug!(mode = ?self.mode, "canonicalizing document");
        let out = Serializer::new(doc, None, self.mode, &self.inclusive_prefixes).run(doc.root())?;
        self.emit(&out)
    }

    /// Canonicalize the nodes of `set`. Nodes outside the set are not
    /// rendered, but their descendants may be.
    pub fn write_subset(&mut self, doc: &Document, set: &NodeSet) -> Result<(), Error> {
        let subset = set.document_order(doc)?;
        tracing::debug!(mode = ?self.mode, nodes = subset.len(), "canonicalizing document subset");
        let out = Serializer::new(doc, Some(&subset), self.mode, &self.inclusive_prefixes)
            .run(subset.root())?;
        self.emit(&out)
    }

    /// Canonicalize the subtree rooted at `node`, with its attributes and
    /// namespace nodes. The node may be part of a detached fragment.
    pub fn write_node(&mut self, doc: &Document, node: NodeId) -> Result<(), Error> {
        if !doc.contains(node) {
            return Err(Error::Canonicalization(
                "nodes come from more than one document".into(),
            ));
        }
        self.write_subset(doc, &NodeSet::tree_with_comments(doc, node))
    }

    /// Give back the sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn emit(&mut self, out: &[u8]) -> Result<(), Error> {
        self.sink.write_all(out)?;
        self.sink.flush()?;
        tracing::debug!(bytes = out.len(), "canonical output written");
        Ok(())
    }
}

/// Where the walk is relative to the document element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Prolog,
    Body,
    Epilog,
}

/// State of one canonicalization run.
struct Serializer<'a> {
    doc: &'a Document,
    subset: Option<&'a DocumentSubset>,
    mode: C14nMode,
    inclusive_prefixes: &'a [String],
    input: NamespaceScope,
    output: NamespaceScope,
    /// One entry per open element: whether it was written.
    open: Vec<bool>,
    position: Position,
    out: Vec<u8>,
}

impl<'a> Serializer<'a> {
    fn new(
        doc: &'a Document,
        subset: Option<&'a DocumentSubset>,
        mode: C14nMode,
        inclusive_prefixes: &'a [String],
    ) -> Self {
        Self {
            doc,
            subset,
            mode,
            inclusive_prefixes,
            input: NamespaceScope::new(),
            output: NamespaceScope::new(),
            open: Vec::new(),
            position: Position::Prolog,
            out: Vec::new(),
        }
    }

    fn run(mut self, root: NodeId) -> Result<Vec<u8>, Error> {
        for edge in self.doc.traverse(root) {
            match edge {
                Edge::Open(id) => self.open_node(id)?,
                Edge::Close(id) => self.close_node(id),
            }
        }
        Ok(self.out)
    }

    fn is_visible(&self, id: NodeId) -> bool {
        self.subset.map_or(true, |s| s.contains_id(id))
    }

    fn at_document_level(&self, id: NodeId) -> bool {
        self.doc.parent(id) == Some(self.doc.root())
    }

    fn open_node(&mut self, id: NodeId) -> Result<(), Error> {
        let doc = self.doc;
        let Some(kind) = doc.node_kind(id) else {
            return Ok(());
        };
        match kind {
            NodeKind::Document | NodeKind::Attribute(_) | NodeKind::DocType(_) => {}
            NodeKind::Element(element) => {
                if self.at_document_level(id) {
                    self.position = Position::Body;
                }
                self.input.push_frame();
                for decl in doc.namespace_declarations(id) {
                    self.input.bind(&decl.prefix, Some(&decl.uri));
                }
                let visible = self.is_visible(id);
                if visible {
                    self.start_element(id, &element.name.qualified())?;
                } else if let Some(subset) = self.subset {
                    self.write_orphans(id, subset)?;
                }
                self.open.push(visible);
            }
            NodeKind::Text(text) => {
                if self.is_visible(id) {
                    self.out.extend_from_slice(escape::escape_text(text).as_bytes());
                }
            }
            NodeKind::Comment(text) => {
                if self.mode.with_comments() && self.is_visible(id) {
                    let rendered = format!("<!--{text}-->");
                    self.write_leaf(id, &rendered);
                }
            }
            NodeKind::ProcessingInstruction(pi) => {
                if self.is_visible(id) {
                    let rendered = if pi.data.is_empty() {
                        format!("<?{}?>", pi.target)
                    } else {
                        format!("<?{} {}?>", pi.target, pi.data)
                    };
                    self.write_leaf(id, &rendered);
                }
            }
        }
        Ok(())
    }

    fn close_node(&mut self, id: NodeId) {
        let doc = self.doc;
        let Some(element) = doc.element(id) else {
            return;
        };
        self.input.pop_frame();
        if self.open.pop() == Some(true) {
            self.out.extend_from_slice(b"</");
            self.out.extend_from_slice(element.name.qualified().as_bytes());
            self.out.push(b'>');
            self.output.pop_frame();
        }
        if self.at_document_level(id) {
            self.position = Position::Epilog;
        }
    }

    /// Comments and PIs; at document level they are separated from the
    /// document element by a line feed.
    fn write_leaf(&mut self, id: NodeId, rendered: &str) {
        let document_level = self.at_document_level(id);
        if document_level && self.position == Position::Epilog {
            self.out.push(b'\n');
        }
        self.out.extend_from_slice(rendered.as_bytes());
        if document_level && self.position == Position::Prolog {
            self.out.push(b'\n');
        }
    }

    fn start_element(&mut self, id: NodeId, qname: &str) -> Result<(), Error> {
        let decision = if self.mode.is_exclusive() {
            resolver::exclusive_namespaces(
                self.doc,
                id,
                self.subset,
                &self.input,
                &self.output,
                self.inclusive_prefixes,
            )?
        } else {
            resolver::inclusive_namespaces(id, self.subset, &self.input, &self.output)?
        };
        let inherit_xml = !self.mode.is_exclusive();
        let attrs = resolver::attribute_list(self.doc, id, self.subset, inherit_xml);
        tracing::trace!(
            element = %id,
            declared = decision.decls.len(),
            masked = decision.masked.len(),
            "namespace decision"
        );

        self.out.push(b'<');
        self.out.extend_from_slice(qname.as_bytes());
        for decl in &decision.decls {
            self.out.extend_from_slice(decl.render().as_bytes());
        }
        for attr in &attrs {
            self.out.extend_from_slice(attr.render().as_bytes());
        }
        self.out.push(b'>');

        self.output.push_frame();
        for decl in &decision.decls {
            self.output.bind(&decl.prefix, Some(&decl.uri));
        }
        for prefix in &decision.masked {
            self.output.bind(prefix, None);
        }
        Ok(())
    }

    /// Selected namespace and attribute nodes of an element that is not
    /// itself written.
    fn write_orphans(&mut self, id: NodeId, subset: &DocumentSubset) -> Result<(), Error> {
        let allowed = self.mode.is_exclusive().then_some(self.inclusive_prefixes);
        let decls: Vec<NsDecl> =
            resolver::orphan_namespaces(id, subset, &self.input, &self.output, allowed)?;
        for decl in &decls {
            self.out.extend_from_slice(decl.render().as_bytes());
        }
        for attr in resolver::orphan_attributes(self.doc, id, subset) {
            self.out.extend_from_slice(attr.render().as_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stocksund_xml::NodeRef;

    fn c14n(xml: &str, mode: C14nMode) -> String {
        let doc = Document::parse(xml).unwrap();
        let mut c = Canonicalizer::with_mode(Vec::new(), mode);
        c.write_document(&doc).unwrap();
        String::from_utf8(c.into_inner()).unwrap()
    }

    #[test]
    fn test_simple_c14n() {
        let output = c14n(r#"<root><a b="1" a="2"/></root>"#, C14nMode::Inclusive);
        // Attributes should be sorted by local name (no namespace)
        assert_eq!(output, r#"<root><a a="2" b="1"></a></root>"#);
    }

    #[test]
    fn test_namespace_rendering() {
        let output = c14n(
            r#"<root xmlns:b="http://b" xmlns:a="http://a"><a:child/></root>"#,
            C14nMode::Inclusive,
        );
        assert_eq!(
            output,
            r#"<root xmlns:a="http://a" xmlns:b="http://b"><a:child></a:child></root>"#
        );
    }

    #[test]
    fn test_text_escaping() {
        let output = c14n("<root>a &amp; b &lt; c &gt; d\r</root>", C14nMode::Inclusive);
        assert_eq!(output, "<root>a &amp; b &lt; c &gt; d\n</root>");
    }

    #[test]
    fn test_prolog_and_epilog() {
        let xml = "<?pi data?><!--c1--><!DOCTYPE r><r><!--in--></r><!--c2--><?end?>";
        assert_eq!(
            c14n(xml, C14nMode::InclusiveWithComments),
            "<?pi data?>\n<!--c1-->\n<r><!--in--></r>\n<!--c2-->\n<?end?>"
        );
        assert_eq!(c14n(xml, C14nMode::Inclusive), "<?pi data?>\n<r></r>\n<?end?>");
    }

    #[test]
    fn test_redundant_declarations_dropped() {
        let output = c14n(
            r#"<a xmlns="urn:d" xmlns:p="urn:p"><b xmlns="urn:d"><p:c xmlns:p="urn:p"/></b></a>"#,
            C14nMode::Inclusive,
        );
        assert_eq!(
            output,
            r#"<a xmlns="urn:d" xmlns:p="urn:p"><b><p:c></p:c></b></a>"#
        );
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let output = c14n(r#"<a xmlns="urn:d"><b xmlns=""/></a>"#, C14nMode::Inclusive);
        assert_eq!(output, r#"<a xmlns="urn:d"><b xmlns=""></b></a>"#);
    }

    #[test]
    fn test_exclusive_pushes_declarations_down() {
        let xml = r#"<a xmlns:p="urn:p" xmlns:q="urn:q"><p:b><c q:x="1"/></p:b></a>"#;
        assert_eq!(
            c14n(xml, C14nMode::Exclusive),
            r#"<a><p:b xmlns:p="urn:p"><c xmlns:q="urn:q" q:x="1"></c></p:b></a>"#
        );
    }

    #[test]
    fn test_exclusive_inclusive_prefix_list() {
        let doc =
            Document::parse(r#"<a xmlns="urn:d" xmlns:p="urn:p" xmlns:q="urn:q"><b/></a>"#)
                .unwrap();
        let mut c = Canonicalizer::with_mode(Vec::new(), C14nMode::Exclusive);
        c.set_inclusive_namespace_prefix_list(Some("q  #default"));
        assert_eq!(c.inclusive_namespace_prefixes(), &["".to_owned(), "q".to_owned()]);
        c.write_document(&doc).unwrap();
        assert_eq!(
            String::from_utf8(c.into_inner()).unwrap(),
            r#"<a xmlns="urn:d" xmlns:q="urn:q"><b></b></a>"#
        );
    }

    #[test]
    fn test_with_algorithm() {
        let c = Canonicalizer::with_algorithm(Vec::new(), stocksund_core::algorithm::EXC_C14N)
            .unwrap();
        assert_eq!(c.mode(), C14nMode::Exclusive);
        let err = Canonicalizer::with_algorithm(Vec::new(), "urn:unknown").unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
        assert_eq!(Canonicalizer::new(Vec::new()).mode(), C14nMode::InclusiveWithComments);
        assert_eq!(
            Canonicalizer::with_comments(Vec::new(), false).mode(),
            C14nMode::Inclusive
        );
    }

    #[test]
    fn test_write_node_subtree_carries_ancestor_namespaces() {
        let doc = Document::parse(
            r#"<a xmlns="urn:d" xmlns:p="urn:p" xml:lang="en"><p:b x="1"><c/></p:b></a>"#,
        )
        .unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.children(a).next().unwrap();

        let mut c = Canonicalizer::with_comments(Vec::new(), false);
        c.write_node(&doc, b).unwrap();
        assert_eq!(
            String::from_utf8(c.into_inner()).unwrap(),
            r#"<p:b xmlns="urn:d" xmlns:p="urn:p" x="1" xml:lang="en"><c></c></p:b>"#
        );

        let mut c = Canonicalizer::with_mode(Vec::new(), C14nMode::Exclusive);
        c.write_node(&doc, b).unwrap();
        assert_eq!(
            String::from_utf8(c.into_inner()).unwrap(),
            r#"<p:b xmlns:p="urn:p" x="1"><c xmlns="urn:d"></c></p:b>"#
        );
    }

    #[test]
    fn test_subset_skips_unselected_element() {
        let doc = Document::parse(r#"<a><b><c>t</c></b></a>"#).unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.children(a).next().unwrap();
        let c_el = doc.children(b).next().unwrap();
        let text = doc.children(c_el).next().unwrap();
        let set = NodeSet::from_refs(vec![a, c_el, text]);

        let mut c = Canonicalizer::with_comments(Vec::new(), false);
        c.write_subset(&doc, &set).unwrap();
        assert_eq!(String::from_utf8(c.into_inner()).unwrap(), "<a><c>t</c></a>");
    }

    #[test]
    fn test_subset_orphan_nodes() {
        let doc = Document::parse(r#"<a xmlns:p="urn:p" k="v"><b/></a>"#).unwrap();
        let a = doc.root_element().unwrap();
        let attr = doc.attributes(a)[0];
        let set = NodeSet::from_refs(vec![NodeRef::namespace(a, "p"), NodeRef::Node(attr)]);

        let mut c = Canonicalizer::with_comments(Vec::new(), false);
        c.write_subset(&doc, &set).unwrap();
        assert_eq!(
            String::from_utf8(c.into_inner()).unwrap(),
            r#" xmlns:p="urn:p" k="v""#
        );
    }

    #[test]
    fn test_subset_masked_prefix_redeclared() {
        let doc = Document::parse(r#"<a xmlns:p="urn:p"><b><c/></b></a>"#).unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.children(a).next().unwrap();
        let c_el = doc.children(b).next().unwrap();
        let set = NodeSet::from_refs(vec![
            NodeRef::Node(a),
            NodeRef::namespace(a, "p"),
            NodeRef::Node(b),
            NodeRef::Node(c_el),
            NodeRef::namespace(c_el, "p"),
        ]);

        let mut c = Canonicalizer::with_comments(Vec::new(), false);
        c.write_subset(&doc, &set).unwrap();
        assert_eq!(
            String::from_utf8(c.into_inner()).unwrap(),
            r#"<a xmlns:p="urn:p"><b><c xmlns:p="urn:p"></c></b></a>"#
        );
    }

    #[test]
    fn test_detached_fragment() {
        let mut doc = Document::new();
        doc.append_element(doc.root(), "attached", "").unwrap();
        let frag = doc.create_element("f:frag", "urn:f").unwrap();
        doc.add_attribute(frag, "b", "", "2").unwrap();
        doc.add_attribute(frag, "a", "", "1").unwrap();
        doc.append_text(frag, "x").unwrap();

        let mut c = Canonicalizer::new(Vec::new());
        c.write_node(&doc, frag).unwrap();
        assert_eq!(
            String::from_utf8(c.into_inner()).unwrap(),
            r#"<f:frag xmlns:f="urn:f" a="1" b="2">x</f:frag>"#
        );
    }

    #[test]
    fn test_errors_write_nothing() {
        let mut doc = Document::new();
        let root = doc.append_element(doc.root(), "root", "").unwrap();
        let bad = doc.append_element(root, "p:x", "not/absolute").unwrap();
        let other = Document::new();

        let mut c = Canonicalizer::new(Vec::new());
        assert!(c.write_document(&doc).is_err());
        assert!(c.write_node(&other, bad).is_err());
        assert!(c.write_node(&doc, bad).is_err());
        assert!(c.into_inner().is_empty());
    }

    #[test]
    fn test_deep_document() {
        let mut doc = Document::new();
        let mut parent = doc.root();
        for _ in 0..50_000 {
            parent = doc.append_element(parent, "d", "urn:d").unwrap();
        }
        let mut c = Canonicalizer::new(Vec::new());
        c.write_document(&doc).unwrap();
        let out = c.into_inner();
        assert!(out.starts_with(br#"<d xmlns="urn:d"><d><d>"#));
        assert!(out.ends_with(b"</d></d>"));
    }

    #[test]
    fn test_deep_subtree() {
        let mut doc = Document::new();
        let mut parent = doc.root();
        for _ in 0..50_000 {
            parent = doc.append_element(parent, "d", "urn:d").unwrap();
        }
        let top = doc.root_element().unwrap();
        let mut c = Canonicalizer::new(Vec::new());
        c.write_node(&doc, top).unwrap();
        let subtree = c.into_inner();

        let mut c = Canonicalizer::new(Vec::new());
        c.write_document(&doc).unwrap();
        assert_eq!(subtree, c.into_inner());
    }

    /// A sink whose writes always fail.
    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_is_io_error() {
        let doc = Document::parse("<r/>").unwrap();
        let mut c = Canonicalizer::new(BrokenSink);
        match c.write_document(&doc) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }
}
