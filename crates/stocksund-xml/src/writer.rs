#![forbid(unsafe_code)]

//! Plain (non-canonical) XML rendering of nodes.
//!
//! This is the debugging/inspection view of a tree: empty elements are
//! written as `<x/>`, declarations appear where a binding changes, and the
//! document form starts with an XML declaration. Use `stocksund-c14n` for
//! byte-exact output.

use std::fmt;

use stocksund_core::ns;

use crate::document::{Document, Edge};
use crate::node::{NodeId, NodeKind};

impl Document {
    /// Render a node and its descendants as an XML fragment.
    ///
    /// The outermost element carries every binding in scope on it, so the
    /// result is namespace-well-formed on its own. Unknown handles render
    /// as the empty string.
    pub fn to_xml(&self, id: NodeId) -> String {
        Fragment { doc: self, id }.to_string()
    }
}

/// A node rendered through `Display`.
struct Fragment<'a> {
    doc: &'a Document,
    id: NodeId,
}

impl fmt::Display for Fragment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(NodeKind::Attribute(attr)) = self.doc.node_kind(self.id) {
            return write!(f, "{}=\"{}\"", attr.name, escape_attr(&attr.value));
        }
        // Top-level nodes are written one per line, but only in the
        // document form.
        let whole_document = self.id == self.doc.root();
        for edge in self.doc.traverse(self.id) {
            match edge {
                Edge::Open(n) => self.open(f, n)?,
                Edge::Close(n) => {
                    self.close(f, n)?;
                    if whole_document && self.doc.parent(n) == Some(self.doc.root()) {
                        f.write_str("\n")?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Fragment<'_> {
    fn open(&self, f: &mut fmt::Formatter<'_>, id: NodeId) -> fmt::Result {
        let doc = self.doc;
        let Some(kind) = doc.node_kind(id) else {
            return Ok(());
        };
        match kind {
            NodeKind::Document => f.write_str("<?xml version=\"1.0\"?>\n"),
            NodeKind::Element(element) => {
                write!(f, "<{}", element.name)?;
                if id == self.id {
                    for (prefix, uri) in doc.in_scope_namespaces(id) {
                        if prefix != ns::XML_PREFIX {
                            write_decl(f, &prefix, &uri)?;
                        }
                    }
                } else {
                    let parent = doc.parent(id);
                    for decl in doc.namespace_declarations(id) {
                        let inherited = parent
                            .and_then(|p| doc.lookup_namespace_uri(p, &decl.prefix))
                            .unwrap_or("");
                        if inherited != decl.uri {
                            write_decl(f, &decl.prefix, &decl.uri)?;
                        }
                    }
                }
                for &attr_id in &element.attributes {
                    if let Some(attr) = doc.attribute(attr_id) {
                        write!(f, " {}=\"{}\"", attr.name, escape_attr(&attr.value))?;
                    }
                }
                if doc.child_count(id) == 0 {
                    f.write_str("/>")
                } else {
                    f.write_str(">")
                }
            }
            NodeKind::Attribute(_) => Ok(()),
            NodeKind::Text(text) => f.write_str(&escape_text(text)),
            NodeKind::Comment(text) => write!(f, "<!--{text}-->"),
            NodeKind::ProcessingInstruction(pi) => {
                if pi.data.is_empty() {
                    write!(f, "<?{}?>", pi.target)
                } else {
                    write!(f, "<?{} {}?>", pi.target, pi.data)
                }
            }
            NodeKind::DocType(dt) => {
                write!(f, "<!DOCTYPE {}", dt.root_name)?;
                match (&dt.public_id, &dt.system_id) {
                    (Some(public), Some(system)) => {
                        write!(f, " PUBLIC \"{public}\" \"{system}\"")?;
                    }
                    (None, Some(system)) => write!(f, " SYSTEM \"{system}\"")?,
                    _ => {}
                }
                if let Some(subset) = &dt.internal_subset {
                    write!(f, " [{subset}]")?;
                }
                f.write_str(">")
            }
        }
    }

    fn close(&self, f: &mut fmt::Formatter<'_>, id: NodeId) -> fmt::Result {
        match self.doc.element(id) {
            Some(element) if self.doc.child_count(id) > 0 => write!(f, "</{}>", element.name),
            _ => Ok(()),
        }
    }
}

fn write_decl(f: &mut fmt::Formatter<'_>, prefix: &str, uri: &str) -> fmt::Result {
    if prefix.is_empty() {
        write!(f, " xmlns=\"{}\"", escape_attr(uri))
    } else {
        write!(f, " xmlns:{prefix}=\"{}\"", escape_attr(uri))
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}
