#![forbid(unsafe_code)]

//! Building a [`Document`] from XML text.
//!
//! Parsing is delegated to `roxmltree`; this module only copies the parsed
//! tree into the arena. `roxmltree` resolves names to namespace URIs and
//! drops prefixes, so prefixes are recovered from the source text. A
//! `<!DOCTYPE>` declaration is recorded as a [`DocType`] node.

use stocksund_core::{ns, Error};

use crate::document::Document;
use crate::node::{DocType, NodeId};

/// Return roxmltree parsing options that allow DTD.
///
/// DTD is allowed because roxmltree does not expand external entities or
/// perform entity substitution beyond internal general entities, so it is
/// safe. Canonicalization test vectors routinely carry an internal subset.
pub fn parsing_options() -> roxmltree::ParsingOptions {
    roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    }
}

impl Document {
    /// Parse XML text into a new document.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let source = roxmltree::Document::parse_with_options(text, parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;

        let mut doc = Document::new();
        let root_start = source.root_element().range().start;
        let mut doctype = text
            .get(..root_start)
            .and_then(scan_doctype)
            .map(|dt| doc.create_doctype(dt))
            .transpose()?;

        // Pre-order walk; children are pushed in reverse so that siblings
        // are appended in document order.
        let mut stack: Vec<(roxmltree::Node<'_, '_>, NodeId)> = source
            .root()
            .children()
            .rev()
            .map(|child| (child, doc.root()))
            .collect();

        while let Some((node, parent)) = stack.pop() {
            match node.node_type() {
                roxmltree::NodeType::Root => {}
                roxmltree::NodeType::Element => {
                    if parent == doc.root() {
                        if let Some(dt) = doctype.take() {
                            doc.append_child(parent, dt)?;
                        }
                    }
                    let id = copy_element(&mut doc, text, node)?;
                    doc.append_child(parent, id)?;
                    stack.extend(node.children().rev().map(|child| (child, id)));
                }
                roxmltree::NodeType::Text => {
                    // Character data outside the root element is not part
                    // of the infoset.
                    if parent != doc.root() {
                        doc.append_text(parent, node.text().unwrap_or(""))?;
                    }
                }
                roxmltree::NodeType::Comment => {
                    doc.append_comment(parent, node.text().unwrap_or(""))?;
                }
                roxmltree::NodeType::PI => {
                    if let Some(pi) = node.pi() {
                        let data = pi.value.unwrap_or("").trim_start();
                        doc.append_processing_instruction(parent, pi.target, data)?;
                    }
                }
            }
        }

        tracing::debug!(nodes = doc.len(), "parsed document");
        Ok(doc)
    }

    /// Parse XML from bytes, which must be UTF-8.
    pub fn parse_bytes(data: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))?;
        Self::parse(text)
    }
}

fn copy_element(
    doc: &mut Document,
    text: &str,
    node: roxmltree::Node<'_, '_>,
) -> Result<NodeId, Error> {
    let uri = node.tag_name().namespace().unwrap_or("");
    let local = node.tag_name().name();
    let prefix = element_prefix(text, node, local, uri);
    let id = doc.create_element(&join_qname(prefix.as_deref(), local), uri)?;

    for attr in node.attributes() {
        let attr_uri = attr.namespace().unwrap_or("");
        let attr_prefix = if attr_uri.is_empty() {
            None
        } else if attr_uri == ns::XML {
            Some(ns::XML_PREFIX.to_owned())
        } else {
            source_prefix(text, attr.range().start, attr.name())
                .filter(|&p| is_bound(node, Some(p), attr_uri))
                .map(str::to_owned)
                .or_else(|| node.lookup_prefix(attr_uri).map(str::to_owned))
        };
        let qname = join_qname(attr_prefix.as_deref(), attr.name());
        doc.add_attribute(id, &qname, attr_uri, attr.value())?;
    }

    // Declarations are the bindings that differ from the parent's scope.
    let parent_scope: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| {
            p.namespaces()
                .into_iter()
                .map(|n| (n.name(), n.uri()))
                .collect()
        })
        .unwrap_or_default();
    let mut has_default = false;
    for binding in node.namespaces() {
        has_default |= binding.name().is_none();
        if binding.name() == Some(ns::XML_PREFIX) {
            continue;
        }
        let inherited = parent_scope
            .iter()
            .any(|&(name, uri)| name == binding.name() && uri == binding.uri());
        if !inherited {
            doc.declare_namespace(id, binding.name().unwrap_or(""), binding.uri())?;
        }
    }
    let parent_has_default = parent_scope.iter().any(|(name, _)| name.is_none());
    if parent_has_default && !has_default {
        doc.declare_namespace(id, "", "")?;
    }

    Ok(id)
}

fn element_prefix(
    text: &str,
    node: roxmltree::Node<'_, '_>,
    local: &str,
    uri: &str,
) -> Option<String> {
    if uri.is_empty() {
        return None;
    }
    let from_source = source_prefix(text, node.range().start + 1, local)
        .filter(|&p| is_bound(node, Some(p), uri));
    if let Some(prefix) = from_source {
        return Some(prefix.to_owned());
    }
    if is_bound(node, None, uri) {
        return None;
    }
    node.lookup_prefix(uri).map(str::to_owned)
}

/// The prefix of the qualified name starting at `start` in the source, if
/// its local part matches `local`.
fn source_prefix<'t>(text: &'t str, start: usize, local: &str) -> Option<&'t str> {
    let raw = text.get(start..)?;
    let end = raw
        .find(|c: char| c.is_whitespace() || matches!(c, '=' | '>' | '/'))
        .unwrap_or(raw.len());
    let (prefix, name) = raw[..end].split_once(':')?;
    (name == local).then_some(prefix)
}

fn is_bound(node: roxmltree::Node<'_, '_>, prefix: Option<&str>, uri: &str) -> bool {
    node.namespaces()
        .into_iter()
        .any(|n| n.name() == prefix && n.uri() == uri)
}

fn join_qname(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}:{local}"),
        _ => local.to_owned(),
    }
}

/// Extract the document type declaration from the prolog text.
fn scan_doctype(prolog: &str) -> Option<DocType> {
    let start = prolog.find("<!DOCTYPE")? + "<!DOCTYPE".len();
    let rest = prolog[start..].trim_start();
    let name_end = rest.find(|c: char| c.is_whitespace() || c == '[' || c == '>')?;
    let root_name = rest[..name_end].to_owned();
    let mut rest = rest[name_end..].trim_start();

    let mut public_id = None;
    let mut system_id = None;
    if let Some(r) = rest.strip_prefix("PUBLIC") {
        let (public, r) = quoted(r)?;
        let (system, r) = quoted(r)?;
        public_id = Some(public.to_owned());
        system_id = Some(system.to_owned());
        rest = r;
    } else if let Some(r) = rest.strip_prefix("SYSTEM") {
        let (system, r) = quoted(r)?;
        system_id = Some(system.to_owned());
        rest = r;
    }

    let internal_subset = rest
        .trim_start()
        .strip_prefix('[')
        .and_then(|r| r.rfind(']').map(|end| r[..end].to_owned()));

    Some(DocType {
        root_name,
        public_id,
        system_id,
        internal_subset,
    })
}

fn quoted(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &s[1..];
    let end = body.find(quote)?;
    Some((&body[..end], &body[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn test_parse_prefixes_and_declarations() {
        let doc = Document::parse(
            r#"<a:root xmlns:a="urn:a" xmlns="urn:d" xmlns:unused="urn:u"><child a:attr="1" plain="2"/></a:root>"#,
        )
        .unwrap();
        let root = doc.root_element().unwrap();
        let el = doc.element(root).unwrap();
        assert_eq!(el.name.qualified(), "a:root");
        assert_eq!(el.namespace_uri, "urn:a");
        let decls: Vec<(String, String)> = doc
            .namespace_declarations(root)
            .into_iter()
            .map(|d| (d.prefix, d.uri))
            .collect();
        assert!(decls.contains(&("".into(), "urn:d".into())));
        assert!(decls.contains(&("unused".into(), "urn:u".into())));

        let child = doc.children(root).next().unwrap();
        let child_el = doc.element(child).unwrap();
        assert_eq!(child_el.name.qualified(), "child");
        assert_eq!(child_el.namespace_uri, "urn:d");
        assert!(child_el.namespaces.is_empty());
        let names: Vec<String> = doc
            .attributes(child)
            .iter()
            .map(|&a| doc.attribute(a).unwrap().name.qualified())
            .collect();
        assert_eq!(names, vec!["a:attr", "plain"]);
    }

    #[test]
    fn test_parse_default_undeclaration() {
        let doc = Document::parse(r#"<a xmlns="urn:d"><b:x xmlns:b="urn:b" xmlns=""/></a>"#)
            .unwrap();
        let root = doc.root_element().unwrap();
        let inner = doc.children(root).next().unwrap();
        assert_eq!(doc.lookup_namespace_uri(inner, ""), None);
        assert_eq!(doc.lookup_namespace_uri(inner, "b"), Some("urn:b"));
    }

    #[test]
    fn test_parse_prolog_and_epilog() {
        let doc = Document::parse(
            "<?pi one?><!-- c --><!DOCTYPE r [<!ENTITY e \"x\">]><r>&e;</r><!-- after -->",
        )
        .unwrap();
        let kinds: Vec<&str> = doc
            .children(doc.root())
            .map(|c| match doc.node_kind(c).unwrap() {
                NodeKind::ProcessingInstruction(_) => "pi",
                NodeKind::Comment(_) => "comment",
                NodeKind::DocType(_) => "doctype",
                NodeKind::Element(_) => "element",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["pi", "comment", "doctype", "element", "comment"]);

        let dt = doc.doctype().unwrap();
        match doc.node_kind(dt).unwrap() {
            NodeKind::DocType(dt) => {
                assert_eq!(dt.root_name, "r");
                assert_eq!(dt.internal_subset.as_deref(), Some("<!ENTITY e \"x\">"));
            }
            _ => panic!("expected doctype"),
        }
        let root = doc.root_element().unwrap();
        let text = doc.children(root).next().unwrap();
        assert!(matches!(doc.node_kind(text), Some(NodeKind::Text(t)) if t == "x"));
    }

    #[test]
    fn test_scan_doctype_external_ids() {
        let dt = scan_doctype(r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0//EN" 'x.dtd'>"#)
            .unwrap();
        assert_eq!(dt.root_name, "html");
        assert_eq!(dt.public_id.as_deref(), Some("-//W3C//DTD XHTML 1.0//EN"));
        assert_eq!(dt.system_id.as_deref(), Some("x.dtd"));
        assert_eq!(dt.internal_subset, None);

        let dt = scan_doctype("<!DOCTYPE doc SYSTEM \"doc.dtd\">").unwrap();
        assert_eq!(dt.system_id.as_deref(), Some("doc.dtd"));
        assert_eq!(dt.public_id, None);
    }

    #[test]
    fn test_parse_error() {
        let err = Document::parse("<a><b></a>").unwrap_err();
        assert!(matches!(err, Error::XmlParse(_)));
        assert!(Document::parse_bytes(&[0x3c, 0xff, 0xfe]).is_err());
    }
}
