#![forbid(unsafe_code)]

//! Namespace and attribute resolution for one element.
//!
//! The functions here only decide; they never write output or touch the
//! scopes they are given. Two [`NamespaceScope`] stacks are involved:
//!
//! - the *input* scope holds the bindings the input tree declares and is
//!   pushed for every element the serializer enters;
//! - the *output* scope holds the bindings already rendered by output
//!   ancestors and is pushed only for elements that are written.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use stocksund_core::{ns, Error};
use stocksund_xml::{Document, DocumentSubset, NodeId};

use crate::render::{Attr, NsDecl};

/// A push/pop stack of prefix bindings with constant-time lookup.
///
/// A binding of `None` masks the prefix: lookups behave as if it were
/// unbound until the frame that masked it is popped.
#[derive(Debug, Default)]
pub struct NamespaceScope {
    bindings: HashMap<String, Vec<Option<String>>>,
    frames: Vec<Vec<String>>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    /// Bind `prefix` in the innermost frame, replacing a binding that
    /// frame already made.
    pub fn bind(&mut self, prefix: &str, uri: Option<&str>) {
        if self.frames.is_empty() {
            self.push_frame();
        }
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        let stack = self.bindings.entry(prefix.to_owned()).or_default();
        let value = uri.map(str::to_owned);
        if frame.iter().any(|p| p == prefix) {
            if let Some(top) = stack.last_mut() {
                *top = value;
            }
        } else {
            frame.push(prefix.to_owned());
            stack.push(value);
        }
    }

    pub fn pop_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        for prefix in frame {
            if let Some(stack) = self.bindings.get_mut(&prefix) {
                stack.pop();
                if stack.is_empty() {
                    self.bindings.remove(&prefix);
                }
            }
        }
    }

    /// The URI currently bound to `prefix`; `None` when unbound or masked.
    pub fn lookup(&self, prefix: &str) -> Option<&str> {
        self.bindings
            .get(prefix)
            .and_then(|stack| stack.last())
            .and_then(|uri| uri.as_deref())
    }

    /// Every live binding, in no particular order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().filter_map(|(prefix, stack)| {
            stack
                .last()
                .and_then(|uri| uri.as_deref())
                .map(|uri| (prefix.as_str(), uri))
        })
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// What the serializer has to do with namespaces for one element.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NamespaceDecision {
    /// Declarations to render, in canonical order.
    pub decls: Vec<NsDecl>,
    /// Prefixes whose output binding must be masked for descendants.
    pub masked: Vec<String>,
}

fn namespace_visible(subset: Option<&DocumentSubset>, element: NodeId, prefix: &str) -> bool {
    subset.map_or(true, |s| s.contains_namespace(element, prefix))
}

fn node_visible(subset: Option<&DocumentSubset>, id: NodeId) -> bool {
    subset.map_or(true, |s| s.contains_id(id))
}

fn checked_decl(prefix: &str, uri: &str) -> Result<NsDecl, Error> {
    if !uri.is_empty() && !ns::is_absolute_uri(uri) {
        return Err(Error::Canonicalization(format!(
            "relative namespace URI {uri:?} cannot be canonicalized"
        )));
    }
    Ok(NsDecl::new(prefix, uri))
}

/// Namespace declarations of an output element under Canonical XML.
///
/// `input` must already hold the element's own bindings.
pub fn inclusive_namespaces(
    element: NodeId,
    subset: Option<&DocumentSubset>,
    input: &NamespaceScope,
    output: &NamespaceScope,
) -> Result<NamespaceDecision, Error> {
    let mut decision = NamespaceDecision::default();
    let mut has_default = false;
    for (prefix, uri) in input.bindings() {
        if uri.is_empty() {
            continue;
        }
        if namespace_visible(subset, element, prefix) {
            has_default |= prefix.is_empty();
            if output.lookup(prefix) != Some(uri) {
                decision.decls.push(checked_decl(prefix, uri)?);
            }
        } else if !prefix.is_empty() && output.lookup(prefix).is_some() {
            decision.masked.push(prefix.to_owned());
        }
    }
    let rendered_default = output.lookup("").unwrap_or("");
    if !has_default && !rendered_default.is_empty() {
        decision.decls.push(NsDecl::new("", ""));
    }
    decision.decls.sort();
    decision.masked.sort();
    Ok(decision)
}

/// Namespace declarations of an output element under Exclusive XML
/// Canonicalization: only visibly utilized prefixes are considered.
///
/// `inclusive_prefixes` uses `""` for the default namespace.
pub fn exclusive_namespaces(
    doc: &Document,
    element: NodeId,
    subset: Option<&DocumentSubset>,
    input: &NamespaceScope,
    output: &NamespaceScope,
    inclusive_prefixes: &[String],
) -> Result<NamespaceDecision, Error> {
    let mut utilized: BTreeSet<&str> = BTreeSet::new();
    if let Some(el) = doc.element(element) {
        utilized.insert(el.name.prefix_str());
    }
    for &attr_id in doc.attributes(element) {
        if !node_visible(subset, attr_id) {
            continue;
        }
        if let Some(prefix) = doc.attribute(attr_id).and_then(|a| a.name.prefix.as_deref()) {
            utilized.insert(prefix);
        }
    }
    utilized.extend(inclusive_prefixes.iter().map(String::as_str));
    utilized.remove(ns::XML_PREFIX);

    let mut decision = NamespaceDecision::default();
    for prefix in utilized {
        let uri = input.lookup(prefix).unwrap_or("");
        if uri.is_empty() {
            if prefix.is_empty() && !output.lookup("").unwrap_or("").is_empty() {
                decision.decls.push(NsDecl::new("", ""));
            }
            continue;
        }
        if namespace_visible(subset, element, prefix) && output.lookup(prefix) != Some(uri) {
            decision.decls.push(checked_decl(prefix, uri)?);
        }
    }
    decision.decls.sort();
    Ok(decision)
}

/// Namespace nodes selected on an element that is itself not written.
/// They are rendered bare, in canonical order, and bind nothing.
pub fn orphan_namespaces(
    element: NodeId,
    subset: &DocumentSubset,
    input: &NamespaceScope,
    output: &NamespaceScope,
    exclusive_prefixes: Option<&[String]>,
) -> Result<Vec<NsDecl>, Error> {
    let mut decls = Vec::new();
    for (prefix, uri) in input.bindings() {
        if uri.is_empty() || !subset.contains_namespace(element, prefix) {
            continue;
        }
        if let Some(allowed) = exclusive_prefixes {
            if !allowed.iter().any(|p| p == prefix) {
                continue;
            }
        }
        if output.lookup(prefix) != Some(uri) {
            decls.push(checked_decl(prefix, uri)?);
        }
    }
    decls.sort();
    Ok(decls)
}

/// The attributes an output element renders, in canonical order.
///
/// With `inherit_xml`, `xml:*` attributes of the nearest ancestors that
/// are left out of the subset are carried down, unless the element has an
/// attribute of the same name itself.
pub fn attribute_list(
    doc: &Document,
    element: NodeId,
    subset: Option<&DocumentSubset>,
    inherit_xml: bool,
) -> Vec<Attr> {
    let own = doc.attributes(element);
    let mut attrs: Vec<Attr> = own
        .iter()
        .filter(|&&a| node_visible(subset, a))
        .filter_map(|&a| doc.attribute(a))
        .map(Attr::from_attribute)
        .collect();

    if let (true, Some(subset)) = (inherit_xml, subset) {
        let mut inherited: BTreeMap<String, Attr> = BTreeMap::new();
        for ancestor in doc.ancestors(element) {
            if doc.element(ancestor).is_none() || subset.contains_id(ancestor) {
                break;
            }
            for attr in doc.attributes(ancestor).iter().filter_map(|&a| doc.attribute(a)) {
                if attr.is_xml_attribute() && !inherited.contains_key(&attr.name.local_name) {
                    inherited.insert(attr.name.local_name.clone(), Attr::from_attribute(attr));
                }
            }
        }
        let overridden = |local: &str| {
            own.iter()
                .filter_map(|&a| doc.attribute(a))
                .any(|a| a.is_xml_attribute() && a.name.local_name == local)
        };
        attrs.extend(inherited.into_values().filter(|a| !overridden(&a.local_name)));
    }

    attrs.sort();
    attrs
}

/// Attributes selected on an element that is itself not written.
pub fn orphan_attributes(doc: &Document, element: NodeId, subset: &DocumentSubset) -> Vec<Attr> {
    let mut attrs: Vec<Attr> = doc
        .attributes(element)
        .iter()
        .filter(|&&a| subset.contains_id(a))
        .filter_map(|&a| doc.attribute(a))
        .map(Attr::from_attribute)
        .collect();
    attrs.sort();
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use stocksund_xml::{NodeRef, NodeSet};

    fn scope_of(doc: &Document, element: NodeId) -> NamespaceScope {
        let mut chain: Vec<NodeId> = std::iter::once(element).chain(doc.ancestors(element)).collect();
        chain.reverse();
        let mut scope = NamespaceScope::new();
        for n in chain {
            scope.push_frame();
            for decl in doc.namespace_declarations(n) {
                scope.bind(&decl.prefix, Some(&decl.uri));
            }
        }
        scope
    }

    #[test]
    fn test_scope_push_pop_and_mask() {
        let mut scope = NamespaceScope::new();
        scope.push_frame();
        scope.bind("a", Some("urn:a"));
        scope.push_frame();
        scope.bind("a", Some("urn:a2"));
        scope.bind("b", Some("urn:b"));
        assert_eq!(scope.lookup("a"), Some("urn:a2"));
        scope.push_frame();
        scope.bind("a", None);
        assert_eq!(scope.lookup("a"), None);
        scope.pop_frame();
        scope.pop_frame();
        assert_eq!(scope.lookup("a"), Some("urn:a"));
        assert_eq!(scope.lookup("b"), None);
        assert_eq!(scope.depth(), 1);
        assert_eq!(scope.bindings().collect::<Vec<_>>(), vec![("a", "urn:a")]);
    }

    #[test]
    fn test_inclusive_whole_document() {
        let doc = Document::parse(r#"<a xmlns="urn:d" xmlns:p="urn:p"><p:b/></a>"#).unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.children(a).next().unwrap();

        let empty = NamespaceScope::new();
        let decision = inclusive_namespaces(a, None, &scope_of(&doc, a), &empty).unwrap();
        assert_eq!(
            decision.decls,
            vec![NsDecl::new("", "urn:d"), NsDecl::new("p", "urn:p")]
        );

        let mut output = NamespaceScope::new();
        output.push_frame();
        for d in &decision.decls {
            output.bind(&d.prefix, Some(&d.uri));
        }
        let decision = inclusive_namespaces(b, None, &scope_of(&doc, b), &output).unwrap();
        assert!(decision.decls.is_empty());
    }

    #[test]
    fn test_inclusive_default_undeclaration() {
        let doc = Document::parse(r#"<a xmlns="urn:d"><b xmlns=""/></a>"#).unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.children(a).next().unwrap();
        let mut output = NamespaceScope::new();
        output.bind("", Some("urn:d"));
        let decision = inclusive_namespaces(b, None, &scope_of(&doc, b), &output).unwrap();
        assert_eq!(decision.decls, vec![NsDecl::new("", "")]);

        // Nothing rendered yet: no undeclaration at the top.
        let decision =
            inclusive_namespaces(b, None, &scope_of(&doc, b), &NamespaceScope::new()).unwrap();
        assert!(decision.decls.is_empty());
    }

    #[test]
    fn test_inclusive_subset_masks_missing_namespace_nodes() {
        let doc = Document::parse(r#"<a xmlns:p="urn:p"><b/></a>"#).unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.children(a).next().unwrap();
        let subset = NodeSet::from_refs(vec![NodeRef::Node(a), NodeRef::Node(b)])
            .document_order(&doc)
            .unwrap();
        let mut output = NamespaceScope::new();
        output.bind("p", Some("urn:p"));
        let decision =
            inclusive_namespaces(b, Some(&subset), &scope_of(&doc, b), &output).unwrap();
        assert!(decision.decls.is_empty());
        assert_eq!(decision.masked, vec!["p".to_owned()]);
    }

    #[test]
    fn test_exclusive_visibly_utilized() {
        let doc = Document::parse(
            r#"<a xmlns:p="urn:p" xmlns:q="urn:q" xmlns:r="urn:r"><p:b q:x="1"/></a>"#,
        )
        .unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.children(a).next().unwrap();
        let empty = NamespaceScope::new();

        let decision =
            exclusive_namespaces(&doc, a, None, &scope_of(&doc, a), &empty, &[]).unwrap();
        assert!(decision.decls.is_empty());

        let decision =
            exclusive_namespaces(&doc, b, None, &scope_of(&doc, b), &empty, &["r".into()])
                .unwrap();
        assert_eq!(
            decision.decls,
            vec![
                NsDecl::new("p", "urn:p"),
                NsDecl::new("q", "urn:q"),
                NsDecl::new("r", "urn:r"),
            ]
        );
    }

    #[test]
    fn test_relative_uri_rejected() {
        let mut doc = Document::new();
        let a = doc.append_element(doc.root(), "p:a", "relative/path").unwrap();
        let err = inclusive_namespaces(a, None, &scope_of(&doc, a), &NamespaceScope::new())
            .unwrap_err();
        assert!(matches!(err, Error::Canonicalization(_)));
    }

    #[test]
    fn test_inherited_xml_attributes() {
        let doc = Document::parse(
            r#"<a xml:lang="en" xml:space="preserve"><b xml:lang="de"><c xml:space="default"/></b></a>"#,
        )
        .unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.children(a).next().unwrap();
        let c = doc.children(b).next().unwrap();
        let c_attrs = doc.attributes(c).to_vec();
        let subset = NodeSet::from_refs(
            std::iter::once(c).chain(c_attrs).map(NodeRef::Node),
        )
        .document_order(&doc)
        .unwrap();

        let attrs = attribute_list(&doc, c, Some(&subset), true);
        let rendered: String = attrs.iter().map(Attr::render).collect();
        assert_eq!(rendered, r#" xml:lang="de" xml:space="default""#);

        assert_eq!(attribute_list(&doc, c, Some(&subset), false).len(), 1);
    }
}
