#![forbid(unsafe_code)]

//! Rendering of namespace declarations and attributes in canonical order.

use stocksund_xml::Attribute;

use crate::escape;

/// A namespace declaration to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// The prefix ("" for default namespace).
    pub prefix: String,
    /// The namespace URI. `""` only for `xmlns=""`.
    pub uri: String,
}

impl NsDecl {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            uri: uri.to_owned(),
        }
    }

    /// Render this namespace declaration to a string.
    pub fn render(&self) -> String {
        if self.prefix.is_empty() {
            format!(" xmlns=\"{}\"", escape::escape_attr(&self.uri))
        } else {
            format!(
                " xmlns:{}=\"{}\"",
                self.prefix,
                escape::escape_attr(&self.uri)
            )
        }
    }
}

impl Ord for NsDecl {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Default namespace (empty prefix) sorts first, then by prefix.
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// The namespace URI of the attribute ("" for no namespace).
    pub ns_uri: String,
    pub local_name: String,
    /// The qualified name (prefix:local or just local).
    pub qualified_name: String,
    /// The value after attribute-type normalization, not yet escaped.
    pub value: String,
}

impl Attr {
    /// Build a renderable attribute from a tree attribute. Values of
    /// tokenized types are normalized here.
    pub fn from_attribute(attr: &Attribute) -> Self {
        let value = if attr.attr_type.is_tokenized() {
            escape::normalize_tokenized(&attr.value)
        } else {
            attr.value.clone()
        };
        Self {
            ns_uri: attr.namespace_uri.clone(),
            local_name: attr.name.local_name.clone(),
            qualified_name: attr.name.qualified(),
            value,
        }
    }

    /// Render this attribute to a string.
    pub fn render(&self) -> String {
        format!(
            " {}=\"{}\"",
            self.qualified_name,
            escape::escape_attr(&self.value)
        )
    }
}

impl Ord for Attr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Attributes with no namespace come before those with a namespace.
        // Among those with namespaces, sort by (ns_uri, local_name).
        // Among those without namespaces, sort by local_name.
        match (self.ns_uri.is_empty(), other.ns_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => self
                .ns_uri
                .cmp(&other.ns_uri)
                .then(self.local_name.cmp(&other.local_name)),
        }
    }
}

impl PartialOrd for Attr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stocksund_xml::{AttributeType, QName};

    fn attr(ns_uri: &str, qname: &str) -> Attr {
        let name = QName::parse(qname);
        Attr {
            ns_uri: ns_uri.into(),
            local_name: name.local_name.clone(),
            qualified_name: qname.into(),
            value: String::new(),
        }
    }

    #[test]
    fn test_attribute_order() {
        let mut attrs = vec![
            attr("urn:b", "b:a"),
            attr("", "z"),
            attr("urn:a", "a:z"),
            attr("", "a"),
            attr("urn:a", "c:b"),
        ];
        attrs.sort();
        let names: Vec<&str> = attrs.iter().map(|a| a.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["a", "z", "c:b", "a:z", "b:a"]);
    }

    #[test]
    fn test_namespace_order() {
        let mut decls = vec![
            NsDecl::new("b", "urn:b"),
            NsDecl::new("", "urn:d"),
            NsDecl::new("a", "urn:a"),
        ];
        decls.sort();
        let rendered: String = decls.iter().map(NsDecl::render).collect();
        assert_eq!(rendered, r#" xmlns="urn:d" xmlns:a="urn:a" xmlns:b="urn:b""#);
        assert_eq!(NsDecl::new("", "").render(), " xmlns=\"\"");
    }

    #[test]
    fn test_tokenized_value() {
        let source = Attribute {
            name: QName::parse("ids"),
            namespace_uri: String::new(),
            value: "  one   two ".into(),
            attr_type: AttributeType::IdRefs,
        };
        let a = Attr::from_attribute(&source);
        assert_eq!(a.render(), " ids=\"one two\"");

        let cdata = Attribute {
            attr_type: AttributeType::Cdata,
            ..source
        };
        assert_eq!(Attr::from_attribute(&cdata).render(), " ids=\"  one   two \"");
    }
}
