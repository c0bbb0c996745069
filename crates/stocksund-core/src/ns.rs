#![forbid(unsafe_code)]

//! XML namespace constants used across the library.

/// The namespace permanently bound to the `xml` prefix.
pub const XML: &str = "http://www.w3.org/XML/1998/namespace";

/// The namespace of `xmlns` attributes. Never bound to a prefix in a tree.
pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";

/// The reserved prefix for [`XML`].
pub const XML_PREFIX: &str = "xml";

/// The reserved prefix for namespace declarations.
pub const XMLNS_PREFIX: &str = "xmlns";

/// Token standing for the default namespace in an InclusiveNamespaces
/// PrefixList.
pub const DEFAULT_PREFIX_TOKEN: &str = "#default";

/// Whether `uri` is an absolute URI, i.e. starts with a scheme
/// (`ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"`).
pub fn is_absolute_uri(uri: &str) -> bool {
    let Some((scheme, _)) = uri.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_uris() {
        assert!(is_absolute_uri("urn:x"));
        assert!(is_absolute_uri("http://example.com/ns"));
        assert!(is_absolute_uri("tag+v1.2-x:abc"));
        assert!(is_absolute_uri(XML));
    }

    #[test]
    fn test_relative_uris() {
        assert!(!is_absolute_uri("relative"));
        assert!(!is_absolute_uri("foo/bar:baz"));
        assert!(!is_absolute_uri(":nope"));
        assert!(!is_absolute_uri("1abc:x"));
        assert!(!is_absolute_uri(""));
    }
}
