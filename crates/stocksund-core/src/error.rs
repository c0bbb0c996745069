#![forbid(unsafe_code)]

/// Errors produced by the Stocksund XML canonicalization library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    /// A builder operation would break a well-formedness or namespace
    /// invariant of the tree.
    #[error("invalid XML structure: {0}")]
    XmlStructure(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::Canonicalization("nodes come from more than one document".into());
        assert_eq!(
            err.to_string(),
            "canonicalization error: nodes come from more than one document"
        );
        let err = Error::UnsupportedAlgorithm("urn:nope".into());
        assert_eq!(err.to_string(), "unsupported algorithm: urn:nope");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe));
    }
}
