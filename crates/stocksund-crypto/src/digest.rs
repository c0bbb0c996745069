#![forbid(unsafe_code)]

//! Hashing canonical output.
//!
//! [`DigestWriter`] is the sink a `Canonicalizer` writes into when only the
//! digest of the canonical form is wanted: it hashes the bytes as they
//! arrive and keeps none of them. The hash is picked by its XML-DSig digest
//! URI (SHA-1 or SHA-2); [`digest`] is the one-shot form over a buffer.

use std::io;

use digest::Digest;
use stocksund_core::{algorithm, Error};

/// Trait for digest algorithms.
pub trait DigestAlgorithm: Send {
    /// Feed data into the hash.
    fn update(&mut self, data: &[u8]);
    /// Finalize and return the hash value.
    fn finalize(self: Box<Self>) -> Vec<u8>;
    /// Algorithm URI.
    fn uri(&self) -> &'static str;
}

/// Create a digest algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error> {
    match uri {
        algorithm::SHA1 => Ok(Box::new(Sha1Digest::new())),
        algorithm::SHA224 => Ok(Box::new(Sha224Digest::new())),
        algorithm::SHA256 => Ok(Box::new(Sha256Digest::new())),
        algorithm::SHA384 => Ok(Box::new(Sha384Digest::new())),
        algorithm::SHA512 => Ok(Box::new(Sha512Digest::new())),
        _ => Err(Error::UnsupportedAlgorithm(format!(
            "digest algorithm: {uri}"
        ))),
    }
}

/// Compute a digest in one shot.
pub fn digest(uri: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut hasher = from_uri(uri)?;
    hasher.update(data);
    Ok(hasher.finalize())
}

/// A write sink that hashes everything written to it.
pub struct DigestWriter {
    hasher: Box<dyn DigestAlgorithm>,
    written: u64,
}

impl DigestWriter {
    pub fn new(uri: &str) -> Result<Self, Error> {
        Ok(Self {
            hasher: from_uri(uri)?,
            written: 0,
        })
    }

    pub fn uri(&self) -> &'static str {
        self.hasher.uri()
    }

    /// Number of bytes hashed so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> Vec<u8> {
        self.hasher.finalize()
    }
}

impl io::Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for DigestWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestWriter")
            .field("uri", &self.uri())
            .field("written", &self.written)
            .finish()
    }
}

// ── Concrete implementations ─────────────────────────────────────────

macro_rules! impl_digest {
    ($name:ident, $hasher:ty, $uri:expr) => {
        struct $name {
            inner: $hasher,
        }

        impl $name {
            fn new() -> Self {
                Self {
                    inner: <$hasher>::new(),
                }
            }
        }

        impl DigestAlgorithm for $name {
            fn update(&mut self, data: &[u8]) {
                Digest::update(&mut self.inner, data);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                Digest::finalize(self.inner).to_vec()
            }

            fn uri(&self) -> &'static str {
                $uri
            }
        }
    };
}

impl_digest!(Sha1Digest, sha1::Sha1, algorithm::SHA1);
impl_digest!(Sha224Digest, sha2::Sha224, algorithm::SHA224);
impl_digest!(Sha256Digest, sha2::Sha256, algorithm::SHA256);
impl_digest!(Sha384Digest, sha2::Sha384, algorithm::SHA384);
impl_digest!(Sha512Digest, sha2::Sha512, algorithm::SHA512);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_sha256() {
        let result = digest(algorithm::SHA256, b"hello").unwrap();
        assert_eq!(result.len(), 32);
        // Known SHA-256 of "hello"
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(hex(&result), expected);
    }

    #[test]
    fn test_sha1() {
        let result = digest(algorithm::SHA1, b"hello").unwrap();
        assert_eq!(hex(&result), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn test_output_lengths() {
        assert_eq!(digest(algorithm::SHA224, b"").unwrap().len(), 28);
        assert_eq!(digest(algorithm::SHA384, b"").unwrap().len(), 48);
        assert_eq!(digest(algorithm::SHA512, b"hello").unwrap().len(), 64);
    }

    #[test]
    fn test_unknown_uri() {
        let err = digest("http://www.w3.org/2001/04/xmldsig-more#md5", b"x").unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_writer_matches_one_shot() {
        let mut w = DigestWriter::new(algorithm::SHA256).unwrap();
        w.write_all(b"hel").unwrap();
        w.write_all(b"lo").unwrap();
        w.flush().unwrap();
        assert_eq!(w.bytes_written(), 5);
        assert_eq!(w.uri(), algorithm::SHA256);
        assert_eq!(w.finish(), digest(algorithm::SHA256, b"hello").unwrap());
    }
}
