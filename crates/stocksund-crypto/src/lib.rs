#![forbid(unsafe_code)]

//! Digest algorithms for the Stocksund XML library.
//!
//! Canonical XML exists to be hashed: this crate maps XML-DSig digest
//! URIs to hash implementations and offers a sink that a canonicalizer
//! can write into directly.

pub mod digest;

pub use digest::{DigestAlgorithm, DigestWriter};
