#![forbid(unsafe_code)]

//! Core types shared by the Stocksund crates: the error type, algorithm
//! URIs and namespace constants.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, Result};
