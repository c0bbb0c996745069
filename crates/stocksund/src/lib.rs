#![forbid(unsafe_code)]

pub use stocksund_c14n as c14n;
pub use stocksund_core as core;
pub use stocksund_crypto as crypto;
pub use stocksund_xml as xml;
