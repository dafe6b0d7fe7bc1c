//! Delimited extract parsing: encoding detection plus streaming row framing.

pub mod delimited;
pub mod encoding;

pub use delimited::{DelimitedParser, ParserConfig};
pub use encoding::{detect_encoding, ChunkDecoder, Encoding};
