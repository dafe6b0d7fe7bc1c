//! Common Test Utilities
//!
//! Shared helpers for building byte streams, encodings and handler fixtures
//! used across the integration test files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use health_etl::config::AppConfig;
use health_etl::handlers::ExtractHandler;
use health_etl::parser::{DelimitedParser, ParserConfig};
use health_etl::staging::{ColumnTransformation, TargetType};
use health_etl::storage::ByteStream;
use health_etl::types::ParsedRow;

/// Write a fixture file into a test directory
pub fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}

/// Byte stream from pre-chunked input
pub fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// Byte stream delivering the input in fixed-size chunks, exercising
/// separator and code-unit boundaries
pub fn chunked_stream(bytes: Vec<u8>, chunk_size: usize) -> ByteStream {
    let chunks: Vec<Vec<u8>> = bytes
        .chunks(chunk_size.max(1))
        .map(|c| c.to_vec())
        .collect();
    byte_stream(chunks)
}

/// Encode text as UTF-16LE, optionally with a BOM
pub fn utf16le(text: &str, bom: bool) -> Vec<u8> {
    let mut bytes = if bom { vec![0xFF, 0xFE] } else { Vec::new() };
    bytes.extend(text.encode_utf16().flat_map(|u| u.to_le_bytes()));
    bytes
}

pub fn default_parser(stream: ByteStream) -> DelimitedParser {
    DelimitedParser::new(stream, ParserConfig::default(), "test.csv")
}

pub async fn collect_rows(parser: &mut DelimitedParser) -> Vec<ParsedRow> {
    let mut rows = Vec::new();
    while let Some(row) = parser.next_row().await.expect("parse failure") {
        rows.push(row);
    }
    rows
}

/// Three-column handler matching the seed scenarios
pub fn abc_handler() -> ExtractHandler {
    ExtractHandler {
        extract_type: "abc".to_string(),
        table_name: "raw.abc".to_string(),
        columns: vec!["a", "b", "c"],
        natural_keys: vec!["a".to_string()],
        updated_at_column: None,
        transformations: vec![
            ColumnTransformation::new("a", "a", TargetType::Text),
            ColumnTransformation::new("b", "b", TargetType::Text),
            ColumnTransformation::new("c", "c", TargetType::Text),
        ],
    }
}

pub fn test_config() -> AppConfig {
    AppConfig::defaults()
}
