//! Pull-based streaming parser for headerless, custom-delimited extracts.
//!
//! Field and row separators are multi-character strings (defaults `|^^|` and
//! `|~~|`), so the byte stream is decoded to text first and framed on the
//! row separator with an accumulator: every complete row is emitted, the
//! trailing fragment waits for the next chunk. Memory use is bounded by
//! `max_row_length` plus one chunk, never by file size.

use std::collections::VecDeque;

use futures::StreamExt;

use crate::config::CsvConfig;
use crate::errors::{EtlError, EtlResult};
use crate::parser::encoding::ChunkDecoder;
use crate::storage::ByteStream;
use crate::types::ParsedRow;

/// Cap on retained warning messages per file; the count stays accurate
const MAX_RETAINED_WARNINGS: usize = 50;

#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub field_separator: String,
    pub row_separator: String,
    pub max_row_length: usize,
    pub max_field_length: usize,
    /// Vendor extracts are headerless; this exists for ad-hoc files
    pub has_headers: bool,
    pub skip_empty_rows: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            field_separator: "|^^|".to_string(),
            row_separator: "|~~|".to_string(),
            max_row_length: 10_000_000,
            max_field_length: 5_000,
            has_headers: false,
            skip_empty_rows: true,
        }
    }
}

impl From<&CsvConfig> for ParserConfig {
    fn from(csv: &CsvConfig) -> Self {
        Self {
            field_separator: csv.field_separator.clone(),
            row_separator: csv.row_separator.clone(),
            max_row_length: csv.max_row_length,
            max_field_length: csv.max_field_length,
            has_headers: csv.has_headers,
            skip_empty_rows: csv.skip_empty_rows,
        }
    }
}

/// Streaming parser over one extract file.
///
/// `next_row` pulls chunks from the byte stream only when no framed row is
/// waiting, so downstream backpressure propagates to the source.
pub struct DelimitedParser {
    stream: ByteStream,
    config: ParserConfig,
    /// Source key, used in parse error messages
    key: String,
    decoder: ChunkDecoder,
    accumulator: String,
    /// Byte offset within the accumulator already scanned for a separator
    scanned: usize,
    pending: VecDeque<ParsedRow>,
    row_number: u64,
    bytes_read: u64,
    warnings: Vec<String>,
    warning_count: usize,
    header_pending: bool,
    finished: bool,
}

impl DelimitedParser {
    pub fn new(stream: ByteStream, config: ParserConfig, key: impl Into<String>) -> Self {
        let header_pending = config.has_headers;
        Self {
            stream,
            config,
            key: key.into(),
            decoder: ChunkDecoder::new(),
            accumulator: String::new(),
            scanned: 0,
            pending: VecDeque::new(),
            row_number: 0,
            bytes_read: 0,
            warnings: Vec::new(),
            warning_count: 0,
            header_pending,
            finished: false,
        }
    }

    /// Next row in byte-stream order, or `None` at end of file.
    pub async fn next_row(&mut self) -> EtlResult<Option<ParsedRow>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if self.finished {
                return Ok(None);
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    self.bytes_read += chunk.len() as u64;
                    let text = self.decoder.decode(&chunk);
                    self.accumulator.push_str(&text);
                    self.frame_rows()?;
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(EtlError::Parse {
                        key: self.key.clone(),
                        row: self.row_number,
                        reason: format!("stream read failed: {}", e),
                    });
                }
                None => {
                    self.finished = true;
                    let tail = self.decoder.finish();
                    self.accumulator.push_str(&tail);
                    self.frame_rows()?;
                    // Flush the final unterminated row, if any
                    let rest = std::mem::take(&mut self.accumulator);
                    self.scanned = 0;
                    if !rest.is_empty() {
                        self.emit_row(&rest);
                    }
                }
            }
        }
    }

    /// Total bytes pulled from the stream so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Rows emitted so far (skipped blank rows are not counted)
    pub fn rows_emitted(&self) -> u64 {
        self.row_number
    }

    /// Truncation and cleaning warnings accumulated for this file.
    /// Retention is capped; `warning_count` reflects the true total.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Split complete rows off the accumulator, leaving the last fragment.
    fn frame_rows(&mut self) -> EtlResult<()> {
        let sep = self.config.row_separator.clone();
        loop {
            // Resume scanning where the previous pass stopped, backing up far
            // enough to catch a separator that straddled the chunk boundary
            let mut from = self.scanned.saturating_sub(sep.len() - 1);
            while !self.accumulator.is_char_boundary(from) {
                from -= 1;
            }
            match self.accumulator[from..].find(&sep) {
                Some(rel) => {
                    let pos = from + rel;
                    let row_text: String = self.accumulator[..pos].to_string();
                    self.accumulator.drain(..pos + sep.len());
                    self.scanned = 0;
                    self.check_row_length(&row_text)?;
                    self.emit_row(&row_text);
                }
                None => {
                    self.scanned = self.accumulator.len();
                    self.check_row_length(&self.accumulator)?;
                    return Ok(());
                }
            }
        }
    }

    /// `max_row_length` is a character limit, like `max_field_length`.
    /// Char count never exceeds byte length, so only count when the byte
    /// length is already over.
    fn check_row_length(&self, text: &str) -> EtlResult<()> {
        if text.len() <= self.config.max_row_length {
            return Ok(());
        }
        let chars = text.chars().count();
        if chars > self.config.max_row_length {
            return Err(EtlError::Parse {
                key: self.key.clone(),
                row: self.row_number + 1,
                reason: format!(
                    "row length {} characters exceeds maximum {}",
                    chars, self.config.max_row_length
                ),
            });
        }
        Ok(())
    }

    /// Split a framed row into cleaned fields and queue it for emission.
    fn emit_row(&mut self, row_text: &str) {
        if self.header_pending {
            self.header_pending = false;
            return;
        }
        let candidate_number = self.row_number + 1;
        let field_separator = self.config.field_separator.clone();
        let fields: Vec<String> = row_text
            .split(field_separator.as_str())
            .map(|raw| self.clean_field(raw, candidate_number))
            .collect();

        if self.config.skip_empty_rows && fields.iter().all(|f| f.is_empty()) {
            return;
        }

        self.row_number = candidate_number;
        self.pending
            .push_back(ParsedRow::new(candidate_number, fields));
    }

    /// Apply the documented cleaning: trim, strip NUL and C0 controls except
    /// tab/LF/CR, strip U+FFFD and BOM characters, truncate over-length fields.
    fn clean_field(&mut self, raw: &str, row_number: u64) -> String {
        let mut cleaned: String = raw
            .trim()
            .chars()
            .filter(|&c| {
                !(c != '\t' && c != '\n' && c != '\r' && (c as u32) < 0x20
                    || c == '\u{FFFD}'
                    || c == '\u{FEFF}'
                    || c == '\u{FFFE}')
            })
            .collect();

        let char_count = cleaned.chars().count();
        if char_count > self.config.max_field_length {
            let cut = cleaned
                .char_indices()
                .nth(self.config.max_field_length)
                .map(|(i, _)| i)
                .unwrap_or(cleaned.len());
            cleaned.truncate(cut);
            self.record_warning(format!(
                "row {}: field truncated from {} to {} characters",
                row_number, char_count, self.config.max_field_length
            ));
        }

        cleaned
    }

    fn record_warning(&mut self, message: String) {
        self.warning_count += 1;
        if self.warnings.len() < MAX_RETAINED_WARNINGS {
            tracing::warn!(key = %self.key, "{}", message);
            self.warnings.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
        Box::pin(stream::iter(chunks.into_iter().map(Ok)))
    }

    async fn collect_rows(parser: &mut DelimitedParser) -> Vec<ParsedRow> {
        let mut rows = Vec::new();
        while let Some(row) = parser.next_row().await.unwrap() {
            rows.push(row);
        }
        rows
    }

    #[tokio::test]
    async fn test_two_rows_single_chunk() {
        let input = b"1|^^|2|^^|3|~~|4|^^|5|^^|6".to_vec();
        let mut parser = DelimitedParser::new(
            byte_stream(vec![input]),
            ParserConfig::default(),
            "test.csv",
        );

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fields, vec!["1", "2", "3"]);
        assert_eq!(rows[1].fields, vec!["4", "5", "6"]);
        assert_eq!(rows[0].row_number, 1);
        assert_eq!(rows[1].row_number, 2);
    }

    #[tokio::test]
    async fn test_row_separator_across_chunks() {
        // Split mid-separator: "a|~" + "~|b"
        let mut parser = DelimitedParser::new(
            byte_stream(vec![b"a|~".to_vec(), b"~|b".to_vec()]),
            ParserConfig::default(),
            "test.csv",
        );

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fields, vec!["a"]);
        assert_eq!(rows[1].fields, vec!["b"]);
    }

    #[tokio::test]
    async fn test_empty_file_yields_no_rows() {
        let mut parser = DelimitedParser::new(
            byte_stream(vec![]),
            ParserConfig::default(),
            "empty.csv",
        );
        assert!(collect_rows(&mut parser).await.is_empty());
        assert_eq!(parser.rows_emitted(), 0);
    }

    #[tokio::test]
    async fn test_blank_rows_skipped_without_numbering() {
        let input = b"a|~~||^^||~~|b".to_vec();
        let mut parser = DelimitedParser::new(
            byte_stream(vec![input]),
            ParserConfig::default(),
            "test.csv",
        );

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fields, vec!["a"]);
        // The skipped blank row does not consume a row number
        assert_eq!(rows[1].row_number, 2);
    }

    #[tokio::test]
    async fn test_blank_rows_kept_when_configured() {
        let config = ParserConfig {
            skip_empty_rows: false,
            ..ParserConfig::default()
        };
        let input = b"a|~~||^^||~~|b".to_vec();
        let mut parser = DelimitedParser::new(byte_stream(vec![input]), config, "test.csv");

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows.len(), 3);
        assert!(rows[1].is_blank());
        assert_eq!(rows[2].row_number, 3);
    }

    #[tokio::test]
    async fn test_header_row_skipped_when_configured() {
        let config = ParserConfig {
            has_headers: true,
            ..ParserConfig::default()
        };
        let input = b"col_a|^^|col_b|~~|1|^^|2|~~|".to_vec();
        let mut parser = DelimitedParser::new(byte_stream(vec![input]), config, "test.csv");

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields, vec!["1", "2"]);
        assert_eq!(rows[0].row_number, 1);
    }

    #[tokio::test]
    async fn test_control_characters_stripped() {
        let input = b"ab\x00cd|^^|ef\x01g|^^|tab\tkept|~~|".to_vec();
        let mut parser = DelimitedParser::new(
            byte_stream(vec![input]),
            ParserConfig::default(),
            "test.csv",
        );

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows[0].fields[0], "abcd");
        assert_eq!(rows[0].fields[1], "efg");
        assert_eq!(rows[0].fields[2], "tab\tkept");
    }

    #[tokio::test]
    async fn test_utf16le_bom_round_trip() {
        let text = "x|^^|emb\u{0000}edded|^^|z|~~|";
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend(text.encode_utf16().flat_map(|u| u.to_le_bytes()));

        let mut parser = DelimitedParser::new(
            byte_stream(vec![bytes]),
            ParserConfig::default(),
            "utf16.csv",
        );

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields, vec!["x", "embedded", "z"]);
    }

    #[tokio::test]
    async fn test_field_truncation_warns() {
        let config = ParserConfig {
            max_field_length: 4,
            ..ParserConfig::default()
        };
        let input = b"abcdefgh|^^|ok|~~|".to_vec();
        let mut parser = DelimitedParser::new(byte_stream(vec![input]), config, "test.csv");

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows[0].fields[0], "abcd");
        assert_eq!(rows[0].fields[1], "ok");
        assert_eq!(parser.warning_count(), 1);
        assert!(parser.warnings()[0].contains("truncated"));
    }

    #[tokio::test]
    async fn test_overlong_row_fails_file() {
        let config = ParserConfig {
            max_row_length: 10,
            ..ParserConfig::default()
        };
        let input = b"0123456789ABCDEF|~~|".to_vec();
        let mut parser = DelimitedParser::new(byte_stream(vec![input]), config, "test.csv");

        let err = parser.next_row().await.unwrap_err();
        match err {
            EtlError::Parse { reason, .. } => assert!(reason.contains("exceeds maximum")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_final_row_without_terminator_flushed() {
        let input = b"a|^^|b|~~|c|^^|d".to_vec();
        let mut parser = DelimitedParser::new(
            byte_stream(vec![input]),
            ParserConfig::default(),
            "test.csv",
        );

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].fields, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_order_matches_stream_order() {
        let chunks: Vec<Vec<u8>> = (0..20)
            .map(|i| format!("{}|^^|x|~~|", i).into_bytes())
            .collect();
        let mut parser = DelimitedParser::new(
            byte_stream(chunks),
            ParserConfig::default(),
            "test.csv",
        );

        let rows = collect_rows(&mut parser).await;
        assert_eq!(rows.len(), 20);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.fields[0], i.to_string());
            assert_eq!(row.row_number, (i + 1) as u64);
        }
    }
}
