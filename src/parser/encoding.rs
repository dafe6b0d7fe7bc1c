//! Chunk-level encoding detection and decoding for extract files.
//!
//! Vendor extracts arrive as UTF-8 or UTF-16LE, with or without a BOM.
//! Detection runs per chunk: a BOM on the first chunk locks the encoding for
//! the rest of the file; BOM-less files are re-examined on every chunk using
//! the zero-byte heuristic (ASCII-heavy UTF-16LE text has a NUL in almost
//! every odd byte position).
//!
//! A `FE FF` (big-endian) BOM is still decoded as UTF-16LE on swapped bytes.
//! True UTF-16BE content mis-decodes under this rule; the behaviour is kept
//! deliberately because historic producers depend on it.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
}

/// Fraction of odd byte positions that must be NUL before a BOM-less chunk
/// is classified as UTF-16LE.
const UTF16_ZERO_RATIO: f64 = 0.4;

/// Detect the encoding of a raw chunk.
///
/// `first_chunk` enables BOM sniffing; later chunks only get the heuristic.
pub fn detect_encoding(chunk: &[u8], first_chunk: bool) -> Encoding {
    if first_chunk && chunk.len() >= 2 {
        if chunk[0] == 0xFF && chunk[1] == 0xFE {
            return Encoding::Utf16Le;
        }
        if chunk[0] == 0xFE && chunk[1] == 0xFF {
            warn!("UTF-16BE BOM detected; decoding as UTF-16LE with swapped bytes");
            return Encoding::Utf16Le;
        }
    }

    // Even-length chunk with zero bytes predominantly in odd positions
    if !chunk.is_empty() && chunk.len() % 2 == 0 {
        let odd_positions = chunk.len() / 2;
        let odd_zeros = chunk
            .iter()
            .skip(1)
            .step_by(2)
            .filter(|&&b| b == 0)
            .count();
        if odd_zeros as f64 >= UTF16_ZERO_RATIO * odd_positions as f64 {
            return Encoding::Utf16Le;
        }
    }

    Encoding::Utf8
}

/// Stateful decoder that carries incomplete code units across chunk
/// boundaries so framing never splits a character.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    /// Encoding locked by a BOM on the first chunk, if any
    locked: Option<Encoding>,
    /// Encoding used for the most recent chunk (for flushing the carry)
    last: Option<Encoding>,
    /// Undecoded trailing bytes from the previous chunk
    carry: Vec<u8>,
    seen_first: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk of bytes into text, buffering incomplete sequences.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let first = !self.seen_first;

        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);
        if bytes.is_empty() {
            return String::new();
        }

        let encoding = match self.locked {
            Some(enc) => enc,
            None => {
                let detected = detect_encoding(&bytes, first);
                if first {
                    self.seen_first = true;
                    // A BOM is authoritative for the whole file
                    if detected == Encoding::Utf16Le
                        && bytes.len() >= 2
                        && (bytes[..2] == [0xFF, 0xFE] || bytes[..2] == [0xFE, 0xFF])
                    {
                        self.locked = Some(Encoding::Utf16Le);
                    }
                }
                detected
            }
        };

        self.last = Some(encoding);
        match encoding {
            Encoding::Utf16Le => self.decode_utf16le(bytes),
            Encoding::Utf8 => self.decode_utf8(bytes),
        }
    }

    /// Flush any bytes still carried at end-of-stream.
    ///
    /// A trailing half code unit decodes lossily; the replacement character
    /// it produces is stripped by field cleaning like any other.
    pub fn finish(&mut self) -> String {
        let bytes = std::mem::take(&mut self.carry);
        if bytes.is_empty() {
            return String::new();
        }
        match self.locked.or(self.last).unwrap_or(Encoding::Utf8) {
            Encoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks(2)
                    .map(|pair| u16::from_le_bytes([pair[0], *pair.get(1).unwrap_or(&0)]))
                    .collect();
                char::decode_utf16(units)
                    .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect()
            }
            Encoding::Utf8 => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    fn decode_utf16le(&mut self, mut bytes: Vec<u8>) -> String {
        // Odd trailing byte belongs to the next chunk
        if bytes.len() % 2 != 0 {
            self.carry.push(bytes.pop().unwrap_or_default());
        }

        let mut units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        // A trailing high surrogate pairs with the next chunk's low surrogate
        if let Some(&last) = units.last() {
            if (0xD800..0xDC00).contains(&last) {
                units.pop();
                let tail = bytes.split_off(bytes.len() - 2);
                let mut carried = tail;
                carried.append(&mut self.carry);
                self.carry = carried;
            }
        }

        char::decode_utf16(units)
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    fn decode_utf8(&mut self, bytes: Vec<u8>) -> String {
        let split = incomplete_utf8_suffix(&bytes);
        let (complete, rest) = bytes.split_at(split);
        self.carry = rest.to_vec();
        String::from_utf8_lossy(complete).into_owned()
    }
}

/// Index where an incomplete trailing UTF-8 sequence begins, or `len` when
/// the buffer ends on a complete character.
fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    // A lead byte can sit at most 3 positions from the end (4-byte sequences)
    for back in 1..=3.min(len) {
        let idx = len - back;
        let b = bytes[idx];
        let needed = if b >= 0xF0 {
            4
        } else if b >= 0xE0 {
            3
        } else if b >= 0xC0 {
            2
        } else {
            continue; // continuation or ASCII byte
        };
        if needed > back {
            return idx;
        }
        // Sequence fits entirely; nothing to carry
        return len;
    }
    len
}
