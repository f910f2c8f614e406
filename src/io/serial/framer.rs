// src/io/serial/framer.rs
//
// Newline framing for the telemetry stream, plus best-effort UTF-8 decoding.

/// Line terminator on the wire
const LINE_END: u8 = b'\n';

/// Default max line length before a forced split
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

// =============================================================================
// Line Framer
// =============================================================================

/// Stateful line framer for streaming data.
/// Bytes survive across `feed` calls until a newline completes the line, so a
/// read timeout in the middle of a line loses nothing.
pub struct LineFramer {
    buffer: Vec<u8>,
    max_length: usize,
}

impl LineFramer {
    pub fn new(max_length: usize) -> Self {
        LineFramer {
            buffer: Vec::new(),
            max_length: max_length.max(1),
        }
    }

    /// Feed raw bytes into the framer.
    /// Returns every complete line, without its terminator.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();

        for &byte in data {
            if byte == LINE_END {
                lines.push(std::mem::take(&mut self.buffer));
                continue;
            }

            self.buffer.push(byte);

            // Force split on max length
            if self.buffer.len() >= self.max_length {
                lines.push(std::mem::take(&mut self.buffer));
            }
        }

        lines
    }

    /// Bytes held for an unterminated line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode bytes as UTF-8, dropping invalid sequences instead of replacing them.
pub fn decode_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());

    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                // valid_up_to() guarantees this prefix is UTF-8
                if let Ok(valid) = std::str::from_utf8(valid) {
                    out.push_str(valid);
                }
                match e.error_len() {
                    Some(len) => bytes = &rest[len..],
                    // Truncated sequence at the end of the input
                    None => return out,
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
