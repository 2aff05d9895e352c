//! Framing of a byte stream into text lines

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::warn;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Longest partial line kept while waiting for a terminator, in bytes.
pub const MAX_LINE_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Accumulates bytes and splits them on `\n`.
///
/// Lines are decoded lossily, trimmed of surrounding whitespace (including a `\r` before the
/// terminator) and dropped if empty. A partial line longer than [`MAX_LINE_LEN`] is discarded.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LineFramer {
    /// Add recieved bytes, returning every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &b in bytes {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.buf).trim().to_string();
                self.buf.clear();
                if !line.is_empty() {
                    lines.push(line);
                }
            }
            else {
                if self.buf.len() >= MAX_LINE_LEN {
                    warn!(
                        "Discarding {} bytes from the microcontroller with no line terminator",
                        self.buf.len()
                    );
                    self.buf.clear();
                }
                self.buf.push(b);
            }
        }

        lines
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
