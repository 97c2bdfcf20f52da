//! Incremental tokenizer for concatenated JSON documents.
//!
//! The inbound byte stream is a sequence of whole JSON objects with no
//! length prefix, optionally separated by ASCII whitespace. Document
//! boundaries are found by counting braces, ignoring any brace inside a
//! string literal (with backslash escapes tracked across reads, so a
//! document may be split at any byte).
//!
//! The buffer is a single contiguous allocation of fixed capacity. When
//! the write position reaches the end, consumed bytes are reclaimed by
//! moving the pending document to the front; if the pending document
//! alone fills the whole buffer, the stream cannot make progress and the
//! read fails with an overflow.

/// Scanner state over a fixed-capacity input buffer.
pub struct EnvelopeBuffer {
    buf: Box<[u8]>,
    /// First byte of the pending document.
    start: usize,
    /// Next byte to examine.
    scan: usize,
    /// End of valid data.
    end: usize,
    depth: u32,
    in_string: bool,
    escaped: bool,
    /// Whether the opening brace of the pending document has been seen.
    started: bool,
}

impl EnvelopeBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        EnvelopeBuffer {
            buf: vec![0; capacity].into_boxed_slice(),
            start: 0,
            scan: 0,
            end: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            started: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Whether any bytes of a document (or unexamined input) are pending.
    pub fn has_pending(&self) -> bool {
        self.start < self.end
    }

    /// Make room for the next read, compacting if the buffer is full.
    ///
    /// Fails when the pending document already occupies the entire
    /// buffer, since no read could ever complete it.
    pub fn ensure_room(&mut self) -> Result<(), FramingError> {
        if self.end < self.buf.len() {
            return Ok(());
        }
        if self.start == 0 {
            return Err(FramingError::Overflow {
                capacity: self.buf.len(),
            });
        }
        self.buf.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.scan -= self.start;
        self.start = 0;
        Ok(())
    }

    /// The writable tail of the buffer.
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.buf[self.end..]
    }

    /// Record that `n` bytes were read into [`writable`](Self::writable).
    pub fn commit(&mut self, n: usize) {
        self.end += n;
        debug_assert!(self.end <= self.buf.len());
    }

    /// Scan forward and return the next complete document, if any.
    pub fn next_document(&mut self) -> Result<Option<&[u8]>, FramingError> {
        while self.scan < self.end {
            let byte = self.buf[self.scan];

            if !self.started {
                match byte {
                    b'{' => {
                        self.started = true;
                        self.depth = 1;
                        self.in_string = false;
                        self.escaped = false;
                        self.scan += 1;
                    }
                    b' ' | b'\t' | b'\r' | b'\n' => {
                        self.scan += 1;
                        self.start = self.scan;
                    }
                    other => return Err(FramingError::UnexpectedByte { byte: other }),
                }
                continue;
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
            } else {
                match byte {
                    b'"' => self.in_string = true,
                    b'{' => self.depth += 1,
                    b'}' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            let document = self.start..self.scan + 1;
                            self.scan += 1;
                            self.start = self.scan;
                            self.started = false;
                            return Ok(Some(&self.buf[document]));
                        }
                    }
                    _ => {}
                }
            }
            self.scan += 1;
        }
        Ok(None)
    }
}

/// The byte stream cannot be framed into documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// A single document exceeds the buffer capacity.
    Overflow { capacity: usize },
    /// A non-whitespace byte appeared between documents.
    UnexpectedByte { byte: u8 },
}
