//! Incremental entity scanner
//!
//! Consumes JSON bytes in arbitrary chunks and surfaces each element of a
//! top-level object's `collections` array as a standalone byte slice, without
//! building the surrounding document tree. Several top-level values may
//! follow each other (a metadata line, then the export body).

use crate::error::{Result, TransferError};

const COLLECTIONS_KEY: &[u8] = b"collections";

/// Streaming scanner for `{"collections":[{...},{...}]}`
#[derive(Debug, Default)]
pub struct EntityScanner {
    /// Open containers, innermost last
    stack: Vec<u8>,
    in_string: bool,
    escaped: bool,
    /// Whether the next string at depth 1 is a key
    expect_key: bool,
    recording_key: bool,
    key: Vec<u8>,
    /// Last complete key at depth 1
    last_key: Vec<u8>,
    in_collections: bool,
    found_collections: bool,
    capturing: bool,
    capture: Vec<u8>,
    offset: u64,
}

impl EntityScanner {
    /// Scanner positioned before the first top-level value
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entity is partially read
    pub fn in_entity(&self) -> bool {
        self.capturing
    }

    /// Whether a `collections` array has been seen
    pub fn found_collections(&self) -> bool {
        self.found_collections
    }

    /// Feed the next chunk; completed entities are appended to `out`
    ///
    /// Chunk boundaries may fall anywhere, including inside strings and
    /// escape sequences.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<Vec<u8>>) -> Result<()> {
        for &byte in chunk {
            self.offset += 1;
            if self.capturing {
                self.capture.push(byte);
            }
            self.step(byte, out)?;
        }
        Ok(())
    }

    /// Check that input ended on a value boundary
    pub fn finish(&self) -> Result<()> {
        if !self.stack.is_empty() || self.in_string {
            return Err(TransferError::Import(format!(
                "unexpected end of input at byte {} ({} unclosed containers)",
                self.offset,
                self.stack.len()
            ))
            .into());
        }
        if !self.found_collections {
            return Err(TransferError::Import("no \"collections\" array found".into()).into());
        }
        Ok(())
    }

    fn step(&mut self, byte: u8, out: &mut Vec<Vec<u8>>) -> Result<()> {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
                if self.recording_key {
                    self.key.push(byte);
                }
            } else if byte == b'\\' {
                self.escaped = true;
                if self.recording_key {
                    self.key.push(byte);
                }
            } else if byte == b'"' {
                self.in_string = false;
                if self.recording_key {
                    self.recording_key = false;
                    self.last_key = std::mem::take(&mut self.key);
                }
            } else if self.recording_key {
                self.key.push(byte);
            }
            return Ok(());
        }

        let depth = self.stack.len();
        match byte {
            b'"' => {
                self.in_string = true;
                if depth == 1 && self.stack[0] == b'{' && self.expect_key {
                    self.recording_key = true;
                    self.key.clear();
                }
            }
            b'{' | b'[' => {
                if depth == 2 && self.in_collections && !self.capturing {
                    self.capturing = true;
                    self.capture = vec![byte];
                } else if depth == 1
                    && byte == b'['
                    && self.stack[0] == b'{'
                    && !self.expect_key
                    && self.last_key == COLLECTIONS_KEY
                {
                    self.in_collections = true;
                    self.found_collections = true;
                }
                self.stack.push(byte);
                if byte == b'{' && self.stack.len() == 1 {
                    self.expect_key = true;
                    self.last_key.clear();
                }
            }
            b'}' | b']' => {
                let expected = if byte == b'}' { b'{' } else { b'[' };
                if self.stack.pop() != Some(expected) {
                    return Err(TransferError::Import(format!(
                        "unbalanced '{}' at byte {}",
                        byte as char, self.offset
                    ))
                    .into());
                }

                match self.stack.len() {
                    2 if self.capturing => {
                        self.capturing = false;
                        out.push(std::mem::take(&mut self.capture));
                    }
                    1 if self.in_collections => self.in_collections = false,
                    _ => {}
                }
            }
            b':' if depth == 1 => self.expect_key = false,
            b',' if depth == 1 => self.expect_key = true,
            b' ' | b'\n' | b'\r' | b'\t' | b':' | b',' => {}
            _ => {
                if depth == 2 && self.in_collections && !self.capturing {
                    return Err(TransferError::Import(format!(
                        "collection entries must be objects (byte {})",
                        self.offset
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}
