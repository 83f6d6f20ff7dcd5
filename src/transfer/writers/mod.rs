//! Format writers for export operations
//!
//! Writers turn batches of documents into bytes appended to a caller-owned
//! buffer. They never touch the transport themselves, so the same writer
//! serves HTTP downloads, backups and CLI exports.

use mongodb::bson::Document;

use crate::error::Result;

pub mod cell;
pub mod csv;
pub mod document;

pub use cell::CellConverter;
pub use csv::{CsvOptions, CsvWriter};
pub use document::DocumentWriter;

/// How an export stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Every selected collection was written
    Completed { collections: usize, documents: u64 },
    /// The session was cancelled before completion
    Cancelled,
    /// A driver or serialization failure stopped the export
    Failed(String),
}

/// Per-collection header emitted before its documents
#[derive(Debug, Clone, Default)]
pub struct CollectionHeader {
    pub name: String,
    pub indexes: Vec<Document>,
    pub estimated_count: u64,
}

/// Trait for writing documents to an export format
pub trait FormatWriter: Send {
    /// Write any leading envelope
    fn begin(&mut self, out: &mut Vec<u8>) -> Result<()>;

    /// Start a collection section
    fn begin_collection(&mut self, _out: &mut Vec<u8>, _header: &CollectionHeader) -> Result<()> {
        Ok(())
    }

    /// Write a batch of documents
    ///
    /// # Returns
    /// * `Result<usize>` - Number of documents written
    fn write_batch(&mut self, out: &mut Vec<u8>, docs: &[Document]) -> Result<usize>;

    /// Close the current collection section
    fn end_collection(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Close every open container and write the trailer for `termination`.
    ///
    /// Must leave the output well-formed whether or not a collection section
    /// is still open.
    fn finish(&mut self, out: &mut Vec<u8>, termination: &Termination) -> Result<()>;

    /// MIME type of the uncompressed output
    fn content_type(&self) -> &'static str;
}
