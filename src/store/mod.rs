//! Database collaborator interface for bulk transfers
//!
//! The export coordinator, schema sampler and import pipeline talk to the
//! database only through [`Store`]. [`MongoStore`] forwards to the shared
//! driver client; tests use the in-memory store.

use async_trait::async_trait;
use mongodb::bson::Document;

use crate::error::Result;
use crate::transfer::streaming::StreamingQuery;

#[cfg(test)]
pub(crate) mod memory;
pub mod mongo;

pub use mongo::MongoStore;

/// Read routing for bulk cursors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Always read from the primary.
    Primary,
    /// Prefer secondaries to keep bulk reads off the primary.
    #[default]
    SecondaryPreferred,
}

/// Parameters for opening a chunked cursor
#[derive(Debug, Clone)]
pub struct CursorRequest {
    /// Query filter; empty matches everything
    pub filter: Document,
    /// Documents per chunk
    pub chunk_size: u32,
    /// Optional projection
    pub projection: Option<Document>,
    /// Optional cap on returned documents
    pub limit: Option<i64>,
    /// Read preference policy
    pub read_policy: ReadPolicy,
}

impl CursorRequest {
    /// Match-all request with the given chunk size
    pub fn all(chunk_size: u32) -> Self {
        Self {
            filter: Document::new(),
            chunk_size,
            projection: None,
            limit: None,
            read_policy: ReadPolicy::default(),
        }
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Database operations used by the bulk transfer subsystem
#[async_trait]
pub trait Store: Send + Sync {
    /// Collection names in `db`, excluding `system.*` collections
    async fn list_collections(&self, db: &str) -> Result<Vec<String>>;

    /// Whether `collection` exists in `db`
    async fn collection_exists(&self, db: &str, collection: &str) -> Result<bool>;

    /// Metadata-based document count; may be approximate
    async fn estimated_count(&self, db: &str, collection: &str) -> Result<u64>;

    /// Index specifications as returned by `listIndexes`
    async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<Document>>;

    /// `dbStats` output, if the server allows it
    async fn database_stats(&self, db: &str) -> Result<Option<Document>>;

    /// Open a chunked cursor over `collection`
    ///
    /// # Arguments
    /// * `db` - Database name
    /// * `collection` - Collection name
    /// * `request` - Filter, chunk size, projection, limit and read policy
    ///
    /// # Returns
    /// * `Result<Box<dyn StreamingQuery>>` - Query the caller must close on every exit path
    async fn open_cursor(
        &self,
        db: &str,
        collection: &str,
        request: CursorRequest,
    ) -> Result<Box<dyn StreamingQuery>>;

    /// Create an empty collection
    ///
    /// Fails when the namespace already exists.
    async fn create_collection(&self, db: &str, collection: &str) -> Result<()>;

    /// Drop a collection together with its indexes
    async fn drop_collection(&self, db: &str, collection: &str) -> Result<()>;

    /// Insert documents in one ordered batch
    ///
    /// # Returns
    /// * `Result<u64>` - Number of documents inserted; an empty batch is not sent
    async fn insert_many(&self, db: &str, collection: &str, docs: Vec<Document>) -> Result<u64>;

    /// Create one index from a `listIndexes`-shaped spec; returns its name
    async fn create_index(&self, db: &str, collection: &str, spec: Document) -> Result<String>;
}

/// Name of the index MongoDB creates on `_id` for every collection.
pub const DEFAULT_INDEX_NAME: &str = "_id_";

/// Strip the fields `listIndexes` reports but `createIndexes` rejects.
pub fn creatable_index_spec(spec: &Document) -> Document {
    let mut spec = spec.clone();
    spec.remove("v");
    spec.remove("ns");
    spec
}
