//! In-memory [`Store`] used by unit tests
//!
//! Keeps collections in ordered maps and records cursor activity so tests can
//! assert on batch sizes and on cursors being closed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mongodb::bson::{Document, doc};

use crate::error::{AdminError, Result};
use crate::transfer::streaming::StreamingQuery;

use super::{CursorRequest, DEFAULT_INDEX_NAME, Store};

#[derive(Debug, Default, Clone)]
struct MemoryCollection {
    docs: Vec<Document>,
    indexes: Vec<Document>,
}

impl MemoryCollection {
    fn new() -> Self {
        Self {
            docs: Vec::new(),
            indexes: vec![doc! { "v": 2, "key": { "_id": 1 }, "name": DEFAULT_INDEX_NAME }],
        }
    }
}

/// Shared cursor bookkeeping
#[derive(Debug, Default)]
pub(crate) struct CursorStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub batches: Mutex<Vec<usize>>,
}

impl CursorStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    databases: Mutex<BTreeMap<String, BTreeMap<String, MemoryCollection>>>,
    stats: Arc<CursorStats>,
    fail_cursor_after: Mutex<Option<usize>>,
    fail_insert_into: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection with documents, creating it if needed
    pub fn seed(&self, db: &str, collection: &str, docs: Vec<Document>) {
        let mut dbs = self.databases.lock().unwrap();
        dbs.entry(db.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_insert_with(MemoryCollection::new)
            .docs
            .extend(docs);
    }

    /// Add an index spec to an existing collection
    pub fn seed_index(&self, db: &str, collection: &str, spec: Document) {
        let mut dbs = self.databases.lock().unwrap();
        if let Some(coll) = dbs
            .get_mut(db)
            .and_then(|colls| colls.get_mut(collection))
        {
            coll.indexes.push(spec);
        }
    }

    pub fn documents(&self, db: &str, collection: &str) -> Vec<Document> {
        let dbs = self.databases.lock().unwrap();
        dbs.get(db)
            .and_then(|colls| colls.get(collection))
            .map(|coll| coll.docs.clone())
            .unwrap_or_default()
    }

    pub fn index_names(&self, db: &str, collection: &str) -> Vec<String> {
        let dbs = self.databases.lock().unwrap();
        dbs.get(db)
            .and_then(|colls| colls.get(collection))
            .map(|coll| {
                coll.indexes
                    .iter()
                    .filter_map(|spec| spec.get_str("name").ok().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn collection_names(&self, db: &str) -> Vec<String> {
        let dbs = self.databases.lock().unwrap();
        dbs.get(db)
            .map(|colls| colls.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn cursor_stats(&self) -> Arc<CursorStats> {
        Arc::clone(&self.stats)
    }

    /// Make every cursor fail once it has returned `batches` batches
    pub fn fail_cursor_after(&self, batches: usize) {
        *self.fail_cursor_after.lock().unwrap() = Some(batches);
    }

    /// Make inserts into `collection` fail
    pub fn fail_insert_into(&self, collection: &str) {
        *self.fail_insert_into.lock().unwrap() = Some(collection.to_string());
    }
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| doc.get(key) == Some(expected))
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        Ok(self
            .collection_names(db)
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect())
    }

    async fn collection_exists(&self, db: &str, collection: &str) -> Result<bool> {
        let dbs = self.databases.lock().unwrap();
        Ok(dbs.get(db).is_some_and(|colls| colls.contains_key(collection)))
    }

    async fn estimated_count(&self, db: &str, collection: &str) -> Result<u64> {
        Ok(self.documents(db, collection).len() as u64)
    }

    async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<Document>> {
        let dbs = self.databases.lock().unwrap();
        dbs.get(db)
            .and_then(|colls| colls.get(collection))
            .map(|coll| coll.indexes.clone())
            .ok_or_else(|| AdminError::NotFound(format!("ns not found: {db}.{collection}")))
    }

    async fn database_stats(&self, db: &str) -> Result<Option<Document>> {
        let collections = self.collection_names(db).len() as i64;
        Ok(Some(doc! { "db": db, "collections": collections }))
    }

    async fn open_cursor(
        &self,
        db: &str,
        collection: &str,
        request: CursorRequest,
    ) -> Result<Box<dyn StreamingQuery>> {
        let mut docs: Vec<Document> = self
            .documents(db, collection)
            .into_iter()
            .filter(|d| matches_filter(d, &request.filter))
            .collect();
        if let Some(limit) = request.limit {
            docs.truncate(limit.max(0) as usize);
        }

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let mut query = VecStreamingQuery::new(docs, request.chunk_size as usize)
            .with_stats(Arc::clone(&self.stats));
        if let Some(after) = *self.fail_cursor_after.lock().unwrap() {
            query = query.failing_after(after);
        }
        Ok(Box::new(query))
    }

    async fn create_collection(&self, db: &str, collection: &str) -> Result<()> {
        let mut dbs = self.databases.lock().unwrap();
        let colls = dbs.entry(db.to_string()).or_default();
        if colls.contains_key(collection) {
            return Err(AdminError::Conflict(format!(
                "Collection already exists. NS: {db}.{collection}"
            )));
        }
        colls.insert(collection.to_string(), MemoryCollection::new());
        Ok(())
    }

    async fn drop_collection(&self, db: &str, collection: &str) -> Result<()> {
        let mut dbs = self.databases.lock().unwrap();
        if let Some(colls) = dbs.get_mut(db) {
            colls.remove(collection);
        }
        Ok(())
    }

    async fn insert_many(&self, db: &str, collection: &str, docs: Vec<Document>) -> Result<u64> {
        if self.fail_insert_into.lock().unwrap().as_deref() == Some(collection) {
            return Err(AdminError::Generic(format!("insert into {collection} rejected")));
        }
        let inserted = docs.len() as u64;
        self.seed(db, collection, docs);
        Ok(inserted)
    }

    async fn create_index(&self, db: &str, collection: &str, spec: Document) -> Result<String> {
        let name = spec.get_str("name").unwrap_or_default().to_string();
        let mut dbs = self.databases.lock().unwrap();
        let coll = dbs
            .entry(db.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_insert_with(MemoryCollection::new);

        if coll
            .indexes
            .iter()
            .any(|existing| existing.get_str("name").ok() == Some(name.as_str()))
        {
            return Err(AdminError::Generic(format!(
                "Index with name: {name} already exists with different options"
            )));
        }
        coll.indexes.push(spec);
        Ok(name)
    }
}

/// Streaming query over an owned vector of documents
pub(crate) struct VecStreamingQuery {
    docs: std::vec::IntoIter<Document>,
    batch_size: usize,
    returned_batches: usize,
    fail_after: Option<usize>,
    closed: bool,
    stats: Option<Arc<CursorStats>>,
}

impl VecStreamingQuery {
    pub fn new(docs: Vec<Document>, batch_size: usize) -> Self {
        Self {
            docs: docs.into_iter(),
            batch_size: batch_size.max(1),
            returned_batches: 0,
            fail_after: None,
            closed: false,
            stats: None,
        }
    }

    fn with_stats(mut self, stats: Arc<CursorStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn failing_after(mut self, batches: usize) -> Self {
        self.fail_after = Some(batches);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl StreamingQuery for VecStreamingQuery {
    async fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
        if self.closed {
            return Ok(None);
        }
        if self.fail_after == Some(self.returned_batches) {
            return Err(AdminError::Generic("cursor killed".into()));
        }

        let batch: Vec<Document> = self.docs.by_ref().take(self.batch_size).collect();
        if batch.is_empty() {
            return Ok(None);
        }

        self.returned_batches += 1;
        if let Some(stats) = &self.stats {
            stats.batches.lock().unwrap().push(batch.len());
        }
        Ok(Some(batch))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            if let Some(stats) = &self.stats {
                stats.closed.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}
