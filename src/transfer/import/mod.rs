//! Import ingest pipeline
//!
//! Reads an exported artifact as a byte stream, optionally gunzips it, and
//! applies one collection entity at a time:
//!
//! ```text
//! Idle ──chunk──▶ ParsingEntity ──entity complete──▶ ApplyingEntity ──▶ Idle
//!   └──────────────── end of input ─────────────▶ Done      (any error ▶ Failed)
//! ```
//!
//! Input is only pulled while no entity is being applied, so a slow database
//! holds back the upload instead of buffering it. Entities applied before a
//! failure stay applied.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::{Stream, StreamExt};
use mongodb::bson::{Bson, Document};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AdminError, Result, TransferError};
use crate::store::{DEFAULT_INDEX_NAME, Store, creatable_index_spec};

pub mod scanner;

pub use scanner::EntityScanner;

/// Gzip magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Ingest state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    /// Between entities
    Idle,
    /// Some bytes of an entity have been read
    ParsingEntity,
    /// An entity is being written; no input is read
    ApplyingEntity,
    /// Input ended on a value boundary and every entity was applied
    Done,
    /// Stopped on an error; earlier entities stay applied
    Failed,
}

/// Import settings
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Target database
    pub db: String,
    /// Documents per insert
    pub batch_size: usize,
    /// Declared content type of the upload
    pub content_type: Option<String>,
    /// Declared file name of the upload
    pub filename: Option<String>,
}

impl ImportOptions {
    /// Defaults for importing into `db`: batches of 500, nothing declared
    pub fn new(db: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            batch_size: 500,
            content_type: None,
            filename: None,
        }
    }

    /// Whether the declared metadata announce gzip
    pub fn declares_gzip(&self) -> bool {
        let by_type = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("gzip"));
        let by_name = self.filename.as_deref().is_some_and(|name| {
            let name = name.to_ascii_lowercase();
            name.ends_with(".gz") || name.ends_with(".gzip")
        });
        by_type || by_name
    }
}

/// Outcome for one applied collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    pub name: String,
    /// Documents inserted
    pub documents: u64,
    /// Whether an existing collection was dropped first
    pub replaced: bool,
    /// Non-default indexes recreated
    pub indexes_created: usize,
    /// Indexes the server rejected; these do not fail the import
    pub indexes_failed: usize,
}

/// Result of an import
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    /// One report per applied collection, in input order
    pub collections: Vec<CollectionReport>,
    /// Documents inserted across all collections
    pub documents: u64,
    /// Bytes read from the source, before decompression
    pub bytes_read: u64,
}

/// One collection's metadata and documents, still as JSON
#[derive(Debug)]
pub struct ImportEntity {
    pub name: String,
    pub indexes: Vec<Value>,
    pub documents: Vec<Value>,
}

#[derive(Deserialize)]
struct CollectionMeta {
    name: String,
    #[serde(default)]
    indexes: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntity {
    Nested {
        collection: CollectionMeta,
        #[serde(default)]
        documents: Vec<Value>,
    },
    Flat {
        name: String,
        #[serde(default)]
        indexes: Vec<Value>,
        #[serde(default, alias = "documents")]
        docs: Vec<Value>,
    },
}

impl ImportEntity {
    /// Parse one entity captured by the scanner
    ///
    /// Accepts `{name, indexes, docs}` and `{collection: {name, indexes}, documents}`;
    /// unknown keys are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawEntity = serde_json::from_slice(bytes).map_err(|e| {
            TransferError::Import(format!("invalid collection entry: {e}"))
        })?;
        Ok(match raw {
            RawEntity::Nested {
                collection,
                documents,
            } => Self {
                name: collection.name,
                indexes: collection.indexes,
                documents,
            },
            RawEntity::Flat {
                name,
                indexes,
                docs,
            } => Self {
                name,
                indexes,
                documents: docs,
            },
        })
    }
}

/// Convert an extended-JSON object into a document
fn to_document(value: Value, what: &str) -> Result<Document> {
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(TransferError::Import(format!(
            "{what} must be an object, got {:?}",
            other.element_type()
        ))
        .into()),
        Err(e) => Err(TransferError::Import(format!("invalid {what}: {e}")).into()),
    }
}

/// Gunzip stage, chosen on the first bytes
enum Decoder {
    Pending { declared_gzip: bool },
    Plain,
    Gzip(GzDecoder<Vec<u8>>),
}

impl Decoder {
    fn new(declared_gzip: bool) -> Self {
        Decoder::Pending { declared_gzip }
    }

    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        if let Decoder::Pending { declared_gzip } = *self {
            if chunk.is_empty() {
                return Ok(Vec::new());
            }
            let sniffed = chunk.starts_with(&GZIP_MAGIC[..1])
                && (chunk.len() < 2 || chunk[1] == GZIP_MAGIC[1]);
            *self = if declared_gzip || sniffed {
                debug!("Import payload is gzip-compressed");
                Decoder::Gzip(GzDecoder::new(Vec::new()))
            } else {
                Decoder::Plain
            };
        }

        match self {
            Decoder::Pending { .. } => Ok(Vec::new()),
            Decoder::Plain => Ok(chunk.to_vec()),
            Decoder::Gzip(decoder) => {
                decoder
                    .write_all(chunk)
                    .map_err(|e| TransferError::Compression(e.to_string()))?;
                Ok(std::mem::take(decoder.get_mut()))
            }
        }
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        match self {
            Decoder::Gzip(decoder) => {
                decoder
                    .try_finish()
                    .map_err(|e| TransferError::Compression(e.to_string()))?;
                Ok(std::mem::take(decoder.get_mut()))
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// Streaming importer
pub struct ImportPipeline {
    store: Arc<dyn Store>,
    options: ImportOptions,
    state: IngestState,
    transitions: Vec<IngestState>,
}

impl ImportPipeline {
    /// Create an idle pipeline
    ///
    /// # Arguments
    /// * `store` - Target of drops, creates, inserts and index builds
    /// * `options` - Target database, batch size and declared upload metadata
    pub fn new(store: Arc<dyn Store>, options: ImportOptions) -> Self {
        Self {
            store,
            options,
            state: IngestState::Idle,
            transitions: vec![IngestState::Idle],
        }
    }

    /// Current state
    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn transitions(&self) -> &[IngestState] {
        &self.transitions
    }

    fn enter(&mut self, state: IngestState) {
        if self.state != state {
            debug!("Import state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.transitions.push(state);
        }
    }

    /// Consume `source` to the end, applying each collection as it completes
    ///
    /// No input is pulled while a collection is being written. Gzip is
    /// detected from the declared metadata or from the first bytes.
    ///
    /// # Arguments
    /// * `source` - Upload or file chunks, plain or gzip
    ///
    /// # Returns
    /// * `Result<ImportSummary>` - Per-collection reports; on error, collections
    ///   applied before the failure are left in place
    pub async fn run<S>(&mut self, source: S) -> Result<ImportSummary>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        info!("Starting import into '{}'", self.options.db);
        match self.drive(source).await {
            Ok(summary) => {
                self.enter(IngestState::Done);
                info!(
                    "Import into '{}' finished: {} collections, {} documents",
                    self.options.db,
                    summary.collections.len(),
                    summary.documents
                );
                Ok(summary)
            }
            Err(e) => {
                self.enter(IngestState::Failed);
                warn!("Import into '{}' failed: {}", self.options.db, e);
                Err(e)
            }
        }
    }

    async fn drive<S>(&mut self, mut source: S) -> Result<ImportSummary>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        let mut decoder = Decoder::new(self.options.declares_gzip());
        let mut scanner = EntityScanner::new();
        let mut pending: VecDeque<Vec<u8>> = VecDeque::new();
        let mut summary = ImportSummary::default();
        let mut exhausted = false;

        loop {
            if let Some(bytes) = pending.pop_front() {
                self.enter(IngestState::ApplyingEntity);
                let entity = ImportEntity::parse(&bytes)?;
                drop(bytes);
                let report = self.apply(entity).await?;
                summary.documents += report.documents;
                summary.collections.push(report);
                self.enter(IngestState::Idle);
                continue;
            }

            if exhausted {
                scanner.finish()?;
                return Ok(summary);
            }

            let mut entities = Vec::new();
            match source.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    summary.bytes_read += chunk.len() as u64;
                    let plain = decoder.decode(&chunk)?;
                    scanner.feed(&plain, &mut entities)?;
                }
                None => {
                    let tail = decoder.finish()?;
                    scanner.feed(&tail, &mut entities)?;
                    exhausted = true;
                }
            }
            pending.extend(entities);

            if scanner.in_entity() {
                self.enter(IngestState::ParsingEntity);
            }
        }
    }

    /// Replace one collection with the entity's documents and indexes
    async fn apply(&self, entity: ImportEntity) -> Result<CollectionReport> {
        let db = self.options.db.as_str();
        let name = entity.name.as_str();
        let fail = |e: AdminError| -> AdminError {
            TransferError::Import(format!("collection '{name}': {e}")).into()
        };

        let replaced = self.store.collection_exists(db, name).await.map_err(fail)?;
        if replaced {
            debug!("Dropping existing collection '{}' before import", name);
            self.store.drop_collection(db, name).await.map_err(fail)?;
        }
        self.store.create_collection(db, name).await.map_err(fail)?;

        let mut inserted = 0u64;
        let mut documents = entity.documents.into_iter().peekable();
        while documents.peek().is_some() {
            let batch = documents
                .by_ref()
                .take(self.options.batch_size.max(1))
                .map(|value| to_document(value, "document"))
                .collect::<Result<Vec<_>>>()
                .map_err(fail)?;
            inserted += self.store.insert_many(db, name, batch).await.map_err(fail)?;
            tokio::task::yield_now().await;
        }

        let mut created = 0;
        let mut failed = 0;
        for spec in entity.indexes {
            let spec = match to_document(spec, "index spec") {
                Ok(spec) => spec,
                Err(e) => {
                    warn!("Skipping index on '{}': {}", name, e);
                    failed += 1;
                    continue;
                }
            };
            if spec.get_str("name").ok() == Some(DEFAULT_INDEX_NAME) {
                continue;
            }
            match self
                .store
                .create_index(db, name, creatable_index_spec(&spec))
                .await
            {
                Ok(index) => {
                    debug!("Recreated index '{}' on '{}'", index, name);
                    created += 1;
                }
                Err(e) => {
                    warn!("Failed to recreate index on '{}': {}", name, e);
                    failed += 1;
                }
            }
        }

        info!(
            "Imported collection '{}': {} documents, {} indexes",
            name, inserted, created
        );
        Ok(CollectionReport {
            name: entity.name,
            documents: inserted,
            replaced,
            indexes_created: created,
            indexes_failed: failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::transfer::coordinator::{ExportCoordinator, ExportOptions};
    use crate::transfer::memory::MemoryGuard;
    use crate::transfer::session::SessionRegistry;
    use crate::transfer::sink::GzipSink;
    use crate::transfer::sink::testing::CollectingSink;
    use mongodb::bson::{doc, oid::ObjectId};

    fn stream_of(bytes: Vec<u8>, chunk: usize) -> impl Stream<Item = Result<Bytes>> + Unpin {
        let chunks: Vec<Result<Bytes>> = bytes
            .chunks(chunk.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(chunks)
    }

    async fn export(store: Arc<MemoryStore>, db: &str, chunk_size: u32, gzip: bool) -> Vec<u8> {
        let registry = SessionRegistry::default();
        let coordinator =
            ExportCoordinator::new(store, registry.clone(), MemoryGuard::new(1 << 30));
        registry.register("e").await;
        let plan = coordinator.plan(db, None).await.unwrap();
        let options = ExportOptions {
            chunk_size,
            ..ExportOptions::default()
        };

        let collector = CollectingSink::new();
        if gzip {
            let mut sink = GzipSink::new(collector.clone(), 6);
            coordinator.export_database("e", &plan, &options, &mut sink).await.unwrap();
        } else {
            let mut sink = collector.clone();
            coordinator.export_database("e", &plan, &options, &mut sink).await.unwrap();
        }
        collector.bytes()
    }

    #[tokio::test]
    async fn test_round_trip_preserves_collections_indexes_and_counts() {
        let source = Arc::new(MemoryStore::new());
        let oid = ObjectId::new();
        source.seed(
            "app",
            "users",
            vec![doc! { "_id": oid, "email": "a@x" }, doc! { "email": "b@x" }],
        );
        source.seed_index(
            "app",
            "users",
            doc! { "v": 2, "key": { "email": 1 }, "name": "email_1", "unique": true },
        );
        source.seed("app", "orders", (0..7).map(|i| doc! { "n": i }).collect());
        source.seed("app", "empty", Vec::new());

        let artifact = export(source.clone(), "app", 3, false).await;

        let target = Arc::new(MemoryStore::new());
        let mut pipeline = ImportPipeline::new(target.clone(), ImportOptions::new("copy"));
        let summary = pipeline.run(stream_of(artifact, 64)).await.unwrap();

        assert_eq!(target.collection_names("copy"), source.collection_names("app"));
        for name in source.collection_names("app") {
            assert_eq!(
                target.documents("copy", &name).len(),
                source.documents("app", &name).len()
            );
            assert_eq!(target.index_names("copy", &name), source.index_names("app", &name));
        }
        assert_eq!(target.documents("copy", "users")[0].get_object_id("_id").unwrap(), oid);
        assert_eq!(summary.documents, 9);
        assert_eq!(pipeline.state(), IngestState::Done);
    }

    #[tokio::test]
    async fn test_three_documents_round_trip_through_gzip() {
        let source = Arc::new(MemoryStore::new());
        source.seed("app", "c", vec![doc! { "a": 1 }, doc! { "a": 2 }, doc! { "a": 3 }]);
        let artifact = export(source, "app", 2, true).await;

        let target = Arc::new(MemoryStore::new());
        let mut options = ImportOptions::new("app");
        options.filename = Some("app-json.json.gz".into());
        let mut pipeline = ImportPipeline::new(target.clone(), options);
        pipeline.run(stream_of(artifact, 7)).await.unwrap();

        let docs = target.documents("app", "c");
        assert_eq!(docs, vec![doc! { "a": 1 }, doc! { "a": 2 }, doc! { "a": 3 }]);
    }

    #[tokio::test]
    async fn test_gzip_detected_from_magic_bytes() {
        let source = Arc::new(MemoryStore::new());
        source.seed("app", "c", vec![doc! { "a": 1 }]);
        let artifact = export(source, "app", 10, true).await;

        let target = Arc::new(MemoryStore::new());
        let mut pipeline = ImportPipeline::new(target.clone(), ImportOptions::new("app"));
        pipeline.run(stream_of(artifact, 1)).await.unwrap();
        assert_eq!(target.documents("app", "c").len(), 1);
    }

    #[tokio::test]
    async fn test_existing_collection_is_replaced() {
        let target = Arc::new(MemoryStore::new());
        target.seed("app", "c", vec![doc! { "old": true }, doc! { "old": true }]);

        let payload = br#"{"collections":[{"name":"c","indexes":[],"docs":[{"new":1}]}]}"#.to_vec();
        let mut pipeline = ImportPipeline::new(target.clone(), ImportOptions::new("app"));
        let summary = pipeline.run(stream_of(payload, 16)).await.unwrap();

        assert_eq!(target.documents("app", "c"), vec![doc! { "new": 1 }]);
        assert!(summary.collections[0].replaced);
    }

    #[tokio::test]
    async fn test_nested_entity_shape_and_batched_inserts() {
        let docs: Vec<Value> = (0..1200).map(|i| serde_json::json!({ "i": i })).collect();
        let payload = serde_json::to_vec(&serde_json::json!({
            "collections": [{ "collection": { "name": "big", "indexes": [] }, "documents": docs }]
        }))
        .unwrap();

        let target = Arc::new(MemoryStore::new());
        let mut pipeline = ImportPipeline::new(target.clone(), ImportOptions::new("app"));
        let summary = pipeline.run(stream_of(payload, 4096)).await.unwrap();

        assert_eq!(summary.documents, 1200);
        assert_eq!(target.documents("app", "big").len(), 1200);
    }

    #[tokio::test]
    async fn test_failed_index_does_not_abort_entity() {
        let payload = br#"{"collections":[{"name":"c","indexes":[
            {"v":2,"key":{"_id":1},"name":"_id_"},
            {"v":2,"key":{"a":1},"name":"a_1"},
            {"v":2,"key":{"a":-1},"name":"a_1"}
        ],"docs":[{"a":1}]}]}"#
            .to_vec();

        let target = Arc::new(MemoryStore::new());
        let mut pipeline = ImportPipeline::new(target.clone(), ImportOptions::new("app"));
        let summary = pipeline.run(stream_of(payload, 8)).await.unwrap();

        let report = &summary.collections[0];
        assert_eq!(report.indexes_created, 1);
        assert_eq!(report.indexes_failed, 1);
        assert_eq!(target.index_names("app", "c"), vec!["_id_".to_string(), "a_1".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_entities() {
        let payload = br#"{"collections":[
            {"name":"first","docs":[{"a":1}]},
            {"name":"broken","docs":[{"a":2}]},
            {"name":"never","docs":[{"a":3}]}
        ]}"#
        .to_vec();

        let target = Arc::new(MemoryStore::new());
        target.fail_insert_into("broken");
        let mut pipeline = ImportPipeline::new(target.clone(), ImportOptions::new("app"));
        let err = pipeline.run(stream_of(payload, 8)).await.unwrap_err();

        assert!(matches!(err, AdminError::Transfer(TransferError::Import(_))));
        assert_eq!(pipeline.state(), IngestState::Failed);
        assert_eq!(target.documents("app", "first").len(), 1);
        assert!(target.documents("app", "never").is_empty());
    }

    #[tokio::test]
    async fn test_state_machine_transitions() {
        let payload =
            br#"{"collections":[{"name":"a","docs":[{"x":1}]},{"name":"b","docs":[]}]}"#.to_vec();
        let target = Arc::new(MemoryStore::new());
        let mut pipeline = ImportPipeline::new(target, ImportOptions::new("app"));
        pipeline.run(stream_of(payload, 10)).await.unwrap();

        assert_eq!(
            pipeline.transitions(),
            [
                IngestState::Idle,
                IngestState::ParsingEntity,
                IngestState::ApplyingEntity,
                IngestState::Idle,
                IngestState::ParsingEntity,
                IngestState::ApplyingEntity,
                IngestState::Idle,
                IngestState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_truncated_payload_fails() {
        let payload = br#"{"collections":[{"name":"a","docs":[{"x":1}"#.to_vec();
        let target = Arc::new(MemoryStore::new());
        let mut pipeline = ImportPipeline::new(target, ImportOptions::new("app"));
        assert!(pipeline.run(stream_of(payload, 5)).await.is_err());
    }

    #[test]
    fn test_declared_gzip() {
        let mut options = ImportOptions::new("db");
        assert!(!options.declares_gzip());
        options.content_type = Some("application/gzip".into());
        assert!(options.declares_gzip());

        let mut options = ImportOptions::new("db");
        options.filename = Some("dump.JSON.GZ".into());
        assert!(options.declares_gzip());
    }
}
