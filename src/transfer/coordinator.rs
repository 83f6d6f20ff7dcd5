//! Export coordinator
//!
//! Drives cursor → writer → sink for one export session. Between chunks it
//! checks the session's cancellation flag and the sink's liveness, publishes
//! progress, relieves memory pressure and yields to the scheduler. Every exit
//! path closes the open cursor and removes the session from the registry.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use mongodb::bson::Bson;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::error::{AdminError, Result};
use crate::store::{CursorRequest, ReadPolicy, Store};

use super::memory::MemoryGuard;
use super::progress::ProgressTracker;
use super::schema::SchemaSampler;
use super::session::{ProgressUpdate, SessionRegistry};
use super::sink::ByteSink;
use super::streaming::StreamingQuery;
use super::writers::{
    CollectionHeader, CsvOptions, CsvWriter, DocumentWriter, FormatWriter, Termination,
};

/// Collections selected for a structured export, with their estimated counts
#[derive(Debug, Clone, Default)]
pub struct ExportPlan {
    /// Source database
    pub db: String,
    /// Collection names with their estimated counts, in export order
    pub collections: Vec<(String, u64)>,
    /// Sum of the estimated counts
    pub total: u64,
}

impl ExportPlan {
    /// Collection names in export order
    pub fn names(&self) -> Vec<String> {
        self.collections.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Structured export settings
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Documents per cursor batch and per progress update
    pub chunk_size: u32,
    /// Emit the leading metadata line
    pub include_metadata: bool,
    /// Where bulk reads are routed
    pub read_policy: ReadPolicy,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            include_metadata: true,
            read_policy: ReadPolicy::SecondaryPreferred,
        }
    }
}

/// CSV export settings
#[derive(Debug, Clone)]
pub struct CsvExportOptions {
    pub db: String,
    pub collection: String,
    /// Documents per cursor batch
    pub chunk_size: u32,
    /// Delimiter and header row
    pub csv: CsvOptions,
    /// Column inference settings
    pub sampler: SchemaSampler,
}

/// How an export ended, from the caller's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    /// Every selected document was written
    Completed,
    /// The session was cancelled; a `cancelled` marker closes the output
    Cancelled,
    /// The receiving side went away; nothing more could be written
    ClientDisconnected,
}

/// Result of an export operation
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub export_id: String,
    pub status: ExportStatus,
    /// Collections fully written
    pub collections: usize,
    /// Documents written
    pub documents: u64,
    /// Estimated total at start
    pub total: u64,
    /// Bytes handed to the sink, before any compression stage
    pub bytes: u64,
    /// Wall time of the run
    pub elapsed_ms: u64,
}

enum Stop {
    Cancelled,
    Disconnected,
}

/// Per-run mutable state
struct Run<'a> {
    id: &'a str,
    db: &'a str,
    writer: &'a mut dyn FormatWriter,
    sink: &'a mut dyn ByteSink,
    buffer: Vec<u8>,
    processed: u64,
    bytes: u64,
    collections_done: usize,
}

/// Coordinator for export operations
#[derive(Clone)]
pub struct ExportCoordinator {
    store: Arc<dyn Store>,
    registry: SessionRegistry,
    memory: MemoryGuard,
    tracker: Option<Arc<ProgressTracker>>,
}

impl ExportCoordinator {
    /// Create a coordinator
    ///
    /// # Arguments
    /// * `store` - Source of cursors and counts
    /// * `registry` - Where sessions are looked up for cancellation and progress
    /// * `memory` - Pressure check run between chunks
    pub fn new(store: Arc<dyn Store>, registry: SessionRegistry, memory: MemoryGuard) -> Self {
        Self {
            store,
            registry,
            memory,
            tracker: None,
        }
    }

    /// Mirror progress to a terminal progress bar
    pub fn with_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = Some(Arc::new(tracker));
        self
    }

    /// Registry shared with this coordinator
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Select collections and collect their estimated counts.
    ///
    /// Fails with [`AdminError::NotFound`] when nothing matches. A count that
    /// cannot be estimated is logged and treated as 0.
    ///
    /// # Arguments
    /// * `db` - Database to export
    /// * `only` - Restrict to these collections; `None` selects all of them
    pub async fn plan(&self, db: &str, only: Option<&[String]>) -> Result<ExportPlan> {
        let names: Vec<String> = self
            .store
            .list_collections(db)
            .await?
            .into_iter()
            .filter(|name| only.is_none_or(|wanted| wanted.contains(name)))
            .collect();

        if names.is_empty() {
            return Err(AdminError::NotFound(format!(
                "No collections found in database '{db}'"
            )));
        }

        let mut collections = Vec::with_capacity(names.len());
        let mut total = 0;
        for name in names {
            let count = match self.store.estimated_count(db, &name).await {
                Ok(count) => count,
                Err(e) => {
                    warn!("Failed to count documents in '{}': {}", name, e);
                    0
                }
            };
            total += count;
            collections.push((name, count));
        }

        Ok(ExportPlan {
            db: db.to_string(),
            collections,
            total,
        })
    }

    /// Stream a structured export of `plan` into `sink`.
    ///
    /// The session `export_id` must already be registered; it is removed when
    /// this returns. Cancellation and client disconnect end the run with
    /// `Ok`; driver and encoding failures write an error marker and return
    /// `Err`.
    ///
    /// # Arguments
    /// * `export_id` - Registered session id
    /// * `plan` - Collections to write, from [`Self::plan`]
    /// * `options` - Chunk size, metadata line and read routing
    /// * `sink` - Destination; finished on every exit path
    ///
    /// # Returns
    /// * `Result<ExportSummary>` - How the run ended and what it wrote
    pub async fn export_database(
        &self,
        export_id: &str,
        plan: &ExportPlan,
        options: &ExportOptions,
        sink: &mut dyn ByteSink,
    ) -> Result<ExportSummary> {
        let started = Instant::now();
        info!(
            "Starting export {} of '{}' ({} collections, ~{} documents)",
            export_id,
            plan.db,
            plan.collections.len(),
            plan.total
        );

        self.registry
            .update_progress(
                export_id,
                ProgressUpdate::new()
                    .processed(0)
                    .total(plan.total)
                    .current_collection("")
                    .collections(plan.names()),
            )
            .await;
        if let Some(tracker) = &self.tracker {
            tracker.set_total(plan.total);
        }

        let mut writer = DocumentWriter::new(plan.db.as_str());
        if options.include_metadata {
            writer = writer.with_metadata(self.metadata(export_id, plan, options).await);
        }

        let mut run = Run {
            id: export_id,
            db: &plan.db,
            writer: &mut writer,
            sink,
            buffer: Vec::new(),
            processed: 0,
            bytes: 0,
            collections_done: 0,
        };

        let outcome = self.write_collections(&mut run, plan, options).await;
        self.conclude(run, outcome, plan.total, started).await
    }

    /// Stream one collection as CSV into `sink`.
    ///
    /// Same session contract as [`Self::export_database`]. Columns are
    /// sampled once before the first row and never change afterwards.
    pub async fn export_csv(
        &self,
        export_id: &str,
        options: &CsvExportOptions,
        sink: &mut dyn ByteSink,
    ) -> Result<ExportSummary> {
        let started = Instant::now();
        let db = options.db.as_str();
        let collection = options.collection.as_str();

        let total = match self.store.estimated_count(db, collection).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count documents in '{}': {}", collection, e);
                0
            }
        };
        self.registry
            .update_progress(
                export_id,
                ProgressUpdate::new()
                    .total(total)
                    .current_collection(collection)
                    .collections(vec![collection.to_string()]),
            )
            .await;
        if let Some(tracker) = &self.tracker {
            tracker.set_total(total);
        }

        let fields = match options.sampler.sample(self.store.as_ref(), db, collection).await {
            Ok(fields) => fields,
            Err(e) => {
                self.registry.complete(export_id).await;
                return Err(e);
            }
        };
        info!(
            "Starting CSV export {} of '{}.{}' ({} columns)",
            export_id,
            db,
            collection,
            fields.len()
        );

        let mut writer = CsvWriter::new(fields, options.csv.clone());
        let mut run = Run {
            id: export_id,
            db,
            writer: &mut writer,
            sink,
            buffer: Vec::new(),
            processed: 0,
            bytes: 0,
            collections_done: 0,
        };

        let outcome: Result<Option<Stop>> = async {
            run.writer.begin(&mut run.buffer)?;
            let stop = self
                .pump_collection(&mut run, collection, options.chunk_size, ReadPolicy::default())
                .await?;
            if stop.is_none() {
                run.collections_done = 1;
            }
            Ok(stop)
        }
        .await;

        self.conclude(run, outcome, total, started).await
    }

    async fn metadata(&self, export_id: &str, plan: &ExportPlan, options: &ExportOptions) -> Value {
        let stats = match self.store.database_stats(&plan.db).await {
            Ok(Some(stats)) => Bson::Document(stats).into_relaxed_extjson(),
            Ok(None) => Value::Null,
            Err(e) => {
                debug!("Database stats unavailable: {}", e);
                Value::Null
            }
        };

        json!({
            "database": plan.db,
            "exportId": export_id,
            "timestamp": Utc::now().to_rfc3339(),
            "format": "json",
            "collections": plan.collections.len(),
            "chunkSize": options.chunk_size,
            "totalDocuments": plan.total,
            "stats": stats,
        })
    }

    async fn write_collections(
        &self,
        run: &mut Run<'_>,
        plan: &ExportPlan,
        options: &ExportOptions,
    ) -> Result<Option<Stop>> {
        run.writer.begin(&mut run.buffer)?;

        for (name, estimated) in &plan.collections {
            if self.registry.is_cancelled(run.id).await {
                return Ok(Some(Stop::Cancelled));
            }

            self.registry
                .update_progress(
                    run.id,
                    ProgressUpdate::new()
                        .processed(run.processed)
                        .current_collection(name.as_str()),
                )
                .await;

            let indexes = match self.store.list_indexes(run.db, name).await {
                Ok(indexes) => indexes,
                Err(e) => {
                    warn!("Failed to list indexes of '{}': {}", name, e);
                    Vec::new()
                }
            };
            let header = CollectionHeader {
                name: name.clone(),
                indexes,
                estimated_count: *estimated,
            };
            run.writer.begin_collection(&mut run.buffer, &header)?;

            if let Some(stop) = self
                .pump_collection(run, name, options.chunk_size, options.read_policy)
                .await?
            {
                return Ok(Some(stop));
            }

            run.writer.end_collection(&mut run.buffer)?;
            run.collections_done += 1;
            debug!("Exported collection '{}' ({} documents so far)", name, run.processed);
        }

        Ok(None)
    }

    /// Stream every document of `collection`; the cursor is closed on all paths
    async fn pump_collection(
        &self,
        run: &mut Run<'_>,
        collection: &str,
        chunk_size: u32,
        read_policy: ReadPolicy,
    ) -> Result<Option<Stop>> {
        let request = CursorRequest {
            read_policy,
            ..CursorRequest::all(chunk_size)
        };
        let mut cursor = self.store.open_cursor(run.db, collection, request).await?;

        let outcome = self.pump_cursor(run, collection, cursor.as_mut()).await;

        if let Err(e) = cursor.close().await {
            warn!("Failed to close cursor on '{}': {}", collection, e);
        }
        outcome
    }

    async fn pump_cursor(
        &self,
        run: &mut Run<'_>,
        collection: &str,
        cursor: &mut dyn StreamingQuery,
    ) -> Result<Option<Stop>> {
        let mut batches = 0u32;

        loop {
            if self.registry.is_cancelled(run.id).await {
                return Ok(Some(Stop::Cancelled));
            }
            if run.sink.is_closed() {
                return Ok(Some(Stop::Disconnected));
            }

            let Some(docs) = cursor.next_batch().await? else {
                return Ok(None);
            };

            run.writer.write_batch(&mut run.buffer, &docs)?;
            if let Some(stop) = Self::flush(run).await? {
                return Ok(Some(stop));
            }

            run.processed += docs.len() as u64;
            batches += 1;
            self.registry
                .update_progress(
                    run.id,
                    ProgressUpdate::new()
                        .processed(run.processed)
                        .current_collection(collection),
                )
                .await;
            if let Some(tracker) = &self.tracker {
                tracker.update(run.processed, collection);
            }
            if batches % 10 == 0 {
                info!(
                    "Export {}: {} documents ({} batches of '{}')",
                    run.id, run.processed, batches, collection
                );
            }

            self.memory.relieve().await;
            tokio::task::yield_now().await;
        }
    }

    /// Hand the buffered bytes to the sink
    async fn flush(run: &mut Run<'_>) -> Result<Option<Stop>> {
        if run.buffer.is_empty() {
            return Ok(None);
        }
        let chunk = Bytes::from(std::mem::take(&mut run.buffer));
        let len = chunk.len() as u64;
        match run.sink.send(chunk).await {
            Ok(()) => {
                run.bytes += len;
                Ok(None)
            }
            Err(e) if e.is_early_stop() => Ok(Some(Stop::Disconnected)),
            Err(e) => Err(e),
        }
    }

    /// Write the trailer, finish the sink and drop the session
    async fn conclude(
        &self,
        mut run: Run<'_>,
        outcome: Result<Option<Stop>>,
        total: u64,
        started: Instant,
    ) -> Result<ExportSummary> {
        let termination = match &outcome {
            Ok(None) => Some(Termination::Completed {
                collections: run.collections_done,
                documents: run.processed,
            }),
            Ok(Some(Stop::Cancelled)) => Some(Termination::Cancelled),
            Ok(Some(Stop::Disconnected)) => None,
            Err(e) => Some(Termination::Failed(e.to_string())),
        };

        let mut disconnected = matches!(outcome, Ok(Some(Stop::Disconnected)));
        if let Some(termination) = &termination {
            let closed = match run.writer.finish(&mut run.buffer, termination) {
                Ok(()) => Self::flush(&mut run).await,
                Err(e) => Err(e),
            };
            match closed {
                Ok(Some(_)) => disconnected = true,
                Ok(None) => {
                    if let Err(e) = run.sink.finish().await {
                        if e.is_early_stop() {
                            disconnected = true;
                        } else if outcome.is_ok() {
                            self.registry.complete(run.id).await;
                            return Err(e);
                        }
                    }
                }
                Err(e) => warn!("Failed to write export trailer for {}: {}", run.id, e),
            }
        }

        self.registry.complete(run.id).await;
        if let Some(tracker) = &self.tracker {
            tracker.finish();
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let status = match outcome {
            Err(e) => {
                error!("Export {} failed after {} documents: {}", run.id, run.processed, e);
                return Err(e);
            }
            Ok(_) if disconnected => {
                info!("Export {} stopped: client disconnected", run.id);
                ExportStatus::ClientDisconnected
            }
            Ok(Some(Stop::Cancelled)) => {
                info!("Export {} cancelled after {} documents", run.id, run.processed);
                ExportStatus::Cancelled
            }
            Ok(_) => {
                info!(
                    "Export {} completed: {} documents, {} bytes, {} ms",
                    run.id, run.processed, run.bytes, elapsed_ms
                );
                ExportStatus::Completed
            }
        };

        Ok(ExportSummary {
            export_id: run.id.to_string(),
            status,
            collections: run.collections_done,
            documents: run.processed,
            total,
            bytes: run.bytes,
            elapsed_ms,
        })
    }
}
