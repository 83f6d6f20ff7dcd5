//! One-shot transfer commands run from the terminal

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{AdminError, Result};
use crate::store::{MongoStore, Store};
use crate::transfer::{
    ByteSink, CsvExportOptions, CsvOptions, ExportCoordinator, ExportOptions, ExportSummary,
    FileSink, GzipSink, ImportOptions, ImportPipeline, ImportSummary, MemoryGuard, ProgressTracker,
    SchemaSampler, SessionRegistry, new_session_id,
};

use super::CliInterface;

/// Connected store plus the connection to close afterwards
struct Session {
    connection: ConnectionManager,
    store: Arc<dyn Store>,
}

impl Session {
    async fn open(cli: &CliInterface) -> Result<Self> {
        let uri = cli.connection_uri()?;
        let connection = ConnectionManager::new(cli.config().connection.clone());
        info!("Connecting to {}", CliInterface::sanitize_uri(&uri));
        connection.connect(&uri).await?;
        let store: Arc<dyn Store> = Arc::new(MongoStore::new(connection.clone()));
        Ok(Self { connection, store })
    }

    fn coordinator(&self, config: &Config) -> ExportCoordinator {
        ExportCoordinator::new(
            Arc::clone(&self.store),
            SessionRegistry::new(config.progress.retention()),
            MemoryGuard::new(config.transfer.memory_limit_mb),
        )
        .with_tracker(ProgressTracker::new(None, true))
    }

    async fn close(self) -> Result<()> {
        self.connection.close().await
    }
}

fn report(summary: &ExportSummary, out: &Path) {
    println!(
        "{:?}: {} documents from {} collections written to {} ({} bytes, {} ms)",
        summary.status,
        summary.documents,
        summary.collections,
        out.display(),
        summary.bytes,
        summary.elapsed_ms
    );
}

/// Write a structured export of `db` to `out`
pub async fn export(
    cli: &CliInterface,
    db: &str,
    out: &Path,
    collections: Option<Vec<String>>,
    gzip: bool,
) -> Result<ExportSummary> {
    let config = cli.config();
    let session = Session::open(cli).await?;
    let coordinator = session.coordinator(config);

    let plan = coordinator.plan(db, collections.as_deref()).await?;
    let options = ExportOptions {
        chunk_size: config.transfer.chunk_size,
        ..ExportOptions::default()
    };
    let export_id = new_session_id(db);
    coordinator.registry().register(&export_id).await;

    let file = FileSink::create(out).await?;
    let mut sink: Box<dyn ByteSink> = if gzip {
        Box::new(GzipSink::new(file, config.transfer.gzip_level))
    } else {
        Box::new(file)
    };
    let summary = coordinator
        .export_database(&export_id, &plan, &options, sink.as_mut())
        .await;

    session.close().await?;
    let summary = summary?;
    report(&summary, out);
    Ok(summary)
}

/// Write one collection of `db` to `out` as CSV
pub async fn export_csv(
    cli: &CliInterface,
    db: &str,
    collection: &str,
    out: &Path,
    csv: CsvOptions,
    gzip: bool,
) -> Result<ExportSummary> {
    let config = cli.config();
    let session = Session::open(cli).await?;
    if !session.store.collection_exists(db, collection).await? {
        session.close().await?;
        return Err(AdminError::NotFound(format!(
            "Collection '{collection}' not found in database '{db}'"
        )));
    }

    let coordinator = session.coordinator(config);
    let options = CsvExportOptions {
        db: db.to_string(),
        collection: collection.to_string(),
        chunk_size: config.transfer.csv_chunk_size,
        csv,
        sampler: SchemaSampler::new(
            config.transfer.csv_max_fields,
            config.transfer.csv_max_depth,
            config.transfer.csv_sample_size,
        ),
    };
    let export_id = new_session_id(db);
    coordinator.registry().register(&export_id).await;

    let file = FileSink::create(out).await?;
    let mut sink: Box<dyn ByteSink> = if gzip {
        Box::new(GzipSink::new(file, config.transfer.gzip_level))
    } else {
        Box::new(file)
    };
    let summary = coordinator.export_csv(&export_id, &options, sink.as_mut()).await;

    session.close().await?;
    let summary = summary?;
    report(&summary, out);
    Ok(summary)
}

/// Apply an exported file to `db`
pub async fn import(cli: &CliInterface, db: &str, file: &Path) -> Result<ImportSummary> {
    let session = Session::open(cli).await?;

    let mut options = ImportOptions::new(db);
    options.batch_size = cli.config().transfer.import_batch_size;
    options.filename = file.file_name().and_then(|n| n.to_str()).map(str::to_string);

    let reader = tokio::fs::File::open(file).await?;
    let source = ReaderStream::new(reader).map(|chunk| chunk.map_err(AdminError::from));
    let mut pipeline = ImportPipeline::new(Arc::clone(&session.store), options);
    let summary = pipeline.run(source).await;

    session.close().await?;
    let summary = summary?;
    for collection in &summary.collections {
        println!(
            "{}: {} documents, {} indexes ({} failed)",
            collection.name,
            collection.documents,
            collection.indexes_created,
            collection.indexes_failed
        );
    }
    println!(
        "Imported {} documents into '{}' from {}",
        summary.documents,
        db,
        file.display()
    );
    Ok(summary)
}
