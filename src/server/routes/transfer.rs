//! Bulk transfer endpoints: streaming export, progress streams, import,
//! backup and download

use std::convert::Infallible;
use std::path::PathBuf;

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::{AdminError, TransferError};
use crate::server::AppState;
use crate::server::params::{
    backup_filename, basename, csv_filename, export_filename, require, split_list,
};
use crate::server::response::ApiResult;
use crate::store::ReadPolicy;
use crate::transfer::{
    ChannelSink, CsvExportOptions, CsvOptions, ExportOptions, ExportStatus, FileSink, GzipSink,
    ImportOptions, ImportPipeline, ProgressEvent, ScanSettings, SchemaSampler, WatchSettings,
    broadcast, new_session_id,
};

const EXPORT_ID_HEADER: HeaderName = HeaderName::from_static("x-export-id");

/// Events buffered between a progress producer and its SSE response
const EVENT_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    db: Option<String>,
    collections: Option<String>,
    chunk_size: Option<u32>,
    compress: Option<bool>,
    metadata: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvExportQuery {
    db: Option<String>,
    collection: Option<String>,
    delimiter: Option<String>,
    header: Option<bool>,
    max_fields: Option<usize>,
    compress: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportIdRequest {
    #[serde(default)]
    export_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DbQuery {
    db: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BackupRequest {
    #[serde(default)]
    db: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    filename: Option<String>,
}

fn attachment(filename: &str) -> String {
    format!("attachment; filename=\"{filename}\"")
}

fn content_type(compress: bool, plain: &str) -> String {
    if compress {
        "application/gzip".to_string()
    } else {
        plain.to_string()
    }
}

/// Stream a structured export of a database
pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    require(&[("db", query.db.as_deref())], "Missing db query param")?;
    let db = query.db.unwrap_or_default();
    let only = split_list(query.collections.as_deref());
    let compress = query.compress.unwrap_or(true);

    let plan = state.coordinator.plan(&db, only.as_deref()).await?;
    let options = ExportOptions {
        chunk_size: query
            .chunk_size
            .filter(|n| *n > 0)
            .unwrap_or(state.config.transfer.chunk_size),
        include_metadata: query.metadata.unwrap_or(true),
        read_policy: ReadPolicy::SecondaryPreferred,
    };

    let export_id = new_session_id(&db);
    state.registry.register(&export_id).await;
    let (sink, body) = ChannelSink::channel(state.config.transfer.channel_capacity);

    let coordinator = state.coordinator.clone();
    let level = state.config.transfer.gzip_level;
    let id = export_id.clone();
    tokio::spawn(async move {
        let result = if compress {
            let mut sink = GzipSink::new(sink, level);
            coordinator.export_database(&id, &plan, &options, &mut sink).await
        } else {
            let mut sink = sink;
            coordinator.export_database(&id, &plan, &options, &mut sink).await
        };
        if let Err(e) = result {
            debug!("Export task {} ended with error: {}", id, e);
        }
    });

    let filename = export_filename(&db, Utc::now(), compress);
    Ok((
        [
            (header::CONTENT_TYPE, content_type(compress, "application/json")),
            (header::CONTENT_DISPOSITION, attachment(&filename)),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (EXPORT_ID_HEADER, export_id),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Stream one collection as CSV
pub async fn export_csv(
    State(state): State<AppState>,
    Query(query): Query<CsvExportQuery>,
) -> ApiResult<Response> {
    require(
        &[("db", query.db.as_deref()), ("collection", query.collection.as_deref())],
        "Missing db or collection query param",
    )?;
    let db = query.db.unwrap_or_default();
    let collection = query.collection.unwrap_or_default();
    let compress = query.compress.unwrap_or(true);

    if !state.store.collection_exists(&db, &collection).await? {
        return Err(AdminError::NotFound(format!(
            "Collection '{collection}' not found in database '{db}'"
        )));
    }

    let transfer = &state.config.transfer;
    let options = CsvExportOptions {
        db: db.clone(),
        collection: collection.clone(),
        chunk_size: transfer.csv_chunk_size,
        csv: CsvOptions {
            delimiter: query
                .delimiter
                .as_deref()
                .and_then(|d| d.chars().next())
                .unwrap_or(','),
            include_header: query.header.unwrap_or(true),
        },
        sampler: SchemaSampler::new(
            query.max_fields.filter(|n| *n > 0).unwrap_or(transfer.csv_max_fields),
            transfer.csv_max_depth,
            transfer.csv_sample_size,
        ),
    };

    let export_id = new_session_id(&db);
    state.registry.register(&export_id).await;
    let (sink, body) = ChannelSink::channel(transfer.channel_capacity);

    let coordinator = state.coordinator.clone();
    let level = transfer.gzip_level;
    let id = export_id.clone();
    tokio::spawn(async move {
        let result = if compress {
            let mut sink = GzipSink::new(sink, level);
            coordinator.export_csv(&id, &options, &mut sink).await
        } else {
            let mut sink = sink;
            coordinator.export_csv(&id, &options, &mut sink).await
        };
        if let Err(e) = result {
            debug!("CSV export task {} ended with error: {}", id, e);
        }
    });

    let filename = csv_filename(&db, &collection, Utc::now(), compress);
    Ok((
        [
            (header::CONTENT_TYPE, content_type(compress, "text/csv; charset=utf-8")),
            (header::CONTENT_DISPOSITION, attachment(&filename)),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (EXPORT_ID_HEADER, export_id),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

pub async fn cancel(
    State(state): State<AppState>,
    Json(body): Json<ExportIdRequest>,
) -> ApiResult<Json<Value>> {
    require(&[("exportId", body.export_id.as_deref())], "Missing exportId parameter")?;
    let export_id = body.export_id.unwrap_or_default();

    let found = state.registry.cancel(&export_id).await;
    let message = if found {
        "Export cancellation requested"
    } else {
        "Export not found or already completed"
    };
    Ok(Json(json!({
        "success": found,
        "message": message,
        "exportId": export_id,
    })))
}

fn to_sse(event: ProgressEvent) -> Event {
    Event::default()
        .event(event.kind.as_str())
        .data(event.data.to_string())
}

fn event_stream(
    rx: mpsc::Receiver<ProgressEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse(event)), rx))
    })
}

/// Follow a running export through the session registry
pub async fn watch_progress(
    State(state): State<AppState>,
    Query(query): Query<ExportIdRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    require(&[("exportId", query.export_id.as_deref())], "Missing exportId parameter")?;
    let export_id = query.export_id.unwrap_or_default();

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let settings = WatchSettings::from(&state.config.progress);
    tokio::spawn(broadcast::watch_session(
        state.registry.clone(),
        export_id,
        settings,
        tx,
    ));

    Ok(Sse::new(event_stream(rx)).keep_alive(KeepAlive::default()))
}

/// Count every document of a database while reporting progress
pub async fn scan_progress(
    State(state): State<AppState>,
    Query(query): Query<DbQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    require(&[("db", query.db.as_deref())], "Missing db query param")?;
    let db = query.db.unwrap_or_default();

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let settings = ScanSettings::from(&state.config.progress);
    let store = state.store.clone();
    tokio::spawn(async move {
        broadcast::scan_database(store.as_ref(), &db, settings, tx).await;
    });

    Ok(Sse::new(event_stream(rx)))
}

/// Ingest an exported artifact uploaded as multipart field `file`
pub async fn import(
    State(state): State<AppState>,
    Query(query): Query<DbQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    require(&[("db", query.db.as_deref())], "Missing db query param")?;
    let db = query.db.unwrap_or_default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AdminError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let mut options = ImportOptions::new(db.as_str());
        options.batch_size = state.config.transfer.import_batch_size;
        options.content_type = field.content_type().map(str::to_string);
        options.filename = field.file_name().map(str::to_string);
        info!(
            "Importing {} into '{}'",
            options.filename.as_deref().unwrap_or("upload"),
            db
        );

        let source = Box::pin(field.map(|chunk| {
            chunk.map_err(|e| {
                AdminError::from(TransferError::Import(format!("upload interrupted: {e}")))
            })
        }));
        let mut pipeline = ImportPipeline::new(state.store.clone(), options);
        let summary = pipeline.run(source).await?;

        let collections: Vec<Value> = summary
            .collections
            .iter()
            .map(|report| {
                json!({
                    "name": report.name,
                    "documents": report.documents,
                    "replaced": report.replaced,
                    "indexesCreated": report.indexes_created,
                    "indexesFailed": report.indexes_failed,
                })
            })
            .collect();
        return Ok(Json(json!({
            "success": true,
            "db": db,
            "collections": collections,
            "documents": summary.documents,
        })));
    }

    Err(AdminError::Validation("Missing file field in multipart body".into()))
}

fn backup_dir(state: &AppState) -> PathBuf {
    state.config.backup.directory.clone()
}

/// Write an uncompressed structured export into the backup directory
pub async fn backup(
    State(state): State<AppState>,
    Json(body): Json<BackupRequest>,
) -> ApiResult<Json<Value>> {
    require(&[("db", body.db.as_deref())], "Missing db in body")?;
    let db = body.db.unwrap_or_default();

    let plan = state.coordinator.plan(&db, None).await?;
    let dir = backup_dir(&state);
    tokio::fs::create_dir_all(&dir).await?;
    let filename = backup_filename(&db, Utc::now());
    let mut sink = FileSink::create(dir.join(&filename)).await?;

    let export_id = new_session_id(&db);
    state.registry.register(&export_id).await;
    let options = ExportOptions {
        chunk_size: state.config.transfer.chunk_size,
        ..ExportOptions::default()
    };
    let summary = state
        .coordinator
        .export_database(&export_id, &plan, &options, &mut sink)
        .await?;

    if summary.status != ExportStatus::Completed {
        warn!("Backup {} of '{}' ended early: {:?}", filename, db, summary.status);
    }
    Ok(Json(json!({
        "success": summary.status == ExportStatus::Completed,
        "filename": filename,
        "exportId": export_id,
        "documents": summary.documents,
    })))
}

/// Stream a file from the backup directory
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    require(&[("filename", query.filename.as_deref())], "Missing filename query parameter")?;
    let name = query
        .filename
        .as_deref()
        .and_then(basename)
        .ok_or_else(|| AdminError::Validation("Invalid filename".into()))?
        .to_string();

    let path = backup_dir(&state).join(&name);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AdminError::NotFound("Backup not found".into()));
        }
        Err(e) => return Err(e.into()),
    };

    let compressed = name.ends_with(".gz");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type(compressed, "application/json")),
            (header::CONTENT_DISPOSITION, attachment(&name)),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
