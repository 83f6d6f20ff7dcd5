//! Progress broadcasting
//!
//! Two push-based modes feed a channel of named events:
//! - [`watch_session`] polls the [`SessionRegistry`] for one export id and
//!   forwards what it finds, with heartbeats and a hard timeout.
//! - [`scan_database`] walks a database itself and reports exact counts as it
//!   goes.
//!
//! Both stop as soon as the receiving side is dropped.

use std::time::Duration;

use chrono::Utc;
use mongodb::bson::doc;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::ProgressConfig;
use crate::error::Result;
use crate::store::{CursorRequest, Store};

use super::session::{SessionRegistry, round2};

/// Named progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    CollectionsFound,
    CollectionCount,
    Init,
    CollectionStart,
    Progress,
    CollectionDone,
    Done,
    Error,
    Heartbeat,
}

impl EventKind {
    /// Event name as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::CollectionsFound => "collectionsFound",
            EventKind::CollectionCount => "collectionCount",
            EventKind::Init => "init",
            EventKind::CollectionStart => "collectionStart",
            EventKind::Progress => "progress",
            EventKind::CollectionDone => "collectionDone",
            EventKind::Done => "done",
            EventKind::Error => "error",
            EventKind::Heartbeat => "heartbeat",
        }
    }
}

/// One event with its JSON payload
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub kind: EventKind,
    /// Payload; `timestamp` is added by the caller that builds it
    pub data: Value,
}

impl ProgressEvent {
    /// Create an event
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self { kind, data }
    }

    /// `done` and `error` end a stream
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Done | EventKind::Error)
    }
}

/// Timing for the registry watch
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    /// Delay between two registry reads
    pub poll_interval: Duration,
    /// Delay between two `heartbeat` events
    pub heartbeat_interval: Duration,
    /// Hard limit on the whole watch
    pub timeout: Duration,
}

impl From<&ProgressConfig> for WatchSettings {
    fn from(config: &ProgressConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            heartbeat_interval: config.heartbeat_interval(),
            timeout: config.timeout(),
        }
    }
}

/// Settings for the synchronous scan
#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    /// Records between progress events
    pub update_every: u64,
    /// Delay between two `heartbeat` events
    pub heartbeat_interval: Duration,
    /// Documents per cursor batch
    pub chunk_size: u32,
}

impl From<&ProgressConfig> for ScanSettings {
    fn from(config: &ProgressConfig) -> Self {
        Self {
            update_every: config.update_every.max(1),
            heartbeat_interval: config.heartbeat_interval(),
            chunk_size: 1_000,
        }
    }
}

/// Upper bound between two progress events of a scan
const MAX_PROGRESS_GAP: Duration = Duration::from_secs(2);

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Poll the registry for `export_id` until the session disappears, the
/// timeout elapses or the receiver goes away.
///
/// A vanished session produces one `done` event. Reaching the timeout closes
/// the stream without one.
///
/// # Arguments
/// * `registry` - Registry the export reports into
/// * `export_id` - Session to follow
/// * `settings` - Poll, heartbeat and timeout intervals
/// * `tx` - Event channel; dropping the receiver stops the watch
pub async fn watch_session(
    registry: SessionRegistry,
    export_id: String,
    settings: WatchSettings,
    tx: mpsc::Sender<ProgressEvent>,
) {
    let send = |kind: EventKind, data: Value| {
        let tx = tx.clone();
        async move { tx.send(ProgressEvent::new(kind, data)).await.is_ok() }
    };

    if !send(EventKind::Start, json!({ "exportId": export_id })).await {
        return;
    }

    let deadline = tokio::time::sleep(settings.timeout);
    tokio::pin!(deadline);

    let mut poll = tokio::time::interval(settings.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + settings.heartbeat_interval,
        settings.heartbeat_interval,
    );

    loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!("Progress watch for {} timed out", export_id);
                break;
            }
            _ = tx.closed() => {
                debug!("Progress watcher for {} disconnected", export_id);
                break;
            }
            _ = heartbeat.tick() => {
                if !send(EventKind::Heartbeat, json!({ "timestamp": now_millis() })).await {
                    break;
                }
            }
            _ = poll.tick() => {
                let Some(progress) = registry.get_progress(&export_id).await else {
                    send(EventKind::Done, json!({ "exportId": export_id })).await;
                    break;
                };

                let data = json!({
                    "exportId": export_id,
                    "processed": progress.processed,
                    "total": progress.total,
                    "currentCollection": progress.current_collection,
                    "collections": progress.collections,
                    "overallProgress": progress.percentage(),
                    "rate": progress.rate_at(Utc::now()),
                    "timestamp": now_millis(),
                });
                if !send(EventKind::Progress, data).await {
                    break;
                }
            }
        }
    }
}

/// Walk every collection of `db`, reporting exact counts as they are read.
///
/// Failures end the stream with an `error` event.
///
/// # Arguments
/// * `store` - Source of counts and cursors
/// * `db` - Database to scan
/// * `settings` - Progress granularity, heartbeat and chunk size
/// * `tx` - Event channel; the scan stops early once the receiver is gone
pub async fn scan_database(
    store: &dyn Store,
    db: &str,
    settings: ScanSettings,
    tx: mpsc::Sender<ProgressEvent>,
) {
    let heartbeat = tokio::spawn(heartbeat_loop(tx.clone(), settings.heartbeat_interval));

    let outcome = scan(store, db, &settings, &tx).await;

    // Stop the heartbeat before the terminal event so nothing follows it.
    heartbeat.abort();
    let _ = heartbeat.await;

    match outcome {
        Ok(Some(done)) => {
            let _ = tx.send(done).await;
        }
        Ok(None) => debug!("Progress scan of '{}' abandoned by client", db),
        Err(e) => {
            warn!("Progress scan of '{}' failed: {}", db, e);
            let _ = tx
                .send(ProgressEvent::new(
                    EventKind::Error,
                    json!({ "message": e.to_string(), "timestamp": now_millis() }),
                ))
                .await;
        }
    }
}

/// Send `heartbeat` every `every` until the receiver closes or the task is aborted
async fn heartbeat_loop(tx: mpsc::Sender<ProgressEvent>, every: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        ticker.tick().await;
        let event = ProgressEvent::new(EventKind::Heartbeat, json!({ "timestamp": now_millis() }));
        if tx.send(event).await.is_err() {
            return;
        }
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        round2(count as f64 / secs)
    } else {
        0.0
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        round2(part as f64 / whole as f64 * 100.0)
    } else {
        100.0
    }
}

/// Returns the final `done` event, or `None` when the receiver went away
async fn scan(
    store: &dyn Store,
    db: &str,
    settings: &ScanSettings,
    tx: &mpsc::Sender<ProgressEvent>,
) -> Result<Option<ProgressEvent>> {
    macro_rules! emit {
        ($kind:expr, $data:expr) => {
            if tx.send(ProgressEvent::new($kind, $data)).await.is_err() {
                return Ok(None);
            }
        };
    }

    let started = Instant::now();
    emit!(EventKind::Start, json!({ "dbName": db, "startTime": now_millis() }));

    let names = store.list_collections(db).await?;
    emit!(
        EventKind::CollectionsFound,
        json!({ "collections": names, "count": names.len() })
    );

    let mut counts = Vec::with_capacity(names.len());
    for name in &names {
        match store.estimated_count(db, name).await {
            Ok(count) => {
                emit!(EventKind::CollectionCount, json!({ "collection": name, "count": count }));
                counts.push(count);
            }
            Err(e) => {
                warn!("Failed to count documents in '{}': {}", name, e);
                emit!(
                    EventKind::CollectionCount,
                    json!({ "collection": name, "count": 0, "error": true })
                );
                counts.push(0);
            }
        }
    }
    let total: u64 = counts.iter().sum();

    emit!(
        EventKind::Init,
        json!({
            "total": total,
            "collections": names,
            "estimatedSize": total,
            "performance": { "countingTime": started.elapsed().as_millis() as u64 },
        })
    );

    let mut processed = 0u64;
    let mut last_update = Instant::now();
    let mut since_update = 0u64;

    for (name, &collection_total) in names.iter().zip(&counts) {
        let collection_started = Instant::now();
        emit!(
            EventKind::CollectionStart,
            json!({ "name": name, "count": collection_total, "startTime": now_millis() })
        );

        if collection_total == 0 {
            emit!(
                EventKind::CollectionDone,
                json!({
                    "name": name,
                    "processed": processed,
                    "total": total,
                    "duration": collection_started.elapsed().as_millis() as u64,
                })
            );
            continue;
        }

        let request = CursorRequest::all(settings.chunk_size).with_projection(doc! { "_id": 1 });
        let mut cursor = store.open_cursor(db, name, request).await?;
        let mut seen = 0u64;

        let walked: Result<bool> = async {
            while let Some(batch) = cursor.next_batch().await? {
                let len = batch.len() as u64;
                seen += len;
                processed += len;
                since_update += len;

                let elapsed = last_update.elapsed();
                if since_update >= settings.update_every
                    || processed == total
                    || elapsed > MAX_PROGRESS_GAP
                {
                    let event = ProgressEvent::new(
                        EventKind::Progress,
                        json!({
                            "processed": processed,
                            "total": total,
                            "collection": name,
                            "collectionProcessed": seen,
                            "collectionTotal": collection_total,
                            "collectionProgress": percent(seen, collection_total),
                            "overallProgress": percent(processed, total),
                            "rate": per_second(since_update, elapsed),
                            "timestamp": now_millis(),
                        }),
                    );
                    if tx.send(event).await.is_err() {
                        return Ok(false);
                    }
                    since_update = 0;
                    last_update = Instant::now();
                }

                if tx.is_closed() {
                    return Ok(false);
                }
                tokio::task::yield_now().await;
            }
            Ok(true)
        }
        .await;

        if let Err(e) = cursor.close().await {
            warn!("Failed to close cursor on '{}': {}", name, e);
        }
        if !walked? {
            return Ok(None);
        }

        let duration = collection_started.elapsed();
        emit!(
            EventKind::CollectionDone,
            json!({
                "name": name,
                "processed": processed,
                "total": total,
                "collectionProcessed": seen,
                "duration": duration.as_millis() as u64,
                "rate": per_second(seen, duration),
            })
        );
    }

    let duration = started.elapsed();
    let rate = per_second(processed, duration);
    Ok(Some(ProgressEvent::new(
        EventKind::Done,
        json!({
            "processed": processed,
            "total": total,
            "duration": duration.as_millis() as u64,
            "avgRate": rate,
            "performance": {
                "totalTime": duration.as_millis() as u64,
                "documentsPerSecond": rate,
            },
        }),
    )))
}
