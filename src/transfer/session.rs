//! Session registry for in-flight transfers
//!
//! Tracks each export's cancellation flag and progress snapshot. The
//! registry is constructed once at start-up and cloned into every handler;
//! pipelines hold only the session id and go through the registry for every
//! read and write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Progress of one transfer
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Documents processed so far; never decreases
    pub processed: u64,
    /// Estimated total; `processed` may exceed it under concurrent writes
    pub total: u64,
    /// Collection being read, empty before the first one starts
    pub current_collection: String,
    /// Every collection in the export, in order
    pub collections: Vec<String>,
    /// When the session was registered
    pub start_time: DateTime<Utc>,
}

impl ProgressSnapshot {
    fn started_at(start_time: DateTime<Utc>) -> Self {
        Self {
            processed: 0,
            total: 0,
            current_collection: String::new(),
            collections: Vec::new(),
            start_time,
        }
    }

    /// `processed / total * 100`, rounded to two decimals; 0 when total is unknown
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        round2(self.processed as f64 / self.total as f64 * 100.0)
    }

    /// Documents per second since `start_time`, rounded to two decimals
    pub fn rate_at(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.start_time).num_milliseconds() as f64 / 1000.0;
        if self.processed == 0 || elapsed <= 0.0 {
            return 0.0;
        }
        round2(self.processed as f64 / elapsed)
    }
}

/// Round to two decimal places
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Partial progress update; only supplied fields change
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    /// New processed count; ignored when lower than the current one
    pub processed: Option<u64>,
    /// New estimated total
    pub total: Option<u64>,
    /// Collection being read
    pub current_collection: Option<String>,
    /// Every collection in the export, in order
    pub collections: Option<Vec<String>>,
}

impl ProgressUpdate {
    /// Empty update that changes nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the processed count
    pub fn processed(mut self, processed: u64) -> Self {
        self.processed = Some(processed);
        self
    }

    /// Set the estimated total
    pub fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Set the collection currently being read
    pub fn current_collection(mut self, name: impl Into<String>) -> Self {
        self.current_collection = Some(name.into());
        self
    }

    /// Set the full list of collections in the export
    pub fn collections(mut self, names: Vec<String>) -> Self {
        self.collections = Some(names);
        self
    }
}

#[derive(Debug)]
struct TransferSession {
    cancelled: bool,
    registered_at: DateTime<Utc>,
    progress: ProgressSnapshot,
}

/// Process-wide table of in-flight transfers
#[derive(Clone)]
pub struct SessionRegistry {
    /// Map of session id -> session
    sessions: Arc<RwLock<HashMap<String, TransferSession>>>,
    /// Age after which a session is swept
    retention: chrono::Duration,
}

impl SessionRegistry {
    /// Create an empty registry
    ///
    /// # Arguments
    /// * `retention` - Age after which a forgotten session is swept on the next registration
    pub fn new(retention: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }

    /// Register a new session with zeroed progress.
    ///
    /// Also sweeps sessions older than the retention window. Registering an id
    /// that is already present resets it.
    ///
    /// # Arguments
    /// * `id` - Session id, usually from [`new_session_id`]
    pub async fn register(&self, id: &str) {
        self.register_at(id, Utc::now()).await;
    }

    /// [`SessionRegistry::register`] with a fixed clock
    pub(crate) async fn register_at(&self, id: &str, now: DateTime<Utc>) {
        let mut sessions = self.sessions.write().await;
        let swept = Self::sweep_locked(&mut sessions, now, self.retention);
        if swept > 0 {
            debug!("Swept {} stale transfer sessions", swept);
        }

        sessions.insert(
            id.to_string(),
            TransferSession {
                cancelled: false,
                registered_at: now,
                progress: ProgressSnapshot::started_at(now),
            },
        );
        debug!("Registered transfer session {}", id);
    }

    /// Mark a session cancelled; returns whether it existed.
    ///
    /// Cancelling twice is harmless. The pipeline only observes the flag
    /// between chunks.
    ///
    /// # Returns
    /// * `bool` - `false` when the session is unknown or already completed
    pub async fn cancel(&self, id: &str) -> bool {
        match self.sessions.write().await.get_mut(id) {
            Some(session) => {
                if !session.cancelled {
                    info!("Transfer session {} cancelled", id);
                }
                session.cancelled = true;
                true
            }
            None => false,
        }
    }

    /// Whether the session has been cancelled; unknown ids are not
    pub async fn is_cancelled(&self, id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(id)
            .is_some_and(|session| session.cancelled)
    }

    /// Merge `update` into the session's snapshot; returns whether it existed.
    ///
    /// `processed` only moves forward.
    ///
    /// # Arguments
    /// * `id` - Session to update
    /// * `update` - Fields to change; `None` fields keep their value
    ///
    /// # Returns
    /// * `bool` - Whether the session existed
    pub async fn update_progress(&self, id: &str, update: ProgressUpdate) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };

        let progress = &mut session.progress;
        if let Some(processed) = update.processed {
            progress.processed = progress.processed.max(processed);
        }
        if let Some(total) = update.total {
            progress.total = total;
        }
        if let Some(name) = update.current_collection {
            progress.current_collection = name;
        }
        if let Some(names) = update.collections {
            progress.collections = names;
        }
        true
    }

    /// Copy of the session's snapshot
    ///
    /// # Returns
    /// * `Option<ProgressSnapshot>` - `None` once the session has completed or been swept
    pub async fn get_progress(&self, id: &str) -> Option<ProgressSnapshot> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|session| session.progress.clone())
    }

    /// Remove the session; returns whether it existed
    pub async fn complete(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            debug!("Transfer session {} completed", id);
        }
        removed
    }

    /// Remove sessions registered before `now - retention`
    ///
    /// # Returns
    /// * `usize` - Number of sessions removed
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        Self::sweep_locked(&mut sessions, now, self.retention)
    }

    fn sweep_locked(
        sessions: &mut HashMap<String, TransferSession>,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> usize {
        let before = sessions.len();
        sessions.retain(|_, session| now - session.registered_at <= retention);
        before - sessions.len()
    }

    /// Whether `id` is registered
    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

/// New session id: `export_{db}_{unix-millis}_{9-char suffix}`
pub fn new_session_id(db: &str) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("export_{}_{}_{}", db, Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_complete() {
        let registry = SessionRegistry::default();
        registry.register("s1").await;

        let progress = registry.get_progress("s1").await.unwrap();
        assert_eq!(progress.processed, 0);
        assert_eq!(progress.total, 0);
        assert!(progress.current_collection.is_empty());

        assert!(registry.complete("s1").await);
        assert!(registry.get_progress("s1").await.is_none());
        assert!(!registry.complete("s1").await);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let registry = SessionRegistry::default();
        registry.register("s1").await;

        assert!(!registry.is_cancelled("s1").await);
        assert!(registry.cancel("s1").await);
        assert!(registry.cancel("s1").await);
        assert!(registry.is_cancelled("s1").await);

        assert!(!registry.cancel("missing").await);
        assert!(!registry.is_cancelled("missing").await);
    }

    #[tokio::test]
    async fn test_update_merges_supplied_fields_only() {
        let registry = SessionRegistry::default();
        registry.register("s1").await;

        registry
            .update_progress(
                "s1",
                ProgressUpdate::new()
                    .total(10)
                    .collections(vec!["a".into(), "b".into()]),
            )
            .await;
        registry
            .update_progress("s1", ProgressUpdate::new().processed(4).current_collection("a"))
            .await;

        let progress = registry.get_progress("s1").await.unwrap();
        assert_eq!(progress.processed, 4);
        assert_eq!(progress.total, 10);
        assert_eq!(progress.current_collection, "a");
        assert_eq!(progress.collections, vec!["a".to_string(), "b".to_string()]);

        assert!(!registry.update_progress("missing", ProgressUpdate::new().processed(1)).await);
    }

    #[tokio::test]
    async fn test_processed_never_decreases() {
        let registry = SessionRegistry::default();
        registry.register("s1").await;

        let mut last = 0;
        for value in [5, 3, 9, 9, 2, 12, 0] {
            registry
                .update_progress("s1", ProgressUpdate::new().processed(value))
                .await;
            let processed = registry.get_progress("s1").await.unwrap().processed;
            assert!(processed >= last);
            last = processed;
        }
        assert_eq!(last, 12);
    }

    #[tokio::test]
    async fn test_sweep_uses_fixed_now() {
        let registry = SessionRegistry::new(Duration::from_secs(3600));
        let now = Utc::now();

        registry.register_at("old", now - chrono::Duration::minutes(61)).await;
        registry.register_at("fresh", now - chrono::Duration::minutes(59)).await;

        assert_eq!(registry.sweep_at(now).await, 1);
        assert!(!registry.contains("old").await);
        assert!(registry.contains("fresh").await);
    }

    #[tokio::test]
    async fn test_register_sweeps_stale_entries() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let now = Utc::now();
        registry.register_at("old", now - chrono::Duration::minutes(5)).await;

        registry.register_at("new", now).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains("new").await);
    }

    #[test]
    fn test_percentage_and_rate() {
        let start = Utc::now();
        let snapshot = ProgressSnapshot {
            processed: 150,
            total: 100,
            current_collection: String::new(),
            collections: Vec::new(),
            start_time: start,
        };
        assert_eq!(snapshot.percentage(), 150.0);
        assert_eq!(snapshot.rate_at(start + chrono::Duration::seconds(4)), 37.5);
        assert_eq!(snapshot.rate_at(start), 0.0);

        let unknown = ProgressSnapshot {
            total: 0,
            ..snapshot
        };
        assert_eq!(unknown.percentage(), 0.0);
    }

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id("shop");
        let parts: Vec<&str> = id.splitn(4, '_').collect();
        assert_eq!(parts[0], "export");
        assert_eq!(parts[1], "shop");
        assert!(parts[2].parse::<i64>().is_ok());
        assert_eq!(parts[3].len(), 9);
        assert_ne!(new_session_id("shop"), id);
    }
}
