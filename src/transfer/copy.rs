//! Database-to-database copy used by database rename

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::{CursorRequest, DEFAULT_INDEX_NAME, ReadPolicy, Store, creatable_index_spec};

/// Totals for a finished copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub collections: usize,
    pub documents: u64,
    pub indexes: usize,
}

/// Copy every collection of `from` into `to`, batch by batch, along with
/// its non-default indexes. Index failures are logged and skipped.
pub async fn copy_database(
    store: &dyn Store,
    from: &str,
    to: &str,
    chunk_size: u32,
) -> Result<CopySummary> {
    let mut summary = CopySummary::default();

    for name in store.list_collections(from).await? {
        if !store.collection_exists(to, &name).await? {
            store.create_collection(to, &name).await?;
        }

        let mut request = CursorRequest::all(chunk_size);
        request.read_policy = ReadPolicy::Primary;
        let mut cursor = store.open_cursor(from, &name, request).await?;
        let copied = async {
            let mut copied = 0;
            while let Some(batch) = cursor.next_batch().await? {
                copied += store.insert_many(to, &name, batch).await?;
            }
            Ok::<_, crate::error::AdminError>(copied)
        }
        .await;
        if let Err(e) = cursor.close().await {
            debug!("Closing copy cursor for '{}' failed: {}", name, e);
        }
        let copied = copied?;

        for spec in store.list_indexes(from, &name).await? {
            if spec.get_str("name").ok() == Some(DEFAULT_INDEX_NAME) {
                continue;
            }
            match store.create_index(to, &name, creatable_index_spec(&spec)).await {
                Ok(index) => {
                    debug!("Copied index '{}' to {}.{}", index, to, name);
                    summary.indexes += 1;
                }
                Err(e) => warn!("Failed to copy index on {}.{}: {}", to, name, e),
            }
        }

        debug!("Copied {} documents from {}.{}", copied, from, name);
        summary.documents += copied;
        summary.collections += 1;
    }

    info!(
        "Copied database '{}' to '{}': {} collections, {} documents",
        from, to, summary.collections, summary.documents
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use mongodb::bson::doc;

    #[tokio::test]
    async fn test_copy_streams_documents_and_indexes() {
        let store = MemoryStore::new();
        store.seed("src", "users", (0..5).map(|i| doc! { "i": i }).collect());
        store.seed_index("src", "users", doc! { "v": 2, "key": { "i": 1 }, "name": "i_1" });
        store.seed("src", "empty", Vec::new());

        let summary = copy_database(&store, "src", "dst", 2).await.unwrap();

        assert_eq!(summary, CopySummary { collections: 2, documents: 5, indexes: 1 });
        assert_eq!(store.collection_names("dst"), vec!["empty".to_string(), "users".to_string()]);
        assert_eq!(store.documents("dst", "users").len(), 5);
        assert_eq!(store.index_names("dst", "users"), vec!["_id_".to_string(), "i_1".to_string()]);
        assert_eq!(store.cursor_stats().batches(), vec![2, 2, 1]);
        assert_eq!(store.cursor_stats().closed(), 2);
    }

    #[tokio::test]
    async fn test_copy_closes_cursor_on_failure() {
        let store = MemoryStore::new();
        store.seed("src", "c", (0..4).map(|i| doc! { "i": i }).collect());
        store.fail_cursor_after(1);

        assert!(copy_database(&store, "src", "dst", 2).await.is_err());
        assert_eq!(store.cursor_stats().closed(), 1);
    }
}
