//! [`Store`] backed by the shared MongoDB client
//!
//! Every call resolves the current client through the [`ConnectionManager`],
//! so a reconnect takes effect for the next operation.

use async_trait::async_trait;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{FindOptions, ReadPreference, SelectionCriteria};
use mongodb::{Collection, Database};
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::error::{AdminError, Result};
use crate::transfer::streaming::{CursorStreamingQuery, StreamingQuery};

use super::{CursorRequest, ReadPolicy, Store};

/// MongoDB-backed store
#[derive(Clone)]
pub struct MongoStore {
    connection: ConnectionManager,
}

impl MongoStore {
    /// Create a store over the shared connection
    ///
    /// # Arguments
    /// * `connection` - Manager whose current client serves every call
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    async fn database(&self, db: &str) -> Result<Database> {
        self.connection.database(db).await
    }

    async fn collection(&self, db: &str, collection: &str) -> Result<Collection<Document>> {
        Ok(self.database(db).await?.collection(collection))
    }

    fn selection_criteria(policy: ReadPolicy) -> Option<SelectionCriteria> {
        match policy {
            ReadPolicy::Primary => None,
            ReadPolicy::SecondaryPreferred => {
                Some(SelectionCriteria::ReadPreference(ReadPreference::SecondaryPreferred {
                    options: Default::default(),
                }))
            }
        }
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        let names = self.database(db).await?.list_collection_names().await?;
        Ok(names
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect())
    }

    async fn collection_exists(&self, db: &str, collection: &str) -> Result<bool> {
        let names = self
            .database(db)
            .await?
            .list_collection_names()
            .filter(doc! { "name": collection })
            .await?;
        Ok(!names.is_empty())
    }

    async fn estimated_count(&self, db: &str, collection: &str) -> Result<u64> {
        let count = self
            .collection(db, collection)
            .await?
            .estimated_document_count()
            .await?;
        Ok(count)
    }

    async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<Document>> {
        let reply = self
            .database(db)
            .await?
            .run_command(doc! { "listIndexes": collection })
            .await?;

        let specs = reply
            .get_document("cursor")
            .and_then(|cursor| cursor.get_array("firstBatch"))
            .map_err(|e| AdminError::Generic(format!("Unexpected listIndexes reply: {e}")))?
            .iter()
            .filter_map(|spec| match spec {
                Bson::Document(d) => Some(d.clone()),
                _ => None,
            })
            .collect();
        Ok(specs)
    }

    async fn database_stats(&self, db: &str) -> Result<Option<Document>> {
        match self
            .database(db)
            .await?
            .run_command(doc! { "dbStats": 1 })
            .await
        {
            Ok(stats) => Ok(Some(stats)),
            Err(e) => {
                debug!("dbStats unavailable for '{}': {}", db, e);
                Ok(None)
            }
        }
    }

    async fn open_cursor(
        &self,
        db: &str,
        collection: &str,
        request: CursorRequest,
    ) -> Result<Box<dyn StreamingQuery>> {
        let coll = self.collection(db, collection).await?;

        let mut options = FindOptions::default();
        options.batch_size = Some(request.chunk_size);
        options.projection = request.projection;
        options.limit = request.limit;
        options.no_cursor_timeout = Some(false);
        options.selection_criteria = Self::selection_criteria(request.read_policy);

        let cursor = coll.find(request.filter).with_options(options).await?;
        Ok(Box::new(CursorStreamingQuery::new(
            cursor,
            request.chunk_size,
            collection,
        )))
    }

    async fn create_collection(&self, db: &str, collection: &str) -> Result<()> {
        self.database(db).await?.create_collection(collection).await?;
        Ok(())
    }

    async fn drop_collection(&self, db: &str, collection: &str) -> Result<()> {
        self.collection(db, collection).await?.drop().await?;
        Ok(())
    }

    async fn insert_many(&self, db: &str, collection: &str, docs: Vec<Document>) -> Result<u64> {
        if docs.is_empty() {
            return Ok(0);
        }
        let result = self.collection(db, collection).await?.insert_many(docs).await?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn create_index(&self, db: &str, collection: &str, spec: Document) -> Result<String> {
        let name = spec.get_str("name").unwrap_or_default().to_string();
        self.database(db)
            .await?
            .run_command(doc! { "createIndexes": collection, "indexes": [spec] })
            .await?;
        Ok(name)
    }
}
