//! Record cursor adapter
//!
//! Wraps the driver's chunked cursor behind a uniform "pull next batch"
//! contract so the export coordinator never holds more than one chunk of
//! documents at a time.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::Cursor;
use mongodb::bson::Document;
use tracing::{debug, trace};

use crate::error::Result;

/// Trait for streaming query results in batches
#[async_trait]
pub trait StreamingQuery: Send {
    /// Fetch the next batch of documents, or `None` once exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<Document>>>;

    /// Release server-side cursor resources.
    ///
    /// Must be called on every exit path (completion, cancellation, client
    /// disconnect, error). Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Cursor-based streaming query over a driver cursor
pub struct CursorStreamingQuery {
    cursor: Option<Cursor<Document>>,
    batch_size: u32,
    total_fetched: u64,
    collection: String,
}

impl CursorStreamingQuery {
    /// `batch_size` should match the server batch size the cursor was opened
    /// with; `collection` is only used in log lines.
    pub fn new(cursor: Cursor<Document>, batch_size: u32, collection: impl Into<String>) -> Self {
        Self {
            cursor: Some(cursor),
            batch_size: batch_size.max(1),
            total_fetched: 0,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl StreamingQuery for CursorStreamingQuery {
    async fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let mut batch = Vec::with_capacity(self.batch_size as usize);
        while batch.len() < self.batch_size as usize {
            let next = cursor.try_next().await;
            match next {
                Ok(Some(doc)) => batch.push(doc),
                Ok(None) => break,
                Err(e) => {
                    // Dropping the cursor kills it server-side.
                    self.cursor = None;
                    return Err(e.into());
                }
            }
        }

        if batch.is_empty() {
            debug!(
                "Cursor on '{}' exhausted after {} documents",
                self.collection, self.total_fetched
            );
            self.cursor = None;
            return Ok(None);
        }

        self.total_fetched += batch.len() as u64;
        trace!(
            collection = %self.collection,
            total = self.total_fetched,
            "Fetched batch of {} documents",
            batch.len()
        );
        Ok(Some(batch))
    }

    async fn close(&mut self) -> Result<()> {
        if self.cursor.take().is_some() {
            debug!(
                "Closed cursor on '{}' after fetching {} documents",
                self.collection, self.total_fetched
            );
        }
        Ok(())
    }
}

impl Drop for CursorStreamingQuery {
    fn drop(&mut self) {
        if self.cursor.is_some() {
            debug!("Cursor on '{}' dropped without explicit close", self.collection);
        }
    }
}

/// Pull every remaining batch and close the query, even when a pull fails.
///
/// Used by bounded reads such as schema sampling where the caller wants all
/// of a small result set.
pub async fn drain(query: &mut dyn StreamingQuery) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    let outcome = loop {
        match query.next_batch().await {
            Ok(Some(batch)) => docs.extend(batch),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    match (outcome, query.close().await) {
        (Err(e), close) => {
            if let Err(close_err) = close {
                debug!("Closing cursor after failed read also failed: {}", close_err);
            }
            Err(e)
        }
        (Ok(()), close) => close.map(|_| docs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdminError;
    use crate::store::memory::VecStreamingQuery;
    use mongodb::bson::doc;

    #[test]
    fn test_streaming_query_trait_object() {
        fn _accepts_streaming_query(_query: Box<dyn StreamingQuery>) {}
    }

    struct FailingQuery {
        read_fails: bool,
        close_fails: bool,
        closed: bool,
    }

    #[async_trait]
    impl StreamingQuery for FailingQuery {
        async fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
            if self.read_fails {
                Err(AdminError::Generic("read failed".into()))
            } else {
                Ok(None)
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            if self.close_fails {
                Err(AdminError::Generic("close failed".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_drain_reports_read_error_over_close_error() {
        let mut query = FailingQuery { read_fails: true, close_fails: true, closed: false };
        let err = drain(&mut query).await.unwrap_err();
        assert!(query.closed);
        assert_eq!(err.to_string(), AdminError::Generic("read failed".into()).to_string());
    }

    #[tokio::test]
    async fn test_drain_reports_close_error_after_clean_read() {
        let mut query = FailingQuery { read_fails: false, close_fails: true, closed: false };
        let err = drain(&mut query).await.unwrap_err();
        assert!(query.closed);
        assert_eq!(err.to_string(), "close failed");
    }

    #[tokio::test]
    async fn test_drain_collects_all_batches() {
        let docs = vec![doc! { "a": 1 }, doc! { "a": 2 }, doc! { "a": 3 }];
        let mut query = VecStreamingQuery::new(docs, 2);
        let drained = drain(&mut query).await.unwrap();
        assert_eq!(drained.len(), 3);
        assert!(query.is_closed());
    }
}
