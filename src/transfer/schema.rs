//! Schema sampling for tabular export
//!
//! Derives a bounded, ordered set of dotted field paths from a sample of
//! documents. The set is computed once per collection and then frozen.

use mongodb::bson::{Bson, Document};
use tracing::debug;

use crate::error::Result;
use crate::store::{CursorRequest, Store};
use crate::transfer::streaming::drain;

/// Ordered, size-bounded list of dotted field paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<String>,
}

impl FieldSet {
    /// Wrap an explicit column list; no cap is applied
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Dotted paths in column order
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether sampling found no fields at all
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over paths in column order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }
}

/// Infers a [`FieldSet`] from sampled documents
#[derive(Debug, Clone, Copy)]
pub struct SchemaSampler {
    /// Maximum number of fields
    pub max_fields: usize,
    /// Nested object levels to descend into; deeper objects become leaves
    pub max_depth: usize,
    /// Documents read from the collection
    pub sample_size: usize,
}

impl Default for SchemaSampler {
    fn default() -> Self {
        Self {
            max_fields: 100,
            max_depth: 3,
            sample_size: 100,
        }
    }
}

impl SchemaSampler {
    /// Create a sampler
    ///
    /// # Arguments
    /// * `max_fields` - Cap on the number of columns
    /// * `max_depth` - Nested object levels to expand into dotted paths
    /// * `sample_size` - Documents read from the head of the collection
    pub fn new(max_fields: usize, max_depth: usize, sample_size: usize) -> Self {
        Self {
            max_fields,
            max_depth,
            sample_size,
        }
    }

    /// Build the field set from `docs`, in first-seen order.
    ///
    /// Enumeration stops as soon as the cap is reached, so later keys and
    /// later documents contribute nothing once the set is full.
    pub fn infer(&self, docs: &[Document]) -> FieldSet {
        let mut fields: Vec<String> = Vec::new();

        for doc in docs {
            if fields.len() >= self.max_fields {
                break;
            }
            self.collect(doc, "", 1, &mut fields);
        }

        fields.truncate(self.max_fields);
        FieldSet::new(fields)
    }

    fn collect(&self, doc: &Document, prefix: &str, depth: usize, fields: &mut Vec<String>) {
        for (key, value) in doc {
            if fields.len() >= self.max_fields {
                return;
            }

            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            match value {
                // Arrays and dates are Bson variants of their own, so only
                // embedded documents are descended into.
                Bson::Document(nested) if depth <= self.max_depth && !nested.is_empty() => {
                    self.collect(nested, &path, depth + 1, fields);
                }
                _ => {
                    if !fields.contains(&path) {
                        fields.push(path);
                    }
                }
            }
        }
    }

    /// Sample the head of `collection` and infer its field set.
    ///
    /// The sampling cursor is closed even when the read fails.
    ///
    /// # Returns
    /// * `Result<FieldSet>` - At most `max_fields` paths, in first-seen order
    pub async fn sample(&self, store: &dyn Store, db: &str, collection: &str) -> Result<FieldSet> {
        let request = CursorRequest::all(self.sample_size.max(1) as u32)
            .with_limit(self.sample_size as i64);
        let mut cursor = store.open_cursor(db, collection, request).await?;
        let docs = drain(cursor.as_mut()).await?;

        let field_set = self.infer(&docs);
        debug!(
            "Sampled {} documents from '{}': {} fields",
            docs.len(),
            collection,
            field_set.len()
        );
        Ok(field_set)
    }
}

/// Resolve a dotted path against a document.
///
/// A missing intermediate key, or an intermediate value that is not a
/// document, yields `None`.
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(nested) => nested.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}
