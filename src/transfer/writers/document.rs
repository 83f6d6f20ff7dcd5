//! Structured-document export writer
//!
//! Output shape:
//!
//! ```text
//! {"metadata":{...}}                       (optional line)
//! {"db":"app","collections":[
//!   {"name":"users","indexes":[...],"estimatedCount":2,"docs":[{...},{...}]},
//!   ...
//! ],"status":"completed",...}
//! ```
//!
//! Documents are relaxed extended JSON so ObjectIds and dates survive an
//! import. Every opened container is closed by [`FormatWriter::finish`],
//! including on cancellation and failure.

use chrono::Utc;
use mongodb::bson::{Bson, Document};
use serde_json::{Map, Value, json};

use crate::error::Result;

use super::{CollectionHeader, FormatWriter, Termination};

/// Writer for the structured JSON export format
pub struct DocumentWriter {
    db: String,
    metadata: Option<Value>,
    collections_started: usize,
    in_collection: bool,
    docs_in_collection: u64,
    written: u64,
}

impl DocumentWriter {
    /// Create a writer for one database export
    ///
    /// # Arguments
    /// * `db` - Database name recorded in the envelope
    pub fn new(db: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            metadata: None,
            collections_started: 0,
            in_collection: false,
            docs_in_collection: 0,
            written: 0,
        }
    }

    /// Emit `metadata` as a separate leading line
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Documents written across all collections
    pub fn written(&self) -> u64 {
        self.written
    }

    fn close_collection(&mut self, out: &mut Vec<u8>) {
        if self.in_collection {
            out.extend_from_slice(b"]}");
            self.in_collection = false;
        }
    }

    fn trailer(&self, termination: &Termination) -> Map<String, Value> {
        let now = Utc::now().to_rfc3339();
        let fields = match termination {
            Termination::Completed {
                collections,
                documents,
            } => json!({
                "status": "completed",
                "exportCompleted": now,
                "totalCollections": collections,
                "totalDocuments": documents,
            }),
            Termination::Cancelled => json!({
                "status": "cancelled",
                "cancelledAt": now,
                "totalDocuments": self.written,
            }),
            Termination::Failed(message) => json!({
                "status": "error",
                "error": message,
                "errorAt": now,
            }),
        };
        match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl FormatWriter for DocumentWriter {
    fn begin(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(metadata) = &self.metadata {
            serde_json::to_writer(&mut *out, &json!({ "metadata": metadata }))?;
            out.push(b'\n');
        }
        out.extend_from_slice(b"{\"db\":");
        serde_json::to_writer(&mut *out, &self.db)?;
        out.extend_from_slice(b",\"collections\":[");
        Ok(())
    }

    fn begin_collection(&mut self, out: &mut Vec<u8>, header: &CollectionHeader) -> Result<()> {
        self.close_collection(out);
        if self.collections_started > 0 {
            out.push(b',');
        }
        out.push(b'\n');

        let indexes: Vec<Value> = header
            .indexes
            .iter()
            .map(|spec| Bson::Document(spec.clone()).into_relaxed_extjson())
            .collect();

        out.extend_from_slice(b"{\"name\":");
        serde_json::to_writer(&mut *out, &header.name)?;
        out.extend_from_slice(b",\"indexes\":");
        serde_json::to_writer(&mut *out, &indexes)?;
        out.extend_from_slice(b",\"estimatedCount\":");
        serde_json::to_writer(&mut *out, &header.estimated_count)?;
        out.extend_from_slice(b",\"docs\":[");

        self.collections_started += 1;
        self.in_collection = true;
        self.docs_in_collection = 0;
        Ok(())
    }

    fn write_batch(&mut self, out: &mut Vec<u8>, docs: &[Document]) -> Result<usize> {
        for doc in docs {
            if self.docs_in_collection > 0 {
                out.push(b',');
            }
            let value = Bson::Document(doc.clone()).into_relaxed_extjson();
            serde_json::to_writer(&mut *out, &value)?;
            self.docs_in_collection += 1;
        }
        self.written += docs.len() as u64;
        Ok(docs.len())
    }

    fn end_collection(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.close_collection(out);
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>, termination: &Termination) -> Result<()> {
        self.close_collection(out);
        out.extend_from_slice(b"\n]");
        for (key, value) in self.trailer(termination) {
            out.push(b',');
            serde_json::to_writer(&mut *out, &key)?;
            out.push(b':');
            serde_json::to_writer(&mut *out, &value)?;
        }
        out.extend_from_slice(b"}\n");
        Ok(())
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId};
    use serde_json::Deserializer;

    fn parse_all(bytes: &[u8]) -> Vec<Value> {
        Deserializer::from_slice(bytes)
            .into_iter::<Value>()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    fn header(name: &str) -> CollectionHeader {
        CollectionHeader {
            name: name.to_string(),
            indexes: vec![doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }],
            estimated_count: 2,
        }
    }

    #[test]
    fn test_completed_export_is_well_formed() {
        let mut out = Vec::new();
        let mut writer = DocumentWriter::new("app").with_metadata(json!({ "database": "app" }));
        writer.begin(&mut out).unwrap();
        writer.begin_collection(&mut out, &header("users")).unwrap();
        writer
            .write_batch(&mut out, &[doc! { "a": 1 }, doc! { "a": 2 }])
            .unwrap();
        writer.end_collection(&mut out).unwrap();
        writer.begin_collection(&mut out, &header("empty")).unwrap();
        writer.end_collection(&mut out).unwrap();
        writer
            .finish(
                &mut out,
                &Termination::Completed {
                    collections: 2,
                    documents: 2,
                },
            )
            .unwrap();

        let values = parse_all(&out);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["metadata"]["database"], "app");

        let body = &values[1];
        assert_eq!(body["db"], "app");
        assert_eq!(body["status"], "completed");
        assert_eq!(body["totalDocuments"], 2);
        let collections = body["collections"].as_array().unwrap();
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0]["name"], "users");
        assert_eq!(collections[0]["docs"].as_array().unwrap().len(), 2);
        assert_eq!(collections[0]["indexes"][0]["name"], "_id_");
        assert!(collections[1]["docs"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_mid_collection_closes_containers() {
        let mut out = Vec::new();
        let mut writer = DocumentWriter::new("app");
        writer.begin(&mut out).unwrap();
        writer.begin_collection(&mut out, &header("users")).unwrap();
        writer.write_batch(&mut out, &[doc! { "a": 1 }]).unwrap();
        writer.finish(&mut out, &Termination::Cancelled).unwrap();

        let values = parse_all(&out);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["status"], "cancelled");
        assert_eq!(values[0]["totalDocuments"], 1);
        assert!(values[0].get("cancelledAt").is_some());
    }

    #[test]
    fn test_failure_writes_error_marker() {
        let mut out = Vec::new();
        let mut writer = DocumentWriter::new("app");
        writer.begin(&mut out).unwrap();
        writer
            .finish(&mut out, &Termination::Failed("cursor \"killed\"".into()))
            .unwrap();

        let values = parse_all(&out);
        assert_eq!(values[0]["status"], "error");
        assert_eq!(values[0]["error"], "cursor \"killed\"");
        assert!(values[0]["collections"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_documents_use_extended_json() {
        let oid = ObjectId::new();
        let mut out = Vec::new();
        let mut writer = DocumentWriter::new("app");
        writer.begin(&mut out).unwrap();
        writer.begin_collection(&mut out, &header("c")).unwrap();
        writer.write_batch(&mut out, &[doc! { "_id": oid }]).unwrap();
        writer
            .finish(
                &mut out,
                &Termination::Completed {
                    collections: 1,
                    documents: 1,
                },
            )
            .unwrap();

        let values = parse_all(&out);
        assert_eq!(
            values[0]["collections"][0]["docs"][0]["_id"]["$oid"],
            oid.to_hex()
        );
    }
}
