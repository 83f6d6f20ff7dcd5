//! Request payload helpers shared by the route handlers

use std::path::Path;

use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document, oid::ObjectId};
use serde_json::Value;

use crate::error::{AdminError, Result};

/// Fail with a 400 unless every listed field is present and non-empty
pub fn require(fields: &[(&str, Option<&str>)], message: &str) -> Result<()> {
    let missing = fields
        .iter()
        .any(|(_, value)| value.is_none_or(|v| v.trim().is_empty()));
    if missing {
        return Err(AdminError::Validation(message.to_string()));
    }
    Ok(())
}

/// Accept a JSON object or a JSON-encoded string of one
fn decode_value(value: &Value, what: &str) -> Result<Value> {
    match value {
        Value::String(text) => serde_json::from_str(text)
            .map_err(|_| AdminError::Validation(format!("Invalid JSON format for {what}"))),
        other => Ok(other.clone()),
    }
}

/// Convert extended JSON into a document
pub fn to_document(value: Value, what: &str) -> Result<Document> {
    match Bson::try_from(value)? {
        Bson::Document(doc) => Ok(doc),
        _ => Err(AdminError::Validation(format!("{what} must be an object"))),
    }
}

/// Parse a document given as an object or as a JSON string
pub fn parse_document(value: &Value, what: &str) -> Result<Document> {
    to_document(decode_value(value, what)?, what)
}

/// Parse a filter; a string `_id` that is a valid ObjectId is converted
pub fn parse_filter(value: Option<&Value>) -> Result<Document> {
    let mut filter = match value {
        None | Some(Value::Null) => Document::new(),
        Some(value) => parse_document(value, "filter")?,
    };
    coerce_object_id(&mut filter);
    Ok(filter)
}

fn coerce_object_id(filter: &mut Document) {
    let parsed = match filter.get("_id") {
        Some(Bson::String(id)) => ObjectId::parse_str(id).ok(),
        _ => None,
    };
    if let Some(oid) = parsed {
        filter.insert("_id", oid);
    }
}

/// Parse a non-empty list of documents.
///
/// Accepts an array, a JSON string holding an array, or newline-delimited
/// JSON objects.
pub fn parse_documents(value: &Value) -> Result<Vec<Document>> {
    let items = match value {
        Value::Array(items) => items.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            Ok(other) => vec![other],
            Err(_) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(serde_json::from_str::<Value>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| AdminError::Validation("Invalid JSON format for documents".into()))?,
        },
        _ => Vec::new(),
    };

    if items.is_empty() {
        return Err(AdminError::Validation(
            "documents must be a non-empty array".into(),
        ));
    }
    items
        .into_iter()
        .map(|item| to_document(item, "document"))
        .collect()
}

/// Drop `_id` from an update and its `$set`; reject an empty `$set`
pub fn sanitize_update(update: &mut Document) -> Result<()> {
    update.remove("_id");
    if let Ok(set) = update.get_document_mut("$set") {
        set.remove("_id");
        if set.is_empty() {
            return Err(AdminError::Validation("No valid fields to update".into()));
        }
    }
    Ok(())
}

/// Render a document as relaxed extended JSON
pub fn to_json(doc: Document) -> Value {
    Bson::Document(doc).into_relaxed_extjson()
}

/// Timestamp for export file names, safe on every filesystem
pub fn file_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
        .replace([':', '.'], "-")
}

pub fn export_filename(db: &str, now: DateTime<Utc>, gzip: bool) -> String {
    let suffix = if gzip { ".gz" } else { "" };
    format!("{db}-json-{}.json{suffix}", file_timestamp(now))
}

pub fn csv_filename(db: &str, collection: &str, now: DateTime<Utc>, gzip: bool) -> String {
    let suffix = if gzip { ".gz" } else { "" };
    format!("{db}-{collection}-{}.csv{suffix}", file_timestamp(now))
}

pub fn backup_filename(db: &str, now: DateTime<Utc>) -> String {
    format!("{db}-backup-{}.json", now.timestamp_millis())
}

/// Final path component of a client-supplied file name
pub fn basename(name: &str) -> Option<&str> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "..")
}

/// Split `a,b,,c` into trimmed non-empty names
pub fn split_list(list: Option<&str>) -> Option<Vec<String>> {
    let names: Vec<String> = list?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!names.is_empty()).then_some(names)
}
