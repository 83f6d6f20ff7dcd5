//! Document CRUD

use axum::Json;
use axum::extract::State;
use futures::TryStreamExt;
use mongodb::Collection;
use mongodb::bson::{Bson, Document};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::server::AppState;
use crate::server::params::{
    parse_document, parse_documents, parse_filter, require, sanitize_update, to_json,
};
use crate::server::response::ApiResult;

const DEFAULT_FIND_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    #[serde(default)]
    db: Option<String>,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    filter: Option<Value>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    document: Option<Value>,
    #[serde(default)]
    documents: Option<Value>,
    #[serde(default)]
    update: Option<Value>,
    #[serde(default)]
    upsert: bool,
    #[serde(default)]
    delete_many: bool,
}

impl DocumentRequest {
    async fn collection(&self, state: &AppState) -> ApiResult<Collection<Document>> {
        let db = self.db.as_deref().unwrap_or_default();
        let collection = self.collection.as_deref().unwrap_or_default();
        Ok(state.connection.database(db).await?.collection(collection))
    }

    fn namespace(&self) -> [(&'static str, Option<&str>); 2] {
        [
            ("db", self.db.as_deref()),
            ("collection", self.collection.as_deref()),
        ]
    }
}

fn bson_json(value: Bson) -> Value {
    value.into_relaxed_extjson()
}

pub async fn find(
    State(state): State<AppState>,
    Json(body): Json<DocumentRequest>,
) -> ApiResult<Json<Value>> {
    require(&body.namespace(), "Missing db or collection in body")?;
    let filter = parse_filter(body.filter.as_ref())?;
    let limit = body.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_FIND_LIMIT);

    let docs: Vec<Document> = body
        .collection(&state)
        .await?
        .find(filter)
        .limit(limit)
        .await?
        .try_collect()
        .await?;
    let docs: Vec<Value> = docs.into_iter().map(to_json).collect();
    Ok(Json(json!({ "docs": docs })))
}

pub async fn find_one(
    State(state): State<AppState>,
    Json(body): Json<DocumentRequest>,
) -> ApiResult<Json<Value>> {
    let namespace = body.namespace();
    require(
        &[namespace[0], namespace[1], ("filter", body.filter.as_ref().map(|_| "filter"))],
        "Missing db, collection, or filter in body",
    )?;
    let filter = parse_filter(body.filter.as_ref())?;

    let document = body.collection(&state).await?.find_one(filter).await?;
    Ok(Json(json!({
        "success": true,
        "document": document.map(to_json),
    })))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<DocumentRequest>,
) -> ApiResult<Json<Value>> {
    let namespace = body.namespace();
    require(
        &[namespace[0], namespace[1], ("document", body.document.as_ref().map(|_| "document"))],
        "Missing db, collection, or document in body",
    )?;
    let document = parse_document(body.document.as_ref().unwrap_or(&Value::Null), "document")?;

    let result = body.collection(&state).await?.insert_one(document).await?;
    Ok(Json(json!({
        "success": true,
        "insertedId": bson_json(result.inserted_id),
        "message": "Document created successfully",
    })))
}

pub async fn create_many(
    State(state): State<AppState>,
    Json(body): Json<DocumentRequest>,
) -> ApiResult<Json<Value>> {
    let namespace = body.namespace();
    require(
        &[namespace[0], namespace[1], ("documents", body.documents.as_ref().map(|_| "documents"))],
        "Missing db, collection, or documents in body",
    )?;
    let documents = parse_documents(body.documents.as_ref().unwrap_or(&Value::Null))?;

    let result = body.collection(&state).await?.insert_many(documents).await?;
    let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
    ids.sort_by_key(|(index, _)| *index);
    let inserted_ids: serde_json::Map<String, Value> = ids
        .into_iter()
        .map(|(index, id)| (index.to_string(), bson_json(id)))
        .collect();

    Ok(Json(json!({
        "success": true,
        "insertedCount": inserted_ids.len(),
        "insertedIds": inserted_ids,
    })))
}

pub async fn update(
    State(state): State<AppState>,
    Json(body): Json<DocumentRequest>,
) -> ApiResult<Json<Value>> {
    let namespace = body.namespace();
    require(
        &[
            namespace[0],
            namespace[1],
            ("filter", body.filter.as_ref().map(|_| "filter")),
            ("update", body.update.as_ref().map(|_| "update")),
        ],
        "Missing db, collection, filter, or update in body",
    )?;
    let filter = parse_filter(body.filter.as_ref())?;
    let mut update = parse_document(body.update.as_ref().unwrap_or(&Value::Null), "update")?;
    sanitize_update(&mut update)?;

    let result = body
        .collection(&state)
        .await?
        .update_one(filter, update)
        .upsert(body.upsert)
        .await?;
    let message = if result.modified_count > 0 {
        "Document updated successfully"
    } else {
        "No document was modified"
    };
    Ok(Json(json!({
        "success": true,
        "matchedCount": result.matched_count,
        "modifiedCount": result.modified_count,
        "upsertedId": result.upserted_id.map(bson_json),
        "message": message,
    })))
}

pub async fn delete(
    State(state): State<AppState>,
    Json(body): Json<DocumentRequest>,
) -> ApiResult<Json<Value>> {
    let namespace = body.namespace();
    require(
        &[namespace[0], namespace[1], ("filter", body.filter.as_ref().map(|_| "filter"))],
        "Missing db, collection, or filter in body",
    )?;
    let filter = parse_filter(body.filter.as_ref())?;

    let collection = body.collection(&state).await?;
    let result = if body.delete_many {
        collection.delete_many(filter).await?
    } else {
        collection.delete_one(filter).await?
    };
    let message = if result.deleted_count > 0 {
        format!("{} document(s) deleted successfully", result.deleted_count)
    } else {
        "No documents were deleted".to_string()
    };
    Ok(Json(json!({
        "success": true,
        "deletedCount": result.deleted_count,
        "message": message,
    })))
}
