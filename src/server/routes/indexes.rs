//! Index listing and maintenance

use axum::Json;
use axum::extract::{Query, State};
use mongodb::bson::{Document, doc};
use serde::Deserialize;
use serde_json::{Value, json};

use super::NamespaceQuery;
use crate::error::AdminError;
use crate::server::AppState;
use crate::server::params::{parse_document, require, to_json};
use crate::server::response::ApiResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    #[serde(default)]
    db: Option<String>,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    index_spec: Option<Value>,
    #[serde(default)]
    new_index_spec: Option<Value>,
    #[serde(default)]
    index_name: Option<String>,
    #[serde(default)]
    options: Option<Value>,
}

impl IndexRequest {
    fn namespace(&self) -> (String, String) {
        (
            self.db.clone().unwrap_or_default(),
            self.collection.clone().unwrap_or_default(),
        )
    }
}

/// Merge `key` and `options` into a `createIndexes` spec, naming it the way
/// the server would when no name is given
fn index_spec(key: &Value, options: Option<&Value>) -> ApiResult<Document> {
    let key = parse_document(key, "indexSpec")?;
    if key.is_empty() {
        return Err(AdminError::Validation("indexSpec must not be empty".into()));
    }

    let mut spec = match options {
        Some(Value::Null) | None => Document::new(),
        Some(options) => parse_document(options, "options")?,
    };
    if !spec.contains_key("name") {
        let name = key
            .iter()
            .map(|(field, direction)| match direction {
                mongodb::bson::Bson::String(s) => format!("{field}_{s}"),
                other => format!("{field}_{other}"),
            })
            .collect::<Vec<_>>()
            .join("_");
        spec.insert("name", name);
    }
    spec.insert("key", key);
    Ok(spec)
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> ApiResult<Json<Value>> {
    require(
        &[("db", query.db.as_deref()), ("collection", query.collection.as_deref())],
        "Missing db or collection query param",
    )?;
    let db = query.db.unwrap_or_default();
    let collection = query.collection.unwrap_or_default();

    let indexes: Vec<Value> = state
        .store
        .list_indexes(&db, &collection)
        .await
        .map_err(AdminError::remap_namespace)?
        .into_iter()
        .map(to_json)
        .collect();
    Ok(Json(json!({ "indexes": indexes })))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<IndexRequest>,
) -> ApiResult<Json<Value>> {
    let Some(key) = body.index_spec.as_ref().filter(|_| {
        body.db.as_deref().is_some_and(|s| !s.is_empty())
            && body.collection.as_deref().is_some_and(|s| !s.is_empty())
    }) else {
        return Err(AdminError::Validation(
            "Missing db, collection, or indexSpec in body".into(),
        ));
    };
    let (db, collection) = body.namespace();

    let spec = index_spec(key, body.options.as_ref())?;
    let name = state.store.create_index(&db, &collection, spec).await?;
    Ok(Json(json!({ "success": true, "indexName": name })))
}

async fn drop_index(
    state: &AppState,
    db: &str,
    collection: &str,
    name: &str,
) -> ApiResult<Document> {
    Ok(state
        .connection
        .database(db)
        .await?
        .run_command(doc! { "dropIndexes": collection, "index": name })
        .await?)
}

pub async fn delete(
    State(state): State<AppState>,
    Json(body): Json<IndexRequest>,
) -> ApiResult<Json<Value>> {
    require(
        &[
            ("db", body.db.as_deref()),
            ("collection", body.collection.as_deref()),
            ("indexName", body.index_name.as_deref()),
        ],
        "Missing db, collection, or indexName in body",
    )?;
    let (db, collection) = body.namespace();
    let name = body.index_name.unwrap_or_default();

    let reply = drop_index(&state, &db, &collection, &name).await?;
    Ok(Json(json!({ "success": true, "result": to_json(reply) })))
}

/// Indexes cannot be modified in place: drop, then create
pub async fn update(
    State(state): State<AppState>,
    Json(body): Json<IndexRequest>,
) -> ApiResult<Json<Value>> {
    let valid = body.db.as_deref().is_some_and(|s| !s.is_empty())
        && body.collection.as_deref().is_some_and(|s| !s.is_empty())
        && body.index_name.as_deref().is_some_and(|s| !s.is_empty());
    let Some(key) = body.new_index_spec.as_ref().filter(|_| valid) else {
        return Err(AdminError::Validation(
            "Missing db, collection, indexName, or newIndexSpec in body".into(),
        ));
    };
    let (db, collection) = body.namespace();
    let spec = index_spec(key, body.options.as_ref())?;

    drop_index(&state, &db, &collection, body.index_name.as_deref().unwrap_or_default()).await?;
    let name = state.store.create_index(&db, &collection, spec).await?;
    Ok(Json(json!({ "success": true, "indexName": name })))
}
