use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use super::NamespaceQuery;
use crate::server::AppState;
use crate::server::params::{require, to_json};
use crate::server::response::ApiResult;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    uri: Option<String>,
}

/// Close any current client and connect to `uri`
pub async fn connect(
    State(state): State<AppState>,
    Json(body): Json<ConnectRequest>,
) -> ApiResult<Json<Value>> {
    require(&[("uri", body.uri.as_deref())], "Missing uri in body")?;
    let uri = body.uri.unwrap_or_default();
    state.connection.connect(&uri).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn disconnect(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.connection.close().await?;
    Ok(Json(json!({ "success": true })))
}

/// Databases visible to the current client
pub async fn list_databases(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let client = state.connection.current().await?;
    let databases: Vec<Value> = client
        .database("admin")
        .run_command(mongodb::bson::doc! { "listDatabases": 1 })
        .await?
        .get_array("databases")
        .map(|list| {
            list.iter()
                .filter_map(|db| db.as_document().cloned())
                .map(to_json)
                .collect()
        })
        .unwrap_or_default();
    Ok(Json(json!({ "databases": databases })))
}

pub async fn list_collections(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> ApiResult<Json<Value>> {
    require(&[("db", query.db.as_deref())], "Missing db query param")?;
    let db = query.db.unwrap_or_default();
    let names = state.connection.database(&db).await?.list_collection_names().await?;
    Ok(Json(json!({ "collections": names })))
}
