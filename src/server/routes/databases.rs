//! Database create, drop and rename

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::server::AppState;
use crate::server::params::{require, to_json};
use crate::server::response::ApiResult;
use crate::transfer::copy_database;

/// Placeholder collection used to materialise an empty database
const INIT_COLLECTION: &str = "__init";

#[derive(Debug, Deserialize)]
pub struct DatabaseRequest {
    #[serde(default)]
    db: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<DatabaseRequest>,
) -> ApiResult<Json<Value>> {
    require(&[("db", body.db.as_deref())], "Missing db in body")?;
    let db = body.db.unwrap_or_default();

    state.store.create_collection(&db, INIT_COLLECTION).await?;
    state.store.drop_collection(&db, INIT_COLLECTION).await?;
    Ok(Json(json!({ "success": true, "db": db })))
}

pub async fn delete(
    State(state): State<AppState>,
    Json(body): Json<DatabaseRequest>,
) -> ApiResult<Json<Value>> {
    require(&[("db", body.db.as_deref())], "Missing db in body")?;
    let db = body.db.unwrap_or_default();

    let reply = state
        .connection
        .database(&db)
        .await?
        .run_command(mongodb::bson::doc! { "dropDatabase": 1 })
        .await?;
    info!("Dropped database '{}'", db);
    Ok(Json(json!({ "success": true, "result": to_json(reply) })))
}

/// Copy every collection into `to`, then drop `from`
pub async fn rename(
    State(state): State<AppState>,
    Json(body): Json<DatabaseRequest>,
) -> ApiResult<Json<Value>> {
    require(
        &[("from", body.from.as_deref()), ("to", body.to.as_deref())],
        "Missing from or to in body",
    )?;
    let (from, to) = (body.from.unwrap_or_default(), body.to.unwrap_or_default());

    let summary = copy_database(
        state.store.as_ref(),
        &from,
        &to,
        state.config.transfer.chunk_size,
    )
    .await?;
    state.connection.database(&from).await?.drop().await?;

    Ok(Json(json!({
        "success": true,
        "from": from,
        "to": to,
        "collections": summary.collections,
        "documents": summary.documents,
    })))
}
