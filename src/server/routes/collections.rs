//! Collection create, drop and rename

use axum::Json;
use axum::extract::State;
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::error::AdminError;
use crate::server::AppState;
use crate::server::params::require;
use crate::server::response::ApiResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRequest {
    #[serde(default)]
    db: Option<String>,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    drop_target: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CollectionRequest>,
) -> ApiResult<Json<Value>> {
    require(
        &[("db", body.db.as_deref()), ("collection", body.collection.as_deref())],
        "Missing db or collection in body",
    )?;
    let (db, collection) = (body.db.unwrap_or_default(), body.collection.unwrap_or_default());

    state
        .store
        .create_collection(&db, &collection)
        .await
        .map_err(AdminError::remap_namespace)?;
    Ok(Json(json!({ "success": true, "collection": collection })))
}

pub async fn delete(
    State(state): State<AppState>,
    Json(body): Json<CollectionRequest>,
) -> ApiResult<Json<Value>> {
    require(
        &[("db", body.db.as_deref()), ("collection", body.collection.as_deref())],
        "Missing db or collection in body",
    )?;
    let (db, collection) = (body.db.unwrap_or_default(), body.collection.unwrap_or_default());

    // The driver reports dropping a missing namespace as success.
    if !state.store.collection_exists(&db, &collection).await? {
        return Err(AdminError::NotFound(format!(
            "Collection '{collection}' not found in database '{db}'"
        )));
    }
    state.store.drop_collection(&db, &collection).await?;
    info!("Dropped collection {}.{}", db, collection);
    Ok(Json(json!({ "success": true, "result": true })))
}

/// Rename within one database; an existing target is a conflict unless
/// `dropTarget` is set
pub async fn rename(
    State(state): State<AppState>,
    Json(body): Json<CollectionRequest>,
) -> ApiResult<Json<Value>> {
    require(
        &[
            ("db", body.db.as_deref()),
            ("from", body.from.as_deref()),
            ("to", body.to.as_deref()),
        ],
        "Missing db, from or to in body",
    )?;
    let db = body.db.unwrap_or_default();
    let (from, to) = (body.from.unwrap_or_default(), body.to.unwrap_or_default());

    if state.store.collection_exists(&db, &to).await? {
        if !body.drop_target {
            return Err(AdminError::Conflict("Target namespace exists".into()));
        }
        state.store.drop_collection(&db, &to).await?;
    }

    let client = state.connection.current().await?;
    client
        .database("admin")
        .run_command(doc! {
            "renameCollection": format!("{db}.{from}"),
            "to": format!("{db}.{to}"),
        })
        .await
        .map_err(|e| match AdminError::from(e).remap_namespace() {
            AdminError::NotFound(_) => AdminError::NotFound("Source collection not found".into()),
            other => other,
        })?;

    info!("Renamed collection {}.{} to {}.{}", db, from, db, to);
    Ok(Json(json!({ "success": true, "from": from, "to": to })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::ConnectionManager;
    use crate::store::Store;
    use crate::store::memory::MemoryStore;
    use axum::http::StatusCode;
    use mongodb::bson::doc;
    use std::sync::Arc;

    fn state_with(store: Arc<MemoryStore>) -> AppState {
        let config = Config::default();
        let connection = ConnectionManager::new(config.connection.clone());
        AppState::with_store(config, connection, store)
    }

    fn drop_request(db: &str, collection: &str) -> CollectionRequest {
        CollectionRequest {
            db: Some(db.into()),
            collection: Some(collection.into()),
            from: None,
            to: None,
            drop_target: false,
        }
    }

    #[tokio::test]
    async fn test_delete_drops_existing_collection() {
        let store = Arc::new(MemoryStore::new());
        store.seed("app", "users", vec![doc! { "a": 1 }]);
        let state = state_with(Arc::clone(&store));

        let Json(reply) = delete(State(state), Json(drop_request("app", "users")))
            .await
            .unwrap();
        assert_eq!(reply["success"], true);
        assert!(!store.collection_exists("app", "users").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_of_missing_collection_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        store.seed("app", "users", vec![doc! { "a": 1 }]);
        let state = state_with(store);

        let err = delete(State(state), Json(drop_request("app", "ghost")))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::NotFound(_)));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_requires_collection() {
        let state = state_with(Arc::new(MemoryStore::new()));
        let mut body = drop_request("app", "");
        body.collection = None;
        let err = delete(State(state), Json(body)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
