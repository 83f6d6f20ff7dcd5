//! HTTP surface
//!
//! All endpoints live under `/api/mongo`. Handlers are thin: they validate
//! the request, resolve the shared client and hand bulk work to the
//! [`crate::transfer`] engine.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{AdminError, Result};
use crate::store::{MongoStore, Store};
use crate::transfer::{ExportCoordinator, MemoryGuard, SessionRegistry};

pub mod params;
pub mod response;
pub mod routes;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connection: ConnectionManager,
    pub store: Arc<dyn Store>,
    pub registry: SessionRegistry,
    pub coordinator: ExportCoordinator,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let connection = ConnectionManager::new(config.connection.clone());
        let store: Arc<dyn Store> = Arc::new(MongoStore::new(connection.clone()));
        Self::with_store(config, connection, store)
    }

    /// Build state around an explicit store
    pub fn with_store(
        config: Config,
        connection: ConnectionManager,
        store: Arc<dyn Store>,
    ) -> Self {
        let registry = SessionRegistry::new(config.progress.retention());
        let coordinator = ExportCoordinator::new(
            Arc::clone(&store),
            registry.clone(),
            MemoryGuard::new(config.transfer.memory_limit_mb),
        );
        Self {
            config: Arc::new(config),
            connection,
            store,
            registry,
            coordinator,
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/connect", post(routes::connection::connect))
        .route("/disconnect", post(routes::connection::disconnect))
        .route("/list", get(routes::connection::list_databases))
        .route("/collections", get(routes::connection::list_collections))
        .route("/find", post(routes::documents::find))
        .route("/findone", post(routes::documents::find_one))
        .route("/create", post(routes::documents::create))
        .route("/create-many", post(routes::documents::create_many))
        .route("/update", post(routes::documents::update))
        .route("/delete", post(routes::documents::delete))
        .route("/collection/create", post(routes::collections::create))
        .route("/collection/delete", post(routes::collections::delete))
        .route("/collection/rename", post(routes::collections::rename))
        .route("/database/create", post(routes::databases::create))
        .route("/database/delete", post(routes::databases::delete))
        .route("/database/rename", post(routes::databases::rename))
        .route(
            "/index/list",
            get(routes::indexes::list).post(routes::indexes::list),
        )
        .route("/index/create", post(routes::indexes::create))
        .route("/index/delete", post(routes::indexes::delete))
        .route("/index/update", post(routes::indexes::update))
        .route("/database/export", get(routes::transfer::export))
        .route("/database/export-csv", get(routes::transfer::export_csv))
        .route("/database/export-cancel", post(routes::transfer::cancel))
        .route(
            "/database/export-real-progress",
            get(routes::transfer::watch_progress),
        )
        .route("/database/export-progress", get(routes::transfer::scan_progress))
        .route(
            "/database/import",
            post(routes::transfer::import).layer(DefaultBodyLimit::disable()),
        )
        .route("/database/backup", post(routes::transfer::backup))
        .route("/database/download", get(routes::transfer::download));

    let cors = state.config.server.cors;
    let app = Router::new()
        .nest("/api/mongo", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
    } else {
        app
    }
}

/// Bind the listener; `host` may be an IP literal or a resolvable name
async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .map_err(|e| AdminError::Generic(format!("Cannot listen on {host}:{port}: {e}")))
}

/// Connect if a default URI is configured, then serve until shutdown
pub async fn serve(state: AppState) -> Result<()> {
    if let Some(uri) = state.config.connection.default_uri.clone() {
        if let Err(e) = state.connection.connect(&uri).await {
            warn!("Initial connection failed, waiting for /connect: {}", e);
        }
    }

    let listener = bind(&state.config.server.host, state.config.server.port).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    let connection = state.connection.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    connection.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_accepts_host_names() {
        let listener = bind("localhost", 0).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_accepts_ip_literals() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
