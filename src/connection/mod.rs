//! Connection management for MongoDB
//!
//! A single shared client serves every request. A new `connect` closes the
//! previous client first and replaces it wholesale; a failure while closing
//! the old client is tolerated.

use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, Result};

/// MongoDB connection manager
///
/// Cheap to clone; all clones share the same client slot.
#[derive(Clone)]
pub struct ConnectionManager {
    /// Current client, if connected
    client: Arc<RwLock<Option<Client>>>,

    /// Connection configuration
    config: ConnectionConfig,
}

impl ConnectionManager {
    /// Create a disconnected manager
    ///
    /// # Arguments
    /// * `config` - Pool size, timeout and application name applied to every client
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            client: Arc::new(RwLock::new(None)),
            config,
        }
    }

    /// Connect to `uri`, replacing any existing client.
    ///
    /// The old client is shut down before the new one is created so a new URI
    /// takes effect immediately. The new client is pinged before it is stored.
    ///
    /// # Arguments
    /// * `uri` - `mongodb://` or `mongodb+srv://` connection string
    ///
    /// # Returns
    /// * `Result<()>` - `InvalidUri` for a malformed string, `ConnectionFailed`
    ///   when the server cannot be reached
    pub async fn connect(&self, uri: &str) -> Result<()> {
        let mut slot = self.client.write().await;

        if let Some(previous) = slot.take() {
            debug!("Closing previous MongoDB client before reconnecting");
            Self::shutdown(previous).await;
        }

        let options = self.parse_uri(uri).await?;
        let client = Client::with_options(options)
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        info!("Connected to MongoDB");
        *slot = Some(client);
        Ok(())
    }

    /// Return the current client or [`ConnectionError::NotConnected`].
    ///
    /// The returned handle shares the pool, so holding it across a reconnect
    /// keeps the old pool alive until it is dropped.
    pub async fn current(&self) -> Result<Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }

    /// Get a database handle from the current client
    pub async fn database(&self, name: &str) -> Result<Database> {
        Ok(self.current().await?.database(name))
    }

    /// Close the current client, if any
    ///
    /// Closing a disconnected manager is a no-op.
    pub async fn close(&self) -> Result<()> {
        if let Some(client) = self.client.write().await.take() {
            Self::shutdown(client).await;
            info!("Disconnected from MongoDB");
        }
        Ok(())
    }

    /// Check if currently connected
    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    /// Parse connection URI and apply configured pool settings
    async fn parse_uri(&self, uri: &str) -> Result<ClientOptions> {
        if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
            return Err(ConnectionError::InvalidUri(uri.to_string()).into());
        }

        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| ConnectionError::InvalidUri(e.to_string()))?;

        let timeout = Duration::from_secs(self.config.timeout);
        options.connect_timeout.get_or_insert(timeout);
        options.server_selection_timeout.get_or_insert(timeout);
        options.max_pool_size.get_or_insert(self.config.max_pool_size);
        if options.app_name.is_none() {
            options.app_name = Some(self.config.app_name.clone());
        }

        Ok(options)
    }

    async fn shutdown(client: Client) {
        // Bound the wait so a wedged server cannot block a reconnect.
        if tokio::time::timeout(Duration::from_secs(5), client.shutdown())
            .await
            .is_err()
        {
            warn!("Timed out closing previous MongoDB client; continuing");
        }
    }
}
