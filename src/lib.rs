//! mongo-porter library
//!
//! Core of a browser-facing MongoDB admin server. The centre of the crate is
//! the bulk transfer engine: chunked, cancellable exports to JSON or CSV with
//! optional gzip, live progress reporting, and streaming import.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `connection`: MongoDB connection management
//! - `error`: Error types and handling
//! - `server`: HTTP routes and shared application state
//! - `store`: Database operations used by transfers
//! - `transfer`: Export, progress and import engine
//!
//! # Example
//!
//! ```no_run
//! use mongo_porter::{config::Config, server::{AppState, serve}};
//!
//! #[tokio::main]
//! async fn main() -> mongo_porter::Result<()> {
//!     let config = Config::load(None)?;
//!     serve(AppState::new(config)).await
//! }
//! ```

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod store;
pub mod transfer;

// Re-export commonly used types
pub use config::Config;
pub use connection::ConnectionManager;
pub use error::{AdminError, Result};
pub use store::{MongoStore, Store};
pub use transfer::{ExportCoordinator, ImportPipeline, SessionRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
