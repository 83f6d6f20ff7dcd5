use std::{fmt, io};

use crate::error::mongo::{ErrorClass, classify_mongodb_error};

/// Crate-wide `Result` type using [`AdminError`] as the error.
pub type Result<T> = std::result::Result<T, AdminError>;

/// Top-level error type for the admin server.
///
/// Every fallible operation in the crate funnels into this enum so the HTTP
/// layer can map it onto a single status code.
#[derive(Debug)]
pub enum AdminError {
    /// Connection-related errors.
    Connection(ConnectionError),

    /// Configuration errors.
    Config(ConfigError),

    /// Bulk export/import errors.
    Transfer(TransferError),

    /// Missing identifiers or malformed payloads. Rejected before any side effect.
    Validation(String),

    /// The target of an operation already exists.
    Conflict(String),

    /// The named namespace, session or file does not exist.
    NotFound(String),

    /// I/O errors.
    Io(io::Error),

    /// MongoDB driver errors.
    MongoDb(mongodb::error::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Connection-specific errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// No client has been connected yet, or it was closed.
    NotConnected,

    /// Failed to establish a connection.
    ConnectionFailed(String),

    /// Invalid connection URI.
    InvalidUri(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/// Errors raised while a transfer is in flight.
#[derive(Debug)]
pub enum TransferError {
    /// The session was cancelled. Not reported to clients as a failure.
    Cancelled,

    /// The remote peer closed the transport sink.
    ClientDisconnected,

    /// A document could not be encoded or decoded.
    Serialization(String),

    /// The gzip stage failed.
    Compression(String),

    /// An import payload was malformed or an entity could not be applied.
    Import(String),
}

impl AdminError {
    /// Whether this error only signals an early, clean stop of a transfer.
    pub fn is_early_stop(&self) -> bool {
        matches!(
            self,
            AdminError::Transfer(TransferError::Cancelled | TransferError::ClientDisconnected)
        )
    }

    /// Remap driver errors the admin surface reports distinctly.
    ///
    /// `NamespaceNotFound` becomes [`AdminError::NotFound`] and `NamespaceExists`
    /// becomes [`AdminError::Conflict`]; everything else is returned unchanged.
    pub fn remap_namespace(self) -> Self {
        match self {
            AdminError::MongoDb(err) => match classify_mongodb_error(&err) {
                ErrorClass::NamespaceNotFound => AdminError::NotFound(err.to_string()),
                ErrorClass::NamespaceExists => AdminError::Conflict(err.to_string()),
                ErrorClass::Other => AdminError::MongoDb(err),
            },
            other => other,
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::Connection(e) => write!(f, "Connection error: {e}"),
            AdminError::Config(e) => write!(f, "Configuration error: {e}"),
            AdminError::Transfer(e) => write!(f, "Transfer error: {e}"),
            AdminError::Validation(msg) => write!(f, "{msg}"),
            AdminError::Conflict(msg) => write!(f, "{msg}"),
            AdminError::NotFound(msg) => write!(f, "{msg}"),
            AdminError::Io(e) => write!(f, "I/O error: {e}"),
            AdminError::MongoDb(e) => write!(f, "{e}"),
            AdminError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::NotConnected => write!(f, "Mongo client not connected"),
            ConnectionError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::InvalidUri(uri) => write!(f, "Invalid connection URI: {uri}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Cancelled => write!(f, "transfer cancelled"),
            TransferError::ClientDisconnected => write!(f, "client disconnected"),
            TransferError::Serialization(msg) => write!(f, "serialization failed: {msg}"),
            TransferError::Compression(msg) => write!(f, "compression failed: {msg}"),
            TransferError::Import(msg) => write!(f, "import failed: {msg}"),
        }
    }
}

impl std::error::Error for AdminError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for TransferError {}

/* ========================= Conversions to AdminError ========================= */

impl From<io::Error> for AdminError {
    fn from(err: io::Error) -> Self {
        AdminError::Io(err)
    }
}

impl From<mongodb::error::Error> for AdminError {
    fn from(err: mongodb::error::Error) -> Self {
        AdminError::MongoDb(err)
    }
}

impl From<ConnectionError> for AdminError {
    fn from(err: ConnectionError) -> Self {
        AdminError::Connection(err)
    }
}

impl From<ConfigError> for AdminError {
    fn from(err: ConfigError) -> Self {
        AdminError::Config(err)
    }
}

impl From<TransferError> for AdminError {
    fn from(err: TransferError) -> Self {
        AdminError::Transfer(err)
    }
}

impl From<serde_json::Error> for AdminError {
    fn from(err: serde_json::Error) -> Self {
        AdminError::Transfer(TransferError::Serialization(err.to_string()))
    }
}

impl From<bson::extjson::de::Error> for AdminError {
    fn from(err: bson::extjson::de::Error) -> Self {
        AdminError::Validation(format!("Invalid extended JSON: {err}"))
    }
}

impl From<String> for AdminError {
    fn from(msg: String) -> Self {
        AdminError::Generic(msg)
    }
}

impl From<&str> for AdminError {
    fn from(msg: &str) -> Self {
        AdminError::Generic(msg.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_stop_classification() {
        assert!(AdminError::from(TransferError::Cancelled).is_early_stop());
        assert!(AdminError::from(TransferError::ClientDisconnected).is_early_stop());
        assert!(!AdminError::from(TransferError::Import("bad".into())).is_early_stop());
        assert!(!AdminError::Validation("x".into()).is_early_stop());
    }

    #[test]
    fn test_display_messages() {
        let err = AdminError::from(ConnectionError::NotConnected);
        assert_eq!(err.to_string(), "Connection error: Mongo client not connected");

        let err = AdminError::from(ConfigError::InvalidValue {
            field: "transfer.chunk_size".into(),
            value: "0".into(),
        });
        assert!(err.to_string().contains("transfer.chunk_size"));
    }

    #[test]
    fn test_remap_leaves_non_driver_errors() {
        let err = AdminError::Validation("Missing db".into()).remap_namespace();
        assert!(matches!(err, AdminError::Validation(_)));
    }
}
