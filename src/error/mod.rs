//! Error handling for the admin server.
//!
//! - [`AdminError`] is the crate-wide error; every module returns [`Result`].
//! - [`mongo`] extracts structured information from driver errors so the HTTP
//!   layer can report codes and names, and remaps namespace errors to
//!   not-found / conflict conditions.

pub mod kinds;
pub mod mongo;

pub use kinds::{AdminError, ConfigError, ConnectionError, Result, TransferError};
pub use mongo::{ErrorInfo, extract_error_info};
