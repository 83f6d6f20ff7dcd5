//! Route handlers, grouped by resource

pub mod collections;
pub mod connection;
pub mod databases;
pub mod documents;
pub mod indexes;
pub mod transfer;

use serde::Deserialize;

/// `?db=&collection=` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct NamespaceQuery {
    pub db: Option<String>,
    pub collection: Option<String>,
}
