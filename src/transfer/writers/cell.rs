//! BSON to CSV cell conversion

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mongodb::bson::{Bson, DateTime};

/// Timestamp layout for date cells
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Converts BSON values to the plain text stored in one CSV cell
///
/// The returned text is unescaped; quoting is applied by the writer.
#[derive(Debug, Default, Clone, Copy)]
pub struct CellConverter;

impl CellConverter {
    /// Create a converter
    pub fn new() -> Self {
        Self
    }

    /// Text for one cell
    ///
    /// # Arguments
    /// * `value` - Field value; containers are rendered as relaxed Extended JSON
    ///
    /// # Returns
    /// * `String` - Unescaped cell text
    pub fn convert(&self, value: &Bson) -> String {
        match value {
            Bson::Null | Bson::Undefined => String::new(),
            Bson::String(s) => s.clone(),
            Bson::Int32(n) => n.to_string(),
            Bson::Int64(n) => n.to_string(),
            Bson::Double(f) => f.to_string(),
            Bson::Boolean(b) => b.to_string(),
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::DateTime(dt) => format_datetime(dt),
            Bson::Decimal128(d) => d.to_string(),
            Bson::Binary(bin) => STANDARD.encode(&bin.bytes),
            Bson::Symbol(s) => s.clone(),
            Bson::Timestamp(ts) => format!("{}:{}", ts.time, ts.increment),
            Bson::MinKey => "MinKey".to_string(),
            Bson::MaxKey => "MaxKey".to_string(),
            compound => compound.clone().into_relaxed_extjson().to_string(),
        }
    }

    /// Absent values become empty cells
    pub fn convert_optional(&self, value: Option<&Bson>) -> String {
        value.map(|v| self.convert(v)).unwrap_or_default()
    }
}

fn format_datetime(dt: &DateTime) -> String {
    match chrono::DateTime::from_timestamp_millis(dt.timestamp_millis()) {
        Some(utc) => utc.format(ISO_FORMAT).to_string(),
        None => dt.to_string(),
    }
}
