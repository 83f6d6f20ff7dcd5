use serde::{Deserialize, Serialize};

/// Structured error information extracted from MongoDB errors.
///
/// Serialized into the `error` field of failed HTTP responses.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
}

impl ErrorInfo {
    /// Error info carrying only a message.
    pub fn message(msg: impl Into<String>) -> Self {
        Self {
            message: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Attach an error type tag.
    pub fn with_type(mut self, error_type: &str) -> Self {
        self.error_type = Some(error_type.to_string());
        self
    }
}

/// Coarse classification of driver errors the admin surface remaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NamespaceNotFound,
    NamespaceExists,
    Other,
}

const NAMESPACE_NOT_FOUND: i32 = 26;
const NAMESPACE_EXISTS: i32 = 48;

/// Classify a driver error by its server error code, falling back to the
/// message text the server uses for the same conditions.
pub fn classify_mongodb_error(error: &mongodb::error::Error) -> ErrorClass {
    let info = extract_error_info(error);
    classify(info.code, info.message.as_deref().unwrap_or_default())
}

fn classify(code: Option<i32>, message: &str) -> ErrorClass {
    match code {
        Some(NAMESPACE_NOT_FOUND) => return ErrorClass::NamespaceNotFound,
        Some(NAMESPACE_EXISTS) => return ErrorClass::NamespaceExists,
        _ => {}
    }

    let lower = message.to_lowercase();
    if lower.contains("ns not found") {
        ErrorClass::NamespaceNotFound
    } else if lower.contains("target namespace exists") {
        ErrorClass::NamespaceExists
    } else {
        ErrorClass::Other
    }
}

/// Server-reported code and message carried by a driver error, with a tag
/// naming the failing operation class
fn server_failure(kind: &mongodb::error::ErrorKind) -> Option<(&'static str, Option<i32>, String)> {
    use mongodb::error::{ErrorKind, WriteFailure};

    let (tag, code, message) = match kind {
        ErrorKind::Command(e) => ("mongo.command_error", Some(e.code), e.message.clone()),
        ErrorKind::Write(WriteFailure::WriteError(e)) => {
            ("mongo.write_error", Some(e.code), e.message.clone())
        }
        ErrorKind::Write(WriteFailure::WriteConcernError(e)) => {
            ("mongo.write_error", Some(e.code), e.message.clone())
        }
        ErrorKind::InsertMany(e) => {
            let first = e.write_errors.as_ref().and_then(|errors| errors.first());
            match (first, &e.write_concern_error) {
                (Some(w), _) => ("mongo.insert_many_error", Some(w.code), w.message.clone()),
                (None, Some(wc)) => ("mongo.insert_many_error", Some(wc.code), wc.message.clone()),
                (None, None) => ("mongo.insert_many_error", None, kind.to_string()),
            }
        }
        ErrorKind::Authentication { message, .. } => {
            ("mongo.authentication_error", None, message.clone())
        }
        ErrorKind::InvalidArgument { message, .. } => {
            ("mongo.invalid_argument", None, message.clone())
        }
        ErrorKind::ServerSelection { message, .. } => {
            ("mongo.server_selection_error", None, message.clone())
        }
        _ => return None,
    };
    Some((tag, code, message))
}

/// Structured view of a driver error for HTTP responses and remapping.
///
/// Duplicate-key failures (11000/11001) get a fixed message so clients can
/// match on it without parsing server text.
pub fn extract_error_info(error: &mongodb::error::Error) -> ErrorInfo {
    let Some((tag, code, message)) = server_failure(error.kind.as_ref()) else {
        return ErrorInfo::message(error.to_string());
    };

    let duplicate = matches!(code, Some(11000 | 11001));
    ErrorInfo {
        error_type: Some(tag.to_string()),
        code,
        name: code.and_then(get_error_name),
        message: Some(if duplicate { "Duplicate key error".to_string() } else { message }),
    }
}

/// Get a human-readable error name from a MongoDB error code.
fn get_error_name(code: i32) -> Option<String> {
    let name = match code {
        11000 | 11001 => "DuplicateKey",
        13 => "Unauthorized",
        18 => "AuthenticationFailed",
        NAMESPACE_NOT_FOUND => "NamespaceNotFound",
        NAMESPACE_EXISTS => "NamespaceExists",
        50 => "MaxTimeMSExpired",
        85 => "IndexOptionsConflict",
        86 => "IndexKeySpecsConflict",
        121 => "DocumentValidationFailure",
        _ => return None,
    };

    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_code() {
        assert_eq!(classify(Some(26), ""), ErrorClass::NamespaceNotFound);
        assert_eq!(classify(Some(48), ""), ErrorClass::NamespaceExists);
        assert_eq!(classify(Some(11000), "dup"), ErrorClass::Other);
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(classify(None, "ns not found"), ErrorClass::NamespaceNotFound);
        assert_eq!(
            classify(None, "Target Namespace Exists"),
            ErrorClass::NamespaceExists
        );
        assert_eq!(classify(None, "something else"), ErrorClass::Other);
    }

    #[test]
    fn test_error_names() {
        assert_eq!(get_error_name(26).as_deref(), Some("NamespaceNotFound"));
        assert_eq!(get_error_name(11001).as_deref(), Some("DuplicateKey"));
        assert!(get_error_name(1).is_none());
    }

    #[test]
    fn test_error_info_serialization_skips_empty_fields() {
        let info = ErrorInfo::message("boom").with_type("transfer");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["message"], "boom");
        assert_eq!(json["type"], "transfer");
        assert!(json.get("code").is_none());
    }
}
