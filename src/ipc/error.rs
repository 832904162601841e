use serde_json::json;

use crate::errors::AppError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps every `AppError` variant to its stable wire code.
pub fn app_err(id: &str, error: &AppError) -> serde_json::Value {
    let code = match error {
        AppError::Validation(_) => "validation_failed",
        AppError::DuplicateIdentity => "duplicate_identity",
        AppError::InvalidCredentials => "invalid_credentials",
        AppError::RemoteUnavailable(_) => "remote_unavailable",
        AppError::NotFound(_) => "not_found",
    };
    err(id, code, error.to_string(), None)
}
