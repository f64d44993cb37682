use serde_json::json;
use tracing::warn;

use crate::calc::CalcError;

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
    let message = message.into();
    warn!(request_id = id, code, %message, "request failed");
    let mut error = json!({
        "code": code,
        "message": message,
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

pub fn calc_err(id: &str, e: &CalcError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), e.details())
}
