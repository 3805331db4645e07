//! Response envelopes. Every line written to stdout is built here.

use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    json!({ "id": id, "ok": false, "error": error_body(code, message.into(), details) })
}

/// Reply to a line that did not parse; there is no id to echo.
pub fn bad_json(message: impl Into<String>) -> serde_json::Value {
    json!({ "ok": false, "error": error_body("bad_json", message.into(), None) })
}

fn error_body(code: &str, message: String, details: Option<serde_json::Value>) -> serde_json::Value {
    let mut body = json!({ "code": code, "message": message });
    if let Some(d) = details {
        body["details"] = d;
    }
    body
}
