use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;
use log::{debug, warn};

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::users::try_handle,
    handlers::courses::try_handle,
    handlers::activities::try_handle,
    handlers::grades::try_handle,
    handlers::views::try_handle,
    handlers::audit::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    debug!("event=request method={} id={}", req.method, req.id);

    let resp = HANDLERS
        .iter()
        .find_map(|try_handle| try_handle(state, &req))
        .unwrap_or_else(|| {
            err(
                &req.id,
                "not_implemented",
                format!("unknown method: {}", req.method),
                None,
            )
        });

    if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = resp
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        warn!(
            "event=request_failed method={} id={} code={}",
            req.method, req.id, code
        );
    }
    resp
}
