use crate::ipc::error::ok;
use crate::ipc::helpers::{db_err, get_required_email, get_required_str, require_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const AUDIT_LIST_DEFAULT: i64 = 100;
const AUDIT_LIST_MAX: i64 = 500;

fn audit_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let limit = match params.get("limit") {
        None => AUDIT_LIST_DEFAULT,
        Some(v) if v.is_null() => AUDIT_LIST_DEFAULT,
        Some(v) => match v.as_i64() {
            Some(n) if (1..=AUDIT_LIST_MAX).contains(&n) => n,
            _ => {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("limit must be an integer in 1..={}", AUDIT_LIST_MAX),
                ))
            }
        },
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, at, actor, action, details FROM audit_log
             ORDER BY at DESC, rowid DESC
             LIMIT ?",
        )
        .map_err(db_err("db_query_failed"))?;
    let entries = stmt
        .query_map([limit], |r| {
            let id: String = r.get(0)?;
            let at: String = r.get(1)?;
            let actor: String = r.get(2)?;
            let action: String = r.get(3)?;
            let details: String = r.get(4)?;
            Ok((id, at, actor, action, details))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .map(|(id, at, actor, action, details)| {
            json!({
                "id": id,
                "at": at,
                "actor": actor,
                "action": action,
                "details": serde_json::from_str::<serde_json::Value>(&details)
                    .unwrap_or(serde_json::Value::String(details)),
            })
        })
        .collect::<Vec<_>>();
    Ok(json!({ "entries": entries }))
}

fn notifications_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_email(params, "email")?;
    let unread_only = params
        .get("unreadOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut stmt = conn
        .prepare(
            "SELECT id, kind, message, created_at, read FROM notifications
             WHERE email = ?1 AND (?2 = 0 OR read = 0)
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(db_err("db_query_failed"))?;
    let notifications = stmt
        .query_map(rusqlite::params![email, unread_only], |r| {
            let id: String = r.get(0)?;
            let kind: String = r.get(1)?;
            let message: String = r.get(2)?;
            let created_at: String = r.get(3)?;
            let read: bool = r.get(4)?;
            Ok(json!({
                "id": id,
                "kind": kind,
                "message": message,
                "createdAt": created_at,
                "read": read
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "notifications": notifications }))
}

fn notifications_mark_read(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let notification_id = get_required_str(params, "notificationId")?;
    let changed = conn
        .execute(
            "UPDATE notifications SET read = 1 WHERE id = ?",
            [&notification_id],
        )
        .map_err(db_err("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "notification not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "audit.list" => audit_list,
            "notifications.list" => notifications_list,
            "notifications.markRead" => notifications_mark_read,
            _ => return None,
        };
    let result = require_conn(state).and_then(|conn| op(conn, &req.params));
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
