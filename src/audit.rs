use chrono::{SecondsFormat, Utc};
use log::info;
use rusqlite::Connection;
use uuid::Uuid;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Appends one audit entry. Runs on whatever connection or transaction the
/// caller is using, so the entry commits together with the change.
pub fn record(
    conn: &Connection,
    actor: &str,
    action: &str,
    details: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO audit_log(id, at, actor, action, details) VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            now_rfc3339(),
            actor,
            action,
            details.to_string(),
        ),
    )?;
    info!("event=audit action={} actor={}", action, actor);
    Ok(())
}

pub fn notify(conn: &Connection, email: &str, kind: &str, message: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO notifications(id, email, kind, message, created_at, read)
         VALUES(?, ?, ?, ?, ?, 0)",
        (Uuid::new_v4().to_string(), email, kind, message, now_rfc3339()),
    )?;
    Ok(())
}
