use crate::audit;
use crate::directory::{
    self, DirectoryCursor, DirectorySource, Page, PageDirection, PageStart,
    DIRECTORY_PAGE_SIZE, DIRECTORY_SEARCH_CAP,
};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_email, get_required_str, require_admin, require_conn,
    require_user, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{map_user, Role, UserRow};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// The user directory ordered by email.
struct SqliteDirectory<'a> {
    conn: &'a Connection,
}

impl DirectorySource for SqliteDirectory<'_> {
    type Record = UserRow;
    type Error = rusqlite::Error;

    fn sort_key(record: &UserRow) -> &str {
        &record.email
    }

    fn fetch_page(
        &self,
        start: PageStart<'_>,
        limit: usize,
    ) -> Result<Vec<UserRow>, rusqlite::Error> {
        let limit = limit as i64;
        let (sql, key) = match start {
            PageStart::Beginning => {
                let mut stmt = self.conn.prepare(
                    "SELECT email, display_name, role FROM users ORDER BY email LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], map_user)?
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(rows);
            }
            PageStart::After(k) => (
                "SELECT email, display_name, role FROM users WHERE email > ?1 ORDER BY email LIMIT ?2",
                k,
            ),
            PageStart::At(k) => (
                "SELECT email, display_name, role FROM users WHERE email >= ?1 ORDER BY email LIMIT ?2",
                k,
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params![key, limit], map_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn fetch_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<UserRow>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT email, display_name, role FROM users
             WHERE substr(email, 1, length(?1)) = ?1
             ORDER BY email
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![prefix, limit as i64], map_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn page_json(page: Page<UserRow>) -> serde_json::Value {
    json!({
        "users": page.records,
        "cursor": page.cursor,
        "hasNext": page.has_next,
        "hasPrev": page.has_prev,
    })
}

fn parse_role(raw: &str) -> Result<Role, HandlerErr> {
    Role::parse(raw).ok_or_else(|| {
        HandlerErr::new("bad_params", "role must be one of: admin, teacher, student")
            .with_details(json!({ "role": raw }))
    })
}

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_email(params, "email")?;
    if !email.contains('@') {
        return Err(HandlerErr::new("bad_params", "email must contain '@'")
            .with_details(json!({ "email": email })));
    }
    let display_name = get_required_str(params, "displayName")?;
    let role = parse_role(&get_required_str(params, "role")?)?;

    let exists = conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_err("db_query_failed"))?
        .is_some();
    if exists {
        return Err(HandlerErr::new("conflict", "a user with this email already exists")
            .with_details(json!({ "email": email })));
    }

    conn.execute(
        "INSERT INTO users(email, display_name, role, created_at) VALUES(?, ?, ?, ?)",
        (&email, &display_name, role.as_str(), audit::now_rfc3339()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "users" }))
    })?;

    let user = UserRow {
        email,
        display_name,
        role: role.as_str().to_string(),
    };
    Ok(json!({ "user": user }))
}

fn users_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_email(params, "email")?;
    let user = require_user(conn, &email)?;
    Ok(json!({ "user": user }))
}

fn users_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_email(params, "email")?;
    let mut user = require_user(conn, &email)?;

    if let Some(name) = get_optional_str(params, "displayName") {
        user.display_name = name;
    }
    if let Some(raw) = get_optional_str(params, "role") {
        let role = parse_role(&raw)?;
        if role == Role::Student && teaches_any_subject(conn, &email)? {
            return Err(HandlerErr::new(
                "conflict",
                "user is assigned as a subject teacher",
            )
            .with_details(json!({ "email": email })));
        }
        user.role = role.as_str().to_string();
    }

    conn.execute(
        "UPDATE users SET display_name = ?, role = ? WHERE email = ?",
        (&user.display_name, &user.role, &email),
    )
    .map_err(db_err("db_update_failed"))?;

    Ok(json!({ "user": user }))
}

fn teaches_any_subject(conn: &Connection, email: &str) -> Result<bool, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM subjects WHERE teacher_email = ? LIMIT 1",
            [email],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?
        .is_some())
}

/// Removes a user with their grades, enrollments and notifications. The
/// audit entry commits with the deletes.
fn users_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_email(params, "email")?;
    let actor = get_required_email(params, "actorEmail")?;
    require_admin(conn, &actor)?;
    let user = require_user(conn, &email)?;
    if teaches_any_subject(conn, &email)? {
        return Err(HandlerErr::new(
            "conflict",
            "user is assigned as a subject teacher; swap the teacher first",
        )
        .with_details(json!({ "email": email })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    for (table, sql) in [
        ("grades", "DELETE FROM grades WHERE student_email = ?"),
        ("enrollments", "DELETE FROM enrollments WHERE student_email = ?"),
        ("notifications", "DELETE FROM notifications WHERE email = ?"),
        ("users", "DELETE FROM users WHERE email = ?"),
    ] {
        tx.execute(sql, [&email]).map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": table }))
        })?;
    }
    audit::record(
        &tx,
        &actor,
        "user.deleted",
        &json!({ "email": email, "role": user.role }),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({ "ok": true }))
}

fn directory_page(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cursor: DirectoryCursor = match params.get("cursor") {
        None => DirectoryCursor::default(),
        Some(v) if v.is_null() => DirectoryCursor::default(),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            HandlerErr::new("bad_params", format!("invalid cursor: {}", e))
        })?,
    };
    let direction = match get_optional_str(params, "direction") {
        None => PageDirection::First,
        Some(raw) => PageDirection::parse(&raw).ok_or_else(|| {
            HandlerErr::new("bad_params", "direction must be one of: first, next, prev")
                .with_details(json!({ "direction": raw }))
        })?,
    };

    let source = SqliteDirectory { conn };
    let page = directory::page(&source, cursor, direction, DIRECTORY_PAGE_SIZE)
        .map_err(db_err("db_query_failed"))?;
    Ok(page_json(page))
}

fn directory_search(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let prefix = params
        .get("prefix")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing prefix"))?;
    let source = SqliteDirectory { conn };
    let page = directory::search(&source, prefix, DIRECTORY_SEARCH_CAP, DIRECTORY_PAGE_SIZE)
        .map_err(db_err("db_query_failed"))?;
    Ok(page_json(page))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "users.create" => users_create,
            "users.get" => users_get,
            "users.update" => users_update,
            "users.delete" => users_delete,
            "directory.page" => directory_page,
            "directory.search" => directory_search,
            _ => return None,
        };
    let result = require_conn(state).and_then(|conn| op(conn, &req.params));
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
