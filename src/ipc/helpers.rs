use crate::calc::Period;
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::store::{self, Role, SubjectRow, UserRow};
use crate::views::ViewError;
use rusqlite::Connection;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ViewError> for HandlerErr {
    fn from(e: ViewError) -> Self {
        HandlerErr::new(e.code, e.message)
    }
}

/// Maps a rusqlite failure onto a stable error code.
pub fn db_err(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string())
}

pub fn require_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .conn()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must not be empty", key),
        ));
    }
    Ok(s)
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_email(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    Ok(store::normalize_email(&get_required_str(params, key)?))
}

pub fn parse_period(raw: &str) -> Result<Period, HandlerErr> {
    Period::parse(raw).ok_or_else(|| {
        HandlerErr::new("bad_params", "period must be one of: p1, p2, p3, p4")
            .with_details(json!({ "period": raw }))
    })
}

/// Reads an activity weight. Anything that is not a number (missing, `null`,
/// unparsable text) coerces to 0, the same rule applied to stored weights.
/// Negative or non-finite numbers are rejected.
pub fn parse_new_weight(v: Option<&serde_json::Value>) -> Result<f64, HandlerErr> {
    let n = match v {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => Some(
            s.trim()
                .parse::<f64>()
                .ok()
                .filter(|w| w.is_finite())
                .unwrap_or(0.0),
        ),
        _ => Some(0.0),
    };
    match n {
        Some(w) if w.is_finite() && w >= 0.0 => Ok(w),
        _ => Err(HandlerErr::new(
            "bad_params",
            "weight must be a finite number >= 0",
        )
        .with_details(json!({ "weight": v }))),
    }
}

pub fn require_user(conn: &Connection, email: &str) -> Result<UserRow, HandlerErr> {
    store::get_user(conn, email)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "user not found").with_details(json!({ "email": email }))
        })
}

pub fn require_subject(conn: &Connection, subject_id: &str) -> Result<SubjectRow, HandlerErr> {
    store::get_subject(conn, subject_id)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::new("not_found", "subject not found"))
}

pub fn require_admin(conn: &Connection, actor_email: &str) -> Result<UserRow, HandlerErr> {
    let actor = require_user(conn, actor_email)?;
    if actor.role() != Some(Role::Admin) {
        return Err(HandlerErr::new("forbidden", "administrator role required")
            .with_details(json!({ "actorEmail": actor_email })));
    }
    Ok(actor)
}

/// Activities and grades of a subject are edited by its teacher or by an admin.
pub fn require_subject_editor(
    conn: &Connection,
    actor_email: &str,
    subject: &SubjectRow,
) -> Result<UserRow, HandlerErr> {
    let actor = require_user(conn, actor_email)?;
    let allowed = match actor.role() {
        Some(Role::Admin) => true,
        Some(Role::Teacher) => subject.teacher_email.as_deref() == Some(actor.email.as_str()),
        _ => false,
    };
    if !allowed {
        return Err(HandlerErr::new(
            "forbidden",
            "only the subject teacher or an administrator may edit this subject",
        )
        .with_details(json!({ "actorEmail": actor_email, "subjectId": subject.id })));
    }
    Ok(actor)
}
