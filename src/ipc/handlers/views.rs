use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_str, get_required_email, get_required_str, parse_period, require_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::views;
use rusqlite::Connection;
use serde_json::json;

fn gradebook_subject(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let period = parse_period(&get_required_str(params, "period")?)?;
    let model = views::gradebook_subject(conn, &subject_id, period)?;
    Ok(json!(model))
}

fn roster_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let period = match get_optional_str(params, "period") {
        Some(p) => parse_period(&p)?,
        None => Default::default(),
    };
    let model = views::roster_summary(conn, period)?;
    Ok(json!(model))
}

fn report_card(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_email = get_required_email(params, "studentEmail")?;
    let model = views::report_card(conn, &student_email)?;
    Ok(json!(model))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "gradebook.subject" => gradebook_subject,
            "roster.summary" => roster_summary,
            "reports.reportCard" => report_card,
            _ => return None,
        };
    let result = require_conn(state).and_then(|conn| op(conn, &req.params));
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
