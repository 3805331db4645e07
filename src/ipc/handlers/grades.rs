use crate::audit;
use crate::calc::GradeValue;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_required_email, get_required_str, require_conn, require_subject,
    require_subject_editor, require_user, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, SubjectRow};
use rusqlite::Connection;
use serde_json::{json, Map};

const GRADES_BULK_SET_MAX: usize = 5000;

fn require_enrolled(conn: &Connection, subject: &SubjectRow, email: &str) -> Result<(), HandlerErr> {
    require_user(conn, email)?;
    let enrolled = store::is_enrolled(conn, &subject.course_id, email)
        .map_err(db_err("db_query_failed"))?;
    if !enrolled {
        return Err(HandlerErr::new("bad_params", "student is not enrolled in this course")
            .with_details(json!({ "studentEmail": email, "courseId": subject.course_id })));
    }
    Ok(())
}

/// Writes or clears one grade. `null` clears.
fn write_grade(
    conn: &Connection,
    student_email: &str,
    subject_id: &str,
    activity_name: &str,
    value: Option<&GradeValue>,
) -> Result<(), HandlerErr> {
    match value {
        None => {
            conn.execute(
                "DELETE FROM grades WHERE student_email = ? AND subject_id = ? AND activity_name = ?",
                (student_email, subject_id, activity_name),
            )
            .map_err(|e| {
                HandlerErr::new("db_delete_failed", e.to_string())
                    .with_details(json!({ "table": "grades" }))
            })?;
        }
        Some(g) => {
            conn.execute(
                "INSERT INTO grades(student_email, subject_id, activity_name, value, updated_at)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(student_email, subject_id, activity_name) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                (
                    student_email,
                    subject_id,
                    activity_name,
                    g.to_sql(),
                    audit::now_rfc3339(),
                ),
            )
            .map_err(|e| {
                HandlerErr::new("db_insert_failed", e.to_string())
                    .with_details(json!({ "table": "grades" }))
            })?;
        }
    }
    Ok(())
}

fn grades_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_email = get_required_email(params, "studentEmail")?;
    let subject_id = get_required_str(params, "subjectId")?;
    require_subject(conn, &subject_id)?;

    let grades = store::load_grade_map(conn, &student_email, &subject_id)
        .map_err(db_err("db_query_failed"))?;
    let out: Map<String, serde_json::Value> = grades
        .iter()
        .map(|(name, g)| (name.clone(), g.to_json()))
        .collect();
    Ok(json!({ "grades": out }))
}

fn grades_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_email = get_required_email(params, "studentEmail")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let activity_name = get_required_str(params, "activityName")?;
    let actor = get_required_email(params, "actorEmail")?;
    let Some(raw) = params.get("value") else {
        return Err(HandlerErr::new("bad_params", "missing value (use null to clear)"));
    };
    let value = GradeValue::from_json(raw);

    let subject = require_subject(conn, &subject_id)?;
    require_subject_editor(conn, &actor, &subject)?;
    require_enrolled(conn, &subject, &student_email)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    write_grade(&tx, &student_email, &subject_id, &activity_name, value.as_ref())?;
    audit::record(
        &tx,
        &actor,
        "grade.set",
        &json!({
            "studentEmail": student_email,
            "subjectId": subject_id,
            "activityName": activity_name,
            "value": raw
        }),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({
        "studentEmail": student_email,
        "activityName": activity_name,
        "value": value.as_ref().map(GradeValue::to_json)
    }))
}

/// Tags an edit rejection with the edit's position in the batch.
fn at_index(mut e: HandlerErr, index: usize) -> HandlerErr {
    match e.details.as_mut().and_then(|d| d.as_object_mut()) {
        Some(obj) => {
            obj.insert("index".to_string(), json!(index));
        }
        None => e.details = Some(json!({ "index": index })),
    }
    e
}

/// Applies many `{ studentEmail, activityName, value }` edits of one subject
/// atomically. Any invalid edit rejects the whole batch.
fn grades_bulk_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let actor = get_required_email(params, "actorEmail")?;
    let Some(edits) = params.get("edits").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing edits"));
    };
    if edits.len() > GRADES_BULK_SET_MAX {
        return Err(HandlerErr::new("bad_params", "too many edits")
            .with_details(json!({ "count": edits.len(), "max": GRADES_BULK_SET_MAX })));
    }

    let subject = require_subject(conn, &subject_id)?;
    require_subject_editor(conn, &actor, &subject)?;

    let mut parsed = Vec::with_capacity(edits.len());
    for (i, edit) in edits.iter().enumerate() {
        let student_email = get_required_email(edit, "studentEmail").map_err(|e| at_index(e, i))?;
        let activity_name = get_required_str(edit, "activityName").map_err(|e| at_index(e, i))?;
        let Some(raw) = edit.get("value") else {
            return Err(at_index(
                HandlerErr::new("bad_params", "missing value (use null to clear)"),
                i,
            ));
        };
        require_enrolled(conn, &subject, &student_email).map_err(|e| at_index(e, i))?;
        parsed.push((student_email, activity_name, GradeValue::from_json(raw)));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    for (student_email, activity_name, value) in &parsed {
        write_grade(&tx, student_email, &subject_id, activity_name, value.as_ref())?;
    }
    audit::record(
        &tx,
        &actor,
        "grade.bulk_set",
        &json!({ "subjectId": subject_id, "count": parsed.len() }),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({ "updated": parsed.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "grades.get" => grades_get,
            "grades.set" => grades_set,
            "grades.bulkSet" => grades_bulk_set,
            _ => return None,
        };
    let result = require_conn(state).and_then(|conn| op(conn, &req.params));
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
